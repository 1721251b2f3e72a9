//! End-to-end renderer cycle: parameter blob in, rendered PCM and status
//! blob out, against a plain linear guest memory.

use audren_core::behaviour::{BASE_REVISION_MAGIC, REVISION_5};
use audren_core::command::NullRenderDevice;
use audren_core::system::AudioRenderSystem;
use audren_core::tick::ManualTickSource;
use audren_core::wire::sink::{CircularBufferSinkParameter, SinkInParameter, SinkOutStatus, SINK_TYPE_CIRCULAR_BUFFER};
use audren_core::wire::voice::{
    VoiceChannelResourceInParameter, VoiceInParameter, VoiceOutStatus, PLAY_STATE_STARTED,
    SAMPLE_FORMAT_PCM_INT16,
};
use audren_core::wire::{
    read_wire, write_wire, AudioRendererConfiguration, BehaviourErrorInfoOutStatus,
    BehaviourInParameter, MemoryPoolInParameter, MemoryPoolOutStatus, UpdateDataHeader,
    MEMORY_POOL_STATE_ATTACHED, MEMORY_POOL_STATE_REQUEST_ATTACH,
};
use audren_core::wire::mix::MixInParameter;
use audren_core::wire::effect::EffectInParameter;
use audren_core::UNUSED_ID;
use audren_mem::{GuestMemory, LinearGuestMemory};

const POOL_BASE: u64 = 0x10_0000;
const POOL_SIZE: u64 = 0x1_0000;
const WAVE_ADDR: u64 = POOL_BASE + 0x100;
const RING_ADDR: u64 = POOL_BASE + 0x8000;
const RING_SIZE: u32 = 0x4000;
const REVISION: u32 = BASE_REVISION_MAGIC + REVISION_5;

fn config() -> AudioRendererConfiguration {
    AudioRendererConfiguration {
        sample_rate: 48_000,
        sample_count: 240,
        mix_buffer_count: 2,
        sub_mix_count: 0,
        voice_count: 2,
        sink_count: 1,
        effect_count: 1,
        performance_metric_frames_count: 0,
        voice_drop_enabled: 0,
        reserved: [0; 3],
        splitter_count: 0,
        splitter_destination_count: 0,
        external_context_size: 0,
        revision: REVISION,
    }
}

struct BlobWriter {
    bytes: Vec<u8>,
    offset: usize,
}

impl BlobWriter {
    fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity],
            offset: core::mem::size_of::<UpdateDataHeader>(),
        }
    }

    fn push<T: bytemuck::Pod>(&mut self, value: &T) {
        self.offset += write_wire(&mut self.bytes[self.offset..], value).expect("blob capacity");
    }

    fn finish(mut self, header: &UpdateDataHeader) -> Vec<u8> {
        write_wire(&mut self.bytes, header).unwrap();
        self.bytes.truncate(self.offset);
        self.bytes
    }
}

fn build_input(first_frame: bool) -> Vec<u8> {
    let mut blob = BlobWriter::new(0x2000);

    blob.push(&BehaviourInParameter {
        user_revision: REVISION,
        reserved: 0,
        flags: 0,
    });

    // Pool slot 1 carries everything; the remaining guest pools are idle.
    blob.push(&MemoryPoolInParameter {
        cpu_address: POOL_BASE,
        size: POOL_SIZE,
        state: if first_frame {
            MEMORY_POOL_STATE_REQUEST_ATTACH
        } else {
            0
        },
        reserved: [0; 3],
    });
    for _ in 0..3 {
        blob.push(&MemoryPoolInParameter::default());
    }

    let mut resource = VoiceChannelResourceInParameter::default();
    resource.id = 0;
    resource.is_used = 1;
    resource.mix_volumes[0] = 1.0;
    blob.push(&resource);
    blob.push(&VoiceChannelResourceInParameter::default());

    let mut voice = VoiceInParameter::default();
    voice.id = 0;
    voice.node_id = 17;
    voice.is_new = u8::from(first_frame);
    voice.in_use = 1;
    voice.play_state = PLAY_STATE_STARTED;
    voice.sample_format = SAMPLE_FORMAT_PCM_INT16;
    voice.sample_rate = 48_000;
    voice.channel_count = 1;
    voice.pitch = 1.0;
    voice.volume = 1.0;
    voice.mix_id = 0;
    voice.splitter_id = UNUSED_ID;
    voice.wave_buffers_count = 1;
    voice.channel_resource_ids = [0, UNUSED_ID, UNUSED_ID, UNUSED_ID, UNUSED_ID, UNUSED_ID];
    voice.wave_buffers[0].address = WAVE_ADDR;
    voice.wave_buffers[0].size = 0x400;
    voice.wave_buffers[0].end_sample_offset = 0x200;
    voice.wave_buffers[0].should_loop = 1;
    voice.wave_buffers[0].sent_to_server = u8::from(!first_frame);
    blob.push(&voice);
    blob.push(&VoiceInParameter::default());

    blob.push(&EffectInParameter::default());

    let mut mix = MixInParameter::default();
    mix.mix_id = 0;
    mix.in_use = 1;
    mix.is_dirty = u8::from(first_frame);
    mix.volume = 1.0;
    mix.sample_rate = 48_000;
    mix.buffer_count = 2;
    mix.destination_mix_id = UNUSED_ID;
    mix.destination_splitter_id = UNUSED_ID;
    blob.push(&mix);

    let mut sink = SinkInParameter::default();
    sink.sink_type = SINK_TYPE_CIRCULAR_BUFFER;
    sink.is_used = 1;
    sink.node_id = 40;
    let ring = CircularBufferSinkParameter {
        inputs: [0, 1, 0, 0, 0, 0],
        in_use: 1,
        reserved: 0,
        address: RING_ADDR,
        size: RING_SIZE,
        input_count: 2,
        sample_count: 240,
        sample_format: 2,
    };
    sink.specific_data[..core::mem::size_of::<CircularBufferSinkParameter>()]
        .copy_from_slice(bytemuck::bytes_of(&ring));
    blob.push(&sink);

    let header = UpdateDataHeader {
        revision: REVISION,
        behaviour_size: 0x10,
        memory_pools_size: 4 * 0x20,
        voice_resources_size: 2 * 0x70,
        voices_size: 2 * 0x170,
        effects_size: 0xC0,
        mixes_size: 0x930,
        sinks_size: 0x140,
        performance_buffer_size: 0,
        total_size: blob.offset as u32,
        ..Default::default()
    };
    blob.finish(&header)
}

fn write_ramp_samples(memory: &mut LinearGuestMemory) {
    for i in 0..0x200u64 {
        memory
            .write_u16_le(WAVE_ADDR + i * 2, ((i * 50) & 0xFFFF) as u16)
            .unwrap();
    }
}

#[test]
fn full_update_cycle_renders_pcm_into_the_guest_ring() {
    let raw = config();
    let mut system =
        AudioRenderSystem::new(&raw, 0x40_0000, 1 << 22, Box::new(ManualTickSource::new()))
            .unwrap();
    let mut memory = LinearGuestMemory::new(0x20_0000);
    write_ramp_samples(&mut memory);
    let mut device = NullRenderDevice::default();

    let input = build_input(true);
    let mut output = vec![0u8; 0x400];
    let mut perf_out = [0u8; 0];
    system
        .update(&mut memory, &mut device, &mut output, &input, &mut perf_out)
        .unwrap();

    // Out header: every region accounted for, trailer included.
    let out_header: UpdateDataHeader = read_wire(&output).unwrap();
    assert_eq!(out_header.memory_pools_size, 4 * 0x10);
    assert_eq!(out_header.voices_size, 2 * 0x10);
    assert_eq!(out_header.effects_size, 0x10);
    assert_eq!(out_header.sinks_size, 0x20);
    assert_eq!(out_header.performance_buffer_size, 0x10);
    assert_eq!(out_header.behaviour_size, 0xB0);
    assert_eq!(out_header.render_info_size, 0x10);
    assert_eq!(out_header.total_size, 0x1A0);

    // First pool attached, no errors reported.
    let pool_out: MemoryPoolOutStatus = read_wire(&output[0x40..]).unwrap();
    assert_eq!(pool_out.state, MEMORY_POOL_STATE_ATTACHED);
    let errors: BehaviourErrorInfoOutStatus = read_wire(&output[0xE0..]).unwrap();
    assert_eq!(errors.error_info_count, 0);

    // The ring got one frame of PCM16 from mix buffer 0 (the ramp) and one
    // from buffer 1 (silence).
    assert_eq!(memory.read_u16_le(RING_ADDR + 2).unwrap(), 50);
    assert_eq!(memory.read_u16_le(RING_ADDR + 100).unwrap(), 50 * 50);
    assert_eq!(memory.read_u16_le(RING_ADDR + 480 + 2).unwrap(), 0);

    // Frame 2: counters from frame 1 become guest-visible.
    let input = build_input(false);
    let mut output2 = vec![0u8; 0x400];
    system
        .update(&mut memory, &mut device, &mut output2, &input, &mut perf_out)
        .unwrap();

    let voice_out: VoiceOutStatus = read_wire(&output2[0x40 + 0x40..]).unwrap();
    assert_eq!(voice_out.played_sample_count, 240);
    assert_eq!(voice_out.voice_dropped, 0);

    let sink_out: SinkOutStatus = read_wire(&output2[0x40 + 0x40 + 0x20 + 0x10..]).unwrap();
    assert_eq!(sink_out.last_written_offset, 2 * 480);

    assert_eq!(system.elapsed_frame_count(), 2);
}

#[test]
fn truncated_input_is_rejected_without_a_panic() {
    let raw = config();
    let mut system =
        AudioRenderSystem::new(&raw, 0x40_0000, 1 << 22, Box::new(ManualTickSource::new()))
            .unwrap();
    let mut memory = LinearGuestMemory::new(0x20_0000);
    let mut device = NullRenderDevice::default();

    let full = build_input(true);
    let truncated = &full[..0x80];
    let mut output = vec![0u8; 0x400];
    let mut perf_out = [0u8; 0];
    assert!(system
        .update(&mut memory, &mut device, &mut output, truncated, &mut perf_out)
        .is_err());
}
