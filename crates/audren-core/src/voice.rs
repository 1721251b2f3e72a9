//! Voice server state: one PCM/ADPCM stream source per entry.

use bitflags::bitflags;

use crate::behaviour::BehaviourContext;
use crate::pool::{AddressInfo, MemoryPoolState, PoolMapper};
use crate::wire::voice::{
    BiquadFilterParameter, VoiceChannelResourceInParameter, VoiceInParameter, VoiceOutStatus,
    WaveBufferInternal, PLAY_STATE_PAUSED, PLAY_STATE_STARTED, PLAY_STATE_STOPPED,
    SAMPLE_FORMAT_ADPCM, SAMPLE_FORMAT_PCM_INT16,
};
use crate::wire::ErrorInfo;
use crate::{
    MIX_BUFFER_COUNT_MAX, UNUSED_ID, VALID_CHANNEL_COUNTS, VOICE_BIQUAD_FILTER_COUNT,
    VOICE_CHANNEL_COUNT_MAX, WAVE_BUFFER_COUNT_MAX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    Started,
    #[default]
    Stopped,
    Paused,
}

impl PlayState {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            PLAY_STATE_STARTED => Some(Self::Started),
            PLAY_STATE_STOPPED => Some(Self::Stopped),
            PLAY_STATE_PAUSED => Some(Self::Paused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    Invalid,
    PcmInt16,
    Adpcm,
}

impl SampleFormat {
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            SAMPLE_FORMAT_PCM_INT16 => Self::PcmInt16,
            SAMPLE_FORMAT_ADPCM => Self::Adpcm,
            _ => Self::Invalid,
        }
    }
}

bitflags! {
    /// Revision-gated decode behaviour knobs (revision 5+).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DecodingBehaviourFlags: u16 {
        /// Keep the played-sample counter across a voice restart.
        const SKIP_PLAYED_SAMPLE_COUNT_RESET = 1 << 0;
        /// Decode without pitch/sample-rate conversion.
        const SKIP_PITCH_AND_SAMPLE_RATE_CONVERSION = 1 << 1;
    }
}

/// Server-side view of one queued wave buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaveBuffer {
    pub buffer: AddressInfo,
    pub context: AddressInfo,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub should_loop: bool,
    pub is_end_of_stream: bool,
    pub is_sent_to_dsp: bool,
    pub is_valid: bool,
}

#[derive(Debug, Clone)]
pub struct VoiceState {
    pub in_use: bool,
    pub is_new: bool,
    pub id: u32,
    pub node_id: u32,
    pub play_state: PlayState,
    pub last_play_state: PlayState,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub priority: u32,
    pub sorting_order: u32,
    pub channel_count: u32,
    pub pitch: f32,
    pub volume: f32,
    pub previous_volume: f32,
    pub biquads: [BiquadFilterParameter; VOICE_BIQUAD_FILTER_COUNT],
    pub wave_buffers: [WaveBuffer; WAVE_BUFFER_COUNT_MAX],
    pub wave_buffers_count: u32,
    pub wave_buffers_index: u32,
    pub mix_id: u32,
    pub splitter_id: u32,
    pub channel_resource_ids: [u32; VOICE_CHANNEL_COUNT_MAX],
    pub decoding_behaviour: DecodingBehaviourFlags,
    pub external_context: AddressInfo,
    pub flush_wave_buffer_count: u8,
    pub voice_dropped: bool,
    pub biquad_needs_init: [bool; VOICE_BIQUAD_FILTER_COUNT],
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            in_use: false,
            is_new: false,
            id: 0,
            node_id: 0,
            play_state: PlayState::Stopped,
            last_play_state: PlayState::Stopped,
            sample_format: SampleFormat::Invalid,
            sample_rate: 0,
            priority: 0,
            sorting_order: 0,
            channel_count: 0,
            pitch: 1.0,
            volume: 0.0,
            previous_volume: 0.0,
            biquads: [BiquadFilterParameter::default(); VOICE_BIQUAD_FILTER_COUNT],
            wave_buffers: [WaveBuffer::default(); WAVE_BUFFER_COUNT_MAX],
            wave_buffers_count: 0,
            wave_buffers_index: 0,
            mix_id: UNUSED_ID,
            splitter_id: UNUSED_ID,
            channel_resource_ids: [UNUSED_ID; VOICE_CHANNEL_COUNT_MAX],
            decoding_behaviour: DecodingBehaviourFlags::default(),
            external_context: AddressInfo::default(),
            flush_wave_buffer_count: 0,
            voice_dropped: false,
            biquad_needs_init: [false; VOICE_BIQUAD_FILTER_COUNT],
        }
    }
}

impl VoiceState {
    /// Applies one frame's parameter block.
    ///
    /// A structurally invalid entry is marked unusable for the frame and
    /// skipped; it never aborts the surrounding update (one bad voice must
    /// not block the others). Buffer attach failures surface through the
    /// behaviour error array.
    pub fn update(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &VoiceInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        self.id = parameter.id;
        self.node_id = parameter.node_id;
        self.in_use = parameter.in_use != 0;
        if !self.in_use {
            return;
        }

        if !VALID_CHANNEL_COUNTS.contains(&parameter.channel_count)
            || parameter.sample_rate == 0
        {
            log::warn!(
                "voice {} rejected: channel_count={} sample_rate={}",
                parameter.id,
                parameter.channel_count,
                parameter.sample_rate
            );
            self.in_use = false;
            return;
        }
        let Some(play_state) = PlayState::from_wire(parameter.play_state) else {
            log::warn!("voice {} rejected: play state {}", parameter.id, parameter.play_state);
            self.in_use = false;
            return;
        };

        self.is_new = parameter.is_new != 0;
        if self.is_new {
            self.reset_resources();
        }

        self.last_play_state = self.play_state;
        self.play_state = play_state;
        self.sample_format = SampleFormat::from_wire(parameter.sample_format);
        self.sample_rate = parameter.sample_rate;
        self.priority = parameter.priority;
        self.sorting_order = parameter.sorting_order;
        self.channel_count = parameter.channel_count;
        self.pitch = parameter.pitch;
        // A fresh voice starts at its target volume; only running voices
        // ramp between frames.
        self.previous_volume = if self.is_new { parameter.volume } else { self.volume };
        self.volume = parameter.volume;
        self.mix_id = parameter.mix_id;
        self.splitter_id = parameter.splitter_id;
        self.channel_resource_ids = parameter.channel_resource_ids;
        self.wave_buffers_count = parameter.wave_buffers_count;
        self.wave_buffers_index = parameter.wave_buffers_index;
        self.voice_dropped = false;

        for (stage, biquad) in parameter.biquads.iter().enumerate() {
            // Restarting a stage clears its history, except where the guest
            // relies on the pre-bugfix carry-over.
            let was_enabled = self.biquads[stage].enable != 0;
            self.biquad_needs_init[stage] = if behaviour.is_biquad_filter_effect_state_clear_bug_fixed() {
                biquad.enable != 0 && !was_enabled
            } else {
                biquad.enable != 0 && self.biquads[stage] != *biquad
            };
            self.biquads[stage] = *biquad;
        }

        self.decoding_behaviour = if behaviour.is_decoding_behaviour_flag_supported() {
            DecodingBehaviourFlags::from_bits_truncate(parameter.decoding_behaviour_flags)
        } else {
            DecodingBehaviourFlags::default()
        };

        self.flush_wave_buffer_count = if behaviour.is_flush_voice_wave_buffers_supported() {
            parameter.flush_wave_buffer_count
        } else {
            0
        };

        if parameter.external_context_address != 0 && parameter.external_context_size != 0 {
            let (ok, error) = mapper.try_attach_buffer(
                &mut self.external_context,
                pools,
                parameter.external_context_address,
                parameter.external_context_size,
            );
            if error != ErrorInfo::default() {
                behaviour.append_error(error);
            }
            if !ok {
                self.external_context = AddressInfo::default();
            }
        } else {
            self.external_context = AddressInfo::default();
        }

        for (index, wave_buffer) in parameter.wave_buffers.iter().enumerate() {
            self.update_wave_buffer(behaviour, index, wave_buffer, mapper, pools);
        }

        // Flush requests force-release queued buffers without playing them.
        let mut to_flush = self.flush_wave_buffer_count;
        for wave_buffer in self.wave_buffers.iter_mut() {
            if to_flush == 0 {
                break;
            }
            if wave_buffer.is_valid {
                wave_buffer.is_valid = false;
                wave_buffer.is_sent_to_dsp = true;
                to_flush -= 1;
            }
        }
    }

    fn update_wave_buffer(
        &mut self,
        behaviour: &mut BehaviourContext,
        index: usize,
        parameter: &WaveBufferInternal,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        let wave_buffer = &mut self.wave_buffers[index];

        if parameter.sent_to_server != 0 || parameter.address == 0 {
            // Nothing new queued in this slot.
            if parameter.address == 0 {
                *wave_buffer = WaveBuffer::default();
            }
            return;
        }

        wave_buffer.start_sample_offset = parameter.start_sample_offset;
        wave_buffer.end_sample_offset = parameter.end_sample_offset;
        wave_buffer.should_loop = parameter.should_loop != 0;
        wave_buffer.is_end_of_stream = parameter.is_end_of_stream != 0;
        wave_buffer.is_sent_to_dsp = false;

        let (ok, error) =
            mapper.try_attach_buffer(&mut wave_buffer.buffer, pools, parameter.address, parameter.size);
        if error != ErrorInfo::default() {
            behaviour.append_error(error);
        }
        wave_buffer.is_valid = ok;
        if !ok {
            return;
        }

        if self.sample_format == SampleFormat::Adpcm
            && parameter.context_address != 0
            && parameter.context_size != 0
        {
            let (ok, error) = mapper.try_attach_buffer(
                &mut wave_buffer.context,
                pools,
                parameter.context_address,
                parameter.context_size,
            );
            if error != ErrorInfo::default() {
                behaviour.append_error(error);
            }
            if !ok {
                // Pre-bugfix firmware kept decoding with a stale loop
                // context; the fixed path invalidates the whole buffer.
                if behaviour.is_adpcm_loop_context_bug_fixed() {
                    wave_buffer.is_valid = false;
                }
                wave_buffer.context = AddressInfo::default();
            }
        } else {
            wave_buffer.context = AddressInfo::default();
        }
    }

    fn reset_resources(&mut self) {
        self.wave_buffers = [WaveBuffer::default(); WAVE_BUFFER_COUNT_MAX];
        self.wave_buffers_count = 0;
        self.wave_buffers_index = 0;
        self.previous_volume = 0.0;
        self.biquad_needs_init = [true; VOICE_BIQUAD_FILTER_COUNT];
    }

    /// True when the command generator should emit work for this voice.
    pub fn should_generate_commands(&self) -> bool {
        self.in_use && !self.voice_dropped && self.play_state == PlayState::Started
    }

    /// Fills the per-frame out status from the DSP-side counters.
    pub fn write_out_status(&self, dsp: &VoiceDspState) -> VoiceOutStatus {
        VoiceOutStatus {
            played_sample_count: dsp.played_sample_count,
            played_wave_buffers_count: dsp.played_wave_buffers_count,
            voice_dropped: u8::from(self.voice_dropped),
            reserved: [0; 3],
        }
    }
}

/// ADPCM predictor state carried across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdpcmContext {
    pub predictor_scale: u16,
    pub history: [i16; 2],
}

/// Per-voice-channel DSP execution state (decode position, resample
/// fraction, filter histories). Lives server-side; commands reference it by
/// index.
#[derive(Debug, Clone, Copy)]
pub struct VoiceDspState {
    pub wave_buffer_index: usize,
    pub offset_in_frame_samples: u64,
    pub played_sample_count: u64,
    pub played_wave_buffers_count: u32,
    pub fraction: f32,
    /// Previous/current source samples carried across frames for the linear
    /// resampler.
    pub source_samples: [f32; 2],
    pub adpcm: AdpcmContext,
    pub biquad_history: [[f32; 4]; VOICE_BIQUAD_FILTER_COUNT],
    pub previous_sample: f32,
}

impl Default for VoiceDspState {
    fn default() -> Self {
        Self {
            wave_buffer_index: 0,
            offset_in_frame_samples: 0,
            played_sample_count: 0,
            played_wave_buffers_count: 0,
            fraction: 0.0,
            source_samples: [0.0; 2],
            adpcm: AdpcmContext::default(),
            biquad_history: [[0.0; 4]; VOICE_BIQUAD_FILTER_COUNT],
            previous_sample: 0.0,
        }
    }
}

impl VoiceDspState {
    pub fn reset(&mut self, keep_played_sample_count: bool) {
        let played = self.played_sample_count;
        *self = Self::default();
        if keep_played_sample_count {
            self.played_sample_count = played;
        }
    }
}

/// Per-channel mix volume vector, double-buffered for ramping.
#[derive(Debug, Clone, Copy)]
pub struct VoiceChannelResource {
    pub id: u32,
    pub is_used: bool,
    pub mix_volumes: [f32; MIX_BUFFER_COUNT_MAX],
    pub previous_mix_volumes: [f32; MIX_BUFFER_COUNT_MAX],
}

impl Default for VoiceChannelResource {
    fn default() -> Self {
        Self {
            id: 0,
            is_used: false,
            mix_volumes: [0.0; MIX_BUFFER_COUNT_MAX],
            previous_mix_volumes: [0.0; MIX_BUFFER_COUNT_MAX],
        }
    }
}

impl VoiceChannelResource {
    pub fn update(&mut self, parameter: &VoiceChannelResourceInParameter) {
        self.id = parameter.id;
        let was_used = self.is_used;
        self.is_used = parameter.is_used != 0;
        self.previous_mix_volumes = if was_used {
            self.mix_volumes
        } else {
            parameter.mix_volumes
        };
        self.mix_volumes = parameter.mix_volumes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{BASE_REVISION_MAGIC, REVISION_1, REVISION_5};
    use crate::error::ResultCode;
    use crate::pool::MemoryPoolLocation;

    fn behaviour_at(revision: u32) -> BehaviourContext {
        let mut ctx = BehaviourContext::new();
        ctx.set_user_revision(BASE_REVISION_MAGIC + revision);
        ctx
    }

    fn pool_with(cpu: u64, size: u64) -> Vec<MemoryPoolState> {
        let mut pool = MemoryPoolState::new(MemoryPoolLocation::Cpu);
        pool.set_cpu_address(cpu, size);
        PoolMapper::new(false).map(&mut pool);
        vec![pool]
    }

    fn base_parameter() -> VoiceInParameter {
        let mut parameter = VoiceInParameter::default();
        parameter.id = 1;
        parameter.in_use = 1;
        parameter.is_new = 1;
        parameter.play_state = PLAY_STATE_STARTED;
        parameter.sample_format = SAMPLE_FORMAT_PCM_INT16;
        parameter.sample_rate = 48_000;
        parameter.channel_count = 1;
        parameter.pitch = 1.0;
        parameter.volume = 1.0;
        parameter.mix_id = 0;
        parameter.splitter_id = UNUSED_ID;
        parameter
    }

    #[test]
    fn invalid_channel_count_marks_voice_unusable() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut voice = VoiceState::default();

        let mut parameter = base_parameter();
        parameter.channel_count = 3;
        voice.update(&mut behaviour, &parameter, &mapper, &[]);

        assert!(!voice.in_use);
        assert!(!voice.should_generate_commands());
    }

    #[test]
    fn wave_buffer_attach_failure_reports_error_and_invalidates() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut voice = VoiceState::default();

        let mut parameter = base_parameter();
        parameter.wave_buffers[0].address = 0x9000_0000;
        parameter.wave_buffers[0].size = 0x100;
        voice.update(&mut behaviour, &parameter, &mapper, &pool_with(0x1000_0000, 0x1000));

        assert!(voice.in_use);
        assert!(!voice.wave_buffers[0].is_valid);
        let errors = behaviour.copy_error_info();
        assert_eq!(errors.error_info_count, 1);
        assert_eq!(errors.error_infos[0].error_code, ResultCode::INVALID_ADDRESS_INFO.0);
        assert_eq!(errors.error_infos[0].extra_error_info, 0x9000_0000);
    }

    #[test]
    fn valid_wave_buffer_attaches_to_pool() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut voice = VoiceState::default();
        let pools = pool_with(0x1000_0000, 0x1000);

        let mut parameter = base_parameter();
        parameter.wave_buffers[0].address = 0x1000_0100;
        parameter.wave_buffers[0].size = 0x200;
        parameter.wave_buffers[0].end_sample_offset = 0x100;
        voice.update(&mut behaviour, &parameter, &mapper, &pools);

        assert!(voice.wave_buffers[0].is_valid);
        assert!(voice.wave_buffers[0].buffer.has_memory_pool_state());
        assert_eq!(behaviour.copy_error_info().error_info_count, 0);
        assert!(voice.should_generate_commands());
    }

    #[test]
    fn decoding_behaviour_flags_are_revision_gated() {
        let mapper = PoolMapper::new(false);

        let mut behaviour = behaviour_at(REVISION_1);
        let mut voice = VoiceState::default();
        let mut parameter = base_parameter();
        parameter.decoding_behaviour_flags = 0b11;
        voice.update(&mut behaviour, &parameter, &mapper, &[]);
        assert_eq!(voice.decoding_behaviour, DecodingBehaviourFlags::default());

        let mut behaviour = behaviour_at(REVISION_5);
        let mut voice = VoiceState::default();
        voice.update(&mut behaviour, &parameter, &mapper, &[]);
        assert!(voice
            .decoding_behaviour
            .contains(DecodingBehaviourFlags::SKIP_PLAYED_SAMPLE_COUNT_RESET));
    }

    #[test]
    fn channel_resource_keeps_previous_volumes_for_ramping() {
        let mut resource = VoiceChannelResource::default();
        let mut parameter = VoiceChannelResourceInParameter::default();
        parameter.id = 2;
        parameter.is_used = 1;
        parameter.mix_volumes[0] = 0.8;

        resource.update(&parameter);
        // First use: no ramp, previous == current.
        assert_eq!(resource.previous_mix_volumes[0], 0.8);

        parameter.mix_volumes[0] = 0.2;
        resource.update(&parameter);
        assert_eq!(resource.previous_mix_volumes[0], 0.8);
        assert_eq!(resource.mix_volumes[0], 0.2);
    }
}
