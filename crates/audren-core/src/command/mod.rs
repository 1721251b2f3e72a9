//! The DSP command list.
//!
//! Command generation walks the voice/mix/effect/splitter/sink graphs in
//! dependency order and emits this linear list; processing executes it
//! strictly sequentially on the logical DSP thread. Node ids exist purely
//! for performance-entry attribution — ordering is structural.

pub mod adpcm;
pub mod estimator;
pub mod generator;
pub mod processor;

use crate::perf::PerfSlot;
use crate::voice::DecodingBehaviourFlags;
use crate::wire::effect::{BiquadFilterEffectParameter, DelayParameter};
use crate::wire::voice::BiquadFilterParameter;
use crate::{MIX_BUFFER_COUNT_MAX, VOICE_CHANNEL_COUNT_MAX, WAVE_BUFFER_COUNT_MAX};

/// Seam to the hardware output device: the final-mix frames a device sink
/// produces are handed over here, interleaved.
pub trait RenderDevice {
    fn append_frame(&mut self, interleaved: &[f32], channel_count: usize);
}

/// Null device for tests and headless operation.
#[derive(Debug, Default)]
pub struct NullRenderDevice {
    pub frames_appended: usize,
}

impl RenderDevice for NullRenderDevice {
    fn append_frame(&mut self, _interleaved: &[f32], _channel_count: usize) {
        self.frames_appended += 1;
    }
}

/// One wave buffer with every address resolved to DSP space.
#[derive(Debug, Clone, Copy, Default)]
pub struct DspWaveBuffer {
    pub address: u64,
    pub size: u64,
    pub start_sample_offset: u32,
    pub end_sample_offset: u32,
    pub should_loop: bool,
    pub is_end_of_stream: bool,
    pub context_address: u64,
    pub context_size: u64,
    pub is_valid: bool,
}

/// Fixed-capacity list of mix buffer indices (fan-out targets).
#[derive(Debug, Clone, Copy)]
pub struct BufferIndexList {
    pub indices: [u16; MIX_BUFFER_COUNT_MAX],
    pub count: u8,
}

impl Default for BufferIndexList {
    fn default() -> Self {
        Self {
            indices: [0; MIX_BUFFER_COUNT_MAX],
            count: 0,
        }
    }
}

impl BufferIndexList {
    pub fn push(&mut self, index: u16) {
        if (self.count as usize) < MIX_BUFFER_COUNT_MAX {
            self.indices[self.count as usize] = index;
            self.count += 1;
        }
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.indices[..self.count as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceCommandState {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
    /// Zero every sample buffer.
    ClearMixBuffer,
    /// Capture a stopped voice's tail sample for click-free fade-out.
    DepopPrepare {
        state_index: u32,
        targets: BufferIndexList,
    },
    /// Bleed accumulated depop energy into a mix's buffers.
    DepopForMixBuffers {
        buffer_offset: u16,
        buffer_count: u16,
        sample_rate: u32,
    },
    PcmInt16DataSource {
        output_index: u16,
        state_index: u32,
        sample_rate: u32,
        pitch: f32,
        channel_index: u8,
        channel_count: u8,
        decoding_behaviour: DecodingBehaviourFlags,
        wave_buffers: [DspWaveBuffer; WAVE_BUFFER_COUNT_MAX],
    },
    AdpcmDataSource {
        output_index: u16,
        state_index: u32,
        sample_rate: u32,
        pitch: f32,
        decoding_behaviour: DecodingBehaviourFlags,
        /// 16 signed 16-bit predictor coefficients in guest memory.
        coefficients_address: u64,
        coefficients_size: u64,
        wave_buffers: [DspWaveBuffer; WAVE_BUFFER_COUNT_MAX],
    },
    /// One biquad stage, in place over a voice scratch buffer.
    BiquadFilter {
        input_index: u16,
        output_index: u16,
        parameter: BiquadFilterParameter,
        state_index: u32,
        stage: u8,
        needs_init: bool,
    },
    Volume {
        index: u16,
        volume: f32,
    },
    VolumeRamp {
        index: u16,
        volume0: f32,
        volume1: f32,
    },
    Mix {
        input_index: u16,
        output_index: u16,
        volume: f32,
    },
    MixRamp {
        input_index: u16,
        output_index: u16,
        volume0: f32,
        volume1: f32,
    },
    BufferMixEffect {
        inputs: BufferIndexList,
        outputs: BufferIndexList,
        volumes: [f32; MIX_BUFFER_COUNT_MAX],
    },
    AuxEffect {
        enabled: bool,
        input_index: u16,
        output_index: u16,
        send_info_address: u64,
        send_buffer_address: u64,
        return_info_address: u64,
        return_buffer_address: u64,
        /// Ring capacity in samples.
        count_max: u32,
    },
    DelayEffect {
        enabled: bool,
        parameter: DelayParameter,
        state_index: u32,
        needs_init: bool,
        inputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        outputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        channel_count: u8,
    },
    BiquadFilterEffect {
        enabled: bool,
        parameter: BiquadFilterEffectParameter,
        state_index: u32,
        needs_init: bool,
        inputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        outputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        channel_count: u8,
    },
    CircularBufferSink {
        sink_index: u32,
        inputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        input_count: u8,
        address: u64,
        size: u32,
    },
    DeviceSink {
        inputs: [u16; VOICE_CHANNEL_COUNT_MAX],
        input_count: u8,
    },
    Performance {
        state: PerformanceCommandState,
        slot: PerfSlot,
    },
}

#[derive(Debug, Clone)]
pub struct Command {
    /// Attribution tag for performance entries; never used for ordering.
    pub node_id: u32,
    pub enabled: bool,
    pub kind: CommandKind,
}

#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
    /// Total sample buffers (mix buffers + voice scratch channels).
    pub buffer_count: usize,
    pub sample_count: usize,
}

impl CommandList {
    pub fn new(buffer_count: usize, sample_count: usize) -> Self {
        Self {
            commands: Vec::new(),
            buffer_count,
            sample_count,
        }
    }

    pub fn push(&mut self, node_id: u32, kind: CommandKind) {
        self.commands.push(Command {
            node_id,
            enabled: true,
            kind,
        });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut [Command] {
        &mut self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_index_list_caps_at_mix_buffer_count() {
        let mut list = BufferIndexList::default();
        for i in 0..30 {
            list.push(i);
        }
        assert_eq!(list.as_slice().len(), MIX_BUFFER_COUNT_MAX);
        assert_eq!(list.as_slice()[0], 0);
        assert_eq!(list.as_slice()[23], 23);
    }
}
