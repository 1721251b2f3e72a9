//! Voice parameter/status layouts.

use bytemuck::{Pod, Zeroable};

use crate::{VOICE_BIQUAD_FILTER_COUNT, VOICE_CHANNEL_COUNT_MAX, WAVE_BUFFER_COUNT_MAX};

pub const PLAY_STATE_STARTED: u8 = 0;
pub const PLAY_STATE_STOPPED: u8 = 1;
pub const PLAY_STATE_PAUSED: u8 = 2;

pub const SAMPLE_FORMAT_INVALID: u8 = 0;
pub const SAMPLE_FORMAT_PCM_INT16: u8 = 2;
pub const SAMPLE_FORMAT_ADPCM: u8 = 5;

/// One biquad filter stage: direct-form fixed-point coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BiquadFilterParameter {
    pub enable: u8,
    pub reserved: u8,
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
}

const _: () = assert!(core::mem::size_of::<BiquadFilterParameter>() == 0xC);

/// One queued wave buffer as submitted by the guest.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct WaveBufferInternal {
    pub address: u64,
    pub size: u64,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub should_loop: u8,
    pub is_end_of_stream: u8,
    pub sent_to_server: u8,
    pub reserved: u8,
    pub loop_count: i32,
    /// ADPCM loop context region (coefficient history snapshot).
    pub context_address: u64,
    pub context_size: u64,
}

const _: () = assert!(core::mem::size_of::<WaveBufferInternal>() == 0x30);

/// Per-frame voice parameter block.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct VoiceInParameter {
    pub id: u32,
    pub node_id: u32,
    pub is_new: u8,
    pub in_use: u8,
    pub play_state: u8,
    pub sample_format: u8,
    pub sample_rate: u32,
    pub priority: u32,
    pub sorting_order: u32,
    pub channel_count: u32,
    pub pitch: f32,
    pub volume: f32,
    pub biquads: [BiquadFilterParameter; VOICE_BIQUAD_FILTER_COUNT],
    pub wave_buffers_count: u32,
    pub wave_buffers_index: u32,
    pub reserved1: u32,
    pub external_context_address: u64,
    pub external_context_size: u64,
    pub mix_id: u32,
    pub reserved2: u32,
    pub splitter_id: u32,
    pub decoding_behaviour_flags: u16,
    pub src_quality: u8,
    pub reserved3: u8,
    pub flush_wave_buffer_count: u8,
    pub reserved4: [u8; 7],
    pub wave_buffers: [WaveBufferInternal; WAVE_BUFFER_COUNT_MAX],
    pub channel_resource_ids: [u32; VOICE_CHANNEL_COUNT_MAX],
    pub reserved5: [u8; 0x28],
}

const _: () = assert!(core::mem::size_of::<VoiceInParameter>() == 0x170);

impl Default for VoiceInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// Per-frame voice status written back to the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct VoiceOutStatus {
    pub played_sample_count: u64,
    pub played_wave_buffers_count: u32,
    pub voice_dropped: u8,
    pub reserved: [u8; 3],
}

const _: () = assert!(core::mem::size_of::<VoiceOutStatus>() == 0x10);

/// Per-channel mix volume vector for one voice channel.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct VoiceChannelResourceInParameter {
    pub id: u32,
    pub mix_volumes: [f32; crate::MIX_BUFFER_COUNT_MAX],
    pub is_used: u8,
    pub reserved: [u8; 11],
}

const _: () = assert!(core::mem::size_of::<VoiceChannelResourceInParameter>() == 0x70);

impl Default for VoiceChannelResourceInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}
