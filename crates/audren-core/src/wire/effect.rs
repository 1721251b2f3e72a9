//! Effect parameter/status layouts.

use bytemuck::{Pod, Zeroable};

use crate::{MIX_BUFFER_COUNT_MAX, VOICE_CHANNEL_COUNT_MAX};

pub const EFFECT_TYPE_INVALID: u8 = 0;
pub const EFFECT_TYPE_BUFFER_MIX: u8 = 1;
pub const EFFECT_TYPE_AUX: u8 = 2;
pub const EFFECT_TYPE_DELAY: u8 = 3;
pub const EFFECT_TYPE_BIQUAD_FILTER: u8 = 6;

/// Size of the type-specific trailing region inside [`EffectInParameter`].
pub const EFFECT_SPECIFIC_DATA_SIZE: usize = 0xA0;

/// Effect usage state reported through [`EffectOutStatus`].
pub const EFFECT_STATE_INVALID: u8 = 0;
pub const EFFECT_STATE_NEW: u8 = 1;
pub const EFFECT_STATE_ENABLED: u8 = 2;
pub const EFFECT_STATE_DISABLED: u8 = 3;

/// Per-frame effect parameter block. The meaning of `specific_data` depends
/// on `effect_type`.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct EffectInParameter {
    pub effect_type: u8,
    pub is_new: u8,
    pub is_enabled: u8,
    pub reserved1: u8,
    pub mix_id: u32,
    pub buffer_base: u64,
    pub buffer_size: u64,
    pub processing_order: u32,
    pub reserved2: u32,
    pub specific_data: [u8; EFFECT_SPECIFIC_DATA_SIZE],
}

const _: () = assert!(core::mem::size_of::<EffectInParameter>() == 0xC0);

impl Default for EffectInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl core::fmt::Debug for EffectInParameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EffectInParameter")
            .field("effect_type", &self.effect_type)
            .field("is_new", &self.is_new)
            .field("is_enabled", &self.is_enabled)
            .field("mix_id", &self.mix_id)
            .field("processing_order", &self.processing_order)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct EffectOutStatus {
    pub state: u8,
    pub reserved: [u8; 15],
}

const _: () = assert!(core::mem::size_of::<EffectOutStatus>() == 0x10);

/// Specific data for buffer-mix effects: per-channel gain between mix
/// buffers of the owning mix.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct BufferMixParameter {
    pub input: [u8; MIX_BUFFER_COUNT_MAX],
    pub output: [u8; MIX_BUFFER_COUNT_MAX],
    pub volumes: [f32; MIX_BUFFER_COUNT_MAX],
    pub mix_count: u32,
}

const _: () = assert!(core::mem::size_of::<BufferMixParameter>() == 0x94);
const _: () = assert!(core::mem::size_of::<BufferMixParameter>() <= EFFECT_SPECIFIC_DATA_SIZE);

/// Specific data for auxiliary-buffer effects: a send/return pair of guest
/// rings the application taps for custom processing.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct AuxParameter {
    pub input: [u8; MIX_BUFFER_COUNT_MAX],
    pub output: [u8; MIX_BUFFER_COUNT_MAX],
    pub mix_count: u32,
    pub reserved1: u32,
    pub send_buffer_info_address: u64,
    pub send_buffer_base_address: u64,
    pub return_buffer_info_address: u64,
    pub return_buffer_base_address: u64,
    pub channel_count: u32,
    pub sample_rate: u32,
    pub buffer_storage_size: u32,
    pub reserved2: u32,
}

const _: () = assert!(core::mem::size_of::<AuxParameter>() == 0x68);
const _: () = assert!(core::mem::size_of::<AuxParameter>() <= EFFECT_SPECIFIC_DATA_SIZE);

/// Specific data for delay effects.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct DelayParameter {
    pub input: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub output: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub channel_count_max: u16,
    pub channel_count: u16,
    pub delay_time_max_ms: u32,
    pub delay_time_ms: u32,
    pub sample_rate: u32,
    pub in_gain: f32,
    pub feedback_gain: f32,
    pub dry_gain: f32,
    pub channel_spread: f32,
    pub low_pass_amount: f32,
    pub status: u8,
    pub reserved: [u8; 3],
}

const _: () = assert!(core::mem::size_of::<DelayParameter>() == 0x34);
const _: () = assert!(core::mem::size_of::<DelayParameter>() <= EFFECT_SPECIFIC_DATA_SIZE);

/// Specific data for standalone biquad-filter effects.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct BiquadFilterEffectParameter {
    pub input: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub output: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
    pub channel_count: u8,
    pub status: u8,
}

const _: () = assert!(core::mem::size_of::<BiquadFilterEffectParameter>() == 0x18);
const _: () = assert!(core::mem::size_of::<BiquadFilterEffectParameter>() <= EFFECT_SPECIFIC_DATA_SIZE);

/// Parameter status values carried inside delay/biquad specific data; `New`
/// asks the server to reinitialize the effect's processing state.
pub const PARAMETER_STATUS_INITIALIZED: u8 = 0;
pub const PARAMETER_STATUS_NEW: u8 = 1;
pub const PARAMETER_STATUS_UPDATED: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::read_wire;

    #[test]
    fn specific_data_region_parses_as_delay_parameter() {
        let mut param = EffectInParameter {
            effect_type: EFFECT_TYPE_DELAY,
            is_new: 1,
            is_enabled: 1,
            ..Default::default()
        };
        let delay = DelayParameter {
            input: [0, 1, 0, 0, 0, 0],
            output: [0, 1, 0, 0, 0, 0],
            channel_count_max: 2,
            channel_count: 2,
            delay_time_max_ms: 500,
            delay_time_ms: 120,
            sample_rate: 48_000,
            in_gain: 0.7,
            feedback_gain: 0.4,
            dry_gain: 0.6,
            channel_spread: 0.0,
            low_pass_amount: 0.2,
            status: PARAMETER_STATUS_NEW,
            reserved: [0; 3],
        };
        param.specific_data[..core::mem::size_of::<DelayParameter>()]
            .copy_from_slice(bytemuck::bytes_of(&delay));

        let parsed: DelayParameter = read_wire(&param.specific_data).unwrap();
        assert_eq!(parsed.delay_time_ms, 120);
        assert_eq!(parsed.channel_count, 2);
        assert_eq!(parsed.status, PARAMETER_STATUS_NEW);
    }
}
