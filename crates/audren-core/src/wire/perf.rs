//! Performance telemetry record layouts.
//!
//! Two generations exist: version 1 (original) and version 2 (adds the
//! frame index and the DSP-running-behind flag). The active generation is
//! chosen once per session from the behaviour context.

use bytemuck::{Pod, Zeroable};

pub const ENTRY_TYPE_INVALID: u8 = 0;
pub const ENTRY_TYPE_VOICE: u8 = 1;
pub const ENTRY_TYPE_SUB_MIX: u8 = 2;
pub const ENTRY_TYPE_FINAL_MIX: u8 = 3;
pub const ENTRY_TYPE_SINK: u8 = 4;

pub const DETAIL_TYPE_UNKNOWN: u8 = 0;
pub const DETAIL_TYPE_PCM_INT16: u8 = 1;
pub const DETAIL_TYPE_ADPCM: u8 = 2;
pub const DETAIL_TYPE_VOLUME_RAMP: u8 = 3;
pub const DETAIL_TYPE_BIQUAD_FILTER: u8 = 4;
pub const DETAIL_TYPE_MIX: u8 = 5;
pub const DETAIL_TYPE_DELAY: u8 = 6;
pub const DETAIL_TYPE_AUX: u8 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceEntryVersion1 {
    pub node_id: u32,
    pub start_time: u32,
    pub processing_time: u32,
    pub entry_type: u8,
    pub reserved: [u8; 3],
}

const _: () = assert!(core::mem::size_of::<PerformanceEntryVersion1>() == 0x10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceEntryVersion2 {
    pub node_id: u32,
    pub start_time: u32,
    pub processing_time: u32,
    pub entry_type: u8,
    pub reserved: [u8; 11],
}

const _: () = assert!(core::mem::size_of::<PerformanceEntryVersion2>() == 0x18);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceDetailVersion1 {
    pub node_id: u32,
    pub start_time: u32,
    pub processing_time: u32,
    pub detail_type: u8,
    pub entry_type: u8,
    pub reserved: [u8; 2],
}

const _: () = assert!(core::mem::size_of::<PerformanceDetailVersion1>() == 0x10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceDetailVersion2 {
    pub node_id: u32,
    pub start_time: u32,
    pub processing_time: u32,
    pub detail_type: u8,
    pub entry_type: u8,
    pub reserved: [u8; 10],
}

const _: () = assert!(core::mem::size_of::<PerformanceDetailVersion2>() == 0x18);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceFrameHeaderVersion1 {
    pub total_processing_time: u32,
    pub voice_drop_count: u32,
    pub start_rendering_ticks: u64,
    pub entry_count: u32,
    pub reserved: u32,
}

const _: () = assert!(core::mem::size_of::<PerformanceFrameHeaderVersion1>() == 0x18);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceFrameHeaderVersion2 {
    pub total_processing_time: u32,
    pub voice_drop_count: u32,
    pub start_rendering_ticks: u64,
    pub frame_index: u32,
    pub is_dsp_running_behind: u8,
    pub reserved1: [u8; 3],
    pub entry_count: u32,
    pub reserved2: u32,
    pub reserved3: [u32; 4],
}

const _: () = assert!(core::mem::size_of::<PerformanceFrameHeaderVersion2>() == 0x30);

/// Performance input: scopes profiling to one node id (or all, when the
/// sentinel `u32::MAX` is given).
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceInParameter {
    pub target_node_id: u32,
    pub reserved: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<PerformanceInParameter>() == 0x10);

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PerformanceOutStatus {
    /// Bytes of completed history copied into the performance output buffer.
    pub history_size: u32,
    pub reserved: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<PerformanceOutStatus>() == 0x10);
