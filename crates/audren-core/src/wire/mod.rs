//! Guest-visible binary layouts.
//!
//! Every struct here is `#[repr(C)]` with explicit reserved fields and a
//! compile-time size pin. These layouts are the wire protocol: a single
//! misplaced padding byte shifts every following field for the guest, so
//! sizes are asserted rather than documented.

pub mod effect;
pub mod mix;
pub mod perf;
pub mod sink;
pub mod splitter;
pub mod voice;

use bytemuck::{Pod, Zeroable};

/// Reads one wire record out of a byte region, or `None` if it doesn't fit.
pub fn read_wire<T: Pod>(bytes: &[u8]) -> Option<T> {
    let size = core::mem::size_of::<T>();
    if bytes.len() < size {
        return None;
    }
    let mut value = T::zeroed();
    bytemuck::bytes_of_mut(&mut value).copy_from_slice(&bytes[..size]);
    Some(value)
}

/// Writes one wire record into a byte region, or `None` if it doesn't fit.
pub fn write_wire<T: Pod>(bytes: &mut [u8], value: &T) -> Option<usize> {
    let size = core::mem::size_of::<T>();
    if bytes.len() < size {
        return None;
    }
    bytes[..size].copy_from_slice(bytemuck::bytes_of(value));
    Some(size)
}

/// Per-frame update header. Leads both the input blob and the output blob;
/// each `*_size` field is the byte length of the corresponding region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct UpdateDataHeader {
    pub revision: u32,
    pub behaviour_size: u32,
    pub memory_pools_size: u32,
    pub voices_size: u32,
    pub voice_resources_size: u32,
    pub effects_size: u32,
    pub mixes_size: u32,
    pub sinks_size: u32,
    pub performance_buffer_size: u32,
    pub unknown_24: u32,
    pub render_info_size: u32,
    pub reserved: [u32; 4],
    pub total_size: u32,
}

const _: () = assert!(core::mem::size_of::<UpdateDataHeader>() == 0x40);

/// Behaviour input: the user revision plus the flags bitmask.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BehaviourInParameter {
    pub user_revision: u32,
    pub reserved: u32,
    pub flags: u64,
}

const _: () = assert!(core::mem::size_of::<BehaviourInParameter>() == 0x10);

/// One structured error surfaced to the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ErrorInfo {
    pub error_code: u32,
    pub reserved: u32,
    pub extra_error_info: u64,
}

const _: () = assert!(core::mem::size_of::<ErrorInfo>() == 0x10);

/// Capacity of the per-frame error report.
pub const MAX_ERROR_INFOS: usize = 10;

/// Behaviour out status: the frame's accumulated error reports.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct BehaviourErrorInfoOutStatus {
    pub error_infos: [ErrorInfo; MAX_ERROR_INFOS],
    pub error_info_count: u32,
    pub reserved: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<BehaviourErrorInfoOutStatus>() == 0xB0);

impl Default for BehaviourErrorInfoOutStatus {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// Memory pool lifecycle requests/states on the wire.
pub const MEMORY_POOL_STATE_INVALID: u32 = 0;
pub const MEMORY_POOL_STATE_NEW: u32 = 1;
pub const MEMORY_POOL_STATE_REQUEST_DETACH: u32 = 2;
pub const MEMORY_POOL_STATE_DETACHED: u32 = 3;
pub const MEMORY_POOL_STATE_REQUEST_ATTACH: u32 = 4;
pub const MEMORY_POOL_STATE_ATTACHED: u32 = 5;
pub const MEMORY_POOL_STATE_RELEASED: u32 = 6;

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct MemoryPoolInParameter {
    pub cpu_address: u64,
    pub size: u64,
    pub state: u32,
    pub reserved: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<MemoryPoolInParameter>() == 0x20);

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct MemoryPoolOutStatus {
    pub state: u32,
    pub reserved: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<MemoryPoolOutStatus>() == 0x10);

/// Renderer session configuration submitted at open time.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct AudioRendererConfiguration {
    pub sample_rate: u32,
    pub sample_count: u32,
    pub mix_buffer_count: u32,
    pub sub_mix_count: u32,
    pub voice_count: u32,
    pub sink_count: u32,
    pub effect_count: u32,
    pub performance_metric_frames_count: u32,
    pub voice_drop_enabled: u8,
    pub reserved: [u8; 3],
    pub splitter_count: u32,
    pub splitter_destination_count: u32,
    pub external_context_size: u32,
    pub revision: u32,
}

const _: () = assert!(core::mem::size_of::<AudioRendererConfiguration>() == 0x34);

/// Render info out status (elapsed DSP frame counter, revision-gated).
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct RenderInfoOutStatus {
    pub elapsed_frame_count: u64,
    pub reserved: u64,
}

const _: () = assert!(core::mem::size_of::<RenderInfoOutStatus>() == 0x10);
