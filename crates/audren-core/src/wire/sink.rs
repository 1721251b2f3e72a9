//! Sink parameter/status layouts.

use bytemuck::{Pod, Zeroable};

use crate::VOICE_CHANNEL_COUNT_MAX;

pub const SINK_TYPE_INVALID: u8 = 0;
pub const SINK_TYPE_DEVICE: u8 = 1;
pub const SINK_TYPE_CIRCULAR_BUFFER: u8 = 2;

/// Size of the type-specific trailing region inside [`SinkInParameter`].
pub const SINK_SPECIFIC_DATA_SIZE: usize = 0x120;

/// Per-frame sink parameter block.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SinkInParameter {
    pub sink_type: u8,
    pub is_used: u8,
    pub reserved1: [u8; 2],
    pub node_id: u32,
    pub reserved2: [u8; 24],
    pub specific_data: [u8; SINK_SPECIFIC_DATA_SIZE],
}

const _: () = assert!(core::mem::size_of::<SinkInParameter>() == 0x140);

impl Default for SinkInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl core::fmt::Debug for SinkInParameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SinkInParameter")
            .field("sink_type", &self.sink_type)
            .field("is_used", &self.is_used)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SinkOutStatus {
    /// Circular-buffer sinks: byte offset of the most recent write.
    pub last_written_offset: u32,
    pub reserved1: u32,
    pub reserved2: [u8; 24],
}

const _: () = assert!(core::mem::size_of::<SinkOutStatus>() == 0x20);

/// Specific data for device sinks: named output device plus channel mapping.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct DeviceSinkParameter {
    pub name: [u8; 0x100],
    pub input_count: u32,
    pub inputs: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub reserved1: [u8; 2],
    pub downmix_enabled: u8,
    pub reserved2: [u8; 3],
    pub downmix_coefficients: [f32; 4],
}

const _: () = assert!(core::mem::size_of::<DeviceSinkParameter>() == SINK_SPECIFIC_DATA_SIZE);

impl Default for DeviceSinkParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl DeviceSinkParameter {
    /// Device name as a str, up to the first NUL.
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

impl core::fmt::Debug for DeviceSinkParameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceSinkParameter")
            .field("name", &self.name_str())
            .field("input_count", &self.input_count)
            .field("downmix_enabled", &self.downmix_enabled)
            .finish_non_exhaustive()
    }
}

/// Specific data for circular-buffer sinks: a guest ring the renderer writes
/// rendered PCM16 frames into.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct CircularBufferSinkParameter {
    pub inputs: [u8; VOICE_CHANNEL_COUNT_MAX],
    pub in_use: u8,
    pub reserved: u8,
    pub address: u64,
    pub size: u32,
    pub input_count: u32,
    pub sample_count: u32,
    pub sample_format: u32,
}

const _: () = assert!(core::mem::size_of::<CircularBufferSinkParameter>() == 0x20);
const _: () = assert!(core::mem::size_of::<CircularBufferSinkParameter>() <= SINK_SPECIFIC_DATA_SIZE);
