//! Splitter parameter layouts.
//!
//! The splitter region is self-sized: a header announces how many splitter
//! and destination records follow, and each record carries its own magic so
//! a desynchronized stream is detected immediately.

use bytemuck::{Pod, Zeroable};

use crate::MIX_BUFFER_COUNT_MAX;

/// `SNDH` — splitter region header magic.
pub const SPLITTER_HEADER_MAGIC: u32 = u32::from_le_bytes(*b"SNDH");
/// `SNDI` — per-splitter parameter magic.
pub const SPLITTER_IN_PARAMETER_MAGIC: u32 = u32::from_le_bytes(*b"SNDI");
/// `SNDD` — per-destination parameter magic.
pub const SPLITTER_DESTINATION_MAGIC: u32 = u32::from_le_bytes(*b"SNDD");

#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SplitterInParameterHeader {
    pub magic: u32,
    pub splitter_count: u32,
    pub splitter_destination_count: u32,
    pub reserved: [u32; 5],
}

const _: () = assert!(core::mem::size_of::<SplitterInParameterHeader>() == 0x20);

/// Followed on the wire by `destination_count` little-endian `u32`
/// destination ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SplitterInParameter {
    pub magic: u32,
    pub id: u32,
    pub sample_rate: u32,
    pub destination_count: u32,
}

const _: () = assert!(core::mem::size_of::<SplitterInParameter>() == 0x10);

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SplitterDestinationInParameter {
    pub magic: u32,
    pub id: u32,
    pub mix_volumes: [f32; MIX_BUFFER_COUNT_MAX],
    pub destination_id: u32,
    pub in_use: u8,
    pub reserved: [u8; 3],
}

const _: () = assert!(core::mem::size_of::<SplitterDestinationInParameter>() == 0x70);

impl Default for SplitterDestinationInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_match_their_ascii_tags() {
        assert_eq!(SPLITTER_HEADER_MAGIC, 0x48444E53);
        assert_eq!(SPLITTER_IN_PARAMETER_MAGIC, 0x49444E53);
        assert_eq!(SPLITTER_DESTINATION_MAGIC, 0x44444E53);
    }
}
