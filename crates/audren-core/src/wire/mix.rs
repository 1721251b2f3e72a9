//! Mix bus parameter layouts.

use bytemuck::{Pod, Zeroable};

use crate::MIX_BUFFER_COUNT_MAX;

/// Per-frame mix parameter block.
///
/// The volume matrix maps each of this mix's buffers onto each buffer of the
/// destination mix, hence the 24x24 block that dominates the layout.
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct MixInParameter {
    pub volume: f32,
    pub sample_rate: u32,
    pub buffer_count: u32,
    pub in_use: u8,
    pub is_dirty: u8,
    pub reserved1: [u8; 2],
    pub mix_id: u32,
    pub effect_count: u32,
    pub node_id: u32,
    pub reserved2: [u32; 2],
    pub mix_buffer_volumes: [f32; MIX_BUFFER_COUNT_MAX * MIX_BUFFER_COUNT_MAX],
    pub destination_mix_id: u32,
    pub destination_splitter_id: u32,
    pub reserved3: u32,
}

const _: () = assert!(core::mem::size_of::<MixInParameter>() == 0x930);

impl Default for MixInParameter {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl core::fmt::Debug for MixInParameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MixInParameter")
            .field("mix_id", &self.mix_id)
            .field("in_use", &self.in_use)
            .field("buffer_count", &self.buffer_count)
            .field("destination_mix_id", &self.destination_mix_id)
            .field("destination_splitter_id", &self.destination_splitter_id)
            .finish_non_exhaustive()
    }
}

/// Header prefixed to the mixes region when the dirty-only update path is
/// active (revision 7+): only `mix_count` dirty entries follow.
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct MixInParameterDirtyOnlyUpdateHeader {
    pub mix_count: u32,
    pub reserved: [u32; 7],
}

const _: () = assert!(core::mem::size_of::<MixInParameterDirtyOnlyUpdateHeader>() == 0x20);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{read_wire, write_wire};

    #[test]
    fn mix_parameter_volume_matrix_is_at_fixed_offset() {
        let mut param = MixInParameter::default();
        param.mix_buffer_volumes[0] = 1.0;
        param.mix_buffer_volumes[575] = 0.5;
        param.destination_mix_id = 9;

        let mut buf = [0u8; 0x930];
        assert_eq!(write_wire(&mut buf, &param), Some(0x930));
        // Matrix starts at 0x24; last element ends at 0x924.
        assert_eq!(&buf[0x24..0x28], &1.0f32.to_le_bytes());
        assert_eq!(&buf[0x920..0x924], &0.5f32.to_le_bytes());
        assert_eq!(&buf[0x924..0x928], &9u32.to_le_bytes());

        let back: MixInParameter = read_wire(&buf).unwrap();
        assert_eq!(back.destination_mix_id, 9);
        assert_eq!(back.mix_buffer_volumes[575], 0.5);
    }
}
