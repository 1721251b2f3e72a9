//! Mix bus server state.
//!
//! Mixes form a tree rooted at the final mix (id 0). The command generator
//! needs submixes emitted before anything that consumes them, so the context
//! keeps a processing order sorted by distance from the final mix.

use crate::behaviour::BehaviourContext;
use crate::wire::mix::{MixInParameter, MixInParameterDirtyOnlyUpdateHeader};
use crate::wire::read_wire;
use crate::{FINAL_MIX_ID, MIX_BUFFER_COUNT_MAX, UNUSED_ID};

#[derive(Debug, Clone)]
pub struct MixState {
    pub in_use: bool,
    pub mix_id: u32,
    pub node_id: u32,
    pub volume: f32,
    pub sample_rate: u32,
    pub buffer_count: u32,
    /// First sample buffer this mix owns; assigned by the context after each
    /// update pass.
    pub buffer_offset: u32,
    pub effect_count: u32,
    pub mix_buffer_volumes: [f32; MIX_BUFFER_COUNT_MAX * MIX_BUFFER_COUNT_MAX],
    pub destination_mix_id: u32,
    pub destination_splitter_id: u32,
    pub distance_from_final_mix: u32,
}

impl Default for MixState {
    fn default() -> Self {
        Self {
            in_use: false,
            mix_id: UNUSED_ID,
            node_id: 0,
            volume: 0.0,
            sample_rate: 0,
            buffer_count: 0,
            buffer_offset: 0,
            effect_count: 0,
            mix_buffer_volumes: [0.0; MIX_BUFFER_COUNT_MAX * MIX_BUFFER_COUNT_MAX],
            destination_mix_id: UNUSED_ID,
            destination_splitter_id: UNUSED_ID,
            distance_from_final_mix: u32::MAX,
        }
    }
}

impl MixState {
    pub fn is_final(&self) -> bool {
        self.mix_id == FINAL_MIX_ID
    }

    /// Volume applied when summing this mix's buffer `input` into the
    /// destination's buffer `output`.
    pub fn destination_volume(&self, input: u32, output: u32) -> f32 {
        self.mix_buffer_volumes
            [(input as usize % MIX_BUFFER_COUNT_MAX) * MIX_BUFFER_COUNT_MAX
                + output as usize % MIX_BUFFER_COUNT_MAX]
    }

    fn apply(&mut self, parameter: &MixInParameter) {
        self.in_use = parameter.in_use != 0;
        self.mix_id = parameter.mix_id;
        self.node_id = parameter.node_id;
        self.volume = parameter.volume;
        self.sample_rate = parameter.sample_rate;
        self.buffer_count = parameter.buffer_count.min(MIX_BUFFER_COUNT_MAX as u32);
        self.effect_count = parameter.effect_count;
        self.mix_buffer_volumes = parameter.mix_buffer_volumes;
        self.destination_mix_id = parameter.destination_mix_id;
        self.destination_splitter_id = parameter.destination_splitter_id;
    }
}

#[derive(Debug)]
pub struct MixContext {
    mixes: Vec<MixState>,
    /// Mix indices ordered deepest-first (largest distance from final mix).
    sorted_order: Vec<u32>,
}

impl MixContext {
    /// `count` includes the final mix, which always occupies slot 0.
    pub fn new(count: usize) -> Self {
        let mut mixes = vec![MixState::default(); count.max(1)];
        mixes[0].mix_id = FINAL_MIX_ID;
        mixes[0].in_use = true;
        mixes[0].distance_from_final_mix = 0;
        Self {
            mixes,
            sorted_order: (0..count.max(1) as u32).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.mixes.len()
    }

    pub fn state(&self, mix_id: u32) -> Option<&MixState> {
        self.mixes.get(mix_id as usize)
    }

    pub fn state_mut(&mut self, mix_id: u32) -> Option<&mut MixState> {
        self.mixes.get_mut(mix_id as usize)
    }

    pub fn final_mix(&self) -> &MixState {
        &self.mixes[FINAL_MIX_ID as usize]
    }

    /// In-use mixes, deepest submixes first, final mix last.
    pub fn sorted_in_use(&self) -> impl Iterator<Item = &MixState> {
        self.sorted_order
            .iter()
            .filter_map(|&index| self.mixes.get(index as usize))
            .filter(|mix| mix.in_use)
    }

    /// Applies one frame's mixes region. Two wire shapes exist: the full
    /// array (every slot, every frame) and the dirty-only form behind
    /// revision 7. Returns consumed bytes, or `None` on a malformed region.
    pub fn update(&mut self, behaviour: &BehaviourContext, input: &[u8]) -> Option<usize> {
        let mut consumed = 0usize;

        if behaviour.is_mix_in_parameter_dirty_only_update_supported() {
            let header = read_wire::<MixInParameterDirtyOnlyUpdateHeader>(input)?;
            consumed += core::mem::size_of::<MixInParameterDirtyOnlyUpdateHeader>();

            for _ in 0..header.mix_count {
                let parameter = read_wire::<MixInParameter>(&input[consumed.min(input.len())..])?;
                consumed += core::mem::size_of::<MixInParameter>();
                self.apply_parameter(&parameter);
            }
        } else {
            for _ in 0..self.mixes.len() {
                let parameter = read_wire::<MixInParameter>(&input[consumed.min(input.len())..])?;
                consumed += core::mem::size_of::<MixInParameter>();
                if parameter.is_dirty != 0 {
                    self.apply_parameter(&parameter);
                }
            }
        }

        self.assign_buffer_offsets();
        self.sort_by_distance();
        Some(consumed)
    }

    fn apply_parameter(&mut self, parameter: &MixInParameter) {
        let Some(mix) = self.mixes.get_mut(parameter.mix_id as usize) else {
            log::debug!("mix update rejected: id {} out of range", parameter.mix_id);
            return;
        };
        mix.apply(parameter);
        // The final mix slot stays alive regardless of what the guest says.
        if parameter.mix_id == FINAL_MIX_ID {
            mix.in_use = true;
        }
    }

    fn assign_buffer_offsets(&mut self) {
        let mut offset = 0u32;
        for mix in &mut self.mixes {
            if mix.in_use {
                mix.buffer_offset = offset;
                offset += mix.buffer_count;
            }
        }
    }

    /// Total sample buffers claimed by in-use mixes.
    pub fn total_buffer_count(&self) -> u32 {
        self.mixes
            .iter()
            .filter(|mix| mix.in_use)
            .map(|mix| mix.buffer_count)
            .sum()
    }

    fn sort_by_distance(&mut self) {
        for index in 0..self.mixes.len() {
            let distance = self.compute_distance(index as u32);
            self.mixes[index].distance_from_final_mix = distance;
        }

        self.sorted_order = (0..self.mixes.len() as u32).collect();
        self.sorted_order.sort_by(|&a, &b| {
            let da = self.mixes[a as usize].distance_from_final_mix;
            let db = self.mixes[b as usize].distance_from_final_mix;
            db.cmp(&da).then(a.cmp(&b))
        });
    }

    fn compute_distance(&self, mix_id: u32) -> u32 {
        let mut distance = 0u32;
        let mut cursor = mix_id;
        // Bounded walk: a destination cycle would otherwise hang the frame.
        for _ in 0..self.mixes.len() {
            let Some(mix) = self.mixes.get(cursor as usize) else {
                return u32::MAX;
            };
            if !mix.in_use {
                return u32::MAX;
            }
            if cursor == FINAL_MIX_ID {
                return distance;
            }
            if mix.destination_mix_id == UNUSED_ID {
                return u32::MAX;
            }
            cursor = mix.destination_mix_id;
            distance += 1;
        }
        u32::MAX
    }
}
