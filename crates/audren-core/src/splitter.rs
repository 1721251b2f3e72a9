//! Splitter graph: fan-out of one mix's output to multiple destinations.
//!
//! Destinations live in one pre-sized arena and chain through `u32` indices
//! with [`SPLITTER_NONE`] as the empty sentinel — same traversal shape as a
//! guest-described descriptor list, but without raw pointers.

use bytemuck::{Pod, Zeroable};

use crate::behaviour::BehaviourContext;
use crate::wire::splitter::{
    SplitterDestinationInParameter, SplitterInParameter, SplitterInParameterHeader,
    SPLITTER_DESTINATION_MAGIC, SPLITTER_HEADER_MAGIC, SPLITTER_IN_PARAMETER_MAGIC,
};
use crate::wire::read_wire;
use crate::{MIX_BUFFER_COUNT_MAX, UNUSED_ID};

/// Empty-chain sentinel index.
pub const SPLITTER_NONE: u32 = u32::MAX;

/// Server-side splitter record. The 0x20-byte layout is part of the work
/// buffer ABI and pinned accordingly.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SplitterState {
    pub sample_rate: u32,
    pub id: u32,
    pub destination_count: u32,
    pub has_new_connection: u8,
    reserved1: [u8; 3],
    pub destination_head: u32,
    reserved2: [u32; 3],
}

const _: () = assert!(core::mem::size_of::<SplitterState>() == 0x20);

impl SplitterState {
    fn new(id: u32) -> Self {
        Self {
            sample_rate: 0,
            id,
            destination_count: 0,
            has_new_connection: 0,
            reserved1: [0; 3],
            destination_head: SPLITTER_NONE,
            reserved2: [0; 3],
        }
    }

    pub fn has_destinations(&self) -> bool {
        self.destination_head != SPLITTER_NONE
    }
}

/// One send destination: a target mix plus per-buffer mix volumes.
#[derive(Debug, Clone, Copy)]
pub struct SplitterDestination {
    pub id: u32,
    pub destination_id: u32,
    pub mix_volumes: [f32; MIX_BUFFER_COUNT_MAX],
    pub next: u32,
    pub is_used: bool,
}

impl SplitterDestination {
    fn new(id: u32) -> Self {
        Self {
            id,
            destination_id: UNUSED_ID,
            mix_volumes: [0.0; MIX_BUFFER_COUNT_MAX],
            next: SPLITTER_NONE,
            is_used: false,
        }
    }

    fn update(&mut self, parameter: &SplitterDestinationInParameter) {
        self.destination_id = parameter.destination_id;
        self.mix_volumes = parameter.mix_volumes;
        self.is_used = parameter.in_use != 0;
    }
}

#[derive(Debug, Default)]
pub struct SplitterContext {
    splitters: Vec<SplitterState>,
    destinations: Vec<SplitterDestination>,
}

impl SplitterContext {
    pub fn new(splitter_count: usize, destination_count: usize) -> Self {
        Self {
            splitters: (0..splitter_count as u32).map(SplitterState::new).collect(),
            destinations: (0..destination_count as u32)
                .map(SplitterDestination::new)
                .collect(),
        }
    }

    pub fn is_used(&self) -> bool {
        !self.splitters.is_empty()
    }

    pub fn splitter_count(&self) -> usize {
        self.splitters.len()
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn splitter(&self, id: u32) -> Option<&SplitterState> {
        self.splitters.get(id as usize)
    }

    pub fn destination(&self, index: u32) -> Option<&SplitterDestination> {
        self.destinations.get(index as usize)
    }

    /// Iterates the destination chain of one splitter.
    pub fn destinations_of(&self, splitter_id: u32) -> DestinationIter<'_> {
        let head = self
            .splitter(splitter_id)
            .map(|s| s.destination_head)
            .unwrap_or(SPLITTER_NONE);
        DestinationIter {
            destinations: &self.destinations,
            next: head,
        }
    }

    /// Consumed after command generation so the next frame only sees fresh
    /// connection changes.
    pub fn clear_all_new_connection_flags(&mut self) {
        for splitter in &mut self.splitters {
            splitter.has_new_connection = 0;
        }
    }

    /// Parses one frame's splitter region.
    ///
    /// Returns `(true, consumed)` with the 0x10-aligned consumed byte count
    /// on success. A bad header magic yields `(false, 0)` and the caller
    /// must stop processing splitter input for the frame.
    pub fn update(&mut self, behaviour: &BehaviourContext, input: &[u8]) -> (bool, usize) {
        if !self.is_used() {
            return (true, 0);
        }

        let Some(header) = read_wire::<SplitterInParameterHeader>(input) else {
            return (false, 0);
        };
        if header.magic != SPLITTER_HEADER_MAGIC {
            log::debug!("splitter header magic mismatch: 0x{:08x}", header.magic);
            return (false, 0);
        }

        let mut offset = core::mem::size_of::<SplitterInParameterHeader>();

        for _ in 0..header.splitter_count {
            let Some(parameter) = read_wire::<SplitterInParameter>(&input[offset.min(input.len())..])
            else {
                break;
            };
            if parameter.magic != SPLITTER_IN_PARAMETER_MAGIC {
                break;
            }
            offset += core::mem::size_of::<SplitterInParameter>();

            let id_count = parameter.destination_count as usize;
            let ids_size = id_count * core::mem::size_of::<u32>();
            if input.len() < offset + ids_size {
                break;
            }
            let ids: Vec<u32> = input[offset..offset + ids_size]
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            offset += ids_size;

            self.update_splitter(behaviour, &parameter, &ids);
        }

        for _ in 0..header.splitter_destination_count {
            let Some(parameter) =
                read_wire::<SplitterDestinationInParameter>(&input[offset.min(input.len())..])
            else {
                break;
            };
            if parameter.magic != SPLITTER_DESTINATION_MAGIC {
                break;
            }
            offset += core::mem::size_of::<SplitterDestinationInParameter>();

            if let Some(destination) = self.destinations.get_mut(parameter.id as usize) {
                destination.update(&parameter);
            }
        }

        (true, align_up(offset, 0x10))
    }

    fn update_splitter(
        &mut self,
        behaviour: &BehaviourContext,
        parameter: &SplitterInParameter,
        destination_ids: &[u32],
    ) {
        let splitter_count = self.splitters.len();
        let destination_capacity = self.destinations.len();
        let Some(splitter) = self.splitters.get_mut(parameter.id as usize) else {
            return;
        };

        // Tear down the previous chain.
        let mut cursor = splitter.destination_head;
        splitter.destination_head = SPLITTER_NONE;
        splitter.destination_count = 0;
        while cursor != SPLITTER_NONE {
            let destination = &mut self.destinations[cursor as usize];
            cursor = destination.next;
            destination.next = SPLITTER_NONE;
        }

        let splitter = &mut self.splitters[parameter.id as usize];
        splitter.sample_rate = parameter.sample_rate;

        // Pre-bugfix guests undercount destinations in the header; clamp to
        // the arena share instead of trusting them. Both paths are permanent
        // (revision-gated), not a cleanup candidate.
        let requested = parameter.destination_count as usize;
        let count = if behaviour.is_splitter_bug_fixed() {
            requested.min(destination_ids.len())
        } else {
            requested
                .min(destination_ids.len())
                .min(destination_capacity / splitter_count.max(1))
        };

        let mut tail = SPLITTER_NONE;
        for &destination_id in &destination_ids[..count] {
            if destination_id as usize >= destination_capacity {
                continue;
            }
            if tail == SPLITTER_NONE {
                splitter.destination_head = destination_id;
            } else {
                self.destinations[tail as usize].next = destination_id;
            }
            self.destinations[destination_id as usize].next = SPLITTER_NONE;
            tail = destination_id;
            splitter.destination_count += 1;
        }

        // Mismatched ids are tolerated, not fatal; only a self-describing
        // update counts as a fresh connection.
        if parameter.id == splitter.id {
            splitter.has_new_connection = 1;
        }
    }
}

pub struct DestinationIter<'a> {
    destinations: &'a [SplitterDestination],
    next: u32,
}

impl<'a> Iterator for DestinationIter<'a> {
    type Item = &'a SplitterDestination;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == SPLITTER_NONE {
            return None;
        }
        let destination = self.destinations.get(self.next as usize)?;
        self.next = destination.next;
        Some(destination)
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
