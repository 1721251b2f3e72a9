//! Performance telemetry: per-node timing records in versioned layouts.
//!
//! The record generation (V1/V2) is picked once at construction from the
//! behaviour context; field offsets are precomputed there so the per-command
//! hot path does no version dispatch.

use std::collections::VecDeque;

use crate::error::RendererError;
use crate::wire::perf::{
    PerformanceDetailVersion1, PerformanceDetailVersion2, PerformanceEntryVersion1,
    PerformanceEntryVersion2, PerformanceFrameHeaderVersion1, PerformanceFrameHeaderVersion2,
};
use crate::wire::write_wire;
use crate::UNUSED_ID;

/// Details recordable per frame on top of the per-node entries.
pub const MAX_FRAME_DETAIL_COUNT: usize = 100;

/// Precomputed sizes for the active record generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    version: u32,
    header_size: usize,
    entry_size: usize,
    detail_size: usize,
}

impl Layout {
    fn for_version(version: u32) -> Result<Self, RendererError> {
        match version {
            1 => Ok(Self {
                version: 1,
                header_size: core::mem::size_of::<PerformanceFrameHeaderVersion1>(),
                entry_size: core::mem::size_of::<PerformanceEntryVersion1>(),
                detail_size: core::mem::size_of::<PerformanceDetailVersion1>(),
            }),
            2 => Ok(Self {
                version: 2,
                header_size: core::mem::size_of::<PerformanceFrameHeaderVersion2>(),
                entry_size: core::mem::size_of::<PerformanceEntryVersion2>(),
                detail_size: core::mem::size_of::<PerformanceDetailVersion2>(),
            }),
            other => Err(RendererError::UnknownPerformanceFormat(other)),
        }
    }
}

/// Byte offsets of one allocated record's timestamp fields.
///
/// Both generations place `start_time` at +0x4 and `processing_time` at
/// +0x8; the slot still carries absolute offsets so the processor never
/// recomputes layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfSlot {
    start_time_offset: usize,
    processing_time_offset: usize,
}

#[derive(Debug)]
pub struct PerformanceManager {
    layout: Layout,
    frame: Vec<u8>,
    entry_capacity: usize,
    entry_count: u32,
    detail_count: u32,
    target_node_id: u32,
    frame_index: u32,
    history: VecDeque<Vec<u8>>,
    history_capacity: usize,
}

impl PerformanceManager {
    /// Fails only on an unrecognized format version; that is a programming
    /// or protocol-table invariant violation, not a runtime condition.
    pub fn new(
        version: u32,
        entry_capacity: usize,
        history_capacity: usize,
    ) -> Result<Self, RendererError> {
        let layout = Layout::for_version(version)?;
        let frame_size = layout.header_size
            + entry_capacity * layout.entry_size
            + MAX_FRAME_DETAIL_COUNT * layout.detail_size;
        Ok(Self {
            layout,
            frame: vec![0; frame_size],
            entry_capacity,
            entry_count: 0,
            detail_count: 0,
            target_node_id: UNUSED_ID,
            frame_index: 0,
            history: VecDeque::new(),
            history_capacity: history_capacity.max(1),
        })
    }

    pub fn version(&self) -> u32 {
        self.layout.version
    }

    /// Scopes detail profiling to one node id ([`UNUSED_ID`] = all nodes).
    pub fn set_target_node_id(&mut self, node_id: u32) {
        self.target_node_id = node_id;
    }

    /// Allocates the next per-node entry for this frame.
    ///
    /// Returns `None` when the frame's entry table is full; callers skip
    /// their timestamp writes in that case.
    pub fn get_next_entry(&mut self, node_id: u32, entry_type: u8) -> Option<PerfSlot> {
        if self.entry_count as usize >= self.entry_capacity {
            return None;
        }
        let offset = self.layout.header_size + self.entry_count as usize * self.layout.entry_size;
        self.entry_count += 1;

        match self.layout.version {
            1 => {
                let entry = PerformanceEntryVersion1 {
                    node_id,
                    entry_type,
                    ..Default::default()
                };
                let _ = write_wire(&mut self.frame[offset..], &entry);
            }
            _ => {
                let entry = PerformanceEntryVersion2 {
                    node_id,
                    entry_type,
                    ..Default::default()
                };
                let _ = write_wire(&mut self.frame[offset..], &entry);
            }
        }

        Some(PerfSlot {
            start_time_offset: offset + 0x4,
            processing_time_offset: offset + 0x8,
        })
    }

    /// Allocates a detail record, only while the target node is profiled.
    pub fn get_next_detail(&mut self, node_id: u32, entry_type: u8, detail_type: u8) -> Option<PerfSlot> {
        if self.target_node_id != UNUSED_ID && self.target_node_id != node_id {
            return None;
        }
        if self.detail_count as usize >= MAX_FRAME_DETAIL_COUNT {
            return None;
        }
        let offset = self.layout.header_size
            + self.entry_capacity * self.layout.entry_size
            + self.detail_count as usize * self.layout.detail_size;
        self.detail_count += 1;

        match self.layout.version {
            1 => {
                let detail = PerformanceDetailVersion1 {
                    node_id,
                    detail_type,
                    entry_type,
                    ..Default::default()
                };
                let _ = write_wire(&mut self.frame[offset..], &detail);
            }
            _ => {
                let detail = PerformanceDetailVersion2 {
                    node_id,
                    detail_type,
                    entry_type,
                    ..Default::default()
                };
                let _ = write_wire(&mut self.frame[offset..], &detail);
            }
        }

        Some(PerfSlot {
            start_time_offset: offset + 0x4,
            processing_time_offset: offset + 0x8,
        })
    }

    pub fn write_start_time(&mut self, slot: PerfSlot, ticks: u32) {
        self.frame[slot.start_time_offset..slot.start_time_offset + 4]
            .copy_from_slice(&ticks.to_le_bytes());
    }

    pub fn write_processing_time(&mut self, slot: PerfSlot, ticks: u32) {
        self.frame[slot.processing_time_offset..slot.processing_time_offset + 4]
            .copy_from_slice(&ticks.to_le_bytes());
    }

    /// Finalizes the current frame header and advances the ring.
    pub fn tap_frame(&mut self, dsp_running_behind: bool, voice_drop_count: u32, start_ticks: u64) {
        let total_processing_time: u32 = self.total_processing_time();

        match self.layout.version {
            1 => {
                let header = PerformanceFrameHeaderVersion1 {
                    total_processing_time,
                    voice_drop_count,
                    start_rendering_ticks: start_ticks,
                    entry_count: self.entry_count,
                    reserved: 0,
                };
                let _ = write_wire(&mut self.frame, &header);
            }
            _ => {
                let header = PerformanceFrameHeaderVersion2 {
                    total_processing_time,
                    voice_drop_count,
                    start_rendering_ticks: start_ticks,
                    frame_index: self.frame_index,
                    is_dsp_running_behind: u8::from(dsp_running_behind),
                    entry_count: self.entry_count,
                    ..Default::default()
                };
                let _ = write_wire(&mut self.frame, &header);
            }
        }

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(self.frame.clone());

        self.frame.fill(0);
        self.entry_count = 0;
        self.detail_count = 0;
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    fn total_processing_time(&self) -> u32 {
        // Sum of per-entry processing times recorded so far this frame.
        let mut total = 0u32;
        for index in 0..self.entry_count as usize {
            let offset = self.layout.header_size + index * self.layout.entry_size + 0x8;
            let bytes = [
                self.frame[offset],
                self.frame[offset + 1],
                self.frame[offset + 2],
                self.frame[offset + 3],
            ];
            total = total.saturating_add(u32::from_le_bytes(bytes));
        }
        total
    }

    /// Copies completed frame records into a guest buffer, whole frames
    /// only, never overrunning `out`. Returns the byte count copied.
    pub fn copy_histories(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0usize;
        while let Some(frame) = self.history.front() {
            if written + frame.len() > out.len() {
                break;
            }
            out[written..written + frame.len()].copy_from_slice(frame);
            written += frame.len();
            self.history.pop_front();
        }
        written
    }

    pub fn frame_size(&self) -> usize {
        self.frame.len()
    }
}
