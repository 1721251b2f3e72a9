//! Revision decode and feature/bugfix gating.
//!
//! The guest announces a revision at session open; every subsystem asks this
//! context which wire-format version and bug-compatibility behavior to use.
//! Gates are pure functions of the stored revision and never fail.

use bitflags::bitflags;

use crate::wire::{BehaviourErrorInfoOutStatus, ErrorInfo, MAX_ERROR_INFOS};

/// `REV0` — revision numbers ride on top of this magic.
pub const BASE_REVISION_MAGIC: u32 = u32::from_le_bytes(*b"REV0");

pub const REVISION_1: u32 = 1;
/// ADPCM loop-context bugfix; splitter support.
pub const REVISION_2: u32 = 2;
/// Long-size pre-delay support.
pub const REVISION_3: u32 = 3;
/// USB device output support.
pub const REVISION_4: u32 = 4;
/// Splitter destination-count bugfix; flush-wave-buffers; elapsed frame
/// count; decoding-behaviour flags; new performance formats.
pub const REVISION_5: u32 = 5;
/// Biquad-filter effect state-clear bugfix.
pub const REVISION_6: u32 = 6;
/// Mix dirty-only updates.
pub const REVISION_7: u32 = 7;
/// Wave buffer v2.
pub const REVISION_8: u32 = 8;

/// Highest revision this server implements.
pub const PROCESS_REVISION_NUMBER: u32 = REVISION_8;
/// Wire value of the server's own revision.
pub const PROCESS_REVISION: u32 = BASE_REVISION_MAGIC + PROCESS_REVISION_NUMBER;

bitflags! {
    /// Behaviour parameter flags submitted alongside the user revision.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct BehaviourFlags: u64 {
        /// Trust any address handed to the pool mapper instead of requiring
        /// a registered memory pool.
        const MEMORY_POOL_FORCE_MAPPING = 1 << 0;
    }
}

/// Strips the revision magic off a wire revision value.
pub fn revision_number(revision: u32) -> u32 {
    revision.wrapping_sub(BASE_REVISION_MAGIC)
}

/// Static revision comparison used by subsystems holding raw wire values.
///
/// Deliberately compares unclamped revision numbers: an out-of-range user
/// revision compares high and reports "supported", matching hardware. The
/// revision-1 fallback applies to the *stored* session revision (see
/// [`BehaviourContext::effective_revision`]), not to this check.
pub fn check_feature_supported(user_revision: u32, required_revision: u32) -> bool {
    revision_number(user_revision) >= revision_number(required_revision)
}

#[derive(Debug)]
pub struct BehaviourContext {
    user_revision: u32,
    flags: BehaviourFlags,
    error_infos: [ErrorInfo; MAX_ERROR_INFOS],
    error_info_count: u32,
}

impl Default for BehaviourContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviourContext {
    pub fn new() -> Self {
        Self {
            user_revision: BASE_REVISION_MAGIC + REVISION_1,
            flags: BehaviourFlags::empty(),
            error_infos: [ErrorInfo::default(); MAX_ERROR_INFOS],
            error_info_count: 0,
        }
    }

    pub fn set_user_revision(&mut self, user_revision: u32) {
        self.user_revision = user_revision;
    }

    pub fn user_revision(&self) -> u32 {
        self.user_revision
    }

    pub fn update_flags(&mut self, raw: u64) {
        self.flags = BehaviourFlags::from_bits_truncate(raw);
    }

    pub fn is_memory_pool_force_mapping_enabled(&self) -> bool {
        self.flags.contains(BehaviourFlags::MEMORY_POOL_FORCE_MAPPING)
    }

    /// Stored revision number with the out-of-range fallback applied:
    /// revision 0 or anything above the process revision degrades to
    /// revision 1. Intentional hardware quirk, not a bug to fix.
    pub fn effective_revision(&self) -> u32 {
        let number = revision_number(self.user_revision);
        if number == 0 || number > PROCESS_REVISION_NUMBER {
            REVISION_1
        } else {
            number
        }
    }

    fn check_feature(&self, required: u32) -> bool {
        self.effective_revision() >= required
    }

    pub fn is_adpcm_loop_context_bug_fixed(&self) -> bool {
        self.check_feature(REVISION_2)
    }

    pub fn is_splitter_supported(&self) -> bool {
        self.check_feature(REVISION_2)
    }

    pub fn is_long_size_pre_delay_supported(&self) -> bool {
        self.check_feature(REVISION_3)
    }

    pub fn is_audio_usb_device_output_supported(&self) -> bool {
        self.check_feature(REVISION_4)
    }

    pub fn is_flush_voice_wave_buffers_supported(&self) -> bool {
        self.check_feature(REVISION_5)
    }

    pub fn is_splitter_bug_fixed(&self) -> bool {
        self.check_feature(REVISION_5)
    }

    pub fn is_elapsed_frame_count_supported(&self) -> bool {
        self.check_feature(REVISION_5)
    }

    pub fn is_decoding_behaviour_flag_supported(&self) -> bool {
        self.check_feature(REVISION_5)
    }

    pub fn is_biquad_filter_effect_state_clear_bug_fixed(&self) -> bool {
        self.check_feature(REVISION_6)
    }

    pub fn is_mix_in_parameter_dirty_only_update_supported(&self) -> bool {
        self.check_feature(REVISION_7)
    }

    pub fn is_wave_buffer_version2_supported(&self) -> bool {
        self.check_feature(REVISION_8)
    }

    /// Fraction of the frame interval the DSP may spend rendering.
    pub fn audio_renderer_processing_time_limit(&self) -> f32 {
        if self.check_feature(REVISION_5) {
            0.80
        } else if self.check_feature(REVISION_2) {
            0.75
        } else {
            0.70
        }
    }

    pub fn command_processing_time_estimator_version(&self) -> u32 {
        if self.check_feature(REVISION_8) {
            3
        } else if self.check_feature(REVISION_5) {
            2
        } else {
            1
        }
    }

    pub fn performance_metrics_data_format(&self) -> u32 {
        if self.check_feature(REVISION_5) {
            2
        } else {
            1
        }
    }

    /// Records one guest-visible error for this frame. Silently drops past
    /// the 10-entry cap; the guest sees at most that many per frame.
    pub fn append_error(&mut self, error: ErrorInfo) {
        let index = self.error_info_count as usize;
        if index < MAX_ERROR_INFOS {
            self.error_infos[index] = error;
        }
        self.error_info_count = self.error_info_count.saturating_add(1);
    }

    /// Drains accumulated errors into the wire out status.
    pub fn copy_error_info(&mut self) -> BehaviourErrorInfoOutStatus {
        let mut out = BehaviourErrorInfoOutStatus::default();
        out.error_info_count = self.error_info_count.min(MAX_ERROR_INFOS as u32);
        out.error_infos[..out.error_info_count as usize]
            .copy_from_slice(&self.error_infos[..out.error_info_count as usize]);
        self.clear_error_info();
        out
    }

    pub fn clear_error_info(&mut self) {
        self.error_info_count = 0;
        self.error_infos = [ErrorInfo::default(); MAX_ERROR_INFOS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultCode;

    fn context_at(revision: u32) -> BehaviourContext {
        let mut ctx = BehaviourContext::new();
        ctx.set_user_revision(BASE_REVISION_MAGIC + revision);
        ctx
    }

    #[test]
    fn check_feature_supported_uses_raw_revision_numbers() {
        let latest = BASE_REVISION_MAGIC + PROCESS_REVISION_NUMBER;
        let previous = BASE_REVISION_MAGIC + PROCESS_REVISION_NUMBER - 1;
        let out_of_range = BASE_REVISION_MAGIC + 900;

        assert!(check_feature_supported(latest, latest));
        assert!(!check_feature_supported(previous, latest));
        assert!(check_feature_supported(latest, previous));
        assert!(check_feature_supported(out_of_range, latest));
    }

    #[test]
    fn out_of_range_stored_revision_degrades_to_revision_1() {
        let ctx = context_at(900);
        assert_eq!(ctx.effective_revision(), REVISION_1);
        assert!(!ctx.is_splitter_supported());
        assert_eq!(ctx.audio_renderer_processing_time_limit(), 0.70);

        let ctx = context_at(0);
        assert_eq!(ctx.effective_revision(), REVISION_1);
    }

    #[test]
    fn revision_5_selects_new_formats_and_limits() {
        let ctx = context_at(5);
        assert!(ctx.is_splitter_bug_fixed());
        assert!(ctx.is_flush_voice_wave_buffers_supported());
        assert!(ctx.is_elapsed_frame_count_supported());
        assert!(ctx.is_decoding_behaviour_flag_supported());
        assert!(!ctx.is_biquad_filter_effect_state_clear_bug_fixed());
        assert_eq!(ctx.audio_renderer_processing_time_limit(), 0.80);
        assert_eq!(ctx.command_processing_time_estimator_version(), 2);
        assert_eq!(ctx.performance_metrics_data_format(), 2);
    }

    #[test]
    fn revision_table_matches_documented_gates() {
        for revision in 1..=8u32 {
            let ctx = context_at(revision);
            assert_eq!(ctx.is_adpcm_loop_context_bug_fixed(), revision >= 2);
            assert_eq!(ctx.is_splitter_supported(), revision >= 2);
            assert_eq!(ctx.is_long_size_pre_delay_supported(), revision >= 3);
            assert_eq!(ctx.is_audio_usb_device_output_supported(), revision >= 4);
            assert_eq!(ctx.is_splitter_bug_fixed(), revision >= 5);
            assert_eq!(ctx.is_mix_in_parameter_dirty_only_update_supported(), revision >= 7);
            assert_eq!(ctx.is_wave_buffer_version2_supported(), revision >= 8);

            let expected_limit = match revision {
                1 => 0.70,
                2..=4 => 0.75,
                _ => 0.80,
            };
            assert_eq!(ctx.audio_renderer_processing_time_limit(), expected_limit);

            let expected_estimator = match revision {
                1..=4 => 1,
                5..=7 => 2,
                _ => 3,
            };
            assert_eq!(ctx.command_processing_time_estimator_version(), expected_estimator);

            assert_eq!(ctx.performance_metrics_data_format(), if revision >= 5 { 2 } else { 1 });
        }
    }

    #[test]
    fn error_infos_cap_at_ten_entries() {
        let mut ctx = BehaviourContext::new();
        for i in 0..12u64 {
            ctx.append_error(ErrorInfo {
                error_code: ResultCode::INVALID_ADDRESS_INFO.0,
                reserved: 0,
                extra_error_info: 0x1000 + i,
            });
        }

        let out = ctx.copy_error_info();
        assert_eq!(out.error_info_count, 10);
        assert_eq!(out.error_infos[9].extra_error_info, 0x1009);

        // Drained: the next frame starts clean.
        let out = ctx.copy_error_info();
        assert_eq!(out.error_info_count, 0);
    }
}
