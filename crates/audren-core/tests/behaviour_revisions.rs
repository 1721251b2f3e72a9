use std::path::PathBuf;

use audren_core::behaviour::{BehaviourContext, BASE_REVISION_MAGIC};
use serde::Deserialize;

/// Conformance vectors for the revision/feature table.
///
/// The expected values are guest-observable protocol behavior; if a gate
/// moves intentionally, update the fixture together with the table in
/// `src/behaviour.rs`.
#[test]
fn behaviour_revision_conformance_vectors() {
    let fixture_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/behaviour_revision_vectors.json");
    let json = std::fs::read_to_string(&fixture_path)
        .unwrap_or_else(|e| panic!("failed to read {fixture_path:?}: {e}"));
    let vectors: Vec<Vector> = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("failed to parse {fixture_path:?}: {e}"));
    assert!(!vectors.is_empty(), "fixture must contain at least one vector");

    for case in vectors {
        let mut ctx = BehaviourContext::new();
        ctx.set_user_revision(BASE_REVISION_MAGIC + case.revision);

        assert_eq!(
            ctx.is_adpcm_loop_context_bug_fixed(),
            case.adpcm_loop_context_bug_fixed,
            "{}: adpcm loop context bugfix",
            case.name
        );
        assert_eq!(ctx.is_splitter_supported(), case.splitter_supported, "{}: splitter", case.name);
        assert_eq!(
            ctx.is_long_size_pre_delay_supported(),
            case.long_size_pre_delay_supported,
            "{}: long size pre delay",
            case.name
        );
        assert_eq!(
            ctx.is_audio_usb_device_output_supported(),
            case.usb_device_output_supported,
            "{}: usb device output",
            case.name
        );
        assert_eq!(
            ctx.is_flush_voice_wave_buffers_supported(),
            case.flush_wave_buffers_supported,
            "{}: flush wave buffers",
            case.name
        );
        assert_eq!(ctx.is_splitter_bug_fixed(), case.splitter_bug_fixed, "{}: splitter bugfix", case.name);
        assert_eq!(
            ctx.is_elapsed_frame_count_supported(),
            case.elapsed_frame_count_supported,
            "{}: elapsed frame count",
            case.name
        );
        assert_eq!(
            ctx.is_decoding_behaviour_flag_supported(),
            case.decoding_behaviour_flag_supported,
            "{}: decoding behaviour flag",
            case.name
        );
        assert_eq!(
            ctx.is_biquad_filter_effect_state_clear_bug_fixed(),
            case.biquad_filter_state_clear_bug_fixed,
            "{}: biquad state clear bugfix",
            case.name
        );
        assert_eq!(
            ctx.is_mix_in_parameter_dirty_only_update_supported(),
            case.mix_dirty_only_update_supported,
            "{}: mix dirty-only update",
            case.name
        );
        assert_eq!(
            ctx.is_wave_buffer_version2_supported(),
            case.wave_buffer_v2_supported,
            "{}: wave buffer v2",
            case.name
        );
        assert_eq!(
            ctx.audio_renderer_processing_time_limit(),
            case.processing_time_limit,
            "{}: processing time limit",
            case.name
        );
        assert_eq!(
            ctx.command_processing_time_estimator_version(),
            case.estimator_version,
            "{}: estimator version",
            case.name
        );
        assert_eq!(
            ctx.performance_metrics_data_format(),
            case.metrics_format,
            "{}: metrics format",
            case.name
        );
    }
}

#[derive(Debug, Deserialize)]
struct Vector {
    name: String,
    revision: u32,
    adpcm_loop_context_bug_fixed: bool,
    splitter_supported: bool,
    long_size_pre_delay_supported: bool,
    usb_device_output_supported: bool,
    flush_wave_buffers_supported: bool,
    splitter_bug_fixed: bool,
    elapsed_frame_count_supported: bool,
    decoding_behaviour_flag_supported: bool,
    biquad_filter_state_clear_bug_fixed: bool,
    mix_dirty_only_update_supported: bool,
    wave_buffer_v2_supported: bool,
    processing_time_limit: f32,
    estimator_version: u32,
    metrics_format: u32,
}
