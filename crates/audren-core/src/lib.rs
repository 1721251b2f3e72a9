//! Audio renderer server core.
//!
//! Emulates a game console's fixed-topology audio DSP. Each frame the guest
//! submits a parameter blob; [`system::AudioRenderSystem::update`] validates
//! and applies it to the voice/mix/effect/sink/splitter/memory-pool state,
//! builds a command list in data-dependency order, executes it against guest
//! memory, and writes status + performance telemetry back.
//!
//! The guest-facing IPC layer and the physical audio backend stay outside;
//! they are reached through `audren_mem::GuestMemory`, the
//! [`command::RenderDevice`] seam and raw byte buffers in a fixed binary
//! layout (see [`wire`]).

pub mod behaviour;
pub mod command;
pub mod effect;
pub mod error;
pub mod mix;
pub mod perf;
pub mod pool;
pub mod sink;
pub mod splitter;
pub mod state_updater;
pub mod system;
pub mod tick;
pub mod voice;
pub mod wire;

/// Output sample rate of the DSP, in Hz.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Samples rendered per 5 ms frame at [`TARGET_SAMPLE_RATE`].
pub const TARGET_SAMPLE_COUNT: u32 = 240;

/// Upper bound on mix buffers addressable by one renderer session.
pub const MIX_BUFFER_COUNT_MAX: usize = 24;

/// Channel counts a voice may legally request.
pub const VALID_CHANNEL_COUNTS: [u32; 4] = [1, 2, 4, 6];

/// Channels a single voice may span.
pub const VOICE_CHANNEL_COUNT_MAX: usize = 6;

/// Wave buffers queueable per voice.
pub const WAVE_BUFFER_COUNT_MAX: usize = 4;

/// Biquad filter stages per voice.
pub const VOICE_BIQUAD_FILTER_COUNT: usize = 2;

/// Sentinel for "no mix / no splitter / no node" id fields.
pub const UNUSED_ID: u32 = u32::MAX;

/// The final mix always occupies id 0.
pub const FINAL_MIX_ID: u32 = 0;
