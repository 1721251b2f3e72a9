//! Renderer system: owns every subsystem and runs the per-frame cycle.

use audren_mem::GuestMemory;

use crate::behaviour::BehaviourContext;
use crate::command::estimator::CommandTimeEstimator;
use crate::command::generator::{CommandGenerator, GeneratedVoiceRange};
use crate::command::processor::{
    CircularSinkDspState, CommandProcessor, EffectDspState, ProcessContext,
};
use crate::command::{CommandList, RenderDevice};
use crate::effect::EffectState;
use crate::error::{RendererError, UpdateError};
use crate::mix::MixContext;
use crate::perf::PerformanceManager;
use crate::pool::{MemoryPoolLocation, MemoryPoolState, PoolMapper};
use crate::sink::{SinkParameters, SinkState};
use crate::splitter::SplitterContext;
use crate::state_updater::StateUpdater;
use crate::tick::{TickSource, TICKS_PER_SECOND};
use crate::voice::{VoiceChannelResource, VoiceDspState, VoiceState};
use crate::wire::AudioRendererConfiguration;
use crate::{MIX_BUFFER_COUNT_MAX, VOICE_CHANNEL_COUNT_MAX};

/// Decoded session configuration.
#[derive(Debug, Clone, Copy)]
pub struct RendererConfig {
    pub sample_rate: u32,
    pub sample_count: u32,
    pub mix_buffer_count: u32,
    pub sub_mix_count: u32,
    pub voice_count: u32,
    pub sink_count: u32,
    pub effect_count: u32,
    pub performance_metric_frames_count: u32,
    pub voice_drop_enabled: bool,
    pub splitter_count: u32,
    pub splitter_destination_count: u32,
    pub revision: u32,
}

impl RendererConfig {
    pub fn from_wire(raw: &AudioRendererConfiguration) -> Self {
        Self {
            sample_rate: raw.sample_rate,
            sample_count: raw.sample_count,
            mix_buffer_count: raw.mix_buffer_count.min(MIX_BUFFER_COUNT_MAX as u32),
            sub_mix_count: raw.sub_mix_count,
            voice_count: raw.voice_count,
            sink_count: raw.sink_count,
            effect_count: raw.effect_count,
            performance_metric_frames_count: raw.performance_metric_frames_count,
            voice_drop_enabled: raw.voice_drop_enabled != 0,
            splitter_count: raw.splitter_count,
            splitter_destination_count: raw.splitter_destination_count,
            revision: raw.revision,
        }
    }
}

/// Work-buffer footprint implied by a configuration, in bytes.
///
/// Every fixed-capacity server array is charged here; construction rejects
/// buffers smaller than this.
pub fn calc_work_buffer_size(config: &RendererConfig) -> u64 {
    fn align(value: u64) -> u64 {
        (value + 0x3F) & !0x3F
    }

    let voice_count = u64::from(config.voice_count);
    let mix_count = u64::from(config.sub_mix_count) + 1;
    let effect_count = u64::from(config.effect_count);
    let sink_count = u64::from(config.sink_count);
    let pool_count = voice_count + effect_count + sink_count + 1;

    let mut size = 0u64;
    size += align(pool_count * core::mem::size_of::<MemoryPoolState>() as u64);
    size += align(voice_count * core::mem::size_of::<VoiceState>() as u64);
    size += align(
        voice_count
            * VOICE_CHANNEL_COUNT_MAX as u64
            * core::mem::size_of::<VoiceDspState>() as u64,
    );
    size += align(voice_count * core::mem::size_of::<VoiceChannelResource>() as u64);
    size += align(mix_count * core::mem::size_of::<crate::mix::MixState>() as u64);
    size += align(effect_count * core::mem::size_of::<EffectState>() as u64);
    size += align(sink_count * core::mem::size_of::<SinkState>() as u64);
    size += align(u64::from(config.splitter_count) * 0x20);
    size += align(
        u64::from(config.splitter_destination_count)
            * core::mem::size_of::<crate::splitter::SplitterDestination>() as u64,
    );
    // Sample buffer arena: mix buffers plus voice scratch channels.
    size += align(
        (u64::from(config.mix_buffer_count) + VOICE_CHANNEL_COUNT_MAX as u64)
            * u64::from(config.sample_count)
            * 4,
    );
    size
}

pub struct AudioRenderSystem {
    config: RendererConfig,
    behaviour: BehaviourContext,
    pools: Vec<MemoryPoolState>,
    voices: Vec<VoiceState>,
    voice_dsp_states: Vec<VoiceDspState>,
    channel_resources: Vec<VoiceChannelResource>,
    mixes: MixContext,
    effects: Vec<EffectState>,
    effect_dsp_states: Vec<EffectDspState>,
    sinks: Vec<SinkState>,
    sink_dsp_states: Vec<CircularSinkDspState>,
    splitter: SplitterContext,
    perf: Option<PerformanceManager>,
    processor: CommandProcessor,
    tick: Box<dyn TickSource>,
    elapsed_frame_count: u64,
    last_voice_drop_count: u32,
}

impl core::fmt::Debug for AudioRenderSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioRenderSystem")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .field("voices", &self.voices.len())
            .field("effects", &self.effects.len())
            .field("sinks", &self.sinks.len())
            .field("elapsed_frame_count", &self.elapsed_frame_count)
            .field("last_voice_drop_count", &self.last_voice_drop_count)
            .finish_non_exhaustive()
    }
}

impl AudioRenderSystem {
    pub fn new(
        raw_config: &AudioRendererConfiguration,
        work_buffer_address: u64,
        work_buffer_size: u64,
        tick: Box<dyn TickSource>,
    ) -> Result<Self, RendererError> {
        let config = RendererConfig::from_wire(raw_config);

        if config.sample_rate != 32_000 && config.sample_rate != 48_000 {
            return Err(RendererError::UnsupportedSampleRate(config.sample_rate));
        }
        let required = calc_work_buffer_size(&config);
        if work_buffer_size < required {
            return Err(RendererError::WorkBufferTooSmall {
                provided: work_buffer_size,
                required,
            });
        }

        let mut behaviour = BehaviourContext::new();
        behaviour.set_user_revision(config.revision);

        let voice_count = config.voice_count as usize;
        let mix_count = config.sub_mix_count as usize + 1;
        let effect_count = config.effect_count as usize;
        let sink_count = config.sink_count as usize;
        let pool_count = voice_count + effect_count + sink_count + 1;

        // Slot 0: the DSP-side system pool backing the work buffer itself.
        let mut pools = Vec::with_capacity(pool_count);
        pools.push(MemoryPoolState::new(MemoryPoolLocation::Dsp));
        for _ in 1..pool_count {
            pools.push(MemoryPoolState::new(MemoryPoolLocation::Cpu));
        }
        let system_mapper = PoolMapper::new(true);
        system_mapper.initialize_system_pool(&mut pools[0], work_buffer_address, work_buffer_size);

        let perf = if config.performance_metric_frames_count > 0 {
            let entry_capacity = voice_count + mix_count + sink_count;
            Some(PerformanceManager::new(
                behaviour.performance_metrics_data_format(),
                entry_capacity,
                config.performance_metric_frames_count as usize,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            behaviour,
            pools,
            voices: vec![VoiceState::default(); voice_count],
            voice_dsp_states: vec![
                VoiceDspState::default();
                voice_count * VOICE_CHANNEL_COUNT_MAX
            ],
            channel_resources: vec![VoiceChannelResource::default(); voice_count],
            mixes: MixContext::new(mix_count),
            effects: vec![EffectState::default(); effect_count],
            effect_dsp_states: vec![EffectDspState::default(); effect_count],
            sinks: vec![SinkState::default(); sink_count],
            sink_dsp_states: vec![CircularSinkDspState::default(); sink_count],
            splitter: SplitterContext::new(
                config.splitter_count as usize,
                config.splitter_destination_count as usize,
            ),
            perf,
            processor: CommandProcessor::new(),
            tick,
            elapsed_frame_count: 0,
            last_voice_drop_count: 0,
        })
    }

    pub fn behaviour(&self) -> &BehaviourContext {
        &self.behaviour
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn elapsed_frame_count(&self) -> u64 {
        self.elapsed_frame_count
    }

    /// Ticks one frame may spend rendering before the DSP falls behind.
    fn frame_budget_ticks(&self) -> u64 {
        let frame_ticks = u64::from(self.config.sample_count) * TICKS_PER_SECOND
            / u64::from(self.config.sample_rate);
        let limit = self.behaviour.audio_renderer_processing_time_limit();
        (frame_ticks as f64 * f64::from(limit)) as u64
    }

    /// One full renderer cycle: apply the guest's parameter blob, build and
    /// execute the command list, fill the out-status and performance
    /// buffers.
    pub fn update(
        &mut self,
        memory: &mut dyn GuestMemory,
        device: &mut dyn RenderDevice,
        output: &mut [u8],
        input: &[u8],
        performance_output: &mut [u8],
    ) -> Result<(), UpdateError> {
        let mut updater = StateUpdater::new(input, output)?;

        updater.update_behaviour(&mut self.behaviour)?;
        let mapper = PoolMapper::new(self.behaviour.is_memory_pool_force_mapping_enabled());

        updater.update_memory_pools(&mapper, &mut self.pools)?;
        updater.update_voice_channel_resources(&mut self.channel_resources)?;
        updater.update_voices(
            &mut self.behaviour,
            &mut self.voices,
            &mut self.voice_dsp_states,
            &mapper,
            &self.pools,
        )?;
        updater.update_effects(&mut self.behaviour, &mut self.effects, &mapper, &self.pools)?;

        // A corrupt splitter region cannot be resynchronized; skip the rest
        // of this frame's input but keep rendering with the prior state.
        let mut input_intact = true;
        if self.behaviour.is_splitter_supported() {
            input_intact = updater.update_splitter(&self.behaviour, &mut self.splitter);
        }

        if input_intact {
            updater.update_mixes(&self.behaviour, &mut self.mixes)?;
            updater.update_sinks(&mut self.behaviour, &mut self.sinks, &mapper, &self.pools)?;
            updater.update_performance(self.perf.as_mut())?;
        } else {
            updater.write_sink_out_statuses(&self.sinks)?;
        }

        let history_size = self.render(memory, device, performance_output);
        updater.write_performance_out(history_size)?;
        updater.finish(&mut self.behaviour, self.elapsed_frame_count)?;
        Ok(())
    }

    fn render(
        &mut self,
        memory: &mut dyn GuestMemory,
        device: &mut dyn RenderDevice,
        performance_output: &mut [u8],
    ) -> u32 {
        let generator = CommandGenerator {
            behaviour: &self.behaviour,
            pools: &self.pools,
            splitter: &self.splitter,
            sample_count: self.config.sample_count as usize,
        };
        let (mut list, voice_ranges) = generator.generate(
            &mut self.voices,
            &self.channel_resources,
            &self.mixes,
            &mut self.effects,
            &self.sinks,
            self.perf.as_mut(),
        );

        let budget = self.frame_budget_ticks();
        let dropped = if self.config.voice_drop_enabled {
            self.compute_voice_drop(&mut list, &voice_ranges, budget)
        } else {
            0
        };
        self.last_voice_drop_count = dropped;

        let summary = self.processor.process(
            &list,
            ProcessContext {
                memory,
                device,
                voice_states: &mut self.voice_dsp_states,
                effect_states: &mut self.effect_dsp_states,
                sink_states: &mut self.sink_dsp_states,
                perf: self.perf.as_mut(),
                tick: self.tick.as_ref(),
            },
        );

        // Push circular-sink write heads back for next frame's out status.
        for (sink, dsp) in self.sinks.iter_mut().zip(&self.sink_dsp_states) {
            if let SinkParameters::CircularBuffer {
                current_offset,
                last_written_offset,
                ..
            } = &mut sink.parameters
            {
                *current_offset = dsp.current_offset;
                *last_written_offset = dsp.last_written_offset;
            }
        }

        self.splitter.clear_all_new_connection_flags();
        self.elapsed_frame_count += 1;

        let elapsed = summary.end_ticks.saturating_sub(summary.start_ticks);
        let running_behind = elapsed > budget;
        let mut history_size = 0u32;
        if let Some(perf) = self.perf.as_mut() {
            perf.tap_frame(running_behind, dropped, summary.start_ticks);
            history_size = perf.copy_histories(performance_output) as u32;
        }
        history_size
    }

    /// Disables the cheapest-to-lose voices until the frame estimate fits
    /// the processing budget. Priority 0 voices are never dropped.
    fn compute_voice_drop(
        &mut self,
        list: &mut CommandList,
        voice_ranges: &[GeneratedVoiceRange],
        budget_ticks: u64,
    ) -> u32 {
        let estimator = CommandTimeEstimator::new(
            self.behaviour.command_processing_time_estimator_version(),
            self.config.sample_count,
        );
        let mut estimate = estimator.estimate_list(list.commands());
        if estimate <= budget_ticks {
            return 0;
        }

        // Lowest importance first: highest priority value wins the drop.
        let mut candidates: Vec<&GeneratedVoiceRange> = voice_ranges
            .iter()
            .filter(|range| self.voices[range.voice_index as usize].priority != 0)
            .collect();
        candidates.sort_by_key(|range| {
            core::cmp::Reverse(self.voices[range.voice_index as usize].priority)
        });

        let mut dropped = 0u32;
        for range in candidates {
            if estimate <= budget_ticks {
                break;
            }
            let mut range_cost = 0u64;
            for command in &mut list.commands_mut()[range.start..range.end] {
                range_cost += u64::from(estimator.estimate(command));
                command.enabled = false;
            }
            self.voices[range.voice_index as usize].voice_dropped = true;
            estimate = estimate.saturating_sub(range_cost);
            dropped += 1;
            log::debug!(
                "voice {} dropped: frame estimate over budget",
                self.voices[range.voice_index as usize].id
            );
        }
        dropped
    }

    pub fn last_voice_drop_count(&self) -> u32 {
        self.last_voice_drop_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{BASE_REVISION_MAGIC, REVISION_5};
    use crate::tick::ManualTickSource;

    fn config() -> AudioRendererConfiguration {
        AudioRendererConfiguration {
            sample_rate: 48_000,
            sample_count: 240,
            mix_buffer_count: 2,
            sub_mix_count: 0,
            voice_count: 2,
            sink_count: 1,
            effect_count: 1,
            performance_metric_frames_count: 0,
            voice_drop_enabled: 0,
            reserved: [0; 3],
            splitter_count: 0,
            splitter_destination_count: 0,
            external_context_size: 0,
            revision: BASE_REVISION_MAGIC + REVISION_5,
        }
    }

    #[test]
    fn construction_validates_the_work_buffer_size() {
        let raw = config();
        let decoded = RendererConfig::from_wire(&raw);
        let required = calc_work_buffer_size(&decoded);

        let err = AudioRenderSystem::new(
            &raw,
            0x8000_0000,
            required - 1,
            Box::new(ManualTickSource::new()),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RendererError::WorkBufferTooSmall {
                provided: required - 1,
                required
            }
        );

        assert!(AudioRenderSystem::new(
            &raw,
            0x8000_0000,
            required,
            Box::new(ManualTickSource::new())
        )
        .is_ok());
    }

    #[test]
    fn construction_rejects_unsupported_sample_rates() {
        let mut raw = config();
        raw.sample_rate = 44_100;
        let err = AudioRenderSystem::new(&raw, 0, 1 << 24, Box::new(ManualTickSource::new()))
            .unwrap_err();
        assert_eq!(err, RendererError::UnsupportedSampleRate(44_100));
    }

    #[test]
    fn work_buffer_size_scales_with_entity_counts() {
        let small = RendererConfig::from_wire(&config());
        let mut bigger_raw = config();
        bigger_raw.voice_count = 24;
        bigger_raw.effect_count = 8;
        let bigger = RendererConfig::from_wire(&bigger_raw);
        assert!(calc_work_buffer_size(&bigger) > calc_work_buffer_size(&small));
    }
}
