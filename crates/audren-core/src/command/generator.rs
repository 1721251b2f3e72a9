//! Command generation: graph walk in data-dependency order.
//!
//! Voices are emitted first (decode → filter → ramp → fan-out into mix
//! buffers), then mixes deepest-first (effects, then distribution toward the
//! final mix), then sinks. A node's inputs are therefore always fully
//! computed before anything consumes them.

use crate::behaviour::BehaviourContext;
use crate::effect::{EffectParameters, EffectState};
use crate::mix::{MixContext, MixState};
use crate::perf::PerformanceManager;
use crate::pool::MemoryPoolState;
use crate::sink::{SinkParameters, SinkState};
use crate::splitter::SplitterContext;
use crate::voice::{PlayState, SampleFormat, VoiceChannelResource, VoiceState};
use crate::wire::perf::{
    DETAIL_TYPE_AUX, DETAIL_TYPE_BIQUAD_FILTER, DETAIL_TYPE_DELAY, ENTRY_TYPE_FINAL_MIX,
    ENTRY_TYPE_SINK, ENTRY_TYPE_SUB_MIX, ENTRY_TYPE_VOICE,
};
use crate::{UNUSED_ID, VOICE_CHANNEL_COUNT_MAX};

use super::{
    BufferIndexList, CommandKind, CommandList, DspWaveBuffer, PerformanceCommandState,
};

/// Span of commands belonging to one voice, recorded so the voice-drop pass
/// can disable exactly that work.
#[derive(Debug, Clone, Copy)]
pub struct GeneratedVoiceRange {
    pub voice_index: u32,
    pub start: usize,
    pub end: usize,
}

pub struct CommandGenerator<'a> {
    pub behaviour: &'a BehaviourContext,
    pub pools: &'a [MemoryPoolState],
    pub splitter: &'a SplitterContext,
    pub sample_count: usize,
}

impl<'a> CommandGenerator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        voices: &mut [VoiceState],
        channel_resources: &[VoiceChannelResource],
        mixes: &MixContext,
        effects: &mut [EffectState],
        sinks: &[SinkState],
        mut perf: Option<&mut PerformanceManager>,
    ) -> (CommandList, Vec<GeneratedVoiceRange>) {
        let mix_buffer_total = mixes.total_buffer_count() as usize;
        let buffer_count = mix_buffer_total + VOICE_CHANNEL_COUNT_MAX;
        let mut list = CommandList::new(buffer_count, self.sample_count);
        let mut voice_ranges = Vec::new();

        list.push(UNUSED_ID, CommandKind::ClearMixBuffer);

        // Voices, highest priority first (lower value = more important),
        // stable on the guest-specified sorting order.
        let mut order: Vec<usize> = (0..voices.len()).collect();
        order.sort_by_key(|&i| (voices[i].priority, voices[i].sorting_order, i as u32));

        for voice_index in order {
            let voice = &mut voices[voice_index];
            if !voice.should_generate_commands() {
                // A voice that just stopped leaves energy in its mix
                // buffers; fade it out instead of clicking.
                if voice.in_use
                    && voice.play_state == PlayState::Stopped
                    && voice.last_play_state == PlayState::Started
                {
                    let mut targets = BufferIndexList::default();
                    if voice.mix_id != UNUSED_ID {
                        if let Some(target) = mixes.state(voice.mix_id) {
                            for buffer in 0..target.buffer_count {
                                targets.push((target.buffer_offset + buffer) as u16);
                            }
                        }
                    }
                    for channel in 0..voice.channel_count as usize {
                        let state_index =
                            (voice_index * VOICE_CHANNEL_COUNT_MAX + channel) as u32;
                        list.push(
                            voice.node_id,
                            CommandKind::DepopPrepare {
                                state_index,
                                targets,
                            },
                        );
                    }
                }
                continue;
            }
            let start = list.len();
            let slot = self.generate_voice(
                &mut list,
                voice,
                voice_index,
                channel_resources,
                mixes,
                mix_buffer_total,
                perf.as_deref_mut(),
            );
            if slot {
                voice_ranges.push(GeneratedVoiceRange {
                    voice_index: voice_index as u32,
                    start,
                    end: list.len(),
                });
            }
        }

        for mix in mixes.sorted_in_use() {
            self.generate_mix(&mut list, mix, mixes, effects, perf.as_deref_mut());
        }

        for (sink_index, sink) in sinks.iter().enumerate() {
            if sink.in_use {
                self.generate_sink(&mut list, sink, sink_index, mixes, perf.as_deref_mut());
            }
        }

        (list, voice_ranges)
    }

    fn resolve_wave_buffers(&self, voice: &VoiceState) -> [DspWaveBuffer; 4] {
        let mut out = [DspWaveBuffer::default(); 4];
        for (index, wave_buffer) in voice.wave_buffers.iter().enumerate() {
            if !wave_buffer.is_valid {
                continue;
            }
            let address = wave_buffer.buffer.dsp_address(self.pools);
            if address == 0 {
                continue;
            }
            out[index] = DspWaveBuffer {
                address,
                size: wave_buffer.buffer.size(),
                start_sample_offset: wave_buffer.start_sample_offset.max(0) as u32,
                end_sample_offset: wave_buffer.end_sample_offset.max(0) as u32,
                should_loop: wave_buffer.should_loop,
                is_end_of_stream: wave_buffer.is_end_of_stream,
                context_address: wave_buffer.context.dsp_address(self.pools),
                context_size: wave_buffer.context.size(),
                is_valid: true,
            };
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn generate_voice(
        &self,
        list: &mut CommandList,
        voice: &mut VoiceState,
        voice_index: usize,
        channel_resources: &[VoiceChannelResource],
        mixes: &MixContext,
        mix_buffer_total: usize,
        mut perf: Option<&mut PerformanceManager>,
    ) -> bool {
        let wave_buffers = self.resolve_wave_buffers(voice);
        if !wave_buffers.iter().any(|w| w.is_valid) {
            return false;
        }

        let entry_slot = perf
            .as_deref_mut()
            .and_then(|p| p.get_next_entry(voice.node_id, ENTRY_TYPE_VOICE));
        if let Some(slot) = entry_slot {
            list.push(
                voice.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::Start,
                    slot,
                },
            );
        }

        for channel in 0..voice.channel_count as usize {
            let scratch_index = (mix_buffer_total + channel) as u16;
            let state_index = (voice_index * VOICE_CHANNEL_COUNT_MAX + channel) as u32;

            match voice.sample_format {
                SampleFormat::PcmInt16 => list.push(
                    voice.node_id,
                    CommandKind::PcmInt16DataSource {
                        output_index: scratch_index,
                        state_index,
                        sample_rate: voice.sample_rate,
                        pitch: voice.pitch,
                        channel_index: channel as u8,
                        channel_count: voice.channel_count as u8,
                        decoding_behaviour: voice.decoding_behaviour,
                        wave_buffers,
                    },
                ),
                SampleFormat::Adpcm => list.push(
                    voice.node_id,
                    CommandKind::AdpcmDataSource {
                        output_index: scratch_index,
                        state_index,
                        sample_rate: voice.sample_rate,
                        pitch: voice.pitch,
                        decoding_behaviour: voice.decoding_behaviour,
                        coefficients_address: voice.external_context.dsp_address(self.pools),
                        coefficients_size: voice.external_context.size(),
                        wave_buffers,
                    },
                ),
                SampleFormat::Invalid => continue,
            }

            for (stage, biquad) in voice.biquads.iter().enumerate() {
                if biquad.enable != 0 {
                    list.push(
                        voice.node_id,
                        CommandKind::BiquadFilter {
                            input_index: scratch_index,
                            output_index: scratch_index,
                            parameter: *biquad,
                            state_index,
                            stage: stage as u8,
                            needs_init: voice.biquad_needs_init[stage],
                        },
                    );
                }
            }

            list.push(
                voice.node_id,
                CommandKind::VolumeRamp {
                    index: scratch_index,
                    volume0: voice.previous_volume,
                    volume1: voice.volume,
                },
            );

            self.generate_voice_routing(
                list,
                voice,
                channel,
                scratch_index,
                channel_resources,
                mixes,
            );
        }

        for stage in 0..voice.biquad_needs_init.len() {
            voice.biquad_needs_init[stage] = false;
        }
        for wave_buffer in voice.wave_buffers.iter_mut() {
            if wave_buffer.is_valid {
                wave_buffer.is_sent_to_dsp = true;
            }
        }
        voice.is_new = false;

        if let Some(slot) = entry_slot {
            list.push(
                voice.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::End,
                    slot,
                },
            );
        }
        true
    }

    fn generate_voice_routing(
        &self,
        list: &mut CommandList,
        voice: &VoiceState,
        channel: usize,
        scratch_index: u16,
        channel_resources: &[VoiceChannelResource],
        mixes: &MixContext,
    ) {
        if voice.splitter_id != UNUSED_ID {
            // Destinations alternate across the voice's channels.
            for (position, destination) in self
                .splitter
                .destinations_of(voice.splitter_id)
                .enumerate()
            {
                if !destination.is_used
                    || position % voice.channel_count as usize != channel
                {
                    continue;
                }
                let Some(target) = mixes.state(destination.destination_id) else {
                    continue;
                };
                if !target.in_use {
                    continue;
                }
                for buffer in 0..target.buffer_count as usize {
                    let volume = destination.mix_volumes[buffer];
                    if volume != 0.0 {
                        list.push(
                            voice.node_id,
                            CommandKind::Mix {
                                input_index: scratch_index,
                                output_index: (target.buffer_offset + buffer as u32) as u16,
                                volume,
                            },
                        );
                    }
                }
            }
        } else if voice.mix_id != UNUSED_ID {
            let Some(target) = mixes.state(voice.mix_id) else {
                return;
            };
            if !target.in_use {
                return;
            }
            let resource = voice.channel_resource_ids[channel];
            let Some(resource) = channel_resources.get(resource as usize) else {
                return;
            };
            for buffer in 0..target.buffer_count as usize {
                let volume0 = resource.previous_mix_volumes[buffer];
                let volume1 = resource.mix_volumes[buffer];
                if volume0 != 0.0 || volume1 != 0.0 {
                    list.push(
                        voice.node_id,
                        CommandKind::MixRamp {
                            input_index: scratch_index,
                            output_index: (target.buffer_offset + buffer as u32) as u16,
                            volume0,
                            volume1,
                        },
                    );
                }
            }
        }
    }

    fn generate_mix(
        &self,
        list: &mut CommandList,
        mix: &MixState,
        mixes: &MixContext,
        effects: &mut [EffectState],
        mut perf: Option<&mut PerformanceManager>,
    ) {
        let entry_type = if mix.is_final() {
            ENTRY_TYPE_FINAL_MIX
        } else {
            ENTRY_TYPE_SUB_MIX
        };
        let entry_slot = perf
            .as_deref_mut()
            .and_then(|p| p.get_next_entry(mix.node_id, entry_type));
        if let Some(slot) = entry_slot {
            list.push(
                mix.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::Start,
                    slot,
                },
            );
        }

        list.push(
            mix.node_id,
            CommandKind::DepopForMixBuffers {
                buffer_offset: mix.buffer_offset as u16,
                buffer_count: mix.buffer_count as u16,
                sample_rate: mix.sample_rate,
            },
        );

        // Effects attached to this mix, in guest processing order.
        let mut attached: Vec<usize> = (0..effects.len())
            .filter(|&i| effects[i].in_use && effects[i].mix_id == mix.mix_id)
            .collect();
        attached.sort_by_key(|&i| effects[i].processing_order);
        for effect_index in attached {
            self.generate_effect(list, mix, effect_index, effects, perf.as_deref_mut());
        }

        if mix.is_final() {
            for buffer in 0..mix.buffer_count {
                list.push(
                    mix.node_id,
                    CommandKind::Volume {
                        index: (mix.buffer_offset + buffer) as u16,
                        volume: mix.volume,
                    },
                );
            }
        } else {
            self.generate_mix_distribution(list, mix, mixes);
        }

        if let Some(slot) = entry_slot {
            list.push(
                mix.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::End,
                    slot,
                },
            );
        }
    }

    fn generate_mix_distribution(&self, list: &mut CommandList, mix: &MixState, mixes: &MixContext) {
        if mix.destination_splitter_id != UNUSED_ID {
            for destination in self.splitter.destinations_of(mix.destination_splitter_id) {
                if !destination.is_used {
                    continue;
                }
                let Some(target) = mixes.state(destination.destination_id) else {
                    continue;
                };
                if !target.in_use {
                    continue;
                }
                let count = mix.buffer_count.min(target.buffer_count) as usize;
                for buffer in 0..count {
                    let volume = mix.volume * destination.mix_volumes[buffer];
                    if volume != 0.0 {
                        list.push(
                            mix.node_id,
                            CommandKind::Mix {
                                input_index: (mix.buffer_offset + buffer as u32) as u16,
                                output_index: (target.buffer_offset + buffer as u32) as u16,
                                volume,
                            },
                        );
                    }
                }
            }
        } else if mix.destination_mix_id != UNUSED_ID {
            let Some(target) = mixes.state(mix.destination_mix_id) else {
                return;
            };
            if !target.in_use {
                return;
            }
            for input in 0..mix.buffer_count {
                for output in 0..target.buffer_count {
                    let volume = mix.volume * mix.destination_volume(input, output);
                    if volume != 0.0 {
                        list.push(
                            mix.node_id,
                            CommandKind::Mix {
                                input_index: (mix.buffer_offset + input) as u16,
                                output_index: (target.buffer_offset + output) as u16,
                                volume,
                            },
                        );
                    }
                }
            }
        }
    }

    fn generate_effect(
        &self,
        list: &mut CommandList,
        mix: &MixState,
        effect_index: usize,
        effects: &mut [EffectState],
        mut perf: Option<&mut PerformanceManager>,
    ) {
        let effect = &mut effects[effect_index];
        let needs_init = effect.needs_state_reset;
        effect.needs_state_reset = false;
        let enabled = effect.enabled;
        let base = mix.buffer_offset as u16;

        match &effect.parameters {
            EffectParameters::None => {}
            EffectParameters::BufferMix(parameter) => {
                if !enabled {
                    return;
                }
                let mut inputs = BufferIndexList::default();
                let mut outputs = BufferIndexList::default();
                for i in 0..parameter.mix_count.min(mix.buffer_count) as usize {
                    inputs.push(base + u16::from(parameter.input[i]));
                    outputs.push(base + u16::from(parameter.output[i]));
                }
                list.push(
                    mix.node_id,
                    CommandKind::BufferMixEffect {
                        inputs,
                        outputs,
                        volumes: parameter.volumes,
                    },
                );
            }
            EffectParameters::Aux {
                parameter,
                send_info,
                send_buffer,
                return_info,
                return_buffer,
            } => {
                let detail = perf.as_deref_mut().and_then(|p| {
                    p.get_next_detail(mix.node_id, ENTRY_TYPE_SUB_MIX, DETAIL_TYPE_AUX)
                });
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::Start,
                            slot,
                        },
                    );
                }
                let count_max = parameter.buffer_storage_size / 4;
                let channels = parameter
                    .mix_count
                    .min(mix.buffer_count)
                    .min(VOICE_CHANNEL_COUNT_MAX as u32) as usize;
                for channel in 0..channels.max(1) {
                    // Each channel owns an equal slice of the guest ring.
                    let slice = u64::from(count_max / channels.max(1) as u32) * 4;
                    list.push(
                        mix.node_id,
                        CommandKind::AuxEffect {
                            enabled,
                            input_index: base + u16::from(parameter.input[channel]),
                            output_index: base + u16::from(parameter.output[channel]),
                            send_info_address: send_info.dsp_address(self.pools),
                            send_buffer_address: send_buffer.dsp_address(self.pools)
                                + channel as u64 * slice,
                            return_info_address: return_info.dsp_address(self.pools),
                            return_buffer_address: return_buffer.dsp_address(self.pools)
                                + channel as u64 * slice,
                            count_max: count_max / channels.max(1) as u32,
                        },
                    );
                }
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::End,
                            slot,
                        },
                    );
                }
            }
            EffectParameters::Delay { parameter, .. } => {
                let detail = perf.as_deref_mut().and_then(|p| {
                    p.get_next_detail(mix.node_id, ENTRY_TYPE_SUB_MIX, DETAIL_TYPE_DELAY)
                });
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::Start,
                            slot,
                        },
                    );
                }
                let mut inputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let mut outputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let channel_count =
                    (parameter.channel_count as usize).min(VOICE_CHANNEL_COUNT_MAX);
                for channel in 0..channel_count {
                    inputs[channel] = base + u16::from(parameter.input[channel]);
                    outputs[channel] = base + u16::from(parameter.output[channel]);
                }
                list.push(
                    mix.node_id,
                    CommandKind::DelayEffect {
                        enabled,
                        parameter: *parameter,
                        state_index: effect_index as u32,
                        needs_init,
                        inputs,
                        outputs,
                        channel_count: channel_count as u8,
                    },
                );
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::End,
                            slot,
                        },
                    );
                }
            }
            EffectParameters::BiquadFilter(parameter) => {
                let detail = perf.as_deref_mut().and_then(|p| {
                    p.get_next_detail(mix.node_id, ENTRY_TYPE_SUB_MIX, DETAIL_TYPE_BIQUAD_FILTER)
                });
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::Start,
                            slot,
                        },
                    );
                }
                let mut inputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let mut outputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let channel_count =
                    (parameter.channel_count as usize).min(VOICE_CHANNEL_COUNT_MAX);
                for channel in 0..channel_count {
                    inputs[channel] = base + u16::from(parameter.input[channel]);
                    outputs[channel] = base + u16::from(parameter.output[channel]);
                }
                list.push(
                    mix.node_id,
                    CommandKind::BiquadFilterEffect {
                        enabled,
                        parameter: *parameter,
                        state_index: effect_index as u32,
                        needs_init,
                        inputs,
                        outputs,
                        channel_count: channel_count as u8,
                    },
                );
                if let Some(slot) = detail {
                    list.push(
                        mix.node_id,
                        CommandKind::Performance {
                            state: PerformanceCommandState::End,
                            slot,
                        },
                    );
                }
            }
        }
    }

    fn generate_sink(
        &self,
        list: &mut CommandList,
        sink: &SinkState,
        sink_index: usize,
        mixes: &MixContext,
        mut perf: Option<&mut PerformanceManager>,
    ) {
        let entry_slot = perf
            .as_deref_mut()
            .and_then(|p| p.get_next_entry(sink.node_id, ENTRY_TYPE_SINK));
        if let Some(slot) = entry_slot {
            list.push(
                sink.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::Start,
                    slot,
                },
            );
        }

        let final_mix = mixes.final_mix();
        match &sink.parameters {
            SinkParameters::None => {}
            SinkParameters::Device(parameter) => {
                let mut inputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let input_count = parameter
                    .input_count
                    .min(VOICE_CHANNEL_COUNT_MAX as u32)
                    .min(final_mix.buffer_count) as usize;
                for (slot_index, input) in inputs.iter_mut().enumerate().take(input_count) {
                    *input =
                        (final_mix.buffer_offset + u32::from(parameter.inputs[slot_index])) as u16;
                }
                list.push(
                    sink.node_id,
                    CommandKind::DeviceSink {
                        inputs,
                        input_count: input_count as u8,
                    },
                );
            }
            SinkParameters::CircularBuffer {
                parameter, buffer, ..
            } => {
                let mut inputs = [0u16; VOICE_CHANNEL_COUNT_MAX];
                let input_count = parameter
                    .input_count
                    .min(VOICE_CHANNEL_COUNT_MAX as u32)
                    .min(final_mix.buffer_count) as usize;
                for (slot_index, input) in inputs.iter_mut().enumerate().take(input_count) {
                    *input =
                        (final_mix.buffer_offset + u32::from(parameter.inputs[slot_index])) as u16;
                }
                list.push(
                    sink.node_id,
                    CommandKind::CircularBufferSink {
                        sink_index: sink_index as u32,
                        inputs,
                        input_count: input_count as u8,
                        address: buffer.dsp_address(self.pools),
                        size: parameter.size,
                    },
                );
            }
        }

        if let Some(slot) = entry_slot {
            list.push(
                sink.node_id,
                CommandKind::Performance {
                    state: PerformanceCommandState::End,
                    slot,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{BASE_REVISION_MAGIC, REVISION_5};
    use crate::pool::{MemoryPoolLocation, PoolMapper};
    use crate::wire::mix::MixInParameter;
    use crate::wire::voice::{VoiceInParameter, PLAY_STATE_STARTED, SAMPLE_FORMAT_PCM_INT16};
    use crate::wire::write_wire;

    fn behaviour() -> BehaviourContext {
        let mut ctx = BehaviourContext::new();
        ctx.set_user_revision(BASE_REVISION_MAGIC + REVISION_5);
        ctx
    }

    fn pools() -> Vec<MemoryPoolState> {
        let mut pool = MemoryPoolState::new(MemoryPoolLocation::Cpu);
        pool.set_cpu_address(0x1000_0000, 0x10_0000);
        PoolMapper::new(false).map(&mut pool);
        vec![pool]
    }

    fn mixes_with_final(buffer_count: u32) -> MixContext {
        let mut mixes = MixContext::new(1);
        let mut parameter = MixInParameter::default();
        parameter.mix_id = 0;
        parameter.in_use = 1;
        parameter.is_dirty = 1;
        parameter.buffer_count = buffer_count;
        parameter.sample_rate = 48_000;
        let mut blob = vec![0u8; 0x930];
        write_wire(&mut blob, &parameter).unwrap();
        mixes.update(&behaviour(), &blob).unwrap();
        mixes
    }

    fn playing_voice(behaviour: &mut BehaviourContext, pools: &[MemoryPoolState]) -> VoiceState {
        let mapper = PoolMapper::new(false);
        let mut voice = VoiceState::default();
        let mut parameter = VoiceInParameter::default();
        parameter.id = 0;
        parameter.node_id = 11;
        parameter.in_use = 1;
        parameter.is_new = 1;
        parameter.play_state = PLAY_STATE_STARTED;
        parameter.sample_format = SAMPLE_FORMAT_PCM_INT16;
        parameter.sample_rate = 48_000;
        parameter.channel_count = 1;
        parameter.pitch = 1.0;
        parameter.volume = 1.0;
        parameter.mix_id = 0;
        parameter.splitter_id = UNUSED_ID;
        parameter.channel_resource_ids = [0, UNUSED_ID, UNUSED_ID, UNUSED_ID, UNUSED_ID, UNUSED_ID];
        parameter.wave_buffers[0].address = 0x1000_0000;
        parameter.wave_buffers[0].size = 0x1000;
        parameter.wave_buffers[0].end_sample_offset = 0x200;
        voice.update(behaviour, &parameter, &mapper, pools);
        voice
    }

    #[test]
    fn voice_work_precedes_mix_and_sink_work() {
        let mut ctx = behaviour();
        let pools = pools();
        let splitter = SplitterContext::new(0, 0);
        let mixes = mixes_with_final(2);
        let mut voices = vec![playing_voice(&mut ctx, &pools)];
        let mut resources = vec![VoiceChannelResource::default()];
        resources[0].is_used = true;
        resources[0].mix_volumes[0] = 1.0;
        resources[0].previous_mix_volumes[0] = 1.0;
        let mut effects: Vec<EffectState> = Vec::new();
        let mut sinks = vec![SinkState::default()];
        sinks[0].in_use = true;
        sinks[0].node_id = 40;
        sinks[0].parameters = SinkParameters::Device(Default::default());
        if let SinkParameters::Device(ref mut d) = sinks[0].parameters {
            d.input_count = 2;
            d.inputs = [0, 1, 0, 0, 0, 0];
        }

        let generator = CommandGenerator {
            behaviour: &ctx,
            pools: &pools,
            splitter: &splitter,
            sample_count: 240,
        };
        let (list, ranges) = generator.generate(
            &mut voices,
            &resources,
            &mixes,
            &mut effects,
            &sinks,
            None,
        );

        assert_eq!(ranges.len(), 1);
        let kinds: Vec<&CommandKind> = list.commands().iter().map(|c| &c.kind).collect();
        let source_pos = kinds
            .iter()
            .position(|k| matches!(k, CommandKind::PcmInt16DataSource { .. }))
            .unwrap();
        let ramp_pos = kinds
            .iter()
            .position(|k| matches!(k, CommandKind::MixRamp { .. }))
            .unwrap();
        let sink_pos = kinds
            .iter()
            .position(|k| matches!(k, CommandKind::DeviceSink { .. }))
            .unwrap();
        assert!(matches!(kinds[0], CommandKind::ClearMixBuffer));
        assert!(source_pos < ramp_pos);
        assert!(ramp_pos < sink_pos);

        // Voice scratch buffers sit after the mix buffers.
        match kinds[source_pos] {
            CommandKind::PcmInt16DataSource { output_index, .. } => {
                assert_eq!(*output_index, 2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn voice_with_no_valid_wave_buffers_emits_nothing() {
        let mut ctx = behaviour();
        let pools = pools();
        let splitter = SplitterContext::new(0, 0);
        let mixes = mixes_with_final(2);
        let mut voice = playing_voice(&mut ctx, &pools);
        voice.wave_buffers = Default::default();
        let mut voices = vec![voice];
        let resources = vec![VoiceChannelResource::default()];
        let mut effects: Vec<EffectState> = Vec::new();

        let generator = CommandGenerator {
            behaviour: &ctx,
            pools: &pools,
            splitter: &splitter,
            sample_count: 240,
        };
        let (list, ranges) = generator.generate(
            &mut voices,
            &resources,
            &mixes,
            &mut effects,
            &[],
            None,
        );
        assert!(ranges.is_empty());
        assert!(!list
            .commands()
            .iter()
            .any(|c| matches!(c.kind, CommandKind::PcmInt16DataSource { .. })));
    }
}
