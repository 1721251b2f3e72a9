//! Command list execution.
//!
//! Runs on one logical DSP thread: strictly sequential, each command
//! completes before the next begins. Sample buffers are a flat arena owned
//! by the processor and reused across frames; all guest data goes through
//! `GuestMemory`.

use audren_mem::GuestMemory;

use crate::perf::PerformanceManager;
use crate::tick::TickSource;
use crate::voice::{DecodingBehaviourFlags, VoiceDspState};
use crate::wire::voice::BiquadFilterParameter;
use crate::{TARGET_SAMPLE_RATE, VOICE_CHANNEL_COUNT_MAX};

use super::adpcm::{frame_position, AdpcmCoefficients, AdpcmDecoder};
use super::{Command, CommandKind, CommandList, DspWaveBuffer, PerformanceCommandState, RenderDevice};

/// Biquad coefficients arrive in Q14.
const BIQUAD_SCALE: f32 = 1.0 / 16384.0;

/// Per-sample decay applied while bleeding depop energy.
const DEPOP_DECAY_48K: f32 = 0.962_189;
const DEPOP_DECAY_32K: f32 = 0.943_695;

/// Runtime state of one circular-buffer sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct CircularSinkDspState {
    pub current_offset: u32,
    pub last_written_offset: u32,
}

/// Per-effect-slot processing state (delay lines, filter histories).
#[derive(Debug, Clone, Default)]
pub struct EffectDspState {
    delay_lines: Vec<Vec<f32>>,
    delay_pos: usize,
    biquad_history: [[f32; 4]; VOICE_CHANNEL_COUNT_MAX],
}

impl EffectDspState {
    pub fn reset(&mut self) {
        self.delay_lines.clear();
        self.delay_pos = 0;
        self.biquad_history = [[0.0; 4]; VOICE_CHANNEL_COUNT_MAX];
    }
}

/// Mutable renderer state the processor executes against.
pub struct ProcessContext<'a> {
    pub memory: &'a mut dyn GuestMemory,
    pub device: &'a mut dyn RenderDevice,
    pub voice_states: &'a mut [VoiceDspState],
    pub effect_states: &'a mut [EffectDspState],
    pub sink_states: &'a mut [CircularSinkDspState],
    pub perf: Option<&'a mut PerformanceManager>,
    pub tick: &'a dyn TickSource,
}

/// Guest-visible layout of one aux ring bookkeeping block.
const AUX_INFO_WRITE_OFFSET: u64 = 0x0;
const AUX_INFO_READ_OFFSET: u64 = 0x4;
const AUX_INFO_TOTAL_COUNT: u64 = 0xC;

#[derive(Debug, Default)]
pub struct CommandProcessor {
    samples: Vec<f32>,
    depop: Vec<f32>,
    scratch: Vec<f32>,
    sample_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSummary {
    pub start_ticks: u64,
    pub end_ticks: u64,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interleaved view of the last rendered frame for a buffer index, used
    /// by tests to inspect output.
    pub fn buffer(&self, index: usize) -> &[f32] {
        &self.samples[index * self.sample_count..(index + 1) * self.sample_count]
    }

    pub fn process(&mut self, list: &CommandList, mut ctx: ProcessContext<'_>) -> ProcessSummary {
        self.sample_count = list.sample_count;
        self.samples.resize(list.buffer_count * list.sample_count, 0.0);
        if self.depop.len() < list.buffer_count {
            self.depop.resize(list.buffer_count, 0.0);
        }
        self.scratch.resize(list.sample_count, 0.0);

        let start_ticks = ctx.tick.now();
        for command in list.commands() {
            if !command.enabled {
                continue;
            }
            let command_start = ctx.tick.now();
            self.process_command(command, &mut ctx, start_ticks, command_start);
        }

        ProcessSummary {
            start_ticks,
            end_ticks: ctx.tick.now(),
        }
    }

    fn process_command(
        &mut self,
        command: &Command,
        ctx: &mut ProcessContext<'_>,
        frame_start: u64,
        command_start: u64,
    ) {
        let sample_count = self.sample_count;
        match &command.kind {
            CommandKind::ClearMixBuffer => {
                self.samples.fill(0.0);
            }
            CommandKind::DepopPrepare {
                state_index,
                targets,
            } => {
                let state = &mut ctx.voice_states[*state_index as usize];
                let energy = state.previous_sample;
                state.previous_sample = 0.0;
                if energy != 0.0 {
                    for &target in targets.as_slice() {
                        self.depop[target as usize] += energy;
                    }
                }
            }
            CommandKind::DepopForMixBuffers {
                buffer_offset,
                buffer_count,
                sample_rate,
            } => {
                let decay = if *sample_rate == 32_000 {
                    DEPOP_DECAY_32K
                } else {
                    DEPOP_DECAY_48K
                };
                for buffer in *buffer_offset..buffer_offset + buffer_count {
                    let mut energy = self.depop[buffer as usize];
                    if energy == 0.0 {
                        continue;
                    }
                    let out = self.buffer_mut(buffer as usize);
                    for sample in out.iter_mut() {
                        energy *= decay;
                        *sample += energy;
                    }
                    self.depop[buffer as usize] = energy;
                }
            }
            CommandKind::PcmInt16DataSource {
                output_index,
                state_index,
                sample_rate,
                pitch,
                channel_index,
                channel_count,
                decoding_behaviour,
                wave_buffers,
            } => {
                let source = PcmSource {
                    format: SourceFormat::PcmInt16 {
                        channel_index: *channel_index,
                        channel_count: *channel_count,
                    },
                    wave_buffers,
                };
                self.process_data_source(
                    ctx,
                    source,
                    *output_index,
                    *state_index,
                    *sample_rate,
                    *pitch,
                    *decoding_behaviour,
                );
            }
            CommandKind::AdpcmDataSource {
                output_index,
                state_index,
                sample_rate,
                pitch,
                decoding_behaviour,
                coefficients_address,
                coefficients_size,
                wave_buffers,
            } => {
                let mut bytes = [0u8; 32];
                let coefficients = if *coefficients_size >= 32
                    && ctx.memory.read_into(*coefficients_address, &mut bytes).is_ok()
                {
                    AdpcmCoefficients::from_bytes(&bytes).unwrap_or_default()
                } else {
                    AdpcmCoefficients::default()
                };
                let source = PcmSource {
                    format: SourceFormat::Adpcm { coefficients },
                    wave_buffers,
                };
                self.process_data_source(
                    ctx,
                    source,
                    *output_index,
                    *state_index,
                    *sample_rate,
                    *pitch,
                    *decoding_behaviour,
                );
            }
            CommandKind::BiquadFilter {
                input_index,
                output_index,
                parameter,
                state_index,
                stage,
                needs_init,
            } => {
                let state = &mut ctx.voice_states[*state_index as usize];
                if *needs_init {
                    state.biquad_history[*stage as usize] = [0.0; 4];
                }
                let mut history = state.biquad_history[*stage as usize];
                self.run_biquad(parameter, *input_index, *output_index, &mut history);
                ctx.voice_states[*state_index as usize].biquad_history[*stage as usize] = history;
            }
            CommandKind::Volume { index, volume } => {
                for sample in self.buffer_mut(*index as usize) {
                    *sample *= volume;
                }
            }
            CommandKind::VolumeRamp {
                index,
                volume0,
                volume1,
            } => {
                let step = (volume1 - volume0) / sample_count as f32;
                let mut volume = *volume0;
                for sample in self.buffer_mut(*index as usize) {
                    volume += step;
                    *sample *= volume;
                }
            }
            CommandKind::Mix {
                input_index,
                output_index,
                volume,
            } => {
                self.copy_to_scratch(*input_index as usize);
                let volume = *volume;
                let (out, scratch) = self.out_and_scratch(*output_index as usize);
                for (sample, src) in out.iter_mut().zip(scratch) {
                    *sample += src * volume;
                }
            }
            CommandKind::MixRamp {
                input_index,
                output_index,
                volume0,
                volume1,
            } => {
                self.copy_to_scratch(*input_index as usize);
                let step = (volume1 - volume0) / sample_count as f32;
                let mut volume = *volume0;
                let (out, scratch) = self.out_and_scratch(*output_index as usize);
                for (sample, src) in out.iter_mut().zip(scratch) {
                    volume += step;
                    *sample += src * volume;
                }
            }
            CommandKind::BufferMixEffect {
                inputs,
                outputs,
                volumes,
            } => {
                for (slot, (&input, &output)) in
                    inputs.as_slice().iter().zip(outputs.as_slice()).enumerate()
                {
                    let volume = volumes[slot];
                    if volume == 0.0 || input == output {
                        continue;
                    }
                    self.copy_to_scratch(input as usize);
                    let (out, scratch) = self.out_and_scratch(output as usize);
                    for (sample, src) in out.iter_mut().zip(scratch) {
                        *sample += src * volume;
                    }
                }
            }
            CommandKind::AuxEffect {
                enabled,
                input_index,
                output_index,
                send_info_address,
                send_buffer_address,
                return_info_address,
                return_buffer_address,
                count_max,
            } => {
                self.run_aux(
                    ctx,
                    *enabled,
                    *input_index,
                    *output_index,
                    *send_info_address,
                    *send_buffer_address,
                    *return_info_address,
                    *return_buffer_address,
                    *count_max,
                );
            }
            CommandKind::DelayEffect {
                enabled,
                parameter,
                state_index,
                needs_init,
                inputs,
                outputs,
                channel_count,
            } => {
                let state = &mut ctx.effect_states[*state_index as usize];
                if *needs_init {
                    state.reset();
                }
                if !enabled {
                    for channel in 0..*channel_count as usize {
                        self.pass_through(inputs[channel], outputs[channel]);
                    }
                } else {
                    self.run_delay(state, parameter, inputs, outputs, *channel_count);
                }
            }
            CommandKind::BiquadFilterEffect {
                enabled,
                parameter,
                state_index,
                needs_init,
                inputs,
                outputs,
                channel_count,
            } => {
                let index = *state_index as usize;
                if *needs_init {
                    ctx.effect_states[index].biquad_history = [[0.0; 4]; VOICE_CHANNEL_COUNT_MAX];
                }
                let biquad = BiquadFilterParameter {
                    enable: 1,
                    reserved: 0,
                    numerator: parameter.numerator,
                    denominator: parameter.denominator,
                };
                for channel in 0..*channel_count as usize {
                    if !enabled {
                        self.pass_through(inputs[channel], outputs[channel]);
                        continue;
                    }
                    let mut history = ctx.effect_states[index].biquad_history[channel];
                    self.run_biquad(&biquad, inputs[channel], outputs[channel], &mut history);
                    ctx.effect_states[index].biquad_history[channel] = history;
                }
            }
            CommandKind::CircularBufferSink {
                sink_index,
                inputs,
                input_count,
                address,
                size,
            } => {
                self.run_circular_sink(
                    ctx,
                    *sink_index,
                    &inputs[..*input_count as usize],
                    *address,
                    *size,
                );
            }
            CommandKind::DeviceSink {
                inputs,
                input_count,
            } => {
                let channels = *input_count as usize;
                if channels == 0 {
                    return;
                }
                let mut interleaved = vec![0.0f32; channels * sample_count];
                for (channel, &input) in inputs[..channels].iter().enumerate() {
                    let src = self.buffer(input as usize);
                    for (frame, &sample) in src.iter().enumerate() {
                        interleaved[frame * channels + channel] = sample;
                    }
                }
                ctx.device.append_frame(&interleaved, channels);
            }
            CommandKind::Performance { state, slot } => {
                if let Some(perf) = ctx.perf.as_deref_mut() {
                    match state {
                        PerformanceCommandState::Start => {
                            perf.write_start_time(*slot, (command_start - frame_start) as u32);
                        }
                        PerformanceCommandState::End => {
                            perf.write_processing_time(
                                *slot,
                                (ctx.tick.now() - frame_start) as u32,
                            );
                        }
                    }
                }
            }
        }
    }

    fn buffer_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index * self.sample_count..(index + 1) * self.sample_count]
    }

    fn copy_to_scratch(&mut self, index: usize) {
        let src = index * self.sample_count..(index + 1) * self.sample_count;
        self.scratch.copy_from_slice(&self.samples[src]);
    }

    /// Split borrow: mutable output buffer plus the shared scratch copy.
    fn out_and_scratch(&mut self, index: usize) -> (&mut [f32], &[f32]) {
        let range = index * self.sample_count..(index + 1) * self.sample_count;
        (&mut self.samples[range], &self.scratch)
    }

    fn pass_through(&mut self, input: u16, output: u16) {
        if input == output {
            return;
        }
        self.copy_to_scratch(input as usize);
        let (out, scratch) = self.out_and_scratch(output as usize);
        out.copy_from_slice(scratch);
    }

    fn run_biquad(
        &mut self,
        parameter: &BiquadFilterParameter,
        input: u16,
        output: u16,
        history: &mut [f32; 4],
    ) {
        let b0 = f32::from(parameter.numerator[0]) * BIQUAD_SCALE;
        let b1 = f32::from(parameter.numerator[1]) * BIQUAD_SCALE;
        let b2 = f32::from(parameter.numerator[2]) * BIQUAD_SCALE;
        let a1 = f32::from(parameter.denominator[0]) * BIQUAD_SCALE;
        let a2 = f32::from(parameter.denominator[1]) * BIQUAD_SCALE;

        self.copy_to_scratch(input as usize);
        let [mut x1, mut x2, mut y1, mut y2] = *history;
        let (out, scratch) = self.out_and_scratch(output as usize);
        for (sample, &x) in out.iter_mut().zip(scratch) {
            let y = b0 * x + b1 * x1 + b2 * x2 + a1 * y1 + a2 * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            *sample = y;
        }
        *history = [x1, x2, y1, y2];
    }

    #[allow(clippy::too_many_arguments)]
    fn run_aux(
        &mut self,
        ctx: &mut ProcessContext<'_>,
        enabled: bool,
        input_index: u16,
        output_index: u16,
        send_info: u64,
        send_buffer: u64,
        return_info: u64,
        return_buffer: u64,
        count_max: u32,
    ) {
        if !enabled || count_max == 0 || send_buffer == 0 {
            self.pass_through(input_index, output_index);
            return;
        }

        // Send: input samples into the guest ring as PCM32.
        self.copy_to_scratch(input_index as usize);
        let mut write_offset = ctx
            .memory
            .read_u32_le(send_info + AUX_INFO_WRITE_OFFSET)
            .unwrap_or(0)
            % count_max;
        for &sample in &self.scratch {
            let value = (sample * 32768.0 * 65536.0) as i32;
            let _ = ctx
                .memory
                .write_u32_le(send_buffer + u64::from(write_offset) * 4, value as u32);
            write_offset = (write_offset + 1) % count_max;
        }
        let _ = ctx.memory.write_u32_le(send_info + AUX_INFO_WRITE_OFFSET, write_offset);
        let total = ctx
            .memory
            .read_u32_le(send_info + AUX_INFO_TOTAL_COUNT)
            .unwrap_or(0)
            .wrapping_add(self.sample_count as u32);
        let _ = ctx.memory.write_u32_le(send_info + AUX_INFO_TOTAL_COUNT, total);

        // Return: guest-processed samples into the output buffer.
        let mut read_offset = ctx
            .memory
            .read_u32_le(return_info + AUX_INFO_READ_OFFSET)
            .unwrap_or(0)
            % count_max;
        let sample_count = self.sample_count;
        let out = self.buffer_mut(output_index as usize);
        for sample in out.iter_mut().take(sample_count) {
            let raw = ctx
                .memory
                .read_u32_le(return_buffer + u64::from(read_offset) * 4)
                .unwrap_or(0) as i32;
            *sample = raw as f32 / (32768.0 * 65536.0);
            read_offset = (read_offset + 1) % count_max;
        }
        let _ = ctx.memory.write_u32_le(return_info + AUX_INFO_READ_OFFSET, read_offset);
    }

    fn run_delay(
        &mut self,
        state: &mut EffectDspState,
        parameter: &crate::wire::effect::DelayParameter,
        inputs: &[u16; VOICE_CHANNEL_COUNT_MAX],
        outputs: &[u16; VOICE_CHANNEL_COUNT_MAX],
        channel_count: u8,
    ) {
        let delay_samples = ((u64::from(parameter.delay_time_ms)
            * u64::from(parameter.sample_rate.max(1)))
            / 1000)
            .max(1) as usize;

        if state.delay_lines.len() != channel_count as usize
            || state.delay_lines.first().map(Vec::len) != Some(delay_samples)
        {
            state.delay_lines =
                vec![vec![0.0; delay_samples]; channel_count as usize];
            state.delay_pos = 0;
        }

        let dry = parameter.dry_gain;
        let wet = 1.0 - dry;
        let mut final_pos = state.delay_pos;
        for channel in 0..channel_count as usize {
            self.copy_to_scratch(inputs[channel] as usize);
            let mut pos = state.delay_pos;
            let line = &mut state.delay_lines[channel];
            let out = &mut self.samples[outputs[channel] as usize * self.sample_count
                ..(outputs[channel] as usize + 1) * self.sample_count];
            for (sample, &x) in out.iter_mut().zip(&self.scratch) {
                let delayed = line[pos];
                line[pos] = x * parameter.in_gain + delayed * parameter.feedback_gain;
                *sample = x * dry + delayed * wet;
                pos = (pos + 1) % line.len();
            }
            final_pos = pos;
        }
        state.delay_pos = final_pos;
    }

    fn run_circular_sink(
        &mut self,
        ctx: &mut ProcessContext<'_>,
        sink_index: u32,
        inputs: &[u16],
        address: u64,
        size: u32,
    ) {
        if address == 0 || size == 0 {
            return;
        }
        let state = &mut ctx.sink_states[sink_index as usize];
        let frame_bytes = (self.sample_count * 2) as u32;

        for &input in inputs {
            if state.current_offset + frame_bytes > size {
                state.current_offset = 0;
            }
            let src = self.buffer(input as usize);
            let mut bytes = Vec::with_capacity(src.len() * 2);
            for &sample in src {
                let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            let _ = ctx
                .memory
                .write_from(address + u64::from(state.current_offset), &bytes);
            state.current_offset += frame_bytes;
        }
        state.last_written_offset = state.current_offset;
    }

    #[allow(clippy::too_many_arguments)]
    fn process_data_source(
        &mut self,
        ctx: &mut ProcessContext<'_>,
        source: PcmSource<'_>,
        output_index: u16,
        state_index: u32,
        sample_rate: u32,
        pitch: f32,
        decoding_behaviour: DecodingBehaviourFlags,
    ) {
        let state = &mut ctx.voice_states[state_index as usize];
        let ratio = if decoding_behaviour
            .contains(DecodingBehaviourFlags::SKIP_PITCH_AND_SAMPLE_RATE_CONVERSION)
        {
            1.0
        } else {
            f64::from(sample_rate) / f64::from(TARGET_SAMPLE_RATE) * f64::from(pitch)
        };

        let sample_count = self.sample_count;
        let out_range =
            output_index as usize * sample_count..(output_index as usize + 1) * sample_count;
        let out = &mut self.samples[out_range];

        let mut last = state.previous_sample;
        if (ratio - 1.0).abs() < f64::EPSILON {
            for sample in out.iter_mut() {
                let value = source.next_sample(state, ctx.memory).unwrap_or(0.0);
                *sample = value;
                last = value;
            }
        } else {
            for sample in out.iter_mut() {
                state.fraction += ratio as f32;
                while state.fraction >= 1.0 {
                    state.fraction -= 1.0;
                    let value = source.next_sample(state, ctx.memory).unwrap_or(0.0);
                    state.source_samples = [state.source_samples[1], value];
                }
                let [previous, current] = state.source_samples;
                let value = previous + (current - previous) * state.fraction;
                *sample = value;
                last = value;
            }
        }
        state.previous_sample = last;
    }
}

#[derive(Clone, Copy)]
enum SourceFormat {
    PcmInt16 {
        channel_index: u8,
        channel_count: u8,
    },
    Adpcm {
        coefficients: AdpcmCoefficients,
    },
}

/// Sequential sample reader over a voice's wave buffer chain.
#[derive(Clone, Copy)]
struct PcmSource<'a> {
    format: SourceFormat,
    wave_buffers: &'a [DspWaveBuffer; 4],
}

impl PcmSource<'_> {
    /// Next source sample, advancing buffer position/loop state. `None`
    /// once the queue is exhausted.
    fn next_sample(&self, state: &mut VoiceDspState, memory: &mut dyn GuestMemory) -> Option<f32> {
        // Bounded: at worst every queued buffer is skipped once.
        for _ in 0..=self.wave_buffers.len() {
            let wave_buffer = &self.wave_buffers[state.wave_buffer_index % self.wave_buffers.len()];
            if !wave_buffer.is_valid {
                return None;
            }
            let total = u64::from(
                wave_buffer
                    .end_sample_offset
                    .saturating_sub(wave_buffer.start_sample_offset),
            );
            if state.offset_in_frame_samples >= total {
                if wave_buffer.should_loop {
                    state.offset_in_frame_samples = 0;
                    self.reload_loop_context(state, wave_buffer, memory);
                    continue;
                }
                state.offset_in_frame_samples = 0;
                state.played_wave_buffers_count += 1;
                state.wave_buffer_index = (state.wave_buffer_index + 1) % self.wave_buffers.len();
                state.adpcm = Default::default();
                continue;
            }

            let position = u64::from(wave_buffer.start_sample_offset) + state.offset_in_frame_samples;
            let value = match self.format {
                SourceFormat::PcmInt16 {
                    channel_index,
                    channel_count,
                } => {
                    let offset =
                        (position * u64::from(channel_count) + u64::from(channel_index)) * 2;
                    if offset + 2 > wave_buffer.size {
                        return None;
                    }
                    let raw = memory.read_u16_le(wave_buffer.address + offset).ok()? as i16;
                    f32::from(raw) / 32768.0
                }
                SourceFormat::Adpcm { coefficients } => {
                    self.decode_adpcm_at(state, wave_buffer, memory, &coefficients, position)?
                }
            };

            state.offset_in_frame_samples += 1;
            state.played_sample_count += 1;
            return Some(value);
        }
        None
    }

    fn decode_adpcm_at(
        &self,
        state: &mut VoiceDspState,
        wave_buffer: &DspWaveBuffer,
        memory: &mut dyn GuestMemory,
        coefficients: &AdpcmCoefficients,
        position: u64,
    ) -> Option<f32> {
        let (frame_byte, within) = frame_position(position);
        if within == 0 {
            // New frame: consume the header byte.
            if frame_byte >= wave_buffer.size {
                return None;
            }
            let header = memory.read_u8(wave_buffer.address + frame_byte).ok()?;
            let mut decoder = AdpcmDecoder {
                predictor_scale: state.adpcm.predictor_scale,
                history: state.adpcm.history,
            };
            decoder.set_header(header);
            state.adpcm.predictor_scale = decoder.predictor_scale;
        }

        // Nibbles follow the header, high nibble first.
        let nibble_index = within;
        let byte_offset = frame_byte + 1 + nibble_index / 2;
        if byte_offset >= wave_buffer.size {
            return None;
        }
        let byte = memory.read_u8(wave_buffer.address + byte_offset).ok()?;
        let nibble = if nibble_index % 2 == 0 {
            byte >> 4
        } else {
            byte & 0xF
        };

        let mut decoder = AdpcmDecoder {
            predictor_scale: state.adpcm.predictor_scale,
            history: state.adpcm.history,
        };
        let sample = decoder.decode_nibble(coefficients, nibble);
        state.adpcm.predictor_scale = decoder.predictor_scale;
        state.adpcm.history = decoder.history;
        Some(f32::from(sample) / 32768.0)
    }

    fn reload_loop_context(
        &self,
        state: &mut VoiceDspState,
        wave_buffer: &DspWaveBuffer,
        memory: &mut dyn GuestMemory,
    ) {
        if !matches!(self.format, SourceFormat::Adpcm { .. }) {
            return;
        }
        if wave_buffer.context_address == 0 || wave_buffer.context_size < 6 {
            // No context queued (pre-bugfix guests): the decoder keeps its
            // rolling state across the loop point.
            return;
        }
        let mut bytes = [0u8; 6];
        if memory.read_into(wave_buffer.context_address, &mut bytes).is_ok() {
            state.adpcm.predictor_scale = u16::from_le_bytes([bytes[0], bytes[1]]);
            state.adpcm.history = [
                i16::from_le_bytes([bytes[2], bytes[3]]),
                i16::from_le_bytes([bytes[4], bytes[5]]),
            ];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BufferIndexList, CommandList, NullRenderDevice};
    use crate::tick::ManualTickSource;
    use audren_mem::{GuestMemory, LinearGuestMemory};

    fn run(
        list: &CommandList,
        memory: &mut LinearGuestMemory,
        voice_states: &mut [VoiceDspState],
    ) -> CommandProcessor {
        let mut processor = CommandProcessor::new();
        let tick = ManualTickSource::new();
        let mut device = NullRenderDevice::default();
        let mut effect_states = vec![EffectDspState::default(); 4];
        let mut sink_states = vec![CircularSinkDspState::default(); 4];
        processor.process(
            list,
            ProcessContext {
                memory,
                device: &mut device,
                voice_states,
                effect_states: &mut effect_states,
                sink_states: &mut sink_states,
                perf: None,
                tick: &tick,
            },
        );
        processor
    }

    fn pcm16_wave_buffer(address: u64, samples: &[i16], memory: &mut LinearGuestMemory) -> DspWaveBuffer {
        for (i, &sample) in samples.iter().enumerate() {
            memory.write_u16_le(address + i as u64 * 2, sample as u16).unwrap();
        }
        DspWaveBuffer {
            address,
            size: samples.len() as u64 * 2,
            start_sample_offset: 0,
            end_sample_offset: samples.len() as u32,
            should_loop: false,
            is_end_of_stream: false,
            context_address: 0,
            context_size: 0,
            is_valid: true,
        }
    }

    #[test]
    fn pcm16_decode_fills_the_output_buffer() {
        let mut memory = LinearGuestMemory::new(0x1000);
        let samples: Vec<i16> = (0..300).map(|i| (i * 100) as i16).collect();
        let wave_buffer = pcm16_wave_buffer(0x100, &samples, &mut memory);

        let mut list = CommandList::new(2, 240);
        let mut wave_buffers = [DspWaveBuffer::default(); 4];
        wave_buffers[0] = wave_buffer;
        list.push(
            0,
            CommandKind::PcmInt16DataSource {
                output_index: 1,
                state_index: 0,
                sample_rate: 48_000,
                pitch: 1.0,
                channel_index: 0,
                channel_count: 1,
                decoding_behaviour: Default::default(),
                wave_buffers,
            },
        );

        let mut states = vec![VoiceDspState::default()];
        let processor = run(&list, &mut memory, &mut states);

        let out = processor.buffer(1);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 100.0 / 32768.0).abs() < 1e-6);
        assert!((out[239] - 23_900.0 / 32768.0).abs() < 1e-6);
        assert_eq!(states[0].played_sample_count, 240);
    }

    #[test]
    fn exhausted_wave_buffers_render_silence() {
        let mut memory = LinearGuestMemory::new(0x1000);
        let samples: Vec<i16> = vec![1000; 100];
        let wave_buffer = pcm16_wave_buffer(0x100, &samples, &mut memory);

        let mut list = CommandList::new(1, 240);
        let mut wave_buffers = [DspWaveBuffer::default(); 4];
        wave_buffers[0] = wave_buffer;
        list.push(
            0,
            CommandKind::PcmInt16DataSource {
                output_index: 0,
                state_index: 0,
                sample_rate: 48_000,
                pitch: 1.0,
                channel_index: 0,
                channel_count: 1,
                decoding_behaviour: Default::default(),
                wave_buffers,
            },
        );

        let mut states = vec![VoiceDspState::default()];
        let processor = run(&list, &mut memory, &mut states);

        let out = processor.buffer(0);
        assert!(out[..100].iter().all(|&s| s != 0.0));
        assert!(out[100..].iter().all(|&s| s == 0.0));
        assert_eq!(states[0].played_sample_count, 100);
        assert_eq!(states[0].played_wave_buffers_count, 1);
    }

    #[test]
    fn looping_wave_buffer_repeats_without_exhausting() {
        let mut memory = LinearGuestMemory::new(0x1000);
        let samples: Vec<i16> = (0..50).map(|i| (i + 1) as i16 * 10).collect();
        let mut wave_buffer = pcm16_wave_buffer(0x100, &samples, &mut memory);
        wave_buffer.should_loop = true;

        let mut list = CommandList::new(1, 240);
        let mut wave_buffers = [DspWaveBuffer::default(); 4];
        wave_buffers[0] = wave_buffer;
        list.push(
            0,
            CommandKind::PcmInt16DataSource {
                output_index: 0,
                state_index: 0,
                sample_rate: 48_000,
                pitch: 1.0,
                channel_index: 0,
                channel_count: 1,
                decoding_behaviour: Default::default(),
                wave_buffers,
            },
        );

        let mut states = vec![VoiceDspState::default()];
        let processor = run(&list, &mut memory, &mut states);

        let out = processor.buffer(0);
        assert_eq!(out[0], out[50]);
        assert_eq!(out[49], out[99]);
        assert!(out.iter().all(|&s| s != 0.0));
    }

    #[test]
    fn mix_ramp_accumulates_with_ramped_volume() {
        let mut memory = LinearGuestMemory::new(0x100);
        let mut list = CommandList::new(2, 4);
        list.push(
            0,
            CommandKind::MixRamp {
                input_index: 0,
                output_index: 1,
                volume0: 0.0,
                volume1: 1.0,
            },
        );

        let mut states = vec![VoiceDspState::default()];
        let mut processor = CommandProcessor::new();
        let tick = ManualTickSource::new();
        let mut device = NullRenderDevice::default();
        let mut effect_states = vec![];
        let mut sink_states = vec![];

        // Pre-seed the input buffer with ones.
        processor.sample_count = 4;
        processor.samples = vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        processor.scratch = vec![0.0; 4];

        for command in list.commands() {
            processor.process_command(
                command,
                &mut ProcessContext {
                    memory: &mut memory,
                    device: &mut device,
                    voice_states: &mut states,
                    effect_states: &mut effect_states,
                    sink_states: &mut sink_states,
                    perf: None,
                    tick: &tick,
                },
                0,
                0,
            );
        }

        let out = processor.buffer(1);
        assert!((out[0] - 0.25).abs() < 1e-6);
        assert!((out[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn depop_bleeds_decaying_energy_into_mix_buffers() {
        let mut memory = LinearGuestMemory::new(0x100);
        let mut list = CommandList::new(1, 8);
        let mut targets = BufferIndexList::default();
        targets.push(0);
        list.push(0, CommandKind::ClearMixBuffer);
        list.push(
            0,
            CommandKind::DepopPrepare {
                state_index: 0,
                targets,
            },
        );
        list.push(
            0,
            CommandKind::DepopForMixBuffers {
                buffer_offset: 0,
                buffer_count: 1,
                sample_rate: 48_000,
            },
        );

        let mut states = vec![VoiceDspState::default()];
        states[0].previous_sample = 0.5;
        let processor = run(&list, &mut memory, &mut states);

        let out = processor.buffer(0);
        assert!(out[0] > 0.0);
        assert!(out[7] < out[0]);
        assert_eq!(states[0].previous_sample, 0.0);
    }

    #[test]
    fn circular_sink_writes_pcm16_and_advances_offset() {
        let mut memory = LinearGuestMemory::new(0x4000);
        let mut list = CommandList::new(1, 4);
        list.push(
            0,
            CommandKind::CircularBufferSink {
                sink_index: 0,
                inputs: [0, 0, 0, 0, 0, 0],
                input_count: 1,
                address: 0x1000,
                size: 0x20,
            },
        );

        let mut processor = CommandProcessor::new();
        let tick = ManualTickSource::new();
        let mut device = NullRenderDevice::default();
        let mut states = vec![VoiceDspState::default()];
        let mut effect_states = vec![];
        let mut sink_states = vec![CircularSinkDspState::default()];

        processor.sample_count = 4;
        processor.samples = vec![0.5, -0.5, 0.25, 1.0];
        processor.scratch = vec![0.0; 4];
        processor.depop = vec![0.0; 1];

        for command in list.commands() {
            processor.process_command(
                command,
                &mut ProcessContext {
                    memory: &mut memory,
                    device: &mut device,
                    voice_states: &mut states,
                    effect_states: &mut effect_states,
                    sink_states: &mut sink_states,
                    perf: None,
                    tick: &tick,
                },
                0,
                0,
            );
        }

        assert_eq!(memory.read_u16_le(0x1000).unwrap() as i16, 16384);
        assert_eq!(memory.read_u16_le(0x1002).unwrap() as i16, -16384);
        assert_eq!(memory.read_u16_le(0x1006).unwrap() as i16, 32767);
        assert_eq!(sink_states[0].current_offset, 8);
        assert_eq!(sink_states[0].last_written_offset, 8);
    }
}
