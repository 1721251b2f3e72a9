//! Per-frame parameter blob walk.
//!
//! The input and output blobs both start with an `UpdateDataHeader`; each
//! subsystem region follows in a fixed order. Region sizes must agree with
//! the header or the frame's update is rejected as a whole — within a
//! well-formed region, invalid entries are skipped per entity instead.

use crate::behaviour::BehaviourContext;
use crate::effect::EffectState;
use crate::error::UpdateError;
use crate::mix::MixContext;
use crate::perf::PerformanceManager;
use crate::pool::{MemoryPoolState, PoolMapper};
use crate::sink::SinkState;
use crate::splitter::SplitterContext;
use crate::voice::{VoiceChannelResource, VoiceDspState, VoiceState};
use crate::wire::effect::{EffectInParameter, EffectOutStatus};
use crate::wire::perf::{PerformanceInParameter, PerformanceOutStatus};
use crate::wire::sink::{SinkInParameter, SinkOutStatus};
use crate::wire::voice::{VoiceChannelResourceInParameter, VoiceInParameter, VoiceOutStatus};
use crate::wire::{
    read_wire, write_wire, BehaviourInParameter, MemoryPoolInParameter, RenderInfoOutStatus,
    UpdateDataHeader,
};
use crate::VOICE_CHANNEL_COUNT_MAX;

pub struct StateUpdater<'a> {
    input: &'a [u8],
    output: &'a mut [u8],
    in_offset: usize,
    header: UpdateDataHeader,
    out_header: UpdateDataHeader,
    out_offset: usize,
}

impl<'a> StateUpdater<'a> {
    pub fn new(input: &'a [u8], output: &'a mut [u8]) -> Result<Self, UpdateError> {
        let header = read_wire::<UpdateDataHeader>(input).ok_or(UpdateError::InputTooShort {
            claimed: core::mem::size_of::<UpdateDataHeader>(),
            actual: input.len(),
        })?;
        if header.total_size as usize > input.len() {
            return Err(UpdateError::InputTooShort {
                claimed: header.total_size as usize,
                actual: input.len(),
            });
        }
        if output.len() < core::mem::size_of::<UpdateDataHeader>() {
            return Err(UpdateError::OutputTooShort {
                required: core::mem::size_of::<UpdateDataHeader>(),
                actual: output.len(),
            });
        }

        let out_header = UpdateDataHeader {
            revision: header.revision,
            ..Default::default()
        };
        Ok(Self {
            input,
            output,
            in_offset: core::mem::size_of::<UpdateDataHeader>(),
            header,
            out_header,
            out_offset: core::mem::size_of::<UpdateDataHeader>(),
        })
    }

    fn in_region(&self, size: usize) -> &'a [u8] {
        let start = self.in_offset.min(self.input.len());
        let end = (self.in_offset + size).min(self.input.len());
        &self.input[start..end]
    }

    fn write_out<T: bytemuck::Pod>(&mut self, value: &T) -> Result<(), UpdateError> {
        let size = core::mem::size_of::<T>();
        let out_len = self.output.len();
        write_wire(&mut self.output[self.out_offset.min(out_len)..], value).ok_or(
            UpdateError::OutputTooShort {
                required: self.out_offset + size,
                actual: self.output.len(),
            },
        )?;
        self.out_offset += size;
        Ok(())
    }

    pub fn update_behaviour(
        &mut self,
        behaviour: &mut BehaviourContext,
    ) -> Result<(), UpdateError> {
        let expected = core::mem::size_of::<BehaviourInParameter>();
        if self.header.behaviour_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "behaviour",
                claimed: self.header.behaviour_size as usize,
                consumed: expected,
            });
        }
        let parameter =
            read_wire::<BehaviourInParameter>(self.in_region(expected)).ok_or_else(|| {
                UpdateError::InputTooShort {
                    claimed: self.in_offset + expected,
                    actual: self.input.len(),
                }
            })?;
        behaviour.set_user_revision(parameter.user_revision);
        behaviour.update_flags(parameter.flags);
        self.in_offset += expected;
        Ok(())
    }

    /// Guest-visible pools only: slot 0 is the internal system pool.
    pub fn update_memory_pools(
        &mut self,
        mapper: &PoolMapper,
        pools: &mut [MemoryPoolState],
    ) -> Result<(), UpdateError> {
        let count = pools.len().saturating_sub(1);
        let entry = core::mem::size_of::<MemoryPoolInParameter>();
        let expected = count * entry;
        if self.header.memory_pools_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "memory pools",
                claimed: self.header.memory_pools_size as usize,
                consumed: expected,
            });
        }

        for index in 0..count {
            let region = self.in_region(entry);
            let Some(parameter) = read_wire::<MemoryPoolInParameter>(region) else {
                return Err(UpdateError::InputTooShort {
                    claimed: self.in_offset + entry,
                    actual: self.input.len(),
                });
            };
            self.in_offset += entry;

            let (_, out) = mapper.update(&mut pools[index + 1], &parameter);
            self.write_out(&out)?;
            self.out_header.memory_pools_size += core::mem::size_of_val(&out) as u32;
        }
        Ok(())
    }

    pub fn update_voice_channel_resources(
        &mut self,
        resources: &mut [VoiceChannelResource],
    ) -> Result<(), UpdateError> {
        let entry = core::mem::size_of::<VoiceChannelResourceInParameter>();
        let expected = resources.len() * entry;
        if self.header.voice_resources_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "voice channel resources",
                claimed: self.header.voice_resources_size as usize,
                consumed: expected,
            });
        }
        for resource in resources.iter_mut() {
            let Some(parameter) = read_wire::<VoiceChannelResourceInParameter>(self.in_region(entry))
            else {
                return Err(UpdateError::InputTooShort {
                    claimed: self.in_offset + entry,
                    actual: self.input.len(),
                });
            };
            self.in_offset += entry;
            resource.update(&parameter);
        }
        Ok(())
    }

    pub fn update_voices(
        &mut self,
        behaviour: &mut BehaviourContext,
        voices: &mut [VoiceState],
        dsp_states: &mut [VoiceDspState],
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) -> Result<(), UpdateError> {
        let entry = core::mem::size_of::<VoiceInParameter>();
        let expected = voices.len() * entry;
        if self.header.voices_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "voices",
                claimed: self.header.voices_size as usize,
                consumed: expected,
            });
        }

        for (index, voice) in voices.iter_mut().enumerate() {
            let Some(parameter) = read_wire::<VoiceInParameter>(self.in_region(entry)) else {
                return Err(UpdateError::InputTooShort {
                    claimed: self.in_offset + entry,
                    actual: self.input.len(),
                });
            };
            self.in_offset += entry;

            voice.update(behaviour, &parameter, mapper, pools);

            if voice.is_new {
                let keep = voice.decoding_behaviour.contains(
                    crate::voice::DecodingBehaviourFlags::SKIP_PLAYED_SAMPLE_COUNT_RESET,
                );
                for channel in 0..VOICE_CHANNEL_COUNT_MAX {
                    dsp_states[index * VOICE_CHANNEL_COUNT_MAX + channel].reset(keep);
                }
            }

            let out = voice.write_out_status(&dsp_states[index * VOICE_CHANNEL_COUNT_MAX]);
            self.write_out(&out)?;
            self.out_header.voices_size += core::mem::size_of::<VoiceOutStatus>() as u32;
        }
        Ok(())
    }

    pub fn update_effects(
        &mut self,
        behaviour: &mut BehaviourContext,
        effects: &mut [EffectState],
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) -> Result<(), UpdateError> {
        let entry = core::mem::size_of::<EffectInParameter>();
        let expected = effects.len() * entry;
        if self.header.effects_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "effects",
                claimed: self.header.effects_size as usize,
                consumed: expected,
            });
        }
        for effect in effects.iter_mut() {
            let Some(parameter) = read_wire::<EffectInParameter>(self.in_region(entry)) else {
                return Err(UpdateError::InputTooShort {
                    claimed: self.in_offset + entry,
                    actual: self.input.len(),
                });
            };
            self.in_offset += entry;
            effect.update(behaviour, &parameter, mapper, pools);

            let out = effect.write_out_status();
            self.write_out(&out)?;
            self.out_header.effects_size += core::mem::size_of::<EffectOutStatus>() as u32;
        }
        Ok(())
    }

    /// Splitter input is self-sized. A corrupt region consumes nothing and
    /// reports `false`; the caller skips the rest of this frame's input but
    /// still renders.
    pub fn update_splitter(
        &mut self,
        behaviour: &BehaviourContext,
        splitter: &mut SplitterContext,
    ) -> bool {
        let remaining = &self.input[self.in_offset.min(self.input.len())..];
        let (ok, consumed) = splitter.update(behaviour, remaining);
        self.in_offset += consumed;
        ok
    }

    pub fn update_mixes(
        &mut self,
        behaviour: &BehaviourContext,
        mixes: &mut MixContext,
    ) -> Result<(), UpdateError> {
        let claimed = self.header.mixes_size as usize;
        let region = self.in_region(claimed);
        let consumed = mixes
            .update(behaviour, region)
            .ok_or(UpdateError::RegionSizeMismatch {
                region: "mixes",
                claimed,
                consumed: 0,
            })?;
        if consumed != claimed {
            return Err(UpdateError::RegionSizeMismatch {
                region: "mixes",
                claimed,
                consumed,
            });
        }
        self.in_offset += consumed;
        Ok(())
    }

    pub fn update_sinks(
        &mut self,
        behaviour: &mut BehaviourContext,
        sinks: &mut [SinkState],
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) -> Result<(), UpdateError> {
        let entry = core::mem::size_of::<SinkInParameter>();
        let expected = sinks.len() * entry;
        if self.header.sinks_size as usize != expected {
            return Err(UpdateError::RegionSizeMismatch {
                region: "sinks",
                claimed: self.header.sinks_size as usize,
                consumed: expected,
            });
        }
        for sink in sinks.iter_mut() {
            let Some(parameter) = read_wire::<SinkInParameter>(self.in_region(entry)) else {
                return Err(UpdateError::InputTooShort {
                    claimed: self.in_offset + entry,
                    actual: self.input.len(),
                });
            };
            self.in_offset += entry;
            sink.update(behaviour, &parameter, mapper, pools);

            let out = sink.write_out_status();
            self.write_out(&out)?;
            self.out_header.sinks_size += core::mem::size_of::<SinkOutStatus>() as u32;
        }
        Ok(())
    }

    /// Emits sink out statuses from current state without consuming input;
    /// keeps the output layout stable when the input walk was cut short.
    pub fn write_sink_out_statuses(&mut self, sinks: &[SinkState]) -> Result<(), UpdateError> {
        for sink in sinks {
            let out = sink.write_out_status();
            self.write_out(&out)?;
            self.out_header.sinks_size += core::mem::size_of::<SinkOutStatus>() as u32;
        }
        Ok(())
    }

    pub fn update_performance(
        &mut self,
        perf: Option<&mut PerformanceManager>,
    ) -> Result<(), UpdateError> {
        let entry = core::mem::size_of::<PerformanceInParameter>();
        if self.header.performance_buffer_size as usize == 0 {
            return Ok(());
        }
        if (self.header.performance_buffer_size as usize) < entry {
            return Err(UpdateError::RegionSizeMismatch {
                region: "performance",
                claimed: self.header.performance_buffer_size as usize,
                consumed: entry,
            });
        }
        let Some(parameter) = read_wire::<PerformanceInParameter>(self.in_region(entry)) else {
            return Err(UpdateError::InputTooShort {
                claimed: self.in_offset + entry,
                actual: self.input.len(),
            });
        };
        self.in_offset += self.header.performance_buffer_size as usize;
        if let Some(perf) = perf {
            perf.set_target_node_id(parameter.target_node_id);
        }
        Ok(())
    }

    pub fn write_performance_out(&mut self, history_size: u32) -> Result<(), UpdateError> {
        let out = PerformanceOutStatus {
            history_size,
            reserved: [0; 3],
        };
        self.write_out(&out)?;
        self.out_header.performance_buffer_size += core::mem::size_of_val(&out) as u32;
        Ok(())
    }

    /// Trailer: behaviour error array, optional render info, final header.
    pub fn finish(
        mut self,
        behaviour: &mut BehaviourContext,
        elapsed_frame_count: u64,
    ) -> Result<(), UpdateError> {
        let errors = behaviour.copy_error_info();
        self.write_out(&errors)?;
        self.out_header.behaviour_size = core::mem::size_of_val(&errors) as u32;

        if behaviour.is_elapsed_frame_count_supported() {
            let info = RenderInfoOutStatus {
                elapsed_frame_count,
                reserved: 0,
            };
            self.write_out(&info)?;
            self.out_header.render_info_size = core::mem::size_of_val(&info) as u32;
        }

        self.out_header.total_size = self.out_offset as u32;
        let header = self.out_header;
        write_wire(self.output, &header).ok_or(UpdateError::OutputTooShort {
            required: core::mem::size_of::<UpdateDataHeader>(),
            actual: self.output.len(),
        })?;
        Ok(())
    }
}
