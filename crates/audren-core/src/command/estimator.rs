//! Command processing time estimation.
//!
//! The renderer prices the generated command list before running it; the
//! estimate drives voice dropping when a frame would blow its processing
//! time budget. Three estimator generations exist, selected by the
//! behaviour context; all share one table-driven shape with per-generation
//! constants. Costs are in DSP ticks.

use super::{Command, CommandKind};

#[derive(Debug, Clone, Copy)]
pub struct CommandTimeEstimator {
    version: u32,
    sample_count: u32,
}

impl CommandTimeEstimator {
    /// `version` comes from
    /// `BehaviourContext::command_processing_time_estimator_version`.
    pub fn new(version: u32, sample_count: u32) -> Self {
        Self {
            version: version.clamp(1, 3),
            sample_count,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Scales a per-240-samples base cost to the session's frame size.
    fn scaled(&self, base: u32) -> u32 {
        (u64::from(base) * u64::from(self.sample_count) / 240) as u32
    }

    /// Newer estimator generations price DSP work slightly higher, matching
    /// refined firmware measurements.
    fn generation_factor(&self) -> u32 {
        match self.version {
            1 => 16,
            2 => 18,
            _ => 19,
        }
    }

    pub fn estimate(&self, command: &Command) -> u32 {
        if !command.enabled {
            return 0;
        }
        let factor = self.generation_factor();
        let base = match &command.kind {
            CommandKind::ClearMixBuffer => 260,
            CommandKind::DepopPrepare { .. } => 144,
            CommandKind::DepopForMixBuffers { buffer_count, .. } => {
                120 + 28 * u32::from(*buffer_count)
            }
            CommandKind::PcmInt16DataSource { pitch, .. } => {
                if *pitch == 1.0 {
                    427
                } else {
                    710
                }
            }
            CommandKind::AdpcmDataSource { pitch, .. } => {
                if *pitch == 1.0 {
                    1296
                } else {
                    1848
                }
            }
            CommandKind::BiquadFilter { .. } => 300,
            CommandKind::Volume { .. } => 122,
            CommandKind::VolumeRamp { .. } => 148,
            CommandKind::Mix { .. } => 205,
            CommandKind::MixRamp { .. } => 238,
            CommandKind::BufferMixEffect { inputs, .. } => 180 * u32::from(inputs.count).max(1),
            CommandKind::AuxEffect { enabled, .. } => {
                if *enabled {
                    1204
                } else {
                    132
                }
            }
            CommandKind::DelayEffect {
                enabled,
                channel_count,
                ..
            } => {
                if *enabled {
                    760 * u32::from(*channel_count).max(1)
                } else {
                    160
                }
            }
            CommandKind::BiquadFilterEffect {
                enabled,
                channel_count,
                ..
            } => {
                if *enabled {
                    280 * u32::from(*channel_count).max(1)
                } else {
                    96
                }
            }
            CommandKind::CircularBufferSink { input_count, .. } => {
                320 + 128 * u32::from(*input_count)
            }
            CommandKind::DeviceSink { input_count, .. } => 480 + 160 * u32::from(*input_count),
            CommandKind::Performance { .. } => 48,
        };
        self.scaled(base) * factor / 16
    }

    pub fn estimate_list(&self, commands: &[Command]) -> u64 {
        commands.iter().map(|c| u64::from(self.estimate(c))).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandList;

    fn command(kind: CommandKind) -> Command {
        Command {
            node_id: 0,
            enabled: true,
            kind,
        }
    }

    #[test]
    fn later_generations_never_price_cheaper() {
        let kinds = [
            CommandKind::ClearMixBuffer,
            CommandKind::Volume {
                index: 0,
                volume: 1.0,
            },
            CommandKind::Mix {
                input_index: 0,
                output_index: 1,
                volume: 0.7,
            },
        ];
        for kind in kinds {
            let c = command(kind);
            let v1 = CommandTimeEstimator::new(1, 240).estimate(&c);
            let v2 = CommandTimeEstimator::new(2, 240).estimate(&c);
            let v3 = CommandTimeEstimator::new(3, 240).estimate(&c);
            assert!(v2 >= v1);
            assert!(v3 >= v2);
        }
    }

    #[test]
    fn pitched_sources_cost_more_than_unpitched() {
        let estimator = CommandTimeEstimator::new(2, 240);
        let unpitched = command(CommandKind::PcmInt16DataSource {
            output_index: 0,
            state_index: 0,
            sample_rate: 48_000,
            pitch: 1.0,
            channel_index: 0,
            channel_count: 1,
            decoding_behaviour: Default::default(),
            wave_buffers: Default::default(),
        });
        let pitched = command(CommandKind::PcmInt16DataSource {
            output_index: 0,
            state_index: 0,
            sample_rate: 32_000,
            pitch: 1.5,
            channel_index: 0,
            channel_count: 1,
            decoding_behaviour: Default::default(),
            wave_buffers: Default::default(),
        });
        assert!(estimator.estimate(&pitched) > estimator.estimate(&unpitched));
    }

    #[test]
    fn adding_commands_never_lowers_the_list_estimate() {
        let estimator = CommandTimeEstimator::new(3, 240);
        let mut list = CommandList::new(4, 240);
        let mut previous = 0u64;
        for i in 0..8u16 {
            list.push(
                0,
                CommandKind::Mix {
                    input_index: i,
                    output_index: 0,
                    volume: 0.5,
                },
            );
            let estimate = estimator.estimate_list(list.commands());
            assert!(estimate > previous);
            previous = estimate;
        }
    }

    #[test]
    fn estimates_scale_with_the_frame_sample_count() {
        let short = CommandTimeEstimator::new(2, 160);
        let long = CommandTimeEstimator::new(2, 240);
        let c = command(CommandKind::ClearMixBuffer);
        assert!(long.estimate(&c) > short.estimate(&c));
    }

    #[test]
    fn disabled_commands_cost_nothing() {
        let estimator = CommandTimeEstimator::new(2, 240);
        let mut c = command(CommandKind::ClearMixBuffer);
        c.enabled = false;
        assert_eq!(estimator.estimate(&c), 0);
    }
}
