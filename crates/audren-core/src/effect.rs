//! Effect server state.
//!
//! Each effect hangs off one mix and is processed in that mix's
//! `processing_order`. Guest-supplied work areas (aux rings, delay lines)
//! attach through the pool mapper like every other DSP-visible buffer.

use crate::behaviour::BehaviourContext;
use crate::pool::{AddressInfo, MemoryPoolState, PoolMapper};
use crate::wire::effect::{
    AuxParameter, BiquadFilterEffectParameter, BufferMixParameter, DelayParameter,
    EffectInParameter, EffectOutStatus, EFFECT_STATE_DISABLED, EFFECT_STATE_ENABLED,
    EFFECT_STATE_INVALID, EFFECT_STATE_NEW, EFFECT_TYPE_AUX, EFFECT_TYPE_BIQUAD_FILTER,
    EFFECT_TYPE_BUFFER_MIX, EFFECT_TYPE_DELAY, EFFECT_TYPE_INVALID,
};
use crate::wire::{read_wire, ErrorInfo};

/// Parsed type-specific parameters plus their attached buffers.
#[derive(Debug, Clone, Default)]
pub enum EffectParameters {
    #[default]
    None,
    BufferMix(BufferMixParameter),
    Aux {
        parameter: AuxParameter,
        send_info: AddressInfo,
        send_buffer: AddressInfo,
        return_info: AddressInfo,
        return_buffer: AddressInfo,
    },
    Delay {
        parameter: DelayParameter,
        /// Delay line storage in the guest work area.
        work_buffer: AddressInfo,
    },
    BiquadFilter(BiquadFilterEffectParameter),
}

#[derive(Debug, Clone, Default)]
pub struct EffectState {
    pub in_use: bool,
    pub is_new: bool,
    pub enabled: bool,
    pub mix_id: u32,
    pub processing_order: u32,
    pub parameters: EffectParameters,
    /// Set when the processing state must be rebuilt before the next run.
    pub needs_state_reset: bool,
    usage: u8,
}

impl EffectState {
    /// Applies one frame's effect parameter block. Invalid entries are
    /// skipped without touching the previous state.
    pub fn update(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &EffectInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        if parameter.effect_type == EFFECT_TYPE_INVALID {
            self.in_use = false;
            self.enabled = false;
            self.usage = EFFECT_STATE_INVALID;
            self.parameters = EffectParameters::None;
            return;
        }

        self.is_new = parameter.is_new != 0;
        self.in_use = true;
        self.enabled = parameter.is_enabled != 0;
        self.mix_id = parameter.mix_id;
        self.processing_order = parameter.processing_order;
        if self.is_new {
            self.usage = EFFECT_STATE_NEW;
            self.needs_state_reset = true;
        }

        match parameter.effect_type {
            EFFECT_TYPE_BUFFER_MIX => {
                if let Some(specific) = read_wire::<BufferMixParameter>(&parameter.specific_data) {
                    self.parameters = EffectParameters::BufferMix(specific);
                }
            }
            EFFECT_TYPE_AUX => self.update_aux(behaviour, parameter, mapper, pools),
            EFFECT_TYPE_DELAY => self.update_delay(behaviour, parameter, mapper, pools),
            EFFECT_TYPE_BIQUAD_FILTER => {
                if let Some(specific) =
                    read_wire::<BiquadFilterEffectParameter>(&parameter.specific_data)
                {
                    use crate::wire::effect::PARAMETER_STATUS_NEW;
                    if specific.status == PARAMETER_STATUS_NEW {
                        self.needs_state_reset = true;
                    }
                    self.parameters = EffectParameters::BiquadFilter(specific);
                }
            }
            other => {
                log::debug!("effect update rejected: unknown type {other}");
                self.in_use = false;
                self.usage = EFFECT_STATE_INVALID;
            }
        }
    }

    fn update_aux(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &EffectInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        let Some(specific) = read_wire::<AuxParameter>(&parameter.specific_data) else {
            return;
        };

        let mut send_info = AddressInfo::default();
        let mut send_buffer = AddressInfo::default();
        let mut return_info = AddressInfo::default();
        let mut return_buffer = AddressInfo::default();
        let mut ok = true;

        if self.enabled {
            let storage = u64::from(specific.buffer_storage_size);
            for (info, address, size) in [
                (&mut send_info, specific.send_buffer_info_address, 0x40),
                (&mut send_buffer, specific.send_buffer_base_address, storage),
                (&mut return_info, specific.return_buffer_info_address, 0x40),
                (&mut return_buffer, specific.return_buffer_base_address, storage),
            ] {
                let (attached, error) = mapper.try_attach_buffer(info, pools, address, size);
                if error != ErrorInfo::default() {
                    behaviour.append_error(error);
                }
                ok &= attached;
            }
        }

        if !ok {
            // The effect stays registered but renders as a pass-through
            // until the guest supplies reachable buffers.
            self.enabled = false;
        }
        self.parameters = EffectParameters::Aux {
            parameter: specific,
            send_info,
            send_buffer,
            return_info,
            return_buffer,
        };
    }

    fn update_delay(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &EffectInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        let Some(specific) = read_wire::<DelayParameter>(&parameter.specific_data) else {
            return;
        };

        use crate::wire::effect::PARAMETER_STATUS_NEW;
        if specific.status == PARAMETER_STATUS_NEW {
            self.needs_state_reset = true;
        }

        let mut work_buffer = AddressInfo::default();
        if parameter.buffer_base != 0 && parameter.buffer_size != 0 {
            let (ok, error) = mapper.try_attach_buffer(
                &mut work_buffer,
                pools,
                parameter.buffer_base,
                parameter.buffer_size,
            );
            if error != ErrorInfo::default() {
                behaviour.append_error(error);
            }
            if !ok {
                self.enabled = false;
            }
        }

        self.parameters = EffectParameters::Delay {
            parameter: specific,
            work_buffer,
        };
    }

    /// Out-status state machine: `New` is reported once, then the effect
    /// settles into enabled/disabled.
    pub fn write_out_status(&mut self) -> EffectOutStatus {
        let state = match self.usage {
            EFFECT_STATE_NEW => {
                self.usage = if self.enabled {
                    EFFECT_STATE_ENABLED
                } else {
                    EFFECT_STATE_DISABLED
                };
                EFFECT_STATE_NEW
            }
            _ if !self.in_use => EFFECT_STATE_INVALID,
            _ => {
                self.usage = if self.enabled {
                    EFFECT_STATE_ENABLED
                } else {
                    EFFECT_STATE_DISABLED
                };
                self.usage
            }
        };
        EffectOutStatus {
            state,
            reserved: [0; 15],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{BASE_REVISION_MAGIC, REVISION_5};
    use crate::pool::MemoryPoolLocation;

    fn behaviour_at(revision: u32) -> BehaviourContext {
        let mut ctx = BehaviourContext::new();
        ctx.set_user_revision(BASE_REVISION_MAGIC + revision);
        ctx
    }

    fn pools() -> Vec<MemoryPoolState> {
        let mut pool = MemoryPoolState::new(MemoryPoolLocation::Cpu);
        pool.set_cpu_address(0x1000_0000, 0x10_0000);
        PoolMapper::new(false).map(&mut pool);
        vec![pool]
    }

    fn aux_parameter(send: u64, ret: u64) -> EffectInParameter {
        let mut parameter = EffectInParameter {
            effect_type: EFFECT_TYPE_AUX,
            is_new: 1,
            is_enabled: 1,
            mix_id: 0,
            ..Default::default()
        };
        let specific = AuxParameter {
            input: [0; 24],
            output: [0; 24],
            mix_count: 2,
            reserved1: 0,
            send_buffer_info_address: send,
            send_buffer_base_address: send + 0x40,
            return_buffer_info_address: ret,
            return_buffer_base_address: ret + 0x40,
            channel_count: 2,
            sample_rate: 48_000,
            buffer_storage_size: 0x1000,
            reserved2: 0,
        };
        parameter.specific_data[..core::mem::size_of::<AuxParameter>()]
            .copy_from_slice(bytemuck::bytes_of(&specific));
        parameter
    }

    #[test]
    fn aux_effect_attaches_all_four_buffers() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut effect = EffectState::default();

        effect.update(&mut behaviour, &aux_parameter(0x1000_0000, 0x1000_8000), &mapper, &pools());
        assert!(effect.enabled);
        match &effect.parameters {
            EffectParameters::Aux { send_buffer, return_buffer, .. } => {
                assert!(send_buffer.has_memory_pool_state());
                assert!(return_buffer.has_memory_pool_state());
            }
            other => panic!("unexpected parameters: {other:?}"),
        }
        assert_eq!(behaviour.copy_error_info().error_info_count, 0);
    }

    #[test]
    fn aux_effect_with_unreachable_buffers_degrades_to_passthrough() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut effect = EffectState::default();

        effect.update(&mut behaviour, &aux_parameter(0x9000_0000, 0x9100_0000), &mapper, &pools());
        assert!(effect.in_use);
        assert!(!effect.enabled);
        assert!(behaviour.copy_error_info().error_info_count > 0);
    }

    #[test]
    fn out_status_reports_new_exactly_once() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut effect = EffectState::default();

        let mut parameter = EffectInParameter {
            effect_type: EFFECT_TYPE_BUFFER_MIX,
            is_new: 1,
            is_enabled: 1,
            ..Default::default()
        };
        let specific = BufferMixParameter {
            input: [0; 24],
            output: [0; 24],
            volumes: [1.0; 24],
            mix_count: 1,
        };
        parameter.specific_data[..core::mem::size_of::<BufferMixParameter>()]
            .copy_from_slice(bytemuck::bytes_of(&specific));

        effect.update(&mut behaviour, &parameter, &mapper, &[]);
        assert_eq!(effect.write_out_status().state, EFFECT_STATE_NEW);
        assert_eq!(effect.write_out_status().state, EFFECT_STATE_ENABLED);

        parameter.is_new = 0;
        parameter.is_enabled = 0;
        effect.update(&mut behaviour, &parameter, &mapper, &[]);
        assert_eq!(effect.write_out_status().state, EFFECT_STATE_DISABLED);
    }

    #[test]
    fn invalid_type_clears_the_slot() {
        let mut behaviour = behaviour_at(REVISION_5);
        let mapper = PoolMapper::new(false);
        let mut effect = EffectState::default();

        effect.update(&mut behaviour, &EffectInParameter::default(), &mapper, &[]);
        assert!(!effect.in_use);
        assert_eq!(effect.write_out_status().state, EFFECT_STATE_INVALID);
    }
}
