//! Sink server state: final output nodes of the mix graph.

use crate::behaviour::BehaviourContext;
use crate::pool::{AddressInfo, MemoryPoolState, PoolMapper};
use crate::wire::sink::{
    CircularBufferSinkParameter, DeviceSinkParameter, SinkInParameter, SinkOutStatus,
    SINK_TYPE_CIRCULAR_BUFFER, SINK_TYPE_DEVICE, SINK_TYPE_INVALID,
};
use crate::wire::{read_wire, ErrorInfo};

#[derive(Debug, Clone, Default)]
pub enum SinkParameters {
    #[default]
    None,
    Device(DeviceSinkParameter),
    CircularBuffer {
        parameter: CircularBufferSinkParameter,
        buffer: AddressInfo,
        /// Write head within the guest ring, in bytes.
        current_offset: u32,
        last_written_offset: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SinkState {
    pub in_use: bool,
    pub node_id: u32,
    pub parameters: SinkParameters,
}

impl SinkState {
    pub fn update(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &SinkInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        self.node_id = parameter.node_id;
        self.in_use = parameter.is_used != 0;
        if !self.in_use || parameter.sink_type == SINK_TYPE_INVALID {
            self.in_use = false;
            self.parameters = SinkParameters::None;
            return;
        }

        match parameter.sink_type {
            SINK_TYPE_DEVICE => {
                if let Some(specific) = read_wire::<DeviceSinkParameter>(&parameter.specific_data) {
                    self.parameters = SinkParameters::Device(specific);
                }
            }
            SINK_TYPE_CIRCULAR_BUFFER => {
                self.update_circular_buffer(behaviour, parameter, mapper, pools);
            }
            other => {
                log::debug!("sink update rejected: unknown type {other}");
                self.in_use = false;
                self.parameters = SinkParameters::None;
            }
        }
    }

    fn update_circular_buffer(
        &mut self,
        behaviour: &mut BehaviourContext,
        parameter: &SinkInParameter,
        mapper: &PoolMapper,
        pools: &[MemoryPoolState],
    ) {
        let Some(specific) = read_wire::<CircularBufferSinkParameter>(&parameter.specific_data)
        else {
            return;
        };
        if specific.in_use == 0 || specific.address == 0 || specific.size == 0 {
            self.in_use = false;
            self.parameters = SinkParameters::None;
            return;
        }

        // Keep the write head when the guest resubmits the same ring.
        let (previous_offset, previous_written) = match &self.parameters {
            SinkParameters::CircularBuffer {
                parameter: old,
                current_offset,
                last_written_offset,
                ..
            } if old.address == specific.address && old.size == specific.size => {
                (*current_offset, *last_written_offset)
            }
            _ => (0, 0),
        };

        let mut buffer = AddressInfo::default();
        let (ok, error) =
            mapper.try_attach_buffer(&mut buffer, pools, specific.address, u64::from(specific.size));
        if error != ErrorInfo::default() {
            behaviour.append_error(error);
        }
        if !ok {
            self.in_use = false;
            self.parameters = SinkParameters::None;
            return;
        }

        self.parameters = SinkParameters::CircularBuffer {
            parameter: specific,
            buffer,
            current_offset: previous_offset,
            last_written_offset: previous_written,
        };
    }

    /// Reserved bytes stay zero: the guest reads them.
    pub fn write_out_status(&self) -> SinkOutStatus {
        let last_written_offset = match &self.parameters {
            SinkParameters::CircularBuffer {
                last_written_offset, ..
            } => *last_written_offset,
            _ => 0,
        };
        SinkOutStatus {
            last_written_offset,
            reserved1: 0,
            reserved2: [0; 24],
        }
    }
}
