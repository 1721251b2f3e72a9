//! Guest memory pools and the pool mapper.
//!
//! The guest registers memory regions for DSP access; every buffer a voice,
//! effect or sink hands the renderer must fall inside one of them (unless
//! force-mapping is on). `MemoryPoolState::contains` is the sole safety gate
//! before any DSP access, so its end-address math is exact by contract.

use crate::error::ResultCode;
use crate::wire::{
    ErrorInfo, MemoryPoolInParameter, MemoryPoolOutStatus, MEMORY_POOL_STATE_ATTACHED,
    MEMORY_POOL_STATE_DETACHED, MEMORY_POOL_STATE_REQUEST_ATTACH, MEMORY_POOL_STATE_REQUEST_DETACH,
};

/// Sentinel DSP address for "not mapped" / failed translation.
pub const DSP_ADDRESS_UNMAPPED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPoolLocation {
    /// Pool backing lives on the CPU side and must be mapped before use.
    Cpu,
    /// Pool is DSP-visible from the start (system pools).
    Dsp,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryPoolState {
    cpu_address: u64,
    dsp_address: u64,
    size: u64,
    location: MemoryPoolLocation,
    is_used: bool,
}

impl MemoryPoolState {
    pub fn new(location: MemoryPoolLocation) -> Self {
        Self {
            cpu_address: 0,
            dsp_address: DSP_ADDRESS_UNMAPPED,
            size: 0,
            location,
            is_used: false,
        }
    }

    pub fn set_cpu_address(&mut self, address: u64, size: u64) {
        self.cpu_address = address;
        self.size = size;
    }

    pub fn cpu_address(&self) -> u64 {
        self.cpu_address
    }

    pub fn dsp_address(&self) -> u64 {
        self.dsp_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn location(&self) -> MemoryPoolLocation {
        self.location
    }

    pub fn is_mapped(&self) -> bool {
        self.dsp_address != DSP_ADDRESS_UNMAPPED
    }

    pub fn is_used(&self) -> bool {
        self.is_used
    }

    pub fn set_used(&mut self, used: bool) {
        self.is_used = used;
    }

    /// True iff `[address, address + size)` lies fully inside the pool.
    pub fn contains(&self, address: u64, size: u64) -> bool {
        if self.cpu_address == 0 || self.size == 0 {
            return false;
        }
        let Some(end) = address.checked_add(size) else {
            return false;
        };
        let Some(pool_end) = self.cpu_address.checked_add(self.size) else {
            return false;
        };
        address >= self.cpu_address && end <= pool_end
    }

    /// CPU → DSP address translation, gated on full-range containment.
    ///
    /// Returns [`DSP_ADDRESS_UNMAPPED`] when the range escapes the pool or
    /// the pool is unmapped; callers must check before use.
    pub fn translate(&self, address: u64, size: u64) -> u64 {
        if !self.contains(address, size) || !self.is_mapped() {
            return DSP_ADDRESS_UNMAPPED;
        }
        self.dsp_address + (address - self.cpu_address)
    }

    fn map(&mut self, dsp_address: u64) {
        self.dsp_address = dsp_address;
    }

    fn unmap(&mut self) {
        self.dsp_address = DSP_ADDRESS_UNMAPPED;
    }
}

/// A buffer descriptor carried by voices/effects/sinks: the guest range plus
/// an index back to the owning pool so later accesses skip re-validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressInfo {
    cpu_address: u64,
    size: u64,
    pool_index: Option<u32>,
    force_mapped_dsp_address: u64,
}

impl AddressInfo {
    pub fn new(cpu_address: u64, size: u64) -> Self {
        Self {
            cpu_address,
            size,
            pool_index: None,
            force_mapped_dsp_address: DSP_ADDRESS_UNMAPPED,
        }
    }

    pub fn setup(&mut self, cpu_address: u64, size: u64) {
        self.cpu_address = cpu_address;
        self.size = size;
        self.pool_index = None;
        self.force_mapped_dsp_address = DSP_ADDRESS_UNMAPPED;
    }

    pub fn cpu_address(&self) -> u64 {
        self.cpu_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn has_memory_pool_state(&self) -> bool {
        self.pool_index.is_some()
    }

    pub fn force_mapped_dsp_address(&self) -> u64 {
        self.force_mapped_dsp_address
    }

    pub fn set_force_mapped_dsp_address(&mut self, address: u64) {
        self.force_mapped_dsp_address = address;
    }

    pub fn attach(&mut self, pool_index: u32) {
        self.pool_index = Some(pool_index);
        self.force_mapped_dsp_address = DSP_ADDRESS_UNMAPPED;
    }

    /// Resolved DSP address of this buffer, or the unmapped sentinel.
    pub fn dsp_address(&self, pools: &[MemoryPoolState]) -> u64 {
        match self.pool_index {
            Some(index) => pools
                .get(index as usize)
                .map(|pool| pool.translate(self.cpu_address, self.size))
                .unwrap_or(DSP_ADDRESS_UNMAPPED),
            None => self.force_mapped_dsp_address,
        }
    }
}

/// Result of applying one `MemoryPoolInParameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolUpdateResult {
    Success,
    MapError,
    UnmapError,
    InvalidParameter,
}

/// Maps/unmaps pools and attaches buffers to them.
///
/// Two modes: force-mapping (system-side, trusts any address) and strict
/// (must find an owning registered pool).
#[derive(Debug, Clone, Copy)]
pub struct PoolMapper {
    force_map: bool,
}

impl PoolMapper {
    pub fn new(force_map: bool) -> Self {
        Self { force_map }
    }

    pub fn is_force_map(&self) -> bool {
        self.force_map
    }

    /// Sets up the DSP-side system pool backing the work buffer. Only valid
    /// for a DSP-location pool.
    pub fn initialize_system_pool(
        &self,
        pool: &mut MemoryPoolState,
        address: u64,
        size: u64,
    ) -> bool {
        if pool.location() != MemoryPoolLocation::Dsp {
            return false;
        }
        pool.set_cpu_address(address, size);
        pool.map(address);
        true
    }

    /// Attaches `address..address+size` to its owning pool.
    ///
    /// Force-mapping mode with no matching pool reports *success* while
    /// still flagging `InvalidAddressInfo` with the offending address — the
    /// caller path tolerates the combination only because mapping is
    /// forced. Documented hardware quirk; preserved literally.
    pub fn try_attach_buffer(
        &self,
        address_info: &mut AddressInfo,
        pools: &[MemoryPoolState],
        address: u64,
        size: u64,
    ) -> (bool, ErrorInfo) {
        address_info.setup(address, size);

        if address != 0 {
            for (index, pool) in pools.iter().enumerate() {
                if pool.contains(address, size) {
                    address_info.attach(index as u32);
                    return (true, ErrorInfo::default());
                }
            }
        }

        let error = ErrorInfo {
            error_code: ResultCode::INVALID_ADDRESS_INFO.0,
            reserved: 0,
            extra_error_info: address,
        };

        if self.force_map {
            address_info.set_force_mapped_dsp_address(address);
            (true, error)
        } else {
            log::debug!(
                "buffer attach failed: no pool contains 0x{address:x}+0x{size:x}"
            );
            (false, error)
        }
    }

    /// Maps a pool into DSP space. Identity translation: the emulated DSP
    /// shares the guest physical address space.
    pub fn map(&self, pool: &mut MemoryPoolState) -> u64 {
        pool.map(pool.cpu_address());
        pool.dsp_address()
    }

    /// Unmaps a pool. Fails while the pool is marked in use, unless the
    /// mapping was forced in the first place.
    pub fn unmap(&self, pool: &mut MemoryPoolState) -> bool {
        if pool.is_used() && !self.force_map {
            return false;
        }
        pool.unmap();
        true
    }

    /// Applies one per-frame pool parameter update.
    pub fn update(
        &self,
        pool: &mut MemoryPoolState,
        parameter: &MemoryPoolInParameter,
    ) -> (PoolUpdateResult, MemoryPoolOutStatus) {
        let mut out = MemoryPoolOutStatus::default();

        match parameter.state {
            MEMORY_POOL_STATE_REQUEST_ATTACH => {
                if parameter.cpu_address == 0 || parameter.size == 0 {
                    return (PoolUpdateResult::InvalidParameter, out);
                }
                pool.set_cpu_address(parameter.cpu_address, parameter.size);
                if self.map(pool) == DSP_ADDRESS_UNMAPPED {
                    return (PoolUpdateResult::MapError, out);
                }
                out.state = MEMORY_POOL_STATE_ATTACHED;
                (PoolUpdateResult::Success, out)
            }
            MEMORY_POOL_STATE_REQUEST_DETACH => {
                if !self.unmap(pool) {
                    return (PoolUpdateResult::UnmapError, out);
                }
                pool.set_cpu_address(0, 0);
                out.state = MEMORY_POOL_STATE_DETACHED;
                (PoolUpdateResult::Success, out)
            }
            // Any other state is a no-op request; the pool keeps its state.
            _ => (PoolUpdateResult::Success, out),
        }
    }
}
