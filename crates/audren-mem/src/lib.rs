//! Guest physical memory access for the audio renderer.
//!
//! The renderer server reads parameter blobs, wave buffers and effect work
//! areas out of guest memory and writes status/performance records back. All
//! of that goes through [`GuestMemory`]; production embeds the emulator's
//! real address space behind it, while tests use [`LinearGuestMemory`].

use core::fmt;

use bytemuck::Pod;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    OutOfRange { addr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    SizeTooLarge { size: u64 },
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestMemoryError::OutOfRange { addr, len, size } => write!(
                f,
                "guest memory access out of range: addr=0x{addr:x} len={len} size=0x{size:x}"
            ),
            GuestMemoryError::SizeTooLarge { size } => {
                write!(f, "guest memory size {size} does not fit in usize")
            }
        }
    }
}

impl std::error::Error for GuestMemoryError {}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest physical memory storage.
///
/// Addresses are `u64` regardless of host pointer width. Reads of unmapped
/// ranges are errors rather than returning open-bus values: the renderer
/// validates every range against its memory pools before access, so an
/// out-of-range access here indicates a pool-accounting bug.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, addr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&mut self, addr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    /// Optional fast path: a contiguous slice over the requested range.
    fn get_slice(&self, _addr: u64, _len: usize) -> Option<&[u8]> {
        None
    }

    fn read_u8(&self, addr: u64) -> GuestMemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16_le(&self, addr: u64) -> GuestMemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, addr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, addr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u16_le(&mut self, addr: u64, val: u16) -> GuestMemoryResult<()> {
        self.write_from(addr, &val.to_le_bytes())
    }

    fn write_u32_le(&mut self, addr: u64, val: u32) -> GuestMemoryResult<()> {
        self.write_from(addr, &val.to_le_bytes())
    }

    fn write_u64_le(&mut self, addr: u64, val: u64) -> GuestMemoryResult<()> {
        self.write_from(addr, &val.to_le_bytes())
    }

    /// Reads one `Pod` record at `addr`.
    ///
    /// Wire structs in this project are `#[repr(C)]` with explicit reserved
    /// fields, so a byte-wise copy reproduces the guest layout exactly.
    fn read_obj<T: Pod>(&self, addr: u64) -> GuestMemoryResult<T>
    where
        Self: Sized,
    {
        let mut value = T::zeroed();
        self.read_into(addr, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Writes one `Pod` record at `addr`.
    fn write_obj<T: Pod>(&mut self, addr: u64, value: &T) -> GuestMemoryResult<()>
    where
        Self: Sized,
    {
        self.write_from(addr, bytemuck::bytes_of(value))
    }
}

/// Vec-backed contiguous guest memory.
///
/// Reference backend for unit/integration tests and standalone demos.
#[derive(Debug, Clone)]
pub struct LinearGuestMemory {
    bytes: Vec<u8>,
}

impl LinearGuestMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    fn check_range(&self, addr: u64, len: usize) -> GuestMemoryResult<usize> {
        let size = self.bytes.len() as u64;
        let end = addr
            .checked_add(len as u64)
            .ok_or(GuestMemoryError::OutOfRange { addr, len, size })?;
        if end > size {
            return Err(GuestMemoryError::OutOfRange { addr, len, size });
        }
        usize::try_from(addr).map_err(|_| GuestMemoryError::SizeTooLarge { size: addr })
    }
}

impl GuestMemory for LinearGuestMemory {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_into(&self, addr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let start = self.check_range(addr, dst.len())?;
        dst.copy_from_slice(&self.bytes[start..start + dst.len()]);
        Ok(())
    }

    fn write_from(&mut self, addr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let start = self.check_range(addr, src.len())?;
        self.bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn get_slice(&self, addr: u64, len: usize) -> Option<&[u8]> {
        let start = self.check_range(addr, len).ok()?;
        Some(&self.bytes[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_memory_roundtrips_le_values() {
        let mut mem = LinearGuestMemory::new(0x100);
        mem.write_u32_le(0x10, 0xDEAD_BEEF).unwrap();
        mem.write_u64_le(0x20, 0x0123_4567_89AB_CDEF).unwrap();

        assert_eq!(mem.read_u32_le(0x10).unwrap(), 0xDEAD_BEEF);
        assert_eq!(mem.read_u64_le(0x20).unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(mem.read_u8(0x10).unwrap(), 0xEF);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut mem = LinearGuestMemory::new(0x10);
        let mut buf = [0u8; 4];

        assert!(mem.read_into(0x10, &mut buf).is_err());
        assert!(mem.read_into(0x0E, &mut buf).is_err());
        assert!(mem.write_from(u64::MAX - 2, &buf).is_err());
        assert!(mem.read_into(0x0C, &mut buf).is_ok());
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn reads_return_exactly_what_writes_stored(
                addr in 0u64..0xF00,
                data in proptest::collection::vec(any::<u8>(), 1..64),
            ) {
                let mut mem = LinearGuestMemory::new(0x1000);
                mem.write_from(addr, &data).unwrap();
                let mut back = vec![0u8; data.len()];
                mem.read_into(addr, &mut back).unwrap();
                prop_assert_eq!(back, data);
            }
        }
    }

    #[test]
    fn pod_roundtrip_preserves_bytes() {
        #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Record {
            a: u32,
            b: u32,
            c: u64,
        }

        let mut mem = LinearGuestMemory::new(0x40);
        let rec = Record {
            a: 1,
            b: 2,
            c: 0x3000_0000_0000_0004,
        };
        mem.write_obj(0x8, &rec).unwrap();
        assert_eq!(mem.read_obj::<Record>(0x8).unwrap(), rec);
        assert_eq!(mem.read_u32_le(0x8).unwrap(), 1);
    }
}
