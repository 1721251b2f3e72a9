//! Error and status codes crossing the guest boundary.

use thiserror::Error;

/// Guest-visible status code.
///
/// Encoded the way the console's result codes are: a module id in the low 9
/// bits and a description in the bits above. These values travel verbatim in
/// `ErrorInfo::error_code` and as `update` return codes, so they are part of
/// the wire protocol, not an internal error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResultCode(pub u32);

const MODULE_AUDIO: u32 = 153;

const fn code(description: u32) -> ResultCode {
    ResultCode(MODULE_AUDIO | (description << 9))
}

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const DEVICE_NOT_FOUND: ResultCode = code(1);
    pub const OPERATION_FAILED: ResultCode = code(2);
    pub const UNSUPPORTED_SAMPLE_RATE: ResultCode = code(3);
    pub const WORK_BUFFER_TOO_SMALL: ResultCode = code(4);
    pub const BUFFER_RING_FULL: ResultCode = code(8);
    pub const UNSUPPORTED_CHANNEL_COUNT: ResultCode = code(10);
    pub const INVALID_UPDATE_INFO: ResultCode = code(41);
    pub const INVALID_ADDRESS_INFO: ResultCode = code(42);
    pub const UNSUPPORTED_REVISION: ResultCode = code(517);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// Unrecoverable construction failures.
///
/// Anything here violates a caller-side invariant (undersized arena,
/// unknown protocol version); per-frame guest input problems never surface
/// through this type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendererError {
    #[error("work buffer too small: {provided:#x} bytes provided, {required:#x} required")]
    WorkBufferTooSmall { provided: u64, required: u64 },

    #[error("unsupported sample rate {0}")]
    UnsupportedSampleRate(u32),

    #[error("unrecognized performance metrics data format {0}")]
    UnknownPerformanceFormat(u32),
}

/// Failures while applying one frame's parameter blob.
///
/// The frame's surviving subsystem updates stay applied; the caller reports
/// the code to the guest and carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("input buffer shorter than its update header claims ({claimed:#x} > {actual:#x})")]
    InputTooShort { claimed: usize, actual: usize },

    #[error("output buffer too small for out statuses ({required:#x} > {actual:#x})")]
    OutputTooShort { required: usize, actual: usize },

    #[error("update region size mismatch for {region}: header says {claimed:#x}, consumed {consumed:#x}")]
    RegionSizeMismatch {
        region: &'static str,
        claimed: usize,
        consumed: usize,
    },
}

impl UpdateError {
    /// The status code reported to the guest for this failure.
    pub fn result_code(&self) -> ResultCode {
        ResultCode::INVALID_UPDATE_INFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_encode_module_and_description() {
        assert_eq!(ResultCode::SUCCESS.0, 0);
        assert_eq!(ResultCode::INVALID_ADDRESS_INFO.0 & 0x1FF, 153);
        assert_eq!(ResultCode::INVALID_ADDRESS_INFO.0 >> 9, 42);
        assert!(ResultCode::SUCCESS.is_success());
        assert!(!ResultCode::OPERATION_FAILED.is_success());
    }
}
