use thiserror::Error;

use crate::types::ObjectId;

/// Raw VA status code returned across the driver boundary.
pub type VaStatus = i32;

pub const VA_STATUS_SUCCESS: VaStatus = 0x00;

/// Protocol-level failure, one variant per status the driver reports.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("invalid config {0}")]
    InvalidConfig(ObjectId),

    #[error("invalid context {0}")]
    InvalidContext(ObjectId),

    #[error("invalid surface {0}")]
    InvalidSurface(ObjectId),

    #[error("invalid buffer {0}")]
    InvalidBuffer(ObjectId),

    #[error("invalid image {0}")]
    InvalidImage(ObjectId),

    #[error("unsupported profile {0}")]
    UnsupportedProfile(i32),

    #[error("unsupported entrypoint {0}")]
    UnsupportedEntrypoint(i32),

    #[error("unsupported render target format {0:#x}")]
    UnsupportedRtFormat(u32),

    #[error("unsupported buffer type {0}")]
    UnsupportedBufferType(u32),

    #[error("unsupported memory type {0:#x}")]
    UnsupportedMemoryType(u32),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("{0} is not implemented")]
    Unimplemented(&'static str),

    #[error("decode submission rejected: {0}")]
    DecodingError(#[source] DeviceError),

    #[error("surface export failed: {0}")]
    ExportFailed(#[from] crate::export::ExportError),

    #[error("malformed parameter buffer: {0}")]
    Codec(#[from] CodecError),
}

impl DriverError {
    /// VA status code for this error.
    pub fn status(&self) -> VaStatus {
        match self {
            DriverError::OperationFailed(_) => 0x01,
            DriverError::AllocationFailed(_) => 0x02,
            DriverError::InvalidConfig(_) => 0x04,
            DriverError::InvalidContext(_) => 0x05,
            DriverError::InvalidSurface(_) => 0x06,
            DriverError::InvalidBuffer(_) => 0x07,
            DriverError::InvalidImage(_) => 0x08,
            DriverError::UnsupportedProfile(_) => 0x0c,
            DriverError::UnsupportedEntrypoint(_) => 0x0d,
            DriverError::UnsupportedRtFormat(_) => 0x0e,
            DriverError::UnsupportedBufferType(_) => 0x0f,
            DriverError::InvalidParameter(_) => 0x12,
            DriverError::Unimplemented(_) => 0x14,
            DriverError::DecodingError(_) => 0x17,
            DriverError::UnsupportedMemoryType(_) => 0x1e,
            DriverError::ExportFailed(_) => 0x01,
            DriverError::Codec(_) => 0x12,
        }
    }
}

/// A device primitive returned a non-success code.
#[derive(Debug, Clone, Error)]
#[error("{call} failed with code {code}")]
pub struct DeviceError {
    pub call: &'static str,
    pub code: i32,
}

impl DeviceError {
    pub fn new(call: &'static str, code: i32) -> Self {
        DeviceError { call, code }
    }
}

/// Client parameter buffer could not be interpreted.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{kind} buffer too short: need {needed} bytes, got {got}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("slice data range {offset}+{size} exceeds buffer of {len} bytes")]
    SliceOutOfRange { offset: u32, size: u32, len: usize },
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
