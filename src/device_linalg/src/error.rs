//! Error taxonomy for device linear-algebra operations.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinalgError>;

/// Raw non-success status returned by a vendor library or the device runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vendor status {0}")]
pub struct VendorError(pub i32);

impl VendorError {
    /// Get the underlying status code.
    pub fn code(&self) -> i32 {
        self.0
    }
}

/// Memory space an allocation was requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Host,
    Device,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySpace::Host => write!(f, "host"),
            MemorySpace::Device => write!(f, "device"),
        }
    }
}

/// Where a non-success status was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOrigin {
    /// Return value of the vendor entry point itself.
    Call,
    /// Info code written by the vendor into device memory.
    Info,
    /// Host/device memory transfer.
    Memcpy,
    /// Vendor handle creation.
    Handle,
}

impl fmt::Display for StatusOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusOrigin::Call => write!(f, "call status"),
            StatusOrigin::Info => write!(f, "info"),
            StatusOrigin::Memcpy => write!(f, "memcpy status"),
            StatusOrigin::Handle => write!(f, "handle status"),
        }
    }
}

/// Per-matrix outcome of a failed batched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Index of the first matrix with a non-zero status.
    pub index: usize,
    /// Host copy of every status in the batch.
    pub statuses: Vec<i32>,
}

/// Errors raised by device linear-algebra operations.
#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("failed to allocate {bytes} bytes of {space} memory{}", status_suffix(.code))]
    AllocationFailure {
        space: MemorySpace,
        bytes: usize,
        /// Runtime status for device allocations; host allocations have none.
        code: Option<i32>,
    },

    #[error("{operation} failed: {origin} {code}{}", batch_suffix(.batch))]
    VendorLibraryError {
        operation: &'static str,
        code: i32,
        origin: StatusOrigin,
        batch: Option<Box<BatchFailure>>,
    },

    #[error("{operation}: {detail}")]
    DimensionMismatch {
        operation: &'static str,
        detail: String,
    },

    #[error("{operation} is not implemented on this device backend")]
    UnimplementedOperation { operation: &'static str },

    #[error("{operation}: arguments belong to different device handle bundles")]
    DeviceMismatch { operation: &'static str },
}

fn status_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

fn batch_suffix(batch: &Option<Box<BatchFailure>>) -> String {
    match batch {
        Some(failure) => format!(
            " (matrix {} of {})",
            failure.index,
            failure.statuses.len()
        ),
        None => String::new(),
    }
}

impl LinalgError {
    pub(crate) fn dimension(operation: &'static str, detail: impl Into<String>) -> Self {
        LinalgError::DimensionMismatch {
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn vendor(operation: &'static str, origin: StatusOrigin, code: i32) -> Self {
        LinalgError::VendorLibraryError {
            operation,
            code,
            origin,
            batch: None,
        }
    }

    /// Raw vendor code carried by a `VendorLibraryError` or `AllocationFailure`.
    pub fn vendor_code(&self) -> Option<i32> {
        match self {
            LinalgError::VendorLibraryError { code, .. } => Some(*code),
            LinalgError::AllocationFailure { code, .. } => *code,
            _ => None,
        }
    }

    /// Operation name attached to the error, when there is one.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            LinalgError::VendorLibraryError { operation, .. }
            | LinalgError::DimensionMismatch { operation, .. }
            | LinalgError::UnimplementedOperation { operation }
            | LinalgError::DeviceMismatch { operation } => Some(*operation),
            LinalgError::AllocationFailure { .. } => None,
        }
    }
}
