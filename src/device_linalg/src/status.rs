//! Status/error translation.
//!
//! Vendor routines report success or failure in two places: the return
//! value of the entry point itself, and info codes the kernels write into
//! device memory. Neither may be branched on until it has been copied back
//! to the host; the helpers here perform that blocking copy and classify the
//! result, logging every translated failure.

use std::mem::size_of;

use tracing::warn;

use crate::device::{Device, DevicePtr};
use crate::error::{BatchFailure, LinalgError, Result, StatusOrigin, VendorError};
use crate::handle::DeviceHandles;
use crate::matrix::DeviceVectorRef;
use crate::memory::{as_bytes_mut, DeviceAllocation};

/// One internally allocated device `i32` for a vendor info code.
///
/// Released on drop, on success and error paths alike.
pub struct DeviceStatus<'h, D: Device> {
    alloc: DeviceAllocation<'h, D>,
}

impl<'h, D: Device> DeviceStatus<'h, D> {
    pub fn new(handles: &'h DeviceHandles<D>) -> Result<Self> {
        Ok(Self {
            alloc: DeviceAllocation::new(handles, size_of::<i32>())?,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.alloc.ptr()
    }

    /// Blocking copy of the status to the host.
    pub fn read(&self, operation: &'static str) -> Result<i32> {
        read_status(self.alloc.handles(), operation, self.ptr())
    }
}

impl<D: Device> std::fmt::Debug for DeviceStatus<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceStatus").field(&self.alloc).finish()
    }
}

/// Host copy of a batched status array, returned when every matrix succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStatus {
    statuses: Vec<i32>,
}

impl BatchStatus {
    pub(crate) fn new(statuses: Vec<i32>) -> Self {
        Self { statuses }
    }

    pub fn statuses(&self) -> &[i32] {
        &self.statuses
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn into_inner(self) -> Vec<i32> {
        self.statuses
    }
}

/// Translate the return value of a vendor entry point.
pub(crate) fn check_call(
    operation: &'static str,
    result: std::result::Result<(), VendorError>,
) -> Result<()> {
    result.map_err(|e| {
        warn!(operation, code = e.code(), "vendor call returned non-success status");
        LinalgError::vendor(operation, StatusOrigin::Call, e.code())
    })
}

/// Translate the status of a device memory transfer.
pub(crate) fn check_memcpy(
    operation: &'static str,
    result: std::result::Result<(), VendorError>,
) -> Result<()> {
    result.map_err(|e| {
        warn!(operation, code = e.code(), "device memory copy failed");
        LinalgError::vendor(operation, StatusOrigin::Memcpy, e.code())
    })
}

/// Translate an info code that is already on the host.
pub(crate) fn check_info(operation: &'static str, info: i32) -> Result<()> {
    if info != 0 {
        warn!(operation, code = info, "vendor reported non-zero info");
        return Err(LinalgError::vendor(operation, StatusOrigin::Info, info));
    }
    Ok(())
}

/// Blocking copy of one device `i32` at `ptr` to the host.
pub(crate) fn read_status<D: Device>(
    handles: &DeviceHandles<D>,
    operation: &'static str,
    ptr: DevicePtr,
) -> Result<i32> {
    let mut value = [0i32];
    read_into(handles, operation, ptr, &mut value)?;
    Ok(value[0])
}

/// Read one info code from the device and translate it.
pub(crate) fn check_device_info<D: Device>(
    handles: &DeviceHandles<D>,
    operation: &'static str,
    ptr: DevicePtr,
) -> Result<()> {
    let info = read_status(handles, operation, ptr)?;
    check_info(operation, info)
}

/// Copy `count` per-matrix info codes to the host and fail on the first
/// non-zero one, attaching the whole array.
pub(crate) fn read_batch_info<D: Device>(
    operation: &'static str,
    info: &DeviceVectorRef<'_, i32, D>,
    count: usize,
) -> Result<BatchStatus> {
    debug_assert!(count <= info.len());
    let mut statuses = vec![0i32; count];
    read_into(info.handles(), operation, info.ptr(), &mut statuses)?;

    match statuses.iter().position(|&s| s != 0) {
        None => Ok(BatchStatus::new(statuses)),
        Some(index) => {
            let code = statuses[index];
            let failed = statuses.iter().filter(|&&s| s != 0).count();
            warn!(
                operation,
                code,
                index,
                failed,
                batch = count,
                "vendor reported non-zero info in batch"
            );
            Err(LinalgError::VendorLibraryError {
                operation,
                code,
                origin: StatusOrigin::Info,
                batch: Some(Box::new(BatchFailure { index, statuses })),
            })
        }
    }
}

fn read_into<D: Device>(
    handles: &DeviceHandles<D>,
    operation: &'static str,
    ptr: DevicePtr,
    out: &mut [i32],
) -> Result<()> {
    if out.is_empty() {
        return Ok(());
    }
    // SAFETY: callers pass addresses of live device status storage holding
    // at least out.len() integers.
    unsafe { handles.device().memcpy_dtoh(as_bytes_mut(out), ptr) }.map_err(|e| {
        warn!(operation, code = e.code(), "failed to copy status to host");
        LinalgError::vendor(operation, StatusOrigin::Memcpy, e.code())
    })
}
