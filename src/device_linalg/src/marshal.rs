//! Batched pointer marshaling.
//!
//! Vendor batched entry points take a device-resident array of per-matrix
//! device addresses. [`PointerArray`] builds that array on the host, uploads
//! it to a fresh device allocation and keeps both alive for the duration of
//! the batched call. Dropping it releases the device copy and the host
//! staging array, whichever way the call exits.

use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::device::{Device, DevicePtr};
use crate::error::{LinalgError, MemorySpace, Result};
use crate::handle::DeviceHandles;
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::memory::{as_bytes, DeviceAllocation};
use crate::scalar::DeviceCopy;

/// Host-side array of device addresses, counted against the bundle's
/// outstanding staging total while alive.
pub struct HostStaging<'h> {
    addresses: Vec<DevicePtr>,
    counter: &'h AtomicUsize,
}

impl<'h> HostStaging<'h> {
    fn new(counter: &'h AtomicUsize, len: usize) -> Result<Self> {
        let mut addresses = Vec::new();
        addresses
            .try_reserve_exact(len)
            .map_err(|_| LinalgError::AllocationFailure {
                space: MemorySpace::Host,
                bytes: len.saturating_mul(size_of::<DevicePtr>()),
                code: None,
            })?;
        counter.fetch_add(1, Ordering::AcqRel);
        Ok(Self { addresses, counter })
    }

    pub fn addresses(&self) -> &[DevicePtr] {
        &self.addresses
    }
}

impl Drop for HostStaging<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Device-resident array of device addresses for one role of a batched call.
pub struct PointerArray<'h, D: Device> {
    host: HostStaging<'h>,
    device: DeviceAllocation<'h, D>,
}

impl<'h, D: Device> PointerArray<'h, D> {
    /// Stage `addresses` on the host and upload them.
    ///
    /// `role` names the argument in logs ("a", "c", "tau", ...).
    pub fn new<I>(handles: &'h DeviceHandles<D>, role: &'static str, addresses: I) -> Result<Self>
    where
        I: ExactSizeIterator<Item = DevicePtr>,
    {
        let len = addresses.len();
        let mut host = HostStaging::new(handles.staging_counter(), len)?;
        host.addresses.extend(addresses);

        let device = DeviceAllocation::new(handles, len * size_of::<DevicePtr>())?;
        device.write_bytes(as_bytes(&host.addresses))?;

        debug!(role, batch = len, device = handles.ordinal(), "marshaled pointer array");
        Ok(Self { host, device })
    }

    /// Pointer array for a batch of matrices.
    pub fn from_matrices<T: DeviceCopy>(
        handles: &'h DeviceHandles<D>,
        role: &'static str,
        matrices: &[DeviceMatrixRef<'_, T, D>],
    ) -> Result<Self> {
        Self::new(handles, role, matrices.iter().map(|m| m.ptr()))
    }

    /// Pointer array for a batch of vectors.
    pub fn from_vectors<T: DeviceCopy>(
        handles: &'h DeviceHandles<D>,
        role: &'static str,
        vectors: &[DeviceVectorRef<'_, T, D>],
    ) -> Result<Self> {
        Self::new(handles, role, vectors.iter().map(|v| v.ptr()))
    }

    /// Device address of the uploaded array.
    pub fn ptr(&self) -> DevicePtr {
        self.device.ptr()
    }

    pub fn len(&self) -> usize {
        self.host.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.addresses.is_empty()
    }

    pub fn host(&self) -> &HostStaging<'h> {
        &self.host
    }
}

impl<D: Device> std::fmt::Debug for PointerArray<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerArray")
            .field("ptr", &format_args!("{:#x}", self.ptr()))
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, VendorCall};

    #[test]
    fn test_pointer_array_uploads_addresses() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let storage = handles.alloc::<f64>(12).unwrap();
        let mats = storage.matrices(2, 2, 2, 4, 3).unwrap();

        let array = PointerArray::from_matrices(&handles, "a", &mats).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(handles.outstanding_host_staging(), 1);

        let mut uploaded = [0u64; 3];
        unsafe {
            handles
                .device()
                .memcpy_dtoh(crate::memory::as_bytes_mut(&mut uploaded), array.ptr())
        }
        .unwrap();
        let expected: Vec<u64> = mats.iter().map(|m| m.ptr()).collect();
        assert_eq!(uploaded.to_vec(), expected);
        assert_eq!(array.host().addresses(), expected.as_slice());

        drop(array);
        assert_eq!(handles.outstanding_host_staging(), 0);
        assert_eq!(device.stats().live_allocations, 1);
    }

    #[test]
    fn test_failed_upload_releases_staging() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        device.fail_next(VendorCall::Memcpy, 1);
        let err = PointerArray::new(&handles, "a", [0x100u64, 0x200].into_iter()).unwrap_err();
        assert_eq!(err.vendor_code(), Some(1));
        assert_eq!(handles.outstanding_host_staging(), 0);
        assert_eq!(device.stats().live_allocations, 0);
    }

    #[test]
    fn test_empty_batch_skips_device() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let array = PointerArray::new(&handles, "a", std::iter::empty()).unwrap();
        assert!(array.is_empty());
        assert_eq!(array.ptr(), 0);
        assert_eq!(device.stats().total_allocations, 0);
    }
}
