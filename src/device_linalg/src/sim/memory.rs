//! Tracked arena standing in for device memory.
//!
//! Addresses are opaque `u64` values in a range no host pointer is handed
//! out from. Consecutive allocations are separated by an unmapped guard gap,
//! so an access running past the end of one allocation never lands in the
//! next one and is reported as an invalid value.

use std::collections::BTreeMap;

use super::status;
use crate::device::DevicePtr;
use crate::error::VendorError;

const BASE_ADDRESS: u64 = 0x7a00_0000_0000;
const ALIGNMENT: u64 = 256;
const GUARD: u64 = 256;

/// Allocation counters of a simulated device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub total_allocations: usize,
    pub total_frees: usize,
}

#[derive(Debug, Default)]
pub(crate) struct SimMemory {
    allocations: BTreeMap<u64, Box<[u8]>>,
    next: u64,
    stats: AllocationStats,
}

impl SimMemory {
    pub(crate) fn stats(&self) -> AllocationStats {
        self.stats
    }

    pub(crate) fn malloc(&mut self, bytes: usize) -> Result<DevicePtr, VendorError> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(bytes)
            .map_err(|_| VendorError(status::ALLOC_FAILED))?;
        storage.resize(bytes, 0u8);

        let base = BASE_ADDRESS + self.next;
        let footprint = (bytes as u64).div_ceil(ALIGNMENT) * ALIGNMENT;
        self.next += footprint + GUARD;

        self.allocations.insert(base, storage.into_boxed_slice());
        self.stats.live_allocations += 1;
        self.stats.live_bytes += bytes;
        self.stats.total_allocations += 1;
        Ok(base)
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> Result<(), VendorError> {
        let storage = self
            .allocations
            .remove(&ptr)
            .ok_or(VendorError(status::INVALID_VALUE))?;
        self.stats.live_allocations -= 1;
        self.stats.live_bytes -= storage.len();
        self.stats.total_frees += 1;
        Ok(())
    }

    /// Locate `len` bytes at `ptr` inside one live allocation.
    fn locate(&self, ptr: DevicePtr, len: usize) -> Result<(u64, usize), VendorError> {
        let (&base, storage) = self
            .allocations
            .range(..=ptr)
            .next_back()
            .ok_or(VendorError(status::INVALID_VALUE))?;
        let offset = (ptr - base) as usize;
        match offset.checked_add(len) {
            Some(end) if end <= storage.len() => Ok((base, offset)),
            _ => Err(VendorError(status::INVALID_VALUE)),
        }
    }

    pub(crate) fn check(&self, ptr: DevicePtr, len: usize) -> Result<(), VendorError> {
        if len == 0 {
            return Ok(());
        }
        self.locate(ptr, len).map(|_| ())
    }

    pub(crate) fn read(&self, ptr: DevicePtr, out: &mut [u8]) -> Result<(), VendorError> {
        if out.is_empty() {
            return Ok(());
        }
        let (base, offset) = self.locate(ptr, out.len())?;
        out.copy_from_slice(&self.allocations[&base][offset..offset + out.len()]);
        Ok(())
    }

    pub(crate) fn write(&mut self, ptr: DevicePtr, data: &[u8]) -> Result<(), VendorError> {
        if data.is_empty() {
            return Ok(());
        }
        let (base, offset) = self.locate(ptr, data.len())?;
        let storage = self
            .allocations
            .get_mut(&base)
            .ok_or(VendorError(status::INVALID_VALUE))?;
        storage[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn copy(
        &mut self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), VendorError> {
        let mut staging = vec![0u8; bytes];
        self.read(src, &mut staging)?;
        self.write(dst, &staging)
    }
}
