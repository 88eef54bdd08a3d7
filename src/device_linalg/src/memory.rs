//! RAII device memory.
//!
//! Every temporary this layer allocates on the device (status integers,
//! pointer arrays, staging copies) is held by a [`DeviceAllocation`] and
//! released in `Drop`, so error paths cannot leak. [`DeviceBuffer`] is the
//! typed owning buffer callers use for matrices, pivots and scratch space.

use std::marker::PhantomData;
use std::mem::size_of;

use tracing::warn;

use crate::device::{Device, DevicePtr};
use crate::error::{LinalgError, MemorySpace, Result, StatusOrigin};
use crate::handle::DeviceHandles;
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef, StridedMatrixBatch, StridedVectorBatch};
use crate::scalar::DeviceCopy;

/// View a slice of plain-old-data values as bytes.
pub(crate) fn as_bytes<T: DeviceCopy>(data: &[T]) -> &[u8] {
    // SAFETY: DeviceCopy types have no padding and any byte pattern is valid.
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

pub(crate) fn as_bytes_mut<T: DeviceCopy>(data: &mut [T]) -> &mut [u8] {
    // SAFETY: as above; the byte view is exclusive for its lifetime.
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut u8, std::mem::size_of_val(data))
    }
}

// ============================================================================
// Untyped allocation
// ============================================================================

/// Device allocation released when dropped.
pub struct DeviceAllocation<'h, D: Device> {
    handles: &'h DeviceHandles<D>,
    ptr: DevicePtr,
    bytes: usize,
}

impl<'h, D: Device> DeviceAllocation<'h, D> {
    /// Allocate `bytes` of device memory. Zero-byte requests do not reach
    /// the device and yield a null address.
    pub fn new(handles: &'h DeviceHandles<D>, bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Ok(Self {
                handles,
                ptr: 0,
                bytes,
            });
        }
        let ptr = handles
            .device()
            .malloc(bytes)
            .map_err(|e| LinalgError::AllocationFailure {
                space: MemorySpace::Device,
                bytes,
                code: Some(e.code()),
            })?;
        Ok(Self {
            handles,
            ptr,
            bytes,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn handles(&self) -> &'h DeviceHandles<D> {
        self.handles
    }

    /// Blocking copy of `data` into the start of the allocation.
    pub(crate) fn write_bytes(&self, data: &[u8]) -> Result<()> {
        assert!(data.len() <= self.bytes, "data too large for allocation");
        if data.is_empty() {
            return Ok(());
        }
        // SAFETY: the allocation is live and holds at least data.len() bytes.
        unsafe { self.handles.device().memcpy_htod(self.ptr, data) }
            .map_err(|e| LinalgError::vendor("memcpy_htod", StatusOrigin::Memcpy, e.code()))
    }

    /// Blocking copy of the start of the allocation into `out`.
    pub(crate) fn read_bytes(&self, out: &mut [u8]) -> Result<()> {
        assert!(out.len() <= self.bytes, "allocation too small for output");
        if out.is_empty() {
            return Ok(());
        }
        // SAFETY: the allocation is live and holds at least out.len() bytes.
        unsafe { self.handles.device().memcpy_dtoh(out, self.ptr) }
            .map_err(|e| LinalgError::vendor("memcpy_dtoh", StatusOrigin::Memcpy, e.code()))
    }
}

impl<D: Device> Drop for DeviceAllocation<'_, D> {
    fn drop(&mut self) {
        if self.ptr == 0 {
            return;
        }
        // SAFETY: ptr came from malloc on this device and is freed only here.
        if let Err(e) = unsafe { self.handles.device().free(self.ptr) } {
            warn!(
                ptr = format_args!("{:#x}", self.ptr),
                bytes = self.bytes,
                code = e.code(),
                "failed to release device allocation"
            );
        }
    }
}

impl<D: Device> std::fmt::Debug for DeviceAllocation<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("bytes", &self.bytes)
            .finish()
    }
}

// ============================================================================
// Typed buffer
// ============================================================================

/// Owning device buffer of `len` elements of `T`.
///
/// Views handed out by [`DeviceBuffer::as_matrix`] and friends borrow the
/// buffer, so the device memory outlives every reference to it.
pub struct DeviceBuffer<'h, T: DeviceCopy, D: Device> {
    alloc: DeviceAllocation<'h, D>,
    len: usize,
    _marker: PhantomData<T>,
}

/// Caller-owned workspace sized by a workspace query.
pub type ScratchBuffer<'h, T, D> = DeviceBuffer<'h, T, D>;

impl<'h, T: DeviceCopy, D: Device> DeviceBuffer<'h, T, D> {
    /// Allocate `len` elements. Contents are unspecified.
    pub fn new(handles: &'h DeviceHandles<D>, len: usize) -> Result<Self> {
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or_else(|| LinalgError::dimension("alloc", format!("{len} elements overflow")))?;
        Ok(Self {
            alloc: DeviceAllocation::new(handles, bytes)?,
            len,
            _marker: PhantomData,
        })
    }

    /// Allocate and fill from host memory.
    pub fn from_host(handles: &'h DeviceHandles<D>, data: &[T]) -> Result<Self> {
        let buffer = Self::new(handles, data.len())?;
        buffer.alloc.write_bytes(as_bytes(data))?;
        Ok(buffer)
    }

    /// Allocate `len` copies of `value`.
    pub fn filled(handles: &'h DeviceHandles<D>, len: usize, value: T) -> Result<Self> {
        Self::from_host(handles, &vec![value; len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ptr(&self) -> DevicePtr {
        self.alloc.ptr()
    }

    pub fn handles(&self) -> &'h DeviceHandles<D> {
        self.alloc.handles()
    }

    /// Overwrite the buffer with `data`, which must have exactly `len` elements.
    pub fn copy_from_host(&mut self, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(LinalgError::dimension(
                "copy_from_host",
                format!("expected {} elements, got {}", self.len, data.len()),
            ));
        }
        self.alloc.write_bytes(as_bytes(data))
    }

    /// Blocking download of the whole buffer.
    pub fn copy_to_host(&self) -> Result<Vec<T>> {
        let mut out = vec![T::default(); self.len];
        self.alloc.read_bytes(as_bytes_mut(&mut out))?;
        Ok(out)
    }

    /// The whole buffer as a vector reference.
    pub fn as_vector(&self) -> DeviceVectorRef<'_, T, D> {
        // SAFETY: the buffer owns `len` elements at this address.
        unsafe { DeviceVectorRef::from_raw_parts(self.handles(), self.ptr(), self.len) }
    }

    /// `len` elements starting at element `offset`.
    pub fn vector_at(&self, offset: usize, len: usize) -> Result<DeviceVectorRef<'_, T, D>> {
        self.check_span("vector_at", offset, len)?;
        // SAFETY: bounds checked above.
        Ok(unsafe {
            DeviceVectorRef::from_raw_parts(self.handles(), self.element_ptr(offset), len)
        })
    }

    /// Column-major rows×cols matrix with leading dimension `ld` at the start
    /// of the buffer.
    pub fn as_matrix(
        &self,
        rows: usize,
        cols: usize,
        ld: usize,
    ) -> Result<DeviceMatrixRef<'_, T, D>> {
        self.matrix_at(0, rows, cols, ld)
    }

    /// Column-major matrix starting at element `offset`.
    pub fn matrix_at(
        &self,
        offset: usize,
        rows: usize,
        cols: usize,
        ld: usize,
    ) -> Result<DeviceMatrixRef<'_, T, D>> {
        self.check_span("matrix_at", offset, checked_span("matrix_at", rows, cols, ld)?)?;
        // SAFETY: bounds checked above; ld is validated by from_raw_parts.
        unsafe {
            DeviceMatrixRef::from_raw_parts(
                self.handles(),
                self.element_ptr(offset),
                rows,
                cols,
                ld,
            )
        }
    }

    /// `count` matrices laid out `stride` elements apart, as separate references.
    pub fn matrices(
        &self,
        rows: usize,
        cols: usize,
        ld: usize,
        stride: usize,
        count: usize,
    ) -> Result<Vec<DeviceMatrixRef<'_, T, D>>> {
        last_offset("matrices", stride, count)?;
        (0..count)
            .map(|i| self.matrix_at(i * stride, rows, cols, ld))
            .collect()
    }

    /// `count` matrices laid out `stride` elements apart, as one strided batch.
    pub fn as_strided_matrices(
        &self,
        rows: usize,
        cols: usize,
        ld: usize,
        stride: usize,
        count: usize,
    ) -> Result<StridedMatrixBatch<'_, T, D>> {
        const OP: &str = "as_strided_matrices";
        let first = self.as_matrix(rows, cols, ld)?;
        if count > 1 {
            self.check_span(OP, last_offset(OP, stride, count)?, first.span())?;
        }
        StridedMatrixBatch::new(first, stride, count)
    }

    /// `count` vectors of `len` elements laid out `stride` elements apart.
    pub fn as_strided_vectors(
        &self,
        len: usize,
        stride: usize,
        count: usize,
    ) -> Result<StridedVectorBatch<'_, T, D>> {
        const OP: &str = "as_strided_vectors";
        let first = self.vector_at(0, len)?;
        if count > 1 {
            self.check_span(OP, last_offset(OP, stride, count)?, len)?;
        }
        StridedVectorBatch::new(first, stride, count)
    }

    fn element_ptr(&self, offset: usize) -> DevicePtr {
        self.ptr() + (offset * size_of::<T>()) as u64
    }

    fn check_span(&self, operation: &'static str, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(LinalgError::dimension(
                operation,
                format!(
                    "view of {len} elements at offset {offset} exceeds buffer of {}",
                    self.len
                ),
            )),
        }
    }
}

impl<T: DeviceCopy, D: Device> std::fmt::Debug for DeviceBuffer<'_, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &format_args!("{:#x}", self.ptr()))
            .field("len", &self.len)
            .finish()
    }
}

/// Elements spanned by a column-major rows×cols matrix with leading dimension
/// `ld`, or `None` when that count overflows `usize`.
pub fn matrix_span(rows: usize, cols: usize, ld: usize) -> Option<usize> {
    if rows == 0 || cols == 0 {
        return Some(0);
    }
    ld.checked_mul(cols - 1)?.checked_add(rows)
}

/// [`matrix_span`] as a `DimensionMismatch` on overflow.
pub(crate) fn checked_span(
    operation: &'static str,
    rows: usize,
    cols: usize,
    ld: usize,
) -> Result<usize> {
    matrix_span(rows, cols, ld).ok_or_else(|| {
        LinalgError::dimension(operation, format!("{rows}x{cols} matrix with ld {ld} overflows"))
    })
}

/// Offset of item `count - 1` of a batch laid out `stride` elements apart.
fn last_offset(operation: &'static str, stride: usize, count: usize) -> Result<usize> {
    count
        .saturating_sub(1)
        .checked_mul(stride)
        .ok_or_else(|| LinalgError::dimension(operation, format!("stride {stride} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, VendorCall};

    #[test]
    fn test_matrix_span() {
        assert_eq!(matrix_span(3, 2, 4), Some(7));
        assert_eq!(matrix_span(0, 5, 1), Some(0));
        assert_eq!(matrix_span(4, 0, 4), Some(0));
        assert_eq!(matrix_span(2, 2, 2), Some(4));
        assert_eq!(matrix_span(2, 3, usize::MAX), None);
        assert_eq!(matrix_span(usize::MAX, 1, usize::MAX), Some(usize::MAX));
    }

    #[test]
    fn test_oversized_layouts_are_rejected() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(16).unwrap();

        let err = buffer.as_matrix(2, 3, usize::MAX).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { operation: "matrix_at", .. }));

        let err = buffer.as_strided_matrices(2, 2, 2, usize::MAX, 3).unwrap_err();
        assert!(matches!(
            err,
            LinalgError::DimensionMismatch { operation: "as_strided_matrices", .. }
        ));
        let err = buffer.as_strided_vectors(2, usize::MAX / 2, 4).unwrap_err();
        assert!(matches!(
            err,
            LinalgError::DimensionMismatch { operation: "as_strided_vectors", .. }
        ));
        let err = buffer.matrices(2, 2, 2, usize::MAX, 3).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { operation: "matrices", .. }));
    }

    #[test]
    fn test_upload_download() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let data = vec![1.0f64, 2.0, 3.0, 4.0];
        let buffer = handles.upload(&data).unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.copy_to_host().unwrap(), data);
    }

    #[test]
    fn test_copy_from_host_length_mismatch() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let mut buffer = handles.alloc::<f32>(3).unwrap();
        let err = buffer.copy_from_host(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
        buffer.copy_from_host(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(buffer.copy_to_host().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_drop_releases_memory() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        {
            let _a = handles.alloc::<f64>(16).unwrap();
            let _b = handles.alloc::<i32>(4).unwrap();
            assert_eq!(device.stats().live_allocations, 2);
        }
        assert_eq!(device.stats().live_allocations, 0);
        assert_eq!(device.stats().total_frees, 2);
    }

    #[test]
    fn test_zero_length_buffer_skips_device() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let buffer = handles.alloc::<f64>(0).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.ptr(), 0);
        assert_eq!(buffer.copy_to_host().unwrap(), Vec::<f64>::new());
        assert_eq!(device.stats().total_allocations, 0);
    }

    #[test]
    fn test_allocation_failure() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        device.fail_next(VendorCall::Malloc, 2);
        let err = handles.alloc::<f64>(8).unwrap_err();
        assert!(matches!(
            err,
            LinalgError::AllocationFailure {
                space: MemorySpace::Device,
                bytes: 64,
                code: Some(2),
            }
        ));
    }

    #[test]
    fn test_views_are_bounds_checked() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(12).unwrap();

        assert!(buffer.as_matrix(3, 4, 3).is_ok());
        assert!(buffer.as_matrix(3, 4, 4).is_err());
        assert!(buffer.vector_at(10, 2).is_ok());
        assert!(buffer.vector_at(10, 3).is_err());

        let views = buffer.matrices(2, 2, 2, 4, 3).unwrap();
        assert_eq!(views.len(), 3);
        assert_eq!(views[2].ptr(), buffer.ptr() + 8 * 8);
        assert!(buffer.matrices(2, 2, 2, 4, 4).is_err());

        let strided = buffer.as_strided_matrices(2, 2, 2, 4, 3).unwrap();
        assert_eq!(strided.count(), 3);
        assert!(buffer.as_strided_matrices(2, 2, 2, 5, 3).is_err());
    }
}
