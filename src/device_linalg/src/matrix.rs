//! Non-owning references to device matrices and vectors.
//!
//! References carry shape metadata and borrow the [`DeviceHandles`] they
//! were created against. They do not own memory: whoever allocated the
//! storage keeps it alive for the duration of every call. Storage is
//! column-major with an explicit leading dimension.

use std::marker::PhantomData;
use std::mem::size_of;

use crate::device::{Device, DevicePtr};
use crate::error::{LinalgError, Result};
use crate::handle::DeviceHandles;
use crate::memory::{checked_span, matrix_span};
use crate::scalar::{DeviceCopy, ElementType, Scalar};

// ============================================================================
// Matrix
// ============================================================================

/// Column-major device matrix reference.
pub struct DeviceMatrixRef<'h, T, D: Device> {
    ptr: DevicePtr,
    rows: usize,
    cols: usize,
    ld: usize,
    handles: &'h DeviceHandles<D>,
    _marker: PhantomData<T>,
}

impl<T, D: Device> Clone for DeviceMatrixRef<'_, T, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, D: Device> Copy for DeviceMatrixRef<'_, T, D> {}

impl<'h, T: DeviceCopy, D: Device> DeviceMatrixRef<'h, T, D> {
    /// Wrap raw device memory.
    ///
    /// Fails with `DimensionMismatch` unless `ld >= max(1, rows)`.
    ///
    /// # Safety
    /// `ptr` must address at least `ld * (cols - 1) + rows` elements of `T`
    /// on the device owned by `handles`, for as long as the reference is used.
    pub unsafe fn from_raw_parts(
        handles: &'h DeviceHandles<D>,
        ptr: DevicePtr,
        rows: usize,
        cols: usize,
        ld: usize,
    ) -> Result<Self> {
        if ld < rows.max(1) {
            return Err(LinalgError::dimension(
                "matrix reference",
                format!("leading dimension {ld} < rows {rows}"),
            ));
        }
        checked_span("matrix reference", rows, cols, ld)?;
        Ok(Self {
            ptr,
            rows,
            cols,
            ld,
            handles,
            _marker: PhantomData,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Leading dimension (distance between columns, in elements).
    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn handles(&self) -> &'h DeviceHandles<D> {
        self.handles
    }

    pub fn min_dim(&self) -> usize {
        self.rows.min(self.cols)
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Whether columns are stored back to back (`ld == rows`).
    pub fn is_contiguous(&self) -> bool {
        self.ld == self.rows
    }

    /// Elements between the first and one past the last stored element.
    pub fn span(&self) -> usize {
        // construction rejects shapes whose span overflows
        matrix_span(self.rows, self.cols, self.ld).unwrap_or(usize::MAX)
    }

    /// Same storage viewed as one vector of `span()` elements.
    pub fn as_vector(&self) -> DeviceVectorRef<'h, T, D> {
        // SAFETY: the matrix spans exactly this many elements.
        unsafe { DeviceVectorRef::from_raw_parts(self.handles, self.ptr, self.span()) }
    }
}

impl<T: Scalar, D: Device> DeviceMatrixRef<'_, T, D> {
    pub fn element_type(&self) -> ElementType {
        T::KIND
    }
}

impl<T, D: Device> std::fmt::Debug for DeviceMatrixRef<'_, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMatrixRef")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("ld", &self.ld)
            .field("device", &self.handles.ordinal())
            .finish()
    }
}

// ============================================================================
// Vector
// ============================================================================

/// Contiguous device vector reference (pivots, tau, singular values,
/// workspaces, status arrays).
pub struct DeviceVectorRef<'h, T, D: Device> {
    ptr: DevicePtr,
    len: usize,
    handles: &'h DeviceHandles<D>,
    _marker: PhantomData<T>,
}

impl<T, D: Device> Clone for DeviceVectorRef<'_, T, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, D: Device> Copy for DeviceVectorRef<'_, T, D> {}

impl<'h, T: DeviceCopy, D: Device> DeviceVectorRef<'h, T, D> {
    /// Wrap raw device memory.
    ///
    /// # Safety
    /// `ptr` must address at least `len` elements of `T` on the device owned
    /// by `handles`, for as long as the reference is used.
    pub unsafe fn from_raw_parts(
        handles: &'h DeviceHandles<D>,
        ptr: DevicePtr,
        len: usize,
    ) -> Self {
        Self {
            ptr,
            len,
            handles,
            _marker: PhantomData,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn handles(&self) -> &'h DeviceHandles<D> {
        self.handles
    }

    /// Device address of element `index` (which may be one past the end).
    pub fn offset(&self, index: usize) -> DevicePtr {
        debug_assert!(index <= self.len);
        self.ptr + (index * size_of::<T>()) as u64
    }
}

impl<T, D: Device> std::fmt::Debug for DeviceVectorRef<'_, T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceVectorRef")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("len", &self.len)
            .field("device", &self.handles.ordinal())
            .finish()
    }
}

// ============================================================================
// Strided batches
// ============================================================================

/// `count` same-shaped matrices stored `stride` elements apart.
#[derive(Debug)]
pub struct StridedMatrixBatch<'h, T, D: Device> {
    first: DeviceMatrixRef<'h, T, D>,
    stride: usize,
    count: usize,
}

impl<T, D: Device> Clone for StridedMatrixBatch<'_, T, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, D: Device> Copy for StridedMatrixBatch<'_, T, D> {}

impl<'h, T: DeviceCopy, D: Device> StridedMatrixBatch<'h, T, D> {
    /// Fails with `DimensionMismatch` when consecutive matrices would overlap.
    ///
    /// Callers must have checked the whole batch against its storage; outside
    /// the crate batches come from [`DeviceBuffer::as_strided_matrices`].
    ///
    /// [`DeviceBuffer::as_strided_matrices`]: crate::memory::DeviceBuffer::as_strided_matrices
    pub(crate) fn new(
        first: DeviceMatrixRef<'h, T, D>,
        stride: usize,
        count: usize,
    ) -> Result<Self> {
        if count > 1 && stride < first.span() {
            return Err(LinalgError::dimension(
                "strided matrix batch",
                format!("stride {stride} < matrix span {}", first.span()),
            ));
        }
        Ok(Self {
            first,
            stride,
            count,
        })
    }

    pub fn first(&self) -> DeviceMatrixRef<'h, T, D> {
        self.first
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn handles(&self) -> &'h DeviceHandles<D> {
        self.first.handles()
    }

    /// Reference to matrix `index` of the batch.
    pub fn matrix(&self, index: usize) -> DeviceMatrixRef<'h, T, D> {
        assert!(index < self.count, "matrix index out of range");
        // in bounds: the batch was checked against a buffer whose byte size fits
        DeviceMatrixRef {
            ptr: self.first.ptr + (index * self.stride * size_of::<T>()) as u64,
            ..self.first
        }
    }
}

/// `count` same-length vectors stored `stride` elements apart.
#[derive(Debug)]
pub struct StridedVectorBatch<'h, T, D: Device> {
    first: DeviceVectorRef<'h, T, D>,
    stride: usize,
    count: usize,
}

impl<T, D: Device> Clone for StridedVectorBatch<'_, T, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, D: Device> Copy for StridedVectorBatch<'_, T, D> {}

impl<'h, T: DeviceCopy, D: Device> StridedVectorBatch<'h, T, D> {
    /// Fails with `DimensionMismatch` when consecutive vectors would overlap.
    ///
    /// Storage contract as for [`StridedMatrixBatch::new`]; outside the crate
    /// batches come from [`DeviceBuffer::as_strided_vectors`].
    ///
    /// [`DeviceBuffer::as_strided_vectors`]: crate::memory::DeviceBuffer::as_strided_vectors
    pub(crate) fn new(
        first: DeviceVectorRef<'h, T, D>,
        stride: usize,
        count: usize,
    ) -> Result<Self> {
        if count > 1 && stride < first.len() {
            return Err(LinalgError::dimension(
                "strided vector batch",
                format!("stride {stride} < vector length {}", first.len()),
            ));
        }
        Ok(Self {
            first,
            stride,
            count,
        })
    }

    pub fn first(&self) -> DeviceVectorRef<'h, T, D> {
        self.first
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn vector(&self, index: usize) -> DeviceVectorRef<'h, T, D> {
        assert!(index < self.count, "vector index out of range");
        // in bounds, as for matrices
        DeviceVectorRef {
            ptr: self.first.ptr + (index * self.stride * size_of::<T>()) as u64,
            ..self.first
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDevice;

    #[test]
    fn test_leading_dimension_must_cover_rows() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(16).unwrap();
        let raw = |ptr, rows, cols, ld| unsafe {
            DeviceMatrixRef::<f64, _>::from_raw_parts(&handles, ptr, rows, cols, ld)
        };
        let err = raw(buffer.ptr(), 4, 2, 3).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));

        // ld must be at least one even for empty matrices
        assert!(raw(0, 0, 0, 0).is_err());
        assert!(raw(0, 0, 0, 1).is_ok());

        // spans that overflow are rejected up front
        assert!(raw(buffer.ptr(), 2, 3, usize::MAX).is_err());
    }

    #[test]
    fn test_matrix_metadata() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f32>(20).unwrap();
        let a = buffer.as_matrix(3, 4, 5).unwrap();
        assert_eq!(a.min_dim(), 3);
        assert!(!a.is_square());
        assert!(!a.is_contiguous());
        assert_eq!(a.span(), 18);
        assert_eq!(a.element_type(), ElementType::F32);
        assert_eq!(a.as_vector().len(), 18);
    }

    #[test]
    fn test_vector_offset() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<i32>(5).unwrap();
        let v = buffer.as_vector();
        assert_eq!(v.offset(0), v.ptr());
        assert_eq!(v.offset(5), v.ptr() + 20);
    }

    #[test]
    fn test_strided_batch_addresses() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(32).unwrap();
        let batch = buffer.as_strided_matrices(2, 2, 2, 8, 4).unwrap();
        for i in 0..4 {
            assert_eq!(batch.matrix(i).ptr(), buffer.ptr() + (i * 8 * 8) as u64);
            assert_eq!(batch.matrix(i).rows(), 2);
        }

        let overlapping = StridedMatrixBatch::new(batch.first(), 3, 2);
        assert!(overlapping.is_err());

        let taus = buffer.as_strided_vectors(2, 4, 3).unwrap();
        assert_eq!(taus.vector(2).ptr(), buffer.ptr() + 8 * 8);
        assert!(StridedVectorBatch::new(taus.first(), 1, 2).is_err());
    }
}
