//! Matrix inversion.
//!
//! [`getri`] inverts an LU-factored matrix by solving `A·X = I` into the
//! caller's workspace and copying `X` back over `A`; no dedicated device
//! inverse kernel is involved. The batched forms go through the vendor BLAS
//! pointer-array entry points.

use std::mem::size_of;

use tracing::debug;

use super::{batch_shape, dim, ensure_len, BatchShape};
use crate::device::{BlasLibrary, Device, SolverLibrary, Transpose};
use crate::error::{LinalgError, Result};
use crate::marshal::PointerArray;
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::Scalar;
use crate::status::{
    check_call, check_info, check_memcpy, read_batch_info, BatchStatus, DeviceStatus,
};

/// Replace the LU-factored n×n matrix `a` (from [`getrf`](super::lu::getrf))
/// with its inverse.
///
/// Defined only for contiguous square storage: `a.ld()` must equal n, and
/// `work` must hold at least n² elements (see
/// [`getri_buffer_size`](super::workspace::getri_buffer_size)).
pub fn getri<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    piv: DeviceVectorRef<'_, i32, D>,
    work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    const OP: &str = "getri";
    let handles = a.handles();
    handles.ensure_same(OP, piv.handles())?;
    handles.ensure_same(OP, work.handles())?;

    if !a.is_square() {
        return Err(LinalgError::dimension(
            OP,
            format!("inversion needs a square matrix, got {}x{}", a.rows(), a.cols()),
        ));
    }
    let order = a.rows();
    if work.len() < order * order {
        return Err(LinalgError::dimension(
            OP,
            format!("workspace holds {} elements, {} required", work.len(), order * order),
        ));
    }
    if a.ld() != order {
        return Err(LinalgError::dimension(
            OP,
            format!("leading dimension {} must equal the order {order}", a.ld()),
        ));
    }
    ensure_len(OP, "pivot array", order, piv.len())?;
    if order == 0 {
        return Ok(());
    }
    let n = dim(OP, "n", order)?;

    let device = handles.device();
    // SAFETY: work holds at least n² elements.
    check_call(OP, unsafe { device.set_identity::<T>(n, work.ptr(), n) })?;

    let status = DeviceStatus::new(handles)?;
    // SAFETY: a holds n×n LU factors with ld n, piv n pivots and work the
    // n×n right-hand side.
    check_call(OP, unsafe {
        handles.solver().getrs::<T>(
            Transpose::None,
            n,
            n,
            a.ptr(),
            n,
            piv.ptr(),
            work.ptr(),
            n,
            status.ptr(),
        )
    })?;
    check_info(OP, status.read(OP)?)?;

    // SAFETY: both regions hold n² contiguous elements and are distinct.
    check_memcpy(OP, unsafe {
        device.memcpy_dtod(a.ptr(), work.ptr(), order * order * size_of::<T>())
    })
}

/// Invert a batch of LU-factored matrices out of place: `c[i] = a[i]⁻¹`.
///
/// `piv` holds n pivots per matrix back to back, `info` one status per matrix.
pub fn getri_batched<T: Scalar, D: Device>(
    a: &[DeviceMatrixRef<'_, T, D>],
    piv: DeviceVectorRef<'_, i32, D>,
    c: &[DeviceMatrixRef<'_, T, D>],
    info: DeviceVectorRef<'_, i32, D>,
) -> Result<BatchStatus> {
    const OP: &str = "getri_batched";
    if a.is_empty() && c.is_empty() {
        return Ok(BatchStatus::default());
    }
    let (a_shape, c_shape) = paired_shapes(OP, a, c)?;
    let handles = a[0].handles();
    handles.ensure_same(OP, c[0].handles())?;
    handles.ensure_same(OP, piv.handles())?;
    handles.ensure_same(OP, info.handles())?;

    let count = a.len();
    ensure_len(OP, "pivot array", a_shape.rows * count, piv.len())?;
    ensure_len(OP, "info array", count, info.len())?;
    let (n, lda, ldc, batch) = (
        dim(OP, "n", a_shape.rows)?,
        dim(OP, "lda", a_shape.ld)?,
        dim(OP, "ldc", c_shape.ld)?,
        dim(OP, "batch", count)?,
    );

    let a_array = PointerArray::from_matrices(handles, "a", a)?;
    let c_array = PointerArray::from_matrices(handles, "c", c)?;
    debug!(operation = OP, n, batch, "issuing batched call");
    // SAFETY: shapes, pivots and info validated above.
    let called = check_call(OP, unsafe {
        handles.blas().getri_batched::<T>(
            n,
            a_array.ptr(),
            lda,
            piv.ptr(),
            c_array.ptr(),
            ldc,
            info.ptr(),
            batch,
        )
    });
    drop((a_array, c_array));
    called?;

    read_batch_info(OP, &info, count)
}

/// Invert a batch of unfactored matrices directly: `c[i] = a[i]⁻¹`.
///
/// Input and output element types are independent (e.g. single-precision
/// input, double-precision output); backends that cannot convert report
/// their not-supported status.
pub fn matinv_batched<A: Scalar, C: Scalar, D: Device>(
    a: &[DeviceMatrixRef<'_, A, D>],
    c: &[DeviceMatrixRef<'_, C, D>],
    info: DeviceVectorRef<'_, i32, D>,
) -> Result<BatchStatus> {
    const OP: &str = "matinv_batched";
    if a.is_empty() && c.is_empty() {
        return Ok(BatchStatus::default());
    }
    let (a_shape, c_shape) = paired_shapes(OP, a, c)?;
    let handles = a[0].handles();
    handles.ensure_same(OP, c[0].handles())?;
    handles.ensure_same(OP, info.handles())?;

    let count = a.len();
    ensure_len(OP, "info array", count, info.len())?;
    let (n, lda, ldc, batch) = (
        dim(OP, "n", a_shape.rows)?,
        dim(OP, "lda", a_shape.ld)?,
        dim(OP, "ldc", c_shape.ld)?,
        dim(OP, "batch", count)?,
    );

    let a_array = PointerArray::from_matrices(handles, "a", a)?;
    let c_array = PointerArray::from_matrices(handles, "c", c)?;
    debug!(operation = OP, n, batch, "issuing batched call");
    // SAFETY: shapes and info validated above.
    let called = check_call(OP, unsafe {
        handles.blas().matinv_batched::<A, C>(
            n,
            a_array.ptr(),
            lda,
            c_array.ptr(),
            ldc,
            info.ptr(),
            batch,
        )
    });
    drop((a_array, c_array));
    called?;

    read_batch_info(OP, &info, count)
}

/// Input and output batches must pair up one-to-one as square matrices of
/// the same order.
fn paired_shapes<A: Scalar, C: Scalar, D: Device>(
    operation: &'static str,
    a: &[DeviceMatrixRef<'_, A, D>],
    c: &[DeviceMatrixRef<'_, C, D>],
) -> Result<(BatchShape, BatchShape)> {
    if a.len() != c.len() {
        return Err(LinalgError::dimension(
            operation,
            format!("{} inputs for {} outputs", a.len(), c.len()),
        ));
    }
    let a_shape = batch_shape(operation, a)?;
    let c_shape = batch_shape(operation, c)?;
    let square = a_shape.rows == a_shape.cols;
    if !square || (c_shape.rows, c_shape.cols) != (a_shape.rows, a_shape.cols) {
        return Err(LinalgError::dimension(
            operation,
            format!(
                "inputs are {}x{}, outputs {}x{}; both must be the same square order",
                a_shape.rows, a_shape.cols, c_shape.rows, c_shape.cols
            ),
        ));
    }
    Ok((a_shape, c_shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DeviceHandles;
    use crate::ops::lu::getrf;
    use crate::sim::{SimDevice, VendorCall};
    use approx::assert_relative_eq;
    use nalgebra::Complex;

    #[test]
    fn test_getri_diagonal() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let a = handles.upload(&[2.0f64, 0.0, 0.0, 4.0]).unwrap();
        let piv = handles.alloc::<i32>(3).unwrap();
        let work = handles.alloc::<f64>(4).unwrap();
        let a_ref = a.as_matrix(2, 2, 2).unwrap();

        getrf(a_ref, piv.as_vector(), work.as_vector()).unwrap();
        getri(a_ref, piv.as_vector(), work.as_vector()).unwrap();

        let inv = a.copy_to_host().unwrap();
        assert_relative_eq!(inv[0], 0.5);
        assert_relative_eq!(inv[1], 0.0);
        assert_relative_eq!(inv[2], 0.0);
        assert_relative_eq!(inv[3], 0.25);
    }

    #[test]
    fn test_getri_preconditions_precede_vendor_calls() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let storage = handles.alloc::<f64>(12).unwrap();
        let piv = handles.alloc::<i32>(4).unwrap();
        let small = handles.alloc::<f64>(8).unwrap();
        let work = handles.alloc::<f64>(9).unwrap();

        let a = storage.as_matrix(3, 3, 3).unwrap();
        let err = getri(a, piv.as_vector(), small.as_vector()).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { operation: "getri", .. }));

        let padded = storage.as_matrix(3, 3, 4).unwrap();
        let err = getri(padded, piv.as_vector(), work.as_vector()).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));

        assert_eq!(device.calls(VendorCall::SetIdentity), 0);
        assert_eq!(device.calls(VendorCall::Getrs), 0);
    }

    #[test]
    fn test_getri_status_is_released_on_error() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let a = handles.upload(&[2.0f64, 0.0, 0.0, 4.0]).unwrap();
        let piv = handles.upload(&[1i32, 2, 0]).unwrap();
        let work = handles.alloc::<f64>(4).unwrap();
        let live = device.stats().live_allocations;

        device.fail_next(VendorCall::Getrs, 6);
        let err =
            getri(a.as_matrix(2, 2, 2).unwrap(), piv.as_vector(), work.as_vector()).unwrap_err();
        assert_eq!(err.vendor_code(), Some(6));
        assert_eq!(device.stats().live_allocations, live);
    }

    #[test]
    fn test_matinv_batched_complex() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let z = |re: f64, im: f64| Complex::new(re, im);
        // diag(i, 2) and [[1, 1], [0, 1]]
        let a = handles
            .upload(&[
                z(0.0, 1.0),
                z(0.0, 0.0),
                z(0.0, 0.0),
                z(2.0, 0.0),
                z(1.0, 0.0),
                z(0.0, 0.0),
                z(1.0, 0.0),
                z(1.0, 0.0),
            ])
            .unwrap();
        let c = handles.alloc::<Complex<f64>>(8).unwrap();
        let info = handles.alloc::<i32>(2).unwrap();

        let status = matinv_batched(
            &a.matrices(2, 2, 2, 4, 2).unwrap(),
            &c.matrices(2, 2, 2, 4, 2).unwrap(),
            info.as_vector(),
        )
        .unwrap();
        assert_eq!(status.statuses(), &[0, 0]);

        let inv = c.copy_to_host().unwrap();
        assert_relative_eq!(inv[0].im, -1.0);
        assert_relative_eq!(inv[3].re, 0.5);
        assert_relative_eq!(inv[6].re, -1.0);
        assert_relative_eq!(inv[7].re, 1.0);
    }

    #[test]
    fn test_paired_batches_must_match() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let a = handles.alloc::<f64>(8).unwrap();
        let c = handles.alloc::<f32>(18).unwrap();
        let info = handles.alloc::<i32>(2).unwrap();

        let inputs = a.matrices(2, 2, 2, 4, 2).unwrap();
        let err = matinv_batched(&inputs, &c.matrices(3, 3, 3, 9, 2).unwrap(), info.as_vector())
            .unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));

        let err = matinv_batched(&inputs, &c.matrices(2, 2, 2, 4, 1).unwrap(), info.as_vector())
            .unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_matinv_batched_order_limit_is_not_supported() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let n = 33;
        let a = handles.alloc::<f64>(n * n).unwrap();
        let c = handles.alloc::<f64>(n * n).unwrap();
        let info = handles.alloc::<i32>(1).unwrap();
        let live = device.stats().live_allocations;

        let err = matinv_batched(
            &[a.as_matrix(n, n, n).unwrap()],
            &[c.as_matrix(n, n, n).unwrap()],
            info.as_vector(),
        )
        .unwrap_err();
        assert_eq!(err.vendor_code(), Some(crate::sim::status::BLAS_NOT_SUPPORTED));
        assert_eq!(device.stats().live_allocations, live);
    }
}
