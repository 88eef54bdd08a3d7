//! LU factorization with partial pivoting.

use tracing::debug;

use super::workspace::{ensure_workspace, getrf_buffer_size};
use super::{batch_shape, dim, ensure_len};
use crate::device::{BlasLibrary, Device, SolverLibrary};
use crate::error::{LinalgError, Result};
use crate::marshal::PointerArray;
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::Scalar;
use crate::status::{check_call, check_device_info, read_batch_info, BatchStatus};

/// Factor `a` in place as `P·L·U`.
///
/// `piv` receives the 1-based pivots and must hold min(m, n) + 1 integers:
/// the vendor info code is written to its trailing slot and read back from
/// there, so no separate status allocation is made. `work` must hold at
/// least [`getrf_buffer_size`] elements.
///
/// # Errors
/// `DimensionMismatch` for a short pivot array or workspace;
/// `VendorLibraryError` carrying the vendor code when the call fails or the
/// info code is non-zero (e.g. `i` for an exactly singular `U(i, i)`).
pub fn getrf<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    piv: DeviceVectorRef<'_, i32, D>,
    work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    const OP: &str = "getrf";
    let handles = a.handles();
    handles.ensure_same(OP, piv.handles())?;
    handles.ensure_same(OP, work.handles())?;

    let k = a.min_dim();
    ensure_len(OP, "pivot array", k + 1, piv.len())?;
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    ensure_workspace(OP, getrf_buffer_size(a)?, work.len())?;

    let info = piv.offset(k);
    // SAFETY: shapes and lengths validated above; references outlive the call.
    check_call(OP, unsafe {
        handles
            .solver()
            .getrf::<T>(m, n, a.ptr(), lda, work.ptr(), piv.ptr(), info)
    })?;
    check_device_info(handles, OP, info)
}

/// Factor a batch of same-shaped square matrices in one vendor call.
///
/// `piv` holds n pivots per matrix back to back and `info` one status per
/// matrix. On success the host copy of `info` is returned; if any matrix
/// reports a non-zero status the call fails with the first one and the full
/// array attached.
pub fn getrf_batched<T: Scalar, D: Device>(
    a: &[DeviceMatrixRef<'_, T, D>],
    piv: DeviceVectorRef<'_, i32, D>,
    info: DeviceVectorRef<'_, i32, D>,
) -> Result<BatchStatus> {
    const OP: &str = "getrf_batched";
    if a.is_empty() {
        return Ok(BatchStatus::default());
    }
    let shape = batch_shape(OP, a)?;
    let handles = a[0].handles();
    handles.ensure_same(OP, piv.handles())?;
    handles.ensure_same(OP, info.handles())?;
    if shape.rows != shape.cols {
        return Err(LinalgError::dimension(
            OP,
            format!("batched LU needs square matrices, got {}x{}", shape.rows, shape.cols),
        ));
    }
    let count = a.len();
    ensure_len(OP, "pivot array", shape.rows * count, piv.len())?;
    ensure_len(OP, "info array", count, info.len())?;
    let (n, lda, batch) = (
        dim(OP, "n", shape.rows)?,
        dim(OP, "lda", shape.ld)?,
        dim(OP, "batch", count)?,
    );

    let a_array = PointerArray::from_matrices(handles, "a", a)?;
    debug!(operation = OP, n, batch, "issuing batched call");
    // SAFETY: every matrix is n×n with leading dimension lda; pivot and info
    // arrays were length-checked above.
    let called = check_call(OP, unsafe {
        handles
            .blas()
            .getrf_batched::<T>(n, a_array.ptr(), lda, piv.ptr(), info.ptr(), batch)
    });
    drop(a_array);
    called?;

    read_batch_info(OP, &info, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusOrigin;
    use crate::handle::DeviceHandles;
    use crate::sim::{SimDevice, VendorCall};
    use approx::assert_relative_eq;

    #[test]
    fn test_getrf_known_matrix() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let a = handles.upload(&[4.0f64, 6.0, 3.0, 3.0]).unwrap();
        let piv = handles.alloc::<i32>(3).unwrap();
        let a_ref = a.as_matrix(2, 2, 2).unwrap();
        let work = handles.alloc::<f64>(getrf_buffer_size(a_ref).unwrap()).unwrap();

        getrf(a_ref, piv.as_vector(), work.as_vector()).unwrap();

        let lu = a.copy_to_host().unwrap();
        assert_relative_eq!(lu[0], 6.0);
        assert_relative_eq!(lu[1], 2.0 / 3.0);
        assert_relative_eq!(lu[2], 3.0);
        assert_relative_eq!(lu[3], 1.0);
        assert_eq!(piv.copy_to_host().unwrap(), vec![2, 2, 0]);
    }

    #[test]
    fn test_getrf_singular_reports_info() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let a = handles.upload(&[1.0f64, 2.0, 2.0, 4.0]).unwrap();
        let piv = handles.alloc::<i32>(3).unwrap();
        let work = handles.alloc::<f64>(4).unwrap();

        let err =
            getrf(a.as_matrix(2, 2, 2).unwrap(), piv.as_vector(), work.as_vector()).unwrap_err();
        assert!(matches!(
            err,
            LinalgError::VendorLibraryError {
                operation: "getrf",
                code: 2,
                origin: StatusOrigin::Info,
                ..
            }
        ));
    }

    #[test]
    fn test_getrf_needs_trailing_pivot_slot() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let a = handles.upload(&[1.0f32, 0.0, 0.0, 1.0]).unwrap();
        let piv = handles.alloc::<i32>(2).unwrap();
        let work = handles.alloc::<f32>(4).unwrap();

        let err =
            getrf(a.as_matrix(2, 2, 2).unwrap(), piv.as_vector(), work.as_vector()).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
        assert_eq!(device.calls(VendorCall::Getrf), 0);
    }

    #[test]
    fn test_getrf_short_workspace() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let a = handles.upload(&[1.0f64; 9]).unwrap();
        let piv = handles.alloc::<i32>(4).unwrap();
        let a_ref = a.as_matrix(3, 3, 3).unwrap();
        let lwork = getrf_buffer_size(a_ref).unwrap();
        let work = handles.alloc::<f64>(lwork - 1).unwrap();

        let err = getrf(a_ref, piv.as_vector(), work.as_vector()).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
        assert_eq!(device.calls(VendorCall::Getrf), 0);
    }

    #[test]
    fn test_getrf_batched_ragged_batch() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let storage = handles.alloc::<f64>(32).unwrap();
        let piv = handles.alloc::<i32>(8).unwrap();
        let info = handles.alloc::<i32>(2).unwrap();
        let a = [
            storage.matrix_at(0, 2, 2, 2).unwrap(),
            storage.matrix_at(8, 3, 3, 3).unwrap(),
        ];
        let err = getrf_batched(&a, piv.as_vector(), info.as_vector()).unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_getrf_batched_empty() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let piv = handles.alloc::<i32>(0).unwrap();
        let status = getrf_batched::<f64, _>(&[], piv.as_vector(), piv.as_vector()).unwrap();
        assert!(status.is_empty());
    }
}
