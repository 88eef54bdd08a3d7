//! Buffer-size negotiation.
//!
//! Each query returns the minimum scratch element count (of the matrix
//! element type) the matching operation accepts for the given shape. The
//! operations re-check the supplied workspace against the same answer and
//! fail with `DimensionMismatch` instead of letting the vendor overrun it.

use tracing::{trace, warn};

use super::dim;
use crate::device::{Device, SolverLibrary};
use crate::error::{LinalgError, Result, StatusOrigin, VendorError};
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::Scalar;

fn negotiated(
    operation: &'static str,
    rows: usize,
    cols: usize,
    answer: std::result::Result<usize, VendorError>,
) -> Result<usize> {
    match answer {
        Ok(lwork) => {
            trace!(operation, rows, cols, lwork, "workspace query");
            Ok(lwork)
        }
        Err(e) => {
            warn!(operation, code = e.code(), "workspace query rejected");
            Err(LinalgError::vendor(operation, StatusOrigin::Call, e.code()))
        }
    }
}

/// Fail with `DimensionMismatch` when `supplied < required`.
pub(crate) fn ensure_workspace(
    operation: &'static str,
    required: usize,
    supplied: usize,
) -> Result<()> {
    if supplied < required {
        return Err(LinalgError::dimension(
            operation,
            format!("workspace holds {supplied} elements, {required} required"),
        ));
    }
    Ok(())
}

/// Scratch elements for [`getrf`](super::lu::getrf), from the vendor solver.
pub fn getrf_buffer_size<T: Scalar, D: Device>(a: DeviceMatrixRef<'_, T, D>) -> Result<usize> {
    const OP: &str = "getrf_buffer_size";
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    let answer = a.handles().solver().getrf_buffer_size::<T>(m, n, a.ptr(), lda);
    negotiated(OP, a.rows(), a.cols(), answer)
}

/// Scratch elements for [`getri`](super::inverse::getri): exactly rows², the
/// identity right-hand side the inverse is solved into.
pub fn getri_buffer_size<T: Scalar, D: Device>(a: DeviceMatrixRef<'_, T, D>) -> Result<usize> {
    let lwork = a.rows() * a.rows();
    trace!(operation = "getri_buffer_size", rows = a.rows(), lwork, "workspace query");
    Ok(lwork)
}

/// Scratch elements for [`geqrf`](super::qr::geqrf), from the vendor solver.
pub fn geqrf_buffer_size<T: Scalar, D: Device>(a: DeviceMatrixRef<'_, T, D>) -> Result<usize> {
    const OP: &str = "geqrf_buffer_size";
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    let answer = a.handles().solver().geqrf_buffer_size::<T>(m, n, a.ptr(), lda);
    negotiated(OP, a.rows(), a.cols(), answer)
}

/// Scratch elements for [`gqr`](super::qr::gqr) and
/// [`gqr_strided`](super::qr::gqr_strided) with `k` reflectors.
pub fn gqr_buffer_size<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    k: usize,
    tau: DeviceVectorRef<'_, T, D>,
) -> Result<usize> {
    const OP: &str = "gqr_buffer_size";
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    let k = dim(OP, "k", k)?;
    let answer = a
        .handles()
        .solver()
        .orgqr_buffer_size::<T>(m, n, k, a.ptr(), lda, tau.ptr());
    negotiated(OP, a.rows(), a.cols(), answer)
}

/// Scratch elements for [`gelqf`](super::qr::gelqf).
///
/// LQ has no device implementation; the answer is a zero placeholder, or
/// `UnimplementedOperation` when `strict_workspace_queries` is set.
pub fn gelqf_buffer_size<T: Scalar, D: Device>(a: DeviceMatrixRef<'_, T, D>) -> Result<usize> {
    unimplemented_query("gelqf_buffer_size", a)
}

/// Scratch elements for [`glq`](super::qr::glq). See [`gelqf_buffer_size`].
pub fn glq_buffer_size<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    _k: usize,
) -> Result<usize> {
    unimplemented_query("glq_buffer_size", a)
}

fn unimplemented_query<T: Scalar, D: Device>(
    operation: &'static str,
    a: DeviceMatrixRef<'_, T, D>,
) -> Result<usize> {
    if a.handles().config().strict_workspace_queries {
        return Err(LinalgError::UnimplementedOperation { operation });
    }
    trace!(operation, rows = a.rows(), cols = a.cols(), lwork = 0, "placeholder workspace query");
    Ok(0)
}

/// Scratch elements for [`gesvd`](super::svd::gesvd), from the vendor solver.
pub fn gesvd_buffer_size<T: Scalar, D: Device>(a: DeviceMatrixRef<'_, T, D>) -> Result<usize> {
    const OP: &str = "gesvd_buffer_size";
    let (m, n) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?);
    let answer = a.handles().solver().gesvd_buffer_size::<T>(m, n);
    negotiated(OP, a.rows(), a.cols(), answer)
}
