//! Singular value decomposition.

use super::workspace::{ensure_workspace, gesvd_buffer_size};
use super::{dim, ensure_len};
use crate::device::{Device, DevicePtr, SolverLibrary, SvdJob};
use crate::error::{LinalgError, Result};
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::Scalar;
use crate::status::{check_call, check_info, DeviceStatus};

/// `A = U·Σ·Vᴴ` of the m×n matrix `a`, destroying `a`.
///
/// `s` receives the min(m, n) singular values in descending order. `u` is
/// required when `jobu` is [`SvdJob::All`] (m×m) or [`SvdJob::Slim`]
/// (m×min(m, n)); `vt` likewise for `jobvt` (n×n or min(m, n)×n). With
/// [`SvdJob::Overwrite`] the vectors replace the leading part of `a`; at
/// most one of the two jobs may overwrite.
///
/// # Errors
/// `DimensionMismatch` for a missing or undersized output, a short `s` or
/// workspace, or two overwriting jobs; `VendorLibraryError` for a rejected
/// call or a non-zero info code (the count of unconverged superdiagonals).
pub fn gesvd<T: Scalar, D: Device>(
    jobu: SvdJob,
    jobvt: SvdJob,
    a: DeviceMatrixRef<'_, T, D>,
    s: DeviceVectorRef<'_, T::Real, D>,
    u: Option<DeviceMatrixRef<'_, T, D>>,
    vt: Option<DeviceMatrixRef<'_, T, D>>,
    work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    run("gesvd", jobu, jobvt, a, s, u, vt, work, None)
}

/// [`gesvd`] with the caller-supplied real workspace used in complex
/// arithmetic (at least min(m, n) - 1 elements for complex element types).
/// Real element types accept and ignore it.
#[allow(clippy::too_many_arguments)]
pub fn gesvd_with_real_workspace<T: Scalar, D: Device>(
    jobu: SvdJob,
    jobvt: SvdJob,
    a: DeviceMatrixRef<'_, T, D>,
    s: DeviceVectorRef<'_, T::Real, D>,
    u: Option<DeviceMatrixRef<'_, T, D>>,
    vt: Option<DeviceMatrixRef<'_, T, D>>,
    work: DeviceVectorRef<'_, T, D>,
    rwork: DeviceVectorRef<'_, T::Real, D>,
) -> Result<()> {
    const OP: &str = "gesvd_with_real_workspace";
    a.handles().ensure_same(OP, rwork.handles())?;
    if T::KIND.is_complex() {
        ensure_len(OP, "real workspace", a.min_dim().saturating_sub(1), rwork.len())?;
    }
    run(OP, jobu, jobvt, a, s, u, vt, work, Some(rwork.ptr()))
}

#[allow(clippy::too_many_arguments)]
fn run<T: Scalar, D: Device>(
    operation: &'static str,
    jobu: SvdJob,
    jobvt: SvdJob,
    a: DeviceMatrixRef<'_, T, D>,
    s: DeviceVectorRef<'_, T::Real, D>,
    u: Option<DeviceMatrixRef<'_, T, D>>,
    vt: Option<DeviceMatrixRef<'_, T, D>>,
    work: DeviceVectorRef<'_, T, D>,
    rwork: Option<DevicePtr>,
) -> Result<()> {
    let handles = a.handles();
    handles.ensure_same(operation, s.handles())?;
    handles.ensure_same(operation, work.handles())?;

    if jobu == SvdJob::Overwrite && jobvt == SvdJob::Overwrite {
        return Err(LinalgError::dimension(
            operation,
            "U and Vᴴ cannot both overwrite A",
        ));
    }
    let (rows, cols, k) = (a.rows(), a.cols(), a.min_dim());
    ensure_len(operation, "singular values", k, s.len())?;

    let u_cols = if jobu == SvdJob::All { rows } else { k };
    let (u_ptr, ldu) = output(operation, "U", jobu, u, rows, u_cols)?;
    let vt_rows = if jobvt == SvdJob::All { cols } else { k };
    let (vt_ptr, ldvt) = output(operation, "Vᴴ", jobvt, vt, vt_rows, cols)?;
    for out in u.iter().chain(vt.iter()) {
        handles.ensure_same(operation, out.handles())?;
    }

    let (m, n, lda) = (
        dim(operation, "m", rows)?,
        dim(operation, "n", cols)?,
        dim(operation, "lda", a.ld())?,
    );
    let (ldu, ldvt) = (dim(operation, "ldu", ldu)?, dim(operation, "ldvt", ldvt)?);
    ensure_workspace(operation, gesvd_buffer_size(a)?, work.len())?;
    let lwork = dim(operation, "lwork", work.len())?;

    let status = DeviceStatus::new(handles)?;
    // SAFETY: every output required by the jobs was shape-checked above.
    check_call(operation, unsafe {
        handles.solver().gesvd::<T>(
            jobu,
            jobvt,
            m,
            n,
            a.ptr(),
            lda,
            s.ptr(),
            u_ptr,
            ldu,
            vt_ptr,
            ldvt,
            work.ptr(),
            lwork,
            rwork,
            status.ptr(),
        )
    })?;
    check_info(operation, status.read(operation)?)
}

/// Address and leading dimension of a singular-vector output.
///
/// Jobs that write no separate output yield a null address with `ld = 1`.
fn output<T: Scalar, D: Device>(
    operation: &'static str,
    name: &str,
    job: SvdJob,
    out: Option<DeviceMatrixRef<'_, T, D>>,
    rows: usize,
    cols: usize,
) -> Result<(DevicePtr, usize)> {
    if !job.needs_output() {
        return Ok((0, 1));
    }
    let out = out.ok_or_else(|| {
        LinalgError::dimension(operation, format!("job {:?} needs an output for {name}", job))
    })?;
    if out.rows() < rows || out.cols() < cols {
        return Err(LinalgError::dimension(
            operation,
            format!(
                "{name} is {}x{}, job {:?} needs {rows}x{cols}",
                out.rows(),
                out.cols(),
                job
            ),
        ));
    }
    Ok((out.ptr(), out.ld()))
}
