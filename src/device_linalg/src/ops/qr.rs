//! QR/LQ factorization and orthogonal-factor generation.
//!
//! LQ (`gelqf`) and its left-orthogonal generator (`glq`) have no device
//! implementation on this backend and fail unconditionally.

use tracing::debug;

use super::workspace::{ensure_workspace, geqrf_buffer_size, gqr_buffer_size};
use super::{batch_shape, batch_vectors, dim, ensure_len};
use crate::device::{BlasLibrary, Device, SolverLibrary};
use crate::error::{LinalgError, Result};
use crate::marshal::PointerArray;
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef, StridedMatrixBatch, StridedVectorBatch};
use crate::scalar::Scalar;
use crate::status::{check_call, check_info, read_batch_info, BatchStatus, DeviceStatus};

/// Householder QR of `a` in place.
///
/// The upper triangle receives R, the part below the diagonal the
/// reflectors, and `tau` (≥ min(m, n) elements) their scalars. `work` must
/// hold at least [`geqrf_buffer_size`] elements. The status lives in an
/// internal device integer released on every exit path.
pub fn geqrf<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    tau: DeviceVectorRef<'_, T, D>,
    work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    const OP: &str = "geqrf";
    let handles = a.handles();
    handles.ensure_same(OP, tau.handles())?;
    handles.ensure_same(OP, work.handles())?;

    ensure_len(OP, "tau", a.min_dim(), tau.len())?;
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    ensure_workspace(OP, geqrf_buffer_size(a)?, work.len())?;
    let lwork = dim(OP, "lwork", work.len())?;

    let status = DeviceStatus::new(handles)?;
    // SAFETY: shapes and lengths validated above.
    check_call(OP, unsafe {
        handles.solver().geqrf::<T>(
            m,
            n,
            a.ptr(),
            lda,
            tau.ptr(),
            work.ptr(),
            lwork,
            status.ptr(),
        )
    })?;
    check_info(OP, status.read(OP)?)
}

/// LQ factorization. Not available on this backend.
pub fn gelqf<T: Scalar, D: Device>(
    _a: DeviceMatrixRef<'_, T, D>,
    _tau: DeviceVectorRef<'_, T, D>,
    _work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    Err(LinalgError::UnimplementedOperation { operation: "gelqf" })
}

/// Overwrite `a` (m×n, holding `k` reflectors from [`geqrf`]) with the
/// leading n columns of the orthogonal (unitary) factor Q.
///
/// Requires m ≥ n ≥ k and at least k elements in `tau`.
pub fn gqr<T: Scalar, D: Device>(
    a: DeviceMatrixRef<'_, T, D>,
    k: usize,
    tau: DeviceVectorRef<'_, T, D>,
    work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    const OP: &str = "gqr";
    let handles = a.handles();
    handles.ensure_same(OP, tau.handles())?;
    handles.ensure_same(OP, work.handles())?;

    check_reflectors(OP, a.rows(), a.cols(), k)?;
    ensure_len(OP, "tau", k, tau.len())?;
    let (m, n, lda) = (dim(OP, "m", a.rows())?, dim(OP, "n", a.cols())?, dim(OP, "lda", a.ld())?);
    let k32 = dim(OP, "k", k)?;
    ensure_workspace(OP, gqr_buffer_size(a, k, tau)?, work.len())?;
    let lwork = dim(OP, "lwork", work.len())?;

    let status = DeviceStatus::new(handles)?;
    // SAFETY: shapes and lengths validated above.
    check_call(OP, unsafe {
        handles.solver().orgqr::<T>(
            m,
            n,
            k32,
            a.ptr(),
            lda,
            tau.ptr(),
            work.ptr(),
            lwork,
            status.ptr(),
        )
    })?;
    check_info(OP, status.read(OP)?)
}

/// [`gqr`] over a strided batch, issued as exactly one vendor call.
///
/// Matrix `i` is `a.matrix(i)` and its reflector scalars `tau.vector(i)`;
/// `info` receives one status per matrix. `work` must hold at least
/// [`gqr_buffer_size`] elements for one matrix of the batch.
pub fn gqr_strided<T: Scalar, D: Device>(
    a: StridedMatrixBatch<'_, T, D>,
    k: usize,
    tau: StridedVectorBatch<'_, T, D>,
    work: DeviceVectorRef<'_, T, D>,
    info: DeviceVectorRef<'_, i32, D>,
) -> Result<BatchStatus> {
    const OP: &str = "gqr_strided";
    let first = a.first();
    let handles = first.handles();
    handles.ensure_same(OP, tau.first().handles())?;
    handles.ensure_same(OP, work.handles())?;
    handles.ensure_same(OP, info.handles())?;

    if tau.count() != a.count() {
        return Err(LinalgError::dimension(
            OP,
            format!("{} tau vectors for {} matrices", tau.count(), a.count()),
        ));
    }
    if a.count() == 0 {
        return Ok(BatchStatus::default());
    }
    check_reflectors(OP, first.rows(), first.cols(), k)?;
    ensure_len(OP, "tau", k, tau.first().len())?;
    ensure_len(OP, "info array", a.count(), info.len())?;
    let (m, n, lda) = (
        dim(OP, "m", first.rows())?,
        dim(OP, "n", first.cols())?,
        dim(OP, "lda", first.ld())?,
    );
    let k32 = dim(OP, "k", k)?;
    let batch = dim(OP, "batch", a.count())?;
    let stride_a = i64::try_from(a.stride())
        .map_err(|_| LinalgError::dimension(OP, "matrix stride exceeds the vendor limit"))?;
    let stride_tau = i64::try_from(tau.stride())
        .map_err(|_| LinalgError::dimension(OP, "tau stride exceeds the vendor limit"))?;
    ensure_workspace(OP, gqr_buffer_size(first, k, tau.first())?, work.len())?;
    let lwork = dim(OP, "lwork", work.len())?;

    debug!(operation = OP, m, n, k, batch, "issuing strided batched call");
    // SAFETY: the strided batches were bounds-checked when built; the
    // remaining lengths were validated above.
    check_call(OP, unsafe {
        handles.solver().orgqr_strided_batched::<T>(
            m,
            n,
            k32,
            first.ptr(),
            lda,
            stride_a,
            tau.first().ptr(),
            stride_tau,
            work.ptr(),
            lwork,
            info.ptr(),
            batch,
        )
    })?;
    read_batch_info(OP, &info, a.count())
}

/// Generate the left-orthogonal factor of an LQ factorization. Not
/// available on this backend.
pub fn glq<T: Scalar, D: Device>(
    _a: DeviceMatrixRef<'_, T, D>,
    _k: usize,
    _tau: DeviceVectorRef<'_, T, D>,
    _work: DeviceVectorRef<'_, T, D>,
) -> Result<()> {
    Err(LinalgError::UnimplementedOperation { operation: "glq" })
}

/// QR of a batch of same-shaped matrices through the vendor pointer-array
/// entry point. `tau[i]` receives the scalars of `a[i]`.
///
/// The vendor reports only a host-side parameter check, not per-matrix
/// status.
pub fn geqrf_batched<T: Scalar, D: Device>(
    a: &[DeviceMatrixRef<'_, T, D>],
    tau: &[DeviceVectorRef<'_, T, D>],
) -> Result<()> {
    geqrf_pointer_batch("geqrf_batched", a, tau)
}

/// QR of a strided batch. The vendor has no strided QR entry point, so the
/// per-matrix addresses are derived from the strides and marshaled.
pub fn geqrf_strided<T: Scalar, D: Device>(
    a: StridedMatrixBatch<'_, T, D>,
    tau: StridedVectorBatch<'_, T, D>,
) -> Result<()> {
    const OP: &str = "geqrf_strided";
    if tau.count() != a.count() {
        return Err(LinalgError::dimension(
            OP,
            format!("{} tau vectors for {} matrices", tau.count(), a.count()),
        ));
    }
    let matrices: Vec<_> = (0..a.count()).map(|i| a.matrix(i)).collect();
    let vectors: Vec<_> = (0..tau.count()).map(|i| tau.vector(i)).collect();
    geqrf_pointer_batch(OP, &matrices, &vectors)
}

fn geqrf_pointer_batch<T: Scalar, D: Device>(
    operation: &'static str,
    a: &[DeviceMatrixRef<'_, T, D>],
    tau: &[DeviceVectorRef<'_, T, D>],
) -> Result<()> {
    if a.is_empty() && tau.is_empty() {
        return Ok(());
    }
    let shape = batch_shape(operation, a)?;
    batch_vectors(operation, a, tau, shape.rows.min(shape.cols))?;
    let handles = a[0].handles();
    let (m, n, lda, batch) = (
        dim(operation, "m", shape.rows)?,
        dim(operation, "n", shape.cols)?,
        dim(operation, "lda", shape.ld)?,
        dim(operation, "batch", a.len())?,
    );

    let a_array = PointerArray::from_matrices(handles, "a", a)?;
    let tau_array = PointerArray::from_vectors(handles, "tau", tau)?;
    debug!(operation, m, n, batch, "issuing batched call");
    let mut info = 0i32;
    // SAFETY: shapes and tau lengths validated above.
    let called = check_call(operation, unsafe {
        handles.blas().geqrf_batched::<T>(
            m,
            n,
            a_array.ptr(),
            lda,
            tau_array.ptr(),
            &mut info,
            batch,
        )
    });
    drop((a_array, tau_array));
    called?;
    check_info(operation, info)
}

/// Orthogonal-factor generation needs m ≥ n ≥ k.
fn check_reflectors(operation: &'static str, m: usize, n: usize, k: usize) -> Result<()> {
    if n > m || k > n {
        return Err(LinalgError::dimension(
            operation,
            format!("need m >= n >= k, got m = {m}, n = {n}, k = {k}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DeviceHandles;
    use crate::sim::{SimDevice, VendorCall};
    use crate::test_utils::{assert_orthonormal_columns, matmul, random_matrix, upper_triangle};
    use approx::assert_relative_eq;

    #[test]
    fn test_geqrf_then_gqr_reconstructs() {
        let (m, n) = (5, 3);
        let host = random_matrix::<f64>(m, n, 11);
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let a = handles.upload(&host).unwrap();
        let tau = handles.alloc::<f64>(n).unwrap();
        let a_ref = a.as_matrix(m, n, m).unwrap();
        let work = handles.alloc::<f64>(geqrf_buffer_size(a_ref).unwrap()).unwrap();

        geqrf(a_ref, tau.as_vector(), work.as_vector()).unwrap();
        let r = upper_triangle(m, n, &a.copy_to_host().unwrap());

        let gwork = handles
            .alloc::<f64>(gqr_buffer_size(a_ref, n, tau.as_vector()).unwrap())
            .unwrap();
        gqr(a_ref, n, tau.as_vector(), gwork.as_vector()).unwrap();
        let q = a.copy_to_host().unwrap();

        assert_orthonormal_columns(m, n, &q, 1e-12);
        let back = matmul(m, n, n, &q, &r);
        for (x, y) in back.iter().zip(&host) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gqr_shape_checked() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let a = handles.alloc::<f64>(12).unwrap();
        let tau = handles.alloc::<f64>(4).unwrap();
        let work = handles.alloc::<f64>(16).unwrap();

        // wide matrix: n > m
        let err = gqr(a.as_matrix(3, 4, 3).unwrap(), 3, tau.as_vector(), work.as_vector())
            .unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
        // too many reflectors
        let err = gqr(a.as_matrix(4, 3, 4).unwrap(), 4, tau.as_vector(), work.as_vector())
            .unwrap_err();
        assert!(matches!(err, LinalgError::DimensionMismatch { .. }));
        assert_eq!(device.calls(VendorCall::Orgqr), 0);
    }

    #[test]
    fn test_geqrf_strided_matches_single() {
        let (m, n, count) = (4, 3, 3);
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let host: Vec<f64> = (0..count)
            .flat_map(|i| random_matrix::<f64>(m, n, 100 + i as u64))
            .collect();

        let batched = handles.upload(&host).unwrap();
        let taus = handles.alloc::<f64>(n * count).unwrap();
        geqrf_strided(
            batched.as_strided_matrices(m, n, m, m * n, count).unwrap(),
            taus.as_strided_vectors(n, n, count).unwrap(),
        )
        .unwrap();

        let single = handles.upload(&host).unwrap();
        let single_taus = handles.alloc::<f64>(n * count).unwrap();
        let work = handles.alloc::<f64>(16).unwrap();
        for i in 0..count {
            geqrf(
                single.matrix_at(i * m * n, m, n, m).unwrap(),
                single_taus.vector_at(i * n, n).unwrap(),
                work.as_vector(),
            )
            .unwrap();
        }

        assert_eq!(batched.copy_to_host().unwrap(), single.copy_to_host().unwrap());
        assert_eq!(taus.copy_to_host().unwrap(), single_taus.copy_to_host().unwrap());
    }

    #[test]
    fn test_gqr_strided_single_vendor_call() {
        let (m, n, count) = (3, 3, 4);
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let host: Vec<f64> = (0..count)
            .flat_map(|i| random_matrix::<f64>(m, n, 7 + i as u64))
            .collect();
        let a = handles.upload(&host).unwrap();
        let tau = handles.alloc::<f64>(n * count).unwrap();
        let info = handles.alloc::<i32>(count).unwrap();
        let batch = a.as_strided_matrices(m, n, m, m * n, count).unwrap();
        let taus = tau.as_strided_vectors(n, n, count).unwrap();

        geqrf_strided(batch, taus).unwrap();
        let work = handles
            .alloc::<f64>(gqr_buffer_size(batch.first(), n, taus.first()).unwrap())
            .unwrap();
        let status = gqr_strided(batch, n, taus, work.as_vector(), info.as_vector()).unwrap();

        assert_eq!(status.statuses(), &[0; 4]);
        assert_eq!(device.calls(VendorCall::OrgqrStridedBatched), 1);
        assert_eq!(device.calls(VendorCall::Orgqr), 0);
        let q = a.copy_to_host().unwrap();
        for i in 0..count {
            assert_orthonormal_columns(m, n, &q[i * m * n..(i + 1) * m * n], 1e-12);
        }
    }

    #[test]
    fn test_lq_family_is_unimplemented() {
        let device = SimDevice::new();
        let handles = DeviceHandles::new(device.clone()).unwrap();
        let a = handles.alloc::<f32>(4).unwrap();
        let v = a.as_vector();
        let m = a.as_matrix(2, 2, 2).unwrap();
        assert!(matches!(
            gelqf(m, v, v),
            Err(LinalgError::UnimplementedOperation { operation: "gelqf" })
        ));
        assert!(matches!(
            glq(m, 2, v, v),
            Err(LinalgError::UnimplementedOperation { operation: "glq" })
        ));
        assert_eq!(device.calls(VendorCall::Memcpy), 0);
    }
}
