//! Simulated dense-solver handle.

use rayon::prelude::*;

use super::kernels::{self, C64};
use super::{check_pivots, count, dims, element, status, SimDevice, VendorCall};
use crate::device::{DevicePtr, SolverLibrary, SvdJob, Transpose};
use crate::error::VendorError;
use crate::scalar::Scalar;

/// Workspace answers of the simulated solver, in elements.
pub(crate) fn getrf_lwork(n: usize) -> usize {
    n.max(1)
}

pub(crate) fn geqrf_lwork(n: usize) -> usize {
    n.max(1)
}

pub(crate) fn orgqr_lwork(n: usize) -> usize {
    n.max(1)
}

pub(crate) fn gesvd_lwork(m: usize, n: usize) -> usize {
    (5 * m.min(n) + m.max(n)).max(1)
}

/// Dense-solver handle of a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimSolver {
    device: SimDevice,
}

impl SimSolver {
    pub(crate) fn new(device: SimDevice) -> Self {
        Self { device }
    }
}

fn lwork_at_least(lwork: i32, required: usize) -> Result<(), VendorError> {
    if lwork < 0 || (lwork as usize) < required {
        return Err(VendorError(status::INVALID_VALUE));
    }
    Ok(())
}

impl SolverLibrary for SimSolver {
    fn getrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        _a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError> {
        self.device.enter(VendorCall::GetrfBufferSize)?;
        let (_, n, _) = dims(m, n, lda)?;
        Ok(getrf_lwork(n))
    }

    unsafe fn getrf<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
        work: DevicePtr,
        ipiv: DevicePtr,
        info: DevicePtr,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::Getrf)?;
        let (m, n, lda) = dims(m, n, lda)?;
        self.device.check_range::<T>(work, getrf_lwork(n))?;

        let mut lu = self.device.load_matrix::<T>(a, m, n, lda)?;
        let mut pivots = vec![0i32; m.min(n)];
        let result = kernels::getrf(m, n, &mut lu, &mut pivots);

        self.device.store_matrix::<T>(a, m, n, lda, &lu)?;
        self.device.write_slice(ipiv, &pivots)?;
        self.device.store_infos(info, vec![result], fault)
    }

    unsafe fn getrs<T: Scalar>(
        &self,
        trans: Transpose,
        n: i32,
        nrhs: i32,
        a: DevicePtr,
        lda: i32,
        ipiv: DevicePtr,
        b: DevicePtr,
        ldb: i32,
        info: DevicePtr,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::Getrs)?;
        let (n, _, lda) = dims(n, n, lda)?;
        let (_, nrhs, ldb) = dims(n as i32, nrhs, ldb)?;

        let lu = self.device.load_matrix::<T>(a, n, n, lda)?;
        let pivots = self.device.read_vec::<i32>(ipiv, n)?;
        check_pivots(&pivots, n)?;
        let mut x = self.device.load_matrix::<T>(b, n, nrhs, ldb)?;
        kernels::getrs(trans, n, nrhs, &lu, &pivots, &mut x);

        self.device.store_matrix::<T>(b, n, nrhs, ldb, &x)?;
        self.device.store_infos(info, vec![0], fault)
    }

    fn geqrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        _a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError> {
        self.device.enter(VendorCall::GeqrfBufferSize)?;
        let (_, n, _) = dims(m, n, lda)?;
        Ok(geqrf_lwork(n))
    }

    unsafe fn geqrf<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
        tau: DevicePtr,
        work: DevicePtr,
        lwork: i32,
        info: DevicePtr,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::Geqrf)?;
        let (m, n, lda) = dims(m, n, lda)?;
        lwork_at_least(lwork, geqrf_lwork(n))?;
        self.device.check_range::<T>(work, lwork as usize)?;

        let mut qr = self.device.load_matrix::<T>(a, m, n, lda)?;
        let mut taus = vec![C64::new(0.0, 0.0); m.min(n)];
        kernels::geqrf(m, n, &mut qr, &mut taus);

        self.device.store_matrix::<T>(a, m, n, lda, &qr)?;
        self.device.store_vector::<T>(tau, &taus)?;
        self.device.store_infos(info, vec![0], fault)
    }

    fn orgqr_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        k: i32,
        _a: DevicePtr,
        lda: i32,
        _tau: DevicePtr,
    ) -> Result<usize, VendorError> {
        self.device.enter(VendorCall::OrgqrBufferSize)?;
        let (m, n, _) = dims(m, n, lda)?;
        orgqr_shape(m, n, k)?;
        Ok(orgqr_lwork(n))
    }

    unsafe fn orgqr<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        k: i32,
        a: DevicePtr,
        lda: i32,
        tau: DevicePtr,
        work: DevicePtr,
        lwork: i32,
        info: DevicePtr,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::Orgqr)?;
        let (m, n, lda) = dims(m, n, lda)?;
        let k = orgqr_shape(m, n, k)?;
        lwork_at_least(lwork, orgqr_lwork(n))?;
        self.device.check_range::<T>(work, lwork as usize)?;

        let mut q = self.device.load_matrix::<T>(a, m, n, lda)?;
        let taus = self.device.load_vector::<T>(tau, k)?;
        kernels::orgqr(m, n, k, &mut q, &taus);

        self.device.store_matrix::<T>(a, m, n, lda, &q)?;
        self.device.store_infos(info, vec![0], fault)
    }

    unsafe fn orgqr_strided_batched<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        k: i32,
        a: DevicePtr,
        lda: i32,
        stride_a: i64,
        tau: DevicePtr,
        stride_tau: i64,
        work: DevicePtr,
        lwork: i32,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::OrgqrStridedBatched)?;
        let (m, n, lda) = dims(m, n, lda)?;
        let k = orgqr_shape(m, n, k)?;
        let batch = count(batch)?;
        let stride_a = usize::try_from(stride_a).map_err(|_| VendorError(status::INVALID_VALUE))?;
        let stride_tau =
            usize::try_from(stride_tau).map_err(|_| VendorError(status::INVALID_VALUE))?;
        lwork_at_least(lwork, orgqr_lwork(n))?;
        self.device.check_range::<T>(work, lwork as usize)?;

        let mut inputs = Vec::with_capacity(batch);
        for i in 0..batch {
            let a_i = element::<T>(a, i * stride_a);
            let tau_i = element::<T>(tau, i * stride_tau);
            inputs.push((
                self.device.load_matrix::<T>(a_i, m, n, lda)?,
                self.device.load_vector::<T>(tau_i, k)?,
            ));
        }

        let outputs: Vec<Vec<C64>> = inputs
            .into_par_iter()
            .map(|(mut q, taus)| {
                kernels::orgqr(m, n, k, &mut q, &taus);
                q
            })
            .collect();

        for (i, q) in outputs.iter().enumerate() {
            self.device
                .store_matrix::<T>(element::<T>(a, i * stride_a), m, n, lda, q)?;
        }
        self.device.store_infos(info, vec![0; batch], fault)
    }

    fn gesvd_buffer_size<T: Scalar>(&self, m: i32, n: i32) -> Result<usize, VendorError> {
        self.device.enter(VendorCall::GesvdBufferSize)?;
        let (m, n, _) = dims(m, n, m.max(1))?;
        Ok(gesvd_lwork(m, n))
    }

    unsafe fn gesvd<T: Scalar>(
        &self,
        jobu: SvdJob,
        jobvt: SvdJob,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
        s: DevicePtr,
        u: DevicePtr,
        ldu: i32,
        vt: DevicePtr,
        ldvt: i32,
        work: DevicePtr,
        lwork: i32,
        rwork: Option<DevicePtr>,
        info: DevicePtr,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::Gesvd)?;
        let (m, n, lda) = dims(m, n, lda)?;
        let k = m.min(n);
        if jobu == SvdJob::Overwrite && jobvt == SvdJob::Overwrite {
            return Err(VendorError(status::INVALID_VALUE));
        }
        if jobu.needs_output() && (ldu as i64) < m.max(1) as i64 {
            return Err(VendorError(status::INVALID_VALUE));
        }
        let vt_rows = if jobvt == SvdJob::All { n } else { k };
        if jobvt.needs_output() && (ldvt as i64) < vt_rows.max(1) as i64 {
            return Err(VendorError(status::INVALID_VALUE));
        }
        if !kernels::job_supported(jobu, m, k) || !kernels::job_supported(jobvt, n, k) {
            return Err(VendorError(status::NOT_SUPPORTED));
        }
        lwork_at_least(lwork, gesvd_lwork(m, n))?;
        self.device.check_range::<T>(work, lwork as usize)?;
        if let (Some(rwork), true) = (rwork, T::KIND.is_complex()) {
            self.device
                .check_range::<T::Real>(rwork, k.saturating_sub(1))?;
        }

        let input = self.device.load_matrix::<T>(a, m, n, lda)?;
        let Some(svd) = kernels::gesvd(m, n, &input, T::KIND.is_complex()) else {
            // unconverged superdiagonals
            return self
                .device
                .store_infos(info, vec![k.max(1) as i32], fault);
        };

        let singular: Vec<C64> = svd.s.iter().map(|&x| C64::new(x, 0.0)).collect();
        self.device.store_vector::<T::Real>(s, &singular)?;

        match jobu {
            SvdJob::All | SvdJob::Slim => {
                self.device.store_matrix::<T>(u, m, k, ldu as usize, &svd.u)?
            }
            SvdJob::Overwrite => self.device.store_matrix::<T>(a, m, k, lda, &svd.u)?,
            SvdJob::None => {}
        }
        match jobvt {
            SvdJob::All | SvdJob::Slim => {
                self.device.store_matrix::<T>(vt, k, n, ldvt as usize, &svd.vt)?
            }
            SvdJob::Overwrite => self.device.store_matrix::<T>(a, k, n, lda, &svd.vt)?,
            SvdJob::None => {}
        }
        self.device.store_infos(info, vec![0], fault)
    }
}

/// `orgqr` requires m ≥ n ≥ k ≥ 0.
fn orgqr_shape(m: usize, n: usize, k: i32) -> Result<usize, VendorError> {
    match usize::try_from(k) {
        Ok(k) if n <= m && k <= n => Ok(k),
        _ => Err(VendorError(status::INVALID_VALUE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::memory::as_bytes;
    use approx::assert_relative_eq;

    fn upload<T: crate::scalar::DeviceCopy>(device: &SimDevice, data: &[T]) -> DevicePtr {
        let ptr = device.malloc(std::mem::size_of_val(data).max(1)).unwrap();
        unsafe { device.memcpy_htod(ptr, as_bytes(data)) }.unwrap();
        ptr
    }

    #[test]
    fn test_getrf_writes_factors_pivots_and_info() {
        let device = SimDevice::new();
        let solver = device.create_solver().unwrap();
        let a = upload(&device, &[4.0f64, 6.0, 3.0, 3.0]);
        let ipiv = upload(&device, &[0i32; 3]);
        let work = upload(&device, &[0.0f64; 2]);

        unsafe { solver.getrf::<f64>(2, 2, a, 2, work, ipiv, element::<i32>(ipiv, 2)) }.unwrap();

        let lu = device.read_vec::<f64>(a, 4).unwrap();
        assert_relative_eq!(lu[0], 6.0);
        assert_eq!(device.read_vec::<i32>(ipiv, 3).unwrap(), vec![2, 2, 0]);
    }

    #[test]
    fn test_geqrf_rejects_short_workspace() {
        let device = SimDevice::new();
        let solver = device.create_solver().unwrap();
        let a = upload(&device, &[1.0f32; 6]);
        let tau = upload(&device, &[0.0f32; 2]);
        let work = upload(&device, &[0.0f32; 2]);
        let info = upload(&device, &[0i32]);

        let lwork = solver.geqrf_buffer_size::<f32>(3, 2, a, 3).unwrap();
        assert_eq!(lwork, 2);
        let short = unsafe { solver.geqrf::<f32>(3, 2, a, 3, tau, work, 1, info) };
        assert_eq!(short, Err(VendorError(status::INVALID_VALUE)));
        unsafe { solver.geqrf::<f32>(3, 2, a, 3, tau, work, lwork as i32, info) }.unwrap();
    }

    #[test]
    fn test_out_of_range_address_is_invalid() {
        let device = SimDevice::new();
        let solver = device.create_solver().unwrap();
        let a = upload(&device, &[1.0f64; 3]);
        let ipiv = upload(&device, &[0i32; 3]);
        let work = upload(&device, &[0.0f64; 2]);
        // a holds 3 elements, a 2x2 matrix needs 4
        let result = unsafe { solver.getrf::<f64>(2, 2, a, 2, work, ipiv, ipiv) };
        assert_eq!(result, Err(VendorError(status::INVALID_VALUE)));
    }

    #[test]
    fn test_info_fault_overrides_status() {
        let device = SimDevice::new();
        let solver = device.create_solver().unwrap();
        let a = upload(&device, &[2.0f64, 0.0, 0.0, 2.0]);
        let tau = upload(&device, &[0.0f64; 2]);
        let work = upload(&device, &[0.0f64; 2]);
        let info = upload(&device, &[0i32]);

        device.fail_info(VendorCall::Geqrf, 0, -5);
        unsafe { solver.geqrf::<f64>(2, 2, a, 2, tau, work, 2, info) }.unwrap();
        assert_eq!(device.read_vec::<i32>(info, 1).unwrap(), vec![-5]);
    }

    #[test]
    fn test_gesvd_job_support() {
        let device = SimDevice::new();
        let solver = device.create_solver().unwrap();
        let a = upload(&device, &[1.0f64; 6]);
        let s = upload(&device, &[0.0f64; 2]);
        let u = upload(&device, &[0.0f64; 9]);
        let vt = upload(&device, &[0.0f64; 4]);
        let work = upload(&device, &[0.0f64; 16]);
        let info = upload(&device, &[0i32]);

        // full U of a 3x2 matrix is 3x3, beyond the thin factorization
        let result = unsafe {
            solver.gesvd::<f64>(
                SvdJob::All, SvdJob::All, 3, 2, a, 3, s, u, 3, vt, 2, work, 16, None, info,
            )
        };
        assert_eq!(result, Err(VendorError(status::NOT_SUPPORTED)));

        unsafe {
            solver.gesvd::<f64>(
                SvdJob::Slim, SvdJob::All, 3, 2, a, 3, s, u, 3, vt, 2, work, 16, None, info,
            )
        }
        .unwrap();
        let singular = device.read_vec::<f64>(s, 2).unwrap();
        assert_relative_eq!(singular[0], 6.0f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(singular[1], 0.0, epsilon = 1e-12);
    }
}
