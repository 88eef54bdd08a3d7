//! Simulated BLAS handle (batched entry points).

use rayon::prelude::*;

use super::kernels::{self, C64};
use super::{check_pivots, count, dims, element, status, SimDevice, VendorCall};
use crate::device::{BlasLibrary, DevicePtr};
use crate::error::VendorError;
use crate::scalar::Scalar;

/// Largest order accepted by `matinv_batched`, as in cuBLAS.
pub(crate) const MATINV_MAX_ORDER: usize = 32;

/// BLAS handle of a [`SimDevice`].
#[derive(Debug, Clone)]
pub struct SimBlas {
    device: SimDevice,
}

impl SimBlas {
    pub(crate) fn new(device: SimDevice) -> Self {
        Self { device }
    }

    fn load_batch<T: Scalar>(
        &self,
        array: DevicePtr,
        batch: usize,
        m: usize,
        n: usize,
        ld: usize,
    ) -> Result<(Vec<DevicePtr>, Vec<Vec<C64>>), VendorError> {
        let addresses = self.device.read_vec::<u64>(array, batch)?;
        let matrices = addresses
            .iter()
            .map(|&ptr| self.device.load_matrix::<T>(ptr, m, n, ld))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((addresses, matrices))
    }
}

impl BlasLibrary for SimBlas {
    unsafe fn getrf_batched<T: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        ipiv: DevicePtr,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::GetrfBatched)?;
        let (n, _, lda) = dims(n, n, lda)?;
        let batch = count(batch)?;
        let (addresses, matrices) = self.load_batch::<T>(a_array, batch, n, n, lda)?;

        let results: Vec<(Vec<C64>, Vec<i32>, i32)> = matrices
            .into_par_iter()
            .map(|mut a| {
                let mut pivots = vec![0i32; n];
                let info = kernels::getrf(n, n, &mut a, &mut pivots);
                (a, pivots, info)
            })
            .collect();

        let mut infos = Vec::with_capacity(batch);
        for (i, (lu, pivots, code)) in results.into_iter().enumerate() {
            self.device.store_matrix::<T>(addresses[i], n, n, lda, &lu)?;
            self.device.write_slice(element::<i32>(ipiv, i * n), &pivots)?;
            infos.push(code);
        }
        self.device.store_infos(info, infos, fault)
    }

    unsafe fn getri_batched<T: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        ipiv: DevicePtr,
        c_array: DevicePtr,
        ldc: i32,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::GetriBatched)?;
        let (n, _, lda) = dims(n, n, lda)?;
        let (_, _, ldc) = dims(n as i32, n as i32, ldc)?;
        let batch = count(batch)?;
        let (_, factors) = self.load_batch::<T>(a_array, batch, n, n, lda)?;
        let outputs = self.device.read_vec::<u64>(c_array, batch)?;
        let pivots = self.device.read_vec::<i32>(ipiv, n * batch)?;
        check_pivots(&pivots, n)?;

        let results: Vec<(Vec<C64>, i32)> = factors
            .into_par_iter()
            .enumerate()
            .map(|(i, lu)| kernels::getri(n, &lu, &pivots[i * n..(i + 1) * n]))
            .collect();

        let mut infos = Vec::with_capacity(batch);
        for (&c, (inverse, code)) in outputs.iter().zip(results) {
            self.device.store_matrix::<T>(c, n, n, ldc, &inverse)?;
            infos.push(code);
        }
        self.device.store_infos(info, infos, fault)
    }

    unsafe fn matinv_batched<A: Scalar, C: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        c_array: DevicePtr,
        ldc: i32,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::MatinvBatched)?;
        let (n, _, lda) = dims(n, n, lda)?;
        let (_, _, ldc) = dims(n as i32, n as i32, ldc)?;
        if n > MATINV_MAX_ORDER {
            return Err(VendorError(status::BLAS_NOT_SUPPORTED));
        }
        let batch = count(batch)?;
        let (_, inputs) = self.load_batch::<A>(a_array, batch, n, n, lda)?;
        let outputs = self.device.read_vec::<u64>(c_array, batch)?;

        let results: Vec<(Vec<C64>, i32)> = inputs
            .into_par_iter()
            .map(|a| kernels::matinv(n, a))
            .collect();

        let mut infos = Vec::with_capacity(batch);
        for (&c, (inverse, code)) in outputs.iter().zip(results) {
            self.device.store_matrix::<C>(c, n, n, ldc, &inverse)?;
            infos.push(code);
        }
        self.device.store_infos(info, infos, fault)
    }

    unsafe fn geqrf_batched<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        tau_array: DevicePtr,
        info: &mut i32,
        batch: i32,
    ) -> Result<(), VendorError> {
        let fault = self.device.enter(VendorCall::GeqrfBatched)?;

        // host-side parameter check, reported as -(argument position)
        *info = if m < 0 {
            -1
        } else if n < 0 {
            -2
        } else if lda < m.max(1) {
            -4
        } else if batch < 0 {
            -7
        } else {
            0
        };
        if *info != 0 {
            return Err(VendorError(status::INVALID_VALUE));
        }

        let (m, n, lda) = (m as usize, n as usize, lda as usize);
        let k = m.min(n);
        let batch = batch as usize;
        let (addresses, matrices) = self.load_batch::<T>(a_array, batch, m, n, lda)?;
        let taus = self.device.read_vec::<u64>(tau_array, batch)?;

        let results: Vec<(Vec<C64>, Vec<C64>)> = matrices
            .into_par_iter()
            .map(|mut a| {
                let mut tau = vec![C64::new(0.0, 0.0); k];
                kernels::geqrf(m, n, &mut a, &mut tau);
                (a, tau)
            })
            .collect();

        for (i, (qr, tau)) in results.iter().enumerate() {
            self.device.store_matrix::<T>(addresses[i], m, n, lda, qr)?;
            self.device.store_vector::<T>(taus[i], tau)?;
        }
        if let Some(fault) = fault {
            *info = fault.code;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::memory::as_bytes;
    use nalgebra::Complex;

    fn upload<T: crate::scalar::DeviceCopy>(device: &SimDevice, data: &[T]) -> DevicePtr {
        let ptr = device.malloc(std::mem::size_of_val(data).max(1)).unwrap();
        unsafe { device.memcpy_htod(ptr, as_bytes(data)) }.unwrap();
        ptr
    }

    #[test]
    fn test_getrf_batched_per_matrix_info() {
        let device = SimDevice::new();
        let blas = device.create_blas().unwrap();
        let good = upload(&device, &[2.0f64, 1.0, 1.0, 3.0]);
        let singular = upload(&device, &[1.0f64, 2.0, 2.0, 4.0]);
        let array = upload(&device, &[good, singular]);
        let ipiv = upload(&device, &[0i32; 4]);
        let info = upload(&device, &[-1i32; 2]);

        unsafe { blas.getrf_batched::<f64>(2, array, 2, ipiv, info, 2) }.unwrap();
        assert_eq!(device.read_vec::<i32>(info, 2).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_matinv_batched_mixed_types() {
        let device = SimDevice::new();
        let blas = device.create_blas().unwrap();
        let a = upload(&device, &[2.0f32, 0.0, 0.0, 4.0]);
        let c = upload(&device, &[Complex::new(0.0f64, 0.0); 4]);
        let a_array = upload(&device, &[a]);
        let c_array = upload(&device, &[c]);
        let info = upload(&device, &[0i32]);

        unsafe { blas.matinv_batched::<f32, Complex<f64>>(2, a_array, 2, c_array, 2, info, 1) }
            .unwrap();
        let inverse = device.read_vec::<Complex<f64>>(c, 4).unwrap();
        assert_eq!(inverse[0], Complex::new(0.5, 0.0));
        assert_eq!(inverse[3], Complex::new(0.25, 0.0));
    }

    #[test]
    fn test_matinv_order_limit() {
        let device = SimDevice::new();
        let blas = device.create_blas().unwrap();
        let result = unsafe { blas.matinv_batched::<f64, f64>(33, 0, 33, 0, 33, 0, 0) };
        assert_eq!(result, Err(VendorError(status::BLAS_NOT_SUPPORTED)));
    }

    #[test]
    fn test_geqrf_batched_parameter_info() {
        let device = SimDevice::new();
        let blas = device.create_blas().unwrap();
        let mut info = 0;
        let result = unsafe { blas.geqrf_batched::<f64>(4, 2, 0, 3, 0, &mut info, 1) };
        assert_eq!(result, Err(VendorError(status::INVALID_VALUE)));
        assert_eq!(info, -4);
    }
}
