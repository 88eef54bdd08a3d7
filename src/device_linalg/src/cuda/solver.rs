//! cuSOLVER dense entry points.

use std::ffi::c_char;
use std::mem::size_of;
use std::sync::Arc;

use cudarc::cusolver::safe::DnHandle;
use cudarc::cusolver::sys as cusolver_sys;
use cudarc::driver::CudaStream;
use tracing::trace;

use crate::device::{DevicePtr, SolverLibrary, SvdJob, Transpose};
use crate::error::VendorError;
use crate::scalar::{ElementType, Scalar};

fn check(status: cusolver_sys::cusolverStatus_t) -> Result<(), VendorError> {
    if status != cusolver_sys::cusolverStatus_t::CUSOLVER_STATUS_SUCCESS {
        return Err(VendorError(status as i32));
    }
    Ok(())
}

fn lwork(status: cusolver_sys::cusolverStatus_t, lwork: i32) -> Result<usize, VendorError> {
    check(status)?;
    Ok(lwork.max(0) as usize)
}

macro_rules! by_kind {
    ($kind:expr, $s:ident, $d:ident, $c:ident, $z:ident, ($($arg:expr),* $(,)?)) => {
        match $kind {
            ElementType::F32 => cusolver_sys::$s($($arg),*),
            ElementType::F64 => cusolver_sys::$d($($arg),*),
            ElementType::C32 => cusolver_sys::$c($($arg),*),
            ElementType::C64 => cusolver_sys::$z($($arg),*),
        }
    };
}

fn operation(trans: Transpose) -> cusolver_sys::cublasOperation_t {
    match trans {
        Transpose::None => cusolver_sys::cublasOperation_t::CUBLAS_OP_N,
        Transpose::Transpose => cusolver_sys::cublasOperation_t::CUBLAS_OP_T,
        Transpose::ConjugateTranspose => cusolver_sys::cublasOperation_t::CUBLAS_OP_C,
    }
}

/// cuSOLVER dense handle bound to the device's default stream.
pub struct CudaSolver {
    handle: DnHandle,
}

impl CudaSolver {
    pub(crate) fn new(stream: Arc<CudaStream>) -> Result<Self, VendorError> {
        let handle = DnHandle::new(stream).map_err(|e| VendorError(e.0 as i32))?;
        Ok(Self { handle })
    }

    fn raw(&self) -> cusolver_sys::cusolverDnHandle_t {
        self.handle.cu()
    }
}

// SAFETY: see CudaBlas; callers serialize use of one bundle.
unsafe impl Send for CudaSolver {}
unsafe impl Sync for CudaSolver {}

impl SolverLibrary for CudaSolver {
    fn getrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError> {
        let mut size = 0i32;
        // SAFETY: sizing queries do not dereference the matrix.
        let status = unsafe {
            by_kind!(
                T::KIND,
                cusolverDnSgetrf_bufferSize,
                cusolverDnDgetrf_bufferSize,
                cusolverDnCgetrf_bufferSize,
                cusolverDnZgetrf_bufferSize,
                (self.raw(), m, n, a as *mut _, lda, &mut size)
            )
        };
        lwork(status, size)
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
        check(by_kind!(
            T::KIND,
            cusolverDnSgetrf,
            cusolverDnDgetrf,
            cusolverDnCgetrf,
            cusolverDnZgetrf,
            (
                self.raw(),
                m,
                n,
                a as *mut _,
                lda,
                work as *mut _,
                ipiv as *mut i32,
                info as *mut i32,
            )
        ))
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
        check(by_kind!(
            T::KIND,
            cusolverDnSgetrs,
            cusolverDnDgetrs,
            cusolverDnCgetrs,
            cusolverDnZgetrs,
            (
                self.raw(),
                operation(trans),
                n,
                nrhs,
                a as *const _,
                lda,
                ipiv as *const i32,
                b as *mut _,
                ldb,
                info as *mut i32,
            )
        ))
    }

    fn geqrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError> {
        let mut size = 0i32;
        // SAFETY: sizing queries do not dereference the matrix.
        let status = unsafe {
            by_kind!(
                T::KIND,
                cusolverDnSgeqrf_bufferSize,
                cusolverDnDgeqrf_bufferSize,
                cusolverDnCgeqrf_bufferSize,
                cusolverDnZgeqrf_bufferSize,
                (self.raw(), m, n, a as *mut _, lda, &mut size)
            )
        };
        lwork(status, size)
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
        check(by_kind!(
            T::KIND,
            cusolverDnSgeqrf,
            cusolverDnDgeqrf,
            cusolverDnCgeqrf,
            cusolverDnZgeqrf,
            (
                self.raw(),
                m,
                n,
                a as *mut _,
                lda,
                tau as *mut _,
                work as *mut _,
                lwork,
                info as *mut i32,
            )
        ))
    }

    fn orgqr_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        k: i32,
        a: DevicePtr,
        lda: i32,
        tau: DevicePtr,
    ) -> Result<usize, VendorError> {
        let mut size = 0i32;
        // SAFETY: sizing queries do not dereference the matrix.
        let status = unsafe {
            by_kind!(
                T::KIND,
                cusolverDnSorgqr_bufferSize,
                cusolverDnDorgqr_bufferSize,
                cusolverDnCungqr_bufferSize,
                cusolverDnZungqr_bufferSize,
                (self.raw(), m, n, k, a as *const _, lda, tau as *const _, &mut size)
            )
        };
        lwork(status, size)
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
        check(by_kind!(
            T::KIND,
            cusolverDnSorgqr,
            cusolverDnDorgqr,
            cusolverDnCungqr,
            cusolverDnZungqr,
            (
                self.raw(),
                m,
                n,
                k,
                a as *mut _,
                lda,
                tau as *const _,
                work as *mut _,
                lwork,
                info as *mut i32,
            )
        ))
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
        // cuSOLVER has no strided orgqr; walk the batch on the one stream
        let element = size_of::<T>() as i64;
        trace!(batch, "strided orgqr issued per matrix");
        for i in 0..i64::from(batch.max(0)) {
            self.orgqr::<T>(
                m,
                n,
                k,
                a + (i * stride_a * element) as u64,
                lda,
                tau + (i * stride_tau * element) as u64,
                work,
                lwork,
                info + (i * size_of::<i32>() as i64) as u64,
            )?;
        }
        Ok(())
    }

    fn gesvd_buffer_size<T: Scalar>(&self, m: i32, n: i32) -> Result<usize, VendorError> {
        let mut size = 0i32;
        // SAFETY: pure sizing query.
        let status = unsafe {
            by_kind!(
                T::KIND,
                cusolverDnSgesvd_bufferSize,
                cusolverDnDgesvd_bufferSize,
                cusolverDnCgesvd_bufferSize,
                cusolverDnZgesvd_bufferSize,
                (self.raw(), m, n, &mut size)
            )
        };
        lwork(status, size)
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
        let rwork = if T::KIND.is_complex() { rwork.unwrap_or(0) } else { 0 };
        check(by_kind!(
            T::KIND,
            cusolverDnSgesvd,
            cusolverDnDgesvd,
            cusolverDnCgesvd,
            cusolverDnZgesvd,
            (
                self.raw(),
                jobu.as_char() as c_char,
                jobvt.as_char() as c_char,
                m,
                n,
                a as *mut _,
                lda,
                s as *mut _,
                u as *mut _,
                ldu,
                vt as *mut _,
                ldvt,
                work as *mut _,
                lwork,
                rwork as *mut _,
                info as *mut i32,
            )
        ))
    }
}
