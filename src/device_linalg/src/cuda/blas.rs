//! cuBLAS batched entry points.

use std::sync::Arc;

use cudarc::cublas::sys as cublas_sys;
use cudarc::cublas::CudaBlas as BlasHandle;
use cudarc::driver::CudaStream;

use super::CUBLAS_STATUS_NOT_SUPPORTED;
use crate::device::{BlasLibrary, DevicePtr};
use crate::error::VendorError;
use crate::scalar::{ElementType, Scalar};

/// cuBLAS limits `matinvBatched` to this order.
const MATINV_MAX_ORDER: i32 = 32;

fn check(status: cublas_sys::cublasStatus_t) -> Result<(), VendorError> {
    if status != cublas_sys::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
        return Err(VendorError(status as i32));
    }
    Ok(())
}

/// Pick the `S`/`D`/`C`/`Z` symbol for `$kind` and call it with `$args`.
macro_rules! by_kind {
    ($kind:expr, $s:ident, $d:ident, $c:ident, $z:ident, ($($arg:expr),* $(,)?)) => {
        match $kind {
            ElementType::F32 => cublas_sys::$s($($arg),*),
            ElementType::F64 => cublas_sys::$d($($arg),*),
            ElementType::C32 => cublas_sys::$c($($arg),*),
            ElementType::C64 => cublas_sys::$z($($arg),*),
        }
    };
}

/// cuBLAS handle bound to the device's default stream.
pub struct CudaBlas {
    blas: BlasHandle,
}

impl CudaBlas {
    pub(crate) fn new(stream: Arc<CudaStream>) -> Result<Self, VendorError> {
        let blas = BlasHandle::new(stream).map_err(|e| VendorError(e.0 as i32))?;
        Ok(Self { blas })
    }

    fn raw(&self) -> cublas_sys::cublasHandle_t {
        *self.blas.handle()
    }
}

// SAFETY: the handle is only used through &self and cuBLAS handles may be
// shared between threads as long as calls are serialized by the caller.
unsafe impl Send for CudaBlas {}
unsafe impl Sync for CudaBlas {}

impl BlasLibrary for CudaBlas {
    unsafe fn getrf_batched<T: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        ipiv: DevicePtr,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError> {
        check(by_kind!(
            T::KIND,
            cublasSgetrfBatched,
            cublasDgetrfBatched,
            cublasCgetrfBatched,
            cublasZgetrfBatched,
            (
                self.raw(),
                n,
                a_array as *const *mut _,
                lda,
                ipiv as *mut i32,
                info as *mut i32,
                batch,
            )
        ))
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
        check(by_kind!(
            T::KIND,
            cublasSgetriBatched,
            cublasDgetriBatched,
            cublasCgetriBatched,
            cublasZgetriBatched,
            (
                self.raw(),
                n,
                a_array as *const *const _,
                lda,
                ipiv as *const i32,
                c_array as *const *mut _,
                ldc,
                info as *mut i32,
                batch,
            )
        ))
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
        // cuBLAS has no mixed-type or large-order inversion
        if A::KIND != C::KIND || n > MATINV_MAX_ORDER {
            return Err(VendorError(CUBLAS_STATUS_NOT_SUPPORTED));
        }
        check(by_kind!(
            A::KIND,
            cublasSmatinvBatched,
            cublasDmatinvBatched,
            cublasCmatinvBatched,
            cublasZmatinvBatched,
            (
                self.raw(),
                n,
                a_array as *const *const _,
                lda,
                c_array as *const *mut _,
                ldc,
                info as *mut i32,
                batch,
            )
        ))
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
        check(by_kind!(
            T::KIND,
            cublasSgeqrfBatched,
            cublasDgeqrfBatched,
            cublasCgeqrfBatched,
            cublasZgeqrfBatched,
            (
                self.raw(),
                m,
                n,
                a_array as *const *mut _,
                lda,
                tau_array as *const *mut _,
                info as *mut i32,
                batch,
            )
        ))
    }
}
