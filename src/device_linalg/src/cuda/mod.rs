//! CUDA backend: driver memory, cuBLAS batched routines, cuSOLVER dense.
//!
//! Memory goes through the driver's synchronous allocation and copy entry
//! points so that every transfer has completed when it returns, which is
//! what the status read-back in the operation layer relies on. Vendor calls
//! are issued on the context's default stream.
//!
//! # Example
//!
//! ```ignore
//! use device_linalg::{cuda::CudaDevice, DeviceHandles};
//!
//! let handles = DeviceHandles::new(CudaDevice::new(0)?)?;
//! ```

mod blas;
mod solver;

use std::mem::size_of;
use std::sync::Arc;

use cudarc::driver::{result as driver, CudaContext, CudaStream, DriverError};
use tracing::debug;

pub use blas::CudaBlas;
pub use solver::CudaSolver;

use crate::device::{Device, DevicePtr};
use crate::error::{LinalgError, MemorySpace, Result, VendorError};
use crate::memory::as_bytes;
use crate::scalar::Scalar;

/// `CUBLAS_STATUS_NOT_SUPPORTED`.
pub const CUBLAS_STATUS_NOT_SUPPORTED: i32 = 15;

/// `CUSOLVER_STATUS_INVALID_VALUE`.
pub const CUSOLVER_STATUS_INVALID_VALUE: i32 = 3;

fn driver_status(e: DriverError) -> VendorError {
    VendorError(e.0 as i32)
}

/// One CUDA device context and its default stream.
#[derive(Clone)]
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
}

impl CudaDevice {
    /// Create (or retain) the primary context of device `ordinal`.
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal).map_err(|e| LinalgError::AllocationFailure {
            space: MemorySpace::Device,
            bytes: 0,
            code: Some(e.0 as i32),
        })?;
        let stream = ctx.default_stream();
        debug!(device = ordinal, "created CUDA context");
        Ok(Self { ctx, stream })
    }

    pub fn context(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    pub fn stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }

    fn bind(&self) -> std::result::Result<(), VendorError> {
        self.ctx.bind_to_thread().map_err(driver_status)
    }
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("ordinal", &self.ctx.ordinal())
            .finish()
    }
}

impl Device for CudaDevice {
    type Blas = CudaBlas;
    type Solver = CudaSolver;

    fn ordinal(&self) -> usize {
        self.ctx.ordinal()
    }

    fn create_blas(&self) -> std::result::Result<CudaBlas, VendorError> {
        CudaBlas::new(self.stream.clone())
    }

    fn create_solver(&self) -> std::result::Result<CudaSolver, VendorError> {
        CudaSolver::new(self.stream.clone())
    }

    fn malloc(&self, bytes: usize) -> std::result::Result<DevicePtr, VendorError> {
        self.bind()?;
        // SAFETY: the context is bound to this thread.
        unsafe { driver::malloc_sync(bytes) }.map_err(driver_status)
    }

    unsafe fn free(&self, ptr: DevicePtr) -> std::result::Result<(), VendorError> {
        self.bind()?;
        driver::free_sync(ptr).map_err(driver_status)
    }

    unsafe fn memcpy_htod(
        &self,
        dst: DevicePtr,
        src: &[u8],
    ) -> std::result::Result<(), VendorError> {
        self.bind()?;
        self.stream.synchronize().map_err(driver_status)?;
        driver::memcpy_htod_sync(dst, src).map_err(driver_status)
    }

    unsafe fn memcpy_dtoh(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
    ) -> std::result::Result<(), VendorError> {
        self.bind()?;
        // vendor calls were queued on the stream; their results must land first
        self.stream.synchronize().map_err(driver_status)?;
        driver::memcpy_dtoh_sync(dst, src).map_err(driver_status)
    }

    unsafe fn memcpy_dtod(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> std::result::Result<(), VendorError> {
        self.bind()?;
        self.stream.synchronize().map_err(driver_status)?;
        driver::memcpy_dtod_sync(dst, src, bytes).map_err(driver_status)
    }

    unsafe fn set_identity<T: Scalar>(
        &self,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> std::result::Result<(), VendorError> {
        let (n, lda) = match (usize::try_from(n), usize::try_from(lda)) {
            (Ok(n), Ok(lda)) if lda >= n.max(1) => (n, lda),
            _ => return Err(VendorError(CUSOLVER_STATUS_INVALID_VALUE)),
        };
        let (zero, one) = (T::from_real_f64(0.0), T::from_real_f64(1.0));
        if lda == n {
            // packed: one upload of the whole matrix
            let mut identity = vec![zero; n * n];
            for j in 0..n {
                identity[j * n + j] = one;
            }
            return self.memcpy_htod(a, as_bytes(&identity));
        }
        // padding rows below each column are left untouched
        let mut column = vec![zero; n];
        for j in 0..n {
            column[j] = one;
            let dst = a + (j * lda * size_of::<T>()) as u64;
            self.memcpy_htod(dst, as_bytes(&column))?;
            column[j] = zero;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DeviceHandles;

    #[test]
    #[ignore = "requires CUDA GPU"]
    fn test_set_identity_packed_and_padded() {
        let handles = DeviceHandles::new(CudaDevice::new(0).unwrap()).unwrap();

        let packed = handles.upload(&[7.0f64; 9]).unwrap();
        unsafe { handles.device().set_identity::<f64>(3, packed.ptr(), 3) }.unwrap();
        assert_eq!(
            packed.copy_to_host().unwrap(),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );

        // padding row keeps its contents
        let padded = handles.upload(&[7.0f32; 6]).unwrap();
        unsafe { handles.device().set_identity::<f32>(2, padded.ptr(), 3) }.unwrap();
        assert_eq!(padded.copy_to_host().unwrap(), vec![1.0, 0.0, 7.0, 0.0, 1.0, 7.0]);
    }
}
