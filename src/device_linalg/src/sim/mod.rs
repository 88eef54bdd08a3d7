//! Simulated device backend.
//!
//! [`SimDevice`] implements the vendor seam entirely in host memory: device
//! allocations live in a tracked arena, and the BLAS/solver handles run
//! reference kernels with LAPACK conventions. It is the test double for the
//! operation layer: it counts allocations and vendor calls, rejects
//! out-of-range device addresses, checks workspace sizes against its own
//! sizing answers and can inject one-shot faults into any entry point.
//!
//! # Example
//!
//! ```ignore
//! use device_linalg::sim::{SimDevice, VendorCall};
//! use device_linalg::DeviceHandles;
//!
//! let device = SimDevice::new();
//! let handles = DeviceHandles::new(device.clone())?;
//!
//! // Next getrf returns status 6 without running
//! device.fail_next(VendorCall::Getrf, 6);
//!
//! // ... run operations ...
//! assert_eq!(device.stats().live_allocations, 0);
//! ```

mod blas;
mod fault;
mod kernels;
mod memory;
mod solver;

use std::mem::size_of;
use std::sync::Arc;

use parking_lot::Mutex;

pub use blas::SimBlas;
pub use fault::{Fault, VendorCall};
pub use memory::AllocationStats;
pub use solver::SimSolver;

use crate::device::{Device, DevicePtr};
use crate::error::VendorError;
use crate::memory::{as_bytes, as_bytes_mut, matrix_span};
use crate::scalar::{DeviceCopy, Scalar};
use fault::{FaultPlan, InfoFault};
use kernels::C64;
use memory::SimMemory;

/// Status codes reported by the simulated libraries (cuSOLVER numbering).
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const NOT_INITIALIZED: i32 = 1;
    pub const ALLOC_FAILED: i32 = 2;
    pub const INVALID_VALUE: i32 = 3;
    pub const EXECUTION_FAILED: i32 = 6;
    pub const NOT_SUPPORTED: i32 = 9;
    /// Not-supported status of the BLAS handle (cuBLAS numbering).
    pub const BLAS_NOT_SUPPORTED: i32 = 15;
}

struct SimState {
    ordinal: usize,
    memory: Mutex<SimMemory>,
    faults: Mutex<FaultPlan>,
}

/// Simulated device. Clones share the same memory and fault plan.
#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<SimState>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::with_ordinal(0)
    }

    pub fn with_ordinal(ordinal: usize) -> Self {
        Self {
            inner: Arc::new(SimState {
                ordinal,
                memory: Mutex::new(SimMemory::default()),
                faults: Mutex::new(FaultPlan::default()),
            }),
        }
    }

    /// Current allocation counters.
    pub fn stats(&self) -> AllocationStats {
        self.inner.memory.lock().stats()
    }

    /// Make the next `call` return status `code` without running.
    pub fn fail_next(&self, call: VendorCall, code: i32) {
        self.inner.faults.lock().arm(call, Fault::Status(code));
    }

    /// Make the next `call` run, then report info `code` for matrix `index`
    /// (0 for single-matrix calls).
    pub fn fail_info(&self, call: VendorCall, index: usize, code: i32) {
        self.inner.faults.lock().arm(call, Fault::Info { index, code });
    }

    /// Disarm every pending fault.
    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Number of times `call` has been entered.
    pub fn calls(&self, call: VendorCall) -> usize {
        self.inner.faults.lock().calls(call)
    }

    // ========================================================================
    // Helpers for the simulated libraries
    // ========================================================================

    fn enter(&self, call: VendorCall) -> Result<Option<InfoFault>, VendorError> {
        self.inner.faults.lock().enter(call)
    }

    fn check_range<T>(&self, ptr: DevicePtr, len: usize) -> Result<(), VendorError> {
        self.inner.memory.lock().check(ptr, len * size_of::<T>())
    }

    fn read_vec<T: DeviceCopy>(&self, ptr: DevicePtr, len: usize) -> Result<Vec<T>, VendorError> {
        let mut out = vec![T::default(); len];
        self.inner.memory.lock().read(ptr, as_bytes_mut(&mut out))?;
        Ok(out)
    }

    fn write_slice<T: DeviceCopy>(&self, ptr: DevicePtr, data: &[T]) -> Result<(), VendorError> {
        self.inner.memory.lock().write(ptr, as_bytes(data))
    }

    /// Read an m×n matrix with leading dimension `ld` as packed `C64`.
    fn load_matrix<T: Scalar>(
        &self,
        ptr: DevicePtr,
        m: usize,
        n: usize,
        ld: usize,
    ) -> Result<Vec<C64>, VendorError> {
        if m == 0 || n == 0 {
            return Ok(Vec::new());
        }
        let stored = self.read_vec::<T>(ptr, span(m, n, ld)?)?;
        let mut packed = Vec::with_capacity(m * n);
        for j in 0..n {
            packed.extend(stored[j * ld..j * ld + m].iter().map(|x| x.to_complex64()));
        }
        Ok(packed)
    }

    /// Write packed `C64` data into an m×n matrix, leaving padding rows alone.
    fn store_matrix<T: Scalar>(
        &self,
        ptr: DevicePtr,
        m: usize,
        n: usize,
        ld: usize,
        packed: &[C64],
    ) -> Result<(), VendorError> {
        if m == 0 || n == 0 {
            return Ok(());
        }
        let mut stored = self.read_vec::<T>(ptr, span(m, n, ld)?)?;
        for j in 0..n {
            for i in 0..m {
                stored[i + j * ld] = T::from_complex64(packed[i + j * m]);
            }
        }
        self.write_slice(ptr, &stored)
    }

    fn load_vector<T: Scalar>(&self, ptr: DevicePtr, len: usize) -> Result<Vec<C64>, VendorError> {
        Ok(self
            .read_vec::<T>(ptr, len)?
            .into_iter()
            .map(|x| x.to_complex64())
            .collect())
    }

    fn store_vector<T: Scalar>(&self, ptr: DevicePtr, data: &[C64]) -> Result<(), VendorError> {
        let converted: Vec<T> = data.iter().map(|&z| T::from_complex64(z)).collect();
        self.write_slice(ptr, &converted)
    }

    /// Write per-matrix info codes, applying an injected info fault.
    fn store_infos(
        &self,
        ptr: DevicePtr,
        mut infos: Vec<i32>,
        fault: Option<InfoFault>,
    ) -> Result<(), VendorError> {
        if let Some(InfoFault { index, code }) = fault {
            if let Some(slot) = infos.get_mut(index) {
                *slot = code;
            }
        }
        self.write_slice(ptr, &infos)
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice")
            .field("ordinal", &self.inner.ordinal)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Validate the (m, n, ld) triple of a matrix argument.
fn dims(m: i32, n: i32, ld: i32) -> Result<(usize, usize, usize), VendorError> {
    if m < 0 || n < 0 || ld < m.max(1) {
        return Err(VendorError(status::INVALID_VALUE));
    }
    Ok((m as usize, n as usize, ld as usize))
}

/// Elements spanned by a matrix argument.
fn span(m: usize, n: usize, ld: usize) -> Result<usize, VendorError> {
    matrix_span(m, n, ld).ok_or(VendorError(status::INVALID_VALUE))
}

fn count(batch: i32) -> Result<usize, VendorError> {
    usize::try_from(batch).map_err(|_| VendorError(status::INVALID_VALUE))
}

/// Device address of element `index` of an array of `T` at `base`.
fn element<T>(base: DevicePtr, index: usize) -> DevicePtr {
    base + (index * size_of::<T>()) as u64
}

/// Pivots must be 1-based row indices within the matrix.
fn check_pivots(ipiv: &[i32], n: usize) -> Result<(), VendorError> {
    if ipiv.iter().all(|&p| p >= 1 && p as usize <= n) {
        Ok(())
    } else {
        Err(VendorError(status::INVALID_VALUE))
    }
}

impl Device for SimDevice {
    type Blas = SimBlas;
    type Solver = SimSolver;

    fn ordinal(&self) -> usize {
        self.inner.ordinal
    }

    fn create_blas(&self) -> Result<SimBlas, VendorError> {
        self.enter(VendorCall::CreateBlas)?;
        Ok(SimBlas::new(self.clone()))
    }

    fn create_solver(&self) -> Result<SimSolver, VendorError> {
        self.enter(VendorCall::CreateSolver)?;
        Ok(SimSolver::new(self.clone()))
    }

    fn malloc(&self, bytes: usize) -> Result<DevicePtr, VendorError> {
        self.enter(VendorCall::Malloc)?;
        self.inner.memory.lock().malloc(bytes)
    }

    unsafe fn free(&self, ptr: DevicePtr) -> Result<(), VendorError> {
        self.inner.memory.lock().free(ptr)
    }

    unsafe fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<(), VendorError> {
        self.enter(VendorCall::Memcpy)?;
        self.inner.memory.lock().write(dst, src)
    }

    unsafe fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), VendorError> {
        self.enter(VendorCall::Memcpy)?;
        self.inner.memory.lock().read(src, dst)
    }

    unsafe fn memcpy_dtod(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), VendorError> {
        self.enter(VendorCall::Memcpy)?;
        self.inner.memory.lock().copy(dst, src, bytes)
    }

    unsafe fn set_identity<T: Scalar>(
        &self,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<(), VendorError> {
        self.enter(VendorCall::SetIdentity)?;
        let (n, _, lda) = dims(n, n, lda)?;
        self.store_matrix::<T>(a, n, n, lda, &kernels::identity(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Complex;

    #[test]
    fn test_clones_share_state() {
        let device = SimDevice::with_ordinal(2);
        let other = device.clone();
        let ptr = device.malloc(32).unwrap();
        assert_eq!(other.stats().live_allocations, 1);
        unsafe { other.free(ptr) }.unwrap();
        assert_eq!(device.stats().live_allocations, 0);
        assert_eq!(other.ordinal(), 2);
    }

    #[test]
    fn test_matrix_store_preserves_padding() {
        let device = SimDevice::new();
        let ptr = device.malloc(6 * size_of::<f64>()).unwrap();
        device.write_slice(ptr, &[9.0f64; 6]).unwrap();

        // 2x2 matrix with ld 3
        let packed: Vec<C64> = [1.0, 2.0, 3.0, 4.0].iter().map(|&x| Complex::new(x, 0.0)).collect();
        device.store_matrix::<f64>(ptr, 2, 2, 3, &packed).unwrap();
        assert_eq!(
            device.read_vec::<f64>(ptr, 6).unwrap(),
            vec![1.0, 2.0, 9.0, 3.0, 4.0, 9.0]
        );
        assert_eq!(device.load_matrix::<f64>(ptr, 2, 2, 3).unwrap(), packed);
    }

    #[test]
    fn test_set_identity() {
        let device = SimDevice::new();
        let ptr = device.malloc(4 * size_of::<Complex<f32>>()).unwrap();
        unsafe { device.set_identity::<Complex<f32>>(2, ptr, 2) }.unwrap();
        let values = device.read_vec::<Complex<f32>>(ptr, 4).unwrap();
        assert_eq!(values[0], Complex::new(1.0, 0.0));
        assert_eq!(values[1], Complex::new(0.0, 0.0));
        assert_eq!(values[3], Complex::new(1.0, 0.0));

        assert_eq!(
            unsafe { device.set_identity::<f32>(2, ptr, 1) },
            Err(VendorError(status::INVALID_VALUE))
        );
    }

    #[test]
    fn test_call_counting() {
        let device = SimDevice::new();
        let _ = device.create_blas().unwrap();
        let _ = device.create_blas().unwrap();
        assert_eq!(device.calls(VendorCall::CreateBlas), 2);
        device.fail_next(VendorCall::Malloc, status::ALLOC_FAILED);
        assert_eq!(device.malloc(8), Err(VendorError(status::ALLOC_FAILED)));
        assert!(device.malloc(8).is_ok());
    }
}
