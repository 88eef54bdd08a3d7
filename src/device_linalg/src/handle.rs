//! Device handle bundle.
//!
//! A [`DeviceHandles`] ties one device memory runtime to the two vendor
//! handles (BLAS and dense solver) needed to issue work on that device.
//! Every matrix and vector reference borrows the bundle it was created
//! against, and operations issue all vendor calls through the bundle of
//! their primary argument.
//!
//! # Example
//!
//! ```ignore
//! use device_linalg::{sim::SimDevice, DeviceHandles};
//!
//! let handles = DeviceHandles::new(SimDevice::new())?;
//! let a = handles.upload(&[4.0f64, 3.0, 6.0, 3.0])?;
//! let a_ref = a.as_matrix(2, 2, 2)?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::LinalgConfig;
use crate::device::Device;
use crate::error::{LinalgError, Result, StatusOrigin};
use crate::memory::DeviceBuffer;
use crate::scalar::DeviceCopy;

/// One device context plus its vendor BLAS and solver handles.
///
/// Operations issued sequentially through one bundle execute in issue
/// order. The bundle performs no locking: callers sharing it across threads
/// must serialize externally.
pub struct DeviceHandles<D: Device> {
    device: D,
    blas: D::Blas,
    solver: D::Solver,
    config: LinalgConfig,
    /// Host staging arrays currently alive for batched calls.
    host_staging: AtomicUsize,
}

impl<D: Device> DeviceHandles<D> {
    /// Create the vendor handles for `device` with the default configuration.
    pub fn new(device: D) -> Result<Self> {
        Self::with_config(device, LinalgConfig::default())
    }

    pub fn with_config(device: D, config: LinalgConfig) -> Result<Self> {
        let blas = device.create_blas().map_err(|e| {
            LinalgError::vendor("create_blas_handle", StatusOrigin::Handle, e.code())
        })?;
        let solver = device.create_solver().map_err(|e| {
            LinalgError::vendor("create_solver_handle", StatusOrigin::Handle, e.code())
        })?;

        debug!(device = device.ordinal(), ?config, "created device handle bundle");

        Ok(Self {
            device,
            blas,
            solver,
            config,
            host_staging: AtomicUsize::new(0),
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn blas(&self) -> &D::Blas {
        &self.blas
    }

    pub fn solver(&self) -> &D::Solver {
        &self.solver
    }

    pub fn config(&self) -> &LinalgConfig {
        &self.config
    }

    pub fn ordinal(&self) -> usize {
        self.device.ordinal()
    }

    /// Number of host staging arrays currently held by in-flight batched calls.
    pub fn outstanding_host_staging(&self) -> usize {
        self.host_staging.load(Ordering::Acquire)
    }

    pub(crate) fn staging_counter(&self) -> &AtomicUsize {
        &self.host_staging
    }

    /// Allocate an uninitialized device buffer of `len` elements.
    pub fn alloc<T: DeviceCopy>(&self, len: usize) -> Result<DeviceBuffer<'_, T, D>> {
        DeviceBuffer::new(self, len)
    }

    /// Allocate a device buffer holding a copy of `data`.
    pub fn upload<T: DeviceCopy>(&self, data: &[T]) -> Result<DeviceBuffer<'_, T, D>> {
        DeviceBuffer::from_host(self, data)
    }

    /// Fail with `DeviceMismatch` when the affinity check is enabled and
    /// `other` is not this bundle.
    pub(crate) fn ensure_same(&self, operation: &'static str, other: &Self) -> Result<()> {
        if self.config.check_device_affinity && !std::ptr::eq(self, other) {
            return Err(LinalgError::DeviceMismatch { operation });
        }
        Ok(())
    }
}

impl<D: Device> std::fmt::Debug for DeviceHandles<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandles")
            .field("device", &self.device.ordinal())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
