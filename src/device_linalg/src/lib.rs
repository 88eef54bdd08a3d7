//! Device-resident dense linear algebra over vendor BLAS/solver libraries.
//!
//! This library fronts a device BLAS library and a device dense-solver
//! library with LAPACK-style factorizations, inversion and decompositions
//! whose operands never leave device memory.
//!
//! # Architecture
//!
//! - [`device`]: the vendor seam (`Device`, `BlasLibrary`, `SolverLibrary`)
//! - [`handle`]: the per-device handle bundle every reference borrows
//! - [`memory`], [`matrix`]: owning buffers and non-owning matrix/vector views
//! - [`marshal`]: device-resident pointer arrays for batched calls
//! - [`status`]: device status read-back and error translation
//! - [`ops`]: the operations themselves and their workspace queries
//! - [`sim`]: a simulated device, always available; [`cuda`] behind the
//!   `cuda` feature
//!
//! Every operation validates its preconditions before touching the vendor,
//! blocks until the vendor status is on the host, and releases every
//! temporary it allocated on success and failure alike.
//!
//! # Usage
//!
//! ```ignore
//! use device_linalg::{getrf, getrf_buffer_size, getri, getri_buffer_size, DeviceHandles};
//! use device_linalg::sim::SimDevice;
//!
//! let handles = DeviceHandles::new(SimDevice::new())?;
//! let a = handles.upload(&[4.0f64, 6.0, 3.0, 3.0])?;
//! let a_ref = a.as_matrix(2, 2, 2)?;
//!
//! // n + 1 pivots: the trailing slot receives the info code
//! let piv = handles.alloc::<i32>(3)?;
//! let work = handles.alloc::<f64>(getrf_buffer_size(a_ref)?)?;
//! getrf(a_ref, piv.as_vector(), work.as_vector())?;
//!
//! let work = handles.alloc::<f64>(getri_buffer_size(a_ref)?)?;
//! getri(a_ref, piv.as_vector(), work.as_vector())?;
//! let inverse = a.copy_to_host()?;
//! ```

pub mod config;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod device;
pub mod error;
pub mod handle;
pub mod marshal;
pub mod matrix;
pub mod memory;
pub mod ops;
pub mod scalar;
pub mod sim;
pub mod status;
pub mod test_utils;

pub use config::LinalgConfig;
pub use device::{BlasLibrary, Device, DevicePtr, SolverLibrary, SvdJob, Transpose};
pub use error::{BatchFailure, LinalgError, MemorySpace, Result, StatusOrigin, VendorError};
pub use handle::DeviceHandles;
pub use matrix::{DeviceMatrixRef, DeviceVectorRef, StridedMatrixBatch, StridedVectorBatch};
pub use memory::{DeviceAllocation, DeviceBuffer, ScratchBuffer};
pub use scalar::{DeviceCopy, ElementType, Scalar};
pub use status::{BatchStatus, DeviceStatus};

// Operations
pub use ops::eigen::hevr;
pub use ops::inverse::{getri, getri_batched, matinv_batched};
pub use ops::lu::{getrf, getrf_batched};
pub use ops::qr::{gelqf, geqrf, geqrf_batched, geqrf_strided, glq, gqr, gqr_strided};
pub use ops::svd::{gesvd, gesvd_with_real_workspace};
pub use ops::workspace::{
    gelqf_buffer_size, geqrf_buffer_size, gesvd_buffer_size, getrf_buffer_size, getri_buffer_size,
    glq_buffer_size, gqr_buffer_size,
};
