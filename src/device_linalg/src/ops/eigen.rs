//! Hermitian eigensolve.

use crate::device::Device;
use crate::error::{LinalgError, Result};
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::Scalar;

/// Eigenvalues `w` and eigenvectors `z` of the Hermitian matrix `a`.
///
/// There is no device implementation on this backend; this always fails
/// with `UnimplementedOperation` and callers compute the decomposition on
/// the host instead.
pub fn hevr<T: Scalar, D: Device>(
    _a: DeviceMatrixRef<'_, T, D>,
    _w: DeviceVectorRef<'_, T::Real, D>,
    _z: DeviceMatrixRef<'_, T, D>,
) -> Result<()> {
    Err(LinalgError::UnimplementedOperation { operation: "hevr" })
}
