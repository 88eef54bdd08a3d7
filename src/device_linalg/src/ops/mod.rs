//! Device linear-algebra operations.
//!
//! Every entry point takes device references, validates its documented
//! preconditions before any vendor call, issues the vendor calls through the
//! bundle of its primary argument and translates the resulting status. All
//! operations are synchronous: they return once the status is on the host.
//!
//! - [`workspace`]: buffer-size negotiation
//! - [`lu`]: LU factorization, single and batched
//! - [`inverse`]: inversion by solving against the identity, batched inversion
//! - [`qr`]: QR/LQ factorization and orthogonal-factor generation
//! - [`svd`]: singular value decomposition
//! - [`eigen`]: Hermitian eigensolve

pub mod eigen;
pub mod inverse;
pub mod lu;
pub mod qr;
pub mod svd;
pub mod workspace;

use crate::device::Device;
use crate::error::{LinalgError, Result};
use crate::matrix::{DeviceMatrixRef, DeviceVectorRef};
use crate::scalar::DeviceCopy;

/// Convert a dimension to the vendor's `i32`.
pub(crate) fn dim(operation: &'static str, name: &str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        LinalgError::dimension(operation, format!("{name} = {value} exceeds the vendor limit"))
    })
}

/// Require at least `required` elements in a caller-supplied array.
pub(crate) fn ensure_len(
    operation: &'static str,
    name: &str,
    required: usize,
    supplied: usize,
) -> Result<()> {
    if supplied < required {
        return Err(LinalgError::dimension(
            operation,
            format!("{name} holds {supplied} elements, {required} required"),
        ));
    }
    Ok(())
}

/// Shape shared by every matrix of a pointer-array batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchShape {
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
}

/// Check that a non-empty batch is non-ragged and lives on one bundle.
pub(crate) fn batch_shape<T: DeviceCopy, D: Device>(
    operation: &'static str,
    matrices: &[DeviceMatrixRef<'_, T, D>],
) -> Result<BatchShape> {
    let first = matrices
        .first()
        .ok_or_else(|| LinalgError::dimension(operation, "empty batch"))?;
    let shape = BatchShape {
        rows: first.rows(),
        cols: first.cols(),
        ld: first.ld(),
    };
    for (i, m) in matrices.iter().enumerate().skip(1) {
        first.handles().ensure_same(operation, m.handles())?;
        if (m.rows(), m.cols(), m.ld()) != (shape.rows, shape.cols, shape.ld) {
            return Err(LinalgError::dimension(
                operation,
                format!(
                    "matrix {i} is {}x{} (ld {}), batch is {}x{} (ld {})",
                    m.rows(),
                    m.cols(),
                    m.ld(),
                    shape.rows,
                    shape.cols,
                    shape.ld
                ),
            ));
        }
    }
    Ok(shape)
}

/// Check that every vector of a batch holds at least `len` elements and
/// lives on the same bundle as `matrices`.
pub(crate) fn batch_vectors<T: DeviceCopy, V: DeviceCopy, D: Device>(
    operation: &'static str,
    matrices: &[DeviceMatrixRef<'_, T, D>],
    vectors: &[DeviceVectorRef<'_, V, D>],
    len: usize,
) -> Result<()> {
    if vectors.len() != matrices.len() {
        return Err(LinalgError::dimension(
            operation,
            format!(
                "{} vectors for {} matrices",
                vectors.len(),
                matrices.len()
            ),
        ));
    }
    for (m, v) in matrices.iter().zip(vectors) {
        m.handles().ensure_same(operation, v.handles())?;
        ensure_len(operation, "batch vector", len, v.len())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::DeviceHandles;
    use crate::sim::SimDevice;

    #[test]
    fn test_dim_conversion() {
        assert_eq!(dim("op", "n", 12).unwrap(), 12);
        assert!(matches!(
            dim("op", "n", i32::MAX as usize + 1),
            Err(LinalgError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_ragged_batch_rejected() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(32).unwrap();
        let a = buffer.matrix_at(0, 2, 2, 2).unwrap();
        let b = buffer.matrix_at(8, 2, 2, 3).unwrap();
        let c = buffer.matrix_at(16, 2, 2, 2).unwrap();

        assert_eq!(
            batch_shape("op", &[a, c]).unwrap(),
            BatchShape {
                rows: 2,
                cols: 2,
                ld: 2
            }
        );
        assert!(batch_shape("op", &[a, b]).is_err());
        assert!(batch_shape::<f64, SimDevice>("op", &[]).is_err());
    }

    #[test]
    fn test_batch_vectors() {
        let handles = DeviceHandles::new(SimDevice::new()).unwrap();
        let buffer = handles.alloc::<f64>(16).unwrap();
        let taus = handles.alloc::<f64>(4).unwrap();
        let mats = buffer.matrices(2, 2, 2, 4, 2).unwrap();
        let short = [taus.vector_at(0, 1).unwrap(), taus.vector_at(1, 1).unwrap()];
        let ok = [taus.vector_at(0, 2).unwrap(), taus.vector_at(2, 2).unwrap()];

        assert!(batch_vectors("op", &mats, &ok, 2).is_ok());
        assert!(batch_vectors("op", &mats, &short, 2).is_err());
        assert!(batch_vectors("op", &mats, &ok[..1], 2).is_err());
    }
}
