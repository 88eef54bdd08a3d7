//! Test utilities: generated matrices and column-major checks.
//!
//! Matrices are column-major with `ld == rows`. Generators are seeded so a
//! failing test reproduces exactly.

use nalgebra::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::handle::DeviceHandles;
use crate::scalar::Scalar;
use crate::sim::SimDevice;

/// A fresh simulated device and a bundle on it.
///
/// The device is returned separately so tests can inspect its allocation
/// counters and arm faults.
pub fn sim_bundle() -> Result<(SimDevice, DeviceHandles<SimDevice>)> {
    let device = SimDevice::new();
    let handles = DeviceHandles::new(device.clone())?;
    Ok((device, handles))
}

/// Random m×n matrix with entries in [-1, 1) and a dominant leading
/// diagonal, so that it is well conditioned.
///
/// For complex types the imaginary parts are random as well.
pub fn random_matrix<T: Scalar>(m: usize, n: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    let boost = m.max(n) as f64 + 1.0;
    let mut out = Vec::with_capacity(m * n);
    for j in 0..n {
        for i in 0..m {
            let mut z = Complex::<f64>::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            if i == j {
                z.re += boost;
            }
            out.push(T::from_complex64(z));
        }
    }
    out
}

/// `count` random n×n matrices stored back to back.
pub fn random_batch<T: Scalar>(n: usize, count: usize, seed: u64) -> Vec<T> {
    (0..count)
        .flat_map(|i| random_matrix::<T>(n, n, seed.wrapping_add(i as u64)))
        .collect()
}

/// n×n identity.
pub fn identity<T: Scalar>(n: usize) -> Vec<T> {
    let mut out = vec![T::from_real_f64(0.0); n * n];
    for i in 0..n {
        out[i + i * n] = T::from_real_f64(1.0);
    }
    out
}

/// `C = A·B` for A m×k and B k×n.
pub fn matmul<T: Scalar>(m: usize, k: usize, n: usize, a: &[T], b: &[T]) -> Vec<T> {
    assert_eq!(a.len(), m * k, "A is not {m}x{k}");
    assert_eq!(b.len(), k * n, "B is not {k}x{n}");
    let mut out = Vec::with_capacity(m * n);
    for j in 0..n {
        for i in 0..m {
            let sum: Complex<f64> = (0..k)
                .map(|p| a[i + p * m].to_complex64() * b[p + j * k].to_complex64())
                .sum();
            out.push(T::from_complex64(sum));
        }
    }
    out
}

/// The min(m, n)×n upper triangle of an m×n matrix (the R of a QR).
pub fn upper_triangle<T: Scalar>(m: usize, n: usize, a: &[T]) -> Vec<T> {
    let k = m.min(n);
    let mut out = vec![T::from_real_f64(0.0); k * n];
    for j in 0..n {
        for i in 0..k.min(j + 1) {
            out[i + j * k] = a[i + j * m];
        }
    }
    out
}

/// Largest entrywise distance between `a` and the n×n identity.
pub fn identity_error<T: Scalar>(n: usize, a: &[T]) -> f64 {
    assert_eq!(a.len(), n * n);
    let mut worst = 0.0f64;
    for j in 0..n {
        for i in 0..n {
            let expected = if i == j { 1.0 } else { 0.0 };
            worst = worst.max((a[i + j * n].to_complex64() - Complex::new(expected, 0.0)).norm());
        }
    }
    worst
}

/// Panic unless `a` is the n×n identity to within `epsilon`.
pub fn assert_identity<T: Scalar>(n: usize, a: &[T], epsilon: f64) {
    let error = identity_error(n, a);
    assert!(error <= epsilon, "not an identity: max error {error:e} > {epsilon:e}");
}

/// Panic unless the n columns of the m×n matrix `q` are orthonormal,
/// i.e. `Qᴴ·Q = I` to within `epsilon`.
pub fn assert_orthonormal_columns<T: Scalar>(m: usize, n: usize, q: &[T], epsilon: f64) {
    assert_eq!(q.len(), m * n);
    let mut gram = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let dot: Complex<f64> = (0..m)
                .map(|p| q[p + i * m].to_complex64().conj() * q[p + j * m].to_complex64())
                .sum();
            gram.push(dot);
        }
    }
    assert_identity(n, &gram, epsilon);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_random_matrix_is_seeded() {
        let a = random_matrix::<f64>(3, 3, 42);
        let b = random_matrix::<f64>(3, 3, 42);
        let c = random_matrix::<f64>(3, 3, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // dominant diagonal
        assert!(a[0] >= 3.0 && a[4] >= 3.0 && a[8] >= 3.0);
    }

    #[test]
    fn test_matmul_against_identity() {
        let a = random_matrix::<Complex<f64>>(3, 2, 1);
        let product = matmul(3, 2, 2, &a, &identity(2));
        assert_eq!(product, a);
    }

    #[test]
    fn test_matmul_known_product() {
        // [1 3; 2 4] · [5 7; 6 8] = [23 31; 34 46]
        let c = matmul(2, 2, 2, &[1.0f64, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]);
        assert_relative_eq!(c[0], 23.0);
        assert_relative_eq!(c[1], 34.0);
        assert_relative_eq!(c[2], 31.0);
        assert_relative_eq!(c[3], 46.0);
    }

    #[test]
    fn test_upper_triangle_of_tall_matrix() {
        let a: Vec<f64> = (1..=6).map(f64::from).collect();
        // 3x2: columns [1 2 3], [4 5 6]
        assert_eq!(upper_triangle(3, 2, &a), vec![1.0, 0.0, 4.0, 5.0]);
    }

    #[test]
    fn test_identity_checks() {
        assert_identity::<f32>(3, &identity(3), 0.0);
        assert!(identity_error(2, &[1.0f64, 0.0, 0.5, 1.0]) > 0.4);
        let q = [1.0f64, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert_orthonormal_columns(3, 2, &q, 1e-15);
    }
}
