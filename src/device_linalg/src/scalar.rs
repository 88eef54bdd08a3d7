//! Element types that can live in device matrices.
//!
//! The vendor libraries expose one entry point per element type
//! (`S`/`D`/`C`/`Z` prefixes). This crate models that closed set with the
//! sealed [`Scalar`] trait and dispatches on [`ElementType`] where a backend
//! needs to pick the concrete vendor symbol.

use nalgebra::{Complex, ComplexField};

/// Element type tag carried by every device matrix reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    C32,
    C64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::F32 => 4,
            ElementType::F64 => 8,
            ElementType::C32 => 8,
            ElementType::C64 => 16,
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(self, ElementType::C32 | ElementType::C64)
    }

    /// BLAS/LAPACK routine prefix for this type.
    pub fn prefix(self) -> char {
        match self {
            ElementType::F32 => 'S',
            ElementType::F64 => 'D',
            ElementType::C32 => 'C',
            ElementType::C64 => 'Z',
        }
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for nalgebra::Complex<f32> {}
    impl Sealed for nalgebra::Complex<f64> {}
}

/// Types that may be copied byte-for-byte between host and device memory.
///
/// # Safety
///
/// Implementors must be plain old data: no padding, no pointers into host
/// memory, and every bit pattern must be a valid value.
pub unsafe trait DeviceCopy: Copy + Default + Send + Sync + 'static {}

unsafe impl DeviceCopy for i32 {}
unsafe impl DeviceCopy for u64 {}
unsafe impl DeviceCopy for f32 {}
unsafe impl DeviceCopy for f64 {}
unsafe impl DeviceCopy for Complex<f32> {}
unsafe impl DeviceCopy for Complex<f64> {}

/// Numeric element type accepted by the device BLAS and solver libraries.
pub trait Scalar: ComplexField + DeviceCopy + sealed::Sealed {
    /// Real type used for singular values, eigenvalues and real workspaces.
    type Real: Scalar<Real = Self::Real>;

    const KIND: ElementType;

    fn to_complex64(self) -> Complex<f64>;

    /// Converts from double-precision complex, dropping the imaginary part
    /// for real types.
    fn from_complex64(z: Complex<f64>) -> Self;

    fn from_real_f64(x: f64) -> Self {
        Self::from_complex64(Complex::new(x, 0.0))
    }
}

impl Scalar for f32 {
    type Real = f32;
    const KIND: ElementType = ElementType::F32;

    fn to_complex64(self) -> Complex<f64> {
        Complex::new(self as f64, 0.0)
    }

    fn from_complex64(z: Complex<f64>) -> Self {
        z.re as f32
    }
}

impl Scalar for f64 {
    type Real = f64;
    const KIND: ElementType = ElementType::F64;

    fn to_complex64(self) -> Complex<f64> {
        Complex::new(self, 0.0)
    }

    fn from_complex64(z: Complex<f64>) -> Self {
        z.re
    }
}

impl Scalar for Complex<f32> {
    type Real = f32;
    const KIND: ElementType = ElementType::C32;

    fn to_complex64(self) -> Complex<f64> {
        Complex::new(self.re as f64, self.im as f64)
    }

    fn from_complex64(z: Complex<f64>) -> Self {
        Complex::new(z.re as f32, z.im as f32)
    }
}

impl Scalar for Complex<f64> {
    type Real = f64;
    const KIND: ElementType = ElementType::C64;

    fn to_complex64(self) -> Complex<f64> {
        self
    }

    fn from_complex64(z: Complex<f64>) -> Self {
        z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_sizes_match_layout() {
        assert_eq!(f32::KIND.size_bytes(), std::mem::size_of::<f32>());
        assert_eq!(f64::KIND.size_bytes(), std::mem::size_of::<f64>());
        assert_eq!(
            Complex::<f32>::KIND.size_bytes(),
            std::mem::size_of::<Complex<f32>>()
        );
        assert_eq!(
            Complex::<f64>::KIND.size_bytes(),
            std::mem::size_of::<Complex<f64>>()
        );
    }

    #[test]
    fn test_prefixes() {
        let prefixes: String = [
            ElementType::F32,
            ElementType::F64,
            ElementType::C32,
            ElementType::C64,
        ]
        .iter()
        .map(|t| t.prefix())
        .collect();
        assert_eq!(prefixes, "SDCZ");
        assert!(ElementType::C32.is_complex());
        assert!(!ElementType::F64.is_complex());
    }

    #[test]
    fn test_complex64_conversion_drops_imaginary_for_reals() {
        let z = Complex::new(1.5, -2.0);
        assert_eq!(f64::from_complex64(z), 1.5);
        assert_eq!(f32::from_complex64(z), 1.5f32);
        assert_eq!(Complex::<f32>::from_complex64(z), Complex::new(1.5f32, -2.0));
        assert_eq!(Complex::<f64>::from_real_f64(3.0), Complex::new(3.0, 0.0));
    }
}
