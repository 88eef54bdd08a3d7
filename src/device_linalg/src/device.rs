//! Vendor library seam.
//!
//! A device backend supplies three things: a memory runtime ([`Device`]),
//! a device BLAS handle ([`BlasLibrary`]) and a device dense-solver handle
//! ([`SolverLibrary`]). The entry points mirror the vendor C APIs closely:
//! raw device addresses, `i32` dimensions, status codes instead of panics.
//! Everything above this module talks to the vendor only through these
//! traits, which is what lets the simulated device in [`crate::sim`] stand
//! in for cuBLAS/cuSOLVER in tests.

use crate::error::VendorError;
use crate::scalar::Scalar;

/// Raw device address.
pub type DevicePtr = u64;

/// Operation applied to the factored matrix in a triangular solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    None,
    Transpose,
    ConjugateTranspose,
}

/// Which singular vectors `gesvd` computes (LAPACK `JOBU`/`JOBVT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvdJob {
    /// All columns (rows) of U (Vᴴ).
    All,
    /// The leading min(m, n) columns (rows) only.
    Slim,
    /// The leading min(m, n) vectors overwrite A.
    Overwrite,
    /// No vectors.
    None,
}

impl SvdJob {
    /// LAPACK job character.
    pub fn as_char(self) -> u8 {
        match self {
            SvdJob::All => b'A',
            SvdJob::Slim => b'S',
            SvdJob::Overwrite => b'O',
            SvdJob::None => b'N',
        }
    }

    pub fn from_char(c: u8) -> Option<Self> {
        match c.to_ascii_uppercase() {
            b'A' => Some(SvdJob::All),
            b'S' => Some(SvdJob::Slim),
            b'O' => Some(SvdJob::Overwrite),
            b'N' => Some(SvdJob::None),
            _ => None,
        }
    }

    /// Whether the job writes vectors into a separate output matrix.
    pub fn needs_output(self) -> bool {
        matches!(self, SvdJob::All | SvdJob::Slim)
    }
}

/// Device memory runtime and vendor handle factory.
pub trait Device: Send + Sync {
    type Blas: BlasLibrary;
    type Solver: SolverLibrary;

    /// Device ordinal this runtime is bound to.
    fn ordinal(&self) -> usize;

    fn create_blas(&self) -> Result<Self::Blas, VendorError>;

    fn create_solver(&self) -> Result<Self::Solver, VendorError>;

    /// Allocate `bytes` of device memory.
    fn malloc(&self, bytes: usize) -> Result<DevicePtr, VendorError>;

    /// Release memory obtained from [`Device::malloc`].
    ///
    /// # Safety
    /// `ptr` must come from `malloc` on this device and not have been freed.
    unsafe fn free(&self, ptr: DevicePtr) -> Result<(), VendorError>;

    /// Blocking host-to-device copy.
    ///
    /// # Safety
    /// `dst` must be valid for `src.len()` bytes of device memory.
    unsafe fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<(), VendorError>;

    /// Blocking device-to-host copy; returns once the copied bytes are valid.
    ///
    /// # Safety
    /// `src` must be valid for `dst.len()` bytes of device memory.
    unsafe fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), VendorError>;

    /// Blocking device-to-device copy.
    ///
    /// # Safety
    /// Both addresses must be valid for `bytes` bytes and must not overlap.
    unsafe fn memcpy_dtod(
        &self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> Result<(), VendorError>;

    /// Overwrite the n×n column-major matrix at `a` with the identity.
    ///
    /// # Safety
    /// `a` must hold at least `lda * n` elements of `T`.
    unsafe fn set_identity<T: Scalar>(
        &self,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<(), VendorError>;
}

/// Device BLAS batched entry points.
///
/// Array arguments (`*_array`) are device addresses of device-resident
/// arrays of per-matrix device addresses.
pub trait BlasLibrary: Send + Sync {
    /// Batched LU factorization with partial pivoting.
    ///
    /// # Safety
    /// `a_array` must hold `batch` addresses of n×n matrices, `ipiv` must
    /// hold `n * batch` integers and `info` `batch` integers.
    unsafe fn getrf_batched<T: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        ipiv: DevicePtr,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError>;

    /// Batched out-of-place inversion from LU factors.
    ///
    /// # Safety
    /// As [`BlasLibrary::getrf_batched`]; `c_array` holds the outputs.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;

    /// Batched inversion of unfactored matrices, writing each inverse as `C`.
    ///
    /// # Safety
    /// `a_array`/`c_array` must hold `batch` addresses of n×n matrices of
    /// `A`/`C` elements and `info` `batch` integers.
    #[allow(clippy::too_many_arguments)]
    unsafe fn matinv_batched<A: Scalar, C: Scalar>(
        &self,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        c_array: DevicePtr,
        ldc: i32,
        info: DevicePtr,
        batch: i32,
    ) -> Result<(), VendorError>;

    /// Batched QR factorization. `info` is a host-side parameter check.
    ///
    /// # Safety
    /// `a_array` must hold `batch` m×n matrices and `tau_array` `batch`
    /// vectors of min(m, n) elements.
    #[allow(clippy::too_many_arguments)]
    unsafe fn geqrf_batched<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a_array: DevicePtr,
        lda: i32,
        tau_array: DevicePtr,
        info: &mut i32,
        batch: i32,
    ) -> Result<(), VendorError>;
}

/// Device dense-solver entry points and their workspace queries.
///
/// Workspace sizes are element counts of `T`.
pub trait SolverLibrary: Send + Sync {
    fn getrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError>;

    /// LU factorization with partial pivoting.
    ///
    /// # Safety
    /// `a` must hold an m×n matrix, `work` the negotiated workspace,
    /// `ipiv` min(m, n) integers and `info` one integer.
    #[allow(clippy::too_many_arguments)]
    unsafe fn getrf<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
        work: DevicePtr,
        ipiv: DevicePtr,
        info: DevicePtr,
    ) -> Result<(), VendorError>;

    /// Solve `op(A)·X = B` using LU factors from `getrf`.
    ///
    /// # Safety
    /// `a` must hold n×n LU factors, `ipiv` n pivots, `b` an n×nrhs matrix
    /// and `info` one integer.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;

    fn geqrf_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        a: DevicePtr,
        lda: i32,
    ) -> Result<usize, VendorError>;

    /// Householder QR factorization.
    ///
    /// # Safety
    /// `a` must hold an m×n matrix, `tau` min(m, n) elements, `work`
    /// `lwork` elements and `info` one integer.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;

    #[allow(clippy::too_many_arguments)]
    fn orgqr_buffer_size<T: Scalar>(
        &self,
        m: i32,
        n: i32,
        k: i32,
        a: DevicePtr,
        lda: i32,
        tau: DevicePtr,
    ) -> Result<usize, VendorError>;

    /// Form the m×n orthogonal (unitary) factor from `k` reflectors.
    ///
    /// # Safety
    /// As [`SolverLibrary::geqrf`], with `tau` holding `k` elements.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;

    /// Strided-batch form of [`SolverLibrary::orgqr`]: matrix `i` starts at
    /// `a + i * stride_a` elements and its reflectors at `tau + i * stride_tau`.
    ///
    /// # Safety
    /// Every strided matrix and reflector vector must be in bounds, `work`
    /// must hold `lwork` elements and `info` `batch` integers.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;

    fn gesvd_buffer_size<T: Scalar>(&self, m: i32, n: i32) -> Result<usize, VendorError>;

    /// Singular value decomposition `A = U·Σ·Vᴴ`.
    ///
    /// `rwork` is the real workspace used in complex arithmetic; backends
    /// that do not need it ignore it.
    ///
    /// # Safety
    /// Every address must be valid for the shape implied by the jobs.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), VendorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_svd_job_chars_round_trip() {
        for job in [SvdJob::All, SvdJob::Slim, SvdJob::Overwrite, SvdJob::None] {
            assert_eq!(SvdJob::from_char(job.as_char()), Some(job));
        }
        assert_eq!(SvdJob::from_char(b's'), Some(SvdJob::Slim));
        assert_eq!(SvdJob::from_char(b'X'), None);
    }

    #[test]
    fn test_svd_job_needs_output() {
        assert!(SvdJob::All.needs_output());
        assert!(SvdJob::Slim.needs_output());
        assert!(!SvdJob::Overwrite.needs_output());
        assert!(!SvdJob::None.needs_output());
    }
}
