//! Reference dense kernels backing the simulated vendor libraries.
//!
//! Every kernel works on packed column-major `Complex<f64>` data (leading
//! dimension equal to the row count). Real element types are widened on the
//! way in, and their imaginary parts stay exactly zero throughout, so one
//! implementation serves all four element types. Conventions follow LAPACK:
//! 1-based pivots, info > 0 for the first zero pivot, Householder reflectors
//! in `larfg` form.

use nalgebra::{Complex, DMatrix};

use crate::device::{SvdJob, Transpose};

pub(crate) type C64 = Complex<f64>;

const ZERO: C64 = Complex::new(0.0, 0.0);
const ONE: C64 = Complex::new(1.0, 0.0);

#[inline]
fn at(ld: usize, i: usize, j: usize) -> usize {
    i + j * ld
}

fn maybe_conj(z: C64, conj: bool) -> C64 {
    if conj {
        z.conj()
    } else {
        z
    }
}

// ============================================================================
// LU
// ============================================================================

/// In-place LU factorization with partial pivoting of an m×n matrix.
///
/// Returns the LAPACK info: 0, or the 1-based index of the first exactly
/// zero pivot. Factorization continues past a zero pivot.
pub(crate) fn getrf(m: usize, n: usize, a: &mut [C64], ipiv: &mut [i32]) -> i32 {
    let mut info = 0;
    for j in 0..m.min(n) {
        let mut p = j;
        let mut best = a[at(m, j, j)].norm();
        for i in j + 1..m {
            let v = a[at(m, i, j)].norm();
            if v > best {
                best = v;
                p = i;
            }
        }
        ipiv[j] = (p + 1) as i32;

        if a[at(m, p, j)] != ZERO {
            if p != j {
                for c in 0..n {
                    a.swap(at(m, j, c), at(m, p, c));
                }
            }
            let pivot = a[at(m, j, j)];
            for i in j + 1..m {
                a[at(m, i, j)] /= pivot;
            }
        } else if info == 0 {
            info = (j + 1) as i32;
        }

        for c in j + 1..n {
            let t = a[at(m, j, c)];
            if t == ZERO {
                continue;
            }
            for i in j + 1..m {
                let l = a[at(m, i, j)];
                a[at(m, i, c)] -= l * t;
            }
        }
    }
    info
}

/// Solve `op(A)·X = B` for n×nrhs `B` in place, using `getrf` output.
pub(crate) fn getrs(
    trans: Transpose,
    n: usize,
    nrhs: usize,
    lu: &[C64],
    ipiv: &[i32],
    b: &mut [C64],
) {
    let pivot = |j: usize| (ipiv[j] - 1) as usize;
    for col in 0..nrhs {
        let x = &mut b[col * n..(col + 1) * n];
        match trans {
            Transpose::None => {
                for j in 0..n {
                    x.swap(j, pivot(j));
                }
                // L·y = P·b, unit diagonal
                for j in 0..n {
                    let xj = x[j];
                    for i in j + 1..n {
                        x[i] -= lu[at(n, i, j)] * xj;
                    }
                }
                // U·x = y
                for j in (0..n).rev() {
                    x[j] /= lu[at(n, j, j)];
                    let xj = x[j];
                    for i in 0..j {
                        x[i] -= lu[at(n, i, j)] * xj;
                    }
                }
            }
            Transpose::Transpose | Transpose::ConjugateTranspose => {
                let conj = trans == Transpose::ConjugateTranspose;
                // op(U)·y = b
                for j in 0..n {
                    let mut s = x[j];
                    for i in 0..j {
                        s -= maybe_conj(lu[at(n, i, j)], conj) * x[i];
                    }
                    x[j] = s / maybe_conj(lu[at(n, j, j)], conj);
                }
                // op(L)·z = y, unit diagonal
                for j in (0..n).rev() {
                    let mut s = x[j];
                    for i in j + 1..n {
                        s -= maybe_conj(lu[at(n, i, j)], conj) * x[i];
                    }
                    x[j] = s;
                }
                for j in (0..n).rev() {
                    x.swap(j, pivot(j));
                }
            }
        }
    }
}

pub(crate) fn identity(n: usize) -> Vec<C64> {
    let mut a = vec![ZERO; n * n];
    for i in 0..n {
        a[at(n, i, i)] = ONE;
    }
    a
}

/// Inverse from LU factors. Returns the info of a zero diagonal in U.
pub(crate) fn getri(n: usize, lu: &[C64], ipiv: &[i32]) -> (Vec<C64>, i32) {
    if let Some(j) = (0..n).find(|&j| lu[at(n, j, j)] == ZERO) {
        return (vec![ZERO; n * n], (j + 1) as i32);
    }
    let mut c = identity(n);
    getrs(Transpose::None, n, n, lu, ipiv, &mut c);
    (c, 0)
}

/// Inverse of an unfactored matrix.
pub(crate) fn matinv(n: usize, mut a: Vec<C64>) -> (Vec<C64>, i32) {
    let mut ipiv = vec![0i32; n];
    let info = getrf(n, n, &mut a, &mut ipiv);
    if info != 0 {
        return (vec![ZERO; n * n], info);
    }
    getri(n, &a, &ipiv)
}

// ============================================================================
// QR
// ============================================================================

/// Generate an elementary reflector for column `col`, rows `col..m`.
///
/// On return the column holds beta at the diagonal and the reflector's
/// tail below it; the returned value is tau.
fn larfg(m: usize, a: &mut [C64], col: usize, ld: usize) -> C64 {
    let alpha = a[at(ld, col, col)];
    let xnorm = (col + 1..m)
        .map(|i| a[at(ld, i, col)].norm_sqr())
        .sum::<f64>()
        .sqrt();
    if xnorm == 0.0 && alpha.im == 0.0 {
        return ZERO;
    }
    let norm = (alpha.norm_sqr() + xnorm * xnorm).sqrt();
    let beta = if alpha.re >= 0.0 { -norm } else { norm };
    let tau = Complex::new((beta - alpha.re) / beta, -alpha.im / beta);
    let scale = ONE / (alpha - beta);
    for i in col + 1..m {
        a[at(ld, i, col)] *= scale;
    }
    a[at(ld, col, col)] = Complex::new(beta, 0.0);
    tau
}

/// Apply `I - t·v·vᴴ` from the left to columns `cols` of rows `row..m`,
/// where `v` is column `row` below the diagonal with an implicit leading 1.
fn apply_reflector(
    m: usize,
    a: &mut [C64],
    ld: usize,
    row: usize,
    cols: std::ops::Range<usize>,
    t: C64,
) {
    if t == ZERO {
        return;
    }
    for c in cols {
        let mut w = a[at(ld, row, c)];
        for i in row + 1..m {
            w += a[at(ld, i, row)].conj() * a[at(ld, i, c)];
        }
        let tw = t * w;
        a[at(ld, row, c)] -= tw;
        for i in row + 1..m {
            let v = a[at(ld, i, row)];
            a[at(ld, i, c)] -= v * tw;
        }
    }
}

/// Householder QR of an m×n matrix in place; writes min(m, n) taus.
pub(crate) fn geqrf(m: usize, n: usize, a: &mut [C64], tau: &mut [C64]) {
    for i in 0..m.min(n) {
        let t = larfg(m, a, i, m);
        tau[i] = t;
        // Qᴴ·A applies H(i)ᴴ, whose scalar is conj(tau)
        apply_reflector(m, a, m, i, i + 1..n, t.conj());
    }
}

/// Overwrite the m×n matrix holding `k` reflectors with the leading n
/// columns of `Q = H(1)·…·H(k)`.
pub(crate) fn orgqr(m: usize, n: usize, k: usize, a: &mut [C64], tau: &[C64]) {
    for j in k..n {
        for i in 0..m {
            a[at(m, i, j)] = ZERO;
        }
        if j < m {
            a[at(m, j, j)] = ONE;
        }
    }
    for i in (0..k).rev() {
        if i + 1 < n {
            a[at(m, i, i)] = ONE;
            apply_reflector(m, a, m, i, i + 1..n, tau[i]);
        }
        for r in i + 1..m {
            a[at(m, r, i)] *= -tau[i];
        }
        a[at(m, i, i)] = ONE - tau[i];
        for r in 0..i {
            a[at(m, r, i)] = ZERO;
        }
    }
}

// ============================================================================
// SVD
// ============================================================================

/// Thin SVD result: singular values in descending order, U (m×k) and
/// Vᴴ (k×n), packed column-major.
pub(crate) struct Svd {
    pub s: Vec<f64>,
    pub u: Vec<C64>,
    pub vt: Vec<C64>,
}

/// SVD of an m×n matrix. `complex` selects complex arithmetic; otherwise the
/// imaginary parts are ignored and the factors are real. `None` when the
/// iteration does not converge.
pub(crate) fn gesvd(m: usize, n: usize, a: &[C64], complex: bool) -> Option<Svd> {
    let k = m.min(n);
    if k == 0 {
        return Some(Svd {
            s: Vec::new(),
            u: Vec::new(),
            vt: Vec::new(),
        });
    }
    let (s, u, vt) = if complex {
        let svd = DMatrix::from_column_slice(m, n, a).try_svd(true, true, f64::EPSILON, 10_000)?;
        (
            svd.singular_values.iter().copied().collect::<Vec<_>>(),
            svd.u?.as_slice().to_vec(),
            svd.v_t?.as_slice().to_vec(),
        )
    } else {
        let real: Vec<f64> = a.iter().map(|z| z.re).collect();
        let svd =
            DMatrix::from_column_slice(m, n, &real).try_svd(true, true, f64::EPSILON, 10_000)?;
        let widen =
            |mat: DMatrix<f64>| mat.iter().map(|&x| Complex::new(x, 0.0)).collect::<Vec<_>>();
        (
            svd.singular_values.iter().copied().collect::<Vec<_>>(),
            widen(svd.u?),
            widen(svd.v_t?),
        )
    };

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&x, &y| s[y].total_cmp(&s[x]));

    let mut sorted = Svd {
        s: order.iter().map(|&i| s[i]).collect(),
        u: vec![ZERO; m * k],
        vt: vec![ZERO; k * n],
    };
    for (dst, &src) in order.iter().enumerate() {
        sorted.u[dst * m..(dst + 1) * m].copy_from_slice(&u[src * m..(src + 1) * m]);
        for c in 0..n {
            sorted.vt[at(k, dst, c)] = vt[at(k, src, c)];
        }
    }
    Some(sorted)
}

/// Whether the sim can honor a job for a factor with `full` rows/columns
/// when only `k` are computed.
pub(crate) fn job_supported(job: SvdJob, full: usize, k: usize) -> bool {
    job != SvdJob::All || full == k
}
