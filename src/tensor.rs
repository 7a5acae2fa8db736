//! Per-phase values and tensors.
//!
//! Symmetric calculations use one phase (`N = 1`), asymmetric calculations
//! three phases (`N = 3`). Tensors are row-major `N x N` arrays.

use num_complex::Complex64;
use std::array::from_fn;
use std::f64::consts::PI;

pub const SYMMETRIC: usize = 1;
pub const ASYMMETRIC: usize = 3;

pub type RealValue<const N: usize> = [f64; N];
pub type ComplexValue<const N: usize> = [Complex64; N];
pub type RealTensor<const N: usize> = [[f64; N]; N];
pub type ComplexTensor<const N: usize> = [[Complex64; N]; N];

/// Angle of each phase relative to phase a: `0, -2pi/3, -4pi/3`.
pub fn unit_angles<const N: usize>() -> RealValue<N> {
    from_fn(|p| -2.0 * PI * p as f64 / N as f64)
}

/// Balanced phasor with magnitude `m` and phase-a angle `theta`.
pub fn phasor<const N: usize>(m: f64, theta: f64) -> ComplexValue<N> {
    let offset = unit_angles::<N>();
    from_fn(|p| Complex64::from_polar(m, theta + offset[p]))
}

pub fn zero_value<const N: usize>() -> ComplexValue<N> {
    [Complex64::default(); N]
}

pub fn zero_tensor<const N: usize>() -> ComplexTensor<N> {
    [[Complex64::default(); N]; N]
}

pub fn zero_real<const N: usize>() -> RealTensor<N> {
    [[0.0; N]; N]
}

/// Tensor with `z` on the diagonal.
pub fn diag_tensor<const N: usize>(z: Complex64) -> ComplexTensor<N> {
    from_fn(|i| from_fn(|j| if i == j { z } else { Complex64::default() }))
}

pub fn add_tensor<const N: usize>(a: &mut ComplexTensor<N>, b: &ComplexTensor<N>) {
    for i in 0..N {
        for j in 0..N {
            a[i][j] += b[i][j];
        }
    }
}

pub fn mat_vec<const N: usize>(a: &ComplexTensor<N>, x: &ComplexValue<N>) -> ComplexValue<N> {
    from_fn(|i| (0..N).map(|j| a[i][j] * x[j]).sum())
}

pub fn add_value<const N: usize>(a: &mut ComplexValue<N>, b: &ComplexValue<N>) {
    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
}

/// Elementwise `u * conj(i)`.
pub fn power<const N: usize>(u: &ComplexValue<N>, i: &ComplexValue<N>) -> ComplexValue<N> {
    from_fn(|p| u[p] * i[p].conj())
}

pub fn cabs<const N: usize>(u: &ComplexValue<N>) -> RealValue<N> {
    from_fn(|p| u[p].norm())
}

/// Largest per-phase magnitude of `a - b`. NaN propagates.
pub fn max_deviation<const N: usize>(a: &ComplexValue<N>, b: &ComplexValue<N>) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, |m, d| if d.is_nan() || d > m { d } else { m })
}

/// `h[p][q] = conj(y[p][q]) * ui[p] * conj(uj[q])`.
///
/// Row `p` of the sum over all blocks of a bus row is the complex power
/// `ui[p] * conj((Y u)[p])`.
pub fn hm_complex_form<const N: usize>(
    y: &ComplexTensor<N>,
    ui: &ComplexValue<N>,
    uj: &ComplexValue<N>,
) -> ComplexTensor<N> {
    from_fn(|p| from_fn(|q| y[p][q].conj() * ui[p] * uj[q].conj()))
}

pub fn sum_row<const N: usize>(h: &ComplexTensor<N>) -> ComplexValue<N> {
    from_fn(|p| h[p].iter().sum())
}

pub fn transpose<const N: usize>(a: &RealTensor<N>) -> RealTensor<N> {
    from_fn(|i| from_fn(|j| a[j][i]))
}

/// `a^T diag(w) b`.
pub fn weighted_tmul<const N: usize>(
    a: &RealTensor<N>,
    w: &RealValue<N>,
    b: &RealTensor<N>,
) -> RealTensor<N> {
    from_fn(|i| from_fn(|j| (0..N).map(|k| a[k][i] * w[k] * b[k][j]).sum()))
}

/// `a^T diag(w) r`.
pub fn weighted_tvec<const N: usize>(
    a: &RealTensor<N>,
    w: &RealValue<N>,
    r: &RealValue<N>,
) -> RealValue<N> {
    from_fn(|i| (0..N).map(|k| a[k][i] * w[k] * r[k]).sum())
}

fn add_real<const N: usize>(a: &RealTensor<N>, b: &RealTensor<N>) -> RealTensor<N> {
    from_fn(|i| from_fn(|j| a[i][j] + b[i][j]))
}

/// Four `N x N` quadrants of a `2N x 2N` real block:
/// `[[ul, ur], [ll, lr]]`.
///
/// As a power Jacobian the rows are `(P, Q)` and the columns `(theta, v)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadBlock<const N: usize> {
    pub ul: RealTensor<N>,
    pub ur: RealTensor<N>,
    pub ll: RealTensor<N>,
    pub lr: RealTensor<N>,
}

impl<const N: usize> Default for QuadBlock<N> {
    fn default() -> Self {
        Self {
            ul: zero_real(),
            ur: zero_real(),
            ll: zero_real(),
            lr: zero_real(),
        }
    }
}

impl<const N: usize> QuadBlock<N> {
    /// Power Jacobian of `sum(h)` with respect to the voltage of the column
    /// bus, excluding the row bus's own-voltage terms.
    pub fn from_hm(h: &ComplexTensor<N>, uj_abs: &RealValue<N>) -> Self {
        Self {
            ul: from_fn(|p| from_fn(|q| h[p][q].im)),
            ur: from_fn(|p| from_fn(|q| h[p][q].re / uj_abs[q])),
            ll: from_fn(|p| from_fn(|q| -h[p][q].re)),
            lr: from_fn(|p| from_fn(|q| h[p][q].im / uj_abs[q])),
        }
    }

    /// Adds the own-voltage terms of a bus with calculated power `s`.
    pub fn add_diag_component(&mut self, s: &ComplexValue<N>, ui_abs: &RealValue<N>) {
        for p in 0..N {
            self.ul[p][p] -= s[p].im;
            self.ur[p][p] += s[p].re / ui_abs[p];
            self.ll[p][p] += s[p].re;
            self.lr[p][p] += s[p].im / ui_abs[p];
        }
    }

    pub fn add(&mut self, other: &Self) {
        self.ul = add_real(&self.ul, &other.ul);
        self.ur = add_real(&self.ur, &other.ur);
        self.ll = add_real(&self.ll, &other.ll);
        self.lr = add_real(&self.lr, &other.lr);
    }

    pub fn neg(&self) -> Self {
        let n = |a: &RealTensor<N>| -> RealTensor<N> { from_fn(|i| from_fn(|j| -a[i][j])) };
        Self {
            ul: n(&self.ul),
            ur: n(&self.ur),
            ll: n(&self.ll),
            lr: n(&self.lr),
        }
    }

    /// Transpose of the full `2N x 2N` block.
    pub fn transpose(&self) -> Self {
        Self {
            ul: transpose(&self.ul),
            ur: transpose(&self.ll),
            ll: transpose(&self.ur),
            lr: transpose(&self.lr),
        }
    }

    /// `self^T diag(w_p, w_q) other`.
    pub fn weighted_tmul(&self, w_p: &RealValue<N>, w_q: &RealValue<N>, other: &Self) -> Self {
        Self {
            ul: add_real(
                &weighted_tmul(&self.ul, w_p, &other.ul),
                &weighted_tmul(&self.ll, w_q, &other.ll),
            ),
            ur: add_real(
                &weighted_tmul(&self.ul, w_p, &other.ur),
                &weighted_tmul(&self.ll, w_q, &other.lr),
            ),
            ll: add_real(
                &weighted_tmul(&self.ur, w_p, &other.ul),
                &weighted_tmul(&self.lr, w_q, &other.ll),
            ),
            lr: add_real(
                &weighted_tmul(&self.ur, w_p, &other.ur),
                &weighted_tmul(&self.lr, w_q, &other.lr),
            ),
        }
    }

    /// `self^T diag(w_p, w_q) [r_p; r_q]`, split into the upper and lower half.
    pub fn weighted_tvec(
        &self,
        w_p: &RealValue<N>,
        w_q: &RealValue<N>,
        r_p: &RealValue<N>,
        r_q: &RealValue<N>,
    ) -> (RealValue<N>, RealValue<N>) {
        let a = weighted_tvec(&self.ul, w_p, r_p);
        let b = weighted_tvec(&self.ll, w_q, r_q);
        let c = weighted_tvec(&self.ur, w_p, r_p);
        let d = weighted_tvec(&self.lr, w_q, r_q);
        (from_fn(|i| a[i] + b[i]), from_fn(|i| c[i] + d[i]))
    }

    /// Writes the block into rows `r0..r0+2N` and columns `c0..c0+2N` of a
    /// row-major dense block with `stride` columns.
    pub fn write(&self, out: &mut [f64], stride: usize, r0: usize, c0: usize) {
        for i in 0..N {
            for j in 0..N {
                out[(r0 + i) * stride + c0 + j] = self.ul[i][j];
                out[(r0 + i) * stride + c0 + N + j] = self.ur[i][j];
                out[(r0 + N + i) * stride + c0 + j] = self.ll[i][j];
                out[(r0 + N + i) * stride + c0 + N + j] = self.lr[i][j];
            }
        }
    }
}

/// Power Jacobian of `sum_j sum_row(h_j)` with respect to the row bus, given
/// the block `h_ii` and the row's calculated power `s_i`.
pub fn diag_jacobian<const N: usize>(
    h_ii: &ComplexTensor<N>,
    s_i: &ComplexValue<N>,
    ui_abs: &RealValue<N>,
) -> QuadBlock<N> {
    let mut block = QuadBlock::from_hm(h_ii, ui_abs);
    block.add_diag_component(s_i, ui_abs);
    block
}

/// Flattens a complex tensor into a row-major block.
pub fn write_tensor<const N: usize>(t: &ComplexTensor<N>, out: &mut [Complex64]) {
    for i in 0..N {
        out[i * N..(i + 1) * N].copy_from_slice(&t[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;

    fn power_at(y: &ComplexTensor<1>, u0: Complex64, u1: Complex64) -> Complex64 {
        let h0 = hm_complex_form(y, &[u0], &[u0]);
        let h1 = hm_complex_form(&[[-y[0][0]]], &[u0], &[u1]);
        h0[0][0] + h1[0][0]
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let y = [[cmplx!(10.0, -5.0)]];
        let (v0, t0, v1, t1) = (1.02, 0.1, 0.97, -0.05);
        let u0 = Complex64::from_polar(v0, t0);
        let u1 = Complex64::from_polar(v1, t1);
        let s = power_at(&y, u0, u1);

        let h00 = hm_complex_form(&y, &[u0], &[u0]);
        let h01 = hm_complex_form(&[[-y[0][0]]], &[u0], &[u1]);
        let own = diag_jacobian(&h00, &[s], &[v0]);
        let other = QuadBlock::from_hm(&h01, &[v1]);

        let eps = 1e-7;
        let d_t0 = (power_at(&y, Complex64::from_polar(v0, t0 + eps), u1) - s) / eps;
        let d_v0 = (power_at(&y, Complex64::from_polar(v0 + eps, t0), u1) - s) / eps;
        let d_t1 = (power_at(&y, u0, Complex64::from_polar(v1, t1 + eps)) - s) / eps;
        let d_v1 = (power_at(&y, u0, Complex64::from_polar(v1 + eps, t1)) - s) / eps;

        let tol = 1e-5;
        assert!((own.ul[0][0] - d_t0.re).abs() < tol);
        assert!((own.ll[0][0] - d_t0.im).abs() < tol);
        assert!((own.ur[0][0] - d_v0.re).abs() < tol);
        assert!((own.lr[0][0] - d_v0.im).abs() < tol);
        assert!((other.ul[0][0] - d_t1.re).abs() < tol);
        assert!((other.ll[0][0] - d_t1.im).abs() < tol);
        assert!((other.ur[0][0] - d_v1.re).abs() < tol);
        assert!((other.lr[0][0] - d_v1.im).abs() < tol);
    }

    #[test]
    fn quad_transpose_is_full_transpose() {
        let mut b = QuadBlock::<1>::default();
        b.ur[0][0] = 2.0;
        b.ll[0][0] = 3.0;
        let t = b.transpose();
        assert_eq!(t.ur[0][0], 3.0);
        assert_eq!(t.ll[0][0], 2.0);
        assert_eq!(t.transpose(), b);
    }

    #[test]
    fn phasor_angles() {
        let u = phasor::<3>(1.0, 0.0);
        assert!((u[1].arg() + 2.0 * PI / 3.0).abs() < 1e-12);
        assert!((u[2].arg() - 2.0 * PI / 3.0).abs() < 1e-12);
    }
}
