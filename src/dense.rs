//! Dense kernels on the row-major blocks stored at each nonzero of the
//! block-sparse LU factorization, and a small dense matrix used to expand
//! sparse systems for inspection.

use derive_builder::Builder;
use num_complex::Complex64;
use num_traits::{NumAssign, One, Zero};
use std::fmt::Debug;
use std::ops::Neg;

use crate::error::SparseMatrixErrorKind;

/// Pivots with a modulus below this are treated as singular.
pub const PIVOT_TOL: f64 = 1e-14;

/// Scalar types the block LU operates on.
pub trait LuScalar:
    NumAssign + Neg<Output = Self> + Copy + Default + Debug + Send + Sync + 'static
{
    fn modulus(&self) -> f64;
}

impl LuScalar for f64 {
    fn modulus(&self) -> f64 {
        self.abs()
    }
}

impl LuScalar for Complex64 {
    fn modulus(&self) -> f64 {
        self.norm()
    }
}

/// Factorizes the `n x n` block `a` in place with full pivoting so that
/// `a[p[i]][q[j]] = (L U)[i][j]`, `L` unit lower triangular.
pub fn factorize_block<T: LuScalar>(
    a: &mut [T],
    n: usize,
    p: &mut [usize],
    q: &mut [usize],
) -> Result<(), SparseMatrixErrorKind> {
    for i in 0..n {
        p[i] = i;
        q[i] = i;
    }
    for k in 0..n {
        let (mut pi, mut pj, mut max) = (k, k, -1.0);
        for i in k..n {
            for j in k..n {
                let m = a[i * n + j].modulus();
                if !m.is_finite() {
                    return Err(SparseMatrixErrorKind::NotFinite);
                }
                if m > max {
                    (pi, pj, max) = (i, j, m);
                }
            }
        }
        if max < PIVOT_TOL {
            return Err(SparseMatrixErrorKind::Singular);
        }
        if pi != k {
            for j in 0..n {
                a.swap(k * n + j, pi * n + j);
            }
            p.swap(k, pi);
        }
        if pj != k {
            for i in 0..n {
                a.swap(i * n + k, i * n + pj);
            }
            q.swap(k, pj);
        }
        let pivot = a[k * n + k];
        for i in k + 1..n {
            let l = a[i * n + k] / pivot;
            a[i * n + k] = l;
            for j in k + 1..n {
                let u = a[k * n + j];
                a[i * n + j] -= l * u;
            }
        }
    }
    Ok(())
}

/// `x <- L^-1 P x` for a factorized diagonal block.
pub fn lower_solve_vec<T: LuScalar>(lu: &[T], p: &[usize], n: usize, x: &mut [T], tmp: &mut [T]) {
    for i in 0..n {
        tmp[i] = x[p[i]];
    }
    for i in 0..n {
        let mut v = tmp[i];
        for k in 0..i {
            v -= lu[i * n + k] * x[k];
        }
        x[i] = v;
    }
}

/// `x <- Q U^-1 x` for a factorized diagonal block.
pub fn upper_solve_vec<T: LuScalar>(lu: &[T], q: &[usize], n: usize, x: &mut [T], tmp: &mut [T]) {
    for i in (0..n).rev() {
        let mut v = x[i];
        for k in i + 1..n {
            v -= lu[i * n + k] * tmp[k];
        }
        tmp[i] = v / lu[i * n + i];
    }
    for j in 0..n {
        x[q[j]] = tmp[j];
    }
}

/// `a <- L^-1 P a` for an `n x n` block `a`.
pub fn lower_solve_block<T: LuScalar>(
    lu: &[T],
    p: &[usize],
    n: usize,
    a: &mut [T],
    tmp: &mut [T],
) {
    tmp[..n * n].copy_from_slice(&a[..n * n]);
    for i in 0..n {
        a[i * n..(i + 1) * n].copy_from_slice(&tmp[p[i] * n..(p[i] + 1) * n]);
    }
    for i in 1..n {
        for k in 0..i {
            let l = lu[i * n + k];
            if l == T::zero() {
                continue;
            }
            for j in 0..n {
                let v = a[k * n + j];
                a[i * n + j] -= l * v;
            }
        }
    }
}

/// `a <- a Q U^-1` for an `n x n` block `a`.
pub fn upper_solve_block<T: LuScalar>(
    lu: &[T],
    q: &[usize],
    n: usize,
    a: &mut [T],
    tmp: &mut [T],
) {
    tmp[..n * n].copy_from_slice(&a[..n * n]);
    for r in 0..n {
        for j in 0..n {
            a[r * n + j] = tmp[r * n + q[j]];
        }
        for j in 0..n {
            let mut v = a[r * n + j];
            for m in 0..j {
                v -= a[r * n + m] * lu[m * n + j];
            }
            a[r * n + j] = v / lu[j * n + j];
        }
    }
}

/// `c <- c - a b`.
pub fn sub_mul_block<T: LuScalar>(c: &mut [T], a: &[T], b: &[T], n: usize) {
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            if aik == T::zero() {
                continue;
            }
            for j in 0..n {
                c[i * n + j] -= aik * b[k * n + j];
            }
        }
    }
}

/// `y <- y - a x`.
pub fn sub_mul_vec<T: LuScalar>(y: &mut [T], a: &[T], x: &[T], n: usize) {
    for i in 0..n {
        let mut v = T::zero();
        for j in 0..n {
            v += a[i * n + j] * x[j];
        }
        y[i] -= v;
    }
}

/// Row-major dense matrix.
#[derive(Debug, Clone, Default, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct Mat<T: Default> {
    #[builder(setter(custom))]
    rows: usize,
    #[builder(setter(custom))]
    cols: usize,

    values: Vec<T>,
}

impl<T> MatBuilder<T>
where
    T: Default + Clone,
{
    pub fn build(&self) -> Result<Mat<T>, MatBuilderError>
    where
        T: Zero,
    {
        let mut mat = self.pre_build()?;
        if self.values.is_none() {
            mat.values = vec![T::zero(); mat.rows * mat.cols];
        }
        Ok(mat)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(values) = &self.values {
            let (rows, cols) = (self.rows.unwrap_or(0), self.cols.unwrap_or(0));
            if values.len() != rows * cols {
                return Err(format!(
                    "values length ({}) must be rows * cols ({} * {} = {})",
                    values.len(),
                    rows,
                    cols,
                    rows * cols
                ));
            }
        }
        Ok(())
    }
}

impl<T> Mat<T>
where
    T: Default + Copy,
{
    pub fn new(rows: usize, cols: usize) -> MatBuilder<T> {
        MatBuilder {
            rows: Some(rows),
            cols: Some(cols),
            ..Default::default()
        }
    }

    pub fn identity(n: usize) -> MatBuilder<T>
    where
        T: Zero + One,
    {
        let mut values = vec![T::zero(); n * n];
        for i in 0..n {
            values[i * n + i] = T::one();
        }
        MatBuilder {
            rows: Some(n),
            cols: Some(n),
            values: Some(values),
            ..Default::default()
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &Vec<T> {
        &self.values
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.values[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: T) {
        self.values[row * self.cols + col] = v
    }

    pub fn mat_vec(&self, b: &[T]) -> Vec<T>
    where
        T: LuScalar,
    {
        assert_eq!(b.len(), self.cols);
        (0..self.rows)
            .map(|i| dot(&self.values[i * self.cols..(i + 1) * self.cols], b))
            .collect()
    }

    /// Solves `A x = b` with a full-pivot factorization of a copy of `A`.
    pub fn solve(&self, b: &[T]) -> Result<Vec<T>, SparseMatrixErrorKind>
    where
        T: LuScalar,
    {
        assert_eq!(self.rows, self.cols);
        let n = self.rows;
        let mut lu = self.values.clone();
        let (mut p, mut q) = (vec![0; n], vec![0; n]);
        factorize_block(&mut lu, n, &mut p, &mut q)?;
        let mut x = b.to_vec();
        let mut tmp = vec![T::zero(); n];
        lower_solve_vec(&lu, &p, n, &mut x, &mut tmp);
        upper_solve_vec(&lu, &q, n, &mut x, &mut tmp);
        Ok(x)
    }
}

/// Computes the dot-product of `a` and `b`.
pub fn dot<T>(a: &[T], b: &[T]) -> T
where
    T: LuScalar,
{
    a.iter()
        .zip(b)
        .map(|(&ai, &bi)| ai * bi)
        .fold(T::zero(), |x, y| x + y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;

    #[test]
    fn block_factorization_solves() {
        let a = vec![0.0, 2.0, 1.0, 1.0, 1.0, 0.0, 3.0, 0.0, 1.0];
        let m = Mat::new(3, 3).values(a).build().unwrap();
        let x = m.solve(&[3.0, 2.0, 4.0]).unwrap();
        let b = m.mat_vec(&x);
        for (bi, ei) in b.iter().zip([3.0, 2.0, 4.0]) {
            assert!((bi - ei).abs() < 1e-12);
        }
    }

    #[test]
    fn block_kernels_match_dense() {
        let n = 2;
        let mut lu = vec![cmplx!(1.0, 2.0), cmplx!(3.0), cmplx!(-1.0), cmplx!(0.5, -1.0)];
        let orig = lu.clone();
        let (mut p, mut q) = (vec![0; n], vec![0; n]);
        factorize_block(&mut lu, n, &mut p, &mut q).unwrap();

        // a Q U^-1 followed by L^-1 P applied to the original block gives identity
        let mut left = orig.clone();
        let mut tmp = vec![cmplx!(); n * n];
        lower_solve_block(&lu, &p, n, &mut left, &mut tmp);
        upper_solve_block(&lu, &q, n, &mut left, &mut tmp);
        for i in 0..n {
            for j in 0..n {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((left[i * n + j] - cmplx!(expect)).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn singular_block() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        let (mut p, mut q) = (vec![0; 2], vec![0; 2]);
        assert_eq!(
            factorize_block(&mut a, 2, &mut p, &mut q),
            Err(SparseMatrixErrorKind::Singular)
        );
        let mut a = vec![f64::NAN, 0.0, 0.0, 1.0];
        assert_eq!(
            factorize_block(&mut a, 2, &mut p, &mut q),
            Err(SparseMatrixErrorKind::NotFinite)
        );
    }

    #[test]
    fn builder_rejects_bad_length() {
        assert!(Mat::<f64>::new(2, 2).values(vec![1.0]).build().is_err());
        let m = Mat::<f64>::identity(2).build().unwrap();
        assert_eq!(m.get(1, 1), 1.0);
        assert_eq!(m.get(0, 1), 0.0);
    }
}
