//! Block-sparse LU factorization.
//!
//! The symbolic part ([LuPattern]) is computed once from the structure of a
//! symmetric sparsity pattern. [SparseLuSolver] then refactorizes numeric
//! values on that fixed pattern as often as needed. Every nonzero holds a
//! dense row-major `b x b` block; diagonal blocks are factorized with full
//! pivoting.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::dense::{
    factorize_block, lower_solve_block, lower_solve_vec, sub_mul_block, sub_mul_vec,
    upper_solve_block, upper_solve_vec, LuScalar,
};
use crate::error::{Result, SolverError};

/// Sparsity pattern of the LU factors, including fill-ins.
#[derive(Debug, Clone, PartialEq)]
pub struct LuPattern {
    pub row_indptr: Vec<usize>,
    pub col_indices: Vec<usize>,
    /// Position of the diagonal entry of each row.
    pub diag: Vec<usize>,
    /// Position of the entry `(col, row)` for the entry `(row, col)`.
    pub transpose_entry: Vec<usize>,
}

impl LuPattern {
    /// Symbolic elimination in natural order of a structurally symmetric
    /// pattern given in CSR form. Diagonal entries are always present.
    pub fn from_symmetric_pattern(n: usize, row_indptr: &[usize], col_indices: &[usize]) -> Self {
        let mut adj: Vec<BTreeSet<usize>> = (0..n).map(|i| BTreeSet::from([i])).collect();
        for i in 0..n {
            for &j in &col_indices[row_indptr[i]..row_indptr[i + 1]] {
                adj[i].insert(j);
                adj[j].insert(i);
            }
        }
        for k in 0..n {
            let higher: Vec<usize> = adj[k].range(k + 1..).copied().collect();
            for (a, &i) in higher.iter().enumerate() {
                for &j in &higher[a + 1..] {
                    adj[i].insert(j);
                    adj[j].insert(i);
                }
            }
        }

        let mut row_indptr = Vec::with_capacity(n + 1);
        let mut col_indices = Vec::new();
        let mut diag = Vec::with_capacity(n);
        row_indptr.push(0);
        for (i, row) in adj.iter().enumerate() {
            for &j in row {
                if j == i {
                    diag.push(col_indices.len());
                }
                col_indices.push(j);
            }
            row_indptr.push(col_indices.len());
        }

        let mut pattern = Self {
            row_indptr,
            col_indices,
            diag,
            transpose_entry: Vec::new(),
        };
        let mut transpose_entry = Vec::with_capacity(pattern.nnz());
        for i in 0..n {
            for p in pattern.row_indptr[i]..pattern.row_indptr[i + 1] {
                let j = pattern.col_indices[p];
                // symmetric by construction
                transpose_entry.push(pattern.find(j, i).unwrap_or(p));
            }
        }
        pattern.transpose_entry = transpose_entry;
        pattern
    }

    pub fn size(&self) -> usize {
        self.row_indptr.len() - 1
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// Position of `(row, col)` in the pattern.
    pub fn find(&self, row: usize, col: usize) -> Option<usize> {
        let (start, end) = (self.row_indptr[row], self.row_indptr[row + 1]);
        self.col_indices[start..end]
            .binary_search(&col)
            .ok()
            .map(|k| start + k)
    }
}

/// Numeric block LU on a shared [LuPattern].
#[derive(Debug, Clone)]
pub struct SparseLuSolver<T: LuScalar> {
    pattern: Arc<LuPattern>,
    block_size: usize,
    lu: Vec<T>,
    row_perm: Vec<usize>,
    col_perm: Vec<usize>,
    factorized: bool,
}

impl<T: LuScalar> SparseLuSolver<T> {
    pub fn new(pattern: Arc<LuPattern>, block_size: usize) -> Self {
        let n = pattern.size();
        Self {
            lu: vec![T::zero(); pattern.nnz() * block_size * block_size],
            row_perm: vec![0; n * block_size],
            col_perm: vec![0; n * block_size],
            pattern,
            block_size,
            factorized: false,
        }
    }

    pub fn pattern(&self) -> &Arc<LuPattern> {
        &self.pattern
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_factorized(&self) -> bool {
        self.factorized
    }

    /// Discards the numeric factorization; the pattern is kept.
    pub fn invalidate(&mut self) {
        self.factorized = false;
    }

    /// Numeric factorization of `data`, one block per pattern entry.
    pub fn prefactorize(&mut self, data: &[T]) -> Result<()> {
        let b = self.block_size;
        let bb = b * b;
        if data.len() != self.lu.len() {
            return Err(SolverError::InvalidInput {
                what: format!(
                    "matrix data length {} does not match {} blocks of size {}",
                    data.len(),
                    self.pattern.nnz(),
                    b
                ),
            });
        }
        self.factorized = false;
        self.lu.copy_from_slice(data);

        let pattern = Arc::clone(&self.pattern);
        let mut pivot = vec![T::zero(); bb];
        let mut tmp = vec![T::zero(); bb];
        let mut l_ik = vec![T::zero(); bb];
        let mut u_row: Vec<T> = Vec::new();

        for k in 0..pattern.size() {
            let dk = pattern.diag[k];
            pivot.copy_from_slice(&self.lu[dk * bb..(dk + 1) * bb]);
            factorize_block(
                &mut pivot,
                b,
                &mut self.row_perm[k * b..(k + 1) * b],
                &mut self.col_perm[k * b..(k + 1) * b],
            )
            .map_err(|kind| SolverError::SparseMatrix { bus: k, kind })?;
            self.lu[dk * bb..(dk + 1) * bb].copy_from_slice(&pivot);

            let p = &self.row_perm[k * b..(k + 1) * b];
            let q = &self.col_perm[k * b..(k + 1) * b];
            let upper = dk + 1..pattern.row_indptr[k + 1];

            u_row.clear();
            for pos in upper.clone() {
                let blk = &mut self.lu[pos * bb..(pos + 1) * bb];
                lower_solve_block(&pivot, p, b, blk, &mut tmp);
                u_row.extend_from_slice(blk);
                let t = pattern.transpose_entry[pos];
                upper_solve_block(&pivot, q, b, &mut self.lu[t * bb..(t + 1) * bb], &mut tmp);
            }

            for pos_ki in upper.clone() {
                let i = pattern.col_indices[pos_ki];
                let pos_ik = pattern.transpose_entry[pos_ki];
                l_ik.copy_from_slice(&self.lu[pos_ik * bb..(pos_ik + 1) * bb]);
                for (a, pos_kj) in upper.clone().enumerate() {
                    let j = pattern.col_indices[pos_kj];
                    let pos_ij = pattern.find(i, j).ok_or_else(|| SolverError::InvalidInput {
                        what: format!("fill-in ({}, {}) missing from LU pattern", i, j),
                    })?;
                    sub_mul_block(
                        &mut self.lu[pos_ij * bb..(pos_ij + 1) * bb],
                        &l_ik,
                        &u_row[a * bb..(a + 1) * bb],
                        b,
                    );
                }
            }
        }
        self.factorized = true;
        Ok(())
    }

    /// Forward and backward substitution with the current factorization.
    pub fn solve_with_prefactorized(&self, rhs: &[T], x: &mut [T]) -> Result<()> {
        if !self.factorized {
            return Err(SolverError::InvalidInput {
                what: "solve requested before factorization".to_string(),
            });
        }
        let b = self.block_size;
        let bb = b * b;
        let pattern = &self.pattern;
        let n = pattern.size();
        x[..n * b].copy_from_slice(&rhs[..n * b]);
        let mut tmp = vec![T::zero(); b];

        for i in 0..n {
            let (head, tail) = x.split_at_mut(i * b);
            let xi = &mut tail[..b];
            for pos in pattern.row_indptr[i]..pattern.diag[i] {
                let k = pattern.col_indices[pos];
                sub_mul_vec(xi, &self.lu[pos * bb..(pos + 1) * bb], &head[k * b..(k + 1) * b], b);
            }
            let d = pattern.diag[i];
            lower_solve_vec(
                &self.lu[d * bb..(d + 1) * bb],
                &self.row_perm[i * b..(i + 1) * b],
                b,
                xi,
                &mut tmp,
            );
        }

        for i in (0..n).rev() {
            let (head, tail) = x.split_at_mut((i + 1) * b);
            let xi = &mut head[i * b..];
            let d = pattern.diag[i];
            for pos in d + 1..pattern.row_indptr[i + 1] {
                let j = pattern.col_indices[pos];
                let off = (j - i - 1) * b;
                sub_mul_vec(xi, &self.lu[pos * bb..(pos + 1) * bb], &tail[off..off + b], b);
            }
            upper_solve_vec(
                &self.lu[d * bb..(d + 1) * bb],
                &self.col_perm[i * b..(i + 1) * b],
                b,
                xi,
                &mut tmp,
            );
        }
        Ok(())
    }

    pub fn solve(&mut self, data: &[T], rhs: &[T], x: &mut [T]) -> Result<()> {
        self.prefactorize(data)?;
        self.solve_with_prefactorized(rhs, x)
    }
}
