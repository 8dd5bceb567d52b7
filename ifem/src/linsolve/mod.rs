//! Iterative linear solvers and the sparse-operator plumbing they run on.

mod cg;
mod cr;
mod precond;

pub use cg::*;
pub use cr::*;
pub use precond::*;

use sprs::CsMat;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum Status {
    #[error("Success")]
    Success,
    #[error("Maximum number of linear solver iterations exceeded")]
    MaximumIterationsExceeded,
    #[error("NaN detected")]
    NanDetected,
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub struct SolveResult {
    /// Number of iterations of an iterative solver.
    pub iterations: u32,
    /// Absolute residual 2-norm.
    pub residual: f64,
    /// Relative residual 2-norm.
    ///
    /// Residual divided by the norm of the right-hand-side.
    pub error: f64,
    /// Final status of the linear solve.
    pub status: Status,
}

/// Build a CSR matrix from accumulated `(row, col, value)` triplets,
/// summing duplicates.
pub fn csr_from_triplets(
    n_rows: usize,
    n_cols: usize,
    triplets: &[(usize, usize, f64)],
) -> CsMat<f64> {
    let rows: Vec<usize> = triplets.iter().map(|t| t.0).collect();
    let cols: Vec<usize> = triplets.iter().map(|t| t.1).collect();
    let values: Vec<f64> = triplets.iter().map(|t| t.2).collect();
    sprs::TriMat::from_triplets((n_rows, n_cols), rows, cols, values).to_csr()
}

/// Sparse matrix-vector product `y = A x`.
pub fn spmv(matrix: &CsMat<f64>, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(matrix.cols(), x.len());
    debug_assert_eq!(matrix.rows(), y.len());
    for (row, vec) in matrix.outer_iterator().enumerate() {
        let mut sum = 0.0;
        for (col, &value) in vec.iter() {
            sum += value * x[col];
        }
        y[row] = sum;
    }
}

/// Main diagonal of a square CSR matrix.
pub fn diagonal(matrix: &CsMat<f64>) -> Vec<f64> {
    let mut diag = vec![0.0; matrix.rows()];
    for (row, vec) in matrix.outer_iterator().enumerate() {
        for (col, &value) in vec.iter() {
            if col == row {
                diag[row] = value;
            }
        }
    }
    diag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplets_sum_duplicates() {
        let m = csr_from_triplets(2, 2, &[(0, 0, 1.0), (0, 0, 2.0), (1, 0, -1.0)]);
        let mut y = vec![0.0; 2];
        spmv(&m, &[1.0, 1.0], &mut y);
        assert_eq!(y, vec![3.0, -1.0]);
        assert_eq!(diagonal(&m), vec![3.0, 0.0]);
    }
}
