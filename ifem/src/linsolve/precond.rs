use sprs::CsMat;

use super::{diagonal, spmv, ConjugateGradient};

/// One application of an approximate inverse, `z = M^{-1} r`.
pub trait Preconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]);
}

/// No preconditioning.
pub struct Identity;

impl Preconditioner for Identity {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// Diagonal (Jacobi) preconditioner.
pub struct Jacobi {
    inverse_diagonal: Vec<f64>,
}

impl Jacobi {
    pub fn from_matrix(matrix: &CsMat<f64>) -> Self {
        let inverse_diagonal = diagonal(matrix)
            .into_iter()
            .map(|d| if d != 0.0 { 1.0 / d } else { 1.0 })
            .collect();
        Jacobi { inverse_diagonal }
    }
}

impl Preconditioner for Jacobi {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, &ri), &di) in z.iter_mut().zip(r).zip(&self.inverse_diagonal) {
            *zi = ri * di;
        }
    }
}

/// The action of a matrix inverse, computed by an inner conjugate gradient
/// solve driven close to machine precision.
///
/// Used for the pressure block of the saddle-point preconditioner, where the
/// operator is a (well conditioned) scaled mass matrix.
pub struct InverseMatrix<'a> {
    matrix: &'a CsMat<f64>,
    inner: Jacobi,
    tol: f64,
}

impl<'a> InverseMatrix<'a> {
    pub fn new(matrix: &'a CsMat<f64>) -> Self {
        InverseMatrix {
            inner: Jacobi::from_matrix(matrix),
            matrix,
            tol: 1e-11,
        }
    }
}

impl Preconditioner for InverseMatrix<'_> {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.iter_mut().for_each(|zi| *zi = 0.0);
        let mut rhs = r.to_vec();
        let mut cg = ConjugateGradient::new(r.len(), r.len() as u32 * 2, self.tol);
        cg.solve_preconditioned(
            |v, out| spmv(self.matrix, v, out),
            &self.inner,
            z,
            &mut rhs,
        );
    }
}

/// Block-diagonal preconditioner for the (velocity, pressure) system: one
/// preconditioner applied to the leading `split` entries, another to the
/// rest.
pub struct BlockDiagonalPreconditioner<A, S> {
    preconditioner_a: A,
    preconditioner_s: S,
    split: usize,
}

impl<A, S> BlockDiagonalPreconditioner<A, S> {
    pub fn new(preconditioner_a: A, preconditioner_s: S, split: usize) -> Self {
        BlockDiagonalPreconditioner {
            preconditioner_a,
            preconditioner_s,
            split,
        }
    }
}

impl<A: Preconditioner, S: Preconditioner> Preconditioner for BlockDiagonalPreconditioner<A, S> {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        let (ru, rp) = r.split_at(self.split);
        let (zu, zp) = z.split_at_mut(self.split);
        self.preconditioner_a.apply(ru, zu);
        self.preconditioner_s.apply(rp, zp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linsolve::csr_from_triplets;

    #[test]
    fn inverse_matrix_inverts() {
        let m = csr_from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 4.0), (0, 1, 1.0), (1, 0, 1.0)]);
        let inv = InverseMatrix::new(&m);
        let mut z = vec![0.0; 2];
        inv.apply(&[1.0, 0.0], &mut z);
        // M^{-1} e0 = (4, -1)/7.
        assert!((z[0] - 4.0 / 7.0).abs() < 1e-9);
        assert!((z[1] + 1.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn block_preconditioner_splits() {
        let a = csr_from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 2.0)]);
        let s = csr_from_triplets(1, 1, &[(0, 0, 4.0)]);
        let block =
            BlockDiagonalPreconditioner::new(Jacobi::from_matrix(&a), Jacobi::from_matrix(&s), 2);
        let mut z = vec![0.0; 3];
        block.apply(&[2.0, 4.0, 8.0], &mut z);
        assert_eq!(z, vec![1.0, 2.0, 2.0]);
    }
}
