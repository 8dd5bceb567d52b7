use super::{Preconditioner, SolveResult, Status};

/// Implementation of the preconditioned conjugate residual method.
///
/// Minimum-residual Krylov iteration for symmetric (possibly indefinite)
/// systems, which is what the blended velocity/pressure saddle-point system
/// is. The preconditioner must be symmetric positive definite.
/// https://en.wikipedia.org/wiki/Conjugate_residual_method
#[allow(non_snake_case)]
pub struct ConjugateResidual {
    max_iter: u32,
    tol: f64,
    p: na::DVector<f64>,
    Ap: na::DVector<f64>,
    z: na::DVector<f64>,
    Az: na::DVector<f64>,
    q: na::DVector<f64>,
}

impl ConjugateResidual {
    pub fn new(size: usize, max_iter: u32, tol: f64) -> Self {
        ConjugateResidual {
            max_iter: u32::MAX.min(max_iter),
            tol: f64::EPSILON.max(tol),
            p: na::DVector::zeros(size),
            Ap: na::DVector::zeros(size),
            z: na::DVector::zeros(size),
            Az: na::DVector::zeros(size),
            q: na::DVector::zeros(size),
        }
    }

    /// Solves `Ax = b` with `Ax` provided by `matvec` and the preconditioner
    /// applied through `precond`. `b` is consumed as residual storage; the
    /// tolerance is relative to `|b|`.
    #[allow(non_snake_case)]
    pub fn solve<F, M>(
        &mut self,
        mut matvec: F,
        precond: &M,
        x: &mut [f64],
        b: &mut [f64],
    ) -> SolveResult
    where
        F: FnMut(&[f64], &mut [f64]),
        M: Preconditioner + ?Sized,
    {
        let ConjugateResidual {
            max_iter,
            tol,
            ref mut p,
            ref mut Ap,
            ref mut z,
            ref mut Az,
            ref mut q,
            ..
        } = *self;

        debug_assert_eq!(b.len(), x.len());

        let mut x: na::DVectorViewMut<f64> = x.into();
        let mut r: na::DVectorViewMut<f64> = b.into();

        let b_norm = r.norm();

        // r0 = b - A x0
        matvec(x.as_slice(), Ap.as_mut_slice());
        r.axpy(-1.0, Ap, 1.0);

        if b_norm == 0.0 || r.norm() <= tol * b_norm {
            return SolveResult {
                iterations: 0,
                residual: r.norm(),
                error: if b_norm > 0.0 { r.norm() / b_norm } else { 0.0 },
                status: Status::Success,
            };
        }

        // z0 = M^{-1} r0, p0 = z0, and the running pair (A z, A p).
        precond.apply(r.as_slice(), z.as_mut_slice());
        p.copy_from(z);
        matvec(z.as_slice(), Az.as_mut_slice());
        Ap.copy_from(Az);

        let mut zAz = z.dot(Az);

        let mut iterations = 0;
        loop {
            // q = M^{-1} A p
            precond.apply(Ap.as_slice(), q.as_mut_slice());
            let Apq = Ap.dot(q);
            if !Apq.is_finite() || Apq == 0.0 || !zAz.is_finite() {
                return SolveResult {
                    iterations,
                    residual: r.norm(),
                    error: r.norm() / b_norm,
                    status: Status::NanDetected,
                };
            }
            let alpha = zAz / Apq;

            x.axpy(alpha, p, 1.0);
            r.axpy(-alpha, Ap, 1.0);
            z.axpy(-alpha, q, 1.0);
            iterations += 1;

            let r_norm = r.norm();
            if r_norm <= tol * b_norm {
                return SolveResult {
                    iterations,
                    residual: r_norm,
                    error: r_norm / b_norm,
                    status: Status::Success,
                };
            } else if iterations >= max_iter {
                return SolveResult {
                    iterations,
                    residual: r_norm,
                    error: r_norm / b_norm,
                    status: Status::MaximumIterationsExceeded,
                };
            }

            matvec(z.as_slice(), Az.as_mut_slice());
            let zAz_new = z.dot(Az);
            let beta = zAz_new / zAz;
            zAz = zAz_new;

            // p = z + beta p, A p = A z + beta A p
            p.axpy(1.0, z, beta);
            Ap.axpy(1.0, Az, beta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linsolve::{Identity, Jacobi};

    #[test]
    fn cr_simple() {
        // Symmetric 2x2 system.
        let mtx = [1.0, 2.0, 2.0, 3.0];
        let mut b = vec![5.0, 6.0];
        let mut x = vec![0.0, 0.0];

        let mut cr = ConjugateResidual::new(2, 1000, 1e-10);
        let result = cr.solve(
            |x, out| {
                out[0] = mtx[0] * x[0] + mtx[1] * x[1];
                out[1] = mtx[2] * x[0] + mtx[3] * x[1];
            },
            &Identity,
            x.as_mut_slice(),
            b.as_mut_slice(),
        );

        assert_eq!(result.status, Status::Success);
        assert!((x[0] + 3.0).abs() < 1e-6);
        assert!((x[1] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn cr_indefinite_saddle() {
        // A small symmetric indefinite saddle-point system
        // [ 2 0 1; 0 2 1; 1 1 0 ].
        let a = crate::linsolve::csr_from_triplets(
            3,
            3,
            &[
                (0, 0, 2.0),
                (1, 1, 2.0),
                (0, 2, 1.0),
                (1, 2, 1.0),
                (2, 0, 1.0),
                (2, 1, 1.0),
            ],
        );
        let mut b = vec![1.0, 0.0, 0.0];
        let mut x = vec![0.0; 3];
        let mut cr = ConjugateResidual::new(3, 100, 1e-12);
        let result = cr.solve(
            |v, out| crate::linsolve::spmv(&a, v, out),
            &Identity,
            x.as_mut_slice(),
            b.as_mut_slice(),
        );
        assert_eq!(result.status, Status::Success);
        // Exact solution: u = (1/4, -1/4), p = 1/2.
        assert!((x[0] - 0.25).abs() < 1e-8);
        assert!((x[1] + 0.25).abs() < 1e-8);
        assert!((x[2] - 0.5).abs() < 1e-8);
    }

    #[test]
    fn jacobi_preconditioning_matches_plain_solution() {
        let a = crate::linsolve::csr_from_triplets(
            3,
            3,
            &[
                (0, 0, 10.0),
                (1, 1, 2.0),
                (2, 2, 0.5),
                (0, 1, 1.0),
                (1, 0, 1.0),
            ],
        );
        let jacobi = Jacobi::from_matrix(&a);
        let mut b = vec![1.0, 2.0, 3.0];
        let mut x = vec![0.0; 3];
        let mut cr = ConjugateResidual::new(3, 100, 1e-12);
        let result = cr.solve(
            |v, out| crate::linsolve::spmv(&a, v, out),
            &jacobi,
            x.as_mut_slice(),
            b.as_mut_slice(),
        );
        assert_eq!(result.status, Status::Success);
        // Check A x = b directly.
        let mut ax = vec![0.0; 3];
        crate::linsolve::spmv(&a, &x, &mut ax);
        for (ai, bi) in ax.iter().zip([1.0, 2.0, 3.0]) {
            assert!((ai - bi).abs() < 1e-8);
        }
    }
}
