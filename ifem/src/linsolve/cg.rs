use super::{Preconditioner, SolveResult, Status};

/// Implementation of the preconditioned conjugate gradient method.
///
/// Solves `Ax = b` for symmetric positive definite `A` supplied as a matvec
/// closure. The solid integrator runs it unpreconditioned, the way its mass
/// system has always been solved; the pressure-block inverse of the fluid
/// preconditioner runs it with a Jacobi preconditioner.
#[allow(non_snake_case)]
pub struct ConjugateGradient {
    max_iter: u32,
    tol: f64,
    p: na::DVector<f64>,
    Ap: na::DVector<f64>,
    z: na::DVector<f64>,
}

impl ConjugateGradient {
    pub fn new(size: usize, max_iter: u32, tol: f64) -> Self {
        ConjugateGradient {
            max_iter: u32::MAX.min(max_iter),
            tol: f64::EPSILON.max(tol),
            p: na::DVector::zeros(size),
            Ap: na::DVector::zeros(size),
            z: na::DVector::zeros(size),
        }
    }

    /// Solves `Ax = b` where the product `Ax` is provided by `matvec`.
    ///
    /// `b` is consumed as residual storage. The tolerance is relative to
    /// `|b|`.
    pub fn solve<F>(&mut self, matvec: F, x: &mut [f64], b: &mut [f64]) -> SolveResult
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        self.solve_preconditioned(matvec, &super::Identity, x, b)
    }

    #[allow(non_snake_case)]
    pub fn solve_preconditioned<F, M>(
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
        let ConjugateGradient {
            max_iter,
            tol,
            ref mut p,
            ref mut Ap,
            ref mut z,
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

        precond.apply(r.as_slice(), z.as_mut_slice());
        p.copy_from(z);
        let mut rz = r.dot(z);

        let mut iterations = 0;
        loop {
            matvec(p.as_slice(), Ap.as_mut_slice());
            let pAp = p.dot(Ap);
            if !pAp.is_finite() || pAp == 0.0 {
                return SolveResult {
                    iterations,
                    residual: r.norm(),
                    error: r.norm() / b_norm,
                    status: Status::NanDetected,
                };
            }
            let alpha = rz / pAp;

            x.axpy(alpha, p, 1.0);
            r.axpy(-alpha, Ap, 1.0);
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

            precond.apply(r.as_slice(), z.as_mut_slice());
            let rz_new = r.dot(z);
            let beta = rz_new / rz;
            rz = rz_new;

            // p = z + beta p
            p.axpy(1.0, z, beta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cg_simple() {
        // Simple symmetric positive definite 2x2 system.
        let mtx = [4.0, 1.0, 1.0, 3.0];
        let mut b = vec![1.0, 2.0];
        let mut x = vec![0.0, 0.0];

        let mut cg = ConjugateGradient::new(2, 100, 1e-12);
        let result = cg.solve(
            |x, out| {
                out[0] = mtx[0] * x[0] + mtx[1] * x[1];
                out[1] = mtx[2] * x[0] + mtx[3] * x[1];
            },
            x.as_mut_slice(),
            b.as_mut_slice(),
        );

        assert_eq!(result.status, Status::Success);
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-9);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn cg_reports_iteration_budget_exhaustion() {
        let mut b = vec![1.0, 2.0, 3.0];
        let mut x = vec![0.0; 3];
        let mut cg = ConjugateGradient::new(3, 1, 1e-15);
        let result = cg.solve(
            |x, out| {
                // An ill-conditioned diagonal cannot converge in one step.
                out[0] = 1e6 * x[0];
                out[1] = x[1];
                out[2] = 1e-6 * x[2];
            },
            x.as_mut_slice(),
            b.as_mut_slice(),
        );
        assert_eq!(result.status, Status::MaximumIterationsExceeded);
    }
}
