//! Preconditioned conjugate gradient.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use tracing::{debug, info};

use super::sparse;
use crate::backend::params::PcgParams;
use crate::backend::traits::{BackendError, BackendResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcgOutcome {
    pub iterations: usize,
    pub relative_residual: f64,
    pub converged: bool,
}

/// Solves A x = b starting from the incoming `x`.
///
/// Without `two_norm` the stopping test uses the preconditioned norm:
/// <C r, r> <= tol^2 <C b, b>. With it, ||r|| <= tol ||b||.
pub fn solve(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    params: &PcgParams,
    mut precond: impl FnMut(&DVector<f64>) -> DVector<f64>,
) -> BackendResult<PcgOutcome> {
    let bi_prod = if params.two_norm {
        b.dot(b)
    } else {
        precond(b).dot(b)
    };
    if bi_prod < 0.0 {
        return Err(BackendError::invalid_argument(
            "preconditioner is not positive definite: <C b, b> < 0",
        ));
    }
    if bi_prod == 0.0 {
        // Zero right-hand side: the solution is zero.
        x.fill(0.0);
        return Ok(PcgOutcome {
            iterations: 0,
            relative_residual: 0.0,
            converged: true,
        });
    }
    let eps = params.tol * params.tol * bi_prod;

    let mut r = sparse::residual(a, b, x);
    let mut z = precond(&r);
    let mut p = z.clone();
    let mut gamma = r.dot(&z);
    let measure = |r: &DVector<f64>, gamma: f64| if params.two_norm { r.dot(r) } else { gamma };

    let mut iterations = 0;
    let mut current = measure(&r, gamma);
    let mut converged = current <= eps;
    while !converged && iterations < params.max_iter {
        let s = sparse::spmv(a, &p);
        let sdotp = s.dot(&p);
        if sdotp <= 0.0 {
            return Err(BackendError::from(format!(
                "PCG breakdown at iteration {iterations}: <A p, p> = {sdotp:e}"
            )));
        }
        let alpha = gamma / sdotp;
        x.axpy(alpha, &p, 1.0);
        r.axpy(-alpha, &s, 1.0);
        z = precond(&r);
        let gamma_new = r.dot(&z);
        if gamma_new < 0.0 {
            return Err(BackendError::invalid_argument(
                "preconditioner is not positive definite: <C r, r> < 0",
            ));
        }
        let beta = gamma_new / gamma;
        gamma = gamma_new;
        p = &z + beta * &p;
        iterations += 1;

        current = measure(&r, gamma);
        if params.print_level >= 2 {
            debug!(
                iteration = iterations,
                relative_residual = (current / bi_prod).sqrt(),
                "PCG"
            );
        }
        converged = current <= eps;
    }

    let outcome = PcgOutcome {
        iterations,
        relative_residual: (current / bi_prod).sqrt(),
        converged,
    };
    if params.print_level >= 1 {
        info!(
            iterations = outcome.iterations,
            relative_residual = outcome.relative_residual,
            converged,
            "PCG finished"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian(n: usize) -> CsrMatrix<f64> {
        sparse::from_triplets(
            n,
            n,
            (0..n).flat_map(|i| {
                let mut row = vec![(i, i, 2.0)];
                if i > 0 {
                    row.push((i, i - 1, -1.0));
                }
                if i + 1 < n {
                    row.push((i, i + 1, -1.0));
                }
                row
            }),
        )
    }

    #[test]
    fn unpreconditioned_cg_converges_in_n_steps() {
        let a = laplacian(20);
        let b = DVector::from_element(20, 1.0);
        let mut x = DVector::zeros(20);
        let params = PcgParams {
            tol: 1e-10,
            two_norm: true,
            print_level: 0,
            ..Default::default()
        };
        let outcome = solve(&a, &b, &mut x, &params, |r| r.clone()).expect("solve");
        assert!(outcome.converged);
        assert!(outcome.iterations <= 20);
        assert!(sparse::residual(&a, &b, &x).norm() <= 1e-8);
    }

    #[test]
    fn jacobi_preconditioned_uses_c_norm() {
        let a = laplacian(10);
        let b = DVector::from_element(10, 1.0);
        let mut x = DVector::zeros(10);
        let params = PcgParams {
            print_level: 0,
            ..Default::default()
        };
        let outcome = solve(&a, &b, &mut x, &params, |r| r * 0.5).expect("solve");
        assert!(outcome.converged);
        assert!(outcome.relative_residual <= 1e-6);
    }

    #[test]
    fn zero_rhs_yields_zero_solution() {
        let a = laplacian(4);
        let b = DVector::zeros(4);
        let mut x = DVector::from_element(4, 3.0);
        let outcome = solve(&a, &b, &mut x, &PcgParams::default(), |r| r.clone()).expect("solve");
        assert_eq!(outcome.iterations, 0);
        assert_eq!(x, DVector::zeros(4));
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let a = laplacian(50);
        let b = DVector::from_element(50, 1.0);
        let mut x = DVector::zeros(50);
        let params = PcgParams {
            max_iter: 2,
            tol: 1e-12,
            print_level: 0,
            ..Default::default()
        };
        let outcome = solve(&a, &b, &mut x, &params, |r| r.clone()).expect("solve");
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.converged);
    }
}
