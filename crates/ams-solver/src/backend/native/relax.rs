//! Point relaxation methods.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use super::sparse;
use crate::backend::traits::{BackendError, BackendResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    /// Weighted Jacobi
    Jacobi,
    /// Jacobi scaled by l1 row norms
    L1Jacobi,
    /// Gauss-Seidel/SOR in the requested direction
    HybridGaussSeidel,
    /// Forward then backward Gauss-Seidel/SOR
    SymmetricGaussSeidel,
    /// Forward then backward Gauss-Seidel scaled by l1 row norms
    L1GaussSeidel,
}

impl Relaxation {
    pub fn from_code(code: i32) -> BackendResult<Self> {
        match code {
            0 | 7 => Ok(Relaxation::Jacobi),
            1 | 18 => Ok(Relaxation::L1Jacobi),
            3 | 4 => Ok(Relaxation::HybridGaussSeidel),
            6 => Ok(Relaxation::SymmetricGaussSeidel),
            2 | 8 | 13 | 14 => Ok(Relaxation::L1GaussSeidel),
            other => Err(BackendError::unsupported(format!(
                "relaxation type {other} is not available in the native backend"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    Forward,
    Backward,
}

/// Relaxation bound to one matrix, with its diagonal data precomputed.
#[derive(Debug, Clone)]
pub struct Smoother {
    kind: Relaxation,
    sweeps: usize,
    weight: f64,
    omega: f64,
    /// Inverse of the scaling used by the chosen method (0 for empty rows).
    inv_scale: Vec<f64>,
}

impl Smoother {
    pub fn new(
        a: &CsrMatrix<f64>,
        kind: Relaxation,
        sweeps: usize,
        weight: f64,
        omega: f64,
    ) -> Self {
        let scale = match kind {
            Relaxation::L1Jacobi | Relaxation::L1GaussSeidel => sparse::l1_row_norms(a),
            _ => sparse::diagonal(a),
        };
        let inv_scale = scale
            .into_iter()
            .map(|d| if d.abs() > 1e-300 { 1.0 / d } else { 0.0 })
            .collect();
        Self {
            kind,
            sweeps,
            weight,
            omega,
            inv_scale,
        }
    }

    pub fn kind(&self) -> Relaxation {
        self.kind
    }

    pub fn smooth(&self, a: &CsrMatrix<f64>, b: &DVector<f64>, x: &mut DVector<f64>, sweep: Sweep) {
        for _ in 0..self.sweeps {
            match self.kind {
                Relaxation::Jacobi | Relaxation::L1Jacobi => self.jacobi(a, b, x),
                Relaxation::HybridGaussSeidel => self.gauss_seidel(a, b, x, sweep),
                Relaxation::SymmetricGaussSeidel | Relaxation::L1GaussSeidel => {
                    self.gauss_seidel(a, b, x, Sweep::Forward);
                    self.gauss_seidel(a, b, x, Sweep::Backward);
                }
            }
        }
    }

    fn jacobi(&self, a: &CsrMatrix<f64>, b: &DVector<f64>, x: &mut DVector<f64>) {
        let r = sparse::residual(a, b, x);
        for (i, ri) in r.iter().enumerate() {
            x[i] += self.weight * ri * self.inv_scale[i];
        }
    }

    fn gauss_seidel(&self, a: &CsrMatrix<f64>, b: &DVector<f64>, x: &mut DVector<f64>, sweep: Sweep) {
        let n = x.len();
        let mut update = |i: usize| {
            if self.inv_scale[i] == 0.0 {
                return;
            }
            let mut ri = b[i];
            for (j, v) in sparse::row_entries(a, i) {
                ri -= v * x[j];
            }
            x[i] += self.omega * ri * self.inv_scale[i];
        };
        match sweep {
            Sweep::Forward => (0..n).for_each(&mut update),
            Sweep::Backward => (0..n).rev().for_each(&mut update),
        }
    }
}
