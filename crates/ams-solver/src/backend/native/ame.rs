//! Maxwell eigensolver: LOBPCG with AMS preconditioning.
//!
//! Iterates are kept M-orthogonal to the range of the discrete gradient, so
//! the infinite-dimensional null space of the curl-curl operator does not
//! pollute the computed eigenpairs.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen};
use nalgebra_sparse::CsrMatrix;
use tracing::{debug, info};

use super::sparse;
use crate::backend::params::AmeParams;
use crate::backend::traits::{BackendError, BackendResult, SharedMatrix};

/// Removes M-orthogonal components along range(G):
/// v <- v - G (G^T M G)^{-1} G^T M v.
pub struct GradientProjector {
    g: SharedMatrix,
    gt_m: CsrMatrix<f64>,
    factor: Cholesky<f64, Dyn>,
}

impl GradientProjector {
    pub fn new(g: SharedMatrix, m: &CsrMatrix<f64>) -> BackendResult<Self> {
        if g.nrows() != m.nrows() {
            return Err(BackendError::invalid_argument(format!(
                "mass matrix has {} rows, discrete gradient has {}",
                m.nrows(),
                g.nrows()
            )));
        }
        let gt_m = &g.transpose() * m;
        let gtmg = &gt_m * &*g;
        let factor = Cholesky::new(DMatrix::from(&gtmg)).ok_or_else(|| {
            BackendError::invalid_argument("G^T M G is not positive definite")
        })?;
        Ok(Self { g, gt_m, factor })
    }

    pub fn project(&self, v: &DVector<f64>) -> DVector<f64> {
        let rhs = sparse::spmv(&self.gt_m, v);
        let coeffs = self.factor.solve(&rhs);
        v - sparse::spmv(&self.g, &coeffs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmeOutcome {
    pub eigenvalues: Vec<f64>,
    pub residual_norms: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// M-orthonormalizes `vectors` against each other with two passes of
/// modified Gram-Schmidt, dropping (nearly) dependent ones.
fn m_orthonormalize(vectors: Vec<DVector<f64>>, m: &CsrMatrix<f64>) -> Vec<DVector<f64>> {
    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(vectors.len());
    let mut m_basis: Vec<DVector<f64>> = Vec::with_capacity(vectors.len());
    for mut w in vectors {
        let initial = sparse::spmv(m, &w).dot(&w).max(0.0).sqrt();
        if initial == 0.0 {
            continue;
        }
        for _ in 0..2 {
            for (q, mq) in basis.iter().zip(&m_basis) {
                let c = mq.dot(&w);
                w.axpy(-c, q, 1.0);
            }
        }
        let mw = sparse::spmv(m, &w);
        let norm = mw.dot(&w).max(0.0).sqrt();
        if norm <= 1e-10 * initial {
            continue;
        }
        basis.push(w / norm);
        m_basis.push(mw / norm);
    }
    basis
}

/// Deterministic, non-smooth starting block.
fn initial_block(n: usize, k: usize) -> Vec<DVector<f64>> {
    (0..k)
        .map(|j| {
            DVector::from_fn(n, |i, _| {
                let t = (i * (j + 1) + 7 * j + 1) as f64;
                (0.7 * t).sin() + 0.3 * (1.3 * t + j as f64).cos()
            })
        })
        .collect()
}

struct Ritz {
    values: Vec<f64>,
    vectors: Vec<DVector<f64>>,
    /// Ritz vector components outside the previous block (new search directions).
    directions: Vec<DVector<f64>>,
}

/// Rayleigh-Ritz over an M-orthonormal basis whose first `k` vectors are
/// the current block.
fn rayleigh_ritz(a: &CsrMatrix<f64>, basis: &[DVector<f64>], k: usize) -> Ritz {
    let q = basis.len();
    let a_basis: Vec<DVector<f64>> = basis.iter().map(|s| sparse::spmv(a, s)).collect();
    let h = DMatrix::from_fn(q, q, |i, j| {
        0.5 * (basis[i].dot(&a_basis[j]) + basis[j].dot(&a_basis[i]))
    });
    let eig = SymmetricEigen::new(h);
    let mut order: Vec<usize> = (0..q).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));

    let mut values = Vec::with_capacity(k);
    let mut vectors = Vec::with_capacity(k);
    let mut directions = Vec::with_capacity(k);
    for &col in order.iter().take(k) {
        values.push(eig.eigenvalues[col]);
        let mut v = DVector::zeros(basis[0].len());
        let mut d = DVector::zeros(basis[0].len());
        for (i, s) in basis.iter().enumerate() {
            let c = eig.eigenvectors[(i, col)];
            v.axpy(c, s, 1.0);
            if i >= k {
                d.axpy(c, s, 1.0);
            }
        }
        vectors.push(v);
        directions.push(d);
    }
    Ritz {
        values,
        vectors,
        directions,
    }
}

/// Computes the `block_size` smallest nonzero eigenpairs of A x = lambda M x.
pub fn lobpcg(
    a: &CsrMatrix<f64>,
    m: &CsrMatrix<f64>,
    projector: &GradientProjector,
    params: &AmeParams,
    precond: impl Fn(&DVector<f64>) -> DVector<f64>,
) -> BackendResult<AmeOutcome> {
    let n = a.nrows();
    let k = params.block_size;
    if k == 0 || 3 * k > n {
        return Err(BackendError::invalid_argument(format!(
            "block size {k} is not valid for a system of {n} unknowns"
        )));
    }

    let start: Vec<DVector<f64>> = initial_block(n, k)
        .iter()
        .map(|v| projector.project(v))
        .collect();
    let block = m_orthonormalize(start, m);
    if block.len() < k {
        return Err(BackendError::from(
            "could not build an initial block outside the gradient null space",
        ));
    }
    let mut ritz = rayleigh_ritz(a, &block, k);
    let mut directions: Vec<DVector<f64>> = Vec::new();
    let mut iterations = 0;
    let mut residual_norms;

    loop {
        let residuals: Vec<DVector<f64>> = ritz
            .vectors
            .iter()
            .zip(&ritz.values)
            .map(|(x, &lambda)| sparse::spmv(a, x) - lambda * sparse::spmv(m, x))
            .collect();
        residual_norms = residuals
            .iter()
            .zip(&ritz.values)
            .map(|(r, &lambda)| {
                let scale = if lambda.abs() > 1e-300 { lambda.abs() } else { 1.0 };
                r.norm() / scale
            })
            .collect::<Vec<f64>>();
        let active: Vec<usize> = (0..k).filter(|&j| residual_norms[j] > params.tol).collect();
        if params.print_level >= 2 {
            debug!(iteration = iterations, eigenvalues = ?ritz.values, residuals = ?residual_norms, "AME");
        }
        if active.is_empty() || iterations >= params.max_iter {
            break;
        }

        let mut search: Vec<DVector<f64>> = ritz.vectors.clone();
        search.extend(active.iter().map(|&j| projector.project(&precond(&residuals[j]))));
        search.extend(directions.iter().cloned());
        let basis = m_orthonormalize(search, m);
        if basis.len() < k {
            return Err(BackendError::from("LOBPCG basis collapsed"));
        }
        ritz = rayleigh_ritz(a, &basis, k);
        directions = ritz
            .directions
            .iter()
            .filter(|d| d.norm() > 0.0)
            .cloned()
            .collect();
        iterations += 1;
    }

    let converged = residual_norms.iter().all(|&r| r <= params.tol);
    if params.print_level >= 1 {
        info!(iterations, converged, eigenvalues = ?ritz.values, "AME finished");
    }
    Ok(AmeOutcome {
        eigenvalues: ritz.values,
        residual_norms,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn m_orthonormalize_drops_dependent_vectors() {
        let m = sparse::from_triplets(3, 3, (0..3).map(|i| (i, i, 2.0)));
        let v = vec![
            DVector::from_vec(vec![1.0, 0.0, 0.0]),
            DVector::from_vec(vec![2.0, 0.0, 0.0]),
            DVector::from_vec(vec![1.0, 1.0, 0.0]),
        ];
        let basis = m_orthonormalize(v, &m);
        assert_eq!(basis.len(), 2);
        let mb = sparse::spmv(&m, &basis[1]);
        assert!(basis[0].dot(&mb).abs() < 1e-12);
        assert!((basis[1].dot(&mb) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn finds_smallest_eigenvalues_of_diagonal_pencil() {
        // range(G) is the last coordinate, which gets projected out.
        let n = 12;
        let a = sparse::from_triplets(n, n, (0..n).map(|i| (i, i, (i + 1) as f64)));
        let m = sparse::from_triplets(n, n, (0..n).map(|i| (i, i, 1.0)));
        let g = std::sync::Arc::new(sparse::from_triplets(n, 1, vec![(n - 1, 0, 1.0)]));
        let projector = GradientProjector::new(g, &m).expect("projector");
        let params = AmeParams {
            block_size: 2,
            max_iter: 200,
            tol: 1e-8,
            print_level: 0,
        };
        let outcome = lobpcg(&a, &m, &projector, &params, |r| r.clone()).expect("lobpcg");
        assert!(outcome.converged, "{outcome:?}");
        assert!((outcome.eigenvalues[0] - 1.0).abs() < 1e-6);
        assert!((outcome.eigenvalues[1] - 2.0).abs() < 1e-6);
    }
}
