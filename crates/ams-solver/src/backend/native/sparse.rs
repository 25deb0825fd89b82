//! CSR kernels shared by the native solvers.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::backend::traits::{BackendError, BackendResult};

/// y = A * x, rows in parallel.
pub fn spmv(a: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    let offsets = a.row_offsets();
    let cols = a.col_indices();
    let vals = a.values();
    let mut y = DVector::zeros(a.nrows());
    y.as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, yi)| {
            let mut sum = 0.0;
            for k in offsets[i]..offsets[i + 1] {
                sum += vals[k] * x[cols[k]];
            }
            *yi = sum;
        });
    y
}

/// r = b - A * x
pub fn residual(a: &CsrMatrix<f64>, b: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
    b - spmv(a, x)
}

/// Iterates `(col, value)` over row `i`.
pub fn row_entries(a: &CsrMatrix<f64>, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
    let range = a.row_offsets()[i]..a.row_offsets()[i + 1];
    a.col_indices()[range.clone()]
        .iter()
        .copied()
        .zip(a.values()[range].iter().copied())
}

/// Entry (i, j), zero when structurally absent. Column indices are sorted in CSR.
pub fn entry(a: &CsrMatrix<f64>, i: usize, j: usize) -> f64 {
    let range = a.row_offsets()[i]..a.row_offsets()[i + 1];
    let cols = &a.col_indices()[range.clone()];
    match cols.binary_search(&j) {
        Ok(pos) => a.values()[range.start + pos],
        Err(_) => 0.0,
    }
}

pub fn diagonal(a: &CsrMatrix<f64>) -> Vec<f64> {
    (0..a.nrows()).map(|i| entry(a, i, i)).collect()
}

/// Row-wise l1 norms |a_ii| + sum_{j != i} |a_ij|.
pub fn l1_row_norms(a: &CsrMatrix<f64>) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| row_entries(a, i).map(|(_, v)| v.abs()).sum())
        .collect()
}

pub fn from_triplets(
    nrows: usize,
    ncols: usize,
    triplets: impl IntoIterator<Item = (usize, usize, f64)>,
) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for (i, j, v) in triplets {
        coo.push(i, j, v);
    }
    CsrMatrix::from(&coo)
}

/// Galerkin coarse operator P^T A P.
pub fn galerkin(a: &CsrMatrix<f64>, p: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let pt = p.transpose();
    let ap = a * p;
    &pt * &ap
}

/// A ⊗ I_dim with interleaved ordering: unknown `n * dim + d`.
pub fn kron_identity(a: &CsrMatrix<f64>, dim: usize) -> CsrMatrix<f64> {
    from_triplets(
        a.nrows() * dim,
        a.ncols() * dim,
        a.triplet_iter()
            .flat_map(|(i, j, &v)| (0..dim).map(move |d| (i * dim + d, j * dim + d, v))),
    )
}

/// Dense pseudo-inverse, used for the coarsest multigrid level.
///
/// Coarse operators of curl-curl subspaces can be singular, so a plain LU
/// factorization is not enough.
pub fn pseudo_inverse(a: &CsrMatrix<f64>) -> BackendResult<DMatrix<f64>> {
    let dense = DMatrix::from(a);
    let scale = dense.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return Ok(DMatrix::zeros(a.ncols(), a.nrows()));
    }
    dense
        .pseudo_inverse(scale * 1e-12)
        .map_err(|msg| BackendError::from(format!("coarse grid pseudo-inverse failed: {msg}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiag(n: usize) -> CsrMatrix<f64> {
        from_triplets(
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
    fn spmv_matches_dense_product() {
        let a = tridiag(5);
        let x = DVector::from_fn(5, |i, _| i as f64 + 1.0);
        let dense = DMatrix::from(&a);
        assert_eq!(spmv(&a, &x), &dense * &x);
    }

    #[test]
    fn entry_lookup_and_diagonals() {
        let a = tridiag(4);
        assert_eq!(entry(&a, 1, 0), -1.0);
        assert_eq!(entry(&a, 0, 3), 0.0);
        assert_eq!(diagonal(&a), vec![2.0; 4]);
        assert_eq!(l1_row_norms(&a), vec![3.0, 4.0, 4.0, 3.0]);
    }

    #[test]
    fn kron_identity_interleaves_components() {
        let a = tridiag(2);
        let k = kron_identity(&a, 3);
        assert_eq!((k.nrows(), k.ncols()), (6, 6));
        assert_eq!(entry(&k, 0, 3), -1.0);
        assert_eq!(entry(&k, 4, 1), -1.0);
        assert_eq!(entry(&k, 0, 1), 0.0);
    }

    #[test]
    fn pseudo_inverse_handles_singular_laplacian() {
        // Neumann 1D Laplacian: constants in the null space.
        let a = from_triplets(
            3,
            3,
            vec![
                (0, 0, 1.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 2.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 1.0),
            ],
        );
        let pinv = pseudo_inverse(&a).expect("pinv");
        let b = DVector::from_vec(vec![1.0, 0.0, -1.0]);
        let x = &pinv * &b;
        let r = residual(&a, &b, &x);
        assert!(r.norm() < 1e-10);
    }
}
