//! Generated test problems.
//!
//! [`edge_problem_2d`] builds a lowest-order edge-element discretization of
//! `curl curl u + sigma u = f` on the unit square with tangential Dirichlet
//! conditions, together with every auxiliary operator the curl-aware
//! families accept. The Laplacians are small scalar systems for the
//! multigrid and Krylov families.

use ams_io::{Artifact, ArtifactStore};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::backend::native::sparse::from_triplets;
use crate::bundle::{GeometricData, PoissonMatrices, ProblemBundle, VectorTriple};

/// Tridiagonal `[-1 2 -1]` matrix of size `n`.
pub fn laplacian_1d(n: usize) -> CsrMatrix<f64> {
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

/// Five-point Laplacian on an `n x n` grid of unknowns.
pub fn laplacian_2d(n: usize) -> CsrMatrix<f64> {
    let idx = |i: usize, j: usize| j * n + i;
    let mut triplets = Vec::with_capacity(5 * n * n);
    for j in 0..n {
        for i in 0..n {
            let row = idx(i, j);
            triplets.push((row, row, 4.0));
            if i > 0 {
                triplets.push((row, idx(i - 1, j), -1.0));
            }
            if i + 1 < n {
                triplets.push((row, idx(i + 1, j), -1.0));
            }
            if j > 0 {
                triplets.push((row, idx(i, j - 1), -1.0));
            }
            if j + 1 < n {
                triplets.push((row, idx(i, j + 1), -1.0));
            }
        }
    }
    from_triplets(n * n, n * n, triplets)
}

/// Scalar system with a unit right-hand side and a zero initial guess.
pub fn laplacian_bundle(a: CsrMatrix<f64>) -> ProblemBundle {
    let n = a.nrows();
    ProblemBundle::new(a, DVector::from_element(n, 1.0), DVector::zeros(n))
}

/// A 2-D curl-curl problem and its auxiliary operators.
#[derive(Debug, Clone)]
pub struct EdgeProblem {
    pub cells: usize,
    pub sigma: f64,
    pub matrix: CsrMatrix<f64>,
    pub rhs: DVector<f64>,
    pub initial_guess: DVector<f64>,
    pub gradient: CsrMatrix<f64>,
    pub edge_x: DVector<f64>,
    pub edge_y: DVector<f64>,
    pub coord_x: DVector<f64>,
    pub coord_y: DVector<f64>,
    pub alpha_poisson: CsrMatrix<f64>,
    pub beta_poisson: CsrMatrix<f64>,
    pub mass: CsrMatrix<f64>,
}

/// Mesh numbering for an `n x n` cell grid with boundary entities removed.
struct EdgeMesh {
    n: usize,
}

impl EdgeMesh {
    fn num_edges(&self) -> usize {
        2 * self.n * (self.n - 1)
    }

    fn num_nodes(&self) -> usize {
        (self.n - 1) * (self.n - 1)
    }

    /// Interior node (i, j), 1 <= i, j < n.
    fn node(&self, i: usize, j: usize) -> Option<usize> {
        let interior = 1..self.n;
        (interior.contains(&i) && interior.contains(&j)).then(|| (j - 1) * (self.n - 1) + (i - 1))
    }

    /// Horizontal edge from (i, j) to (i + 1, j); interior when 0 < j < n.
    fn horizontal(&self, i: usize, j: usize) -> Option<usize> {
        (i < self.n && (1..self.n).contains(&j)).then(|| (j - 1) * self.n + i)
    }

    /// Vertical edge from (i, j) to (i, j + 1); interior when 0 < i < n.
    fn vertical(&self, i: usize, j: usize) -> Option<usize> {
        ((1..self.n).contains(&i) && j < self.n)
            .then(|| self.n * (self.n - 1) + (i - 1) * self.n + j)
    }
}

/// Curl-curl problem on `cells x cells` squares with reaction coefficient `sigma`.
///
/// `cells` must be at least 2.
pub fn edge_problem_2d(cells: usize, sigma: f64) -> EdgeProblem {
    let n = cells.max(2);
    let mesh = EdgeMesh { n };
    let (ne, nn) = (mesh.num_edges(), mesh.num_nodes());
    let h = 1.0 / n as f64;

    let mut g = Vec::new();
    let mut edge_x = DVector::zeros(ne);
    let mut edge_y = DVector::zeros(ne);
    for j in 0..=n {
        for i in 0..=n {
            if let Some(e) = mesh.horizontal(i, j) {
                edge_x[e] = h;
                g.extend(mesh.node(i, j).map(|a| (e, a, -1.0)));
                g.extend(mesh.node(i + 1, j).map(|b| (e, b, 1.0)));
            }
            if let Some(e) = mesh.vertical(i, j) {
                edge_y[e] = h;
                g.extend(mesh.node(i, j).map(|a| (e, a, -1.0)));
                g.extend(mesh.node(i, j + 1).map(|b| (e, b, 1.0)));
            }
        }
    }
    let gradient = from_triplets(ne, nn, g);

    // Counter-clockwise circulation around each cell.
    let mut c = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let cell = j * n + i;
            let sides = [
                (mesh.horizontal(i, j), 1.0),
                (mesh.vertical(i + 1, j), 1.0),
                (mesh.horizontal(i, j + 1), -1.0),
                (mesh.vertical(i, j), -1.0),
            ];
            c.extend(sides.into_iter().filter_map(|(e, s)| e.map(|e| (cell, e, s))));
        }
    }
    let curl = from_triplets(n * n, ne, c);
    let curl_curl = &curl.transpose() * &curl;
    let matrix = from_triplets(
        ne,
        ne,
        curl_curl
            .triplet_iter()
            .map(|(i, j, &v)| (i, j, v))
            .chain((0..ne).map(|i| (i, i, sigma))),
    );

    let mut coord_x = DVector::zeros(nn);
    let mut coord_y = DVector::zeros(nn);
    for j in 1..n {
        for i in 1..n {
            if let Some(v) = mesh.node(i, j) {
                coord_x[v] = i as f64 * h;
                coord_y[v] = j as f64 * h;
            }
        }
    }

    let alpha_poisson = &gradient.transpose() * &gradient;
    let beta_poisson = from_triplets(
        nn,
        nn,
        alpha_poisson.triplet_iter().map(|(i, j, &v)| (i, j, sigma * v)),
    );
    let mass = from_triplets(ne, ne, (0..ne).map(|i| (i, i, 1.0)));

    EdgeProblem {
        cells: n,
        sigma,
        matrix,
        rhs: DVector::from_element(ne, 1.0),
        initial_guess: DVector::zeros(ne),
        gradient,
        edge_x,
        edge_y,
        coord_x,
        coord_y,
        alpha_poisson,
        beta_poisson,
        mass,
    }
}

impl EdgeProblem {
    pub fn num_edges(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn num_nodes(&self) -> usize {
        self.gradient.ncols()
    }

    /// Bundle carrying every operator, with edge-constant vectors or vertex
    /// coordinates as the geometric data.
    pub fn bundle(&self, use_coordinates: bool) -> ProblemBundle {
        let geometry = if use_coordinates {
            GeometricData::Coordinates(VectorTriple::new(self.coord_x.clone(), self.coord_y.clone(), None))
        } else {
            GeometricData::EdgeConstant(VectorTriple::new(self.edge_x.clone(), self.edge_y.clone(), None))
        };
        ProblemBundle::new(self.matrix.clone(), self.rhs.clone(), self.initial_guess.clone())
            .with_discrete_gradient(self.gradient.clone())
            .with_geometry(geometry)
            .with_poisson(PoissonMatrices::AlphaAndBeta(
                self.alpha_poisson.clone().into(),
                self.beta_poisson.clone().into(),
            ))
            .with_mass_matrix(self.mass.clone())
    }

    /// Writes every artifact of the problem under `store`.
    pub fn write_to(&self, store: &ArtifactStore) -> ams_io::Result<()> {
        store.write_matrix(Artifact::SystemMatrix, &self.matrix)?;
        store.write_vector(Artifact::RightHandSide, &self.rhs)?;
        store.write_vector(Artifact::InitialGuess, &self.initial_guess)?;
        store.write_matrix(Artifact::DiscreteGradient, &self.gradient)?;
        store.write_vector(Artifact::EdgeConstantX, &self.edge_x)?;
        store.write_vector(Artifact::EdgeConstantY, &self.edge_y)?;
        store.write_vector(Artifact::CoordinateX, &self.coord_x)?;
        store.write_vector(Artifact::CoordinateY, &self.coord_y)?;
        store.write_matrix(Artifact::AlphaPoisson, &self.alpha_poisson)?;
        store.write_matrix(Artifact::BetaPoisson, &self.beta_poisson)?;
        store.write_matrix(Artifact::MassMatrix, &self.mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::native::sparse::spmv;

    #[test]
    fn curl_of_gradient_vanishes() {
        let p = edge_problem_2d(4, 0.0);
        assert_eq!(p.num_edges(), 24);
        assert_eq!(p.num_nodes(), 9);
        // With sigma = 0 the system is curl-curl only, so A G = 0.
        for k in 0..p.num_nodes() {
            let mut phi = DVector::zeros(p.num_nodes());
            phi[k] = 1.0;
            let grad = spmv(&p.gradient, &phi);
            assert!(spmv(&p.matrix, &grad).amax() < 1e-12);
        }
    }

    #[test]
    fn edge_vectors_have_mesh_length() {
        let p = edge_problem_2d(3, 1.0);
        for e in 0..p.num_edges() {
            let len = p.edge_x[e].hypot(p.edge_y[e]);
            assert!((len - 1.0 / 3.0).abs() < 1e-14);
        }
        assert!(p.bundle(true).check_shapes().is_ok());
        assert!(p.bundle(false).check_shapes().is_ok());
    }

    #[test]
    fn laplacian_2d_rows_sum_to_boundary_weight() {
        let a = laplacian_2d(3);
        let ones = DVector::from_element(9, 1.0);
        let row_sums = spmv(&a, &ones);
        // The center unknown has no boundary neighbour.
        assert_eq!(row_sums[4], 0.0);
        assert_eq!(row_sums[0], 2.0);
    }
}
