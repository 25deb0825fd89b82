//! Problem bundles: the operators and vectors of one curl-curl system.

use std::sync::Arc;

use ams_io::{Artifact, ArtifactStore};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use tracing::debug;

use crate::backend::{SharedMatrix, SharedVector};
use crate::descriptor::StrategyDescriptor;
use crate::error::{ConfigError, HarnessError};

/// Three per-node or per-edge component vectors. `z` is absent for 2-D problems.
#[derive(Debug, Clone)]
pub struct VectorTriple {
    pub x: SharedVector,
    pub y: SharedVector,
    pub z: Option<SharedVector>,
}

impl VectorTriple {
    pub fn new(x: DVector<f64>, y: DVector<f64>, z: Option<DVector<f64>>) -> Self {
        Self {
            x: Arc::new(x),
            y: Arc::new(y),
            z: z.map(Arc::new),
        }
    }

    fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        [Some(&self.x), Some(&self.y), self.z.as_ref()]
            .into_iter()
            .flatten()
            .map(|v| v.len())
    }
}

/// Geometric description of the mesh handed to the curl solver.
#[derive(Debug, Clone, Default)]
pub enum GeometricData {
    #[default]
    None,
    /// Edge tangent components, one entry per edge
    EdgeConstant(VectorTriple),
    /// Vertex coordinates, one entry per node
    Coordinates(VectorTriple),
}

/// Auxiliary Poisson matrices for the H1 decomposition.
#[derive(Debug, Clone, Default)]
pub enum PoissonMatrices {
    #[default]
    None,
    AlphaOnly(SharedMatrix),
    AlphaAndBeta(SharedMatrix, SharedMatrix),
}

/// Read-only container for one linear system instance.
#[derive(Debug, Clone)]
pub struct ProblemBundle {
    matrix: SharedMatrix,
    rhs: SharedVector,
    initial_guess: SharedVector,
    discrete_gradient: Option<SharedMatrix>,
    geometry: GeometricData,
    poisson: PoissonMatrices,
    mass_matrix: Option<SharedMatrix>,
}

impl ProblemBundle {
    pub fn new(matrix: CsrMatrix<f64>, rhs: DVector<f64>, initial_guess: DVector<f64>) -> Self {
        Self {
            matrix: Arc::new(matrix),
            rhs: Arc::new(rhs),
            initial_guess: Arc::new(initial_guess),
            discrete_gradient: None,
            geometry: GeometricData::None,
            poisson: PoissonMatrices::None,
            mass_matrix: None,
        }
    }

    pub fn with_discrete_gradient(mut self, g: CsrMatrix<f64>) -> Self {
        self.discrete_gradient = Some(Arc::new(g));
        self
    }

    pub fn with_geometry(mut self, geometry: GeometricData) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_poisson(mut self, poisson: PoissonMatrices) -> Self {
        self.poisson = poisson;
        self
    }

    pub fn with_mass_matrix(mut self, m: CsrMatrix<f64>) -> Self {
        self.mass_matrix = Some(Arc::new(m));
        self
    }

    pub fn matrix(&self) -> &SharedMatrix {
        &self.matrix
    }

    pub fn rhs(&self) -> &SharedVector {
        &self.rhs
    }

    pub fn initial_guess(&self) -> &SharedVector {
        &self.initial_guess
    }

    pub fn discrete_gradient(&self) -> Option<&SharedMatrix> {
        self.discrete_gradient.as_ref()
    }

    pub fn geometry(&self) -> &GeometricData {
        &self.geometry
    }

    pub fn poisson(&self) -> &PoissonMatrices {
        &self.poisson
    }

    pub fn mass_matrix(&self) -> Option<&SharedMatrix> {
        self.mass_matrix.as_ref()
    }

    /// Global number of rows of the system.
    pub fn size(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn has_discrete_gradient(&self) -> bool {
        self.discrete_gradient.is_some()
    }

    pub fn has_mass_matrix(&self) -> bool {
        self.mass_matrix.is_some()
    }

    /// Checks that every supplied operator conforms to the system and that
    /// node-indexed data agrees with the columns of the discrete gradient.
    pub fn check_shapes(&self) -> Result<(), ConfigError> {
        let n = self.matrix.nrows();
        let inconsistent = |msg: String| Err(ConfigError::Inconsistent(msg));
        if self.matrix.ncols() != n {
            return inconsistent(format!("non-square system matrix {}x{}", n, self.matrix.ncols()));
        }
        if self.rhs.len() != n || self.initial_guess.len() != n {
            return inconsistent(format!(
                "rhs ({}) and initial guess ({}) against a system of {n} rows",
                self.rhs.len(),
                self.initial_guess.len()
            ));
        }
        if let Some(m) = &self.mass_matrix {
            if m.nrows() != n || m.ncols() != n {
                return inconsistent(format!("mass matrix {}x{} for a system of {n} rows", m.nrows(), m.ncols()));
            }
        }

        let Some(g) = &self.discrete_gradient else {
            return Ok(());
        };
        if g.nrows() != n {
            return inconsistent(format!("discrete gradient with {} rows for {n} edges", g.nrows()));
        }
        let nodes = g.ncols();
        match &self.geometry {
            GeometricData::EdgeConstant(t) if t.lengths().any(|len| len != n) => {
                return inconsistent(format!("edge-constant vectors not of length {n}"));
            }
            GeometricData::Coordinates(t) if t.lengths().any(|len| len != nodes) => {
                return inconsistent(format!("coordinate vectors not of length {nodes}"));
            }
            _ => {}
        }
        let poisson: Vec<&SharedMatrix> = match &self.poisson {
            PoissonMatrices::None => Vec::new(),
            PoissonMatrices::AlphaOnly(a) => vec![a],
            PoissonMatrices::AlphaAndBeta(a, b) => vec![a, b],
        };
        if poisson.iter().any(|m| m.nrows() != nodes || m.ncols() != nodes) {
            return inconsistent(format!("Poisson matrices not {nodes}x{nodes}"));
        }
        Ok(())
    }

    /// Artifacts a run of `descriptor` needs on disk.
    pub fn required_artifacts(descriptor: &StrategyDescriptor) -> Result<Vec<Artifact>, ConfigError> {
        let family = descriptor.family()?;
        let mut required = vec![Artifact::SystemMatrix, Artifact::InitialGuess, Artifact::RightHandSide];
        if family.is_curl_aware() {
            required.push(Artifact::DiscreteGradient);
            let three_d = descriptor.dimension == 3;
            if descriptor.use_coordinates {
                required.extend([Artifact::CoordinateX, Artifact::CoordinateY]);
                if three_d {
                    required.push(Artifact::CoordinateZ);
                }
            } else {
                required.extend([Artifact::EdgeConstantX, Artifact::EdgeConstantY]);
                if three_d {
                    required.push(Artifact::EdgeConstantZ);
                }
            }
            if descriptor.use_h1_decomposition {
                required.push(Artifact::AlphaPoisson);
                if !descriptor.singular_problem {
                    required.push(Artifact::BetaPoisson);
                }
            }
        }
        if family.needs_mass_matrix() {
            required.push(Artifact::MassMatrix);
        }
        Ok(required)
    }

    /// Loads the artifacts `descriptor` needs. Every required file is checked
    /// for existence before the first one is read.
    pub fn load(store: &ArtifactStore, descriptor: &StrategyDescriptor) -> Result<Self, HarnessError> {
        let required = Self::required_artifacts(descriptor)?;
        store.require(&required)?;
        debug!(dir = %store.dir().display(), count = required.len(), "loading problem artifacts");

        let wanted = |a: Artifact| required.contains(&a);
        let vector = |a: Artifact| -> ams_io::Result<Option<DVector<f64>>> {
            if wanted(a) { store.read_vector(a).map(Some) } else { Ok(None) }
        };
        let matrix = |a: Artifact| -> ams_io::Result<Option<CsrMatrix<f64>>> {
            if wanted(a) { store.read_matrix(a).map(Some) } else { Ok(None) }
        };

        let mut bundle = ProblemBundle::new(
            store.read_matrix(Artifact::SystemMatrix)?,
            store.read_vector(Artifact::RightHandSide)?,
            store.read_vector(Artifact::InitialGuess)?,
        );
        if let Some(g) = matrix(Artifact::DiscreteGradient)? {
            bundle = bundle.with_discrete_gradient(g);
        }

        let triple = |names: [Artifact; 3]| -> ams_io::Result<Option<VectorTriple>> {
            match (vector(names[0])?, vector(names[1])?) {
                (Some(x), Some(y)) => Ok(Some(VectorTriple::new(x, y, vector(names[2])?))),
                _ => Ok(None),
            }
        };
        let edge = triple([Artifact::EdgeConstantX, Artifact::EdgeConstantY, Artifact::EdgeConstantZ])?;
        let coords = triple([Artifact::CoordinateX, Artifact::CoordinateY, Artifact::CoordinateZ])?;
        bundle = bundle.with_geometry(match (edge, coords) {
            (Some(t), _) => GeometricData::EdgeConstant(t),
            (None, Some(t)) => GeometricData::Coordinates(t),
            (None, None) => GeometricData::None,
        });

        if let Some(alpha) = matrix(Artifact::AlphaPoisson)? {
            let alpha = Arc::new(alpha);
            bundle = bundle.with_poisson(match matrix(Artifact::BetaPoisson)? {
                Some(beta) => PoissonMatrices::AlphaAndBeta(alpha, Arc::new(beta)),
                None => PoissonMatrices::AlphaOnly(alpha),
            });
        }
        if let Some(m) = matrix(Artifact::MassMatrix)? {
            bundle = bundle.with_mass_matrix(m);
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StrategyFamily;
    use crate::problems;

    #[test]
    fn required_artifacts_follow_descriptor_flags() {
        let amg = StrategyDescriptor::for_family(StrategyFamily::PlainMultigrid);
        assert_eq!(
            ProblemBundle::required_artifacts(&amg).unwrap(),
            vec![Artifact::SystemMatrix, Artifact::InitialGuess, Artifact::RightHandSide]
        );

        let singular_2d = StrategyDescriptor {
            dimension: 2,
            use_coordinates: true,
            use_h1_decomposition: true,
            singular_problem: true,
            ..Default::default()
        };
        let req = ProblemBundle::required_artifacts(&singular_2d).unwrap();
        assert!(req.contains(&Artifact::CoordinateY));
        assert!(!req.contains(&Artifact::CoordinateZ));
        assert!(!req.contains(&Artifact::EdgeConstantX));
        assert!(req.contains(&Artifact::AlphaPoisson));
        assert!(!req.contains(&Artifact::BetaPoisson));

        let eigen = StrategyDescriptor::for_family(StrategyFamily::GeneralizedEigensolver);
        assert!(ProblemBundle::required_artifacts(&eigen).unwrap().contains(&Artifact::MassMatrix));
    }

    #[test]
    fn missing_artifact_is_reported_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "aFEM", 0);
        let problem = problems::edge_problem_2d(3, 1.0);
        problem.write_to(&store).unwrap();
        std::fs::remove_file(store.path(Artifact::DiscreteGradient)).unwrap();

        let descriptor = StrategyDescriptor {
            dimension: 2,
            ..Default::default()
        };
        let err = ProblemBundle::load(&store, &descriptor).unwrap_err();
        assert!(err.to_string().contains("Can't find the input file"));
        assert!(err.to_string().contains("aFEM.G.00000"));
    }

    #[test]
    fn load_reads_only_what_the_family_needs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "aFEM", 0);
        problems::edge_problem_2d(3, 1.0).write_to(&store).unwrap();

        let amg = StrategyDescriptor::for_family(StrategyFamily::PlainMultigrid);
        let bundle = ProblemBundle::load(&store, &amg).unwrap();
        assert!(!bundle.has_discrete_gradient());
        assert!(matches!(bundle.geometry(), GeometricData::None));

        let eigen = StrategyDescriptor {
            dimension: 2,
            use_h1_decomposition: true,
            ..StrategyDescriptor::for_family(StrategyFamily::GeneralizedEigensolver)
        };
        let bundle = ProblemBundle::load(&store, &eigen).unwrap();
        assert!(bundle.has_mass_matrix());
        assert!(matches!(bundle.geometry(), GeometricData::EdgeConstant(_)));
        assert!(matches!(bundle.poisson(), PoissonMatrices::AlphaAndBeta(..)));
        bundle.check_shapes().unwrap();
    }

    #[test]
    fn shape_check_rejects_mismatched_gradient() {
        let a = problems::laplacian_1d(4);
        let bundle = ProblemBundle::new(a, DVector::zeros(4), DVector::zeros(4))
            .with_discrete_gradient(problems::laplacian_1d(3));
        assert!(matches!(bundle.check_shapes(), Err(ConfigError::Inconsistent(_))));
    }
}
