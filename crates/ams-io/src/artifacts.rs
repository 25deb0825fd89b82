//! Named on-disk artifacts that make up one Maxwell problem instance.
//!
//! Every artifact lives at `<dir>/<prefix>.<name>.<rank:05>`, one file per
//! process. Callers are expected to run [`ArtifactStore::require`] on the
//! complete list of artifacts they need before reading any of them, so a
//! missing file aborts the run before partial data is loaded.

use std::fmt;
use std::path::{Path, PathBuf};

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::error::{IoError, Result};
use crate::ij;

/// Default file prefix used by the finite element export.
pub const DEFAULT_PREFIX: &str = "aFEM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    SystemMatrix,
    InitialGuess,
    RightHandSide,
    DiscreteGradient,
    EdgeConstantX,
    EdgeConstantY,
    EdgeConstantZ,
    CoordinateX,
    CoordinateY,
    CoordinateZ,
    AlphaPoisson,
    BetaPoisson,
    MassMatrix,
}

impl Artifact {
    pub const ALL: [Artifact; 13] = [
        Artifact::SystemMatrix,
        Artifact::InitialGuess,
        Artifact::RightHandSide,
        Artifact::DiscreteGradient,
        Artifact::EdgeConstantX,
        Artifact::EdgeConstantY,
        Artifact::EdgeConstantZ,
        Artifact::CoordinateX,
        Artifact::CoordinateY,
        Artifact::CoordinateZ,
        Artifact::AlphaPoisson,
        Artifact::BetaPoisson,
        Artifact::MassMatrix,
    ];

    /// Short name used in file names.
    pub fn name(self) -> &'static str {
        match self {
            Artifact::SystemMatrix => "A",
            Artifact::InitialGuess => "x0",
            Artifact::RightHandSide => "b",
            Artifact::DiscreteGradient => "G",
            Artifact::EdgeConstantX => "Gx",
            Artifact::EdgeConstantY => "Gy",
            Artifact::EdgeConstantZ => "Gz",
            Artifact::CoordinateX => "x",
            Artifact::CoordinateY => "y",
            Artifact::CoordinateZ => "z",
            Artifact::AlphaPoisson => "Aalpha",
            Artifact::BetaPoisson => "Abeta",
            Artifact::MassMatrix => "M",
        }
    }

    pub fn is_matrix(self) -> bool {
        matches!(
            self,
            Artifact::SystemMatrix
                | Artifact::DiscreteGradient
                | Artifact::AlphaPoisson
                | Artifact::BetaPoisson
                | Artifact::MassMatrix
        )
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Location of a problem's artifacts for one process.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    prefix: String,
    rank: usize,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, rank: usize) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            rank,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{:05}", self.prefix, artifact.name(), self.rank))
    }

    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).is_file()
    }

    /// Fails with [`IoError::MissingInput`] naming the first absent artifact.
    pub fn require(&self, artifacts: &[Artifact]) -> Result<()> {
        for &artifact in artifacts {
            if !self.exists(artifact) {
                return Err(IoError::MissingInput {
                    artifact: artifact.name().to_string(),
                    path: self.path(artifact),
                });
            }
        }
        Ok(())
    }

    pub fn read_matrix(&self, artifact: Artifact) -> Result<CsrMatrix<f64>> {
        debug_assert!(artifact.is_matrix());
        ij::read_matrix(self.path(artifact))
    }

    pub fn read_vector(&self, artifact: Artifact) -> Result<DVector<f64>> {
        debug_assert!(!artifact.is_matrix());
        ij::read_vector(self.path(artifact))
    }

    pub fn write_matrix(&self, artifact: Artifact, matrix: &CsrMatrix<f64>) -> Result<()> {
        self.ensure_dir()?;
        ij::write_matrix(self.path(artifact), matrix)
    }

    pub fn write_vector(&self, artifact: Artifact, vector: &DVector<f64>) -> Result<()> {
        self.ensure_dir()?;
        ij::write_vector(self.path(artifact), vector)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn paths_follow_prefix_name_rank_convention() {
        let store = ArtifactStore::new("/data/run", DEFAULT_PREFIX, 3);
        assert_eq!(
            store.path(Artifact::AlphaPoisson),
            PathBuf::from("/data/run/aFEM.Aalpha.00003")
        );
        assert_eq!(
            store.path(Artifact::InitialGuess),
            PathBuf::from("/data/run/aFEM.x0.00003")
        );
    }

    #[test]
    fn require_reports_first_missing_artifact() {
        let dir = tempdir().expect("temp dir");
        let store = ArtifactStore::new(dir.path(), DEFAULT_PREFIX, 0);
        store
            .write_vector(Artifact::RightHandSide, &DVector::from_vec(vec![1.0]))
            .expect("write rhs");

        assert!(store.require(&[Artifact::RightHandSide]).is_ok());
        match store.require(&[Artifact::RightHandSide, Artifact::DiscreteGradient, Artifact::MassMatrix]) {
            Err(IoError::MissingInput { artifact, path }) => {
                assert_eq!(artifact, "G");
                assert!(path.ends_with("aFEM.G.00000"));
            }
            other => panic!("expected missing input, got {other:?}"),
        }
    }

    #[test]
    fn missing_input_message_names_the_file() {
        let store = ArtifactStore::new("nowhere", "aFEM", 0);
        let err = store.require(&[Artifact::SystemMatrix]).unwrap_err();
        assert!(err.to_string().contains("aFEM.A.00000"));
    }
}
