//! Artifact I/O for the AMS solver driver.
//!
//! This crate provides:
//! - **IJ text format** reader/writer for sparse matrices and vectors
//! - **Artifact naming** (`<prefix>.<name>.<rank>`) with pre-flight existence checks
//! - **JSON run summaries** for post-run inspection

pub mod artifacts;
pub mod error;
pub mod ij;
mod report;

pub use artifacts::{Artifact, ArtifactStore, DEFAULT_PREFIX};
pub use error::{IoError, Result};
pub use report::{PhaseTime, RunStatus, RunSummary, read_summary, write_summary};
