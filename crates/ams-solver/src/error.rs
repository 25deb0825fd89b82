//! Error types for strategy selection and the harness.

use ams_io::IoError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::harness::RunReport;

/// A strategy cannot be built from the given descriptor and bundle.
///
/// Raised before any backend handle is created.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown solver family code {0} (expected 0-5)")]
    UnknownFamily(i32),

    #[error("{family} requires {what}, but the problem does not provide it")]
    MissingData {
        family: &'static str,
        what: &'static str,
    },

    #[error("{0} is not a valid combination of problem data")]
    Inconsistent(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to read configuration {path}: {message}")]
    File { path: String, message: String },
}

/// Any failure surfaced by [`crate::Harness::run`].
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Input(#[from] IoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend call failed. When the failure came from the solve phase
    /// after setup succeeded (for example a non-converged solve), `report`
    /// carries the diagnostics and timings that were still collected.
    #[error("{phase} failed: {source}")]
    Backend {
        phase: String,
        #[source]
        source: BackendError,
        report: Option<Box<RunReport>>,
    },
}

impl HarnessError {
    pub fn backend(phase: impl Into<String>, source: BackendError) -> Self {
        HarnessError::Backend {
            phase: phase.into(),
            source,
            report: None,
        }
    }

    /// Numeric error flag for the terminal error report (0 for non-backend errors).
    pub fn error_flag(&self) -> i32 {
        match self {
            HarnessError::Backend { source, .. } => source.code(),
            _ => 0,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            HarnessError::Backend { report, .. } => report.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
