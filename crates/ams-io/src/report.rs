use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Converged,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTime {
    pub label: String,
    pub wall_seconds: f64,
}

/// Machine-readable record of one driver run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub solver: String,
    pub problem_size: usize,
    pub status: RunStatus,
    pub iterations: Option<usize>,
    pub final_relative_residual: Option<f64>,
    pub eigenvalues: Vec<f64>,
    pub phases: Vec<PhaseTime>,
    pub error_code: Option<i32>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(solver: impl Into<String>, problem_size: usize, status: RunStatus) -> Self {
        Self {
            schema_version: 1,
            solver: solver.into(),
            problem_size,
            status,
            iterations: None,
            final_relative_residual: None,
            eigenvalues: Vec::new(),
            phases: Vec::new(),
            error_code: None,
            error: None,
            finished_at: Utc::now(),
        }
    }
}

pub fn write_summary(path: impl AsRef<Path>, summary: &RunSummary) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(summary)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn read_summary(path: impl AsRef<Path>) -> Result<RunSummary> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn summary_survives_disk() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("reports/run.json");

        let mut summary = RunSummary::new("AMS-PCG", 24, RunStatus::Converged);
        summary.iterations = Some(7);
        summary.final_relative_residual = Some(3.2e-7);
        summary.phases.push(PhaseTime {
            label: "AMS-PCG Setup".to_string(),
            wall_seconds: 0.01,
        });

        write_summary(&path, &summary).expect("write summary");
        let back = read_summary(&path).expect("read summary");
        assert_eq!(back, summary);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&RunStatus::Failed).expect("serialize");
        assert_eq!(json, "\"failed\"");
    }
}
