//! Solver parameter blocks passed to the backend `configure` calls.
//!
//! Numeric codes (coarsening, relaxation, interpolation and cycle types)
//! follow the BoomerAMG/AMS conventions so that values given on the
//! command line mean the same thing to every backend.

use serde::{Deserialize, Serialize};

/// Configuration for algebraic multigrid (standalone or preconditioner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgParams {
    /// Coarsening algorithm (6 = Falgout, 8 = PMIS, 10 = HMIS)
    pub coarsen_type: i32,
    /// Relaxation method on every level
    pub relax_type: i32,
    /// Relaxation sweeps per level, before and after the coarse correction
    pub num_sweeps: usize,
    /// Maximum number of levels in the hierarchy
    pub max_levels: usize,
    /// Strength threshold theta
    pub strong_threshold: f64,
    /// Interpolation operator (0 = classical, 3 = direct, 6 = extended+i)
    pub interp_type: i32,
    /// Maximum interpolation entries per row (0 = no truncation)
    pub p_max: usize,
    /// Number of levels using aggressive coarsening
    pub agg_levels: usize,
    /// Paths required for a long-range strong connection in aggressive coarsening
    pub agg_num_paths: usize,
    /// Maximum number of cycles
    pub max_iter: usize,
    /// Relative residual tolerance (0 = run exactly `max_iter` cycles)
    pub tol: f64,
    pub print_level: u8,
    /// Record iteration counts and residual norms for later retrieval
    pub logging: bool,
}

impl Default for AmgParams {
    fn default() -> Self {
        Self {
            coarsen_type: 6,
            relax_type: 6,
            num_sweeps: 1,
            max_levels: 20,
            strong_threshold: 0.25,
            interp_type: 0,
            p_max: 0,
            agg_levels: 0,
            agg_num_paths: 1,
            max_iter: 20,
            tol: 1e-7,
            print_level: 0,
            logging: false,
        }
    }
}

impl AmgParams {
    /// One cycle, no convergence test: the setting for use inside another solver.
    pub fn as_preconditioner(self) -> Self {
        Self {
            max_iter: 1,
            tol: 0.0,
            logging: false,
            ..self
        }
    }
}

/// Fine-grid smoothing for the curl solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingOptions {
    pub relax_type: i32,
    pub relax_times: usize,
    /// Damping factor (usually <= 1)
    pub relax_weight: f64,
    /// SOR factor (usually in (0, 2))
    pub omega: f64,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            relax_type: 2,
            relax_times: 1,
            relax_weight: 1.0,
            omega: 1.0,
        }
    }
}

/// AMG options for one auxiliary subspace of the curl solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubspaceAmgOptions {
    pub coarsen_type: i32,
    pub agg_levels: usize,
    pub agg_num_paths: usize,
    pub relax_type: i32,
    pub strong_threshold: f64,
    pub interp_type: i32,
    pub p_max: usize,
}

impl Default for SubspaceAmgOptions {
    fn default() -> Self {
        Self {
            coarsen_type: 10,
            agg_levels: 1,
            agg_num_paths: 1,
            relax_type: 6,
            strong_threshold: 0.25,
            interp_type: 6,
            p_max: 4,
        }
    }
}

impl SubspaceAmgOptions {
    /// Single V-cycle AMG parameters for this subspace.
    pub fn to_amg_params(&self) -> AmgParams {
        AmgParams {
            coarsen_type: self.coarsen_type,
            relax_type: self.relax_type,
            strong_threshold: self.strong_threshold,
            interp_type: self.interp_type,
            p_max: self.p_max,
            agg_levels: self.agg_levels,
            agg_num_paths: self.agg_num_paths,
            ..AmgParams::default()
        }
        .as_preconditioner()
    }
}

/// Configuration for the auxiliary-space Maxwell solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmsParams {
    /// Space dimension (2 or 3)
    pub dimension: usize,
    pub max_iter: usize,
    pub tol: f64,
    /// Subspace cycle (1-8, 11-14)
    pub cycle_type: i32,
    pub print_level: u8,
    pub logging: bool,
    pub smoothing: SmoothingOptions,
    /// AMG for the vector nodal (Pi) subspace
    pub alpha_amg: SubspaceAmgOptions,
    /// AMG for the scalar gradient subspace
    pub beta_amg: SubspaceAmgOptions,
}

impl Default for AmsParams {
    fn default() -> Self {
        Self {
            dimension: 3,
            max_iter: 20,
            tol: 1e-6,
            cycle_type: 1,
            print_level: 1,
            logging: false,
            smoothing: SmoothingOptions::default(),
            alpha_amg: SubspaceAmgOptions::default(),
            beta_amg: SubspaceAmgOptions::default(),
        }
    }
}

impl AmsParams {
    pub fn as_preconditioner(self) -> Self {
        Self {
            max_iter: 1,
            tol: 0.0,
            print_level: 0,
            logging: false,
            ..self
        }
    }
}

/// Configuration for preconditioned conjugate gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcgParams {
    pub max_iter: usize,
    pub tol: f64,
    /// Stop on the Euclidean residual norm instead of the preconditioned norm
    pub two_norm: bool,
    pub print_level: u8,
    pub logging: bool,
}

impl Default for PcgParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            two_norm: false,
            print_level: 2,
            logging: true,
        }
    }
}

/// Configuration for the Maxwell eigensolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmeParams {
    /// Number of eigenpairs to compute
    pub block_size: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub print_level: u8,
}

impl Default for AmeParams {
    fn default() -> Self {
        Self {
            block_size: 1,
            max_iter: 100,
            tol: 1e-6,
            print_level: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditioner_presets_disable_convergence_test() {
        let amg = AmgParams {
            max_iter: 100,
            tol: 1e-8,
            logging: true,
            ..Default::default()
        }
        .as_preconditioner();
        assert_eq!(amg.max_iter, 1);
        assert_eq!(amg.tol, 0.0);
        assert!(!amg.logging);

        let ams = AmsParams::default().as_preconditioner();
        assert_eq!((ams.max_iter, ams.tol, ams.print_level), (1, 0.0, 0));
    }

    #[test]
    fn subspace_options_carry_into_amg_params() {
        let opts = SubspaceAmgOptions {
            coarsen_type: 8,
            agg_levels: 2,
            p_max: 3,
            ..Default::default()
        };
        let params = opts.to_amg_params();
        assert_eq!(params.coarsen_type, 8);
        assert_eq!(params.agg_levels, 2);
        assert_eq!(params.p_max, 3);
        assert_eq!(params.max_iter, 1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: PcgParams = serde_json::from_str(r#"{"max_iter": 50}"#).expect("parse");
        assert_eq!(params.max_iter, 50);
        assert!(!params.two_norm);
        assert!(params.logging);
    }
}
