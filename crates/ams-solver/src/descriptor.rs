//! Strategy descriptors: which solver family to run and how to tune it.
//!
//! A descriptor is a plain configuration value. It does not validate
//! itself; the strategy builder checks it against a problem bundle, so one
//! descriptor can be reused across problems.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::{AmeParams, AmgParams, AmsParams, PcgParams, SmoothingOptions, SubspaceAmgOptions};
use crate::error::ConfigError;

/// Solver family, selected by its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyFamily {
    /// 0: standalone algebraic multigrid
    PlainMultigrid,
    /// 1: conjugate gradient preconditioned by algebraic multigrid
    MultigridPreconditionedKrylov,
    /// 2: standalone auxiliary-space Maxwell solver
    StandaloneCurlSolver,
    /// 3: conjugate gradient preconditioned by the auxiliary-space Maxwell solver
    CurlPreconditionedKrylov,
    /// 4: conjugate gradient with diagonal scaling
    DiagScalePreconditionedKrylov,
    /// 5: Maxwell eigensolver
    GeneralizedEigensolver,
}

impl StrategyFamily {
    pub const ALL: [StrategyFamily; 6] = [
        StrategyFamily::PlainMultigrid,
        StrategyFamily::MultigridPreconditionedKrylov,
        StrategyFamily::StandaloneCurlSolver,
        StrategyFamily::CurlPreconditionedKrylov,
        StrategyFamily::DiagScalePreconditionedKrylov,
        StrategyFamily::GeneralizedEigensolver,
    ];

    pub fn from_code(code: i32) -> Result<Self, ConfigError> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(ConfigError::UnknownFamily(code))
    }

    pub fn code(self) -> i32 {
        match self {
            StrategyFamily::PlainMultigrid => 0,
            StrategyFamily::MultigridPreconditionedKrylov => 1,
            StrategyFamily::StandaloneCurlSolver => 2,
            StrategyFamily::CurlPreconditionedKrylov => 3,
            StrategyFamily::DiagScalePreconditionedKrylov => 4,
            StrategyFamily::GeneralizedEigensolver => 5,
        }
    }

    /// Label used for phase timings and reports.
    pub fn label(self) -> &'static str {
        match self {
            StrategyFamily::PlainMultigrid => "BoomerAMG",
            StrategyFamily::MultigridPreconditionedKrylov => "BoomerAMG-PCG",
            StrategyFamily::StandaloneCurlSolver => "AMS",
            StrategyFamily::CurlPreconditionedKrylov => "AMS-PCG",
            StrategyFamily::DiagScalePreconditionedKrylov => "DS-PCG",
            StrategyFamily::GeneralizedEigensolver => "AME",
        }
    }

    /// Families that build an auxiliary-space Maxwell solver.
    pub fn is_curl_aware(self) -> bool {
        matches!(
            self,
            StrategyFamily::StandaloneCurlSolver
                | StrategyFamily::CurlPreconditionedKrylov
                | StrategyFamily::GeneralizedEigensolver
        )
    }

    pub fn needs_mass_matrix(self) -> bool {
        self == StrategyFamily::GeneralizedEigensolver
    }
}

impl std::fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Solver strategy and its numeric parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyDescriptor {
    /// Family code 0-5 (see [`StrategyFamily`])
    pub solver_id: i32,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Space dimension (2 or 3)
    pub dimension: usize,
    /// Auxiliary-space cycle type
    pub cycle_type: i32,
    /// Fine-grid smoother of the curl solver
    pub relax_type: i32,
    pub relax_sweeps: usize,
    pub relax_weight: f64,
    pub omega: f64,
    /// Subspace AMG coarsening
    pub coarsen_type: i32,
    pub agg_levels: usize,
    pub agg_num_paths: usize,
    /// Subspace AMG relaxation
    pub amg_relax_type: i32,
    pub interp_type: i32,
    pub p_max: usize,
    pub strong_threshold: f64,
    /// Number of eigenpairs for the eigensolver
    pub block_size: usize,
    /// Pass vertex coordinates instead of edge-constant vectors
    pub use_coordinates: bool,
    /// Pass the alpha/beta Poisson matrices to the curl solver
    pub use_h1_decomposition: bool,
    /// Gauge-free problem: the beta Poisson matrix is forced absent
    pub singular_problem: bool,
    /// Build logging-capable solvers and print iteration counts
    pub collect_diagnostics: bool,
}

impl Default for StrategyDescriptor {
    fn default() -> Self {
        Self {
            solver_id: StrategyFamily::CurlPreconditionedKrylov.code(),
            tolerance: 1e-6,
            max_iterations: 100,
            dimension: 3,
            cycle_type: 1,
            relax_type: 6,
            relax_sweeps: 1,
            relax_weight: 1.0,
            omega: 1.0,
            coarsen_type: 10,
            agg_levels: 1,
            agg_num_paths: 1,
            amg_relax_type: 6,
            interp_type: 6,
            p_max: 4,
            strong_threshold: 0.25,
            block_size: 5,
            use_coordinates: false,
            use_h1_decomposition: false,
            singular_problem: false,
            collect_diagnostics: true,
        }
    }
}

impl StrategyDescriptor {
    /// Default descriptor for `family`.
    pub fn for_family(family: StrategyFamily) -> Self {
        Self {
            solver_id: family.code(),
            ..Self::default()
        }
    }

    /// Loads a descriptor from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))
    }

    pub fn family(&self) -> Result<StrategyFamily, ConfigError> {
        StrategyFamily::from_code(self.solver_id)
    }

    pub fn smoothing(&self) -> SmoothingOptions {
        SmoothingOptions {
            relax_type: self.relax_type,
            relax_times: self.relax_sweeps,
            relax_weight: self.relax_weight,
            omega: self.omega,
        }
    }

    pub fn subspace_amg(&self) -> SubspaceAmgOptions {
        SubspaceAmgOptions {
            coarsen_type: self.coarsen_type,
            agg_levels: self.agg_levels,
            agg_num_paths: self.agg_num_paths,
            relax_type: self.amg_relax_type,
            strong_threshold: self.strong_threshold,
            interp_type: self.interp_type,
            p_max: self.p_max,
        }
    }

    /// Standalone multigrid (or multigrid preconditioner before
    /// [`AmgParams::as_preconditioner`]).
    pub fn amg_params(&self) -> AmgParams {
        AmgParams {
            coarsen_type: self.coarsen_type,
            relax_type: self.relax_type,
            num_sweeps: 1,
            max_levels: 20,
            strong_threshold: self.strong_threshold,
            max_iter: self.max_iterations,
            tol: self.tolerance,
            print_level: 1,
            logging: self.collect_diagnostics,
            ..AmgParams::default()
        }
    }

    /// Curl solver used directly as the primary solver.
    pub fn ams_params(&self) -> AmsParams {
        AmsParams {
            dimension: self.dimension,
            max_iter: self.max_iterations,
            tol: self.tolerance,
            cycle_type: self.cycle_type,
            print_level: 1,
            logging: self.collect_diagnostics,
            smoothing: self.smoothing(),
            alpha_amg: self.subspace_amg(),
            beta_amg: self.subspace_amg(),
        }
    }

    pub fn pcg_params(&self) -> PcgParams {
        PcgParams {
            max_iter: self.max_iterations,
            tol: self.tolerance,
            two_norm: false,
            print_level: 2,
            logging: self.collect_diagnostics,
        }
    }

    pub fn ame_params(&self) -> AmeParams {
        AmeParams {
            block_size: self.block_size,
            max_iter: self.max_iterations,
            tol: self.tolerance,
            print_level: 1,
        }
    }
}
