//! Two-phase execution of a constructed strategy.
//!
//! Every family goes through the same protocol: setup, then solve, each
//! bracketed by a [`PhaseTimer`]. The per-family differences live behind
//! [`PhaseCapability`], so timing and error handling exist exactly once.

use nalgebra::DVector;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{BackendError, BackendErrorKind, BackendResult, SolverBackend};
use crate::builder::ConstructedStrategy;
use crate::bundle::ProblemBundle;
use crate::timing::{PhaseTimer, PhaseTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Idle,
    Setup,
    Solved,
    Failed,
}

/// Convergence information retrieved after a solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostics {
    Convergence {
        iterations: usize,
        final_relative_residual: f64,
    },
    Eigen {
        eigenvalues: Vec<f64>,
        residual_norms: Vec<f64>,
        iterations: usize,
    },
}

impl Diagnostics {
    pub fn iterations(&self) -> usize {
        match self {
            Diagnostics::Convergence { iterations, .. } | Diagnostics::Eigen { iterations, .. } => {
                *iterations
            }
        }
    }
}

/// Setup, solve and diagnostics entry points of one strategy.
pub trait PhaseCapability {
    fn setup(&self, backend: &mut dyn SolverBackend, bundle: &ProblemBundle) -> BackendResult<()>;

    /// Solves into `x`, which starts as the initial guess. Returns whether
    /// `x` holds a solution of the linear system.
    fn solve(
        &self,
        backend: &mut dyn SolverBackend,
        bundle: &ProblemBundle,
        x: &mut DVector<f64>,
    ) -> BackendResult<bool>;

    fn diagnostics(&self, backend: &dyn SolverBackend) -> BackendResult<Diagnostics>;
}

impl PhaseCapability for ConstructedStrategy {
    fn setup(&self, backend: &mut dyn SolverBackend, bundle: &ProblemBundle) -> BackendResult<()> {
        let (a, b, x0) = (bundle.matrix(), bundle.rhs(), bundle.initial_guess());
        match self {
            ConstructedStrategy::Multigrid { amg } => backend.amg_setup(amg, a, b, x0),
            ConstructedStrategy::CurlSolver { ams } => backend.ams_setup(ams, a, b, x0),
            ConstructedStrategy::MultigridKrylov { pcg, .. }
            | ConstructedStrategy::CurlKrylov { pcg, .. }
            | ConstructedStrategy::DiagScaleKrylov { pcg } => backend.pcg_setup(pcg, a, b, x0),
            ConstructedStrategy::Eigen { ame, ams } => {
                backend.ams_setup(ams, a, b, x0)?;
                backend.ame_setup(ame)
            }
        }
    }

    fn solve(
        &self,
        backend: &mut dyn SolverBackend,
        bundle: &ProblemBundle,
        x: &mut DVector<f64>,
    ) -> BackendResult<bool> {
        let (a, b) = (bundle.matrix(), bundle.rhs());
        match self {
            ConstructedStrategy::Multigrid { amg } => backend.amg_solve(amg, a, b, x)?,
            ConstructedStrategy::CurlSolver { ams } => backend.ams_solve(ams, a, b, x)?,
            ConstructedStrategy::MultigridKrylov { pcg, .. }
            | ConstructedStrategy::CurlKrylov { pcg, .. }
            | ConstructedStrategy::DiagScaleKrylov { pcg } => backend.pcg_solve(pcg, a, b, x)?,
            ConstructedStrategy::Eigen { ame, .. } => {
                backend.ame_solve(ame)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn diagnostics(&self, backend: &dyn SolverBackend) -> BackendResult<Diagnostics> {
        let (iterations, final_relative_residual) = match self {
            ConstructedStrategy::Multigrid { amg } => (
                backend.amg_num_iterations(amg)?,
                backend.amg_final_relative_residual(amg)?,
            ),
            ConstructedStrategy::CurlSolver { ams } => (
                backend.ams_num_iterations(ams)?,
                backend.ams_final_relative_residual(ams)?,
            ),
            ConstructedStrategy::MultigridKrylov { pcg, .. }
            | ConstructedStrategy::CurlKrylov { pcg, .. }
            | ConstructedStrategy::DiagScaleKrylov { pcg } => (
                backend.pcg_num_iterations(pcg)?,
                backend.pcg_final_relative_residual(pcg)?,
            ),
            ConstructedStrategy::Eigen { ame, .. } => {
                return Ok(Diagnostics::Eigen {
                    eigenvalues: backend.ame_eigenvalues(ame)?,
                    residual_norms: backend.ame_residual_norms(ame)?,
                    iterations: backend.ame_num_iterations(ame)?,
                });
            }
        };
        Ok(Diagnostics::Convergence {
            iterations,
            final_relative_residual,
        })
    }
}

/// Backend failure attributed to the phase that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseError {
    pub phase: String,
    pub error: BackendError,
}

/// Everything one pass of the runner produced.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub state: PhaseState,
    pub timings: Vec<PhaseTiming>,
    pub diagnostics: Option<Diagnostics>,
    /// Final iterate, absent for the eigensolver and when solve never ran
    pub solution: Option<DVector<f64>>,
    /// First backend error, if any
    pub error: Option<PhaseError>,
}

/// Drives setup and solve on a constructed strategy.
#[derive(Debug)]
pub struct PhaseRunner {
    label: String,
    collect_diagnostics: bool,
    state: PhaseState,
}

impl PhaseRunner {
    /// `label` prefixes the phase names ("<label> Setup", "<label> Solve").
    /// Diagnostics are only requested when `collect_diagnostics` is set,
    /// which must match the logging flag the handles were configured with.
    pub fn new(label: impl Into<String>, collect_diagnostics: bool) -> Self {
        Self {
            label: label.into(),
            collect_diagnostics,
            state: PhaseState::Idle,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn setup_label(&self) -> String {
        format!("{} Setup", self.label)
    }

    pub fn solve_label(&self) -> String {
        format!("{} Solve", self.label)
    }

    /// Runs setup then solve. A setup failure ends the run in
    /// [`PhaseState::Failed`] without calling solve. A solve that merely
    /// failed to converge still ends in [`PhaseState::Solved`]: diagnostics
    /// are collected and the error is kept in the outcome.
    pub fn run<S: PhaseCapability + ?Sized>(
        &mut self,
        strategy: &S,
        backend: &mut dyn SolverBackend,
        bundle: &ProblemBundle,
    ) -> PhaseOutcome {
        let mut outcome = PhaseOutcome {
            state: PhaseState::Idle,
            timings: Vec::with_capacity(2),
            diagnostics: None,
            solution: None,
            error: None,
        };

        self.state = PhaseState::Setup;
        let setup_label = self.setup_label();
        let timer = PhaseTimer::start(setup_label.clone());
        let setup = strategy.setup(backend, bundle);
        outcome.timings.push(timer.stop());
        if let Err(error) = setup {
            return self.fail(outcome, setup_label, error);
        }

        let solve_label = self.solve_label();
        let mut x = bundle.initial_guess().as_ref().clone();
        let timer = PhaseTimer::start(solve_label.clone());
        let solve = strategy.solve(backend, bundle, &mut x);
        outcome.timings.push(timer.stop());
        match solve {
            Ok(has_solution) => {
                if has_solution {
                    outcome.solution = Some(x);
                }
            }
            Err(error) if error.kind == BackendErrorKind::NotConverged => {
                warn!(phase = %solve_label, error = %error, "solve did not converge");
                outcome.solution = Some(x);
                outcome.error = Some(PhaseError {
                    phase: solve_label,
                    error,
                });
            }
            Err(error) => return self.fail(outcome, solve_label, error),
        }
        self.state = PhaseState::Solved;

        if self.collect_diagnostics {
            match strategy.diagnostics(backend) {
                Ok(diagnostics) => {
                    debug!(iterations = diagnostics.iterations(), "collected diagnostics");
                    outcome.diagnostics = Some(diagnostics);
                }
                Err(error) => {
                    outcome.error.get_or_insert(PhaseError {
                        phase: format!("{} Diagnostics", self.label),
                        error,
                    });
                }
            }
        }
        outcome.state = self.state;
        outcome
    }

    fn fail(&mut self, mut outcome: PhaseOutcome, phase: String, error: BackendError) -> PhaseOutcome {
        warn!(phase = %phase, error = %error, "phase failed");
        self.state = PhaseState::Failed;
        outcome.state = PhaseState::Failed;
        outcome.error = Some(PhaseError { phase, error });
        outcome
    }
}
