//! Top-level driver: build, run, report, tear down.

use ams_io::{PhaseTime, RunStatus, RunSummary};
use nalgebra::DVector;
use tracing::{debug, info};

use crate::backend::{SolverBackend, release_all};
use crate::builder::StrategyBuilder;
use crate::bundle::ProblemBundle;
use crate::descriptor::{StrategyDescriptor, StrategyFamily};
use crate::error::{HarnessError, Result};
use crate::runner::{Diagnostics, PhaseError, PhaseOutcome, PhaseRunner, PhaseState};
use crate::timing::{PhaseTiming, format_report};

/// Result of one harness run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub family: StrategyFamily,
    pub problem_size: usize,
    pub state: PhaseState,
    pub diagnostics: Option<Diagnostics>,
    /// Setup timing first, then solve timing when the solve ran
    pub timings: Vec<PhaseTiming>,
    pub solution: Option<DVector<f64>>,
    pub handles_created: usize,
}

impl RunReport {
    pub fn label(&self) -> &'static str {
        self.family.label()
    }

    pub fn setup_timing(&self) -> Option<&PhaseTiming> {
        self.timings.first()
    }

    pub fn solve_timing(&self) -> Option<&PhaseTiming> {
        self.timings.get(1)
    }

    /// "Setup phase times" and "Solve phase times" blocks.
    pub fn timing_report(&self) -> String {
        let mut out = String::new();
        if let Some(setup) = self.setup_timing() {
            out.push_str(&format_report("Setup phase times", std::slice::from_ref(setup)));
        }
        if let Some(solve) = self.solve_timing() {
            out.push_str(&format_report("Solve phase times", std::slice::from_ref(solve)));
        }
        out
    }

    /// Human-readable convergence summary, absent when no diagnostics were collected.
    pub fn convergence_summary(&self) -> Option<String> {
        let summary = match self.diagnostics.as_ref()? {
            Diagnostics::Convergence {
                iterations,
                final_relative_residual,
            } => format!(
                "Iterations = {iterations}\nFinal Relative Residual Norm = {final_relative_residual:e}\n"
            ),
            Diagnostics::Eigen {
                eigenvalues,
                residual_norms,
                iterations,
            } => {
                let mut out = format!("Eigenpairs = {}\n", eigenvalues.len());
                for (i, (lambda, res)) in eigenvalues.iter().zip(residual_norms).enumerate() {
                    out.push_str(&format!("  [{i}] lambda = {lambda:.10e}  residual = {res:.3e}\n"));
                }
                out.push_str(&format!("Iterations = {iterations}\n"));
                out
            }
        };
        Some(summary)
    }

    /// Machine-readable record of this run. `error` is the failure the run
    /// ended with, if any.
    pub fn to_summary(&self, error: Option<&HarnessError>) -> RunSummary {
        let status = match (self.state, error) {
            (PhaseState::Solved, None) if self.solution.is_some() => RunStatus::Converged,
            (PhaseState::Solved, None) => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        let mut summary = RunSummary::new(self.label(), self.problem_size, status);
        summary.phases = self
            .timings
            .iter()
            .map(|t| PhaseTime {
                label: t.label.clone(),
                wall_seconds: t.seconds(),
            })
            .collect();
        match &self.diagnostics {
            Some(Diagnostics::Convergence {
                iterations,
                final_relative_residual,
            }) => {
                summary.iterations = Some(*iterations);
                summary.final_relative_residual = Some(*final_relative_residual);
            }
            Some(Diagnostics::Eigen {
                eigenvalues,
                iterations,
                ..
            }) => {
                summary.iterations = Some(*iterations);
                summary.eigenvalues = eigenvalues.clone();
            }
            None => {}
        }
        if let Some(err) = error {
            summary.error_code = Some(err.error_flag());
            summary.error = Some(err.to_string());
        }
        summary
    }
}

/// Drives one descriptor against one bundle on a backend.
///
/// Every handle the builder creates is destroyed before [`Harness::run`]
/// returns, on success and failure alike.
pub struct Harness<'a> {
    backend: &'a mut dyn SolverBackend,
}

impl<'a> Harness<'a> {
    pub fn new(backend: &'a mut dyn SolverBackend) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Builds the strategy, runs setup and solve, then tears everything down.
    ///
    /// Configuration errors surface before any handle exists. A backend
    /// error is returned only after teardown; when the solve phase was
    /// reached the error carries the partial [`RunReport`].
    pub fn run(&mut self, descriptor: &StrategyDescriptor, bundle: &ProblemBundle) -> Result<RunReport> {
        let family = descriptor.family()?;
        let strategy = StrategyBuilder::new(&mut *self.backend).build(descriptor, bundle)?;
        let handles_created = strategy.handle_count();
        debug!(backend = self.backend.name(), family = family.label(), "running strategy");

        let mut runner = PhaseRunner::new(family.label(), descriptor.collect_diagnostics);
        let PhaseOutcome {
            state,
            timings,
            diagnostics,
            solution,
            error,
        } = runner.run(&strategy, &mut *self.backend, bundle);

        let teardown = release_all(&mut *self.backend, strategy.into_handles());

        let report = RunReport {
            family,
            problem_size: bundle.size(),
            state,
            diagnostics,
            timings,
            solution,
            handles_created,
        };
        if let Some(d) = &report.diagnostics {
            info!(family = family.label(), iterations = d.iterations(), "run finished");
        }

        match (error, teardown) {
            (Some(PhaseError { phase, error }), _) => Err(HarnessError::Backend {
                phase,
                source: error,
                report: (state == PhaseState::Solved).then(|| Box::new(report)),
            }),
            (None, Err(error)) => Err(HarnessError::Backend {
                phase: format!("{} Destroy", family.label()),
                source: error,
                report: Some(Box::new(report)),
            }),
            (None, Ok(())) => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::problems;

    #[test]
    fn plain_multigrid_reports_convergence() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(8));
        let mut backend = NativeBackend::new();
        let report = Harness::new(&mut backend)
            .run(&StrategyDescriptor::for_family(StrategyFamily::PlainMultigrid), &bundle)
            .unwrap();

        assert_eq!(report.state, PhaseState::Solved);
        assert_eq!(report.problem_size, 64);
        let summary = report.convergence_summary().unwrap();
        assert!(summary.starts_with("Iterations = "));
        assert!(summary.contains("Final Relative Residual Norm = "));
        assert!(report.timing_report().contains("BoomerAMG Setup"));
        assert_eq!(backend.live_handles(), 0);
    }

    #[test]
    fn summary_status_follows_outcome() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(6));
        let mut backend = NativeBackend::new();
        let report = Harness::new(&mut backend)
            .run(
                &StrategyDescriptor::for_family(StrategyFamily::DiagScalePreconditionedKrylov),
                &bundle,
            )
            .unwrap();
        let summary = report.to_summary(None);
        assert_eq!(summary.status, RunStatus::Converged);
        assert_eq!(summary.solver, "DS-PCG");
        assert_eq!(summary.phases.len(), 2);
        assert!(summary.iterations.is_some());
    }

    #[test]
    fn non_convergence_is_reported_after_teardown() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(10));
        let d = StrategyDescriptor {
            max_iterations: 2,
            tolerance: 1e-12,
            ..StrategyDescriptor::for_family(StrategyFamily::DiagScalePreconditionedKrylov)
        };
        let mut backend = NativeBackend::new();
        let err = Harness::new(&mut backend).run(&d, &bundle).unwrap_err();

        assert_eq!(err.error_flag(), 256);
        let report = err.report().unwrap();
        assert_eq!(report.diagnostics.as_ref().unwrap().iterations(), 2);
        assert_eq!(report.to_summary(Some(&err)).status, RunStatus::Failed);
        assert_eq!(backend.live_handles(), 0);
    }
}
