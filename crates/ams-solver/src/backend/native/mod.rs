//! Native backend built on nalgebra-sparse and rayon.
//!
//! This is the in-process backend used by the CLI and the tests. It runs
//! as a single-member process group: every collective call completes
//! locally. It supports:
//! - Ruge-Stüben/PMIS algebraic multigrid ([`amg`])
//! - Auxiliary-space Maxwell cycles ([`ams`])
//! - Preconditioned conjugate gradient ([`pcg`])
//! - LOBPCG for the Maxwell eigenproblem ([`ame`])

pub mod ame;
pub mod amg;
pub mod ams;
pub mod pcg;
pub mod relax;
pub mod sparse;

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DVector;
use tracing::debug;

use self::ame::{AmeOutcome, GradientProjector};
use self::amg::{AmgHierarchy, AmgOptions, IterationStats};
use self::ams::{AmsInputs, AmsSolver, BetaPoisson, EdgeGeometry};
use self::pcg::PcgOutcome;
use super::handles::{AmeHandle, AmgHandle, AmsHandle, HandleId, PcgHandle};
use super::params::{AmeParams, AmgParams, AmsParams, PcgParams};
use super::traits::*;

#[derive(Default)]
struct AmgState {
    params: AmgParams,
    hierarchy: Option<AmgHierarchy>,
    stats: Option<IterationStats>,
}

#[derive(Default)]
struct AmsState {
    params: AmsParams,
    inputs: AmsInputs,
    solver: Option<AmsSolver>,
    stats: Option<IterationStats>,
}

/// Preconditioner entry points bound to a PCG handle.
#[derive(Debug, Clone, Copy, Default)]
enum Binding {
    #[default]
    Identity,
    BoomerAmg(HandleId),
    Ams(HandleId),
    DiagScale,
}

#[derive(Default)]
struct PcgState {
    params: PcgParams,
    binding: Binding,
    /// Inverse diagonal, filled by setup when bound to diagonal scaling.
    diag_inverse: Option<Vec<f64>>,
    stats: Option<PcgOutcome>,
}

#[derive(Default)]
struct AmeState {
    params: AmeParams,
    ams: Option<HandleId>,
    mass: Option<SharedMatrix>,
    projector: Option<GradientProjector>,
    outcome: Option<AmeOutcome>,
}

/// In-process solver backend. Handles index per-family arenas.
#[derive(Default)]
pub struct NativeBackend {
    next_id: HandleId,
    amg: HashMap<HandleId, AmgState>,
    ams: HashMap<HandleId, AmsState>,
    pcg: HashMap<HandleId, PcgState>,
    ame: HashMap<HandleId, AmeState>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> HandleId {
        self.next_id += 1;
        self.next_id
    }
}

fn lookup<'a, T>(map: &'a HashMap<HandleId, T>, family: &str, id: HandleId) -> BackendResult<&'a T> {
    map.get(&id).ok_or_else(|| BackendError::invalid_handle(family, id))
}

fn lookup_mut<'a, T>(
    map: &'a mut HashMap<HandleId, T>,
    family: &str,
    id: HandleId,
) -> BackendResult<&'a mut T> {
    map.get_mut(&id).ok_or_else(|| BackendError::invalid_handle(family, id))
}

fn check_system(a: &SharedMatrix, b: &DVector<f64>, x: &DVector<f64>) -> BackendResult<()> {
    if a.nrows() != a.ncols() || b.len() != a.nrows() || x.len() != a.ncols() {
        return Err(BackendError::invalid_argument(format!(
            "system is {}x{} but rhs has {} and initial guess {} entries",
            a.nrows(),
            a.ncols(),
            b.len(),
            x.len()
        )));
    }
    Ok(())
}

fn require_logging(logging: bool, family: &str) -> BackendResult<()> {
    if logging {
        Ok(())
    } else {
        Err(BackendError::invalid_argument(format!(
            "{family} diagnostics requested from a handle configured without logging"
        )))
    }
}

fn require_stats<T: Copy>(stats: Option<T>, family: &str) -> BackendResult<T> {
    stats.ok_or_else(|| BackendError::invalid_argument(format!("{family} has not been solved")))
}

impl MultigridSolver for NativeBackend {
    fn amg_create(&mut self) -> BackendResult<AmgHandle> {
        let id = self.mint();
        self.amg.insert(id, AmgState::default());
        debug!(id, "BoomerAMG create");
        Ok(AmgHandle::from_raw(id))
    }

    fn amg_configure(&mut self, solver: &AmgHandle, params: &AmgParams) -> BackendResult<()> {
        AmgOptions::from_params(params)?;
        lookup_mut(&mut self.amg, "BoomerAMG", solver.id())?.params = params.clone();
        Ok(())
    }

    fn amg_setup(
        &mut self,
        solver: &AmgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let state = lookup_mut(&mut self.amg, "BoomerAMG", solver.id())?;
        let options = AmgOptions::from_params(&state.params)?;
        state.hierarchy = Some(AmgHierarchy::build(Arc::clone(a), &options)?);
        state.stats = None;
        Ok(())
    }

    fn amg_solve(
        &mut self,
        solver: &AmgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let state = lookup_mut(&mut self.amg, "BoomerAMG", solver.id())?;
        let hierarchy = state
            .hierarchy
            .as_ref()
            .ok_or_else(|| BackendError::invalid_argument("BoomerAMG solve called before setup"))?;
        let stats = hierarchy.iterate(a, b, x, state.params.max_iter, state.params.tol);
        state.stats = Some(stats);
        if !stats.converged {
            return Err(BackendError::not_converged(
                "BoomerAMG",
                stats.iterations,
                stats.relative_residual,
                state.params.tol,
            ));
        }
        Ok(())
    }

    fn amg_num_iterations(&self, solver: &AmgHandle) -> BackendResult<usize> {
        let state = lookup(&self.amg, "BoomerAMG", solver.id())?;
        require_logging(state.params.logging, "BoomerAMG")?;
        Ok(require_stats(state.stats, "BoomerAMG")?.iterations)
    }

    fn amg_final_relative_residual(&self, solver: &AmgHandle) -> BackendResult<f64> {
        let state = lookup(&self.amg, "BoomerAMG", solver.id())?;
        require_logging(state.params.logging, "BoomerAMG")?;
        Ok(require_stats(state.stats, "BoomerAMG")?.relative_residual)
    }

    fn amg_destroy(&mut self, solver: AmgHandle) -> BackendResult<()> {
        self.amg
            .remove(&solver.id())
            .map(|_| debug!(id = solver.id(), "BoomerAMG destroy"))
            .ok_or_else(|| BackendError::invalid_handle("BoomerAMG", solver.id()))
    }
}

impl CurlSolver for NativeBackend {
    fn ams_create(&mut self) -> BackendResult<AmsHandle> {
        let id = self.mint();
        self.ams.insert(id, AmsState::default());
        debug!(id, "AMS create");
        Ok(AmsHandle::from_raw(id))
    }

    fn ams_configure(&mut self, solver: &AmsHandle, params: &AmsParams) -> BackendResult<()> {
        ams::cycle_string(params.cycle_type)?;
        lookup_mut(&mut self.ams, "AMS", solver.id())?.params = params.clone();
        Ok(())
    }

    fn ams_set_discrete_gradient(&mut self, solver: &AmsHandle, g: &SharedMatrix) -> BackendResult<()> {
        lookup_mut(&mut self.ams, "AMS", solver.id())?.inputs.gradient = Some(Arc::clone(g));
        Ok(())
    }

    fn ams_set_edge_constant_vectors(
        &mut self,
        solver: &AmsHandle,
        gx: &SharedVector,
        gy: &SharedVector,
        gz: Option<&SharedVector>,
    ) -> BackendResult<()> {
        lookup_mut(&mut self.ams, "AMS", solver.id())?.inputs.edge_constants = Some(
            EdgeGeometry::EdgeConstants(Arc::clone(gx), Arc::clone(gy), gz.cloned()),
        );
        Ok(())
    }

    fn ams_set_coordinate_vectors(
        &mut self,
        solver: &AmsHandle,
        x: &SharedVector,
        y: &SharedVector,
        z: Option<&SharedVector>,
    ) -> BackendResult<()> {
        lookup_mut(&mut self.ams, "AMS", solver.id())?.inputs.coordinates =
            Some(EdgeGeometry::Coordinates(Arc::clone(x), Arc::clone(y), z.cloned()));
        Ok(())
    }

    fn ams_set_alpha_poisson_matrix(
        &mut self,
        solver: &AmsHandle,
        a_alpha: &SharedMatrix,
    ) -> BackendResult<()> {
        lookup_mut(&mut self.ams, "AMS", solver.id())?.inputs.alpha_poisson = Some(Arc::clone(a_alpha));
        Ok(())
    }

    fn ams_set_beta_poisson_matrix(
        &mut self,
        solver: &AmsHandle,
        a_beta: Option<&SharedMatrix>,
    ) -> BackendResult<()> {
        lookup_mut(&mut self.ams, "AMS", solver.id())?.inputs.beta_poisson = match a_beta {
            Some(m) => BetaPoisson::Given(Arc::clone(m)),
            None => BetaPoisson::Zero,
        };
        Ok(())
    }

    fn ams_setup(
        &mut self,
        solver: &AmsHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let state = lookup_mut(&mut self.ams, "AMS", solver.id())?;
        state.solver = Some(AmsSolver::setup(Arc::clone(a), &state.inputs, &state.params)?);
        state.stats = None;
        Ok(())
    }

    fn ams_solve(
        &mut self,
        solver: &AmsHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let state = lookup_mut(&mut self.ams, "AMS", solver.id())?;
        let ams = state
            .solver
            .as_ref()
            .ok_or_else(|| BackendError::invalid_argument("AMS solve called before setup"))?;
        let stats = ams.iterate(a, b, x, state.params.max_iter, state.params.tol);
        state.stats = Some(stats);
        if !stats.converged {
            return Err(BackendError::not_converged(
                "AMS",
                stats.iterations,
                stats.relative_residual,
                state.params.tol,
            ));
        }
        Ok(())
    }

    fn ams_num_iterations(&self, solver: &AmsHandle) -> BackendResult<usize> {
        let state = lookup(&self.ams, "AMS", solver.id())?;
        require_logging(state.params.logging, "AMS")?;
        Ok(require_stats(state.stats, "AMS")?.iterations)
    }

    fn ams_final_relative_residual(&self, solver: &AmsHandle) -> BackendResult<f64> {
        let state = lookup(&self.ams, "AMS", solver.id())?;
        require_logging(state.params.logging, "AMS")?;
        Ok(require_stats(state.stats, "AMS")?.relative_residual)
    }

    fn ams_destroy(&mut self, solver: AmsHandle) -> BackendResult<()> {
        self.ams
            .remove(&solver.id())
            .map(|_| debug!(id = solver.id(), "AMS destroy"))
            .ok_or_else(|| BackendError::invalid_handle("AMS", solver.id()))
    }
}

impl KrylovSolver for NativeBackend {
    fn pcg_create(&mut self) -> BackendResult<PcgHandle> {
        let id = self.mint();
        self.pcg.insert(id, PcgState::default());
        debug!(id, "PCG create");
        Ok(PcgHandle::from_raw(id))
    }

    fn pcg_configure(&mut self, solver: &PcgHandle, params: &PcgParams) -> BackendResult<()> {
        lookup_mut(&mut self.pcg, "PCG", solver.id())?.params = params.clone();
        Ok(())
    }

    fn pcg_set_preconditioner(
        &mut self,
        solver: &PcgHandle,
        precond: Preconditioner<'_>,
    ) -> BackendResult<()> {
        let binding = match precond {
            Preconditioner::BoomerAmg(h) => {
                lookup(&self.amg, "BoomerAMG", h.id())?;
                Binding::BoomerAmg(h.id())
            }
            Preconditioner::Ams(h) => {
                lookup(&self.ams, "AMS", h.id())?;
                Binding::Ams(h.id())
            }
            Preconditioner::DiagScale => Binding::DiagScale,
        };
        lookup_mut(&mut self.pcg, "PCG", solver.id())?.binding = binding;
        Ok(())
    }

    fn pcg_setup(
        &mut self,
        solver: &PcgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let binding = lookup(&self.pcg, "PCG", solver.id())?.binding;
        let diag_inverse = match binding {
            Binding::Identity => None,
            // The bound preconditioner's own setup entry point.
            Binding::BoomerAmg(id) => {
                self.amg_setup(&AmgHandle::from_raw(id), a, b, x)?;
                None
            }
            Binding::Ams(id) => {
                self.ams_setup(&AmsHandle::from_raw(id), a, b, x)?;
                None
            }
            Binding::DiagScale => {
                let diag = sparse::diagonal(a);
                if let Some(row) = diag.iter().position(|d| *d == 0.0) {
                    return Err(BackendError::invalid_argument(format!(
                        "diagonal scaling needs a nonzero diagonal, row {row} is zero"
                    )));
                }
                Some(diag.into_iter().map(|d| 1.0 / d).collect())
            }
        };
        let state = lookup_mut(&mut self.pcg, "PCG", solver.id())?;
        state.diag_inverse = diag_inverse;
        state.stats = None;
        Ok(())
    }

    fn pcg_solve(
        &mut self,
        solver: &PcgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()> {
        check_system(a, b, x)?;
        let state = lookup(&self.pcg, "PCG", solver.id())?;
        let outcome = match state.binding {
            Binding::Identity => pcg::solve(a, b, x, &state.params, |r| r.clone())?,
            Binding::BoomerAmg(id) => {
                let hierarchy = lookup(&self.amg, "BoomerAMG", id)?
                    .hierarchy
                    .as_ref()
                    .ok_or_else(|| BackendError::invalid_argument("BoomerAMG preconditioner not set up"))?;
                pcg::solve(a, b, x, &state.params, |r| hierarchy.precondition(r))?
            }
            Binding::Ams(id) => {
                let ams = lookup(&self.ams, "AMS", id)?
                    .solver
                    .as_ref()
                    .ok_or_else(|| BackendError::invalid_argument("AMS preconditioner not set up"))?;
                pcg::solve(a, b, x, &state.params, |r| ams.precondition(r))?
            }
            Binding::DiagScale => {
                let inverse = state
                    .diag_inverse
                    .as_ref()
                    .ok_or_else(|| BackendError::invalid_argument("diagonal scaling not set up"))?;
                pcg::solve(a, b, x, &state.params, |r| {
                    DVector::from_iterator(r.len(), r.iter().zip(inverse).map(|(ri, d)| ri * d))
                })?
            }
        };
        let tol = state.params.tol;
        lookup_mut(&mut self.pcg, "PCG", solver.id())?.stats = Some(outcome);
        if !outcome.converged {
            return Err(BackendError::not_converged(
                "PCG",
                outcome.iterations,
                outcome.relative_residual,
                tol,
            ));
        }
        Ok(())
    }

    fn pcg_num_iterations(&self, solver: &PcgHandle) -> BackendResult<usize> {
        let state = lookup(&self.pcg, "PCG", solver.id())?;
        require_logging(state.params.logging, "PCG")?;
        Ok(require_stats(state.stats, "PCG")?.iterations)
    }

    fn pcg_final_relative_residual(&self, solver: &PcgHandle) -> BackendResult<f64> {
        let state = lookup(&self.pcg, "PCG", solver.id())?;
        require_logging(state.params.logging, "PCG")?;
        Ok(require_stats(state.stats, "PCG")?.relative_residual)
    }

    fn pcg_destroy(&mut self, solver: PcgHandle) -> BackendResult<()> {
        self.pcg
            .remove(&solver.id())
            .map(|_| debug!(id = solver.id(), "PCG destroy"))
            .ok_or_else(|| BackendError::invalid_handle("PCG", solver.id()))
    }
}

impl EigenSolver for NativeBackend {
    fn ame_create(&mut self) -> BackendResult<AmeHandle> {
        let id = self.mint();
        self.ame.insert(id, AmeState::default());
        debug!(id, "AME create");
        Ok(AmeHandle::from_raw(id))
    }

    fn ame_configure(&mut self, solver: &AmeHandle, params: &AmeParams) -> BackendResult<()> {
        lookup_mut(&mut self.ame, "AME", solver.id())?.params = params.clone();
        Ok(())
    }

    fn ame_set_ams_solver(&mut self, solver: &AmeHandle, ams: &AmsHandle) -> BackendResult<()> {
        lookup(&self.ams, "AMS", ams.id())?;
        lookup_mut(&mut self.ame, "AME", solver.id())?.ams = Some(ams.id());
        Ok(())
    }

    fn ame_set_mass_matrix(&mut self, solver: &AmeHandle, m: &SharedMatrix) -> BackendResult<()> {
        lookup_mut(&mut self.ame, "AME", solver.id())?.mass = Some(Arc::clone(m));
        Ok(())
    }

    fn ame_setup(&mut self, solver: &AmeHandle) -> BackendResult<()> {
        let state = lookup(&self.ame, "AME", solver.id())?;
        let ams_id = state
            .ams
            .ok_or_else(|| BackendError::invalid_argument("AME needs an AMS solver"))?;
        let mass = state
            .mass
            .clone()
            .ok_or_else(|| BackendError::invalid_argument("AME needs a mass matrix"))?;
        let ams_state = lookup(&self.ams, "AMS", ams_id)?;
        let system = ams_state
            .solver
            .as_ref()
            .ok_or_else(|| BackendError::invalid_argument("AMS solver must be set up before AME"))?
            .system();
        if mass.nrows() != system.nrows() || mass.ncols() != system.ncols() {
            return Err(BackendError::invalid_argument(format!(
                "mass matrix is {}x{}, system is {}x{}",
                mass.nrows(),
                mass.ncols(),
                system.nrows(),
                system.ncols()
            )));
        }
        let g = ams_state
            .inputs
            .gradient
            .clone()
            .ok_or_else(|| BackendError::invalid_argument("AME needs the discrete gradient"))?;
        let projector = GradientProjector::new(g, &mass)?;
        let state = lookup_mut(&mut self.ame, "AME", solver.id())?;
        state.projector = Some(projector);
        state.outcome = None;
        Ok(())
    }

    fn ame_solve(&mut self, solver: &AmeHandle) -> BackendResult<()> {
        let state = lookup(&self.ame, "AME", solver.id())?;
        let (Some(ams_id), Some(mass), Some(projector)) =
            (state.ams, state.mass.as_ref(), state.projector.as_ref())
        else {
            return Err(BackendError::invalid_argument("AME solve called before setup"));
        };
        let ams = lookup(&self.ams, "AMS", ams_id)?
            .solver
            .as_ref()
            .ok_or_else(|| BackendError::invalid_argument("AMS solver is not set up"))?;
        let outcome = ame::lobpcg(ams.system(), mass, projector, &state.params, |r| {
            ams.precondition(r)
        })?;
        let converged = outcome.converged;
        let (iterations, worst, tol) = (
            outcome.iterations,
            outcome.residual_norms.iter().fold(0.0f64, |m, r| m.max(*r)),
            state.params.tol,
        );
        lookup_mut(&mut self.ame, "AME", solver.id())?.outcome = Some(outcome);
        if !converged {
            return Err(BackendError::not_converged("AME", iterations, worst, tol));
        }
        Ok(())
    }

    fn ame_eigenvalues(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>> {
        let state = lookup(&self.ame, "AME", solver.id())?;
        state
            .outcome
            .as_ref()
            .map(|o| o.eigenvalues.clone())
            .ok_or_else(|| BackendError::invalid_argument("AME has not been solved"))
    }

    fn ame_residual_norms(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>> {
        let state = lookup(&self.ame, "AME", solver.id())?;
        state
            .outcome
            .as_ref()
            .map(|o| o.residual_norms.clone())
            .ok_or_else(|| BackendError::invalid_argument("AME has not been solved"))
    }

    fn ame_num_iterations(&self, solver: &AmeHandle) -> BackendResult<usize> {
        let state = lookup(&self.ame, "AME", solver.id())?;
        state
            .outcome
            .as_ref()
            .map(|o| o.iterations)
            .ok_or_else(|| BackendError::invalid_argument("AME has not been solved"))
    }

    fn ame_destroy(&mut self, solver: AmeHandle) -> BackendResult<()> {
        self.ame
            .remove(&solver.id())
            .map(|_| debug!(id = solver.id(), "AME destroy"))
            .ok_or_else(|| BackendError::invalid_handle("AME", solver.id()))
    }
}

impl SolverBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn live_handles(&self) -> usize {
        self.amg.len() + self.ams.len() + self.pcg.len() + self.ame.len()
    }
}
