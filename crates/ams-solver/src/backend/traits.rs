//! Backend trait definitions for the solver families driven by the harness.
//!
//! Each family exposes the same handle life cycle: `create`, `configure`,
//! `setup`, `solve`, diagnostics getters and `destroy`. Handles are opaque
//! and move into `destroy`, so a destroyed handle cannot be used again.
//! All calls are collective across the process group: every process must
//! issue the same calls in the same order.

use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use thiserror::Error;

use super::handles::{AmeHandle, AmgHandle, AmsHandle, PcgHandle};
use super::params::{AmeParams, AmgParams, AmsParams, PcgParams};

/// Read-only sparse operator shared between the bundle and backend handles.
pub type SharedMatrix = Arc<CsrMatrix<f64>>;

/// Read-only dense vector shared between the bundle and backend handles.
pub type SharedVector = Arc<DVector<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Generic,
    InvalidArgument,
    InvalidHandle,
    Unsupported,
    NotConverged,
}

impl BackendErrorKind {
    /// Numeric error flag reported to the user after teardown.
    pub fn code(self) -> i32 {
        match self {
            BackendErrorKind::Generic => 1,
            BackendErrorKind::InvalidArgument => 3,
            BackendErrorKind::InvalidHandle => 4,
            BackendErrorKind::Unsupported => 5,
            BackendErrorKind::NotConverged => 256,
        }
    }
}

/// Error type for backend operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (error flag {})", kind.code())]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidArgument, message)
    }

    pub fn invalid_handle(family: &str, id: u64) -> Self {
        Self::new(
            BackendErrorKind::InvalidHandle,
            format!("no live {family} handle with id {id}"),
        )
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unsupported, message)
    }

    pub fn not_converged(solver: &str, iterations: usize, residual: f64, tol: f64) -> Self {
        Self::new(
            BackendErrorKind::NotConverged,
            format!(
                "{solver} did not converge after {iterations} iterations (residual={residual:.2e}, tol={tol:.2e})"
            ),
        )
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError::new(BackendErrorKind::Generic, s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError::new(BackendErrorKind::Generic, s)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Preconditioner bound to a Krylov solver.
///
/// The variant selects the setup and solve entry points the Krylov solver
/// calls; the handle (if any) is the state those entry points operate on.
#[derive(Debug, Clone, Copy)]
pub enum Preconditioner<'h> {
    BoomerAmg(&'h AmgHandle),
    Ams(&'h AmsHandle),
    DiagScale,
}

/// Algebraic multigrid used standalone or as a preconditioner.
pub trait MultigridSolver {
    fn amg_create(&mut self) -> BackendResult<AmgHandle>;
    fn amg_configure(&mut self, solver: &AmgHandle, params: &AmgParams) -> BackendResult<()>;
    fn amg_setup(
        &mut self,
        solver: &AmgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()>;
    fn amg_solve(
        &mut self,
        solver: &AmgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()>;
    fn amg_num_iterations(&self, solver: &AmgHandle) -> BackendResult<usize>;
    fn amg_final_relative_residual(&self, solver: &AmgHandle) -> BackendResult<f64>;
    fn amg_destroy(&mut self, solver: AmgHandle) -> BackendResult<()>;
}

/// Auxiliary-space Maxwell solver for curl-curl systems.
pub trait CurlSolver {
    fn ams_create(&mut self) -> BackendResult<AmsHandle>;
    fn ams_configure(&mut self, solver: &AmsHandle, params: &AmsParams) -> BackendResult<()>;
    fn ams_set_discrete_gradient(&mut self, solver: &AmsHandle, g: &SharedMatrix)
    -> BackendResult<()>;
    fn ams_set_edge_constant_vectors(
        &mut self,
        solver: &AmsHandle,
        gx: &SharedVector,
        gy: &SharedVector,
        gz: Option<&SharedVector>,
    ) -> BackendResult<()>;
    fn ams_set_coordinate_vectors(
        &mut self,
        solver: &AmsHandle,
        x: &SharedVector,
        y: &SharedVector,
        z: Option<&SharedVector>,
    ) -> BackendResult<()>;
    fn ams_set_alpha_poisson_matrix(
        &mut self,
        solver: &AmsHandle,
        a_alpha: &SharedMatrix,
    ) -> BackendResult<()>;
    /// `None` marks the beta coefficient as zero: the gradient correction is skipped.
    fn ams_set_beta_poisson_matrix(
        &mut self,
        solver: &AmsHandle,
        a_beta: Option<&SharedMatrix>,
    ) -> BackendResult<()>;
    fn ams_setup(
        &mut self,
        solver: &AmsHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()>;
    fn ams_solve(
        &mut self,
        solver: &AmsHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()>;
    fn ams_num_iterations(&self, solver: &AmsHandle) -> BackendResult<usize>;
    fn ams_final_relative_residual(&self, solver: &AmsHandle) -> BackendResult<f64>;
    fn ams_destroy(&mut self, solver: AmsHandle) -> BackendResult<()>;
}

/// Preconditioned conjugate gradient.
pub trait KrylovSolver {
    fn pcg_create(&mut self) -> BackendResult<PcgHandle>;
    fn pcg_configure(&mut self, solver: &PcgHandle, params: &PcgParams) -> BackendResult<()>;
    fn pcg_set_preconditioner(
        &mut self,
        solver: &PcgHandle,
        precond: Preconditioner<'_>,
    ) -> BackendResult<()>;
    fn pcg_setup(
        &mut self,
        solver: &PcgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &DVector<f64>,
    ) -> BackendResult<()>;
    fn pcg_solve(
        &mut self,
        solver: &PcgHandle,
        a: &SharedMatrix,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
    ) -> BackendResult<()>;
    fn pcg_num_iterations(&self, solver: &PcgHandle) -> BackendResult<usize>;
    fn pcg_final_relative_residual(&self, solver: &PcgHandle) -> BackendResult<f64>;
    fn pcg_destroy(&mut self, solver: PcgHandle) -> BackendResult<()>;
}

/// Generalized eigensolver for K * phi = lambda * M * phi on curl-curl operators.
///
/// The system matrix is taken from the AMS solver handed in with
/// [`EigenSolver::ame_set_ams_solver`], which must already be set up.
pub trait EigenSolver {
    fn ame_create(&mut self) -> BackendResult<AmeHandle>;
    fn ame_configure(&mut self, solver: &AmeHandle, params: &AmeParams) -> BackendResult<()>;
    fn ame_set_ams_solver(&mut self, solver: &AmeHandle, ams: &AmsHandle) -> BackendResult<()>;
    fn ame_set_mass_matrix(&mut self, solver: &AmeHandle, m: &SharedMatrix) -> BackendResult<()>;
    fn ame_setup(&mut self, solver: &AmeHandle) -> BackendResult<()>;
    fn ame_solve(&mut self, solver: &AmeHandle) -> BackendResult<()>;
    fn ame_eigenvalues(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>>;
    fn ame_residual_norms(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>>;
    fn ame_num_iterations(&self, solver: &AmeHandle) -> BackendResult<usize>;
    fn ame_destroy(&mut self, solver: AmeHandle) -> BackendResult<()>;
}

/// Combined backend providing every solver family.
pub trait SolverBackend: MultigridSolver + CurlSolver + KrylovSolver + EigenSolver {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;

    /// Number of handles created and not yet destroyed.
    fn live_handles(&self) -> usize;
}
