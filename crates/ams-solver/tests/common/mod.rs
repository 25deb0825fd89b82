//! Shared fixtures for the harness integration tests.

#![allow(dead_code)]

use std::cell::RefCell;

use ams_solver::backend::{
    AmeHandle, AmeParams, AmgHandle, AmgParams, AmsHandle, AmsParams, BackendError,
    BackendErrorKind, BackendResult, CurlSolver, EigenSolver, KrylovSolver, MultigridSolver,
    PcgHandle, PcgParams, Preconditioner, SharedMatrix, SharedVector, SolverBackend,
};
use ams_solver::{NativeBackend, StrategyDescriptor, StrategyFamily};
use nalgebra::DVector;

/// Native backend wrapper that records every call and can fail one of them.
pub struct RecordingBackend {
    inner: NativeBackend,
    calls: RefCell<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            inner: NativeBackend::new(),
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Makes the named operation (e.g. `"pcg_create"`) fail every time.
    pub fn failing_on(op: &'static str) -> Self {
        Self {
            fail_on: Some(op),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, suffix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.ends_with(suffix)).count()
    }

    pub fn creates(&self) -> usize {
        self.count("_create")
    }

    pub fn destroys(&self) -> usize {
        self.count("_destroy")
    }

    pub fn called(&self, op: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == op)
    }

    /// Failed calls are recorded as `"<op> (failed)"`.
    fn record(&self, op: &str) -> BackendResult<()> {
        if self.fail_on == Some(op) {
            self.calls.borrow_mut().push(format!("{op} (failed)"));
            return Err(BackendError::new(BackendErrorKind::Generic, format!("injected failure in {op}")));
        }
        self.calls.borrow_mut().push(op.to_string());
        Ok(())
    }
}

impl MultigridSolver for RecordingBackend {
    fn amg_create(&mut self) -> BackendResult<AmgHandle> {
        self.record("amg_create")?;
        self.inner.amg_create()
    }
    fn amg_configure(&mut self, solver: &AmgHandle, params: &AmgParams) -> BackendResult<()> {
        self.record("amg_configure")?;
        self.inner.amg_configure(solver, params)
    }
    fn amg_setup(&mut self, solver: &AmgHandle, a: &SharedMatrix, b: &DVector<f64>, x: &DVector<f64>) -> BackendResult<()> {
        self.record("amg_setup")?;
        self.inner.amg_setup(solver, a, b, x)
    }
    fn amg_solve(&mut self, solver: &AmgHandle, a: &SharedMatrix, b: &DVector<f64>, x: &mut DVector<f64>) -> BackendResult<()> {
        self.record("amg_solve")?;
        self.inner.amg_solve(solver, a, b, x)
    }
    fn amg_num_iterations(&self, solver: &AmgHandle) -> BackendResult<usize> {
        self.record("amg_num_iterations")?;
        self.inner.amg_num_iterations(solver)
    }
    fn amg_final_relative_residual(&self, solver: &AmgHandle) -> BackendResult<f64> {
        self.record("amg_final_relative_residual")?;
        self.inner.amg_final_relative_residual(solver)
    }
    fn amg_destroy(&mut self, solver: AmgHandle) -> BackendResult<()> {
        self.record("amg_destroy")?;
        self.inner.amg_destroy(solver)
    }
}

impl CurlSolver for RecordingBackend {
    fn ams_create(&mut self) -> BackendResult<AmsHandle> {
        self.record("ams_create")?;
        self.inner.ams_create()
    }
    fn ams_configure(&mut self, solver: &AmsHandle, params: &AmsParams) -> BackendResult<()> {
        self.record("ams_configure")?;
        self.inner.ams_configure(solver, params)
    }
    fn ams_set_discrete_gradient(&mut self, solver: &AmsHandle, g: &SharedMatrix) -> BackendResult<()> {
        self.record("ams_set_discrete_gradient")?;
        self.inner.ams_set_discrete_gradient(solver, g)
    }
    fn ams_set_edge_constant_vectors(
        &mut self,
        solver: &AmsHandle,
        gx: &SharedVector,
        gy: &SharedVector,
        gz: Option<&SharedVector>,
    ) -> BackendResult<()> {
        self.record("ams_set_edge_constant_vectors")?;
        self.inner.ams_set_edge_constant_vectors(solver, gx, gy, gz)
    }
    fn ams_set_coordinate_vectors(
        &mut self,
        solver: &AmsHandle,
        x: &SharedVector,
        y: &SharedVector,
        z: Option<&SharedVector>,
    ) -> BackendResult<()> {
        self.record("ams_set_coordinate_vectors")?;
        self.inner.ams_set_coordinate_vectors(solver, x, y, z)
    }
    fn ams_set_alpha_poisson_matrix(&mut self, solver: &AmsHandle, a_alpha: &SharedMatrix) -> BackendResult<()> {
        self.record("ams_set_alpha_poisson_matrix")?;
        self.inner.ams_set_alpha_poisson_matrix(solver, a_alpha)
    }
    fn ams_set_beta_poisson_matrix(&mut self, solver: &AmsHandle, a_beta: Option<&SharedMatrix>) -> BackendResult<()> {
        let op = if a_beta.is_some() {
            "ams_set_beta_poisson_matrix(Some)"
        } else {
            "ams_set_beta_poisson_matrix(None)"
        };
        self.record(op)?;
        self.inner.ams_set_beta_poisson_matrix(solver, a_beta)
    }
    fn ams_setup(&mut self, solver: &AmsHandle, a: &SharedMatrix, b: &DVector<f64>, x: &DVector<f64>) -> BackendResult<()> {
        self.record("ams_setup")?;
        self.inner.ams_setup(solver, a, b, x)
    }
    fn ams_solve(&mut self, solver: &AmsHandle, a: &SharedMatrix, b: &DVector<f64>, x: &mut DVector<f64>) -> BackendResult<()> {
        self.record("ams_solve")?;
        self.inner.ams_solve(solver, a, b, x)
    }
    fn ams_num_iterations(&self, solver: &AmsHandle) -> BackendResult<usize> {
        self.record("ams_num_iterations")?;
        self.inner.ams_num_iterations(solver)
    }
    fn ams_final_relative_residual(&self, solver: &AmsHandle) -> BackendResult<f64> {
        self.record("ams_final_relative_residual")?;
        self.inner.ams_final_relative_residual(solver)
    }
    fn ams_destroy(&mut self, solver: AmsHandle) -> BackendResult<()> {
        self.record("ams_destroy")?;
        self.inner.ams_destroy(solver)
    }
}

impl KrylovSolver for RecordingBackend {
    fn pcg_create(&mut self) -> BackendResult<PcgHandle> {
        self.record("pcg_create")?;
        self.inner.pcg_create()
    }
    fn pcg_configure(&mut self, solver: &PcgHandle, params: &PcgParams) -> BackendResult<()> {
        self.record("pcg_configure")?;
        self.inner.pcg_configure(solver, params)
    }
    fn pcg_set_preconditioner(&mut self, solver: &PcgHandle, precond: Preconditioner<'_>) -> BackendResult<()> {
        self.record("pcg_set_preconditioner")?;
        self.inner.pcg_set_preconditioner(solver, precond)
    }
    fn pcg_setup(&mut self, solver: &PcgHandle, a: &SharedMatrix, b: &DVector<f64>, x: &DVector<f64>) -> BackendResult<()> {
        self.record("pcg_setup")?;
        self.inner.pcg_setup(solver, a, b, x)
    }
    fn pcg_solve(&mut self, solver: &PcgHandle, a: &SharedMatrix, b: &DVector<f64>, x: &mut DVector<f64>) -> BackendResult<()> {
        self.record("pcg_solve")?;
        self.inner.pcg_solve(solver, a, b, x)
    }
    fn pcg_num_iterations(&self, solver: &PcgHandle) -> BackendResult<usize> {
        self.record("pcg_num_iterations")?;
        self.inner.pcg_num_iterations(solver)
    }
    fn pcg_final_relative_residual(&self, solver: &PcgHandle) -> BackendResult<f64> {
        self.record("pcg_final_relative_residual")?;
        self.inner.pcg_final_relative_residual(solver)
    }
    fn pcg_destroy(&mut self, solver: PcgHandle) -> BackendResult<()> {
        self.record("pcg_destroy")?;
        self.inner.pcg_destroy(solver)
    }
}

impl EigenSolver for RecordingBackend {
    fn ame_create(&mut self) -> BackendResult<AmeHandle> {
        self.record("ame_create")?;
        self.inner.ame_create()
    }
    fn ame_configure(&mut self, solver: &AmeHandle, params: &AmeParams) -> BackendResult<()> {
        self.record("ame_configure")?;
        self.inner.ame_configure(solver, params)
    }
    fn ame_set_ams_solver(&mut self, solver: &AmeHandle, ams: &AmsHandle) -> BackendResult<()> {
        self.record("ame_set_ams_solver")?;
        self.inner.ame_set_ams_solver(solver, ams)
    }
    fn ame_set_mass_matrix(&mut self, solver: &AmeHandle, m: &SharedMatrix) -> BackendResult<()> {
        self.record("ame_set_mass_matrix")?;
        self.inner.ame_set_mass_matrix(solver, m)
    }
    fn ame_setup(&mut self, solver: &AmeHandle) -> BackendResult<()> {
        self.record("ame_setup")?;
        self.inner.ame_setup(solver)
    }
    fn ame_solve(&mut self, solver: &AmeHandle) -> BackendResult<()> {
        self.record("ame_solve")?;
        self.inner.ame_solve(solver)
    }
    fn ame_eigenvalues(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>> {
        self.record("ame_eigenvalues")?;
        self.inner.ame_eigenvalues(solver)
    }
    fn ame_residual_norms(&self, solver: &AmeHandle) -> BackendResult<Vec<f64>> {
        self.record("ame_residual_norms")?;
        self.inner.ame_residual_norms(solver)
    }
    fn ame_num_iterations(&self, solver: &AmeHandle) -> BackendResult<usize> {
        self.record("ame_num_iterations")?;
        self.inner.ame_num_iterations(solver)
    }
    fn ame_destroy(&mut self, solver: AmeHandle) -> BackendResult<()> {
        self.record("ame_destroy")?;
        self.inner.ame_destroy(solver)
    }
}

impl SolverBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn live_handles(&self) -> usize {
        self.inner.live_handles()
    }
}

/// Descriptor for the 2-D edge problems used across the tests.
pub fn descriptor_2d(family: StrategyFamily) -> StrategyDescriptor {
    StrategyDescriptor {
        dimension: 2,
        max_iterations: 200,
        block_size: 3,
        ..StrategyDescriptor::for_family(family)
    }
}
