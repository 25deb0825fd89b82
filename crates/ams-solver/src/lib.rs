//! Solver selection and orchestration for Maxwell curl-curl systems.
//!
//! A [`StrategyDescriptor`] names one of six solver families and its
//! tuning knobs; a [`ProblemBundle`] holds the operators of one linear
//! system. The [`Harness`] validates the pair, builds the family's solver
//! handles through a [`SolverBackend`], runs setup and solve with timing,
//! and destroys every handle before returning.

pub mod backend;
pub mod builder;
pub mod bundle;
pub mod descriptor;
pub mod error;
pub mod group;
pub mod harness;
pub mod problems;
pub mod runner;
pub mod timing;

pub use backend::{
    default_backend, BackendError, BackendErrorKind, NativeBackend, Preconditioner, SolverBackend,
};
pub use builder::{ConstructedStrategy, StrategyBuilder, StrategyPlan};
pub use bundle::{GeometricData, PoissonMatrices, ProblemBundle, VectorTriple};
pub use descriptor::{StrategyDescriptor, StrategyFamily};
pub use error::{ConfigError, HarnessError, Result};
pub use group::ProcessGroup;
pub use harness::{Harness, RunReport};
pub use runner::{Diagnostics, PhaseCapability, PhaseOutcome, PhaseRunner, PhaseState};
pub use timing::{PhaseTimer, PhaseTiming};
