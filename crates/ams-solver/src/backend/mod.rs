//! Numerical backend abstraction layer.
//!
//! The harness drives solver families through opaque handles exposed by
//! the traits in [`traits`]; it never touches the numerics directly. The
//! actual work is dispatched to a concrete backend at runtime.
//!
//! # Architecture
//!
//! ```text
//! StrategyBuilder / PhaseRunner
//!         │  create / configure / setup / solve / destroy
//!         ▼
//! Backend Trait Layer (MultigridSolver, CurlSolver, KrylovSolver, EigenSolver)
//!         │
//!         ▼
//!   NativeBackend (nalgebra-sparse + rayon)
//! ```

pub mod handles;
pub mod native;
pub mod params;
pub mod traits;

pub use handles::{release_all, AmeHandle, AmgHandle, AmsHandle, AnyHandle, HandleId, PcgHandle};
pub use native::NativeBackend;
pub use params::*;
pub use traits::*;

/// Returns the default solver backend.
pub fn default_backend() -> Box<dyn SolverBackend> {
    Box::new(NativeBackend::new())
}
