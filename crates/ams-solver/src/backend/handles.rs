//! Opaque solver handles.
//!
//! Handles are plain ids minted by a backend. They are deliberately neither
//! `Clone` nor `Copy`: exactly one owner exists at a time, and destroying a
//! handle consumes it. Ownership moves from the strategy builder to the
//! harness, which releases everything in reverse creation order.

use tracing::warn;

use super::traits::{BackendError, SolverBackend};

pub type HandleId = u64;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        pub struct $name(HandleId);

        impl $name {
            /// Wraps a backend-issued id. Only backends should mint handles.
            pub fn from_raw(id: HandleId) -> Self {
                Self(id)
            }

            pub fn id(&self) -> HandleId {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// Algebraic multigrid solver or preconditioner.
    AmgHandle
);
opaque_handle!(
    /// Auxiliary-space Maxwell solver or preconditioner.
    AmsHandle
);
opaque_handle!(
    /// Preconditioned conjugate gradient solver.
    PcgHandle
);
opaque_handle!(
    /// Auxiliary-space Maxwell eigensolver.
    AmeHandle
);

/// Any handle, for uniform teardown.
#[derive(Debug)]
pub enum AnyHandle {
    Amg(AmgHandle),
    Ams(AmsHandle),
    Pcg(PcgHandle),
    Ame(AmeHandle),
}

impl AnyHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyHandle::Amg(_) => "BoomerAMG",
            AnyHandle::Ams(_) => "AMS",
            AnyHandle::Pcg(_) => "PCG",
            AnyHandle::Ame(_) => "AME",
        }
    }

    pub fn destroy(self, backend: &mut dyn SolverBackend) -> Result<(), BackendError> {
        match self {
            AnyHandle::Amg(h) => backend.amg_destroy(h),
            AnyHandle::Ams(h) => backend.ams_destroy(h),
            AnyHandle::Pcg(h) => backend.pcg_destroy(h),
            AnyHandle::Ame(h) => backend.ame_destroy(h),
        }
    }
}

/// Destroys `handles` in reverse order, attempting every destroy even after
/// a failure. Returns the first failure.
pub fn release_all(
    backend: &mut dyn SolverBackend,
    handles: Vec<AnyHandle>,
) -> Result<(), BackendError> {
    let mut first_error = None;
    for handle in handles.into_iter().rev() {
        let kind = handle.kind();
        if let Err(err) = handle.destroy(backend) {
            warn!(handle = kind, error = %err, "failed to destroy solver handle");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
