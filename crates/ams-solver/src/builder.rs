//! Strategy construction.
//!
//! [`StrategyBuilder::build`] turns a descriptor and a problem bundle into a
//! [`ConstructedStrategy`]: the handles of exactly one solver family, fully
//! configured and with the preconditioner bound. All precondition checks run
//! in [`StrategyBuilder::validate`] before the first backend call, so a
//! configuration error never leaves a handle behind.

use tracing::{debug, warn};

use crate::backend::{
    AmeHandle, AmgHandle, AmsHandle, AmsParams, AnyHandle, BackendError, BackendResult, PcgHandle,
    Preconditioner, SharedMatrix, SharedVector, SolverBackend, release_all,
};
use crate::bundle::{GeometricData, PoissonMatrices, ProblemBundle, VectorTriple};
use crate::descriptor::{StrategyDescriptor, StrategyFamily};
use crate::error::{ConfigError, HarnessError, Result};

/// Handles of one constructed strategy.
///
/// Only the handles the family uses exist. Where a preconditioner or a
/// subordinate curl solver is present it was created first.
#[derive(Debug)]
pub enum ConstructedStrategy {
    Multigrid { amg: AmgHandle },
    MultigridKrylov { pcg: PcgHandle, amg: AmgHandle },
    CurlSolver { ams: AmsHandle },
    CurlKrylov { pcg: PcgHandle, ams: AmsHandle },
    DiagScaleKrylov { pcg: PcgHandle },
    Eigen { ame: AmeHandle, ams: AmsHandle },
}

impl ConstructedStrategy {
    pub fn family(&self) -> StrategyFamily {
        match self {
            ConstructedStrategy::Multigrid { .. } => StrategyFamily::PlainMultigrid,
            ConstructedStrategy::MultigridKrylov { .. } => StrategyFamily::MultigridPreconditionedKrylov,
            ConstructedStrategy::CurlSolver { .. } => StrategyFamily::StandaloneCurlSolver,
            ConstructedStrategy::CurlKrylov { .. } => StrategyFamily::CurlPreconditionedKrylov,
            ConstructedStrategy::DiagScaleKrylov { .. } => StrategyFamily::DiagScalePreconditionedKrylov,
            ConstructedStrategy::Eigen { .. } => StrategyFamily::GeneralizedEigensolver,
        }
    }

    pub fn handle_count(&self) -> usize {
        match self {
            ConstructedStrategy::Multigrid { .. }
            | ConstructedStrategy::CurlSolver { .. }
            | ConstructedStrategy::DiagScaleKrylov { .. } => 1,
            _ => 2,
        }
    }

    /// Handles in creation order. Release them with [`release_all`], which
    /// walks the list backwards.
    pub fn into_handles(self) -> Vec<AnyHandle> {
        match self {
            ConstructedStrategy::Multigrid { amg } => vec![AnyHandle::Amg(amg)],
            ConstructedStrategy::MultigridKrylov { pcg, amg } => {
                vec![AnyHandle::Amg(amg), AnyHandle::Pcg(pcg)]
            }
            ConstructedStrategy::CurlSolver { ams } => vec![AnyHandle::Ams(ams)],
            ConstructedStrategy::CurlKrylov { pcg, ams } => {
                vec![AnyHandle::Ams(ams), AnyHandle::Pcg(pcg)]
            }
            ConstructedStrategy::DiagScaleKrylov { pcg } => vec![AnyHandle::Pcg(pcg)],
            ConstructedStrategy::Eigen { ame, ams } => vec![AnyHandle::Ams(ams), AnyHandle::Ame(ame)],
        }
    }
}

/// Geometric data selected for the curl solver.
#[derive(Debug, Clone, Copy)]
pub enum GeometrySource<'b> {
    EdgeConstant {
        x: &'b SharedVector,
        y: &'b SharedVector,
        z: Option<&'b SharedVector>,
    },
    Coordinates {
        x: &'b SharedVector,
        y: &'b SharedVector,
        z: Option<&'b SharedVector>,
    },
}

/// What the curl solver is told about the beta Poisson matrix.
#[derive(Debug, Clone, Copy)]
pub enum BetaSetting<'b> {
    /// Nothing is passed; the solver forms its own gradient-space operator.
    Unset,
    Given(&'b SharedMatrix),
    /// Explicitly absent: the gradient correction is skipped.
    Absent,
}

/// Auxiliary data handed to a curl solver.
#[derive(Debug, Clone, Copy)]
pub struct CurlInputs<'b> {
    pub gradient: &'b SharedMatrix,
    pub geometry: GeometrySource<'b>,
    pub alpha: Option<&'b SharedMatrix>,
    pub beta: BetaSetting<'b>,
}

/// A validated descriptor and bundle pairing. Every reference points into
/// the bundle.
#[derive(Debug, Clone, Copy)]
pub struct StrategyPlan<'b> {
    pub family: StrategyFamily,
    pub curl: Option<CurlInputs<'b>>,
    pub mass: Option<&'b SharedMatrix>,
}

pub struct StrategyBuilder<'a> {
    backend: &'a mut dyn SolverBackend,
}

impl<'a> StrategyBuilder<'a> {
    pub fn new(backend: &'a mut dyn SolverBackend) -> Self {
        Self { backend }
    }

    /// Checks the descriptor against the bundle. Issues no backend call.
    pub fn validate<'b>(
        descriptor: &StrategyDescriptor,
        bundle: &'b ProblemBundle,
    ) -> std::result::Result<StrategyPlan<'b>, ConfigError> {
        let family = descriptor.family()?;
        bundle.check_shapes()?;

        if descriptor.max_iterations == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_iterations",
                reason: "must be at least 1".into(),
            });
        }
        if descriptor.tolerance.is_nan() || descriptor.tolerance < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "tolerance",
                reason: format!("{} is not a non-negative number", descriptor.tolerance),
            });
        }

        let curl = if family.is_curl_aware() {
            Some(curl_inputs(family, descriptor, bundle)?)
        } else {
            None
        };

        let mass = if family.needs_mass_matrix() {
            if descriptor.block_size == 0 {
                return Err(ConfigError::InvalidParameter {
                    name: "block_size",
                    reason: "at least one eigenpair must be requested".into(),
                });
            }
            Some(bundle.mass_matrix().ok_or(ConfigError::MissingData {
                family: family.label(),
                what: "a mass matrix",
            })?)
        } else {
            None
        };

        Ok(StrategyPlan { family, curl, mass })
    }

    /// Validates, creates and configures the strategy selected by `descriptor`.
    ///
    /// On a backend failure every handle created so far is destroyed before
    /// the error is returned.
    pub fn build(
        &mut self,
        descriptor: &StrategyDescriptor,
        bundle: &ProblemBundle,
    ) -> Result<ConstructedStrategy> {
        let plan = Self::validate(descriptor, bundle)?;
        let label = plan.family.label();

        let strategy = self
            .create(plan.family)
            .map_err(|err| HarnessError::backend(format!("{label} Create"), err))?;
        debug!(family = label, handles = strategy.handle_count(), "created solver handles");

        if let Err(err) = self.configure(&strategy, descriptor, &plan) {
            // The configure error is the one reported; cleanup failures are logged.
            let _ = release_all(&mut *self.backend, strategy.into_handles());
            return Err(HarnessError::backend(format!("{label} Configure"), err));
        }
        Ok(strategy)
    }

    fn create(&mut self, family: StrategyFamily) -> BackendResult<ConstructedStrategy> {
        let backend = &mut *self.backend;
        Ok(match family {
            StrategyFamily::PlainMultigrid => ConstructedStrategy::Multigrid {
                amg: backend.amg_create()?,
            },
            StrategyFamily::MultigridPreconditionedKrylov => {
                let amg = backend.amg_create()?;
                let (amg, pcg) = create_second(backend, amg, AnyHandle::Amg, |b| b.pcg_create())?;
                ConstructedStrategy::MultigridKrylov { pcg, amg }
            }
            StrategyFamily::StandaloneCurlSolver => ConstructedStrategy::CurlSolver {
                ams: backend.ams_create()?,
            },
            StrategyFamily::CurlPreconditionedKrylov => {
                let ams = backend.ams_create()?;
                let (ams, pcg) = create_second(backend, ams, AnyHandle::Ams, |b| b.pcg_create())?;
                ConstructedStrategy::CurlKrylov { pcg, ams }
            }
            StrategyFamily::DiagScalePreconditionedKrylov => ConstructedStrategy::DiagScaleKrylov {
                pcg: backend.pcg_create()?,
            },
            StrategyFamily::GeneralizedEigensolver => {
                let ams = backend.ams_create()?;
                let (ams, ame) = create_second(backend, ams, AnyHandle::Ams, |b| b.ame_create())?;
                ConstructedStrategy::Eigen { ame, ams }
            }
        })
    }

    fn configure(
        &mut self,
        strategy: &ConstructedStrategy,
        descriptor: &StrategyDescriptor,
        plan: &StrategyPlan<'_>,
    ) -> BackendResult<()> {
        let backend = &mut *self.backend;
        let curl = |family: StrategyFamily| {
            plan.curl.ok_or_else(|| {
                BackendError::invalid_argument(format!(
                    "{family} planned without curl inputs"
                ))
            })
        };

        match strategy {
            ConstructedStrategy::Multigrid { amg } => {
                backend.amg_configure(amg, &descriptor.amg_params())
            }
            ConstructedStrategy::MultigridKrylov { pcg, amg } => {
                backend.amg_configure(amg, &descriptor.amg_params().as_preconditioner())?;
                backend.pcg_configure(pcg, &descriptor.pcg_params())?;
                backend.pcg_set_preconditioner(pcg, Preconditioner::BoomerAmg(amg))
            }
            ConstructedStrategy::CurlSolver { ams } => {
                let inputs = curl(plan.family)?;
                configure_curl(backend, ams, &descriptor.ams_params(), &inputs)
            }
            ConstructedStrategy::CurlKrylov { pcg, ams } => {
                let inputs = curl(plan.family)?;
                configure_curl(backend, ams, &descriptor.ams_params().as_preconditioner(), &inputs)?;
                backend.pcg_configure(pcg, &descriptor.pcg_params())?;
                backend.pcg_set_preconditioner(pcg, Preconditioner::Ams(ams))
            }
            ConstructedStrategy::DiagScaleKrylov { pcg } => {
                backend.pcg_configure(pcg, &descriptor.pcg_params())?;
                backend.pcg_set_preconditioner(pcg, Preconditioner::DiagScale)
            }
            ConstructedStrategy::Eigen { ame, ams } => {
                let inputs = curl(plan.family)?;
                configure_curl(backend, ams, &descriptor.ams_params().as_preconditioner(), &inputs)?;
                let mass = plan.mass.ok_or_else(|| {
                    BackendError::invalid_argument("eigensolver planned without a mass matrix")
                })?;
                backend.ame_configure(ame, &descriptor.ame_params())?;
                backend.ame_set_ams_solver(ame, ams)?;
                backend.ame_set_mass_matrix(ame, mass)
            }
        }
    }
}

/// Creates the second handle of a pair. If that fails, the first handle is
/// destroyed before the creation error is returned.
fn create_second<F, S>(
    backend: &mut dyn SolverBackend,
    first: F,
    wrap: fn(F) -> AnyHandle,
    create: impl FnOnce(&mut dyn SolverBackend) -> BackendResult<S>,
) -> BackendResult<(F, S)> {
    match create(backend) {
        Ok(second) => Ok((first, second)),
        Err(err) => {
            let handle = wrap(first);
            let kind = handle.kind();
            if let Err(cleanup) = handle.destroy(backend) {
                warn!(handle = kind, error = %cleanup, "failed to destroy solver handle");
            }
            Err(err)
        }
    }
}

fn configure_curl(
    backend: &mut dyn SolverBackend,
    ams: &AmsHandle,
    params: &AmsParams,
    inputs: &CurlInputs<'_>,
) -> BackendResult<()> {
    backend.ams_configure(ams, params)?;
    backend.ams_set_discrete_gradient(ams, inputs.gradient)?;
    match inputs.geometry {
        GeometrySource::EdgeConstant { x, y, z } => backend.ams_set_edge_constant_vectors(ams, x, y, z)?,
        GeometrySource::Coordinates { x, y, z } => backend.ams_set_coordinate_vectors(ams, x, y, z)?,
    }
    if let Some(alpha) = inputs.alpha {
        backend.ams_set_alpha_poisson_matrix(ams, alpha)?;
    }
    match inputs.beta {
        BetaSetting::Unset => Ok(()),
        BetaSetting::Given(beta) => backend.ams_set_beta_poisson_matrix(ams, Some(beta)),
        BetaSetting::Absent => backend.ams_set_beta_poisson_matrix(ams, None),
    }
}

fn curl_inputs<'b>(
    family: StrategyFamily,
    descriptor: &StrategyDescriptor,
    bundle: &'b ProblemBundle,
) -> std::result::Result<CurlInputs<'b>, ConfigError> {
    let missing = |what: &'static str| ConfigError::MissingData {
        family: family.label(),
        what,
    };

    if !matches!(descriptor.dimension, 2 | 3) {
        return Err(ConfigError::InvalidParameter {
            name: "dimension",
            reason: format!("{} is not 2 or 3", descriptor.dimension),
        });
    }
    let gradient = bundle.discrete_gradient().ok_or(missing("a discrete gradient"))?;

    let triple = match (descriptor.use_coordinates, bundle.geometry()) {
        (false, GeometricData::EdgeConstant(t)) | (true, GeometricData::Coordinates(t)) => t,
        (false, _) => return Err(missing("edge-constant vectors")),
        (true, _) => return Err(missing("coordinate vectors")),
    };
    let VectorTriple { x, y, z } = triple;
    let z = if descriptor.dimension == 3 {
        Some(z.as_ref().ok_or(missing("a third geometric component"))?)
    } else {
        None
    };
    let geometry = if descriptor.use_coordinates {
        GeometrySource::Coordinates { x, y, z }
    } else {
        GeometrySource::EdgeConstant { x, y, z }
    };

    let (alpha, beta) = if descriptor.use_h1_decomposition {
        match bundle.poisson() {
            PoissonMatrices::None => return Err(missing("an alpha Poisson matrix")),
            PoissonMatrices::AlphaOnly(alpha) if descriptor.singular_problem => {
                (Some(alpha), BetaSetting::Absent)
            }
            PoissonMatrices::AlphaOnly(_) => return Err(missing("a beta Poisson matrix")),
            PoissonMatrices::AlphaAndBeta(alpha, _) if descriptor.singular_problem => {
                (Some(alpha), BetaSetting::Absent)
            }
            PoissonMatrices::AlphaAndBeta(alpha, beta) => (Some(alpha), BetaSetting::Given(beta)),
        }
    } else if descriptor.singular_problem {
        (None, BetaSetting::Absent)
    } else {
        (None, BetaSetting::Unset)
    };

    Ok(CurlInputs {
        gradient,
        geometry,
        alpha,
        beta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::problems;

    fn descriptor(family: StrategyFamily) -> StrategyDescriptor {
        StrategyDescriptor {
            dimension: 2,
            ..StrategyDescriptor::for_family(family)
        }
    }

    #[test]
    fn plain_multigrid_needs_no_auxiliary_data() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(6));
        let plan = StrategyBuilder::validate(&descriptor(StrategyFamily::PlainMultigrid), &bundle).unwrap();
        assert!(plan.curl.is_none());
        assert!(plan.mass.is_none());
    }

    #[test]
    fn curl_families_require_the_gradient() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(4));
        for family in [
            StrategyFamily::StandaloneCurlSolver,
            StrategyFamily::CurlPreconditionedKrylov,
            StrategyFamily::GeneralizedEigensolver,
        ] {
            let err = StrategyBuilder::validate(&descriptor(family), &bundle).unwrap_err();
            assert_eq!(
                err,
                ConfigError::MissingData {
                    family: family.label(),
                    what: "a discrete gradient"
                }
            );
        }
    }

    #[test]
    fn geometry_must_match_the_coordinate_flag() {
        let problem = problems::edge_problem_2d(3, 1.0);
        let bundle = problem.bundle(false);
        let d = StrategyDescriptor {
            use_coordinates: true,
            ..descriptor(StrategyFamily::StandaloneCurlSolver)
        };
        assert!(matches!(
            StrategyBuilder::validate(&d, &bundle),
            Err(ConfigError::MissingData { what: "coordinate vectors", .. })
        ));

        // 2-D data lacks a z component, which a 3-D run needs.
        let d = StrategyDescriptor {
            dimension: 3,
            ..descriptor(StrategyFamily::StandaloneCurlSolver)
        };
        assert!(matches!(
            StrategyBuilder::validate(&d, &bundle),
            Err(ConfigError::MissingData { what: "a third geometric component", .. })
        ));
    }

    #[test]
    fn singular_problem_forces_beta_absent() {
        let problem = problems::edge_problem_2d(3, 1.0);
        let bundle = problem.bundle(false);
        let d = StrategyDescriptor {
            use_h1_decomposition: true,
            singular_problem: true,
            ..descriptor(StrategyFamily::CurlPreconditionedKrylov)
        };
        let plan = StrategyBuilder::validate(&d, &bundle).unwrap();
        let curl = plan.curl.unwrap();
        assert!(curl.alpha.is_some());
        assert!(matches!(curl.beta, BetaSetting::Absent));

        let regular = StrategyDescriptor {
            singular_problem: false,
            ..d
        };
        let plan = StrategyBuilder::validate(&regular, &bundle).unwrap();
        assert!(matches!(plan.curl.unwrap().beta, BetaSetting::Given(_)));
    }

    #[test]
    fn eigensolver_rejects_zero_block_size() {
        let problem = problems::edge_problem_2d(3, 1.0);
        let bundle = problem.bundle(false);
        let d = StrategyDescriptor {
            block_size: 0,
            ..descriptor(StrategyFamily::GeneralizedEigensolver)
        };
        assert!(matches!(
            StrategyBuilder::validate(&d, &bundle),
            Err(ConfigError::InvalidParameter { name: "block_size", .. })
        ));
    }

    #[test]
    fn build_creates_preconditioner_before_krylov_solver() {
        let problem = problems::edge_problem_2d(3, 1.0);
        let bundle = problem.bundle(false);
        let mut backend = NativeBackend::new();
        let strategy = StrategyBuilder::new(&mut backend)
            .build(&descriptor(StrategyFamily::CurlPreconditionedKrylov), &bundle)
            .unwrap();
        assert_eq!(strategy.family(), StrategyFamily::CurlPreconditionedKrylov);
        let kinds: Vec<_> = strategy.into_handles().iter().map(|h| h.kind()).collect();
        assert_eq!(kinds, ["AMS", "PCG"]);
    }

    #[test]
    fn configure_failure_releases_created_handles() {
        let bundle = problems::laplacian_bundle(problems::laplacian_2d(4));
        let d = StrategyDescriptor {
            coarsen_type: 99,
            ..descriptor(StrategyFamily::MultigridPreconditionedKrylov)
        };
        let mut backend = NativeBackend::new();
        let err = StrategyBuilder::new(&mut backend).build(&d, &bundle).unwrap_err();
        assert!(matches!(err, HarnessError::Backend { ref phase, .. } if phase == "BoomerAMG-PCG Configure"));
        assert_eq!(backend.live_handles(), 0);
    }
}
