use std::path::PathBuf;
use std::process::ExitCode;

use ams_io::{ArtifactStore, DEFAULT_PREFIX, RunStatus, RunSummary};
use ams_solver::{
    default_backend, Harness, HarnessError, ProblemBundle, ProcessGroup, RunReport,
    StrategyDescriptor,
};
use anyhow::Context;
use clap::Args;
use tracing::info;

#[derive(Args, Debug)]
pub struct SolveArgs {
    /// Directory holding the problem artifacts
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Artifact file prefix (<prefix>.<name>.<rank>)
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// JSON strategy file; command-line flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write a JSON run summary to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Write the final iterate as an IJ vector
    #[arg(long)]
    pub save_solution: Option<PathBuf>,

    /// Print the effective strategy as JSON before running
    #[arg(long)]
    pub show_config: bool,

    #[command(flatten)]
    pub strategy: StrategyFlags,
}

/// Command-line overrides for [`StrategyDescriptor`] fields.
#[derive(Args, Debug, Default)]
pub struct StrategyFlags {
    /// Solver family: 0 BoomerAMG, 1 BoomerAMG-PCG, 2 AMS, 3 AMS-PCG, 4 DS-PCG, 5 AME
    #[arg(long)]
    pub solver: Option<i32>,
    /// Maximum number of iterations
    #[arg(long)]
    pub maxit: Option<usize>,
    /// Convergence tolerance
    #[arg(long)]
    pub tol: Option<f64>,
    /// AMS cycle type (1-8, 11-14)
    #[arg(long = "type")]
    pub cycle_type: Option<i32>,
    /// Smoother relaxation type
    #[arg(long)]
    pub rlx: Option<i32>,
    /// Number of relaxation sweeps
    #[arg(long)]
    pub rlxn: Option<usize>,
    /// Relaxation weight
    #[arg(long)]
    pub rlxw: Option<f64>,
    /// Relaxation omega
    #[arg(long)]
    pub rlxo: Option<f64>,
    /// Coarsening type
    #[arg(long)]
    pub ctype: Option<i32>,
    /// Subspace AMG relaxation type
    #[arg(long)]
    pub amgrlx: Option<i32>,
    /// Levels of aggressive coarsening
    #[arg(long)]
    pub agg: Option<usize>,
    /// Paths for aggressive coarsening
    #[arg(long)]
    pub aggnp: Option<usize>,
    /// Interpolation type
    #[arg(long)]
    pub itype: Option<i32>,
    /// Interpolation truncation (entries per row)
    #[arg(long)]
    pub pmax: Option<usize>,
    /// Strength threshold
    #[arg(long)]
    pub theta: Option<f64>,
    /// Space dimension (2 or 3)
    #[arg(long)]
    pub dim: Option<usize>,
    /// Number of eigenpairs (AME)
    #[arg(long)]
    pub bsize: Option<usize>,
    /// Use vertex coordinates instead of edge-constant vectors
    #[arg(long)]
    pub coord: bool,
    /// Use the alpha/beta Poisson matrices
    #[arg(long)]
    pub h1: bool,
    /// Singular problem: the beta Poisson matrix is omitted
    #[arg(long)]
    pub sing: bool,
    /// Skip iteration counts and residual norms
    #[arg(long)]
    pub no_diagnostics: bool,
}

impl StrategyFlags {
    /// Applies every flag that was given on top of `d`.
    pub fn apply(&self, d: &mut StrategyDescriptor) {
        fn set<T: Copy>(field: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *field = v;
            }
        }
        set(&mut d.solver_id, self.solver);
        set(&mut d.max_iterations, self.maxit);
        set(&mut d.tolerance, self.tol);
        set(&mut d.cycle_type, self.cycle_type);
        set(&mut d.relax_type, self.rlx);
        set(&mut d.relax_sweeps, self.rlxn);
        set(&mut d.relax_weight, self.rlxw);
        set(&mut d.omega, self.rlxo);
        set(&mut d.coarsen_type, self.ctype);
        set(&mut d.amg_relax_type, self.amgrlx);
        set(&mut d.agg_levels, self.agg);
        set(&mut d.agg_num_paths, self.aggnp);
        set(&mut d.interp_type, self.itype);
        set(&mut d.p_max, self.pmax);
        set(&mut d.strong_threshold, self.theta);
        set(&mut d.dimension, self.dim);
        set(&mut d.block_size, self.bsize);
        d.use_coordinates |= self.coord;
        d.use_h1_decomposition |= self.h1;
        d.singular_problem |= self.sing;
        if self.no_diagnostics {
            d.collect_diagnostics = false;
        }
    }
}

/// Defaults, then the JSON file, then command-line flags.
pub fn effective_descriptor(args: &SolveArgs) -> anyhow::Result<StrategyDescriptor> {
    let mut descriptor = match &args.config {
        Some(path) => StrategyDescriptor::from_json_file(path)?,
        None => StrategyDescriptor::default(),
    };
    args.strategy.apply(&mut descriptor);
    Ok(descriptor)
}

pub fn run(args: SolveArgs) -> anyhow::Result<ExitCode> {
    let group = ProcessGroup::single();
    let descriptor = effective_descriptor(&args)?;
    if args.show_config && group.is_leader() {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
    }

    let store = ArtifactStore::new(&args.dir, &args.prefix, group.rank());
    let result = ProblemBundle::load(&store, &descriptor).and_then(|bundle| {
        if group.is_leader() {
            println!("Problem size: {}\n", bundle.size());
        }
        let mut backend = default_backend();
        info!(backend = backend.name(), "solving");
        Harness::new(backend.as_mut()).run(&descriptor, &bundle)
    });

    let report = match &result {
        Ok(report) => Some(report),
        Err(err) => err.report(),
    };
    if let Some(report) = report {
        if group.is_leader() {
            print!("{}", report.timing_report());
            if let Some(summary) = report.convergence_summary() {
                println!();
                print!("{summary}");
            }
        }
        if let (Some(path), Some(x)) = (&args.save_solution, &report.solution) {
            ams_io::ij::write_vector(path, x)
                .with_context(|| format!("writing solution to {}", path.display()))?;
        }
    }

    if let Some(path) = &args.report {
        let summary = run_summary(&descriptor, report, result.as_ref().err());
        ams_io::write_summary(path, &summary)
            .with_context(|| format!("writing run summary to {}", path.display()))?;
    }

    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("{err}");
            if group.is_leader() && err.error_flag() != 0 {
                eprintln!("error flag = {}", err.error_flag());
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_summary(
    descriptor: &StrategyDescriptor,
    report: Option<&RunReport>,
    error: Option<&HarnessError>,
) -> RunSummary {
    match report {
        Some(report) => report.to_summary(error),
        None => {
            let label = descriptor.family().map(|f| f.label()).unwrap_or("unknown");
            let mut summary = RunSummary::new(label, 0, RunStatus::Failed);
            if let Some(err) = error {
                summary.error_code = Some(err.error_flag());
                summary.error = Some(err.to_string());
            }
            summary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ams_solver::StrategyFamily;

    fn args(dir: PathBuf) -> SolveArgs {
        SolveArgs {
            dir,
            prefix: DEFAULT_PREFIX.to_string(),
            config: None,
            report: None,
            save_solution: None,
            show_config: false,
            strategy: StrategyFlags::default(),
        }
    }

    #[test]
    fn flags_override_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("strategy.json");
        std::fs::write(&config, r#"{"solver_id": 2, "max_iterations": 7, "tolerance": 1e-3}"#).unwrap();

        let mut a = args(dir.path().to_path_buf());
        a.config = Some(config);
        a.strategy.maxit = Some(50);
        a.strategy.sing = true;
        let d = effective_descriptor(&a).unwrap();

        assert_eq!(d.family().unwrap(), StrategyFamily::StandaloneCurlSolver);
        assert_eq!(d.max_iterations, 50);
        assert_eq!(d.tolerance, 1e-3);
        assert!(d.singular_problem);
        assert!(d.collect_diagnostics);
    }

    #[test]
    fn generated_problem_solves_and_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        crate::cmd::generate::run(crate::cmd::generate::GenerateArgs {
            dir: dir.path().to_path_buf(),
            prefix: DEFAULT_PREFIX.to_string(),
            cells: 4,
            sigma: 1.0,
        })
        .unwrap();

        let mut a = args(dir.path().to_path_buf());
        a.strategy.dim = Some(2);
        a.report = Some(dir.path().join("run.json"));
        a.save_solution = Some(dir.path().join("x.sol"));
        let code = run(a).unwrap();

        assert_eq!(code, ExitCode::SUCCESS);
        let summary = ams_io::read_summary(dir.path().join("run.json")).unwrap();
        assert_eq!(summary.solver, "AMS-PCG");
        assert_eq!(summary.status, RunStatus::Converged);
        assert_eq!(summary.problem_size, 24);
        let x = ams_io::ij::read_vector(dir.path().join("x.sol")).unwrap();
        assert_eq!(x.len(), 24);
    }

    #[test]
    fn missing_inputs_fail_with_a_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(dir.path().to_path_buf());
        a.report = Some(dir.path().join("run.json"));
        let code = run(a).unwrap();

        assert_eq!(code, ExitCode::FAILURE);
        let summary = ams_io::read_summary(dir.path().join("run.json")).unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(summary.error.unwrap().contains("Can't find the input file"));
    }
}
