use std::path::PathBuf;

use ams_io::{ArtifactStore, DEFAULT_PREFIX};
use ams_solver::problems;
use anyhow::Context;
use clap::Args;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Output directory
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Artifact file prefix
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Cells per side of the unit square
    #[arg(long, default_value_t = 8)]
    pub cells: usize,

    /// Reaction coefficient of curl curl u + sigma u
    #[arg(long, default_value_t = 1.0)]
    pub sigma: f64,
}

pub fn run(args: GenerateArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.cells >= 2, "--cells must be at least 2");
    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("creating {}", args.dir.display()))?;

    let problem = problems::edge_problem_2d(args.cells, args.sigma);
    let store = ArtifactStore::new(&args.dir, &args.prefix, 0);
    problem
        .write_to(&store)
        .with_context(|| format!("writing artifacts to {}", args.dir.display()))?;

    println!(
        "Wrote {} edges / {} nodes to {} (2-D problem: solve with --dim 2)",
        problem.num_edges(),
        problem.num_nodes(),
        args.dir.display()
    );
    Ok(())
}
