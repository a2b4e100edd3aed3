use anyhow::Context;
use clap::Parser;
use profile_guided_bench_rs::comparison::DualRunComparator;
use profile_guided_bench_rs::config::{EngineSettings, PipelineConfig};
use profile_guided_bench_rs::logging;
use profile_guided_bench_rs::pipeline::{BatchOrchestrator, EngineStages, OutcomeStatus};
use profile_guided_bench_rs::results;
use profile_guided_bench_rs::runner::EngineRunner;
use std::path::PathBuf;

/// Instrument-check, profile and evaluate every program of the selected categories.
#[derive(Parser)]
#[command(name = "run_batch")]
struct Args {
    /// Category configuration file
    #[arg(long, default_value = "config/programs.json")]
    config: PathBuf,

    /// Artifacts root (defaults to $EVP_ROOT/evp_artifacts)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Engine binary (defaults to $KLEE_BIN, then `klee`)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Run identifier shared by every program (defaults to a timestamp per program)
    #[arg(long)]
    run_id: Option<String>,

    /// Categories to process; all when omitted
    categories: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let config = PipelineConfig::load(&args.config).context("failed to load configuration")?;
    let settings = EngineSettings::from_env();
    let root = args.root.unwrap_or(settings.artifacts_root);
    let engine = args.engine.unwrap_or(settings.engine_bin);

    let stages = EngineStages::new(DualRunComparator::new(EngineRunner::new(engine)), args.run_id);
    let orchestrator = BatchOrchestrator::new(&config, &root, stages);
    let (outcomes, path) = orchestrator
        .run_and_save(&args.categories)
        .context("failed to save batch results")?;

    results::print_batch_summary(&outcomes);
    println!("\n[SAVED] Results -> {}", path.display());

    if outcomes.iter().any(|o| o.status == OutcomeStatus::Failed) {
        tracing::warn!("some programs failed; see the summary above");
    }
    Ok(())
}
