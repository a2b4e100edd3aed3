use anyhow::Context;
use clap::Parser;
use profile_guided_bench_rs::comparison::{DualRunComparator, DualRunRequest};
use profile_guided_bench_rs::config::{EngineSettings, PipelineConfig};
use profile_guided_bench_rs::logging;
use profile_guided_bench_rs::results;
use profile_guided_bench_rs::runner::EngineRunner;
use std::path::PathBuf;

/// Run the baseline and profile-guided engine on one program and compare them.
#[derive(Parser)]
#[command(name = "run_dual")]
struct Args {
    /// Program under test (selects the symbolic-input fragment)
    #[arg(long)]
    program: String,

    /// Engine input artifact
    #[arg(long)]
    artifact: PathBuf,

    /// Limited-valued map for the profile-guided run
    #[arg(long)]
    map: PathBuf,

    /// Engine binary (defaults to $KLEE_BIN, then `klee`)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Category whose configuration applies
    #[arg(long)]
    category: Option<String>,

    /// Category configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run identifier (defaults to a timestamp)
    #[arg(long)]
    run_id: Option<String>,

    /// Environment file passed to the engine
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// JSON array the comparison record is appended to
    #[arg(long, default_value = "comparison_results.json")]
    results: PathBuf,

    /// Extra program arguments, after the symbolic input
    #[arg(last = true)]
    extra: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let config = args
        .config
        .as_deref()
        .map(PipelineConfig::load)
        .transpose()
        .context("failed to load configuration")?;
    let engine = args.engine.unwrap_or_else(|| EngineSettings::from_env().engine_bin);

    let mut request = DualRunRequest::for_program(
        &args.program,
        args.category.as_deref(),
        config.as_ref(),
        &args.artifact,
        &args.map,
        args.run_id,
    );
    request.extra_args.extend(args.extra);
    if args.env_file.is_some() {
        request.env_file = args.env_file;
    }

    let comparator = DualRunComparator::new(EngineRunner::new(engine));
    let record = comparator.compare(&request);
    results::print_comparison(&record);

    let record_path = request
        .artifact_dir()
        .join(format!("comparison-{}.json", record.run_id));
    results::write_json(&record, &record_path)
        .with_context(|| format!("failed to write {}", record_path.display()))?;
    results::append_record(record, &args.results)
        .with_context(|| format!("failed to append to {}", args.results.display()))?;

    println!("\n[SAVED] {}", record_path.display());
    Ok(())
}
