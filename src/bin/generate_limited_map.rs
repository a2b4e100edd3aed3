use anyhow::Context;
use clap::Parser;
use profile_guided_bench_rs::aggregator::{self, Thresholds, DEFAULT_MAX_VALUES, DEFAULT_MIN_OCCURRENCE};
use profile_guided_bench_rs::logging;
use std::path::PathBuf;

/// Build the limited-valued map from an instrumented program's value trace.
#[derive(Parser)]
#[command(name = "generate_limited_map")]
struct Args {
    /// Value trace written by the instrumented program
    #[arg(long, default_value = "vase_value_log.txt")]
    log: PathBuf,

    /// Output JSON map
    #[arg(long, default_value = "limitedValuedMap.json")]
    out: PathBuf,

    /// Max distinct values for a variable at a site to count as limited
    #[arg(long, default_value_t = DEFAULT_MAX_VALUES)]
    max_values: usize,

    /// Minimum times a variable must be observed at a site
    #[arg(long, default_value_t = DEFAULT_MIN_OCCURRENCE)]
    min_occurrence: u64,

    /// Do not emit branchless `loc:N` keys aggregated across branches
    #[arg(long)]
    no_branchless: bool,
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();

    let thresholds = Thresholds {
        min_occurrence: args.min_occurrence,
        max_cardinality: args.max_values,
        include_branchless: !args.no_branchless,
    };

    let (_, report) = aggregator::generate_limited_map(&args.log, &args.out, &thresholds)
        .with_context(|| format!("failed to write value map {}", args.out.display()))?;

    if report.trace.file_missing {
        println!("Log file not found: {} (wrote empty map)", args.log.display());
    } else if report.trace.read_failed {
        println!("Log file could not be read: {} (wrote empty map)", args.log.display());
    }
    println!("Done. Written limited-valued map to {}", args.out.display());
    println!(
        "   lines: total={} good={} malformed={} skipped_neg_branch={}",
        report.trace.total_lines, report.trace.accepted, report.trace.malformed, report.trace.negative_branch
    );
    println!("   entries: {}", report.keys);
    println!(
        "   thresholds: MIN_OCCURRENCE={} MAX_LIMITED_VALUES={} branchless={}",
        thresholds.min_occurrence,
        thresholds.max_cardinality,
        if thresholds.include_branchless { "on" } else { "off" }
    );

    Ok(())
}
