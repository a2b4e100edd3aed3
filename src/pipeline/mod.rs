use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::aggregator;
use crate::comparison::{DualRunComparator, DualRunRequest};
use crate::config::{CategoryConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::results;
use crate::runner::{self, Execution};

pub const TRACE_FILE_NAME: &str = "vase_value_log.txt";
pub const MAP_FILE_NAME: &str = "limitedValuedMap.json";
/// Wall-clock limit for a category's `profile_cmd`.
pub const PROFILE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Per-program processing steps, always run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Instrument,
    Profile,
    Evaluate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Instrument => f.write_str("instrument"),
            Phase::Profile => f.write_str("profile"),
            Phase::Evaluate => f.write_str("evaluate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Final state of one program in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramOutcome {
    pub program: String,
    pub category: String,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgramOutcome {
    pub fn success(category: &str, program: &str) -> Self {
        ProgramOutcome {
            program: program.to_string(),
            category: category.to_string(),
            status: OutcomeStatus::Success,
            failed_phase: None,
            error: None,
        }
    }

    pub fn failed(category: &str, program: &str, reason: impl Into<String>) -> Self {
        ProgramOutcome {
            program: program.to_string(),
            category: category.to_string(),
            status: OutcomeStatus::Failed,
            failed_phase: None,
            error: Some(reason.into()),
        }
    }

    fn failed_in(category: &str, program: &str, phase: Phase, reason: String) -> Self {
        ProgramOutcome {
            failed_phase: Some(phase),
            ..ProgramOutcome::failed(category, program, reason)
        }
    }
}

/// What a phase sees of the program it works on.
pub struct ProgramContext<'a> {
    pub category: &'a str,
    pub program: &'a str,
    pub settings: &'a CategoryConfig,
    pub config: &'a PipelineConfig,
    pub program_dir: PathBuf,
}

/// The three phases of per-program processing.
pub trait Stages {
    /// Returns the engine input artifact.
    fn instrument(&self, ctx: &ProgramContext<'_>) -> Result<PathBuf>;

    /// Returns the value map file.
    fn profile(&self, ctx: &ProgramContext<'_>, artifact: &Path) -> Result<PathBuf>;

    fn evaluate(&self, ctx: &ProgramContext<'_>, artifact: &Path, map_file: &Path) -> Result<()>;
}

/// Runs [`Stages`] over every program of the selected categories. A failing
/// program is recorded and the batch moves on.
pub struct BatchOrchestrator<'a, S> {
    config: &'a PipelineConfig,
    artifacts_root: PathBuf,
    stages: S,
}

impl<'a, S: Stages> BatchOrchestrator<'a, S> {
    pub fn new(config: &'a PipelineConfig, artifacts_root: impl Into<PathBuf>, stages: S) -> Self {
        BatchOrchestrator {
            config,
            artifacts_root: artifacts_root.into(),
            stages,
        }
    }

    /// Processes every program of `categories` (all categories when empty).
    pub fn run(&self, categories: &[String]) -> Vec<ProgramOutcome> {
        let selected: Vec<String> = if categories.is_empty() {
            self.config.categories().map(|(name, _)| name.to_string()).collect()
        } else {
            categories.to_vec()
        };

        let mut outcomes = Vec::new();
        for category in &selected {
            let Some(settings) = self.config.category(category) else {
                tracing::warn!(category = %category, "skipping unknown category");
                continue;
            };

            let total = settings.programs.len();
            for (i, program) in settings.programs.iter().enumerate() {
                println!("\n[{}/{}] Processing {} from {}", i + 1, total, program, category);
                let outcome = self.process(category, program, settings);
                match &outcome.error {
                    None => println!("[OK] {program}"),
                    Some(reason) => println!("[FAILED] {program}: {reason}"),
                }
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// [`run`](Self::run), then persist the outcomes. Failing to write the
    /// summary is the only error a batch returns.
    pub fn run_and_save(&self, categories: &[String]) -> Result<(Vec<ProgramOutcome>, PathBuf)> {
        let outcomes = self.run(categories);
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.artifacts_root.join(format!("batch_results_{timestamp}.json"));
        results::write_json(&outcomes, &path)?;
        tracing::info!(path = %path.display(), programs = outcomes.len(), "saved batch results");
        Ok((outcomes, path))
    }

    fn process(&self, category: &str, program: &str, settings: &CategoryConfig) -> ProgramOutcome {
        let span = tracing::info_span!("program", category, program);
        let _entered = span.enter();

        let ctx = ProgramContext {
            category,
            program,
            settings,
            config: self.config,
            program_dir: self.artifacts_root.join(category).join(program),
        };
        if let Err(err) = fs::create_dir_all(&ctx.program_dir) {
            let err = Error::io(&ctx.program_dir, err);
            return ProgramOutcome::failed_in(category, program, Phase::Instrument, err.to_string());
        }

        let artifact = match guarded(Phase::Instrument, || self.stages.instrument(&ctx)) {
            Ok(artifact) => artifact,
            Err(err) => return ProgramOutcome::failed_in(category, program, Phase::Instrument, err.to_string()),
        };
        let map_file = match guarded(Phase::Profile, || self.stages.profile(&ctx, &artifact)) {
            Ok(map_file) => map_file,
            Err(err) => return ProgramOutcome::failed_in(category, program, Phase::Profile, err.to_string()),
        };
        if let Err(err) = guarded(Phase::Evaluate, || self.stages.evaluate(&ctx, &artifact, &map_file)) {
            return ProgramOutcome::failed_in(category, program, Phase::Evaluate, err.to_string());
        }

        ProgramOutcome::success(category, program)
    }
}

/// Runs one phase, turning a panic into a phase error so it stays confined
/// to the current program.
fn guarded<T>(phase: Phase, f: impl FnOnce() -> Result<T>) -> Result<T> {
    tracing::info!(%phase, "phase started");
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            tracing::error!(%phase, error = %err, "phase failed");
            Err(err)
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            tracing::error!(%phase, %message, "phase panicked");
            Err(Error::Phase { phase, message })
        }
    }
}

/// Phases backed by prebuilt artifacts, the trace aggregator and the engine.
pub struct EngineStages {
    comparator: DualRunComparator,
    run_id: Option<String>,
    profile_timeout: Duration,
}

impl EngineStages {
    pub fn new(comparator: DualRunComparator, run_id: Option<String>) -> Self {
        EngineStages {
            comparator,
            run_id,
            profile_timeout: PROFILE_TIMEOUT,
        }
    }

    pub fn with_profile_timeout(mut self, timeout: Duration) -> Self {
        self.profile_timeout = timeout;
        self
    }
}

fn require_non_empty(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|_| Error::MissingArtifact(path.to_path_buf()))?;
    if metadata.len() == 0 {
        return Err(Error::EmptyArtifact(path.to_path_buf()));
    }
    Ok(())
}

impl Stages for EngineStages {
    /// Building is done elsewhere; this checks the instrumented build is
    /// present and usable.
    fn instrument(&self, ctx: &ProgramContext<'_>) -> Result<PathBuf> {
        let program = ctx.program;
        let artifact = ctx.program_dir.join(format!("{program}.base.bc"));
        require_non_empty(&artifact)?;

        for optional in [
            format!("{program}.evpinstr.bc"),
            format!("{program}_final.bc"),
            format!("{program}_final_exe"),
        ] {
            let path = ctx.program_dir.join(optional);
            if path.exists() {
                require_non_empty(&path)?;
            }
        }

        tracing::info!(artifact = %artifact.display(), "instrumented artifacts verified");
        Ok(artifact)
    }

    fn profile(&self, ctx: &ProgramContext<'_>, _artifact: &Path) -> Result<PathBuf> {
        let trace = ctx.program_dir.join(TRACE_FILE_NAME);

        if let Some(cmd) = &ctx.settings.profile_cmd {
            let args: Vec<String> = cmd.iter().map(|arg| arg.replace("{program}", ctx.program)).collect();
            let Some((exe, rest)) = args.split_first() else {
                return Err(Error::Config(format!("category '{}': profile_cmd is empty", ctx.category)));
            };
            let mut command = Command::new(exe);
            command
                .args(rest)
                .current_dir(&ctx.program_dir)
                .env("VASE_LOG", &trace)
                .env("VASE_DIR", &ctx.program_dir);

            let execution =
                runner::execute_bounded(&mut command, self.profile_timeout).map_err(|err| Error::io(exe, err))?;
            match execution {
                Execution::Exited { status, output } => {
                    if !status.success() {
                        tracing::warn!(exit = ?status.code(), "profiling command exited unsuccessfully");
                    }
                    tracing::debug!(%output, "profiling command output");
                }
                Execution::TimedOut => {
                    return Err(Error::Phase {
                        phase: Phase::Profile,
                        message: format!(
                            "profiling command timed out after {}s",
                            self.profile_timeout.as_secs()
                        ),
                    });
                }
            }
        }

        let map_file = ctx.program_dir.join(MAP_FILE_NAME);
        let (_, report) = aggregator::generate_limited_map(&trace, &map_file, &ctx.settings.thresholds)?;
        println!(
            "[OK] Generated map -> {} ({} keys, lines: total={} good={} malformed={} skipped_neg_branch={})",
            map_file.display(),
            report.keys,
            report.trace.total_lines,
            report.trace.accepted,
            report.trace.malformed,
            report.trace.negative_branch
        );
        Ok(map_file)
    }

    fn evaluate(&self, ctx: &ProgramContext<'_>, artifact: &Path, map_file: &Path) -> Result<()> {
        let request = DualRunRequest::for_program(
            ctx.program,
            Some(ctx.category),
            Some(ctx.config),
            artifact,
            map_file,
            self.run_id.clone(),
        );
        let record = self.comparator.compare(&request);
        results::print_comparison(&record);

        let path = ctx.program_dir.join(format!("comparison-{}.json", record.run_id));
        results::write_json(&record, &path)
    }
}
