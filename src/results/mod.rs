use prettytable::{row, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

use crate::comparison::{ComparisonRecord, MetricOutcome};
use crate::error::{Error, Result};
use crate::pipeline::{OutcomeStatus, ProgramOutcome};
use crate::runner::RunRecord;

/// Writes `value` as pretty JSON, creating parent directories as needed.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|err| Error::json(path, err))?;
    fs::write(path, json).map_err(|err| Error::io(path, err))
}

/// Reads a JSON array of records. A missing file holds no records.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::io(path, err)),
    };
    serde_json::from_str(&content).map_err(|err| Error::json(path, err))
}

/// Appends one record to the JSON array stored at `path`. An existing file
/// that does not parse is left untouched and reported as an error.
pub fn append_record<T: Serialize + DeserializeOwned>(record: T, path: &Path) -> Result<()> {
    let mut records: Vec<T> = read_records(path)?;
    records.push(record);
    write_json(&records, path)
}

fn describe(outcome: &MetricOutcome) -> (String, String, String) {
    match outcome {
        MetricOutcome::Improvement {
            baseline,
            profile_guided,
            percent,
        } => (
            baseline.to_string(),
            profile_guided.to_string(),
            format!("{percent:.2}%"),
        ),
        MetricOutcome::NotApplicable {
            baseline,
            profile_guided,
        } => (baseline.to_string(), profile_guided.to_string(), "N/A".to_string()),
        MetricOutcome::NonNumeric {
            baseline,
            profile_guided,
        } => (baseline.clone(), profile_guided.clone(), "-".to_string()),
        MetricOutcome::BaselineOnly { value } => (value.clone(), "-".to_string(), "baseline only".to_string()),
        MetricOutcome::ProfileGuidedOnly { value } => {
            ("-".to_string(), value.clone(), "profile-guided only".to_string())
        }
        MetricOutcome::Missing => ("-".to_string(), "-".to_string(), "-".to_string()),
    }
}

fn run_cell(run: &RunRecord) -> String {
    if run.timed_out {
        "timeout".to_string()
    } else if run.success {
        format!("ok ({} tests)", run.generated_artifact_count)
    } else {
        format!("exit {} ({} tests)", run.exit_code, run.generated_artifact_count)
    }
}

/// Metric table for one program.
pub fn comparison_table(record: &ComparisonRecord) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Metric", "Baseline", "Profile-guided", "Improvement"]);
    table.add_row(row![
        "Run",
        run_cell(&record.baseline),
        run_cell(&record.profile_guided),
        ""
    ]);
    for comparison in &record.metrics {
        let (baseline, profile_guided, change) = describe(&comparison.outcome);
        table.add_row(row![comparison.metric, baseline, profile_guided, change]);
    }
    table
}

pub fn print_comparison(record: &ComparisonRecord) {
    println!("\nResults for {} (run {}):", record.program, record.run_id);
    comparison_table(record).printstd();
}

/// Per-program status table with totals.
pub fn batch_table(outcomes: &[ProgramOutcome]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Category", "Program", "Status", "Reason"]);
    for outcome in outcomes {
        let (status, reason) = match &outcome.status {
            OutcomeStatus::Success => ("success", ""),
            OutcomeStatus::Failed => ("failed", outcome.error.as_deref().unwrap_or("")),
        };
        table.add_row(row![outcome.category, outcome.program, status, reason]);
    }

    let succeeded = outcomes.iter().filter(|o| o.status == OutcomeStatus::Success).count();
    table.add_row(row![
        "TOTAL",
        outcomes.len(),
        format!("{succeeded} succeeded"),
        format!("{} failed", outcomes.len() - succeeded)
    ]);
    table
}

pub fn print_batch_summary(outcomes: &[ProgramOutcome]) {
    println!("\nBatch summary:");
    batch_table(outcomes).printstd();
}
