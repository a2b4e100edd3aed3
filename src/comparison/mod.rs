use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::PipelineConfig;
use crate::runner::{EngineRunner, Invocation, RunRecord, Variant, SPAWN_FAILURE_EXIT_CODE};
use crate::symbolic;

/// Statistics compared between the two variants, in report order.
pub const COMPARED_METRICS: [&str; 6] = [
    "QueryTime",
    "SolverTime",
    "WallTime",
    "NumQueries",
    "NumStates",
    "NumInstructions",
];

/// How one metric compares between baseline and profile-guided runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MetricOutcome {
    /// `(baseline - profile) / baseline * 100`; negative means a slowdown.
    #[serde(rename_all = "camelCase")]
    Improvement {
        baseline: f64,
        profile_guided: f64,
        percent: f64,
    },
    /// Baseline was zero (or not positive), so no percentage exists.
    #[serde(rename_all = "camelCase")]
    NotApplicable { baseline: f64, profile_guided: f64 },
    /// At least one side is not a number; both are reported verbatim.
    #[serde(rename_all = "camelCase")]
    NonNumeric {
        baseline: String,
        profile_guided: String,
    },
    BaselineOnly { value: String },
    ProfileGuidedOnly { value: String },
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    #[serde(flatten)]
    pub outcome: MetricOutcome,
}

/// `nan` and `inf` parse as floats but cannot be stored as JSON numbers.
fn finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Compares one metric across the two statistics maps.
pub fn compare_metric(
    metric: &str,
    baseline: &BTreeMap<String, String>,
    profile_guided: &BTreeMap<String, String>,
) -> MetricOutcome {
    match (baseline.get(metric), profile_guided.get(metric)) {
        (Some(b), Some(p)) => match (finite(b), finite(p)) {
            (Some(b), Some(p)) if b > 0.0 => MetricOutcome::Improvement {
                baseline: b,
                profile_guided: p,
                percent: (b - p) / b * 100.0,
            },
            (Some(b), Some(p)) => MetricOutcome::NotApplicable {
                baseline: b,
                profile_guided: p,
            },
            _ => MetricOutcome::NonNumeric {
                baseline: b.clone(),
                profile_guided: p.clone(),
            },
        },
        (Some(b), None) => MetricOutcome::BaselineOnly { value: b.clone() },
        (None, Some(p)) => MetricOutcome::ProfileGuidedOnly { value: p.clone() },
        (None, None) => MetricOutcome::Missing,
    }
}

/// Baseline and profile-guided runs of one program under one run id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    pub program: String,
    pub run_id: String,
    pub baseline: RunRecord,
    pub profile_guided: RunRecord,
    pub metrics: Vec<MetricComparison>,
}

impl ComparisonRecord {
    pub fn new(program: &str, run_id: &str, baseline: RunRecord, profile_guided: RunRecord) -> Self {
        let metrics = COMPARED_METRICS
            .iter()
            .map(|&metric| MetricComparison {
                metric: metric.to_string(),
                outcome: compare_metric(metric, &baseline.statistics, &profile_guided.statistics),
            })
            .collect();

        ComparisonRecord {
            program: program.to_string(),
            run_id: run_id.to_string(),
            baseline,
            profile_guided,
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricOutcome> {
        self.metrics.iter().find(|m| m.metric == name).map(|m| &m.outcome)
    }

    /// Percentage improvement of `name`, when one could be computed.
    pub fn improvement(&self, name: &str) -> Option<f64> {
        match self.metric(name)? {
            MetricOutcome::Improvement { percent, .. } => Some(*percent),
            _ => None,
        }
    }

    pub fn both_succeeded(&self) -> bool {
        self.baseline.success && self.profile_guided.success
    }
}

/// Inputs for one baseline-vs-profile-guided evaluation.
#[derive(Debug, Clone)]
pub struct DualRunRequest {
    pub program: String,
    pub run_id: String,
    pub artifact: PathBuf,
    pub map_file: PathBuf,
    pub symbolic_input: Vec<String>,
    pub extra_args: Vec<String>,
    pub env_file: Option<PathBuf>,
}

impl DualRunRequest {
    /// Resolves symbolic input, extra arguments and env file from the
    /// category's configuration. Without a run id a timestamp is used.
    pub fn for_program(
        program: &str,
        category: Option<&str>,
        config: Option<&PipelineConfig>,
        artifact: &Path,
        map_file: &Path,
        run_id: Option<String>,
    ) -> Self {
        let engine = category
            .zip(config)
            .and_then(|(category, config)| config.category(category))
            .map(|category| &category.engine);

        DualRunRequest {
            program: program.to_string(),
            run_id: run_id.unwrap_or_else(default_run_id),
            artifact: artifact.to_path_buf(),
            map_file: map_file.to_path_buf(),
            symbolic_input: symbolic::resolve_args(program, category, config),
            extra_args: engine.map(|e| e.extra_args.clone()).unwrap_or_default(),
            env_file: engine.and_then(|e| e.env_file.clone()),
        }
    }

    /// `<artifact dir>/klee-<variant>-out-<run id>`; distinct per variant and run.
    pub fn output_dir(&self, variant: Variant) -> PathBuf {
        let tag = match variant {
            Variant::Baseline => "baseline",
            Variant::ProfileGuided => "profile",
        };
        self.artifact_dir().join(format!("klee-{tag}-out-{}", self.run_id))
    }

    pub fn artifact_dir(&self) -> &Path {
        self.artifact
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn invocation(&self, variant: Variant) -> Invocation {
        Invocation {
            artifact: self.artifact.clone(),
            output_dir: self.output_dir(variant),
            map_file: match variant {
                Variant::Baseline => None,
                Variant::ProfileGuided => Some(self.map_file.clone()),
            },
            symbolic_input: self.symbolic_input.clone(),
            extra_args: self.extra_args.clone(),
            env_file: self.env_file.clone(),
        }
    }
}

/// Local timestamp `YYYYMMDD-HHMMSS`.
pub fn default_run_id() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Runs both variants of a program concurrently and pairs the results.
#[derive(Debug, Clone)]
pub struct DualRunComparator {
    runner: EngineRunner,
}

impl DualRunComparator {
    pub fn new(runner: EngineRunner) -> Self {
        DualRunComparator { runner }
    }

    pub fn compare(&self, request: &DualRunRequest) -> ComparisonRecord {
        tracing::info!(program = %request.program, run_id = %request.run_id, "starting dual-run evaluation");

        let baseline = request.invocation(Variant::Baseline);
        let profile_guided = request.invocation(Variant::ProfileGuided);

        // Separate sandboxes and output directories; the map is only read.
        let (baseline, profile_guided) = thread::scope(|scope| {
            let b = scope.spawn(|| self.runner.run(&request.program, &baseline));
            let p = scope.spawn(|| self.runner.run(&request.program, &profile_guided));
            (
                b.join().unwrap_or_else(|_| panicked(&request.output_dir(Variant::Baseline))),
                p.join().unwrap_or_else(|_| panicked(&request.output_dir(Variant::ProfileGuided))),
            )
        });

        ComparisonRecord::new(&request.program, &request.run_id, baseline, profile_guided)
    }
}

fn panicked(output_dir: &Path) -> RunRecord {
    RunRecord {
        success: false,
        exit_code: SPAWN_FAILURE_EXIT_CODE,
        output_directory: output_dir.to_path_buf(),
        generated_artifact_count: 0,
        statistics: BTreeMap::new(),
        combined_output: "engine runner panicked".to_string(),
        timed_out: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stats(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn record(statistics: BTreeMap<String, String>) -> RunRecord {
        RunRecord {
            success: true,
            exit_code: 0,
            output_directory: PathBuf::from("out"),
            generated_artifact_count: 1,
            statistics,
            combined_output: String::new(),
            timed_out: false,
        }
    }

    #[test]
    fn non_finite_statistics_stay_textual() {
        let baseline = record(stats(&[("SolverTime", "nan"), ("QueryTime", "12")]));
        let profile_guided = record(stats(&[("SolverTime", "3"), ("QueryTime", "inf")]));
        let compared = ComparisonRecord::new("ls", "r1", baseline, profile_guided);

        assert_eq!(
            compared.metric("SolverTime"),
            Some(&MetricOutcome::NonNumeric {
                baseline: "nan".to_string(),
                profile_guided: "3".to_string(),
            })
        );
        assert!(matches!(compared.metric("QueryTime"), Some(MetricOutcome::NonNumeric { .. })));

        let back: ComparisonRecord = serde_json::from_str(&serde_json::to_string(&compared).unwrap()).unwrap();
        assert_eq!(back, compared);
    }

    #[test]
    fn solver_time_improvement() {
        let outcome = compare_metric("SolverTime", &stats(&[("SolverTime", "100")]), &stats(&[("SolverTime", "40")]));
        assert_eq!(
            outcome,
            MetricOutcome::Improvement {
                baseline: 100.0,
                profile_guided: 40.0,
                percent: 60.0,
            }
        );
    }

    #[test]
    fn zero_baseline_is_not_applicable() {
        let outcome = compare_metric("SolverTime", &stats(&[("SolverTime", "0")]), &stats(&[("SolverTime", "4")]));
        assert!(matches!(outcome, MetricOutcome::NotApplicable { .. }));
    }

    #[test]
    fn one_sided_and_non_numeric_metrics() {
        let baseline = stats(&[("QueryTime", "3"), ("WallTime", "n/a")]);
        let profile = stats(&[("NumStates", "12"), ("WallTime", "7")]);

        assert_eq!(
            compare_metric("QueryTime", &baseline, &profile),
            MetricOutcome::BaselineOnly { value: "3".into() }
        );
        assert_eq!(
            compare_metric("NumStates", &baseline, &profile),
            MetricOutcome::ProfileGuidedOnly { value: "12".into() }
        );
        assert_eq!(
            compare_metric("WallTime", &baseline, &profile),
            MetricOutcome::NonNumeric {
                baseline: "n/a".into(),
                profile_guided: "7".into(),
            }
        );
        assert_eq!(compare_metric("NumQueries", &baseline, &profile), MetricOutcome::Missing);
    }

    #[test]
    fn record_covers_every_metric_and_serializes_camel_case() {
        let rec = ComparisonRecord::new(
            "ls",
            "run-1",
            record(stats(&[("SolverTime", "10")])),
            record(stats(&[("SolverTime", "5")])),
        );
        assert_eq!(rec.metrics.len(), COMPARED_METRICS.len());
        assert_eq!(rec.improvement("SolverTime"), Some(50.0));
        assert_eq!(rec.improvement("QueryTime"), None);

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["baseline"]["exitCode"], 0);
        assert_eq!(json["profileGuided"]["artifactCount"], 1);
        assert_eq!(json["metrics"][1]["metric"], "SolverTime");
        assert_eq!(json["metrics"][1]["kind"], "improvement");

        let back: ComparisonRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn output_dirs_are_distinct_per_variant_and_run() {
        let request = DualRunRequest::for_program(
            "ls",
            None,
            None,
            Path::new("/art/ls/ls.base.bc"),
            Path::new("/art/ls/limitedValuedMap.json"),
            Some("r1".to_string()),
        );
        assert_eq!(request.output_dir(Variant::Baseline), PathBuf::from("/art/ls/klee-baseline-out-r1"));
        assert_eq!(request.output_dir(Variant::ProfileGuided), PathBuf::from("/art/ls/klee-profile-out-r1"));
        assert_eq!(request.symbolic_input[0], "--sym-args");
        assert!(request.invocation(Variant::Baseline).map_file.is_none());
    }

    #[test]
    fn default_run_id_is_a_timestamp() {
        let id = default_run_id();
        assert_eq!(id.len(), 15);
        assert_eq!(&id[8..9], "-");
    }
}
