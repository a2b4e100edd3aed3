use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::trace::{self, Observation, TraceStats};
use crate::value_map::{sort_values, LimitedValueMap, MapKey, VariableValues};

pub const DEFAULT_MAX_VALUES: usize = 8;
pub const DEFAULT_MIN_OCCURRENCE: u64 = 3;

/// Filters deciding which variables count as limited-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_min_occurrence")]
    pub min_occurrence: u64,
    #[serde(rename = "max_values", default = "default_max_values")]
    pub max_cardinality: usize,
    #[serde(default = "default_true")]
    pub include_branchless: bool,
}

fn default_min_occurrence() -> u64 {
    DEFAULT_MIN_OCCURRENCE
}

fn default_max_values() -> usize {
    DEFAULT_MAX_VALUES
}

fn default_true() -> bool {
    true
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            min_occurrence: DEFAULT_MIN_OCCURRENCE,
            max_cardinality: DEFAULT_MAX_VALUES,
            include_branchless: true,
        }
    }
}

impl Thresholds {
    #[inline]
    fn admits(&self, occurrences: u64, cardinality: usize) -> bool {
        occurrences >= self.min_occurrence && cardinality <= self.max_cardinality
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
    pub site: i64,
    pub branch: i64,
    pub variable: String,
}

/// Distinct values and total observation count for one key.
#[derive(Debug, Default, Clone)]
pub struct ValueStats {
    values: FxHashSet<String>,  // Distinct observed values
    occurrences: u64,           // Every accepted observation, repeats included
}

impl ValueStats {
    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    pub fn cardinality(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &String> {
        self.values.iter()
    }
}

/// Flat table of observations keyed by `(site, branch, variable)`. Grouping by
/// site or branch happens only when a map is built.
#[derive(Debug, Default)]
pub struct ObservationTable {
    entries: FxHashMap<ObservationKey, ValueStats>,
}

impl ObservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, observation: Observation) {
        let key = ObservationKey {
            site: observation.site,
            branch: observation.branch,
            variable: observation.variable,
        };
        let stats = self.entries.entry(key).or_default();
        stats.occurrences += 1;
        stats.values.insert(observation.value);
    }

    pub fn get(&self, site: i64, branch: i64, variable: &str) -> Option<&ValueStats> {
        self.entries.get(&ObservationKey {
            site,
            branch,
            variable: variable.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the value map. Branch-qualified and branchless views are filtered
    /// independently: a variable may appear under either, both, or neither.
    pub fn build_map(&self, thresholds: &Thresholds) -> LimitedValueMap {
        let mut map = LimitedValueMap::new();

        // === Branch-qualified keys ===
        let mut by_branch: BTreeMap<(i64, i64), VariableValues> = BTreeMap::new();
        for (key, stats) in &self.entries {
            let vars = by_branch.entry((key.site, key.branch)).or_default();
            if thresholds.admits(stats.occurrences, stats.values.len()) {
                vars.insert(key.variable.clone(), sort_values(&stats.values));
            }
        }
        for ((site, branch), vars) in by_branch {
            map.insert(MapKey::branch(site, branch), vars);
        }

        // === Branchless keys: union of values, sum of counts per site ===
        if thresholds.include_branchless {
            let mut by_site: BTreeMap<i64, FxHashMap<&str, (FxHashSet<&String>, u64)>> = BTreeMap::new();
            for (key, stats) in &self.entries {
                let (values, occurrences) = by_site
                    .entry(key.site)
                    .or_default()
                    .entry(key.variable.as_str())
                    .or_default();
                values.extend(stats.values.iter());
                *occurrences += stats.occurrences;
            }

            for (site, variables) in by_site {
                let vars: VariableValues = variables
                    .into_iter()
                    .filter(|(_, (values, occurrences))| thresholds.admits(*occurrences, values.len()))
                    .map(|(name, (values, _))| (name.to_string(), sort_values(values)))
                    .collect();
                map.insert(MapKey::branchless(site), vars);
            }
        }

        map
    }
}

/// Outcome of turning one trace file into a value map.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub trace: TraceStats,
    pub thresholds: Thresholds,
    pub keys: usize,
    pub variables: usize,
}

/// Reads a trace file into a fresh table. A missing trace gives an empty table.
pub fn load_table<P: AsRef<Path>>(trace_path: P) -> Result<(ObservationTable, TraceStats)> {
    let mut table = ObservationTable::new();
    let stats = trace::read_trace(trace_path, |observation| table.record(observation))?;
    Ok((table, stats))
}

/// Trace file in, value map file out. Writing the map is the only fatal step.
pub fn generate_limited_map<P: AsRef<Path>, Q: AsRef<Path>>(
    trace_path: P,
    map_path: Q,
    thresholds: &Thresholds,
) -> Result<(LimitedValueMap, AggregationReport)> {
    let (table, trace) = match load_table(trace_path.as_ref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read trace, continuing with empty map");
            let trace = TraceStats {
                read_failed: true,
                ..TraceStats::default()
            };
            (ObservationTable::new(), trace)
        }
    };

    let map = table.build_map(thresholds);
    map.save(map_path.as_ref())?;

    let report = AggregationReport {
        trace,
        thresholds: *thresholds,
        keys: map.len(),
        variables: map.variable_count(),
    };
    tracing::info!(
        path = %map_path.as_ref().display(),
        keys = report.keys,
        variables = report.variables,
        accepted = trace.accepted,
        malformed = trace.malformed,
        "wrote limited value map"
    );
    Ok((map, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_map::ValueEntry;
    use pretty_assertions::assert_eq;

    fn obs(site: i64, branch: i64, variable: &str, value: &str) -> Observation {
        Observation {
            site,
            branch,
            variable: variable.to_string(),
            value: value.to_string(),
        }
    }

    fn table(observations: &[(i64, i64, &str, &str)]) -> ObservationTable {
        let mut table = ObservationTable::new();
        for &(site, branch, variable, value) in observations {
            table.record(obs(site, branch, variable, value));
        }
        table
    }

    fn values(map: &LimitedValueMap, key: MapKey, variable: &str) -> Option<Vec<String>> {
        map.get(&key)
            .and_then(|vars| vars.get(variable))
            .map(|entries| entries.iter().map(|e| e.value.clone()).collect())
    }

    fn thresholds(min_occurrence: u64, max_cardinality: usize, include_branchless: bool) -> Thresholds {
        Thresholds {
            min_occurrence,
            max_cardinality,
            include_branchless,
        }
    }

    #[test]
    fn record_counts_repeats_but_keeps_distinct_values() {
        let t = table(&[(1, 0, "x", "5"), (1, 0, "x", "5"), (1, 0, "x", "6")]);
        let stats = t.get(1, 0, "x").unwrap();
        assert_eq!(stats.occurrences(), 3);
        assert_eq!(stats.cardinality(), 2);
        assert!(stats.occurrences() >= stats.cardinality() as u64);
    }

    #[test]
    fn occurrence_threshold_excludes_rare_variables() {
        let t = table(&[(10, 1, "x", "1"), (10, 1, "x", "2"), (10, 1, "x", "3")]);

        let strict = t.build_map(&thresholds(4, 8, false));
        assert!(strict.is_empty());

        let lenient = t.build_map(&thresholds(3, 3, false));
        assert_eq!(values(&lenient, MapKey::branch(10, 1), "x"), Some(vec!["1".into(), "2".into(), "3".into()]));
    }

    #[test]
    fn cardinality_threshold_excludes_wide_variables() {
        let t = table(&[(10, 1, "x", "1"), (10, 1, "x", "2"), (10, 1, "x", "3")]);
        assert!(t.build_map(&thresholds(1, 2, true)).is_empty());
    }

    #[test]
    fn branchless_view_is_evaluated_independently() {
        // Each branch alone is too rare; together they reach the threshold.
        let t = table(&[
            (7, 0, "n", "1"),
            (7, 0, "n", "1"),
            (7, 1, "n", "2"),
        ]);
        let map = t.build_map(&thresholds(3, 8, true));
        assert_eq!(map.get(&MapKey::branch(7, 0)), None);
        assert_eq!(map.get(&MapKey::branch(7, 1)), None);
        assert_eq!(values(&map, MapKey::branchless(7), "n"), Some(vec!["1".into(), "2".into()]));

        // The union can also be too wide while single branches qualify.
        let map = t.build_map(&thresholds(1, 1, true));
        assert!(map.get(&MapKey::branch(7, 0)).is_some());
        assert!(map.get(&MapKey::branch(7, 1)).is_some());
        assert_eq!(map.get(&MapKey::branchless(7)), None);
    }

    #[test]
    fn branchless_keys_can_be_suppressed() {
        let t = table(&[(3, 0, "v", "a"), (3, 0, "v", "a"), (3, 0, "v", "a")]);
        let map = t.build_map(&thresholds(3, 8, false));
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![MapKey::branch(3, 0)]);
    }

    #[test]
    fn mixed_values_are_sorted_lexicographically() {
        let t = table(&[(1, 0, "s", "beta"), (1, 0, "s", "10"), (1, 0, "s", "alpha")]);
        let map = t.build_map(&thresholds(1, 8, false));
        assert_eq!(
            map.get(&MapKey::branch(1, 0)).unwrap()["s"],
            vec![ValueEntry::plain("10"), ValueEntry::plain("alpha"), ValueEntry::plain("beta")]
        );
    }

    #[test]
    fn missing_trace_still_writes_an_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("map.json");
        let (map, report) = generate_limited_map(dir.path().join("none.txt"), &out, &Thresholds::default()).unwrap();

        assert!(map.is_empty());
        assert!(report.trace.file_missing);
        assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "{}");
    }
}
