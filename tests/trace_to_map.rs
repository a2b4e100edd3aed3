use std::collections::BTreeSet;
use std::fs;

use pretty_assertions::assert_eq;
use profile_guided_bench_rs::aggregator::{generate_limited_map, ObservationTable, Thresholds};
use profile_guided_bench_rs::trace::{self, Observation};
use profile_guided_bench_rs::value_map::{LimitedValueMap, MapKey, ValueEntry};
use proptest::prelude::*;

const FIVE_LINE_TRACE: &str = "loc:10:branch:1\tx:1\n\
                               loc:10:branch:1\tx:2\n\
                               loc:10:branch:1\tx:3\n\
                               loc:10:branch:-1\tx:9\n\
                               loc:10:branch:1 x:4\n";

fn thresholds(min_occurrence: u64, max_cardinality: usize) -> Thresholds {
    Thresholds {
        min_occurrence,
        max_cardinality,
        include_branchless: true,
    }
}

fn values_of(map: &LimitedValueMap, key: &MapKey, variable: &str) -> Option<Vec<String>> {
    map.get(key)?
        .get(variable)
        .map(|entries| entries.iter().map(|e| e.value.clone()).collect())
}

#[test]
fn three_distinct_values_need_matching_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("vase_value_log.txt");
    fs::write(&trace_path, FIVE_LINE_TRACE).unwrap();
    let key = MapKey::branch(10, 1);

    let (map, report) = generate_limited_map(&trace_path, dir.path().join("strict.json"), &thresholds(4, 8)).unwrap();
    assert_eq!(report.trace.total_lines, 5);
    assert_eq!(report.trace.accepted, 3);
    assert_eq!(report.trace.negative_branch, 1);
    assert_eq!(report.trace.malformed, 1);
    assert_eq!(values_of(&map, &key, "x"), None);

    let (map, _) = generate_limited_map(&trace_path, dir.path().join("narrow.json"), &thresholds(2, 2)).unwrap();
    assert_eq!(values_of(&map, &key, "x"), None);

    let (map, _) = generate_limited_map(&trace_path, dir.path().join("ok.json"), &thresholds(3, 3)).unwrap();
    assert_eq!(values_of(&map, &key, "x"), Some(vec!["1".into(), "2".into(), "3".into()]));
    // The negative-branch line never reaches the branchless view either.
    assert_eq!(values_of(&map, &MapKey::branchless(10), "x"), Some(vec!["1".into(), "2".into(), "3".into()]));
}

#[test]
fn written_map_has_the_documented_json_shape() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.txt");
    fs::write(
        &trace_path,
        "loc:3:branch:0\tmode:10\nloc:3:branch:0\tmode:2\nloc:3:branch:1\tmode:2\n",
    )
    .unwrap();
    let map_path = dir.path().join("out").join("limitedValuedMap.json");

    generate_limited_map(&trace_path, &map_path, &thresholds(1, 8)).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&map_path).unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "loc:3": { "mode": [{"type": 0, "value": "2"}, {"type": 0, "value": "10"}] },
            "loc:3:branch:0": { "mode": [{"type": 0, "value": "2"}, {"type": 0, "value": "10"}] },
            "loc:3:branch:1": { "mode": [{"type": 0, "value": "2"}] }
        })
    );

    let loaded = LimitedValueMap::load(&map_path).unwrap();
    assert_eq!(
        loaded.get(&MapKey::branch(3, 1)).unwrap()["mode"],
        vec![ValueEntry::plain("2")]
    );
}

#[test]
fn missing_trace_still_writes_an_empty_map() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("limitedValuedMap.json");

    let (map, report) =
        generate_limited_map(dir.path().join("absent.txt"), &map_path, &Thresholds::default()).unwrap();
    assert!(map.is_empty());
    assert!(report.trace.file_missing);
    assert!(!report.trace.read_failed);
    assert_eq!(fs::read_to_string(&map_path).unwrap().trim(), "{}");
}

#[cfg(target_os = "linux")]
#[test]
fn unreadable_trace_is_flagged_and_still_writes_an_empty_map() {
    let dir = tempfile::tempdir().unwrap();
    // Opening a directory succeeds on Linux; reading it does not.
    let trace_path = dir.path().join("trace_dir");
    fs::create_dir(&trace_path).unwrap();
    let map_path = dir.path().join("limitedValuedMap.json");

    let (map, report) = generate_limited_map(&trace_path, &map_path, &Thresholds::default()).unwrap();
    assert!(map.is_empty());
    assert!(report.trace.read_failed);
    assert!(!report.trace.file_missing);
    assert_eq!(fs::read_to_string(&map_path).unwrap().trim(), "{}");
}

#[test]
fn zero_padded_ids_share_one_key() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.txt");
    fs::write(&trace_path, "loc:07:branch:1\tx:1\nloc:7:branch:01\tx:2\n").unwrap();

    let (map, _) = generate_limited_map(&trace_path, dir.path().join("map.json"), &thresholds(2, 4)).unwrap();
    assert_eq!(values_of(&map, &MapKey::branch(7, 1), "x"), Some(vec!["1".into(), "2".into()]));
    assert!(map.to_json().unwrap().contains("\"loc:7:branch:1\""));
}

#[test]
fn invalid_utf8_lines_are_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("trace.txt");
    let mut bytes = b"loc:1:branch:0\tname:\xff\xfe\n".to_vec();
    bytes.extend_from_slice(b"loc:1:branch:0\tn:5\n");
    fs::write(&trace_path, bytes).unwrap();

    let parsed = trace::parse_trace(&trace_path).unwrap();
    assert_eq!(parsed.stats.accepted, 2);
    assert_eq!(parsed.observations[1].value, "5");
}

#[derive(Debug, Clone)]
enum Line {
    Accepted(i64, i64, &'static str, u8),
    Negative(i64),
    Malformed(String),
    Blank,
}

impl Line {
    fn render(&self) -> String {
        match self {
            Line::Accepted(site, branch, var, value) => format!("loc:{site}:branch:{branch}\t{var}:{value}"),
            Line::Negative(site) => format!("loc:{site}:branch:-1\tv:0"),
            Line::Malformed(text) => text.clone(),
            Line::Blank => "   ".to_string(),
        }
    }
}

fn count(lines: &[Line], pred: fn(&Line) -> bool) -> u64 {
    lines.iter().filter(|line| pred(line)).count() as u64
}

fn line_strategy() -> impl Strategy<Value = Line> {
    prop_oneof![
        4 => (0i64..4, 0i64..3, prop::sample::select(vec!["a", "b", "c"]), 0u8..12)
            .prop_map(|(s, b, v, x)| Line::Accepted(s, b, v, x)),
        1 => (0i64..4).prop_map(Line::Negative),
        1 => "[a-z][a-z ]{0,11}".prop_map(Line::Malformed),
        1 => Just(Line::Blank),
    ]
}

fn observations_strategy() -> impl Strategy<Value = Vec<Observation>> {
    prop::collection::vec(
        (0i64..4, 0i64..3, prop::sample::select(vec!["a", "b", "c"]), 0u8..12),
        0..120,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .map(|(site, branch, variable, value)| Observation {
                site,
                branch,
                variable: variable.to_string(),
                value: value.to_string(),
            })
            .collect()
    })
}

fn table_of(observations: &[Observation]) -> ObservationTable {
    let mut table = ObservationTable::new();
    for observation in observations {
        table.record(observation.clone());
    }
    table
}

/// Every `(key, variable)` pair present in the map.
fn pairs(map: &LimitedValueMap) -> BTreeSet<(String, String)> {
    map.iter()
        .flat_map(|(key, vars)| vars.keys().map(move |var| (key.to_string(), var.clone())))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn line_counters_partition_the_file(lines in prop::collection::vec(line_strategy(), 0..60)) {
        let text: String = lines.iter().map(|l| l.render() + "\n").collect();
        let stats = trace::read_lines(text.as_bytes(), |_| {}).unwrap();

        prop_assert_eq!(stats.total_lines, lines.len() as u64);
        prop_assert_eq!(stats.accepted, count(&lines, |l| matches!(l, Line::Accepted(..))));
        prop_assert_eq!(stats.negative_branch, count(&lines, |l| matches!(l, Line::Negative(_))));
        prop_assert_eq!(stats.malformed, count(&lines, |l| matches!(l, Line::Malformed(_))));
        prop_assert_eq!(stats.blank_lines(), count(&lines, |l| matches!(l, Line::Blank)));
    }

    #[test]
    fn admitted_variables_satisfy_thresholds(
        observations in observations_strategy(),
        min_occurrence in 1u64..6,
        max_cardinality in 1usize..6,
    ) {
        let table = table_of(&observations);
        let map = table.build_map(&thresholds(min_occurrence, max_cardinality));

        for (key, vars) in map.iter() {
            let Some(branch) = key.branch else { continue };
            for (variable, values) in vars {
                let stats = table.get(key.site, branch, variable).unwrap();
                prop_assert!(stats.occurrences() >= min_occurrence);
                prop_assert!(stats.cardinality() <= max_cardinality);
                prop_assert_eq!(values.len(), stats.cardinality());
            }
        }
    }

    #[test]
    fn tightening_thresholds_never_grows_the_map(
        observations in observations_strategy(),
        min_occurrence in 1u64..5,
        max_cardinality in 1usize..6,
    ) {
        let table = table_of(&observations);
        let loose = pairs(&table.build_map(&thresholds(min_occurrence, max_cardinality)));
        let higher_min = pairs(&table.build_map(&thresholds(min_occurrence + 1, max_cardinality)));
        let lower_max = pairs(&table.build_map(&thresholds(min_occurrence, max_cardinality.saturating_sub(1))));

        prop_assert!(higher_min.is_subset(&loose));
        prop_assert!(lower_max.is_subset(&loose));
    }

    #[test]
    fn branchless_values_cover_every_branch(observations in observations_strategy()) {
        let map = table_of(&observations).build_map(&thresholds(1, usize::MAX));

        for (key, vars) in map.iter() {
            let Some(_) = key.branch else { continue };
            let branchless = map.get(&MapKey::branchless(key.site)).unwrap();
            for (variable, values) in vars {
                let union = &branchless[variable];
                prop_assert!(union.len() >= values.len());
                prop_assert!(values.iter().all(|v| union.contains(v)));
            }
        }
    }

    #[test]
    fn map_survives_a_json_round_trip(observations in observations_strategy()) {
        let map = table_of(&observations).build_map(&thresholds(1, 4));
        let back: LimitedValueMap = serde_json::from_str(&map.to_json().unwrap()).unwrap();
        prop_assert_eq!(back, map);
    }
}
