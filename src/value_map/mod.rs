use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Key of a value map entry: `loc:<site>` (branchless) or
/// `loc:<site>:branch:<branch>` (branch-qualified).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapKey {
    pub site: i64,
    pub branch: Option<i64>,
}

impl MapKey {
    pub fn branchless(site: i64) -> Self {
        MapKey { site, branch: None }
    }

    pub fn branch(site: i64, branch: i64) -> Self {
        MapKey {
            site,
            branch: Some(branch),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch {
            Some(branch) => write!(f, "loc:{}:branch:{}", self.site, branch),
            None => write!(f, "loc:{}", self.site),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMapKeyError(String);

impl fmt::Display for ParseMapKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value map key {:?}", self.0)
    }
}

impl std::error::Error for ParseMapKeyError {}

impl FromStr for MapKey {
    type Err = ParseMapKeyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || ParseMapKeyError(s.to_string());
        let rest = s.strip_prefix("loc:").ok_or_else(err)?;
        match rest.split_once(":branch:") {
            Some((site, branch)) => Ok(MapKey::branch(
                site.parse().map_err(|_| err())?,
                branch.parse().map_err(|_| err())?,
            )),
            None => Ok(MapKey::branchless(rest.parse().map_err(|_| err())?)),
        }
    }
}

impl Serialize for MapKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = MapKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a key of the form loc:<site> or loc:<site>:branch:<branch>")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MapKey, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// Value classification understood by the engine. Only plain values exist today.
pub const VALUE_KIND_PLAIN: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    #[serde(rename = "type")]
    pub kind: u32,
    pub value: String,
}

impl ValueEntry {
    pub fn plain(value: impl Into<String>) -> Self {
        ValueEntry {
            kind: VALUE_KIND_PLAIN,
            value: value.into(),
        }
    }
}

/// Variables (and their sorted limited value sets) for one map key.
pub type VariableValues = BTreeMap<String, Vec<ValueEntry>>;

/// The aggregator's output, serialized as the JSON value map handed to the
/// profile-guided engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitedValueMap {
    entries: BTreeMap<MapKey, VariableValues>,
}

impl LimitedValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key; empty variable sets are dropped so the map never holds
    /// keys without variables.
    pub(crate) fn insert(&mut self, key: MapKey, variables: VariableValues) {
        if !variables.is_empty() {
            self.entries.insert(key, variables);
        }
    }

    pub fn get(&self, key: &MapKey) -> Option<&VariableValues> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &VariableValues)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of (key, variable) pairs.
    pub fn variable_count(&self) -> usize {
        self.entries.values().map(|vars| vars.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes the map as pretty JSON, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }
        let json = self.to_json().map_err(|err| Error::json(path, err))?;
        fs::write(path, json).map_err(|err| Error::io(path, err))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        serde_json::from_str(&content).map_err(|err| Error::json(path, err))
    }
}

/// Sorts distinct values numerically when every one parses as an integer,
/// lexicographically otherwise. Numerically equal spellings (`7`, `07`) fall
/// back to lexicographic order.
pub fn sort_values<'a, I>(values: I) -> Vec<ValueEntry>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut values: Vec<&String> = values.into_iter().collect();
    let numeric: Option<Vec<(i128, &String)>> = values
        .iter()
        .map(|v| v.parse::<i128>().ok().map(|n| (n, *v)))
        .collect();

    match numeric {
        Some(mut pairs) => {
            pairs.sort();
            pairs.into_iter().map(|(_, v)| ValueEntry::plain(v.as_str())).collect()
        }
        None => {
            values.sort();
            values.into_iter().map(|v| ValueEntry::plain(v.as_str())).collect()
        }
    }
}
