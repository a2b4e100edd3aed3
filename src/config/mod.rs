use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregator::Thresholds;
use crate::error::{Error, Result};

pub const ENGINE_BIN_ENV: &str = "KLEE_BIN";
pub const ARTIFACTS_ROOT_ENV: &str = "EVP_ROOT";
const DEFAULT_ENGINE_BIN: &str = "klee";
const ARTIFACTS_DIR_NAME: &str = "evp_artifacts";

/// How a category's programs are packaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramKind {
    #[default]
    Cli,
    Library,
}

/// Engine settings shared by every program of a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub symbolic_inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    #[serde(rename = "type", default)]
    pub kind: ProgramKind,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(rename = "klee_config", default)]
    pub engine: EngineConfig,
    /// Argument vector that exercises an instrumented program so it writes its
    /// value trace. `{program}` is substituted in every element.
    #[serde(default)]
    pub profile_cmd: Option<Vec<String>>,
}

/// Category name to category settings, as read from `programs.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    categories: BTreeMap<String, CategoryConfig>,
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        let config: PipelineConfig = serde_json::from_str(&content).map_err(|err| Error::json(path, err))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, category) in &self.categories {
            if category.thresholds.max_cardinality == 0 {
                return Err(Error::Config(format!("category '{name}': max_values must be at least 1")));
            }
            if let Some(cmd) = &category.profile_cmd {
                if cmd.is_empty() {
                    return Err(Error::Config(format!("category '{name}': profile_cmd is empty")));
                }
            }
        }
        Ok(())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.get(name)
    }

    pub fn insert(&mut self, name: &str, category: CategoryConfig) {
        self.categories.insert(name.to_string(), category);
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &CategoryConfig)> {
        self.categories.iter().map(|(name, category)| (name.as_str(), category))
    }
}

/// Where the engine lives and where per-program artifacts are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub engine_bin: PathBuf,
    pub artifacts_root: PathBuf,
}

impl EngineSettings {
    /// Reads `KLEE_BIN` and `EVP_ROOT`; unset variables fall back to `klee` on
    /// the `PATH` and the current directory.
    pub fn from_env() -> Self {
        let engine_bin = env::var_os(ENGINE_BIN_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_BIN));
        let root = env::var_os(ARTIFACTS_ROOT_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        EngineSettings {
            engine_bin,
            artifacts_root: root.join(ARTIFACTS_DIR_NAME),
        }
    }

    /// Artifact directory of one program.
    pub fn program_dir(&self, category: &str, program: &str) -> PathBuf {
        self.artifacts_root.join(category).join(program)
    }
}
