use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Phase;

/// Errors that abort an operation. Recoverable conditions (bad trace lines,
/// missing statistics, failed engine runs) never surface here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing artifact {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("empty artifact {}", .0.display())]
    EmptyArtifact(PathBuf),

    #[error("{phase} phase failed: {message}")]
    Phase { phase: Phase, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }
}
