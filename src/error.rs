use std::path::PathBuf;
use thiserror::Error;

/// Failures while reading or writing one of the INI-backed files.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PathError {
    #[error("unsupported operating system: {0}")]
    UnsupportedOs(String),

    #[error("no documents directory found")]
    NoDocuments,

    #[error("could not resolve the home directory")]
    NoHome,

    #[error("invalid game exe path '{0}'")]
    InvalidGameExe(PathBuf),

    #[error("selection cancelled")]
    Cancelled,
}
