use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefgraphError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid relocation table {}: {reason}", path.display())]
    Relocations { path: PathBuf, reason: String },

    #[error("invalid ignore glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("corpus root is not a directory: {}", .0.display())]
    InvalidRoot(PathBuf),

    #[error("failed to rewrite {}: {reason}", path.display())]
    WriteFailure { path: PathBuf, reason: String },
}

impl RefgraphError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RefgraphError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RefgraphError>;

/// Non-fatal problem reading one document
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanWarning {
    pub path: String,
    pub message: String,
}
