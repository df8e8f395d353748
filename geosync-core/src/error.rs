//! Error types for geosync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from metadata store and configuration operations.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Underlying I/O failure, with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spec document failed to parse on load.
    #[error("failed to parse spec at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file failed to parse.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// The spec document did not exist at the expected path.
    #[error("spec not found at {path}")]
    NotFound { path: PathBuf },
}

impl SpecError {
    /// Configuration problems abort a whole run instead of a single item.
    pub fn is_config(&self) -> bool {
        matches!(self, SpecError::ConfigNotFound { .. } | SpecError::ConfigParse { .. })
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SpecError {
    SpecError::Io {
        path: path.into(),
        source,
    }
}
