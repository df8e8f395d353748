//! Error types for geosync-sync.

use std::path::PathBuf;

use thiserror::Error;

use geosync_core::SpecError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the metadata store or configuration.
    #[error("spec error: {0}")]
    Spec(#[from] SpecError),

    /// Workspace or run input is unusable (missing workspace, bad run list).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The data source has no dataset of this name.
    #[error("dataset not found: {name}")]
    DatasetNotFound { name: String },

    /// The data source failed while reading or copying a dataset.
    #[error("data source error for {dataset}: {message}")]
    Source { dataset: String, message: String },

    /// The remote store rejected or failed an operation.
    #[error("remote store error during {operation}: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    /// Building or unpacking an archive failed.
    #[error("archive error at {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Upload-only mode found fewer archives than it needs.
    #[error("required archives missing in {dir}: {}", .missing.join(", "))]
    ArchivesMissing { dir: PathBuf, missing: Vec<String> },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (manifests, datasets, store index).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Configuration problems: the item cannot be processed at all.
    pub fn is_fatal_config(&self) -> bool {
        match self {
            SyncError::Spec(e) => e.is_config(),
            SyncError::Config { .. } | SyncError::DatasetNotFound { .. } => true,
            _ => false,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Config`].
pub(crate) fn config_err(message: impl ToString) -> SyncError {
    SyncError::Config {
        message: message.to_string(),
    }
}

/// Convenience constructor for [`SyncError::Remote`].
pub(crate) fn remote_err(operation: &'static str, message: impl ToString) -> SyncError {
    SyncError::Remote {
        operation,
        message: message.to_string(),
    }
}
