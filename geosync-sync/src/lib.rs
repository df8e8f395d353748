//! # geosync-sync
//!
//! Change detection and idempotent build/upload of features and packages.
//!
//! Call [`execute`] with a [`RunScope`] to drive a whole run, or use a
//! [`SyncContext`] directly to run single feature and package lifecycles.

pub mod archive;
pub mod builder;
pub mod change;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod orchestrator;
pub mod pipeline;
pub mod remote;
pub mod source;

pub use change::{detect_changes, ChangeRecord};
pub use error::SyncError;
pub use fingerprint::{build_manifest, is_structural, HashManifest};
pub use orchestrator::{
    FeatureOutcome, FeatureReport, FeatureState, PackageReport, PackageState, SyncContext,
    SyncOptions,
};
pub use pipeline::{execute, ExitStatus, RunList, RunOptions, RunScope, RunSummary};
pub use remote::{DirectoryRemote, RemoteStore};
pub use source::{DataSource, JsonWorkspace};
