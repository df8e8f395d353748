//! geosync core library: domain types, metadata store, configuration, errors.
//!
//! - [`types`]: feature/package specs and record values
//! - [`spec_store`]: load / save / list spec documents
//! - [`config`]: `geosync.yaml` workspace configuration
//! - [`error`]: [`SpecError`]

pub mod config;
pub mod error;
pub mod spec_store;
pub mod types;

pub use config::SyncConfig;
pub use error::SpecError;
pub use spec_store::SpecStore;
pub use types::{
    ArchiveKind, DatasetKind, FeatureSpec, FieldDef, FieldType, FieldValue, PackageName,
    PackageSpec, RemoteId,
};
