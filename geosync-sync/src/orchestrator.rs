//! Sync orchestrator: feature and package lifecycles.
//!
//! ## Feature lifecycle
//!
//! ```text
//! START ─┬─ skip flag ──────────────────────────────────────────► SKIPPED → DONE
//!        └─ RESOLVE_FOLDERS → LOAD_PRIOR_HASH → DETECT_CHANGE ─┬─ unchanged ─► DONE
//!                                                              └─ changed/forced
//!                                         BUILD → UPLOAD → PERSIST_SPEC → DONE
//! ```
//!
//! ## Package lifecycle
//!
//! ```text
//! START → RESOLVE_FOLDERS → (ENSURE_LOCAL_COPY → MERGE)* → BUILD → UPLOAD → PERSIST_SPEC → DONE
//! ```
//!
//! `PERSIST_SPEC` is the durability boundary: identifiers assigned by uploads
//! only reach the metadata store once every upload of the item succeeded.
//! Remote folders are always looked up before they are created, and stored
//! archive identifiers are updated in place, so re-running after a failure
//! is safe.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use geosync_core::{ArchiveKind, FeatureSpec, PackageName, RemoteId, SpecStore, SyncConfig};

use crate::archive::extract_archive;
use crate::builder::{archive_feature, export_feature, ArchiveSet, FeatureExport, PackageBuild};
use crate::change::{detect_changes, ChangeRecord};
use crate::error::{io_err, SyncError};
use crate::fingerprint::build_manifest;
use crate::manifest::{manifest_path, PriorManifest};
use crate::remote::{RemoteStore, ARCHIVE_MIME};
use crate::source::DataSource;

/// Remote folder, nested under a package's category folder, holding packages.
pub const PACKAGES_FOLDER: &str = "packages";

/// Local directory (under the output dir) receiving downloaded manifests.
const PRIOR_HASH_DIR: &str = "pasthashes";

// ---------------------------------------------------------------------------
// States and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureState {
    Start,
    Skipped,
    ResolveFolders,
    LoadPriorHash,
    DetectChange,
    Build,
    Upload,
    PersistSpec,
    Done,
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeatureState::Start => "START",
            FeatureState::Skipped => "SKIPPED",
            FeatureState::ResolveFolders => "RESOLVE_FOLDERS",
            FeatureState::LoadPriorHash => "LOAD_PRIOR_HASH",
            FeatureState::DetectChange => "DETECT_CHANGE",
            FeatureState::Build => "BUILD",
            FeatureState::Upload => "UPLOAD",
            FeatureState::PersistSpec => "PERSIST_SPEC",
            FeatureState::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageState {
    Start,
    ResolveFolders,
    EnsureLocalCopy,
    Merge,
    Build,
    Upload,
    PersistSpec,
    Done,
}

/// How a feature lifecycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FeatureOutcome {
    /// Permanently skipped; nothing was read or uploaded.
    Skipped,
    /// Fresh manifest matched the prior one.
    Unchanged { change: ChangeRecord },
    /// Built (and uploaded unless uploads are disabled).
    Updated {
        change: ChangeRecord,
        forced: bool,
        uploaded: bool,
    },
    /// Upload-only mode pushed archives built by an earlier run.
    Uploaded,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureReport {
    pub source_name: String,
    pub states: Vec<FeatureState>,
    pub outcome: FeatureOutcome,
    /// Package memberships to chain into package syncs.
    pub packages: BTreeSet<PackageName>,
}

impl FeatureReport {
    /// Packages that need a rebuild because of this feature.
    pub fn affected_packages(&self) -> &BTreeSet<PackageName> {
        &self.packages
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub name: PackageName,
    pub states: Vec<PackageState>,
    /// Members that had to be synced first because no export existed.
    pub synced_members: Vec<String>,
    /// Lifecycle reports of `synced_members`, handed back to the batch so the
    /// run summary lists them as features.
    #[serde(skip)]
    pub member_reports: Vec<FeatureReport>,
    /// Members merged from an export built earlier in this run.
    pub merged_local: Vec<String>,
    /// Members merged straight from the live source.
    pub merged_source: Vec<String>,
    pub uploaded: bool,
}

/// Per-run switches shared by every lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Build and upload even when no change was detected.
    pub force: bool,
    /// `false` builds archives locally without uploading them.
    pub upload: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            upload: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote helpers
// ---------------------------------------------------------------------------

/// Folder `name` under `parent`, created only if the lookup misses.
pub fn ensure_folder(
    remote: &mut dyn RemoteStore,
    name: &str,
    parent: &RemoteId,
) -> Result<RemoteId, SyncError> {
    if let Some(id) = remote.find_folder(name, parent)? {
        return Ok(id);
    }
    tracing::info!(folder = name, parent = %parent, "creating remote folder");
    remote.create_folder(name, parent)
}

/// `root / category / name`; returns the innermost folder id.
pub fn resolve_folders(
    remote: &mut dyn RemoteStore,
    root: &RemoteId,
    category: &str,
    name: &str,
) -> Result<RemoteId, SyncError> {
    let category_id = ensure_folder(remote, category, root)?;
    ensure_folder(remote, name, &category_id)
}

/// Update the archive in place when `slot` holds an identifier, otherwise
/// look it up by file name under the first parent and only create it when
/// the lookup misses. The resulting identifier is stored in `slot`, and the
/// uploaded content is retained as a revision.
///
/// The lookup lets a rerun adopt a file uploaded by an earlier attempt whose
/// identifier never reached `PERSIST_SPEC`.
pub fn upload_or_update(
    remote: &mut dyn RemoteStore,
    slot: &mut Option<RemoteId>,
    local: &Path,
    parents: &[RemoteId],
) -> Result<RemoteId, SyncError> {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| local.display().to_string());
    let existing = match (slot.as_ref(), parents.first()) {
        (Some(id), _) => Some(id.clone()),
        (None, Some(parent)) => remote.find_file(&name, parent)?,
        (None, None) => None,
    };

    let id = match existing {
        Some(id) => {
            if slot.is_none() {
                tracing::info!(file = %name, id = %id, "adopting archive left by an earlier run");
            }
            remote.update_file(&id, local, ARCHIVE_MIME)?;
            id
        }
        None => remote.create_file(&name, parents, local, ARCHIVE_MIME)?,
    };
    *slot = Some(id.clone());
    remote.keep_revision(&id)?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// SyncContext
// ---------------------------------------------------------------------------

/// Everything one run needs, passed explicitly: the data source, the open
/// remote session, the metadata store and configuration.
pub struct SyncContext<'a> {
    source: &'a dyn DataSource,
    remote: &'a mut dyn RemoteStore,
    specs: &'a SpecStore,
    config: &'a SyncConfig,
    options: SyncOptions,
    synced: BTreeSet<String>,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        source: &'a dyn DataSource,
        remote: &'a mut dyn RemoteStore,
        specs: &'a SpecStore,
        config: &'a SyncConfig,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            remote,
            specs,
            config,
            options,
            synced: BTreeSet::new(),
        }
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    pub fn specs(&self) -> &SpecStore {
        self.specs
    }

    pub fn config(&self) -> &SyncConfig {
        self.config
    }

    /// Source names whose feature lifecycle already ran in this context.
    pub fn synced_features(&self) -> &BTreeSet<String> {
        &self.synced
    }

    // -----------------------------------------------------------------------
    // Feature lifecycle
    // -----------------------------------------------------------------------

    pub fn sync_feature(&mut self, source_name: &str) -> Result<FeatureReport, SyncError> {
        tracing::info!(feature = source_name, "starting feature");
        let mut states = vec![FeatureState::Start];
        let mut spec = self.specs.get_or_create_feature(source_name)?;

        if spec.skip {
            enter(&mut states, FeatureState::Skipped, source_name);
            enter(&mut states, FeatureState::Done, source_name);
            tracing::info!(feature = source_name, "permanently skipped");
            return Ok(FeatureReport {
                source_name: source_name.to_string(),
                states,
                outcome: FeatureOutcome::Skipped,
                packages: spec.member_of_packages,
            });
        }

        if !self.source.exists(source_name) {
            return Err(SyncError::DatasetNotFound {
                name: source_name.to_string(),
            });
        }
        self.synced.insert(source_name.to_string());

        enter(&mut states, FeatureState::ResolveFolders, source_name);
        let folder = resolve_folders(
            self.remote,
            &self.config.root_folder_id,
            &spec.category,
            &spec.display_name,
        )?;
        spec.add_parent_folder(folder);

        enter(&mut states, FeatureState::LoadPriorHash, source_name);
        let prior = self.load_prior_manifest(&spec)?;

        enter(&mut states, FeatureState::DetectChange, source_name);
        let output_dir = self.config.output_dir.clone();
        let key = spec.output_key();
        let manifest = build_manifest(self.source, source_name, &manifest_path(&output_dir, &key))?;
        let change = detect_changes(&manifest, prior.as_ref());
        tracing::info!(
            feature = source_name,
            rows = manifest.len(),
            added = change.added,
            removed = change.removed,
            first_sync = change.first_sync,
            "change detection finished"
        );

        if !change.changed && !self.options.force {
            enter(&mut states, FeatureState::Done, source_name);
            return Ok(FeatureReport {
                source_name: source_name.to_string(),
                states,
                outcome: FeatureOutcome::Unchanged { change },
                packages: BTreeSet::new(),
            });
        }

        enter(&mut states, FeatureState::Build, source_name);
        let export = export_feature(
            self.source,
            source_name,
            &output_dir,
            &key,
            &spec.display_name,
        )?;
        let archives = archive_feature(&export, &output_dir, &key)?;

        let uploaded = self.options.upload;
        if uploaded {
            enter(&mut states, FeatureState::Upload, source_name);
            self.upload_feature_archives(&mut spec, &archives)?;
        }

        enter(&mut states, FeatureState::PersistSpec, source_name);
        spec.synced_at = Some(Utc::now());
        self.specs.save_feature(&spec)?;

        enter(&mut states, FeatureState::Done, source_name);
        Ok(FeatureReport {
            source_name: source_name.to_string(),
            states,
            outcome: FeatureOutcome::Updated {
                change,
                forced: !change.changed,
                uploaded,
            },
            packages: spec.member_of_packages,
        })
    }

    /// Upload archives left behind by an earlier no-upload run.
    ///
    /// Fails with [`SyncError::ArchivesMissing`] unless all three exist.
    pub fn upload_archives(&mut self, source_name: &str) -> Result<FeatureReport, SyncError> {
        let mut states = vec![FeatureState::Start];
        let mut spec = self.specs.get_or_create_feature(source_name)?;
        let archives = ArchiveSet::for_feature(&self.config.output_dir, &spec.output_key());
        let missing = archives.missing();
        if !missing.is_empty() {
            return Err(SyncError::ArchivesMissing {
                dir: self.config.output_dir.clone(),
                missing,
            });
        }

        enter(&mut states, FeatureState::ResolveFolders, source_name);
        let folder = resolve_folders(
            self.remote,
            &self.config.root_folder_id,
            &spec.category,
            &spec.display_name,
        )?;
        spec.add_parent_folder(folder);

        enter(&mut states, FeatureState::Upload, source_name);
        self.upload_feature_archives(&mut spec, &archives)?;

        enter(&mut states, FeatureState::PersistSpec, source_name);
        spec.synced_at = Some(Utc::now());
        self.specs.save_feature(&spec)?;

        enter(&mut states, FeatureState::Done, source_name);
        Ok(FeatureReport {
            source_name: source_name.to_string(),
            states,
            outcome: FeatureOutcome::Uploaded,
            packages: spec.member_of_packages,
        })
    }

    fn load_prior_manifest(&self, spec: &FeatureSpec) -> Result<Option<PriorManifest>, SyncError> {
        let Some(hash_id) = spec.archive_id(ArchiveKind::Hash) else {
            return Ok(None);
        };
        let key = spec.output_key();
        let prior_dir = self.config.output_dir.join(PRIOR_HASH_DIR);
        let unpacked = prior_dir.join(format!("{key}_hash"));
        if unpacked.exists() {
            std::fs::remove_dir_all(&unpacked).map_err(|e| io_err(&unpacked, e))?;
        }

        let download = prior_dir.join(format!("{key}_hash.tar.gz"));
        self.remote.download_file(hash_id, &download)?;
        extract_archive(&download, &prior_dir)?;
        tracing::debug!(feature = %spec.source_name, "prior manifest downloaded");

        PriorManifest::load(&manifest_path(&prior_dir, &key)).map(Some)
    }

    fn upload_feature_archives(
        &mut self,
        spec: &mut FeatureSpec,
        archives: &ArchiveSet,
    ) -> Result<(), SyncError> {
        let data_parents: Vec<RemoteId> = spec.parent_folder_ids.iter().cloned().collect();
        let hash_parents = vec![self.config.hash_folder_id.clone()];
        for (kind, path) in archives.iter() {
            let parents = if kind == ArchiveKind::Hash {
                &hash_parents
            } else {
                &data_parents
            };
            let id = upload_or_update(self.remote, spec.archive_slot_mut(kind), path, parents)?;
            tracing::info!(feature = %spec.source_name, archive = %kind, id = %id, "archive uploaded");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Package lifecycle
    // -----------------------------------------------------------------------

    pub fn sync_package(&mut self, name: &PackageName) -> Result<PackageReport, SyncError> {
        tracing::info!(package = %name, "starting package");
        let mut spec = self.specs.load_package(name)?;
        let mut report = PackageReport {
            name: name.clone(),
            states: vec![PackageState::Start],
            synced_members: Vec::new(),
            member_reports: Vec::new(),
            merged_local: Vec::new(),
            merged_source: Vec::new(),
            uploaded: false,
        };

        report.states.push(PackageState::ResolveFolders);
        let category_id = ensure_folder(self.remote, &spec.category, &self.config.root_folder_id)?;
        let packages_id = ensure_folder(self.remote, PACKAGES_FOLDER, &category_id)?;
        let folder = ensure_folder(self.remote, &spec.name.0, &packages_id)?;
        spec.add_parent_folder(folder);

        let package_dir = self.config.package_output_dir();
        let output_dir = self.config.output_dir.clone();
        let mut build = PackageBuild::start(self.source, &package_dir, &spec.name.0)?;

        for member in spec.feature_classes.clone() {
            report.states.push(PackageState::EnsureLocalCopy);
            let member_spec = self.specs.get_or_create_feature(&member)?;
            let member_key = member_spec.output_key();
            let member_name = member_spec.display_name;
            if !self.synced.contains(&member)
                && FeatureExport::existing(&output_dir, &member_key).is_none()
            {
                tracing::info!(package = %name, feature = %member, "member not synced this run");
                let member_report = self.sync_feature(&member)?;
                report.synced_members.push(member.clone());
                report.member_reports.push(member_report);
            }

            report.states.push(PackageState::Merge);
            match FeatureExport::existing(&output_dir, &member_key) {
                Some(export) => {
                    build.add_local(&export, &member_name)?;
                    report.merged_local.push(member.clone());
                }
                None => {
                    build.add_from_source(self.source, &member, &member_name)?;
                    report.merged_source.push(member.clone());
                }
            }
        }

        report.states.push(PackageState::Build);
        let archives = build.archive()?;

        if self.options.upload {
            report.states.push(PackageState::Upload);
            let parents: Vec<RemoteId> = spec.parent_folder_ids.iter().cloned().collect();
            for (kind, path) in archives.iter() {
                if let Some(slot) = spec.archive_slot_mut(kind) {
                    let id = upload_or_update(self.remote, slot, path, &parents)?;
                    tracing::info!(package = %name, archive = %kind, id = %id, "archive uploaded");
                }
            }
            report.uploaded = true;
        }

        report.states.push(PackageState::PersistSpec);
        spec.synced_at = Some(Utc::now());
        self.specs.save_package(&spec)?;

        report.states.push(PackageState::Done);
        Ok(report)
    }
}

fn enter(states: &mut Vec<FeatureState>, state: FeatureState, feature: &str) {
    tracing::debug!(feature, state = %state, "feature state");
    states.push(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DirectoryRemote;
    use tempfile::TempDir;

    /// Remote that fails every file creation, for partial-failure tests.
    struct FailingCreates(DirectoryRemote);

    impl RemoteStore for FailingCreates {
        fn find_folder(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError> {
            self.0.find_folder(name, parent)
        }
        fn create_folder(&mut self, name: &str, parent: &RemoteId) -> Result<RemoteId, SyncError> {
            self.0.create_folder(name, parent)
        }
        fn find_file(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError> {
            self.0.find_file(name, parent)
        }
        fn create_file(
            &mut self,
            _name: &str,
            _parents: &[RemoteId],
            _local: &Path,
            _mime: &str,
        ) -> Result<RemoteId, SyncError> {
            Err(crate::error::remote_err("create_file", "quota exceeded"))
        }
        fn update_file(&mut self, id: &RemoteId, local: &Path, mime: &str) -> Result<(), SyncError> {
            self.0.update_file(id, local, mime)
        }
        fn keep_revision(&mut self, id: &RemoteId) -> Result<(), SyncError> {
            self.0.keep_revision(id)
        }
        fn download_file(&self, id: &RemoteId, dest: &Path) -> Result<(), SyncError> {
            self.0.download_file(id, dest)
        }
    }

    #[test]
    fn ensure_folder_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut remote = DirectoryRemote::open(tmp.path()).unwrap();
        let root = RemoteId::from("root");
        let first = resolve_folders(&mut remote, &root, "WATER", "Lakes").unwrap();
        let second = resolve_folders(&mut remote, &root, "WATER", "Lakes").unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.folder_count(), 2);
    }

    #[test]
    fn upload_with_existing_id_updates_in_place() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("Lakes_gdb.tar.gz");
        std::fs::write(&local, "v1").unwrap();
        let mut remote = DirectoryRemote::open(tmp.path().join("remote")).unwrap();
        let parents = [RemoteId::from("root")];

        let mut slot = None;
        let first = upload_or_update(&mut remote, &mut slot, &local, &parents).unwrap();
        assert_eq!(slot, Some(first.clone()));

        std::fs::write(&local, "v2").unwrap();
        let second = upload_or_update(&mut remote, &mut slot, &local, &parents).unwrap();
        assert_eq!(first, second);
        assert_eq!(remote.file_count(), 1);
        let file = remote.file(&first).unwrap();
        assert_eq!(file.revisions.len(), 2, "both uploads retained as revisions");
        assert!(file.revisions.iter().all(|r| r.keep));
    }

    #[test]
    fn empty_slot_adopts_file_already_on_remote() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("Lakes_gdb.tar.gz");
        std::fs::write(&local, "v1").unwrap();
        let mut remote = DirectoryRemote::open(tmp.path().join("remote")).unwrap();
        let parents = [RemoteId::from("lakes"), RemoteId::from("mirror")];

        let mut lost = None;
        let first = upload_or_update(&mut remote, &mut lost, &local, &parents).unwrap();

        std::fs::write(&local, "v2").unwrap();
        let mut slot = None;
        let second = upload_or_update(&mut remote, &mut slot, &local, &parents).unwrap();
        assert_eq!(second, first);
        assert_eq!(slot, Some(first.clone()));
        assert_eq!(remote.file_count(), 1);
        assert_eq!(remote.file(&first).unwrap().revisions.len(), 2);
    }

    #[test]
    fn failed_create_leaves_slot_empty() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("a.tar.gz");
        std::fs::write(&local, "x").unwrap();
        let mut remote = FailingCreates(DirectoryRemote::open(tmp.path().join("remote")).unwrap());
        let mut slot = None;
        let err = upload_or_update(&mut remote, &mut slot, &local, &[]).unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
        assert!(slot.is_none());
    }

    #[test]
    fn feature_state_display_uses_machine_names() {
        assert_eq!(FeatureState::PersistSpec.to_string(), "PERSIST_SPEC");
        assert_eq!(FeatureState::Skipped.to_string(), "SKIPPED");
    }

    #[test]
    fn default_options_upload_without_force() {
        let options = SyncOptions::default();
        assert!(options.upload);
        assert!(!options.force);
    }
}
