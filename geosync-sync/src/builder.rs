//! Artifact builder: exports a dataset and compresses each export kind.
//!
//! ## Output layout
//!
//! ```text
//! <output_dir>/
//!   <key>.gdb/<name>.json    structured-data container
//!   <key>/<name>.ndjson      flat-file copy
//!   <key>_hash/              manifest written by the fingerprint pass
//!   <key>_gdb.tar.gz
//!   <key>_shp.tar.gz
//!   <key>_hash.tar.gz
//!   output_packages/
//!     <package>.gdb/  <package>/  <package>_gdb.tar.gz  <package>_shp.tar.gz
//! ```
//!
//! `<key>` is [`FeatureSpec::output_key`](geosync_core::FeatureSpec::output_key),
//! unique per source name. `<name>` is the display name, which is what a
//! package merge shows to consumers.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use geosync_core::ArchiveKind;

use crate::archive::{archive_path, compress_dir};
use crate::error::{io_err, SyncError};
use crate::manifest::manifest_dir;
use crate::source::DataSource;

/// Local copies of one exported dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExport {
    pub container: PathBuf,
    pub flat_dir: PathBuf,
}

impl FeatureExport {
    /// Expected export locations for `key` under `output_dir`.
    pub fn locate(output_dir: &Path, key: &str) -> Self {
        Self {
            container: output_dir.join(format!("{key}.gdb")),
            flat_dir: output_dir.join(key),
        }
    }

    /// The export built earlier in this run, if both copies are on disk.
    pub fn existing(output_dir: &Path, key: &str) -> Option<Self> {
        let export = Self::locate(output_dir, key);
        (export.container.is_dir() && export.flat_dir.is_dir()).then_some(export)
    }
}

/// Archive files for one feature or package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSet {
    pub data: PathBuf,
    pub shape: PathBuf,
    /// Packages carry no hash archive.
    pub hash: Option<PathBuf>,
}

impl ArchiveSet {
    /// Expected feature archive paths under `output_dir`.
    pub fn for_feature(output_dir: &Path, key: &str) -> Self {
        Self {
            data: archive_path(output_dir, key, ArchiveKind::Data.suffix()),
            shape: archive_path(output_dir, key, ArchiveKind::Shape.suffix()),
            hash: Some(archive_path(output_dir, key, ArchiveKind::Hash.suffix())),
        }
    }

    pub fn for_package(package_dir: &Path, name: &str) -> Self {
        Self {
            data: archive_path(package_dir, name, ArchiveKind::Data.suffix()),
            shape: archive_path(package_dir, name, ArchiveKind::Shape.suffix()),
            hash: None,
        }
    }

    /// Archives in upload order: structured data, flat file, then manifest.
    pub fn iter(&self) -> impl Iterator<Item = (ArchiveKind, &Path)> {
        [
            (ArchiveKind::Data, Some(self.data.as_path())),
            (ArchiveKind::Shape, Some(self.shape.as_path())),
            (ArchiveKind::Hash, self.hash.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.map(|p| (kind, p)))
    }

    /// File names of archives that are not on disk.
    pub fn missing(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, path)| !path.is_file())
            .map(|(_, path)| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Export `dataset` into a fresh container and flat-file directory located by
/// `key`, each holding one copy called `name`.
pub fn export_feature(
    source: &dyn DataSource,
    dataset: &str,
    output_dir: &Path,
    key: &str,
    name: &str,
) -> Result<FeatureExport, SyncError> {
    let export = FeatureExport::locate(output_dir, key);
    remove_dir_if_exists(&export.container)?;
    remove_dir_if_exists(&export.flat_dir)?;

    let container = source.create_container(output_dir, key)?;
    source.copy_to_container(dataset, &container, name)?;
    std::fs::create_dir_all(&export.flat_dir).map_err(|e| io_err(&export.flat_dir, e))?;
    source.copy_to_flat_file(dataset, &export.flat_dir, name)?;

    Ok(FeatureExport {
        container,
        flat_dir: export.flat_dir,
    })
}

/// Compress the export and the manifest directory into three archives.
pub fn archive_feature(
    export: &FeatureExport,
    output_dir: &Path,
    key: &str,
) -> Result<ArchiveSet, SyncError> {
    let archives = ArchiveSet::for_feature(output_dir, key);
    compress_dir(&export.container, &archives.data)?;
    compress_dir(&export.flat_dir, &archives.shape)?;
    if let Some(hash) = &archives.hash {
        compress_dir(&manifest_dir(output_dir, key), hash)?;
    }
    tracing::debug!(key, "feature archives written");
    Ok(archives)
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

/// A package being merged from its member exports.
#[derive(Debug)]
pub struct PackageBuild {
    pub name: String,
    pub package_dir: PathBuf,
    pub container: PathBuf,
    pub flat_dir: PathBuf,
    pub members: Vec<String>,
}

impl PackageBuild {
    /// Fresh, empty container and flat-file directory for `name`.
    pub fn start(
        source: &dyn DataSource,
        package_dir: &Path,
        name: &str,
    ) -> Result<Self, SyncError> {
        let export = FeatureExport::locate(package_dir, name);
        remove_dir_if_exists(&export.container)?;
        remove_dir_if_exists(&export.flat_dir)?;
        let container = source.create_container(package_dir, name)?;
        std::fs::create_dir_all(&export.flat_dir).map_err(|e| io_err(&export.flat_dir, e))?;
        Ok(Self {
            name: name.to_string(),
            package_dir: package_dir.to_path_buf(),
            container,
            flat_dir: export.flat_dir,
            members: Vec::new(),
        })
    }

    /// Merge a feature export built earlier in this run.
    pub fn add_local(&mut self, export: &FeatureExport, member: &str) -> Result<(), SyncError> {
        copy_dir_contents(&export.container, &self.container)?;
        copy_dir_contents(&export.flat_dir, &self.flat_dir.join(member))?;
        self.members.push(member.to_string());
        Ok(())
    }

    /// Pull a member straight from the live source.
    pub fn add_from_source(
        &mut self,
        source: &dyn DataSource,
        dataset: &str,
        member: &str,
    ) -> Result<(), SyncError> {
        source.copy_to_container(dataset, &self.container, member)?;
        let flat = self.flat_dir.join(member);
        std::fs::create_dir_all(&flat).map_err(|e| io_err(&flat, e))?;
        source.copy_to_flat_file(dataset, &flat, member)?;
        self.members.push(member.to_string());
        Ok(())
    }

    pub fn archive(&self) -> Result<ArchiveSet, SyncError> {
        let archives = ArchiveSet::for_package(&self.package_dir, &self.name);
        compress_dir(&self.container, &archives.data)?;
        compress_dir(&self.flat_dir, &archives.shape)?;
        Ok(archives)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn remove_dir_if_exists(dir: &Path) -> Result<(), SyncError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    Ok(())
}

fn copy_dir_contents(from: &Path, to: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(to).map_err(|e| io_err(to, e))?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| io_err(from, e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io_err(entry.path(), std::io::Error::other(e)))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
        } else if entry.file_type().is_file() && !entry.file_name().to_string_lossy().ends_with(".lock") {
            std::fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
        }
    }
    Ok(())
}
