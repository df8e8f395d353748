//! Metadata store: one JSON document per feature and per package.
//!
//! # Storage layout
//!
//! ```text
//! <spec_dir>/
//!   features/
//!     <source_name lowercase>.json
//!   packages/
//!     <package name lowercase>.json
//! ```
//!
//! Writes are atomic: serialize → `.json.tmp` sibling → `rename`.
//! Documents are never deleted by this crate.

use std::path::{Path, PathBuf};

use crate::error::{io_err, SpecError};
use crate::types::{FeatureSpec, PackageName, PackageSpec};

const FEATURES_DIR: &str = "features";
const PACKAGES_DIR: &str = "packages";

/// A document path paired with the result of loading it.
pub type Scanned<T> = (PathBuf, Result<T, SpecError>);

/// Handle on a spec directory.
#[derive(Debug, Clone)]
pub struct SpecStore {
    root: PathBuf,
}

impl SpecStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // 1. Path helpers
    // -----------------------------------------------------------------------

    /// `<root>/features/<key>.json`. Pure, no I/O.
    pub fn feature_path(&self, source_name: &str) -> PathBuf {
        self.root.join(FEATURES_DIR).join(document_name(source_name))
    }

    /// `<root>/packages/<key>.json`. Pure, no I/O.
    pub fn package_path(&self, name: &PackageName) -> PathBuf {
        self.root.join(PACKAGES_DIR).join(document_name(&name.0))
    }

    pub fn has_feature(&self, source_name: &str) -> bool {
        self.feature_path(source_name).exists()
    }

    // -----------------------------------------------------------------------
    // 2. Load
    // -----------------------------------------------------------------------

    /// Returns `SpecError::NotFound` if absent, `SpecError::Parse` if malformed.
    pub fn load_feature(&self, source_name: &str) -> Result<FeatureSpec, SpecError> {
        load_document(&self.feature_path(source_name))
    }

    /// Stored spec, or a fresh default with null identifiers on first sight.
    pub fn get_or_create_feature(&self, source_name: &str) -> Result<FeatureSpec, SpecError> {
        match self.load_feature(source_name) {
            Err(SpecError::NotFound { .. }) => Ok(FeatureSpec::new(source_name)),
            other => other,
        }
    }

    pub fn load_package(&self, name: &PackageName) -> Result<PackageSpec, SpecError> {
        load_document(&self.package_path(name))
    }

    /// All feature specs sorted by document name. Fails on the first
    /// unreadable document; see [`SpecStore::scan_features`].
    pub fn list_features(&self) -> Result<Vec<FeatureSpec>, SpecError> {
        self.scan_features()?.into_iter().map(|(_, doc)| doc).collect()
    }

    /// All package specs sorted by document name.
    pub fn list_packages(&self) -> Result<Vec<PackageSpec>, SpecError> {
        self.scan_packages()?.into_iter().map(|(_, doc)| doc).collect()
    }

    /// Every feature document with its own load result, so one malformed
    /// document does not hide the others. Only an unreadable directory fails.
    pub fn scan_features(&self) -> Result<Vec<Scanned<FeatureSpec>>, SpecError> {
        scan_documents(&self.root.join(FEATURES_DIR))
    }

    pub fn scan_packages(&self) -> Result<Vec<Scanned<PackageSpec>>, SpecError> {
        scan_documents(&self.root.join(PACKAGES_DIR))
    }

    // -----------------------------------------------------------------------
    // 3. Save (atomic)
    // -----------------------------------------------------------------------

    pub fn save_feature(&self, spec: &FeatureSpec) -> Result<(), SpecError> {
        save_document(&self.feature_path(&spec.source_name), spec)
    }

    pub fn save_package(&self, spec: &PackageSpec) -> Result<(), SpecError> {
        save_document(&self.package_path(&spec.name), spec)
    }

    // -----------------------------------------------------------------------
    // 4. Dependency edges
    // -----------------------------------------------------------------------

    /// Record that `source_name` belongs to `package`. Persists only when the
    /// edge is new.
    pub fn add_package_to_feature(
        &self,
        source_name: &str,
        package: &PackageName,
    ) -> Result<FeatureSpec, SpecError> {
        let mut spec = self.get_or_create_feature(source_name)?;
        if spec.member_of_packages.insert(package.clone()) {
            self.save_feature(&spec)?;
        }
        Ok(spec)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn document_name(name: &str) -> String {
    let key: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    format!("{key}.json")
}

fn load_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SpecError> {
    if !path.exists() {
        return Err(SpecError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| SpecError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn scan_documents<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<Scanned<T>>, SpecError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    Ok(entries
        .into_iter()
        .map(|entry| {
            let path = entry.path();
            let doc = load_document(&path);
            (path, doc)
        })
        .collect())
}

fn save_document<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), SpecError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RemoteId;
    use tempfile::TempDir;

    fn store() -> (TempDir, SpecStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = SpecStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn feature_path_is_lowercased() {
        let (_dir, store) = store();
        let path = store.feature_path("SGID.BOUNDARIES.Counties");
        assert!(path.ends_with("features/sgid.boundaries.counties.json"));
    }

    #[test]
    fn save_and_load_feature_roundtrip() {
        let (_dir, store) = store();
        let mut spec = FeatureSpec::new("SGID.BOUNDARIES.Counties");
        spec.data_archive_id = Some(RemoteId::from("abc"));
        store.save_feature(&spec).expect("save");
        let loaded = store.load_feature("SGID.BOUNDARIES.Counties").expect("load");
        assert_eq!(loaded, spec);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let (_dir, store) = store();
        let spec = FeatureSpec::new("A.B.C");
        store.save_feature(&spec).expect("save");
        let tmp = store.feature_path("A.B.C").with_extension("json.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn get_or_create_returns_default_when_missing() {
        let (_dir, store) = store();
        let spec = store.get_or_create_feature("SGID.WATER.Lakes").expect("default");
        assert_eq!(spec.display_name, "Lakes");
        assert!(!store.has_feature("SGID.WATER.Lakes"), "defaults are not persisted");
    }

    #[test]
    fn add_package_edge_is_idempotent() {
        let (_dir, store) = store();
        let package = PackageName::from("Water");
        store.add_package_to_feature("SGID.WATER.Lakes", &package).expect("first");
        let spec = store.add_package_to_feature("SGID.WATER.Lakes", &package).expect("second");
        assert_eq!(spec.member_of_packages.len(), 1);
        assert!(store.load_feature("SGID.WATER.Lakes").unwrap().member_of_packages.contains(&package));
    }

    #[test]
    fn list_packages_skips_non_json_files() {
        let (dir, store) = store();
        store.save_package(&PackageSpec::new("Roads", "TRANSPORTATION")).unwrap();
        std::fs::write(dir.path().join("packages").join(".DS_Store"), b"junk").unwrap();
        let packages = store.list_packages().expect("list");
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, PackageName::from("Roads"));
    }

    #[test]
    fn list_features_empty_when_dir_missing() {
        let (_dir, store) = store();
        assert!(store.list_features().expect("list").is_empty());
    }
}
