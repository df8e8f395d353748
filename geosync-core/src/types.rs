//! Domain types for the geosync metadata store.
//!
//! Feature and package specs are the only state persisted between runs besides
//! the remote archives themselves. Everything here is serializable via serde.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category used when a source name carries no category segment.
pub const DEFAULT_CATEGORY: &str = "uncategorized";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque handle returned by the remote store on first upload or folder creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(pub String);

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a dataset carries geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Table,
    #[default]
    Spatial,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Table => write!(f, "table"),
            DatasetKind::Spatial => write!(f, "spatial"),
        }
    }
}

/// Declared type of a dataset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Oid,
    Integer,
    Double,
    #[default]
    Text,
    Date,
    Geometry,
}

/// The three archive kinds produced for a feature. Packages only use the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// Structured-data copy (preserves types for re-import).
    Data,
    /// Flat-file spatial copy.
    Shape,
    /// Hash manifest used for change detection on the next run.
    Hash,
}

impl ArchiveKind {
    pub fn all() -> &'static [ArchiveKind] {
        &[ArchiveKind::Data, ArchiveKind::Shape, ArchiveKind::Hash]
    }

    /// Archive file-name suffix: `<name>_<suffix>.tar.gz`.
    pub fn suffix(self) -> &'static str {
        match self {
            ArchiveKind::Data => "gdb",
            ArchiveKind::Shape => "shp",
            ArchiveKind::Hash => "hash",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.suffix().fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Record values
// ---------------------------------------------------------------------------

/// One attribute value read from the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

/// Name and declared type of a dataset field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type }
    }
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// Persisted record of one synchronizable dataset.
///
/// A non-null archive identifier means that archive was uploaded at least once;
/// later syncs update it in place instead of creating a new remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub source_name: String,
    pub display_name: String,
    pub category: String,
    #[serde(default)]
    pub data_archive_id: Option<RemoteId>,
    #[serde(default)]
    pub shape_archive_id: Option<RemoteId>,
    #[serde(default)]
    pub hash_archive_id: Option<RemoteId>,
    #[serde(default)]
    pub parent_folder_ids: BTreeSet<RemoteId>,
    #[serde(default)]
    pub member_of_packages: BTreeSet<PackageName>,
    /// Permanently skipped: the lifecycle returns memberships without touching the remote.
    #[serde(default)]
    pub skip: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl FeatureSpec {
    /// Default spec for a source name seen for the first time.
    ///
    /// `SGID.BOUNDARIES.Counties` becomes display name `Counties` in category
    /// `BOUNDARIES`.
    pub fn new(source_name: impl Into<String>) -> Self {
        let source_name = source_name.into();
        let mut segments = source_name.rsplit('.');
        let display_name = segments.next().unwrap_or_default().to_string();
        let category = segments
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();
        Self {
            source_name,
            display_name,
            category,
            data_archive_id: None,
            shape_archive_id: None,
            hash_archive_id: None,
            parent_folder_ids: BTreeSet::new(),
            member_of_packages: BTreeSet::new(),
            skip: false,
            synced_at: None,
        }
    }

    pub fn archive_id(&self, kind: ArchiveKind) -> Option<&RemoteId> {
        self.archive_slot(kind).as_ref()
    }

    /// Mutable identifier slot for `kind`, filled in on first upload.
    pub fn archive_slot_mut(&mut self, kind: ArchiveKind) -> &mut Option<RemoteId> {
        match kind {
            ArchiveKind::Data => &mut self.data_archive_id,
            ArchiveKind::Shape => &mut self.shape_archive_id,
            ArchiveKind::Hash => &mut self.hash_archive_id,
        }
    }

    fn archive_slot(&self, kind: ArchiveKind) -> &Option<RemoteId> {
        match kind {
            ArchiveKind::Data => &self.data_archive_id,
            ArchiveKind::Shape => &self.shape_archive_id,
            ArchiveKind::Hash => &self.hash_archive_id,
        }
    }

    /// Returns `true` if the folder id was not already present.
    pub fn add_parent_folder(&mut self, id: RemoteId) -> bool {
        self.parent_folder_ids.insert(id)
    }

    /// Name for local build output and archive files.
    ///
    /// Keyed on the source name: display names repeat across categories
    /// (`GIS.WATER.Lakes` and `GIS.RECREATION.Lakes` are both `Lakes`), and
    /// hash archives of every category share one remote folder.
    pub fn output_key(&self) -> String {
        self.source_name
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect()
    }
}

/// Persisted record of a multi-feature bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: PackageName,
    pub category: String,
    #[serde(default)]
    pub data_archive_id: Option<RemoteId>,
    #[serde(default)]
    pub shape_archive_id: Option<RemoteId>,
    #[serde(default)]
    pub parent_folder_ids: BTreeSet<RemoteId>,
    /// Member feature source names; order only drives iteration.
    #[serde(default)]
    pub feature_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl PackageSpec {
    pub fn new(name: impl Into<PackageName>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            data_archive_id: None,
            shape_archive_id: None,
            parent_folder_ids: BTreeSet::new(),
            feature_classes: Vec::new(),
            synced_at: None,
        }
    }

    /// Packages carry no hash archive, so `ArchiveKind::Hash` yields `None`.
    pub fn archive_slot_mut(&mut self, kind: ArchiveKind) -> Option<&mut Option<RemoteId>> {
        match kind {
            ArchiveKind::Data => Some(&mut self.data_archive_id),
            ArchiveKind::Shape => Some(&mut self.shape_archive_id),
            ArchiveKind::Hash => None,
        }
    }

    pub fn add_parent_folder(&mut self, id: RemoteId) -> bool {
        self.parent_folder_ids.insert(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_feature_derives_name_and_category() {
        let spec = FeatureSpec::new("SGID.BOUNDARIES.Counties");
        assert_eq!(spec.display_name, "Counties");
        assert_eq!(spec.category, "BOUNDARIES");
        assert!(spec.data_archive_id.is_none());
        assert!(spec.hash_archive_id.is_none());
        assert!(!spec.skip);
    }

    #[test]
    fn new_feature_without_dots_is_uncategorized() {
        let spec = FeatureSpec::new("Trails");
        assert_eq!(spec.display_name, "Trails");
        assert_eq!(spec.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn output_key_separates_features_sharing_a_display_name() {
        let water = FeatureSpec::new("GIS.WATER.Lakes");
        let recreation = FeatureSpec::new("GIS.RECREATION.Lakes");
        assert_eq!(water.display_name, recreation.display_name);
        assert_ne!(water.output_key(), recreation.output_key());
        assert_eq!(FeatureSpec::new(" db:GIS/Lakes ").output_key(), "db_GIS_Lakes");
    }

    #[test]
    fn parent_folders_are_a_set() {
        let mut spec = FeatureSpec::new("A.B.C");
        assert!(spec.add_parent_folder(RemoteId::from("f1")));
        assert!(!spec.add_parent_folder(RemoteId::from("f1")));
        assert_eq!(spec.parent_folder_ids.len(), 1);
    }

    #[test]
    fn archive_slots_map_to_fields() {
        let mut spec = FeatureSpec::new("A.B.C");
        *spec.archive_slot_mut(ArchiveKind::Shape) = Some(RemoteId::from("s"));
        assert_eq!(spec.shape_archive_id, Some(RemoteId::from("s")));
        assert_eq!(spec.archive_id(ArchiveKind::Shape), Some(&RemoteId::from("s")));
        assert!(spec.archive_id(ArchiveKind::Data).is_none());

        let mut package = PackageSpec::new("Roads", "TRANSPORTATION");
        assert!(package.archive_slot_mut(ArchiveKind::Hash).is_none());
    }

    #[test]
    fn feature_spec_tolerates_missing_optional_fields() {
        let json = r#"{"source_name":"A.B.C","display_name":"C","category":"B"}"#;
        let spec: FeatureSpec = serde_json::from_str(json).expect("parse");
        assert!(spec.parent_folder_ids.is_empty());
        assert!(spec.synced_at.is_none());
    }

    #[test]
    fn field_values_deserialize_untagged() {
        let values: Vec<FieldValue> = serde_json::from_str(r#"[null, true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Null,
                FieldValue::Bool(true),
                FieldValue::Integer(3),
                FieldValue::Double(2.5),
                FieldValue::Text("x".to_string()),
            ]
        );
    }
}
