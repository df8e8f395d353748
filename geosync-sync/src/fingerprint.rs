//! Fingerprint engine: per-record SHA-256 digests for change detection.
//!
//! ## Digest input
//!
//! 1. Drop structural fields (see [`is_structural`]), then sort the rest by name.
//! 2. Feed each attribute value as a type-tagged, length-prefixed token.
//! 3. For spatial datasets, feed the geometry WKT, or [`NO_SHAPE_SENTINEL`]
//!    when the record has no geometry.
//!
//! Digests are unique within one manifest: a digest already present is
//! re-hashed (`sha256(hex)`) until it is not.
//!
//! Building the manifest and writing the hash artifact are the same pass: every
//! entry is streamed to a [`ManifestWriter`] as it is computed.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use sha2::{Digest, Sha256};

use geosync_core::{DatasetKind, FieldDef, FieldValue};

use crate::error::SyncError;
use crate::manifest::ManifestWriter;
use crate::source::DataSource;

/// Hashed in place of a missing or empty geometry, so that "no geometry" is
/// itself a detectable state.
pub const NO_SHAPE_SENTINEL: &str = "No shape";

/// Fields regenerated by export tooling: geometry and its derived measures
/// (`SHAPE`, `SHAPE_Length`, `Shape_Area`, ...) and internal row ids
/// (`OBJECTID`, `OBJECTID_1`, ...). Their values are not part of the record.
pub fn is_structural(field_name: &str) -> bool {
    let upper = field_name.trim().to_ascii_uppercase();
    upper.starts_with("SHAPE") || upper.starts_with("OBJECTID")
}

/// Field names that participate in hashing, structural fields removed and the
/// remainder sorted by name.
pub fn hash_fields(fields: &[FieldDef]) -> Vec<String> {
    let mut names: Vec<String> = fields
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| !is_structural(name))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Digest of one record. `geometry` is `None` for tabular datasets and
/// `Some(wkt)` for spatial ones, where `wkt` may itself be absent.
pub fn record_digest(values: &[FieldValue], geometry: Option<Option<&str>>) -> String {
    let mut hasher = Sha256::new();
    for value in values {
        feed_value(&mut hasher, value);
    }
    if let Some(wkt) = geometry {
        let shape = wkt.filter(|s| !s.trim().is_empty()).unwrap_or(NO_SHAPE_SENTINEL);
        hasher.update(b"g");
        feed_str(&mut hasher, shape);
    }
    hex::encode(hasher.finalize())
}

/// Digest of a digest, used to break collisions.
pub fn perturb(digest: &str) -> String {
    hex::encode(Sha256::digest(digest.as_bytes()))
}

fn feed_value(hasher: &mut Sha256, value: &FieldValue) {
    match value {
        FieldValue::Null => hasher.update(b"n"),
        FieldValue::Bool(b) => {
            hasher.update(b"b");
            hasher.update([u8::from(*b)]);
        }
        FieldValue::Integer(i) => {
            hasher.update(b"i");
            hasher.update(i.to_le_bytes());
        }
        FieldValue::Double(d) => {
            hasher.update(b"d");
            hasher.update(d.to_bits().to_le_bytes());
        }
        FieldValue::Text(s) => {
            hasher.update(b"s");
            feed_str(hasher, s);
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

// ---------------------------------------------------------------------------
// HashManifest
// ---------------------------------------------------------------------------

/// One manifest row: the record digest plus a representative point.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub digest: String,
    /// Diagnostics only; never part of the comparison.
    pub anchor: Option<(f64, f64)>,
}

/// Row id → digest mapping built fresh on every run.
#[derive(Debug, Clone, Default)]
pub struct HashManifest {
    entries: BTreeMap<i64, ManifestEntry>,
    digests: HashSet<String>,
}

impl HashManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `digest` for `row_id`, perturbing it until unique within this
    /// manifest. Returns the digest actually stored.
    pub fn insert_unique(
        &mut self,
        row_id: i64,
        mut digest: String,
        anchor: Option<(f64, f64)>,
    ) -> String {
        while self.digests.contains(&digest) {
            digest = perturb(&digest);
        }
        self.digests.insert(digest.clone());
        if let Some(previous) = self.entries.insert(
            row_id,
            ManifestEntry {
                digest: digest.clone(),
                anchor,
            },
        ) {
            self.digests.remove(&previous.digest);
        }
        digest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_digest(&self, digest: &str) -> bool {
        self.digests.contains(digest)
    }

    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.digest.as_str())
    }

    pub fn get(&self, row_id: i64) -> Option<&ManifestEntry> {
        self.entries.get(&row_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (i64, &ManifestEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }
}

// ---------------------------------------------------------------------------
// build_manifest
// ---------------------------------------------------------------------------

/// Fingerprint every record of `dataset` and stream the manifest to `sink`.
///
/// The sink is only renamed into place once every record was hashed.
pub fn build_manifest(
    source: &dyn DataSource,
    dataset: &str,
    sink: &Path,
) -> Result<HashManifest, SyncError> {
    if !source.exists(dataset) {
        return Err(SyncError::DatasetNotFound {
            name: dataset.to_string(),
        });
    }
    let fields = hash_fields(&source.list_fields(dataset)?);
    let spatial = source.dataset_kind(dataset)? == DatasetKind::Spatial;

    let mut writer = ManifestWriter::create(sink)?;
    let mut manifest = HashManifest::new();
    for record in source.records(dataset, &fields, spatial)? {
        let record = record?;
        let geometry = spatial.then_some(record.geometry_wkt.as_deref());
        let digest = record_digest(&record.values, geometry);
        let stored = manifest.insert_unique(record.row_id, digest, record.anchor);
        writer.append(record.row_id, &stored, record.anchor)?;
    }
    writer.finish()?;

    tracing::debug!(
        dataset,
        rows = manifest.len(),
        fields = fields.len(),
        "manifest built"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::FieldType;
    use rstest::rstest;

    #[rstest]
    #[case("SHAPE", true)]
    #[case("Shape_Length", true)]
    #[case("SHAPE.AREA", true)]
    #[case("OBJECTID", true)]
    #[case("OBJECTID_1", true)]
    #[case("NAME", false)]
    #[case("COUNTY_SHAPEFILE_ID", false)]
    fn structural_predicate(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_structural(name), expected);
    }

    #[test]
    fn hash_fields_filters_and_sorts() {
        let fields = vec![
            FieldDef::new("ZIP", FieldType::Text),
            FieldDef::new("OBJECTID", FieldType::Oid),
            FieldDef::new("Shape", FieldType::Geometry),
            FieldDef::new("ADDR", FieldType::Text),
            FieldDef::new("Shape_Area", FieldType::Double),
        ];
        assert_eq!(hash_fields(&fields), vec!["ADDR".to_string(), "ZIP".to_string()]);
    }

    #[test]
    fn digest_is_deterministic() {
        let values = vec![FieldValue::Text("a".into()), FieldValue::Integer(1)];
        assert_eq!(
            record_digest(&values, Some(Some("POINT (1 2)"))),
            record_digest(&values, Some(Some("POINT (1 2)")))
        );
    }

    #[test]
    fn missing_geometry_hashes_sentinel() {
        let values = vec![FieldValue::Integer(1)];
        let none = record_digest(&values, Some(None));
        let empty = record_digest(&values, Some(Some("")));
        let tabular = record_digest(&values, None);
        assert_eq!(none, empty);
        assert_ne!(none, tabular, "sentinel must participate in the digest");
    }

    #[test]
    fn text_boundaries_are_unambiguous() {
        let a = record_digest(
            &[FieldValue::Text("ab".into()), FieldValue::Text("c".into())],
            None,
        );
        let b = record_digest(
            &[FieldValue::Text("a".into()), FieldValue::Text("bc".into())],
            None,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn identical_rows_get_distinct_digests() {
        let digest = record_digest(&[FieldValue::Text("same".into())], None);
        let mut manifest = HashManifest::new();
        for row in 0..5 {
            manifest.insert_unique(row, digest.clone(), None);
        }
        let unique: HashSet<_> = manifest.digests().collect();
        assert_eq!(manifest.len(), 5);
        assert_eq!(unique.len(), 5);
        assert_eq!(manifest.get(0).unwrap().digest, digest);
        assert_eq!(manifest.get(1).unwrap().digest, perturb(&digest));
    }
}
