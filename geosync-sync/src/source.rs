//! Geospatial data source collaborator.
//!
//! [`DataSource`] is the seam between the sync pipeline and whatever system
//! holds the live datasets. [`JsonWorkspace`] implements it over a directory of
//! JSON dataset documents:
//!
//! ```json
//! {
//!   "kind": "spatial",
//!   "fields": [{ "name": "NAME", "type": "text" }],
//!   "records": [{ "oid": 1, "attributes": { "NAME": "Cache" }, "geometry": "POINT (1 2)" }]
//! }
//! ```

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use geosync_core::{DatasetKind, FieldDef, FieldValue};

use crate::error::{io_err, SyncError};

/// One record streamed from a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Internal row id assigned by the source.
    pub row_id: i64,
    /// Attribute values, aligned with the requested field list.
    pub values: Vec<FieldValue>,
    /// Canonical geometry text, only populated when geometry was requested.
    pub geometry_wkt: Option<String>,
    /// Representative point, diagnostics only.
    pub anchor: Option<(f64, f64)>,
}

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<SourceRecord, SyncError>> + 'a>;

/// Operations the sync pipeline needs from the live data system.
pub trait DataSource {
    fn exists(&self, dataset: &str) -> bool;

    fn list_fields(&self, dataset: &str) -> Result<Vec<FieldDef>, SyncError>;

    fn dataset_kind(&self, dataset: &str) -> Result<DatasetKind, SyncError>;

    /// Stream records with values for exactly `fields`, in that order.
    fn records(
        &self,
        dataset: &str,
        fields: &[String],
        with_geometry: bool,
    ) -> Result<RecordIter<'_>, SyncError>;

    /// Create an empty structured-data container named `name` under `dir`.
    fn create_container(&self, dir: &Path, name: &str) -> Result<PathBuf, SyncError>;

    /// Copy `dataset` into `container` as `out_name`; returns the written path.
    fn copy_to_container(
        &self,
        dataset: &str,
        container: &Path,
        out_name: &str,
    ) -> Result<PathBuf, SyncError>;

    /// Write a flat-file copy of `dataset` into `dir`; returns the written path.
    fn copy_to_flat_file(&self, dataset: &str, dir: &Path, out_name: &str)
        -> Result<PathBuf, SyncError>;
}

// ---------------------------------------------------------------------------
// JsonWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetDocument {
    #[serde(default)]
    pub kind: DatasetKind,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub records: Vec<RecordDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDocument {
    pub oid: i64,
    #[serde(default)]
    pub attributes: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<[f64; 2]>,
}

/// A directory of `<dataset>.json` documents.
#[derive(Debug, Clone)]
pub struct JsonWorkspace {
    root: PathBuf,
}

impl JsonWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_path(&self, dataset: &str) -> PathBuf {
        self.root.join(format!("{dataset}.json"))
    }

    /// Write a dataset document; used to seed a workspace.
    pub fn write_dataset(&self, dataset: &str, doc: &DatasetDocument) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
        let path = self.dataset_path(dataset);
        let json = serde_json::to_string_pretty(doc)?;
        std::fs::write(&path, json).map_err(|e| io_err(&path, e))
    }

    pub fn load(&self, dataset: &str) -> Result<DatasetDocument, SyncError> {
        let path = self.dataset_path(dataset);
        if !path.exists() {
            return Err(SyncError::DatasetNotFound {
                name: dataset.to_string(),
            });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| SyncError::Source {
            dataset: dataset.to_string(),
            message: format!("malformed dataset document: {e}"),
        })
    }
}

impl DataSource for JsonWorkspace {
    fn exists(&self, dataset: &str) -> bool {
        self.dataset_path(dataset).is_file()
    }

    fn list_fields(&self, dataset: &str) -> Result<Vec<FieldDef>, SyncError> {
        Ok(self.load(dataset)?.fields)
    }

    fn dataset_kind(&self, dataset: &str) -> Result<DatasetKind, SyncError> {
        Ok(self.load(dataset)?.kind)
    }

    fn records(
        &self,
        dataset: &str,
        fields: &[String],
        with_geometry: bool,
    ) -> Result<RecordIter<'_>, SyncError> {
        let doc = self.load(dataset)?;
        if let Some(unknown) = fields
            .iter()
            .find(|name| !doc.fields.iter().any(|f| &f.name == *name))
        {
            return Err(SyncError::Source {
                dataset: dataset.to_string(),
                message: format!("unknown field '{unknown}'"),
            });
        }

        let fields = fields.to_vec();
        let iter = doc.records.into_iter().map(move |record| {
            let values = fields
                .iter()
                .map(|name| {
                    record
                        .attributes
                        .get(name)
                        .cloned()
                        .unwrap_or(FieldValue::Null)
                })
                .collect();
            let anchor = record
                .anchor
                .map(|[x, y]| (x, y))
                .or_else(|| record.geometry.as_deref().and_then(wkt_anchor));
            Ok(SourceRecord {
                row_id: record.oid,
                values,
                geometry_wkt: if with_geometry { record.geometry } else { None },
                anchor,
            })
        });
        Ok(Box::new(iter))
    }

    fn create_container(&self, dir: &Path, name: &str) -> Result<PathBuf, SyncError> {
        let container = dir.join(format!("{name}.gdb"));
        std::fs::create_dir_all(&container).map_err(|e| io_err(&container, e))?;
        Ok(container)
    }

    fn copy_to_container(
        &self,
        dataset: &str,
        container: &Path,
        out_name: &str,
    ) -> Result<PathBuf, SyncError> {
        let doc = self.load(dataset)?;
        std::fs::create_dir_all(container).map_err(|e| io_err(container, e))?;
        let target = container.join(format!("{out_name}.json"));
        let json = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&target, json).map_err(|e| io_err(&target, e))?;
        Ok(target)
    }

    fn copy_to_flat_file(
        &self,
        dataset: &str,
        dir: &Path,
        out_name: &str,
    ) -> Result<PathBuf, SyncError> {
        let doc = self.load(dataset)?;
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        let target = dir.join(format!("{out_name}.ndjson"));
        let file = std::fs::File::create(&target).map_err(|e| io_err(&target, e))?;
        let mut writer = BufWriter::new(file);
        for record in &doc.records {
            let mut row = Map::new();
            row.insert("oid".to_string(), Value::from(record.oid));
            for (name, value) in &record.attributes {
                row.insert(name.clone(), serde_json::to_value(value)?);
            }
            if doc.kind == DatasetKind::Spatial {
                let wkt = record.geometry.clone().map(Value::String).unwrap_or(Value::Null);
                row.insert("wkt".to_string(), wkt);
            }
            serde_json::to_writer(&mut writer, &row)?;
            writer.write_all(b"\n").map_err(|e| io_err(&target, e))?;
        }
        writer.flush().map_err(|e| io_err(&target, e))?;
        Ok(target)
    }
}

/// Mean of the coordinate pairs in a WKT string; `None` for empty geometries.
pub fn wkt_anchor(wkt: &str) -> Option<(f64, f64)> {
    let cleaned: String = wkt
        .chars()
        .map(|c| if c == '(' || c == ')' { ' ' } else { c })
        .collect();
    let mut sum = (0.0, 0.0);
    let mut count = 0usize;
    for chunk in cleaned.split(',') {
        let numbers: Vec<f64> = chunk
            .split_whitespace()
            .filter_map(|token| token.parse::<f64>().ok())
            .collect();
        if let [x, y, ..] = numbers.as_slice() {
            sum.0 += *x;
            sum.1 += *y;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some((sum.0 / count as f64, sum.1 / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geosync_core::FieldType;
    use tempfile::TempDir;

    fn seeded() -> (TempDir, JsonWorkspace) {
        let dir = TempDir::new().unwrap();
        let ws = JsonWorkspace::new(dir.path().join("data"));
        let mut attributes = BTreeMap::new();
        attributes.insert("NAME".to_string(), FieldValue::Text("Cache".to_string()));
        ws.write_dataset(
            "SGID.BOUNDARIES.Counties",
            &DatasetDocument {
                kind: DatasetKind::Spatial,
                fields: vec![
                    FieldDef::new("OBJECTID", FieldType::Oid),
                    FieldDef::new("NAME", FieldType::Text),
                    FieldDef::new("POP", FieldType::Integer),
                ],
                records: vec![RecordDocument {
                    oid: 7,
                    attributes,
                    geometry: Some("POLYGON ((0 0, 2 0, 2 2, 0 2))".to_string()),
                    anchor: None,
                }],
            },
        )
        .unwrap();
        (dir, ws)
    }

    #[test]
    fn records_follow_requested_field_order() {
        let (_dir, ws) = seeded();
        let fields = vec!["POP".to_string(), "NAME".to_string()];
        let records: Vec<_> = ws
            .records("SGID.BOUNDARIES.Counties", &fields, true)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].values,
            vec![FieldValue::Null, FieldValue::Text("Cache".to_string())]
        );
        assert_eq!(records[0].row_id, 7);
        assert_eq!(records[0].anchor, Some((1.0, 1.0)));
        assert!(records[0].geometry_wkt.is_some());
    }

    #[test]
    fn geometry_omitted_unless_requested() {
        let (_dir, ws) = seeded();
        let mut iter = ws.records("SGID.BOUNDARIES.Counties", &[], false).unwrap();
        let record = iter.next().unwrap().unwrap();
        assert!(record.geometry_wkt.is_none());
    }

    #[test]
    fn unknown_field_is_a_source_error() {
        let (_dir, ws) = seeded();
        let err = ws
            .records("SGID.BOUNDARIES.Counties", &["NOPE".to_string()], false)
            .err()
            .expect("error");
        assert!(matches!(err, SyncError::Source { .. }));
    }

    #[test]
    fn missing_dataset_is_not_found() {
        let (_dir, ws) = seeded();
        assert!(!ws.exists("SGID.WATER.Lakes"));
        let err = ws.list_fields("SGID.WATER.Lakes").unwrap_err();
        assert!(matches!(err, SyncError::DatasetNotFound { .. }));
        assert!(err.is_fatal_config());
    }

    #[test]
    fn flat_file_copy_writes_one_line_per_record() {
        let (dir, ws) = seeded();
        let out = dir.path().join("Counties");
        let path = ws
            .copy_to_flat_file("SGID.BOUNDARIES.Counties", &out, "Counties")
            .unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"wkt\""));
    }

    #[test]
    fn wkt_anchor_handles_empty_geometry() {
        assert_eq!(wkt_anchor("POINT EMPTY"), None);
        assert_eq!(wkt_anchor("POINT (3 4)"), Some((3.0, 4.0)));
    }
}
