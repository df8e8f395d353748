use std::collections::{BTreeMap, HashSet};

use geosync_core::{DatasetKind, FieldDef, FieldType, FieldValue};
use geosync_sync::{
    build_manifest, detect_changes, is_structural,
    fingerprint::hash_fields,
    manifest::{manifest_path, PriorManifest},
    source::{DatasetDocument, RecordDocument},
    JsonWorkspace,
};
use rstest::rstest;
use tempfile::TempDir;

fn parcels(rows: usize, identical: bool) -> DatasetDocument {
    DatasetDocument {
        kind: DatasetKind::Spatial,
        fields: vec![
            FieldDef::new("OBJECTID", FieldType::Oid),
            FieldDef::new("OWNER", FieldType::Text),
            FieldDef::new("ACRES", FieldType::Double),
            FieldDef::new("SHAPE", FieldType::Geometry),
            FieldDef::new("Shape_Area", FieldType::Double),
        ],
        records: (0..rows)
            .map(|i| {
                let owner = if identical { "same".to_string() } else { format!("owner-{i}") };
                RecordDocument {
                    oid: i as i64 + 1,
                    attributes: BTreeMap::from([
                        ("OBJECTID".to_string(), FieldValue::Integer(i as i64 + 1)),
                        ("OWNER".to_string(), FieldValue::Text(owner)),
                        ("ACRES".to_string(), FieldValue::Double(1.25)),
                        ("Shape_Area".to_string(), FieldValue::Double(i as f64)),
                    ]),
                    geometry: Some("POLYGON ((0 0, 1 0, 1 1, 0 0))".to_string()),
                    anchor: None,
                }
            })
            .collect(),
    }
}

fn manifest_digests(tmp: &TempDir, doc: &DatasetDocument, run: &str) -> Vec<(i64, String)> {
    let source = JsonWorkspace::new(tmp.path().join("data"));
    source.write_dataset("Parcels", doc).unwrap();
    let sink = manifest_path(&tmp.path().join(run), "Parcels");
    let manifest = build_manifest(&source, "Parcels", &sink).unwrap();
    manifest
        .entries()
        .map(|(row, entry)| (row, entry.digest.clone()))
        .collect()
}

#[test]
fn repeated_builds_produce_identical_manifests() {
    let tmp = TempDir::new().unwrap();
    let doc = parcels(5, false);
    let first = manifest_digests(&tmp, &doc, "a");
    let second = manifest_digests(&tmp, &doc, "b");
    assert_eq!(first, second);

    let sink_a = std::fs::read_to_string(manifest_path(&tmp.path().join("a"), "Parcels")).unwrap();
    let sink_b = std::fs::read_to_string(manifest_path(&tmp.path().join("b"), "Parcels")).unwrap();
    assert_eq!(sink_a, sink_b);
}

#[test]
fn structural_fields_never_reach_the_hash_input() {
    let fields = hash_fields(&parcels(1, false).fields);
    assert_eq!(fields, vec!["ACRES".to_string(), "OWNER".to_string()]);
    assert!(fields.iter().all(|f| !is_structural(f)));

    // Regenerated ids and measures do not move the digest.
    let tmp = TempDir::new().unwrap();
    let doc = parcels(3, false);
    let mut renumbered = doc.clone();
    for record in &mut renumbered.records {
        record
            .attributes
            .insert("Shape_Area".to_string(), FieldValue::Double(99.0));
        record
            .attributes
            .insert("OBJECTID".to_string(), FieldValue::Integer(record.oid + 100));
    }
    let original: Vec<String> = manifest_digests(&tmp, &doc, "a").into_iter().map(|(_, d)| d).collect();
    let regenerated: Vec<String> =
        manifest_digests(&tmp, &renumbered, "b").into_iter().map(|(_, d)| d).collect();
    assert_eq!(original, regenerated);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(17)]
fn identical_rows_get_distinct_digests(#[case] rows: usize) {
    let tmp = TempDir::new().unwrap();
    let digests = manifest_digests(&tmp, &parcels(rows, true), "a");
    let unique: HashSet<&String> = digests.iter().map(|(_, d)| d).collect();
    assert_eq!(digests.len(), rows);
    assert_eq!(unique.len(), rows);
}

#[test]
fn published_manifest_round_trips_through_change_detection() {
    let tmp = TempDir::new().unwrap();
    let source = JsonWorkspace::new(tmp.path().join("data"));
    source.write_dataset("Parcels", &parcels(4, true)).unwrap();
    let sink = manifest_path(&tmp.path().join("out"), "Parcels");
    let manifest = build_manifest(&source, "Parcels", &sink).unwrap();

    let prior = PriorManifest::load(&sink).unwrap();
    assert_eq!(prior.len(), 4);
    assert!(!detect_changes(&manifest, Some(&prior)).changed);

    source.write_dataset("Parcels", &parcels(5, true)).unwrap();
    let grown = build_manifest(&source, "Parcels", &sink).unwrap();
    let record = detect_changes(&grown, Some(&prior));
    assert!(record.changed);
    assert_eq!(record.added, 1);
}
