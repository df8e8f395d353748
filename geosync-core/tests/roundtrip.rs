//! Serialisation shape of persisted documents.

use chrono::Utc;
use geosync_core::{
    DatasetKind, FeatureSpec, FieldDef, FieldType, FieldValue, PackageName, PackageSpec, RemoteId,
};
use rstest::rstest;

fn synced_feature() -> FeatureSpec {
    let mut spec = FeatureSpec::new("SGID.WATER.Lakes");
    spec.data_archive_id = Some(RemoteId::from("f1"));
    spec.shape_archive_id = Some(RemoteId::from("f2"));
    spec.hash_archive_id = Some(RemoteId::from("f3"));
    spec.add_parent_folder(RemoteId::from("d1"));
    spec.member_of_packages.insert(PackageName::from("Water"));
    spec.synced_at = Some(Utc::now());
    spec
}

#[rstest]
#[case::fresh(FeatureSpec::new("SGID.WATER.Lakes"))]
#[case::synced(synced_feature())]
#[case::skipped(FeatureSpec { skip: true, ..FeatureSpec::new("Lakes") })]
fn feature_spec_roundtrips(#[case] spec: FeatureSpec) {
    let json = serde_json::to_string(&spec).expect("serialize");
    let back: FeatureSpec = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, spec);
}

#[test]
fn feature_spec_tolerates_missing_optional_fields() {
    let json = r#"{"source_name": "SGID.WATER.Lakes", "display_name": "Lakes", "category": "WATER"}"#;
    let spec: FeatureSpec = serde_json::from_str(json).expect("deserialize");
    assert!(spec.hash_archive_id.is_none());
    assert!(spec.parent_folder_ids.is_empty());
    assert!(!spec.skip);
}

#[test]
fn package_spec_keeps_member_order() {
    let mut spec = PackageSpec::new("Water", "WATER");
    spec.feature_classes = vec!["SGID.WATER.Rivers".into(), "SGID.WATER.Lakes".into()];
    let value = serde_json::to_value(&spec).expect("serialize");
    assert_eq!(value["feature_classes"][0], "SGID.WATER.Rivers");
    assert_eq!(value["name"], "Water");
}

#[rstest]
#[case(r#"null"#, FieldValue::Null)]
#[case(r#"true"#, FieldValue::Bool(true))]
#[case(r#"42"#, FieldValue::Integer(42))]
#[case(r#"2.5"#, FieldValue::Double(2.5))]
#[case(r#""Erie""#, FieldValue::Text("Erie".into()))]
fn field_values_are_untagged(#[case] json: &str, #[case] expected: FieldValue) {
    let value: FieldValue = serde_json::from_str(json).expect("deserialize");
    assert_eq!(value, expected);
}

#[test]
fn field_defs_use_type_key() {
    let def = FieldDef::new("SHAPE", FieldType::Geometry);
    assert_eq!(
        serde_json::to_value(&def).expect("serialize"),
        serde_json::json!({"name": "SHAPE", "type": "geometry"})
    );
    let kind: DatasetKind = serde_json::from_str(r#""table""#).expect("deserialize");
    assert_eq!(kind, DatasetKind::Table);
}
