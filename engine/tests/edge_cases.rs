//! Edge case tests for rowcloud-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use rowcloud_engine::codec::{
    from_remote, from_storage, parse_date, sniff_declared_type, to_remote, to_storage, ColumnKind,
    RemoteValue, StorageValue,
};
use rowcloud_engine::convert::{from_cloud_record, primary_key_from_name, to_cloud_record};
use rowcloud_engine::{
    table_name_for, FetchType, FieldDef, FieldType, Record, RecordMeta, TableDescriptor, Value,
    ZoneId,
};

/// A record keyed by text, as records created remotely usually are.
#[derive(Debug, Clone, Default)]
struct Tag {
    id: String,
    label: String,
    weight: f64,
    meta: RecordMeta,
}

impl Record for Tag {
    const TYPE_NAME: &'static str = "Tag";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("id", ""),
            FieldDef::new("label", ""),
            FieldDef::new("weight", 1.0),
        ]
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.clone().into(),
            "label" => self.label.clone().into(),
            "weight" => self.weight.into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_str().unwrap_or_default().to_string(),
            "label" => self.label = value.as_str().unwrap_or_default().to_string(),
            "weight" => self.weight = value.as_f64().unwrap_or(1.0),
            _ => {}
        }
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

// ============================================================================
// Codec Edge Cases
// ============================================================================

#[test]
fn unicode_text_survives_storage() {
    let text = "日本語 🎉 ünïcödé";
    let stored = to_storage(&Value::Text(text.into()));
    assert_eq!(from_storage(stored, ColumnKind::Text), Value::Text(text.into()));
}

#[test]
fn empty_blob_survives_storage() {
    let stored = to_storage(&Value::Blob(Vec::new()));
    assert_eq!(from_storage(stored, ColumnKind::Blob), Value::Blob(Vec::new()));
}

#[test]
fn extreme_integers() {
    for i in [i64::MIN, -1, 0, i64::MAX] {
        let stored = to_storage(&Value::Integer(i));
        assert_eq!(from_storage(stored, ColumnKind::Integer), Value::Integer(i));
    }
}

#[test]
fn malformed_date_text_decodes_to_epoch() {
    let value = from_storage(StorageValue::Text("not a date".into()), ColumnKind::Date);
    assert_eq!(value, Value::Date(parse_date("1970-01-01 00:00:00").unwrap()));
}

#[test]
fn declared_type_with_spaces_and_size() {
    assert_eq!(sniff_declared_type("native character(70)"), ColumnKind::Text);
    assert_eq!(sniff_declared_type("Varying Character(10)"), ColumnKind::Text);
    assert_eq!(sniff_declared_type("INT8"), ColumnKind::Integer);
    assert_eq!(sniff_declared_type("TIMESTAMP"), ColumnKind::Date);
}

#[test]
fn remote_double_into_integer_field_truncates() {
    assert_eq!(
        from_remote(&RemoteValue::Double(2.9), FieldType::Integer),
        Some(Value::Integer(2))
    );
}

#[test]
fn remote_date_round_trip() {
    let date = parse_date("2030-12-31 23:59:59").unwrap();
    let remote = to_remote(&Value::Date(date)).unwrap();
    assert_eq!(from_remote(&remote, FieldType::Date), Some(Value::Date(date)));
}

// ============================================================================
// Naming Edge Cases
// ============================================================================

#[test]
fn pluralization_of_short_and_odd_names() {
    assert_eq!(table_name_for("Y"), "ies");
    assert_eq!(table_name_for("Bus"), "buses");
    assert_eq!(table_name_for("URL"), "urls");
    assert_eq!(table_name_for("Key"), "keies");
}

#[test]
fn text_primary_key_with_dashes_recovered() {
    let uuid = "6f1c2a58-0d4e-4c4b-9b0e-3f7b2b1d9e11";
    let name = format!("tags-{}", uuid);
    assert_eq!(
        primary_key_from_name::<Tag>(&name).unwrap(),
        Value::Text(uuid.into())
    );
    assert!(primary_key_from_name::<Tag>("tags-").is_err());
}

// ============================================================================
// Descriptor Edge Cases
// ============================================================================

#[test]
fn text_primary_key_column() {
    let desc = TableDescriptor::of::<Tag>().unwrap();
    assert_eq!(
        desc.primary_key_column().unwrap().definition(),
        "\"id\" TEXT PRIMARY KEY NOT NULL UNIQUE"
    );
    let weight = desc.columns.iter().find(|c| c.name == "weight").unwrap();
    assert_eq!(weight.definition(), "\"weight\" REAL DEFAULT 1");
}

#[test]
fn nothing_missing_when_all_columns_exist() {
    let desc = TableDescriptor::of::<Tag>().unwrap();
    let existing: Vec<String> = desc.columns.iter().map(|c| c.name.to_uppercase()).collect();
    assert!(desc.missing_columns(&existing).is_empty());
}

#[test]
fn filter_with_or_is_parenthesized() {
    assert_eq!(
        FetchType::NonDeleted.compose("a = 1 OR b = 2"),
        "(a = 1 OR b = 2) AND isDeleted = 0"
    );
}

// ============================================================================
// Remote Conversion Edge Cases
// ============================================================================

#[test]
fn soft_deleted_record_travels_as_tombstone() {
    let mut tag = Tag {
        id: "t1".into(),
        label: "red".into(),
        ..Default::default()
    };
    tag.meta.is_deleted = true;

    let cloud = to_cloud_record(&tag, &ZoneId::new("tags-zone")).unwrap();
    assert_eq!(cloud.get("isDeleted"), Some(&RemoteValue::Int64(1)));

    let back: Tag = from_cloud_record(&cloud).unwrap();
    assert!(back.meta.is_deleted);
    assert_eq!(back.label, "red");
}

#[test]
fn missing_remote_field_keeps_default() {
    let mut cloud = to_cloud_record(
        &Tag {
            id: "t2".into(),
            weight: 3.0,
            ..Default::default()
        },
        &ZoneId::new("tags-zone"),
    )
    .unwrap();
    cloud.set("weight", None);
    cloud.set("id", None);

    let back: Tag = from_cloud_record(&cloud).unwrap();
    assert_eq!(back.id, "t2");
    assert_eq!(back.weight, 0.0);
}
