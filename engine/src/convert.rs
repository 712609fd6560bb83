//! Conversion between local records and remote records.

use crate::codec::{from_remote, to_remote, RemoteValue, Value};
use crate::schema::{FieldType, COL_CREATED, COL_IS_DELETED, COL_UPDATED};
use crate::{error::Result, CloudRecord, Error, Record, RecordId, Scope, SystemFields, ZoneId};

/// Remote record name for a local primary key: `<table>-<pk>`.
pub fn record_name<R: Record>(primary_key: &Value) -> String {
    format!("{}-{}", R::table_name(), primary_key)
}

/// Recover the local primary key embedded in a remote record name.
pub fn primary_key_from_name<R: Record>(name: &str) -> Result<Value> {
    let prefix = format!("{}-", R::table_name());
    let invalid = || Error::InvalidPrimaryKey {
        field: R::primary_key().to_string(),
        value: name.to_string(),
    };
    let raw = name.strip_prefix(&prefix).ok_or_else(invalid)?;
    match primary_key_type::<R>() {
        Some(FieldType::Integer) => raw.parse::<i64>().map(Value::Integer).map_err(|_| invalid()),
        _ if raw.is_empty() => Err(invalid()),
        _ => Ok(Value::Text(raw.to_string())),
    }
}

fn primary_key_type<R: Record>() -> Option<FieldType> {
    R::fields()
        .into_iter()
        .find(|f| f.name == R::primary_key())
        .map(|f| f.field_type)
}

/// Zone that holds records of `R` in `scope`.
pub fn zone_for<R: Record>(scope: Scope) -> ZoneId {
    if scope.supports_custom_zones() {
        ZoneId::new(R::zone_name())
    } else {
        ZoneId::default_zone()
    }
}

/// Stored remote system fields of a record, if it was synced before.
pub fn system_fields_of<R: Record>(record: &R) -> Result<Option<SystemFields>> {
    let meta = &record.meta().cloud_meta;
    if meta.is_empty() {
        return Ok(None);
    }
    SystemFields::decode(meta).map(Some)
}

/// Build the remote record for a local one.
///
/// A record with stored system fields targets the same remote record and
/// only marks fields that differ from what the server last acknowledged.
pub fn to_cloud_record<R: Record>(record: &R, zone: &ZoneId) -> Result<CloudRecord> {
    if !record.has_primary_key() {
        return Err(Error::UnsetPrimaryKey);
    }

    let mut cloud = match system_fields_of(record)? {
        Some(system) => {
            if system.record_type != R::TYPE_NAME {
                return Err(Error::RecordTypeMismatch {
                    expected: R::TYPE_NAME.to_string(),
                    got: system.record_type,
                });
            }
            CloudRecord::from_system_fields(system)
        }
        None => {
            let name = record_name::<R>(&record.primary_key_value());
            CloudRecord::new(R::TYPE_NAME, RecordId::new(zone.clone(), name))
        }
    };

    for (name, value) in record.values() {
        cloud.set(name, to_remote(&value));
    }
    let meta = record.meta();
    cloud.set(COL_IS_DELETED, Some(RemoteValue::Int64(meta.is_deleted as i64)));
    cloud.set(COL_CREATED, meta.created.map(RemoteValue::Date));
    cloud.set(COL_UPDATED, meta.updated.map(RemoteValue::Date));
    Ok(cloud)
}

/// Materialize a local record from a remote one, carrying its system fields
/// into `cloudMeta`.
pub fn from_cloud_record<R: Record>(cloud: &CloudRecord) -> Result<R> {
    if cloud.record_type != R::TYPE_NAME {
        return Err(Error::RecordTypeMismatch {
            expected: R::TYPE_NAME.to_string(),
            got: cloud.record_type.clone(),
        });
    }

    let mut record = R::default();
    for field in R::fields().into_iter().filter(|f| !f.ignored) {
        if let Some(remote) = cloud.get(&field.name) {
            let value = from_remote(remote, field.field_type).unwrap_or(field.default);
            record.set(&field.name, value);
        }
    }
    if !record.has_primary_key() {
        record.set_primary_key(primary_key_from_name::<R>(&cloud.id.name)?);
    }

    let meta = record.meta_mut();
    meta.is_deleted = matches!(cloud.get(COL_IS_DELETED), Some(RemoteValue::Int64(v)) if *v != 0);
    meta.created = match cloud.get(COL_CREATED) {
        Some(RemoteValue::Date(d)) => Some(*d),
        _ => cloud.created_at,
    };
    meta.updated = match cloud.get(COL_UPDATED) {
        Some(RemoteValue::Date(d)) => Some(*d),
        _ => cloud.modified_at,
    };
    meta.cloud_meta = cloud.system_fields().encode()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, RecordMeta};

    #[derive(Debug, Clone)]
    struct Task {
        id: i64,
        title: String,
        done: bool,
        meta: RecordMeta,
    }

    impl Default for Task {
        fn default() -> Self {
            Self {
                id: -1,
                title: String::new(),
                done: false,
                meta: RecordMeta::default(),
            }
        }
    }

    impl Record for Task {
        const TYPE_NAME: &'static str = "Task";

        fn fields() -> Vec<FieldDef> {
            vec![
                FieldDef::new("id", -1i64),
                FieldDef::new("title", ""),
                FieldDef::new("done", false),
            ]
        }

        fn get(&self, field: &str) -> Value {
            match field {
                "id" => self.id.into(),
                "title" => self.title.clone().into(),
                "done" => self.done.into(),
                _ => Value::Null,
            }
        }

        fn set(&mut self, field: &str, value: Value) {
            match field {
                "id" => self.id = value.as_i64().unwrap_or(-1),
                "title" => self.title = value.as_str().unwrap_or_default().to_string(),
                "done" => self.done = value.as_bool().unwrap_or(false),
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

    fn task(id: i64, title: &str) -> Task {
        Task {
            id,
            title: title.into(),
            ..Default::default()
        }
    }

    #[test]
    fn new_record_gets_deterministic_name() {
        let cloud = to_cloud_record(&task(4, "write"), &zone_for::<Task>(Scope::Private)).unwrap();
        assert_eq!(cloud.id.name, "tasks-4");
        assert_eq!(cloud.id.zone.name, "tasks-zone");
        assert_eq!(cloud.get("done"), Some(&RemoteValue::Int64(0)));
        assert!(cloud.changed_keys().contains("title"));
    }

    #[test]
    fn unsaved_record_cannot_be_sent() {
        let err = to_cloud_record(&Task::default(), &ZoneId::default()).unwrap_err();
        assert_eq!(err, Error::UnsetPrimaryKey);
    }

    #[test]
    fn synced_record_sends_only_changes() {
        let cloud = to_cloud_record(&task(4, "write"), &ZoneId::new("tasks-zone")).unwrap();
        let mut local: Task = from_cloud_record(&cloud).unwrap();
        assert_eq!(local.id, 4);
        assert!(!local.meta.cloud_meta.is_empty());

        local.title = "rewrite".into();
        let again = to_cloud_record(&local, &ZoneId::new("other")).unwrap();
        assert_eq!(again.id, cloud.id);
        assert_eq!(again.changed_keys().iter().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn primary_key_recovered_from_name() {
        assert_eq!(
            primary_key_from_name::<Task>("tasks-12").unwrap(),
            Value::Integer(12)
        );
        assert!(primary_key_from_name::<Task>("tasks-abc").is_err());
        assert!(primary_key_from_name::<Task>("notes-1").is_err());
    }

    #[test]
    fn public_scope_uses_default_zone() {
        assert!(zone_for::<Task>(Scope::Public).is_default());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let cloud = CloudRecord::new("Note", RecordId::new(ZoneId::default(), "notes-1"));
        let err = from_cloud_record::<Task>(&cloud).unwrap_err();
        assert!(matches!(err, Error::RecordTypeMismatch { .. }));
    }
}
