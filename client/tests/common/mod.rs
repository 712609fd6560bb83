//! Record types shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rowcloud_engine::{FieldDef, Record, RecordMeta, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub meta: RecordMeta,
}

impl Default for Category {
    fn default() -> Self {
        Self {
            id: -1,
            name: String::new(),
            meta: RecordMeta::default(),
        }
    }
}

impl Category {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Record for Category {
    const TYPE_NAME: &'static str = "Category";

    fn fields() -> Vec<FieldDef> {
        vec![FieldDef::new("id", -1i64), FieldDef::new("name", "")]
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "id" => self.id.into(),
            "name" => self.name.clone().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "id" => self.id = value.as_i64().unwrap_or(-1),
            "name" => self.name = value.as_str().unwrap_or_default().to_string(),
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

/// Every scalar type, a text primary key and an ignored field.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub uid: String,
    pub title: String,
    pub rating: f64,
    pub pinned: bool,
    pub views: i64,
    pub due: DateTime<Utc>,
    pub attachment: Vec<u8>,
    pub preview: String,
    pub meta: RecordMeta,
}

pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_default()
}

impl Default for Note {
    fn default() -> Self {
        Self {
            uid: String::new(),
            title: String::new(),
            rating: 0.0,
            pinned: false,
            views: 0,
            due: epoch(),
            attachment: Vec::new(),
            preview: String::new(),
            meta: RecordMeta::default(),
        }
    }
}

impl Record for Note {
    const TYPE_NAME: &'static str = "Note";

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("uid", ""),
            FieldDef::new("title", ""),
            FieldDef::new("rating", 0.0),
            FieldDef::new("pinned", false),
            FieldDef::new("views", 0i64),
            FieldDef::new("due", epoch()),
            FieldDef::new("attachment", Vec::<u8>::new()),
            FieldDef::new("preview", "").ignored(),
        ]
    }

    fn primary_key() -> &'static str {
        "uid"
    }

    fn get(&self, field: &str) -> Value {
        match field {
            "uid" => self.uid.clone().into(),
            "title" => self.title.clone().into(),
            "rating" => self.rating.into(),
            "pinned" => self.pinned.into(),
            "views" => self.views.into(),
            "due" => self.due.into(),
            "attachment" => self.attachment.clone().into(),
            "preview" => self.preview.clone().into(),
            _ => Value::Null,
        }
    }

    fn set(&mut self, field: &str, value: Value) {
        match field {
            "uid" => self.uid = value.as_str().unwrap_or_default().to_string(),
            "title" => self.title = value.as_str().unwrap_or_default().to_string(),
            "rating" => self.rating = value.as_f64().unwrap_or_default(),
            "pinned" => self.pinned = value.as_bool().unwrap_or_default(),
            "views" => self.views = value.as_i64().unwrap_or_default(),
            "due" => self.due = value.as_date().unwrap_or_else(epoch),
            "attachment" => self.attachment = value.as_blob().unwrap_or_default().to_vec(),
            "preview" => self.preview = value.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn after_load(&mut self) {
        self.preview = self.title.chars().take(8).collect();
    }
}
