//! Rows returned by the ORM.

use std::collections::BTreeMap;

use relq_core::{SqlValue, ToSqlValue};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

/// Loaded relation data attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A to-one relation; `None` when nothing is related.
    One(Option<Box<Record>>),
    /// A to-many relation.
    Many(Vec<Record>),
    /// A counted or existence-checked relation.
    Value(SqlValue),
    /// A plucked column of a to-many relation.
    Values(Vec<SqlValue>),
}

impl Related {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::One(record) => record.as_ref().map_or(JsonValue::Null, |r| r.to_json()),
            Self::Many(records) => JsonValue::Array(records.iter().map(Record::to_json).collect()),
            Self::Value(value) => value.to_json(),
            Self::Values(values) => JsonValue::Array(values.iter().map(SqlValue::to_json).collect()),
        }
    }
}

/// A row keyed by application column keys, plus any relations loaded or
/// written with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, SqlValue>,
    related: BTreeMap<String, Related>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column and returns the record.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToSqlValue) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a column.
    pub fn set(&mut self, key: &str, value: impl ToSqlValue) {
        self.values.insert(key.to_string(), value.to_sql_value());
    }

    /// Returns a column value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SqlValue> {
        self.values.get(key)
    }

    /// Returns a column as an integer.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SqlValue::as_i64)
    }

    /// Returns a column as text.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SqlValue::as_str)
    }

    /// Removes a column.
    pub fn remove(&mut self, key: &str) -> Option<SqlValue> {
        self.values.remove(key)
    }

    /// Column values.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, SqlValue> {
        &self.values
    }

    /// Loaded relation by name.
    #[must_use]
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    /// Records of a loaded to-many relation, or the single record of a
    /// to-one relation.
    #[must_use]
    pub fn related_records(&self, name: &str) -> Vec<&Self> {
        match self.related.get(name) {
            Some(Related::Many(records)) => records.iter().collect(),
            Some(Related::One(Some(record))) => vec![record.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Attaches relation data.
    pub fn set_related(&mut self, name: &str, related: Related) {
        self.related.insert(name.to_string(), related);
    }

    pub(crate) fn insert_raw(&mut self, key: String, value: SqlValue) {
        self.values.insert(key, value);
    }

    pub(crate) fn into_values(self) -> BTreeMap<String, SqlValue> {
        self.values
    }

    /// Converts the record, relations included, into a JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (key, value) in &self.values {
            map.insert(key.clone(), value.to_json());
        }
        for (name, related) in &self.related {
            map.insert(name.clone(), related.to_json());
        }
        JsonValue::Object(map)
    }
}

impl From<BTreeMap<String, SqlValue>> for Record {
    fn from(values: BTreeMap<String, SqlValue>) -> Self {
        Self {
            values,
            related: BTreeMap::new(),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_values_and_relations() {
        let mut user = Record::new().with("id", 1).with("name", "Ann");
        user.set_related(
            "messages",
            Related::Many(vec![Record::new().with("text", "hi")]),
        );
        user.set_related("messageCount", Related::Value(SqlValue::Int(1)));
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 1,
                "name": "Ann",
                "messages": [{"text": "hi"}],
                "messageCount": 1
            })
        );
    }

    #[test]
    fn test_related_records_of_to_one() {
        let mut message = Record::new();
        message.set_related(
            "author",
            Related::One(Some(Box::new(Record::new().with("id", 2)))),
        );
        assert_eq!(message.related_records("author")[0].get_i64("id"), Some(2));
        assert!(message.related_records("chat").is_empty());
    }
}
