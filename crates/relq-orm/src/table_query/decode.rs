//! Turning returned rows into records.
//!
//! Plain columns go through the column decoders of their table. Relation
//! sub-selects come back as JSON and are rebuilt into nested records with the
//! plan recorded when the sub-select was added.

use std::collections::BTreeMap;
use std::sync::Arc;

use relq_core::{ReturnShape, SqlValue};
use serde_json::Value as JsonValue;

use crate::error::{OrmError, Result};
use crate::record::{Record, Related};
use crate::schema::TableDef;

/// How to decode the rows of one table, sub-selects included.
#[derive(Debug, Clone)]
pub(crate) struct DecodePlan {
    table: Arc<TableDef>,
    relations: BTreeMap<String, SubPlan>,
}

#[derive(Debug, Clone)]
struct SubPlan {
    shape: ReturnShape,
    /// Column read by a pluck sub-select.
    column: Option<String>,
    plan: DecodePlan,
}

impl DecodePlan {
    pub(crate) fn new(table: Arc<TableDef>) -> Self {
        Self {
            table,
            relations: BTreeMap::new(),
        }
    }

    pub(crate) fn add_relation(
        &mut self,
        alias: &str,
        shape: ReturnShape,
        column: Option<String>,
        plan: Self,
    ) {
        self.relations
            .insert(alias.to_string(), SubPlan { shape, column, plan });
    }

    pub(crate) fn decode_rows(&self, rows: Vec<Record>) -> Result<Vec<Record>> {
        rows.into_iter().map(|row| self.decode_row(row)).collect()
    }

    pub(crate) fn decode_row(&self, row: Record) -> Result<Record> {
        let mut record = Record::new();
        for (key, value) in row.into_values() {
            if let Some(sub) = self.relations.get(&key) {
                let related = sub.decode(&self.table, &key, value)?;
                record.set_related(&key, related);
            } else {
                let value = self.table.decode(&key, value)?;
                record.insert_raw(key, value);
            }
        }
        Ok(record)
    }

    /// Decodes one column of this table.
    pub(crate) fn decode_value(&self, key: &str, value: SqlValue) -> Result<SqlValue> {
        self.table.decode(key, value)
    }

    fn decode_object(&self, object: serde_json::Map<String, JsonValue>) -> Result<Record> {
        let mut record = Record::new();
        for (key, value) in object {
            if let Some(sub) = self.relations.get(&key) {
                let related = sub.decode_json(value)?;
                record.set_related(&key, related);
            } else {
                let value = self.table.decode(&key, SqlValue::from_json(value))?;
                record.insert_raw(key, value);
            }
        }
        Ok(record)
    }

    fn decode_json_record(&self, value: JsonValue) -> Result<Option<Record>> {
        match value {
            JsonValue::Object(object) => self.decode_object(object).map(Some),
            _ => Ok(None),
        }
    }
}

impl SubPlan {
    fn decode(&self, owner: &TableDef, alias: &str, value: SqlValue) -> Result<Related> {
        match self.shape {
            ReturnShape::Value | ReturnShape::ValueOrThrow | ReturnShape::Exists => {
                let value = match value {
                    SqlValue::Json(json) => SqlValue::from_json(json),
                    other => other,
                };
                Ok(Related::Value(value))
            }
            _ => {
                let json = match value {
                    SqlValue::Json(json) => json,
                    SqlValue::Null => JsonValue::Null,
                    SqlValue::Text(text) => {
                        serde_json::from_str(&text).map_err(|e| OrmError::Codec {
                            table: owner.name().to_string(),
                            column: alias.to_string(),
                            source: Box::new(e),
                        })?
                    }
                    other => other.to_json(),
                };
                self.decode_json(json)
            }
        }
    }

    fn decode_json(&self, json: JsonValue) -> Result<Related> {
        let items = |json: JsonValue| match json {
            JsonValue::Array(items) => items,
            JsonValue::Null => Vec::new(),
            other => vec![other],
        };
        Ok(match self.shape {
            ReturnShape::One | ReturnShape::OneOrThrow | ReturnShape::Single => {
                Related::One(self.plan.decode_json_record(json)?.map(Box::new))
            }
            ReturnShape::Pluck => {
                let values = items(json)
                    .into_iter()
                    .map(|v| {
                        let value = SqlValue::from_json(v);
                        match &self.column {
                            Some(column) => self.plan.decode_value(column, value),
                            None => Ok(value),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Related::Values(values)
            }
            ReturnShape::Value | ReturnShape::ValueOrThrow | ReturnShape::Exists => {
                Related::Value(SqlValue::from_json(json))
            }
            _ => {
                let records = items(json)
                    .into_iter()
                    .filter_map(|v| self.plan.decode_json_record(v).transpose())
                    .collect::<Result<Vec<_>>>()?;
                Related::Many(records)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use serde_json::json;

    fn upper() -> Arc<TableDef> {
        Arc::new(
            TableDef::new("user")
                .column(ColumnDef::new("id").primary_key())
                .column(ColumnDef::new("name").decode(|v| {
                    Ok(match v {
                        SqlValue::Text(s) => SqlValue::Text(s.to_uppercase()),
                        other => other,
                    })
                })),
        )
    }

    #[test]
    fn test_nested_json_is_decoded_with_related_codecs() {
        let mut plan = DecodePlan::new(Arc::new(TableDef::new("message")));
        plan.add_relation("author", ReturnShape::One, None, DecodePlan::new(upper()));
        plan.add_relation(
            "names",
            ReturnShape::Pluck,
            Some("name".into()),
            DecodePlan::new(upper()),
        );

        let row = Record::new()
            .with("id", 1)
            .with("author", SqlValue::Json(json!({"id": 2, "name": "ann"})))
            .with("names", SqlValue::Json(json!(["bo", "cy"])));
        let record = plan.decode_row(row).unwrap();

        assert_eq!(record.get_i64("id"), Some(1));
        let author = record.related_records("author");
        assert_eq!(author[0].get_str("name"), Some("ANN"));
        assert_eq!(
            record.related("names"),
            Some(&Related::Values(vec![
                SqlValue::Text("BO".into()),
                SqlValue::Text("CY".into())
            ]))
        );
    }

    #[test]
    fn test_missing_one_and_empty_many() {
        let mut plan = DecodePlan::new(upper());
        plan.add_relation(
            "messages",
            ReturnShape::All,
            None,
            DecodePlan::new(Arc::new(TableDef::new("message"))),
        );
        plan.add_relation(
            "last",
            ReturnShape::One,
            None,
            DecodePlan::new(Arc::new(TableDef::new("message"))),
        );
        plan.add_relation(
            "count",
            ReturnShape::Value,
            None,
            DecodePlan::new(Arc::new(TableDef::new("message"))),
        );

        let row = Record::new()
            .with("messages", SqlValue::Json(json!([])))
            .with("last", SqlValue::Null)
            .with("count", 0);
        let record = plan.decode_row(row).unwrap();

        assert_eq!(record.related("messages"), Some(&Related::Many(vec![])));
        assert_eq!(record.related("last"), Some(&Related::One(None)));
        assert_eq!(record.related("count"), Some(&Related::Value(SqlValue::Int(0))));
    }
}
