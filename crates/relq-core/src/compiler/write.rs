use super::select::Overrides;
use super::{push_ident, Compiler};
use crate::error::{QueryError, Result};
use crate::query::{
    AssignValue, Assignment, ConflictAction, InsertData, InsertRows, InsertSource, InsertValue,
    OnConflict, Query,
};
use crate::value::SqlValue;

impl Compiler<'_> {
    pub(super) fn insert(&mut self, query: &Query, data: &InsertData, out: &mut String) -> Result<()> {
        out.push_str("INSERT INTO ");
        if let Some(schema) = &query.schema {
            push_ident(out, schema);
            out.push('.');
        }
        push_ident(out, &query.table);

        let columns = match &data.source {
            InsertSource::Values(rows) => {
                self.insert_values(query, rows, out)?;
                &rows.columns
            }
            InsertSource::Select { columns, query: source } => {
                Self::column_list(query, columns, out);
                out.push(' ');
                self.statement(source, out, &Overrides::default())?;
                columns
            }
        };

        if let Some(conflict) = &data.on_conflict {
            self.on_conflict(query, conflict, columns, out)?;
        }
        self.returning(query, out)
    }

    fn column_list(query: &Query, columns: &[String], out: &mut String) {
        out.push('(');
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            push_ident(out, &Self::own_db_name(query, column));
        }
        out.push(')');
    }

    fn insert_values(&mut self, query: &Query, rows: &InsertRows, out: &mut String) -> Result<()> {
        let invalid = |reason: String| QueryError::InvalidWrite {
            table: query.table.clone(),
            reason,
        };
        if rows.rows.is_empty() {
            return Err(invalid(String::from("insert without rows")));
        }
        if rows.columns.is_empty() {
            if rows.rows.len() > 1 {
                return Err(invalid(String::from(
                    "several rows without columns cannot be inserted at once",
                )));
            }
            out.push_str(" DEFAULT VALUES");
            return Ok(());
        }

        Self::column_list(query, &rows.columns, out);
        out.push_str(" VALUES ");
        let mut shared_slots: Vec<Option<usize>> = vec![None; rows.shared.len()];
        for (i, row) in rows.rows.iter().enumerate() {
            if row.len() != rows.columns.len() {
                return Err(invalid(format!(
                    "row {i} has {} values for {} columns",
                    row.len(),
                    rows.columns.len()
                )));
            }
            if i > 0 {
                out.push_str(", ");
            }
            out.push('(');
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    out.push_str(", ");
                }
                match value {
                    InsertValue::Value(v) => self.push_value(v, out),
                    InsertValue::Default => out.push_str("DEFAULT"),
                    InsertValue::Raw(raw) => self.raw(raw, out)?,
                    InsertValue::Shared(slot) => {
                        let existing = shared_slots
                            .get(*slot)
                            .copied()
                            .ok_or_else(|| invalid(format!("unknown shared value {slot}")))?;
                        let shared = &rows.shared[*slot];
                        if shared.is_null() {
                            out.push_str("NULL");
                        } else if let Some(index) = existing {
                            out.push('$');
                            out.push_str(&index.to_string());
                        } else {
                            self.push_param(shared.clone(), out);
                            shared_slots[*slot] = Some(self.params.len());
                        }
                    }
                }
            }
            out.push(')');
        }
        Ok(())
    }

    fn on_conflict(
        &mut self,
        query: &Query,
        conflict: &OnConflict,
        inserted: &[String],
        out: &mut String,
    ) -> Result<()> {
        out.push_str(" ON CONFLICT");
        if !conflict.target.is_empty() {
            out.push(' ');
            Self::column_list(query, &conflict.target, out);
        }
        match &conflict.action {
            ConflictAction::Ignore => out.push_str(" DO NOTHING"),
            ConflictAction::Merge(columns) => {
                let merged: Vec<&String> = if columns.is_empty() {
                    inserted
                        .iter()
                        .filter(|c| !conflict.target.contains(*c))
                        .collect()
                } else {
                    columns.iter().collect()
                };
                if merged.is_empty() {
                    out.push_str(" DO NOTHING");
                    return Ok(());
                }
                out.push_str(" DO UPDATE SET ");
                for (i, column) in merged.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let db = Self::own_db_name(query, column);
                    push_ident(out, &db);
                    out.push_str(" = excluded.");
                    push_ident(out, &db);
                }
            }
            ConflictAction::Update(assignments) => {
                out.push_str(" DO UPDATE SET ");
                self.assignments(query, assignments, out)?;
            }
        }
        Ok(())
    }

    pub(super) fn update(&mut self, query: &Query, assignments: &[Assignment], out: &mut String) -> Result<()> {
        if assignments.is_empty() {
            return Err(QueryError::EmptyWriteSet {
                table: query.table.clone(),
            });
        }
        out.push_str("UPDATE ");
        Self::write_target(query, out);
        out.push_str(" SET ");
        self.assignments(query, assignments, out)?;
        self.where_clause(query, out)?;
        self.returning(query, out)
    }

    pub(super) fn delete(&mut self, query: &Query, out: &mut String) -> Result<()> {
        out.push_str("DELETE FROM ");
        Self::write_target(query, out);
        self.where_clause(query, out)?;
        self.returning(query, out)
    }

    fn write_target(query: &Query, out: &mut String) {
        if let Some(schema) = &query.schema {
            push_ident(out, schema);
            out.push('.');
        }
        push_ident(out, &query.table);
        if query.alias() != query.table {
            out.push_str(" AS ");
            push_ident(out, query.alias());
        }
    }

    fn assignments(&mut self, query: &Query, assignments: &[Assignment], out: &mut String) -> Result<()> {
        for (i, assignment) in assignments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let db = Self::own_db_name(query, &assignment.column);
            push_ident(out, &db);
            out.push_str(" = ");
            match &assignment.value {
                AssignValue::Value(v) => self.push_value(v, out),
                AssignValue::Raw(raw) => self.raw(raw, out)?,
                AssignValue::Increment(v) | AssignValue::Decrement(v) => {
                    push_ident(out, &db);
                    out.push_str(if matches!(assignment.value, AssignValue::Increment(_)) {
                        " + "
                    } else {
                        " - "
                    });
                    self.push_param(v.clone(), out);
                }
                AssignValue::Expr(expr) => self.expr(expr, true, out)?,
            }
        }
        Ok(())
    }

    /// A written value. `NULL` is inlined so the server types it from the
    /// target column instead of from the bound parameter.
    fn push_value(&mut self, value: &SqlValue, out: &mut String) {
        if value.is_null() {
            out.push_str("NULL");
        } else {
            self.push_param(value.clone(), out);
        }
    }

    fn returning(&mut self, query: &Query, out: &mut String) -> Result<()> {
        if query.returning.is_empty() {
            return Ok(());
        }
        out.push_str(" RETURNING ");
        self.select_list(query, &query.returning, false, None, out)
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::compile;
    use crate::condition::Condition;
    use crate::error::QueryError;
    use crate::query::{
        Assignment, ColumnShape, ConflictAction, InsertData, InsertRows, InsertSource,
        InsertValue, OnConflict, Query, SelectItem,
    };
    use crate::value::SqlValue;
    use std::sync::Arc;

    #[test]
    fn test_insert_with_shared_foreign_key() {
        let mut rows = InsertRows::new(vec!["authorId".into(), "text".into()]);
        let author = rows.share(SqlValue::Int(7));
        rows.push_row(vec![
            InsertValue::Shared(author),
            InsertValue::Value(SqlValue::Text("a".into())),
        ]);
        rows.push_row(vec![
            InsertValue::Shared(author),
            InsertValue::Value(SqlValue::Text("b".into())),
        ]);
        let query = Query::table("message")
            .for_insert(rows)
            .unwrap()
            .returning([SelectItem::All]);
        let sql = compile(&query).unwrap();
        assert_eq!(
            sql.text,
            "INSERT INTO \"message\"(\"authorId\", \"text\") VALUES ($1, $2), ($1, $3) RETURNING *"
        );
        assert_eq!(
            sql.params,
            vec![
                SqlValue::Int(7),
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into())
            ]
        );
    }

    #[test]
    fn test_insert_default_values_and_missing_columns() {
        let query = Query::table("user")
            .for_insert(InsertRows {
                columns: vec![],
                rows: vec![vec![]],
                shared: vec![],
            })
            .unwrap();
        assert_eq!(
            compile(&query).unwrap().text,
            "INSERT INTO \"user\" DEFAULT VALUES"
        );

        let rows = InsertRows::from_maps(vec![
            vec![("name".into(), SqlValue::Text("a".into()))],
            vec![("age".into(), SqlValue::Int(1))],
        ]);
        let sql = compile(&Query::table("user").for_insert(rows).unwrap()).unwrap();
        assert_eq!(
            sql.text,
            "INSERT INTO \"user\"(\"name\", \"age\") VALUES ($1, DEFAULT), (DEFAULT, $2)"
        );
    }

    #[test]
    fn test_insert_select_from_parent_query() {
        let source = Query::table("chat")
            .select([
                SelectItem::column_as("chat.id", "chatId"),
                SelectItem::Expr {
                    expr: crate::expr::val("hello"),
                    alias: None,
                },
            ])
            .filter(Condition::eq("id", 1))
            .limit(1);
        let query = Query::table("message")
            .for_insert(InsertData {
                source: InsertSource::Select {
                    columns: vec!["chatId".into(), "text".into()],
                    query: Box::new(source),
                },
                on_conflict: None,
            })
            .unwrap()
            .returning([SelectItem::All]);
        let sql = compile(&query).unwrap();
        assert_eq!(
            sql.text,
            "INSERT INTO \"message\"(\"chatId\", \"text\") SELECT \"chat\".\"id\" AS \"chatId\", $1 \
             FROM \"chat\" WHERE \"chat\".\"id\" = $2 LIMIT 1 RETURNING *"
        );
    }

    #[test]
    fn test_insert_on_conflict_merge() {
        let rows = InsertRows::from_maps(vec![vec![
            ("email".into(), SqlValue::Text("a@b".into())),
            ("name".into(), SqlValue::Text("A".into())),
        ]]);
        let query = Query::table("user")
            .for_insert(InsertData {
                source: InsertSource::Values(rows),
                on_conflict: Some(OnConflict {
                    target: vec!["email".into()],
                    action: ConflictAction::Merge(vec![]),
                }),
            })
            .unwrap();
        assert_eq!(
            compile(&query).unwrap().text,
            "INSERT INTO \"user\"(\"email\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = excluded.\"name\""
        );
    }

    #[test]
    fn test_update_with_alias_and_increment() {
        let query = Query::table("message")
            .with_alias("messages")
            .filter(Condition::eq("id", 3))
            .for_update(vec![
                Assignment::set("text", "x"),
                Assignment::increment("views", 1),
            ])
            .unwrap();
        let sql = compile(&query).unwrap();
        assert_eq!(
            sql.text,
            "UPDATE \"message\" AS \"messages\" SET \"text\" = $1, \"views\" = \"views\" + $2 \
             WHERE \"messages\".\"id\" = $3"
        );
    }

    #[test]
    fn test_written_nulls_are_inlined() {
        let query = Query::table("message")
            .filter(Condition::eq("id", 3))
            .for_update(vec![
                Assignment::set("chatId", SqlValue::Null),
                Assignment::set("text", "x"),
            ])
            .unwrap();
        let sql = compile(&query).unwrap();
        assert_eq!(
            sql.text,
            "UPDATE \"message\" SET \"chatId\" = NULL, \"text\" = $1 WHERE \"message\".\"id\" = $2"
        );
        assert_eq!(sql.params, vec![SqlValue::Text("x".into()), SqlValue::Int(3)]);

        let mut rows = InsertRows::new(vec!["chatId".into(), "deletedAt".into()]);
        let chat = rows.share(SqlValue::Null);
        rows.push_row(vec![InsertValue::Shared(chat), InsertValue::Value(SqlValue::Null)]);
        rows.push_row(vec![InsertValue::Shared(chat), InsertValue::Value(SqlValue::Int(1))]);
        let sql = compile(&Query::table("message").for_insert(rows).unwrap()).unwrap();
        assert_eq!(
            sql.text,
            "INSERT INTO \"message\"(\"chatId\", \"deletedAt\") VALUES (NULL, NULL), (NULL, $1)"
        );
        assert_eq!(sql.params, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_update_without_assignments_is_empty_write_set() {
        let query = Query::table("user").for_update(vec![]).unwrap();
        assert_eq!(
            compile(&query).unwrap_err(),
            QueryError::EmptyWriteSet {
                table: "user".into()
            }
        );
    }

    #[test]
    fn test_delete_returning_renamed_columns() {
        let shape = ColumnShape::new().column("id").renamed("firstName", "first_name");
        let query = Query::table("user")
            .with_shape(Arc::new(shape))
            .filter(Condition::eq("firstName", "Ann"))
            .for_delete()
            .unwrap()
            .returning([SelectItem::All]);
        assert_eq!(
            compile(&query).unwrap().text,
            "DELETE FROM \"user\" WHERE \"user\".\"first_name\" = $1 \
             RETURNING \"id\", \"first_name\" AS \"firstName\""
        );
    }
}
