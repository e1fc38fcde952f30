//! Rendering of query descriptors into Postgres SQL.
//!
//! Compilation is a pure function of the descriptor. One parameter list is
//! threaded through every nested sub-query, so placeholders are numbered once
//! for the whole statement in the order they appear in the text.

mod condition;
mod select;
mod write;

use std::fmt;
use std::sync::Arc;

use crate::condition::Condition;
use crate::error::{QueryError, Result};
use crate::expr::ColumnRef;
use crate::query::{ColumnShape, Intent, Query};
use crate::value::SqlValue;

/// A compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Sql {
    /// Statement text with `$n` placeholders.
    pub text: String,
    /// Parameters in placeholder order.
    pub params: Vec<SqlValue>,
}

impl Sql {
    /// Creates a statement without parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Returns the text with every placeholder replaced by its inline value.
    ///
    /// Only meant for logs and debugging.
    #[must_use]
    pub fn interpolated(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.char_indices().peekable();
        while let Some((_, ch)) = chars.next() {
            if ch != '$' {
                out.push(ch);
                continue;
            }
            let mut digits = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let value = digits
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.params.get(i));
            match value {
                Some(value) => out.push_str(&value.to_sql_inline()),
                None => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        }
        out
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A join on a relation, resolved for one pair of aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJoin {
    /// The related table, aliased as it should appear in the join.
    pub target: Query,
    /// Correlation between the parent alias and the target alias.
    pub on: Condition,
}

/// Resolves relation names used as join targets.
pub trait JoinResolver {
    /// Resolves `relation` of `table` for a parent known as `parent_alias`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownRelation`] if the table has no such
    /// relation.
    fn resolve_join(&self, table: &str, relation: &str, parent_alias: &str) -> Result<ResolvedJoin>;
}

/// Compiles a descriptor that does not join on relation names.
///
/// # Errors
///
/// Returns a [`QueryError`] when the descriptor is inconsistent.
pub fn compile(query: &Query) -> Result<Sql> {
    Compiler::new(None).finish(query)
}

/// Compiles a descriptor, resolving named joins through `resolver`.
///
/// # Errors
///
/// Returns a [`QueryError`] when the descriptor is inconsistent.
pub fn compile_with(query: &Query, resolver: &dyn JoinResolver) -> Result<Sql> {
    Compiler::new(Some(resolver)).finish(query)
}

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_ident(out: &mut String, name: &str) {
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

#[derive(Debug)]
struct ScopeEntry {
    alias: String,
    shape: Option<Arc<ColumnShape>>,
}

/// Aliases visible while one statement level is rendered.
#[derive(Debug)]
struct Frame {
    table: String,
    own: String,
    entries: Vec<ScopeEntry>,
    output_names: Vec<String>,
}

struct Compiler<'a> {
    params: Vec<SqlValue>,
    frames: Vec<Frame>,
    resolver: Option<&'a dyn JoinResolver>,
}

impl<'a> Compiler<'a> {
    const fn new(resolver: Option<&'a dyn JoinResolver>) -> Self {
        Self {
            params: Vec::new(),
            frames: Vec::new(),
            resolver,
        }
    }

    fn finish(mut self, query: &Query) -> Result<Sql> {
        let mut text = String::new();
        self.statement(query, &mut text, &select::Overrides::default())?;
        Ok(Sql {
            text,
            params: self.params,
        })
    }

    /// Renders any statement in a fresh scope frame.
    fn statement(&mut self, query: &Query, out: &mut String, overrides: &select::Overrides) -> Result<()> {
        let joins = self.resolve_joins(query)?;
        let mut frame = Frame {
            table: query.table.clone(),
            own: query.alias().to_string(),
            entries: Vec::with_capacity(joins.len() + query.with.len() + 1),
            output_names: select::output_names(query),
        };
        for item in &query.with {
            frame.entries.push(ScopeEntry {
                alias: item.alias.clone(),
                shape: item.query.shape.clone(),
            });
        }
        frame.entries.push(ScopeEntry {
            alias: query.alias().to_string(),
            shape: query.shape.clone(),
        });
        for join in &joins {
            frame.entries.push(ScopeEntry {
                alias: join.alias.clone(),
                shape: join.shape.clone(),
            });
        }
        self.frames.push(frame);
        let result = self.statement_in_frame(query, &joins, out, overrides);
        self.frames.pop();
        result
    }

    fn statement_in_frame(
        &mut self,
        query: &Query,
        joins: &[select::JoinItem],
        out: &mut String,
        overrides: &select::Overrides,
    ) -> Result<()> {
        self.with_clause(query, out)?;
        match &query.intent {
            Intent::Select => self.select(query, joins, out, overrides),
            Intent::Insert(data) => {
                Self::reject_joins(query, "insert")?;
                self.insert(query, data, out)
            }
            Intent::Update(assignments) => {
                Self::reject_joins(query, "update")?;
                self.update(query, assignments, out)
            }
            Intent::Delete => {
                Self::reject_joins(query, "delete")?;
                self.delete(query, out)
            }
        }
    }

    fn reject_joins(query: &Query, operation: &str) -> Result<()> {
        if query.joins.is_empty() {
            Ok(())
        } else {
            Err(QueryError::InvalidWrite {
                table: query.table.clone(),
                reason: format!("joins are not supported in {operation}"),
            })
        }
    }

    fn with_clause(&mut self, query: &Query, out: &mut String) -> Result<()> {
        if query.with.is_empty() {
            return Ok(());
        }
        out.push_str("WITH ");
        for (i, item) in query.with.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            push_ident(out, &item.alias);
            out.push_str(" AS (");
            self.statement(&item.query, out, &select::Overrides::default())?;
            out.push(')');
        }
        out.push(' ');
        Ok(())
    }

    fn push_param(&mut self, value: SqlValue, out: &mut String) {
        self.params.push(value);
        out.push('$');
        out.push_str(&self.params.len().to_string());
    }

    fn frame(&self) -> &Frame {
        // A frame is always pushed before anything inside a statement renders.
        &self.frames[self.frames.len() - 1]
    }

    /// Renders `"alias"."db_name"`, or `"db_name"` when unqualified and
    /// `qualify` is false. Returns the database name used.
    fn column(&self, column: &ColumnRef, qualify: bool, out: &mut String) -> Result<String> {
        let frame = self.frame();
        let (alias, shape) = match &column.table {
            Some(alias) => {
                let entry = self
                    .frames
                    .iter()
                    .rev()
                    .flat_map(|f| f.entries.iter().rev())
                    .find(|e| &e.alias == alias)
                    .ok_or_else(|| QueryError::UnresolvedAlias {
                        alias: alias.clone(),
                        column: column.name.clone(),
                        table: frame.table.clone(),
                    })?;
                (Some(alias.as_str()), entry.shape.as_deref())
            }
            None => {
                let shape = frame
                    .entries
                    .iter()
                    .find(|e| e.alias == frame.own)
                    .and_then(|e| e.shape.as_deref());
                (qualify.then_some(frame.own.as_str()), shape)
            }
        };
        let db_name = shape
            .and_then(|s| s.db_name(&column.name))
            .unwrap_or(&column.name)
            .to_string();
        if let Some(alias) = alias {
            push_ident(out, alias);
            out.push('.');
        }
        push_ident(out, &db_name);
        Ok(db_name)
    }

    /// Database name of an own-table column key.
    fn own_db_name(query: &Query, key: &str) -> String {
        query
            .shape
            .as_deref()
            .and_then(|s| s.db_name(key))
            .unwrap_or(key)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_interpolated_replaces_multi_digit_placeholders() {
        let sql = Sql {
            text: String::from("SELECT $1, $10"),
            params: (1..=10).map(SqlValue::Int).collect(),
        };
        assert_eq!(sql.interpolated(), "SELECT 1, 10");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let query = Query::table("user")
            .filter(Condition::eq("name", "a"))
            .filter(Condition::in_list("id", [1, 2, 3]));
        let first = compile(&query).unwrap();
        let second = compile(&query).unwrap();
        assert_eq!(first, second);
    }
}
