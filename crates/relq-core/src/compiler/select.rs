use std::sync::Arc;

use super::{push_ident, Compiler};
use crate::condition::{combine, Combinator, Condition};
use crate::error::{QueryError, Result};
use crate::expr::Expr;
use crate::query::{
    ColumnShape, JoinKind, JoinTarget, Nulls, OrderDirection, Query, ReturnShape, SelectItem,
};

/// Adjustments applied when a query is embedded in another one.
#[derive(Debug, Default)]
pub(super) struct Overrides {
    /// Replaces the select list with `true`.
    pub select_true: bool,
    /// Output name forced onto the single select item.
    pub pluck_alias: Option<&'static str>,
    /// Forced LIMIT.
    pub limit: Option<u64>,
    /// Select list used when the query selects nothing (`1` inside EXISTS).
    pub empty_select_one: bool,
}

/// A join whose target has been resolved to a concrete table or WITH alias.
#[derive(Debug)]
pub(super) struct JoinItem {
    pub kind: JoinKind,
    pub table: String,
    pub schema: Option<String>,
    pub alias: String,
    pub shape: Option<Arc<ColumnShape>>,
    pub on: Condition,
}

/// Output names of a query's select list, used to resolve ORDER BY targets.
pub(super) fn output_names(query: &Query) -> Vec<String> {
    query
        .select
        .iter()
        .filter_map(|item| match item {
            SelectItem::Column { alias, .. } | SelectItem::Expr { alias, .. } => alias.clone(),
            SelectItem::SubQuery { alias, .. } => Some(alias.clone()),
            SelectItem::All => None,
        })
        .collect()
}

const MANY_OPEN: &str = "(SELECT COALESCE(json_agg(row_to_json(\"t\".*)), '[]') FROM (";
const ONE_OPEN: &str = "(SELECT row_to_json(\"t\".*) FROM (";
const PLUCK_OPEN: &str = "(SELECT COALESCE(json_agg(\"c\"), '[]') FROM (";
const DERIVED_CLOSE: &str = ") AS \"t\")";

impl Compiler<'_> {
    /// Resolves every join of `query` into a concrete target and condition.
    pub(super) fn resolve_joins(&self, query: &Query) -> Result<Vec<JoinItem>> {
        let mut items = Vec::with_capacity(query.joins.len());
        for join in &query.joins {
            let item = match &join.target {
                JoinTarget::Query(target) => {
                    let alias = target.alias().to_string();
                    JoinItem {
                        kind: join.kind,
                        table: target.table.clone(),
                        schema: target.schema.clone(),
                        shape: target.shape.clone(),
                        on: join_condition(join.on.clone(), target, &alias),
                        alias,
                    }
                }
                JoinTarget::Named(name) => {
                    if query.with.iter().any(|w| &w.alias == name) {
                        JoinItem {
                            kind: join.kind,
                            table: name.clone(),
                            schema: None,
                            alias: name.clone(),
                            shape: None,
                            on: join.on.clone().unwrap_or_else(Condition::all),
                        }
                    } else {
                        let resolver =
                            self.resolver.ok_or_else(|| QueryError::UnknownRelation {
                                table: query.table.clone(),
                                relation: name.clone(),
                            })?;
                        let resolved = resolver.resolve_join(&query.table, name, query.alias())?;
                        let alias = resolved.target.alias().to_string();
                        let on = combine(
                            Combinator::And,
                            [resolved.on, join_condition(join.on.clone(), &resolved.target, &alias)],
                        );
                        JoinItem {
                            kind: join.kind,
                            table: resolved.target.table.clone(),
                            schema: resolved.target.schema.clone(),
                            shape: resolved.target.shape.clone(),
                            on,
                            alias,
                        }
                    }
                }
            };
            items.push(item);
        }
        Ok(items)
    }

    pub(super) fn select(
        &mut self,
        query: &Query,
        joins: &[JoinItem],
        out: &mut String,
        overrides: &Overrides,
    ) -> Result<()> {
        let qualify = !joins.is_empty();
        out.push_str("SELECT ");
        if query.distinct {
            out.push_str("DISTINCT ");
        }
        if overrides.select_true {
            out.push_str("true");
        } else if query.select.is_empty() && overrides.empty_select_one {
            out.push('1');
        } else {
            self.select_list(query, &query.select, qualify, overrides.pluck_alias, out)?;
        }

        out.push_str(" FROM ");
        push_table(out, query.schema.as_deref(), &query.table, query.alias.as_deref());

        for join in joins {
            out.push(' ');
            out.push_str(join.kind.as_sql());
            out.push(' ');
            let alias = (join.alias != join.table).then_some(join.alias.as_str());
            push_table(out, join.schema.as_deref(), &join.table, alias);
            out.push_str(" ON ");
            if join.on.is_empty() {
                out.push_str("true");
            } else {
                self.condition(&join.on, out)?;
            }
        }

        self.where_clause(query, out)?;

        if !query.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            for (i, expr) in query.group_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.expr(expr, true, out)?;
            }
        }

        let having = combine(Combinator::And, query.having.iter().cloned());
        if !having.is_empty() {
            out.push_str(" HAVING ");
            self.condition(&having, out)?;
        }

        self.order_clause(query, out)?;

        if let Some(limit) = overrides.limit.or(query.limit) {
            out.push_str(" LIMIT ");
            out.push_str(&limit.to_string());
        }
        if let Some(offset) = query.offset {
            out.push_str(" OFFSET ");
            out.push_str(&offset.to_string());
        }
        Ok(())
    }

    pub(super) fn where_clause(&mut self, query: &Query, out: &mut String) -> Result<()> {
        let condition = combine(Combinator::And, query.conditions.iter().cloned());
        if !condition.is_empty() {
            out.push_str(" WHERE ");
            self.condition(&condition, out)?;
        }
        Ok(())
    }

    fn order_clause(&mut self, query: &Query, out: &mut String) -> Result<()> {
        if query.order.is_empty() {
            return Ok(());
        }
        out.push_str(" ORDER BY ");
        for (i, order) in query.order.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match &order.expr {
                Expr::Column(c) if c.table.is_none() && self.is_output_name(query, &c.name) => {
                    push_ident(out, &c.name);
                }
                expr => self.expr(expr, true, out)?,
            }
            out.push_str(match order.direction {
                OrderDirection::Asc => " ASC",
                OrderDirection::Desc => " DESC",
            });
            match order.nulls {
                Some(Nulls::First) => out.push_str(" NULLS FIRST"),
                Some(Nulls::Last) => out.push_str(" NULLS LAST"),
                None => {}
            }
        }
        Ok(())
    }

    fn is_output_name(&self, query: &Query, name: &str) -> bool {
        let in_shape = query
            .shape
            .as_deref()
            .is_some_and(|s| s.db_name(name).is_some());
        !in_shape && self.frame().output_names.iter().any(|n| n == name)
    }

    /// Renders a select or RETURNING list. An empty list selects everything.
    pub(super) fn select_list(
        &mut self,
        query: &Query,
        items: &[SelectItem],
        qualify: bool,
        pluck_alias: Option<&str>,
        out: &mut String,
    ) -> Result<()> {
        if let Some(alias) = pluck_alias {
            let [item] = items else {
                return Err(QueryError::UnsupportedReturnShape {
                    shape: ReturnShape::Pluck.to_string(),
                    context: format!(
                        "pluck from `{}` needs exactly one selected column, got {}",
                        query.table,
                        items.len()
                    ),
                });
            };
            return self.select_item(query, item, qualify, Some(alias), out);
        }
        if items.is_empty() {
            Self::select_all(query, qualify, out);
            return Ok(());
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.select_item(query, item, qualify, None, out)?;
        }
        Ok(())
    }

    fn select_all(query: &Query, qualify: bool, out: &mut String) {
        let alias = query.alias();
        match query.shape.as_deref() {
            Some(shape) if shape.has_renames() => {
                for (i, (key, db)) in shape.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if qualify {
                        push_ident(out, alias);
                        out.push('.');
                    }
                    push_ident(out, db);
                    if key != db {
                        out.push_str(" AS ");
                        push_ident(out, key);
                    }
                }
            }
            _ => {
                if qualify {
                    push_ident(out, alias);
                    out.push_str(".*");
                } else {
                    out.push('*');
                }
            }
        }
    }

    fn select_item(
        &mut self,
        query: &Query,
        item: &SelectItem,
        qualify: bool,
        alias_override: Option<&str>,
        out: &mut String,
    ) -> Result<()> {
        match item {
            SelectItem::All => Self::select_all(query, qualify, out),
            SelectItem::Column { column, alias } => {
                let db_name = self.column(column, qualify, out)?;
                let output = alias_override
                    .or(alias.as_deref())
                    .or_else(|| (db_name != column.name).then_some(column.name.as_str()));
                if let Some(output) = output {
                    out.push_str(" AS ");
                    push_ident(out, output);
                }
            }
            SelectItem::Expr { expr, alias } => {
                self.expr(expr, qualify, out)?;
                if let Some(output) = alias_override.or(alias.as_deref()) {
                    out.push_str(" AS ");
                    push_ident(out, output);
                }
            }
            SelectItem::SubQuery { query: sub, alias } => {
                self.sub_select(sub, out)?;
                out.push_str(" AS ");
                push_ident(out, alias_override.unwrap_or(alias));
            }
        }
        Ok(())
    }

    /// Wraps a nested query according to its return shape.
    fn sub_select(&mut self, sub: &Query, out: &mut String) -> Result<()> {
        match sub.returns {
            ReturnShape::All => {
                out.push_str(MANY_OPEN);
                self.statement(sub, out, &Overrides::default())?;
                out.push_str(DERIVED_CLOSE);
            }
            ReturnShape::One | ReturnShape::OneOrThrow | ReturnShape::Single => {
                out.push_str(ONE_OPEN);
                let overrides = Overrides {
                    limit: Some(1),
                    ..Overrides::default()
                };
                self.statement(sub, out, &overrides)?;
                out.push_str(DERIVED_CLOSE);
            }
            ReturnShape::Pluck => {
                out.push_str(PLUCK_OPEN);
                let overrides = Overrides {
                    pluck_alias: Some("c"),
                    ..Overrides::default()
                };
                self.statement(sub, out, &overrides)?;
                out.push_str(DERIVED_CLOSE);
            }
            ReturnShape::Value | ReturnShape::ValueOrThrow => {
                out.push('(');
                self.statement(sub, out, &Overrides::default())?;
                out.push(')');
            }
            ReturnShape::Exists => {
                out.push_str("COALESCE((");
                let overrides = Overrides {
                    select_true: true,
                    limit: Some(1),
                    ..Overrides::default()
                };
                self.statement(sub, out, &overrides)?;
                out.push_str("), false)");
            }
            shape @ (ReturnShape::Rows | ReturnShape::RowCount | ReturnShape::Void) => {
                return Err(QueryError::UnsupportedReturnShape {
                    shape: shape.to_string(),
                    context: format!("sub-select on `{}`", sub.table),
                });
            }
        }
        Ok(())
    }
}

/// The target's own conditions, qualified with its alias, ANDed onto the
/// explicit join condition.
fn join_condition(on: Option<Condition>, target: &Query, alias: &str) -> Condition {
    let own = target.conditions.iter().cloned().map(|c| c.qualify(alias));
    combine(Combinator::And, on.into_iter().chain(own))
}

fn push_table(out: &mut String, schema: Option<&str>, table: &str, alias: Option<&str>) {
    if let Some(schema) = schema {
        push_ident(out, schema);
        out.push('.');
    }
    push_ident(out, table);
    if let Some(alias) = alias.filter(|a| *a != table) {
        out.push_str(" AS ");
        push_ident(out, alias);
    }
}
