use super::select::Overrides;
use super::Compiler;
use crate::condition::{CompareOp, Condition, InSource};
use crate::error::{QueryError, Result};
use crate::expr::{Expr, RawSql};
use crate::value::SqlValue;

/// Drops single-item And/Or wrappers so precedence is decided on the node
/// that actually renders.
fn effective(condition: &Condition) -> &Condition {
    match condition {
        Condition::And(items) | Condition::Or(items) => {
            let mut live = items.iter().filter(|c| !c.is_empty());
            match (live.next(), live.next()) {
                (Some(only), None) => effective(only),
                _ => condition,
            }
        }
        other => other,
    }
}

fn is_compound(condition: &Condition) -> bool {
    matches!(
        effective(condition),
        Condition::And(_) | Condition::Or(_) | Condition::Raw(_)
    )
}

impl Compiler<'_> {
    pub(super) fn condition(&mut self, condition: &Condition, out: &mut String) -> Result<()> {
        match effective(condition) {
            Condition::Compare { left, op, right } => self.compare(left, *op, right, out),
            Condition::And(items) => self.junction(items, " AND ", out),
            Condition::Or(items) => self.junction(items, " OR ", out),
            Condition::Not(inner) => {
                if inner.is_empty() {
                    return Ok(());
                }
                out.push_str("NOT ");
                if is_compound(inner) {
                    out.push('(');
                    self.condition(inner, out)?;
                    out.push(')');
                    Ok(())
                } else {
                    self.condition(inner, out)
                }
            }
            Condition::In { columns, source } => self.in_condition(columns, source, out),
            Condition::Exists(query) => {
                out.push_str("EXISTS (");
                let overrides = Overrides {
                    empty_select_one: true,
                    ..Overrides::default()
                };
                self.statement(query, out, &overrides)?;
                out.push(')');
                Ok(())
            }
            Condition::Raw(raw) => self.raw(raw, out),
        }
    }

    fn junction(&mut self, items: &[Condition], separator: &str, out: &mut String) -> Result<()> {
        let mut first = true;
        for item in items.iter().filter(|c| !c.is_empty()) {
            if !first {
                out.push_str(separator);
            }
            first = false;
            if is_compound(item) {
                out.push('(');
                self.condition(item, out)?;
                out.push(')');
            } else {
                self.condition(item, out)?;
            }
        }
        Ok(())
    }

    fn compare(&mut self, left: &Expr, op: CompareOp, right: &Expr, out: &mut String) -> Result<()> {
        self.expr(left, true, out)?;
        match (op, right) {
            (CompareOp::Eq, Expr::Value(SqlValue::Null)) => out.push_str(" IS NULL"),
            (CompareOp::Ne, Expr::Value(SqlValue::Null)) => out.push_str(" IS NOT NULL"),
            _ => {
                out.push(' ');
                out.push_str(&op.to_string());
                out.push(' ');
                self.expr(right, true, out)?;
            }
        }
        Ok(())
    }

    fn in_condition(&mut self, columns: &[Expr], source: &InSource, out: &mut String) -> Result<()> {
        if let InSource::Values(tuples) = source {
            if tuples.is_empty() {
                out.push_str("FALSE");
                return Ok(());
            }
        }
        let tuple = columns.len() > 1;
        if tuple {
            out.push('(');
        }
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr(column, true, out)?;
        }
        if tuple {
            out.push(')');
        }
        out.push_str(" IN (");
        match source {
            InSource::Values(tuples) => {
                for (i, values) in tuples.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    if tuple {
                        out.push('(');
                    }
                    for (j, value) in values.iter().enumerate() {
                        if j > 0 {
                            out.push_str(", ");
                        }
                        self.push_param(value.clone(), out);
                    }
                    if tuple {
                        out.push(')');
                    }
                }
            }
            InSource::Query(query) => self.statement(query, out, &Overrides::default())?,
            InSource::Raw(raw) => self.raw(raw, out)?,
        }
        out.push(')');
        Ok(())
    }

    pub(super) fn expr(&mut self, expr: &Expr, qualify: bool, out: &mut String) -> Result<()> {
        match expr {
            Expr::Column(column) => {
                self.column(column, qualify, out)?;
            }
            Expr::Value(value) => self.push_param(value.clone(), out),
            Expr::Raw(raw) => self.raw(raw, out)?,
            Expr::SubQuery(query) => {
                out.push('(');
                self.statement(query, out, &Overrides::default())?;
                out.push(')');
            }
            Expr::Aggregate(aggregate) => {
                out.push_str(aggregate.function.as_sql());
                out.push('(');
                if aggregate.distinct {
                    out.push_str("DISTINCT ");
                }
                match &aggregate.arg {
                    Some(arg) => self.expr(arg, qualify, out)?,
                    None => out.push('*'),
                }
                out.push(')');
                if let Some(filter) = aggregate.filter.as_ref().filter(|f| !f.is_empty()) {
                    out.push_str(" FILTER (WHERE ");
                    self.condition(filter, out)?;
                    out.push(')');
                }
            }
        }
        Ok(())
    }

    /// Copies a raw fragment, renumbering its local `$k` placeholders into
    /// the statement-wide sequence. Quoted literals are copied untouched.
    pub(super) fn raw(&mut self, raw: &RawSql, out: &mut String) -> Result<()> {
        let mut slots: Vec<Option<usize>> = vec![None; raw.params.len()];
        let mut in_quote = false;
        let mut chars = raw.text.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\'' {
                in_quote = !in_quote;
                out.push(ch);
                continue;
            }
            if ch != '$' || in_quote || !chars.peek().is_some_and(char::is_ascii_digit) {
                out.push(ch);
                continue;
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            let local = digits
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|i| *i < raw.params.len())
                .ok_or_else(|| QueryError::InvalidRaw {
                    text: raw.text.clone(),
                    reason: format!(
                        "placeholder ${digits} has no parameter ({} given)",
                        raw.params.len()
                    ),
                })?;
            let global = if let Some(global) = slots[local] {
                global
            } else {
                self.params.push(raw.params[local].clone());
                let global = self.params.len();
                slots[local] = Some(global);
                global
            };
            out.push('$');
            out.push_str(&global.to_string());
        }
        Ok(())
    }
}
