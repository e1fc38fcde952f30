//! Create, update and delete on a [`TableQuery`].

use std::sync::Arc;

use relq_core::{Condition, Query, ReturnShape};

use super::TableQuery;
use crate::error::{OrmError, Result};
use crate::nested::create::{create_records, create_related, InsertOptions};
use crate::nested::update::update_rows;
use crate::nested::{delete_rows, not_found, CreateData, UpdateData};
use crate::record::Record;

impl TableQuery {
    /// Creates one record, with any nested writes in `data`.
    ///
    /// On a query reached through [`TableQuery::relation`] or
    /// [`TableQuery::related`], the record is linked to the parent.
    ///
    /// # Errors
    ///
    /// Returns a database, hook or nested write error; nothing is written
    /// when any statement fails.
    pub async fn create(&self, data: impl Into<CreateData>) -> Result<Record> {
        self.create_many(vec![data.into()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(self.table.name()))
    }

    /// Creates several records with one `INSERT` per table involved.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::create`].
    pub async fn create_many(&self, items: Vec<CreateData>) -> Result<Vec<Record>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let on_conflict = self.on_conflict.clone();
        match &self.chain {
            Some(chain) => {
                create_related(
                    &self.db,
                    Arc::clone(&self.table),
                    &chain.relation,
                    &chain.parent_table,
                    &chain.parent,
                    items,
                    on_conflict,
                )
                .await
            }
            None => {
                let options = InsertOptions {
                    on_conflict,
                    shared: Vec::new(),
                };
                create_records(&self.db, Arc::clone(&self.table), items, options).await
            }
        }
    }

    /// Updates the matching rows and returns how many were updated.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnscopedWrite`] for a query without conditions
    /// unless [`TableQuery::all_rows`] was called.
    pub async fn update(&self, data: UpdateData) -> Result<u64> {
        Ok(self.run_update(data, false).await?.0)
    }

    /// Updates the matching rows and returns them.
    ///
    /// # Errors
    ///
    /// See [`TableQuery::update`].
    pub async fn update_returning(&self, data: UpdateData) -> Result<Vec<Record>> {
        Ok(self.run_update(data, true).await?.1)
    }

    /// Deletes the matching rows and returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::UnscopedWrite`] for a query without conditions
    /// unless [`TableQuery::all_rows`] was called.
    pub async fn delete(&self) -> Result<u64> {
        self.require_scope("delete")?;
        delete_rows(&self.db, &self.table, self.write_scope()?).await
    }

    async fn run_update(&self, data: UpdateData, returning: bool) -> Result<(u64, Vec<Record>)> {
        self.require_scope("update")?;
        let outcome = update_rows(
            &self.db,
            Arc::clone(&self.table),
            self.write_scope()?,
            data,
            returning,
        )
        .await?;
        Ok((outcome.count, outcome.rows))
    }

    /// The rows a write applies to. `UPDATE` and `DELETE` take no paging,
    /// so a limited or offset query is narrowed by its primary keys.
    fn write_scope(&self) -> Result<Query> {
        if !self.query.is_paged() {
            return Ok(self.query.clone().scope_only());
        }
        let primary_key = self.table.primary_key();
        if primary_key.is_empty() {
            return Err(OrmError::InvalidKey {
                table: self.table.name().to_string(),
                reason: String::from("a limited write needs a primary key"),
            });
        }
        let mut keys = self.query.clone();
        keys.set_select(Vec::new());
        keys.set_returns(ReturnShape::All);
        let keys = keys.select_columns(&primary_key);
        Ok(self
            .table
            .query()
            .filter(Condition::in_query(&primary_key, keys)))
    }

    fn require_scope(&self, operation: &'static str) -> Result<()> {
        if self.is_scoped() {
            Ok(())
        } else {
            Err(OrmError::UnscopedWrite {
                table: self.table.name().to_string(),
                operation,
            })
        }
    }
}
