//! Transactions and savepoints.
//!
//! The transaction of a logical operation travels with the task through a
//! task-local stack instead of being passed around. The outermost
//! [`Db::transaction`] call runs `BEGIN`; a call made while a transaction of
//! the same `Db` is active opens `SAVEPOINT "<depth>"` instead and releases or
//! rolls back to it when the callback returns. Only the outermost call
//! commits, and only then do after-commit hooks run.
//!
//! Tasks spawned from inside a transaction do not inherit it.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{join_all, BoxFuture, FutureExt};
use relq_core::quote_ident;
use tracing::warn;

use crate::adapter::TransactionAdapter;
use crate::db::{finished, Db};
use crate::error::{AfterCommitError, BoxError, HookFailure, OrmError, Result};

tokio::task_local! {
    static TRANSACTIONS: Vec<Arc<TransactionState>>;
}

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// `READ UNCOMMITTED`
    ReadUncommitted,
    /// `READ COMMITTED`
    ReadCommitted,
    /// `REPEATABLE READ`
    RepeatableRead,
    /// `SERIALIZABLE`
    Serializable,
}

impl IsolationLevel {
    /// SQL keywords.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options of an outermost transaction. Ignored for nested calls, which
/// only open a savepoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation: Option<IsolationLevel>,
    /// `READ ONLY` or `READ WRITE`.
    pub read_only: Option<bool>,
    /// `DEFERRABLE` or `NOT DEFERRABLE`.
    pub deferrable: Option<bool>,
    /// Overrides query logging for every statement of the transaction.
    pub log: Option<bool>,
}

impl TransactionOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Sets the access mode.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Sets deferrability.
    #[must_use]
    pub const fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    /// Overrides query logging.
    #[must_use]
    pub const fn log(mut self, log: bool) -> Self {
        self.log = Some(log);
        self
    }

    /// The `BEGIN` statement.
    #[must_use]
    pub fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level.as_sql());
        }
        match self.read_only {
            Some(true) => sql.push_str(" READ ONLY"),
            Some(false) => sql.push_str(" READ WRITE"),
            None => {}
        }
        match self.deferrable {
            Some(true) => sql.push_str(" DEFERRABLE"),
            Some(false) => sql.push_str(" NOT DEFERRABLE"),
            None => {}
        }
        sql
    }
}

struct AfterCommitHook {
    name: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send>,
}

/// State shared by every nesting level of one transaction.
pub(crate) struct TransactionState {
    db_id: u64,
    pub(crate) conn: tokio::sync::Mutex<Option<Box<dyn TransactionAdapter>>>,
    depth: AtomicU32,
    hooks: Mutex<Vec<AfterCommitHook>>,
    pub(crate) log: Option<bool>,
}

impl TransactionState {
    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<AfterCommitHook>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The innermost active transaction of `db_id` in the current task.
pub(crate) fn current(db_id: u64) -> Option<Arc<TransactionState>> {
    TRANSACTIONS
        .try_with(|stack| stack.iter().rev().find(|s| s.db_id == db_id).cloned())
        .ok()
        .flatten()
}

#[derive(Debug, Clone, Copy)]
enum SavepointStep {
    Create,
    Release,
    RollbackTo,
}

impl SavepointStep {
    fn sql(self, name: &str) -> String {
        let keyword = match self {
            Self::Create => "SAVEPOINT",
            Self::Release => "RELEASE SAVEPOINT",
            Self::RollbackTo => "ROLLBACK TO SAVEPOINT",
        };
        format!("{keyword} {}", quote_ident(name))
    }
}

impl Db {
    /// Runs `f` in a transaction.
    ///
    /// Outside of a transaction this begins one, commits when `f` returns
    /// `Ok` and rolls back when it returns `Err`. Inside one it runs `f`
    /// within a savepoint, so an error undoes only what `f` did.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, a database error from transaction control,
    /// or [`OrmError::AfterCommit`] when the commit succeeded but hooks
    /// failed.
    pub async fn transaction<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Send + Sync + 'static,
        E: From<OrmError>,
    {
        self.transaction_with(TransactionOptions::default(), f).await
    }

    /// [`Db::transaction`] with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Db::transaction`].
    pub async fn transaction_with<F, Fut, T, E>(
        &self,
        options: TransactionOptions,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Send + Sync + 'static,
        E: From<OrmError>,
    {
        if let Some(state) = current(self.id()) {
            return self.savepoint(&state, f).await;
        }

        let begin = options.begin_sql();
        let conn = self
            .traced(&begin, &[], options.log, self.adapter().begin(&begin))
            .await?;
        let state = Arc::new(TransactionState {
            db_id: self.id(),
            conn: tokio::sync::Mutex::new(Some(conn)),
            depth: AtomicU32::new(0),
            hooks: Mutex::new(Vec::new()),
            log: options.log,
        });
        let mut stack = TRANSACTIONS.try_with(Clone::clone).unwrap_or_default();
        stack.push(Arc::clone(&state));

        let result = TRANSACTIONS.scope(stack, async move { f().await }).await;
        let conn = state.conn.lock().await.take();

        match result {
            Ok(value) => {
                let conn = conn.ok_or_else(|| finished("COMMIT", &[]))?;
                self.traced("COMMIT", &[], state.log, conn.commit()).await?;
                let hooks = std::mem::take(&mut *state.hooks());
                Ok(run_after_commit(hooks, value).await?)
            }
            Err(err) => {
                if let Some(conn) = conn {
                    if let Err(rollback) = self.traced("ROLLBACK", &[], state.log, conn.rollback()).await {
                        warn!(error = %rollback, "Rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Runs `f` in the current transaction without a savepoint, or in a new
    /// transaction when there is none.
    ///
    /// # Errors
    ///
    /// See [`Db::transaction`].
    pub async fn ensure_transaction<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Send + Sync + 'static,
        E: From<OrmError>,
    {
        if self.is_in_transaction() {
            f().await
        } else {
            self.transaction(f).await
        }
    }

    /// Whether the current task is inside a transaction of this `Db`.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        current(self.id()).is_some()
    }

    /// Registers `f` to run after the outermost transaction commits. Outside
    /// of a transaction it runs right away.
    ///
    /// Hooks registered inside a savepoint that is rolled back are dropped.
    ///
    /// # Errors
    ///
    /// Outside of a transaction, returns [`OrmError::AfterCommit`] if `f`
    /// fails.
    pub async fn after_commit<F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let hook = AfterCommitHook {
            name: name.to_string(),
            run: Box::new(move || f().boxed()),
        };
        if let Some(state) = current(self.id()) {
            state.hooks().push(hook);
            return Ok(());
        }
        run_after_commit(vec![hook], ()).await
    }

    async fn savepoint<F, Fut, T, E>(
        &self,
        state: &Arc<TransactionState>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OrmError>,
    {
        let depth = state.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let name = depth.to_string();
        let hooks_before = state.hooks().len();

        if let Err(err) = self.savepoint_step(state, SavepointStep::Create, &name).await {
            state.depth.store(depth - 1, Ordering::SeqCst);
            return Err(err.into());
        }

        let result = f().await;
        let step = if result.is_ok() {
            SavepointStep::Release
        } else {
            state.hooks().truncate(hooks_before);
            SavepointStep::RollbackTo
        };
        let finished = self.savepoint_step(state, step, &name).await;
        state.depth.store(depth - 1, Ordering::SeqCst);

        match (result, finished) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), finished) => {
                if let Err(rollback) = finished {
                    warn!(savepoint = %name, error = %rollback, "Rollback to savepoint failed");
                }
                Err(err)
            }
        }
    }

    async fn savepoint_step(&self, state: &TransactionState, step: SavepointStep, name: &str) -> Result<()> {
        let sql = step.sql(name);
        let mut guard = state.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(|| finished(&sql, &[]))?;
        let call = match step {
            SavepointStep::Create => conn.savepoint(name),
            SavepointStep::Release => conn.release_savepoint(name),
            SavepointStep::RollbackTo => conn.rollback_to_savepoint(name),
        };
        self.traced(&sql, &[], state.log, call).await
    }
}

async fn run_after_commit<T: Send + Sync + 'static>(hooks: Vec<AfterCommitHook>, value: T) -> Result<T> {
    if hooks.is_empty() {
        return Ok(value);
    }
    let outcomes = join_all(hooks.into_iter().map(|hook| async move {
        let AfterCommitHook { name, run } = hook;
        (name, run().await)
    }))
    .await;

    let failures: Vec<HookFailure> = outcomes
        .into_iter()
        .filter_map(|(name, outcome)| outcome.err().map(|error| HookFailure { name, error }))
        .inspect(|failure| {
            warn!(hook = %failure.name, error = %failure.error, "After-commit hook failed");
        })
        .collect();

    if failures.is_empty() {
        Ok(value)
    } else {
        Err(OrmError::AfterCommit(AfterCommitError {
            failures,
            committed: Box::new(value),
        }))
    }
}
