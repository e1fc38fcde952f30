#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relq_core::SqlValue;
use relq_orm::{
    Adapter, ColumnDef, DatabaseError, Db, DbConfig, JoinTableKeys, QueryResult, Record, Schema,
    TableDef, TransactionAdapter,
};

/// One statement as the adapter received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

enum Reply {
    Rows(Vec<Record>),
    Affected(u64),
    Fail(String),
}

#[derive(Default)]
struct State {
    statements: Vec<Statement>,
    replies: Vec<(String, Reply)>,
}

/// Records every statement, transaction control included, and answers from
/// a script. A scripted reply is used once, by the first statement whose
/// text contains its pattern; unscripted statements return no rows.
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<State>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_rows(&self, pattern: &str, rows: Vec<Record>) -> &Self {
        self.push(pattern, Reply::Rows(rows))
    }

    pub fn reply_count(&self, pattern: &str, count: u64) -> &Self {
        self.push(pattern, Reply::Affected(count))
    }

    pub fn fail(&self, pattern: &str, message: &str) -> &Self {
        self.push(pattern, Reply::Fail(message.to_string()))
    }

    fn push(&self, pattern: &str, reply: Reply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .replies
            .push((pattern.to_string(), reply));
        self
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().unwrap().statements.clone()
    }

    /// Statement texts in the order they ran.
    pub fn log(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Statement texts without transaction control.
    pub fn writes(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|sql| !is_control(sql))
            .collect()
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        let Some(position) = state
            .replies
            .iter()
            .position(|(pattern, _)| sql.contains(pattern.as_str()))
        else {
            return Ok(QueryResult::default());
        };
        match state.replies.remove(position).1 {
            Reply::Rows(rows) => Ok(QueryResult::from_rows(rows)),
            Reply::Affected(count) => Ok(QueryResult::affected(count)),
            Reply::Fail(message) => Err(DatabaseError::Other(message)),
        }
    }
}

fn is_control(sql: &str) -> bool {
    ["BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE SAVEPOINT"]
        .iter()
        .any(|prefix| sql.starts_with(prefix))
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        self.run(sql, params)
    }

    async fn begin(&self, begin_sql: &str) -> Result<Box<dyn TransactionAdapter>, DatabaseError> {
        self.run(begin_sql, &[])?;
        Ok(Box::new(MockTransaction { mock: self.clone() }))
    }
}

struct MockTransaction {
    mock: MockAdapter,
}

#[async_trait]
impl TransactionAdapter for MockTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DatabaseError> {
        self.mock.run(sql, params)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.mock.run("COMMIT", &[]).map(|_| ())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.mock.run("ROLLBACK", &[]).map(|_| ())
    }
}

/// user, message, chat and profile, plus the chatUser join table.
pub fn schema() -> Schema {
    let id = || ColumnDef::new("id").primary_key();
    Schema::builder()
        .table(TableDef::new("user").column(id()).column(ColumnDef::new("name")))
        .table(
            TableDef::new("message")
                .column(id())
                .column(ColumnDef::new("authorId").nullable())
                .column(ColumnDef::new("chatId").nullable())
                .column(ColumnDef::new("text")),
        )
        .table(TableDef::new("chat").column(id()).column(ColumnDef::new("title")))
        .table(
            TableDef::new("profile")
                .column(id())
                .column(ColumnDef::new("userId"))
                .column(ColumnDef::new("bio")),
        )
        .table(
            TableDef::new("chatUser")
                .column(ColumnDef::new("chatId"))
                .column(ColumnDef::new("userId")),
        )
        .has_many("user", "messages", "message", &["id"], &["authorId"])
        .has_one("user", "profile", "profile", &["id"], &["userId"])
        .belongs_to("message", "author", "user", &["authorId"], &["id"])
        .belongs_to("message", "chat", "chat", &["chatId"], &["id"])
        .has_many("chat", "messages", "message", &["id"], &["chatId"])
        .has_and_belongs_to_many(
            "user",
            "chats",
            "chat",
            JoinTableKeys {
                primary_keys: &["id"],
                join_table: "chatUser",
                foreign_keys: &["userId"],
                association_foreign_keys: &["chatId"],
                association_primary_keys: &["id"],
            },
        )
        .has_and_belongs_to_many(
            "chat",
            "users",
            "user",
            JoinTableKeys {
                primary_keys: &["id"],
                join_table: "chatUser",
                foreign_keys: &["chatId"],
                association_foreign_keys: &["userId"],
                association_primary_keys: &["id"],
            },
        )
        .through("user", "messageChats", "messages", "chat")
        .build()
        .unwrap()
}

pub fn mock_db() -> (Db, MockAdapter) {
    mock_db_with(schema())
}

pub fn mock_db_with(schema: Schema) -> (Db, MockAdapter) {
    let mock = MockAdapter::new();
    let db = Db::new(Arc::new(mock.clone()), schema, DbConfig::default());
    (db, mock)
}

pub fn user(id: i64, name: &str) -> Record {
    Record::new().with("id", id).with("name", name)
}

pub fn message(id: i64, author: i64, text: &str) -> Record {
    Record::new()
        .with("id", id)
        .with("authorId", author)
        .with("text", text)
}

pub fn chat(id: i64, title: &str) -> Record {
    Record::new().with("id", id).with("title", title)
}
