//! Relation queries, eager loading and the read API of `TableQuery`.

mod common;

use common::{chat, mock_db, user};
use relq_core::{Condition, SqlValue};
use relq_orm::{CreateData, OrmError, Record, Related};
use serde_json::json;

#[tokio::test]
async fn test_related_filters_by_record_key() {
    let (db, _mock) = mock_db();

    let sql = db
        .table("user")
        .unwrap()
        .related("messages", &user(1, "Ann"))
        .unwrap()
        .to_sql()
        .unwrap();

    assert_eq!(
        sql.text,
        "SELECT * FROM \"message\" WHERE \"message\".\"authorId\" = $1"
    );
    assert_eq!(sql.params, vec![SqlValue::Int(1)]);
}

#[tokio::test]
async fn test_related_without_key_is_an_error() {
    let (db, _mock) = mock_db();

    let result = db
        .table("user")
        .unwrap()
        .related("messages", &Record::new().with("name", "Ann"));

    assert!(result.is_err());
}

#[tokio::test]
async fn test_relation_chain_correlates_with_exists() {
    let (db, _mock) = mock_db();

    let sql = db
        .table("user")
        .unwrap()
        .filter(Condition::eq("name", "Ann"))
        .relation("messages")
        .unwrap()
        .filter(Condition::eq("text", "hi"))
        .to_sql()
        .unwrap();

    assert!(sql.text.starts_with("SELECT * FROM \"message\" WHERE EXISTS (SELECT 1 FROM \"user\""));
    assert!(sql.text.contains("\"user\".\"name\" = $1"));
    assert!(sql.text.contains("\"message\".\"authorId\" = \"user\".\"id\""));
    assert!(sql.text.contains("LIMIT 1)"));
    assert!(sql.text.ends_with("\"message\".\"text\" = $2"));
    assert_eq!(
        sql.params,
        vec![SqlValue::Text("Ann".into()), SqlValue::Text("hi".into())]
    );
}

#[tokio::test]
async fn test_join_relation_is_addressed_by_name() {
    let (db, _mock) = mock_db();

    let sql = db
        .table("message")
        .unwrap()
        .join_relation("author")
        .filter(Condition::eq("author.name", "Ann"))
        .to_sql()
        .unwrap();

    assert!(sql.text.starts_with("SELECT \"message\".* FROM \"message\" JOIN \"user\" AS \"author\" ON"));
    assert!(sql.text.contains("\"author\".\"name\" = $1"));
}

#[tokio::test]
async fn test_select_relation_wraps_by_shape() {
    let (db, _mock) = mock_db();

    let sql = db
        .table("user")
        .unwrap()
        .select_relation("messages", "messages", |q| q.order("-id"))
        .unwrap()
        .select_relation("messages", "texts", |q| q.into_pluck("text"))
        .unwrap()
        .select_relation("messages", "total", |q| q.into_count())
        .unwrap()
        .select_relation("profile", "profile", |q| q)
        .unwrap()
        .to_sql()
        .unwrap();

    assert!(sql.text.starts_with("SELECT *, "));
    assert!(sql
        .text
        .contains("(SELECT COALESCE(json_agg(row_to_json(\"t\".*)), '[]') FROM ("));
    assert!(sql.text.contains("(SELECT COALESCE(json_agg(\"c\"), '[]') FROM ("));
    assert!(sql.text.contains("(SELECT row_to_json(\"t\".*) FROM ("));
    assert!(sql.text.contains("AS \"texts\""));
    assert!(sql.text.contains("AS \"total\""));
    assert!(sql.text.contains("\"messages\".\"authorId\" = \"user\".\"id\""));
}

#[tokio::test]
async fn test_select_relation_decodes_nested_json() {
    let (db, mock) = mock_db();
    mock.reply_rows(
        "SELECT",
        vec![Record::new()
            .with("id", 1)
            .with("name", "Ann")
            .with(
                "messages",
                SqlValue::Json(json!([{"id": 10, "authorId": 1, "text": "a"}])),
            )
            .with("total", 1)
            .with("profile", SqlValue::Null)],
    );

    let users = db
        .table("user")
        .unwrap()
        .select_relation("messages", "messages", |q| q)
        .unwrap()
        .select_relation("messages", "total", |q| q.into_count())
        .unwrap()
        .select_relation("profile", "profile", |q| q)
        .unwrap()
        .all()
        .await
        .unwrap();

    assert_eq!(users.len(), 1);
    let ann = &users[0];
    assert_eq!(ann.get_str("name"), Some("Ann"));
    let messages = ann.related_records("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].get_str("text"), Some("a"));
    assert_eq!(ann.related("total"), Some(&Related::Value(SqlValue::Int(1))));
    assert_eq!(ann.related("profile"), Some(&Related::One(None)));
}

#[tokio::test]
async fn test_unknown_relation_is_rejected() {
    let (db, _mock) = mock_db();
    let users = db.table("user").unwrap();

    assert!(users.clone().select_relation("friends", "friends", |q| q).is_err());
    assert!(users.relation("friends").is_err());
    assert!(matches!(db.table("nope"), Err(OrmError::UnknownTable(_))));
}

#[tokio::test]
async fn test_count_and_exists() {
    let (db, mock) = mock_db();
    mock.reply_rows("SELECT", vec![Record::new().with("count", 5)])
        .reply_rows("SELECT", vec![Record::new().with("exists", 1)]);
    let users = db.table("user").unwrap().filter(Condition::eq("name", "Ann"));

    assert_eq!(users.count().await.unwrap(), 5);
    assert!(users.exists().await.unwrap());
    assert!(!users.exists().await.unwrap());

    let log = mock.log();
    assert!(log[0].contains("AS \"count\""));
    assert!(log[1].ends_with("LIMIT 1"));
}

#[tokio::test]
async fn test_count_keeps_distinct_and_paging() {
    let (db, mock) = mock_db();
    mock.reply_rows("WITH", vec![Record::new().with("count", 2)])
        .reply_rows("WITH", Vec::new());
    let users = db.table("user").unwrap();

    let names = users.clone().select(&["name"]).distinct().count().await.unwrap();
    assert_eq!(names, 2);
    assert!(!users.clone().offset(5).exists().await.unwrap());

    let log = mock.log();
    assert_eq!(
        log[0],
        "WITH \"t\" AS (SELECT DISTINCT \"name\" FROM \"user\") \
         SELECT count(*) AS \"count\" FROM \"t\""
    );
    assert!(log[1].starts_with("WITH \"t\" AS (SELECT * FROM \"user\" OFFSET 5) SELECT"));
    assert!(log[1].ends_with("FROM \"t\" LIMIT 1"));
}

#[tokio::test]
async fn test_find_and_find_by() {
    let (db, mock) = mock_db();
    mock.reply_rows("SELECT", vec![user(1, "Ann")])
        .reply_rows("SELECT", vec![user(1, "Ann"), user(2, "Ann")]);
    let users = db.table("user").unwrap();

    let ann = users.find(1).await.unwrap();
    assert_eq!(ann.get_str("name"), Some("Ann"));

    let err = users
        .find_by(Condition::eq("name", "Ann"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MoreThanOneRow { .. }));

    let err = users.find(3).await.unwrap_err();
    assert!(matches!(err, OrmError::NotFound { .. }));
    assert!(users
        .find_by_optional(Condition::eq("name", "Cy"))
        .await
        .unwrap()
        .is_none());

    assert!(mock.log()[0].contains("\"user\".\"id\" = $1"));
}

#[tokio::test]
async fn test_pluck_returns_column_values() {
    let (db, mock) = mock_db();
    mock.reply_rows(
        "SELECT",
        vec![
            Record::new().with("name", "Ann"),
            Record::new().with("name", "Bob"),
        ],
    );

    let names = db.table("user").unwrap().order("name").pluck("name").await.unwrap();

    assert_eq!(
        names,
        vec![SqlValue::Text("Ann".into()), SqlValue::Text("Bob".into())]
    );
    assert!(mock.log()[0].starts_with("SELECT \"name\" FROM \"user\""));
}

#[tokio::test]
async fn test_create_on_join_relation_links_record() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"chat\"", vec![chat(7, "general")]);

    let created = db
        .table("user")
        .unwrap()
        .related("chats", &user(1, "Ann"))
        .unwrap()
        .create(CreateData::new().set("title", "general"))
        .await
        .unwrap();

    assert_eq!(created.get_i64("id"), Some(7));
    let log = mock.log();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "BEGIN");
    assert_eq!(log[1], "INSERT INTO \"chat\"(\"title\") VALUES ($1) RETURNING *");
    assert!(log[2].starts_with("INSERT INTO \"chatUser\""));
    assert_eq!(log[3], "COMMIT");
}
