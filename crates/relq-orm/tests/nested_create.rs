//! Nested create: statement order, batching and key propagation.

mod common;

use common::{chat, message, mock_db, user};
use relq_core::{Condition, SqlValue};
use relq_orm::{CreateData, NestedCreate, OrmError, Record, Related};

const INSERT_USER: &str = "INSERT INTO \"user\"(\"name\") VALUES ($1) RETURNING *";

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

#[tokio::test]
async fn test_has_many_children_share_one_insert() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "Ann")])
        .reply_rows(
            "INSERT INTO \"message\"",
            vec![message(10, 1, "a"), message(11, 1, "b")],
        );

    let created = db
        .table("user")
        .unwrap()
        .create(
            CreateData::new().set("name", "Ann").with_relation(
                "messages",
                NestedCreate::new().create_many([
                    CreateData::new().set("text", "a"),
                    CreateData::new().set("text", "b"),
                ]),
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            INSERT_USER,
            "INSERT INTO \"message\"(\"authorId\", \"text\") VALUES ($1, $2), ($1, $3) RETURNING *",
            "COMMIT",
        ]
    );
    let statements = mock.statements();
    assert_eq!(statements[1].params, vec![text("Ann")]);
    assert_eq!(
        statements[2].params,
        vec![SqlValue::Int(1), text("a"), text("b")]
    );

    assert_eq!(created.get_i64("id"), Some(1));
    let messages = created.related_records("messages");
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.get_i64("authorId") == Some(1)));
}

#[tokio::test]
async fn test_plain_create_skips_transaction() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "Ann"), user(2, "Bob")]);

    let created = db
        .table("user")
        .unwrap()
        .create_many(vec![
            CreateData::new().set("name", "Ann"),
            CreateData::new().set("name", "Bob"),
        ])
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(
        mock.log(),
        vec!["INSERT INTO \"user\"(\"name\") VALUES ($1), ($2) RETURNING *"]
    );
}

#[tokio::test]
async fn test_create_many_empty_runs_nothing() {
    let (db, mock) = mock_db();

    let created = db.table("user").unwrap().create_many(Vec::new()).await.unwrap();

    assert!(created.is_empty());
    assert!(mock.log().is_empty());
}

#[tokio::test]
async fn test_belongs_to_create_runs_first() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(5, "Ann")])
        .reply_rows("INSERT INTO \"message\"", vec![message(1, 5, "hi")]);

    let created = db
        .table("message")
        .unwrap()
        .create(
            CreateData::new().set("text", "hi").with_relation(
                "author",
                NestedCreate::new().create(CreateData::new().set("name", "Ann")),
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            INSERT_USER,
            "INSERT INTO \"message\"(\"authorId\", \"text\") VALUES ($1, $2) RETURNING *",
            "COMMIT",
        ]
    );
    assert_eq!(
        mock.statements()[2].params,
        vec![SqlValue::Int(5), text("hi")]
    );
    match created.related("author") {
        Some(Related::One(Some(author))) => assert_eq!(author.get_str("name"), Some("Ann")),
        other => panic!("unexpected author: {other:?}"),
    }
}

#[tokio::test]
async fn test_belongs_to_connect_without_match_rolls_back() {
    let (db, mock) = mock_db();

    let err = db
        .table("message")
        .unwrap()
        .create(
            CreateData::new().set("text", "hi").with_relation(
                "author",
                NestedCreate::new().connect(Condition::eq("id", 99)),
            ),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::NotFound { ref table } if table == "user"));
    let log = mock.log();
    assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
    assert!(log[1].starts_with("SELECT"));
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|s| s.starts_with("INSERT")));
}

#[tokio::test]
async fn test_connect_or_create_keeps_entry_order() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "Ann")])
        .reply_rows("UPDATE \"message\"", Vec::new())
        .reply_rows("UPDATE \"message\"", vec![message(20, 1, "w2")])
        .reply_rows("INSERT INTO \"message\"", vec![message(21, 1, "c1")]);

    let created = db
        .table("user")
        .unwrap()
        .create(
            CreateData::new().set("name", "Ann").with_relation(
                "messages",
                NestedCreate::new()
                    .connect_or_create(
                        Condition::eq("text", "w1"),
                        CreateData::new().set("text", "c1"),
                    )
                    .connect_or_create(
                        Condition::eq("text", "w2"),
                        CreateData::new().set("text", "c2"),
                    ),
            ),
        )
        .await
        .unwrap();

    let ids: Vec<Option<i64>> = created
        .related_records("messages")
        .iter()
        .map(|m| m.get_i64("id"))
        .collect();
    assert_eq!(ids, vec![Some(21), Some(20)]);

    let writes = mock.writes();
    assert_eq!(writes.len(), 4);
    assert!(writes[1].starts_with("UPDATE \"message\" SET \"authorId\" = $1 WHERE"));
    assert!(writes[2].starts_with("UPDATE \"message\" SET \"authorId\" = $1 WHERE"));
    assert_eq!(
        writes[3],
        "INSERT INTO \"message\"(\"authorId\", \"text\") VALUES ($1, $2) RETURNING *"
    );
}

#[tokio::test]
async fn test_join_create_writes_join_row() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "Ann")])
        .reply_rows("INSERT INTO \"chat\"", vec![chat(7, "general")]);

    let created = db
        .table("user")
        .unwrap()
        .create(
            CreateData::new().set("name", "Ann").with_relation(
                "chats",
                NestedCreate::new().create(CreateData::new().set("title", "general")),
            ),
        )
        .await
        .unwrap();

    let writes = mock.writes();
    assert_eq!(writes.len(), 3);
    assert!(writes[1].starts_with("INSERT INTO \"chat\""));
    assert!(writes[2].starts_with("INSERT INTO \"chatUser\""));
    let join_params = &mock.statements()[3].params;
    assert!(join_params.contains(&SqlValue::Int(1)));
    assert!(join_params.contains(&SqlValue::Int(7)));
    assert_eq!(created.related_records("chats").len(), 1);
}

#[tokio::test]
async fn test_batch_join_create_fails_before_any_statement() {
    let (db, mock) = mock_db();

    let err = db
        .table("user")
        .unwrap()
        .create(
            CreateData::new().set("name", "Ann").with_relation(
                "chats",
                NestedCreate::new().create_many([
                    CreateData::new().set("title", "a"),
                    CreateData::new().set("title", "b"),
                ]),
            ),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::UnsupportedBatchJoinCreate { .. }));
    assert!(mock.log().is_empty());
}

#[tokio::test]
async fn test_through_relation_is_read_only() {
    let (db, mock) = mock_db();

    let err = db
        .table("user")
        .unwrap()
        .create(CreateData::new().set("name", "Ann").with_relation(
            "messageChats",
            NestedCreate::new().create(CreateData::new().set("title", "x")),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::InvalidNestedWrite { .. }));
    assert!(mock.log().is_empty());
}

#[tokio::test]
async fn test_unknown_relation_is_rejected() {
    let (db, mock) = mock_db();

    let result = db
        .table("user")
        .unwrap()
        .create(CreateData::new().with_relation("friends", NestedCreate::new()))
        .await;

    assert!(result.is_err());
    assert!(mock.log().is_empty());
}

#[tokio::test]
async fn test_create_through_related_record_sets_key() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"message\"", vec![message(3, 1, "hi")]);
    let ann = user(1, "Ann");

    let created = db
        .table("user")
        .unwrap()
        .related("messages", &ann)
        .unwrap()
        .create(CreateData::new().set("text", "hi"))
        .await
        .unwrap();

    assert_eq!(created.get_i64("authorId"), Some(1));
    assert_eq!(
        mock.log(),
        vec!["INSERT INTO \"message\"(\"authorId\", \"text\") VALUES ($1, $2) RETURNING *"]
    );
    assert_eq!(mock.statements()[0].params, vec![SqlValue::Int(1), text("hi")]);
}

#[tokio::test]
async fn test_has_one_child_gets_parent_key() {
    let (db, mock) = mock_db();
    let profile = Record::new()
        .with("id", 4)
        .with("userId", 1)
        .with("bio", "hi");
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "Ann")])
        .reply_rows("INSERT INTO \"profile\"", vec![profile.clone()]);

    let created = db
        .table("user")
        .unwrap()
        .create(
            CreateData::new().set("name", "Ann").with_relation(
                "profile",
                NestedCreate::new().create(CreateData::new().set("bio", "hi")),
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            INSERT_USER,
            "INSERT INTO \"profile\"(\"userId\", \"bio\") VALUES ($1, $2) RETURNING *",
            "COMMIT",
        ]
    );
    assert_eq!(
        mock.statements()[2].params,
        vec![SqlValue::Int(1), text("hi")]
    );
    assert!(matches!(
        created.related("profile"),
        Some(Related::One(Some(record))) if **record == profile
    ));
}
