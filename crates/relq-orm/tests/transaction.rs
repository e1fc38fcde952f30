//! Transaction nesting, savepoints and after-commit hooks against the
//! recording adapter.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{mock_db, user};
use relq_orm::{BoxError, CreateData, IsolationLevel, OrmError, TransactionOptions};

const INSERT_USER: &str = "INSERT INTO \"user\"(\"name\") VALUES ($1) RETURNING *";

#[tokio::test]
async fn test_nested_transaction_uses_savepoint() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "X")]);
    let users = db.table("user").unwrap();

    let created = db
        .transaction(|| async {
            db.transaction(|| async { users.create(CreateData::new().set("name", "X")).await })
                .await
        })
        .await
        .unwrap();

    assert_eq!(created.get_i64("id"), Some(1));
    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            "SAVEPOINT \"1\"",
            INSERT_USER,
            "RELEASE SAVEPOINT \"1\"",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_failed_savepoint_keeps_outer_work() {
    let (db, mock) = mock_db();
    mock.reply_rows("INSERT INTO \"user\"", vec![user(1, "X")])
        .reply_rows("INSERT INTO \"user\"", vec![user(2, "Y")])
        .reply_rows("INSERT INTO \"user\"", vec![user(3, "Z")]);
    let users = db.table("user").unwrap();

    let result: Result<(), OrmError> = db
        .transaction(|| async {
            users.create(CreateData::new().set("name", "X")).await?;
            let inner = db
                .transaction(|| async {
                    users.create(CreateData::new().set("name", "Y")).await?;
                    Err::<(), _>(OrmError::UnknownTable("nope".into()))
                })
                .await;
            assert!(matches!(inner, Err(OrmError::UnknownTable(_))));
            users.create(CreateData::new().set("name", "Z")).await?;
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            INSERT_USER,
            "SAVEPOINT \"1\"",
            INSERT_USER,
            "ROLLBACK TO SAVEPOINT \"1\"",
            INSERT_USER,
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_sibling_savepoints_reuse_depth() {
    let (db, mock) = mock_db();

    db.transaction(|| async {
        db.transaction(|| async { Ok::<_, OrmError>(()) }).await?;
        db.transaction(|| async {
            db.transaction(|| async { Ok::<_, OrmError>(()) }).await
        })
        .await
    })
    .await
    .unwrap();

    assert_eq!(
        mock.log(),
        vec![
            "BEGIN",
            "SAVEPOINT \"1\"",
            "RELEASE SAVEPOINT \"1\"",
            "SAVEPOINT \"1\"",
            "SAVEPOINT \"2\"",
            "RELEASE SAVEPOINT \"2\"",
            "RELEASE SAVEPOINT \"1\"",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_error_rolls_back_outermost() {
    let (db, mock) = mock_db();
    mock.fail("INSERT INTO \"user\"", "duplicate key");
    let users = db.table("user").unwrap();

    let err = db
        .transaction(|| async { users.create(CreateData::new().set("name", "X")).await })
        .await
        .unwrap_err();

    match err {
        OrmError::Database { sql, params, .. } => {
            assert_eq!(sql, INSERT_USER);
            assert_eq!(params.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.log(), vec!["BEGIN", INSERT_USER, "ROLLBACK"]);
}

#[tokio::test]
async fn test_begin_carries_options() {
    let (db, mock) = mock_db();

    db.transaction_with(
        TransactionOptions::new()
            .isolation(IsolationLevel::Serializable)
            .read_only(true),
        || async { Ok::<_, OrmError>(()) },
    )
    .await
    .unwrap();

    assert_eq!(
        mock.log(),
        vec!["BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY", "COMMIT"]
    );
}

#[tokio::test]
async fn test_ensure_transaction_joins_without_savepoint() {
    let (db, mock) = mock_db();

    db.transaction(|| async {
        db.ensure_transaction(|| async {
            assert!(db.is_in_transaction());
            Ok::<_, OrmError>(())
        })
        .await
    })
    .await
    .unwrap();
    assert_eq!(mock.log(), vec!["BEGIN", "COMMIT"]);

    db.ensure_transaction(|| async { Ok::<_, OrmError>(()) })
        .await
        .unwrap();
    assert_eq!(mock.log(), vec!["BEGIN", "COMMIT", "BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_after_commit_runs_once_committed() {
    let (db, mock) = mock_db();
    let ran = Arc::new(AtomicUsize::new(0));

    db.transaction(|| async {
        let counter = Arc::clone(&ran);
        db.after_commit("count", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        })
        .await?;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(mock.log(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_after_commit_failures_are_aggregated() {
    let (db, mock) = mock_db();

    let err = db
        .transaction(|| async {
            db.after_commit("mail", || async { Err::<(), BoxError>("smtp down".into()) })
                .await?;
            db.after_commit("fine", || async { Ok::<_, BoxError>(()) }).await?;
            db.after_commit("index", || async { Err::<(), BoxError>("timeout".into()) })
                .await?;
            Ok::<_, OrmError>(7_i64)
        })
        .await
        .unwrap_err();

    let OrmError::AfterCommit(err) = err else {
        panic!("expected an after-commit error");
    };
    let names: Vec<&str> = err.failures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["mail", "index"]);
    assert!(err.to_string().contains("smtp down"));
    assert_eq!(err.into_committed::<i64>().unwrap(), 7);
    assert_eq!(mock.log(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_after_commit_dropped_with_savepoint() {
    let (db, _mock) = mock_db();
    let ran = Arc::new(AtomicUsize::new(0));

    db.transaction(|| async {
        let _ = db
            .transaction(|| async {
                let counter = Arc::clone(&ran);
                db.after_commit("dropped", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                })
                .await?;
                Err::<(), _>(OrmError::UnknownTable("nope".into()))
            })
            .await;
        let counter = Arc::clone(&ran);
        db.after_commit("kept", move || async move {
            counter.fetch_add(10, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        })
        .await?;
        Ok::<_, OrmError>(())
    })
    .await
    .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_after_commit_outside_transaction_runs_now() {
    let (db, mock) = mock_db();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);

    db.after_commit("now", move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BoxError>(())
    })
    .await
    .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(mock.log().is_empty());
}

#[tokio::test]
async fn test_other_db_does_not_join() {
    let (db, mock) = mock_db();
    let (other, other_mock) = mock_db();

    db.transaction(|| async {
        assert!(db.is_in_transaction());
        assert!(!other.is_in_transaction());
        other
            .transaction(|| async { Ok::<_, OrmError>(()) })
            .await
    })
    .await
    .unwrap();

    assert_eq!(mock.log(), vec!["BEGIN", "COMMIT"]);
    assert_eq!(other_mock.log(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_concurrent_transactions_are_independent() {
    let (db, mock) = mock_db();

    let (a, b) = tokio::join!(
        db.transaction(|| async { Ok::<_, OrmError>(1) }),
        db.transaction(|| async { Ok::<_, OrmError>(2) }),
    );

    assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    let log = mock.log();
    assert_eq!(log.iter().filter(|s| *s == "BEGIN").count(), 2);
    assert_eq!(log.iter().filter(|s| *s == "COMMIT").count(), 2);
    assert!(!log.iter().any(|s| s.starts_with("SAVEPOINT")));
    assert!(!db.is_in_transaction());
}
