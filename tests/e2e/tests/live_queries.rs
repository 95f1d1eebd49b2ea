use std::time::Duration;

use livequery::{Database, LiveQueryError, LiveQueryManager, LiveQueryState, SetupStage, TableRef, Value};
use livequery_e2e::harness::{self, snapshot_stream};

#[tokio::test]
#[ignore = "requires docker"]
async fn orders_snapshot_follows_inserts_and_updates() {
    let context = harness::bootstrap()
        .await
        .expect("bootstrap must initialize test harness");
    let schema = context
        .allocate_schema("orders")
        .await
        .expect("schema allocation must succeed");

    let result = async {
        context
            .execute(&format!("INSERT INTO {schema}.orders VALUES (1, 'open')"))
            .await
            .expect("seed insert must succeed");

        let db = context.live_database().await.expect("live session must connect");
        let manager = LiveQueryManager::new(db);
        let (sink, mut snapshots) = snapshot_stream();
        let live = manager
            .create(
                &format!("SELECT id, status FROM {schema}.orders WHERE status = $1 ORDER BY id"),
                vec![Value::from("open")],
                sink,
            )
            .await
            .expect("live query must be created");

        assert_eq!(live.state(), LiveQueryState::Active);
        assert_eq!(live.dependencies(), &[TableRef::new(schema.as_str(), "orders")]);
        assert_eq!(live.channels(), &[format!("table_change__{schema}__orders")]);
        assert!(context
            .trigger_exists(&schema, "orders")
            .await
            .expect("trigger lookup must succeed"));

        let initial = snapshots.next().await.expect("initial snapshot");
        assert_eq!(initial.len(), 1);
        assert_eq!(initial.fields[0].name, "id");

        context
            .execute(&format!("INSERT INTO {schema}.orders VALUES (2, 'open')"))
            .await
            .expect("insert must succeed");
        let after_insert = snapshots
            .until(|s| s.len() == 2)
            .await
            .expect("snapshot with the new order");
        assert_eq!(after_insert.get(1, "id"), Some(&Value::Int(2)));

        context
            .execute(&format!("UPDATE {schema}.orders SET status = 'closed' WHERE id = 1"))
            .await
            .expect("update must succeed");
        let after_update = snapshots
            .until(|s| s.len() == 1)
            .await
            .expect("snapshot without the closed order");
        assert_eq!(after_update.get(0, "id"), Some(&Value::Int(2)));

        live.unsubscribe().await.expect("unsubscribe must succeed");
        assert!(snapshots.errors().is_empty());
    }
    .await;

    context
        .drop_schema(&schema)
        .await
        .expect("schema cleanup must succeed");
    result
}

#[tokio::test]
#[ignore = "requires docker"]
async fn constant_query_has_no_dependencies() {
    let context = harness::bootstrap()
        .await
        .expect("bootstrap must initialize test harness");
    let db = context.live_database().await.expect("live session must connect");
    let manager = LiveQueryManager::new(db);

    let live = manager
        .create("SELECT 1", vec![], |_: std::sync::Arc<livequery::QueryResults>| {})
        .await
        .expect("live query must be created");

    assert!(live.dependencies().is_empty());
    assert!(live.provision_report().installed.is_empty());
    assert_eq!(live.initial_results().rows, vec![vec![Value::Int(1)]]);
    live.unsubscribe().await.expect("unsubscribe must succeed");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn missing_table_rolls_back_setup() {
    let context = harness::bootstrap()
        .await
        .expect("bootstrap must initialize test harness");
    let db = context.live_database().await.expect("live session must connect");
    let manager = LiveQueryManager::new(std::sync::Arc::clone(&db));

    let err = manager
        .create(
            "SELECT * FROM no_such_table_anywhere",
            vec![],
            |_: std::sync::Arc<livequery::QueryResults>| {},
        )
        .await
        .expect_err("setup must fail");

    match err {
        LiveQueryError::SetupFailure { stage, source } => {
            assert_eq!(stage, SetupStage::MaterializeView);
            assert_eq!(source.sqlstate(), Some("42P01"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let views = db
        .query(
            "SELECT relname FROM pg_class WHERE relkind = 'v' AND relnamespace = pg_my_temp_schema()",
        )
        .await
        .expect("catalog query must succeed");
    assert!(views.is_empty(), "no view may be left behind");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn unsubscribe_keeps_trigger_and_stops_delivery() {
    let context = harness::bootstrap()
        .await
        .expect("bootstrap must initialize test harness");
    let schema = context
        .allocate_schema("unsubscribe")
        .await
        .expect("schema allocation must succeed");

    let result = async {
        let db = context.live_database().await.expect("live session must connect");
        let manager = LiveQueryManager::new(db);

        let (first_sink, mut first) = snapshot_stream();
        let first_live = manager
            .create(&format!("SELECT * FROM {schema}.orders"), vec![], first_sink)
            .await
            .expect("first live query");
        let (second_sink, mut second) = snapshot_stream();
        let second_live = manager
            .create(&format!("SELECT count(*) AS n FROM {schema}.orders"), vec![], second_sink)
            .await
            .expect("second live query");

        assert_eq!(first_live.provision_report().installed.len(), 1);
        assert_eq!(second_live.provision_report().existing.len(), 1);
        first.next().await.expect("first initial");
        second.next().await.expect("second initial");

        first_live.unsubscribe().await.expect("unsubscribe must succeed");
        first_live.unsubscribe().await.expect("second unsubscribe is a no-op");
        assert!(context
            .trigger_exists(&schema, "orders")
            .await
            .expect("trigger lookup must succeed"));

        context
            .execute(&format!("INSERT INTO {schema}.orders VALUES (1, 'open')"))
            .await
            .expect("insert must succeed");

        let counted = second
            .until(|s| s.get(0, "n") == Some(&Value::Int(1)))
            .await
            .expect("remaining live query still refreshes");
        assert_eq!(counted.len(), 1);
        assert!(first.is_quiet_for(Duration::from_millis(500)).await);

        second_live.unsubscribe().await.expect("unsubscribe must succeed");
    }
    .await;

    context
        .drop_schema(&schema)
        .await
        .expect("schema cleanup must succeed");
    result
}
