//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use serial_test::serial;
use sqlx::PgPool;
use store::{
    AggregateId, AggregateRecord, PostgresStore, StoreError, StoreTransaction,
    TransactionalStore, UniqueKey, Version,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_aggregates.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE aggregate_keys, aggregates")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn record(id: AggregateId, value: i32) -> AggregateRecord {
    AggregateRecord::new(
        id,
        "TestAggregate",
        Version::initial(),
        serde_json::json!({ "value": value }),
    )
}

#[tokio::test]
#[serial]
async fn insert_and_load_record() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    let version = tx
        .upsert(record(id, 1), Version::initial(), vec![])
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(version, Version::first());

    let mut tx = store.begin().await.unwrap();
    let loaded = tx.load("TestAggregate", id).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.state["value"], 1);
}

#[tokio::test]
#[serial]
async fn rolled_back_write_is_not_visible() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    tx.upsert(record(id, 1), Version::initial(), vec![])
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert!(tx.load("TestAggregate", id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn update_with_stale_version_conflicts() {
    let store = get_test_store().await;
    let id = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    tx.upsert(record(id, 1), Version::initial(), vec![])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.upsert(record(id, 2), Version::first(), vec![])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx.upsert(record(id, 3), Version::first(), vec![]).await;
    match result {
        Err(StoreError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, Version::first());
            assert_eq!(actual, Version::new(2));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn duplicate_key_is_rejected_and_lookup_works() {
    let store = get_test_store().await;
    let owner = AggregateId::new();

    let mut tx = store.begin().await.unwrap();
    tx.upsert(
        record(owner, 1),
        Version::initial(),
        vec![UniqueKey::new("order_code", 42)],
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let found = tx
        .find_by_key("TestAggregate", &UniqueKey::new("order_code", 42))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.aggregate_id, owner);

    let result = tx
        .upsert(
            record(AggregateId::new(), 1),
            Version::initial(),
            vec![UniqueKey::new("order_code", 42)],
        )
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
}

#[tokio::test]
#[serial]
async fn list_returns_records_of_type() {
    let store = get_test_store().await;

    let mut tx = store.begin().await.unwrap();
    for value in 0..3 {
        tx.upsert(record(AggregateId::new(), value), Version::initial(), vec![])
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.list("TestAggregate").await.unwrap().len(), 3);
    assert!(tx.list("Other").await.unwrap().is_empty());
}
