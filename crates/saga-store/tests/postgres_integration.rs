//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;

use saga_store::{
    CorrelationId, FieldMatch, OutboxEntry, PostgresSagaStore, SagaRecord, SagaStore,
    SagaStoreExt, StoreError, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
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

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_tables.sql"
            ))
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
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_instances, saga_outbox")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn reservation(id: CorrelationId, book_id: CorrelationId) -> SagaRecord {
    SagaRecord::new(
        "Reservation",
        id,
        "Requested",
        serde_json::json!({
            "book_id": book_id.to_string(),
            "member_id": CorrelationId::new().to_string(),
        }),
    )
}

#[tokio::test]
#[serial]
async fn save_and_get_instance() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    let version = store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let loaded = store.get("Reservation", id).await.unwrap().unwrap();
    assert_eq!(loaded.correlation_id, id);
    assert_eq!(loaded.state, "Requested");
    assert_eq!(loaded.version, Version::first());
}

#[tokio::test]
#[serial]
async fn update_with_expected_version() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();

    let mut record = store.get("Reservation", id).await.unwrap().unwrap();
    record.state = "Reserved".to_string();
    let version = store.save(record, Version::first(), vec![]).await.unwrap();
    assert_eq!(version, Version::new(2));

    let loaded = store.get("Reservation", id).await.unwrap().unwrap();
    assert_eq!(loaded.state, "Reserved");
}

#[tokio::test]
#[serial]
async fn stale_version_conflicts() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();

    let result = store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await;
    assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
}

#[tokio::test]
#[serial]
async fn outbox_is_staged_atomically_with_delete() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();

    let entries = vec![
        OutboxEntry::new("Reservation", id, 0, serde_json::json!({"kind": "publish"})),
        OutboxEntry::new("Reservation", id, 1, serde_json::json!({"kind": "unschedule"})),
    ];
    store
        .delete("Reservation", id, Version::first(), entries)
        .await
        .unwrap();

    assert!(!store.exists("Reservation", id).await.unwrap());
    let pending = store.pending_outbox().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].sequence, 0);
    assert_eq!(pending[1].sequence, 1);

    store.mark_dispatched(pending[0].id).await.unwrap();
    let pending = store.pending_outbox().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sequence, 1);
}

#[tokio::test]
#[serial]
async fn purge_removes_dispatched_entries_only() {
    let store = get_test_store().await;
    let id = CorrelationId::new();
    let entries = vec![
        OutboxEntry::new("Reservation", id, 0, serde_json::json!({"kind": "publish"})),
        OutboxEntry::new("Reservation", id, 1, serde_json::json!({"kind": "schedule"})),
    ];
    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), entries)
        .await
        .unwrap();

    let pending = store.pending_outbox().await.unwrap();
    store.mark_dispatched(pending[0].id).await.unwrap();

    let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
    assert_eq!(store.purge_dispatched(an_hour_ago).await.unwrap(), 0);

    let later = Utc::now() + chrono::Duration::minutes(5);
    assert_eq!(store.purge_dispatched(later).await.unwrap(), 1);
    assert_eq!(store.purge_dispatched(later).await.unwrap(), 0);

    let pending = store.pending_outbox().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sequence, 1);
}

#[tokio::test]
#[serial]
async fn conflicting_delete_stages_nothing() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();

    let entry = OutboxEntry::new("Reservation", id, 0, serde_json::json!({}));
    let result = store
        .delete("Reservation", id, Version::new(5), vec![entry])
        .await;

    assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
    assert!(store.exists("Reservation", id).await.unwrap());
    assert!(store.pending_outbox().await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn find_by_data_field() {
    let store = get_test_store().await;
    let book_a = CorrelationId::new();
    let book_b = CorrelationId::new();
    let r1 = CorrelationId::new();
    let r2 = CorrelationId::new();

    store
        .save(reservation(r1, book_a), Version::initial(), vec![])
        .await
        .unwrap();
    store
        .save(reservation(r2, book_b), Version::initial(), vec![])
        .await
        .unwrap();

    let found = store
        .find("Reservation", &[FieldMatch::new("book_id", book_a)])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].correlation_id, r1);

    let found = store
        .find("Book", &[FieldMatch::new("book_id", book_a)])
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[serial]
async fn concurrent_updates_single_winner() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .save(reservation(id, CorrelationId::new()), Version::initial(), vec![])
        .await
        .unwrap();
    let record = store.get("Reservation", id).await.unwrap().unwrap();

    let mut handles = Vec::new();
    for i in 0..5 {
        let store = store.clone();
        let mut record = record.clone();
        record.state = format!("State{i}");
        handles.push(tokio::spawn(async move {
            store.save(record, Version::first(), vec![]).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let loaded = store.get("Reservation", id).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(2));
}
