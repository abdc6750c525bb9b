//! PostgreSQL datastore tests.
//!
//! These tests require a running PostgreSQL database and are skipped unless
//! the DATABASE_URL environment variable is set.

use std::sync::Arc;

use docsync_engine::{ChangeSet, DocId, ModifiedDoc, OperationSet, Value};
use docsync_server::datastore::{create_pool, run_migrations, Datastore, PgDatastore};
use docsync_server::Syncer;

async fn store(scope: &str) -> Option<PgDatastore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();

    // Each run gets a fresh partition.
    let scope = format!("{scope}-{}", uuid::Uuid::new_v4());
    Some(PgDatastore::new(pool, scope))
}

fn push_ops(field: &str, value: i64) -> OperationSet {
    let mut ops = OperationSet::new();
    ops.set(field, value);
    ops.prepare_for_push();
    ops
}

#[tokio::test]
async fn compare_and_swap_round_trip() {
    let Some(store) = store("cas").await else { return };
    let id = DocId::parse("app.Coll$1").unwrap();

    let created = store.update_by_operations(&id, None, &push_ops("a", 1)).await.unwrap();
    assert_eq!(created.version(), Some(1));

    let updated = store.update_by_operations(&id, Some(1), &push_ops("a", 2)).await.unwrap();
    assert_eq!(updated.version(), Some(2));

    let err = store.update_by_operations(&id, Some(1), &push_ops("a", 3)).await.unwrap_err();
    assert!(err.is_conflict());

    let stored = store.get_document(&id).await.unwrap();
    assert_eq!(stored.get("a"), Some(&Value::from(2)));

    assert!(store.remove_document(&id, Some(1)).await.unwrap_err().is_conflict());
    store.remove_document(&id, Some(2)).await.unwrap();
    assert!(store.get_document(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn concurrent_upserts_are_serialized() {
    let Some(store) = store("upsert").await else { return };
    let store = Arc::new(store);
    let id = DocId::parse("app.Counter$1").unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let mut ops = OperationSet::new();
                ops.increment("hits", 1);
                store.update_by_operations(&id, None, &ops).await.unwrap();
            })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let doc = store.get_document(&id).await.unwrap();
    assert_eq!(doc.get("hits").and_then(Value::as_i64), Some(10));
}

#[tokio::test]
async fn syncer_on_postgres() {
    let Some(store) = store("changes").await else { return };
    let syncer = Syncer::new(Arc::new(store));

    let response = syncer
        .update_with_payload(&ChangeSet {
            modified: vec![ModifiedDoc {
                id: "app.Coll$1".into(),
                version: 1,
                namespace: "app.Coll".into(),
            }],
            deleted: vec![],
        })
        .await
        .unwrap();
    assert_eq!(response.sequence, 2);

    let changes = syncer.changes_since_sequence(Some(1)).await.unwrap();
    assert_eq!(changes.atoms.unwrap().len(), 1);
}
