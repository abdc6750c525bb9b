//! Integration tests for the change log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use docsync_engine::{ChangeSet, DeletedDoc, ModifiedDoc};
use docsync_server::datastore::MemoryDatastore;
use docsync_server::{ChangeListener, Syncer};

fn modified(id: &str, version: u64) -> ModifiedDoc {
    ModifiedDoc {
        id: id.to_string(),
        version,
        namespace: id.split('$').next().unwrap().to_string(),
    }
}

fn syncer() -> Syncer {
    Syncer::new(Arc::new(MemoryDatastore::in_memory()))
}

#[derive(Default)]
struct LastSequence(AtomicU64);

impl ChangeListener for LastSequence {
    fn changes_available(&self, sequence: u64) {
        self.0.store(sequence, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn empty_log_reports_sequence_zero() {
    let syncer = syncer();

    let handshake = syncer.changes_since_sequence(None).await.unwrap();
    assert_eq!(handshake.sequence, 0);
    assert!(handshake.atoms.is_none());

    let since = syncer.changes_since_sequence(Some(0)).await.unwrap();
    assert_eq!(since.sequence, 0);
    assert_eq!(since.atoms, Some(vec![]));
}

#[tokio::test]
async fn sequence_bumps_are_monotonic() {
    let syncer = syncer();
    assert_eq!(syncer.bump_sequence().await.unwrap(), 1);
    assert_eq!(syncer.bump_sequence().await.unwrap(), 2);
    assert_eq!(syncer.bump_sequence().await.unwrap(), 3);
}

#[tokio::test]
async fn each_update_stamps_atoms_between_two_bumps() {
    let syncer = syncer();

    let first = syncer
        .update_with_payload(&ChangeSet {
            modified: vec![modified("app.Coll$1", 1)],
            deleted: vec![],
        })
        .await
        .unwrap();
    assert_eq!(first.sequence, 2);

    let changes = syncer.changes_since_sequence(Some(1)).await.unwrap();
    assert_eq!(changes.sequence, 2);
    let atoms = changes.atoms.unwrap();
    assert_eq!(atoms.len(), 1);
    assert_eq!(atoms[0].id, "app.Coll$1");
    assert_eq!(atoms[0].sequence, 1);
    assert_eq!(atoms[0].version, Some(1));
    assert!(!atoms[0].deleted);

    let none = syncer.changes_since_sequence(Some(4)).await.unwrap();
    assert_eq!(none.sequence, 2);
    assert_eq!(none.atoms, Some(vec![]));

    let second = syncer
        .update_with_payload(&ChangeSet {
            modified: vec![modified("app.Coll$2", 1)],
            deleted: vec![],
        })
        .await
        .unwrap();
    assert_eq!(second.sequence, 4);

    let atoms = syncer.changes_since_sequence(Some(2)).await.unwrap().atoms.unwrap();
    assert_eq!(atoms.len(), 1);
    assert_eq!(atoms[0].id, "app.Coll$2");
    assert_eq!(atoms[0].sequence, 3);
}

#[tokio::test]
async fn atoms_keep_only_the_latest_state() {
    let syncer = syncer();

    syncer
        .update_with_payload(&ChangeSet {
            modified: vec![modified("app.Coll$1", 1), modified("app.Coll$2", 1)],
            deleted: vec![],
        })
        .await
        .unwrap();
    syncer
        .update_with_payload(&ChangeSet {
            modified: vec![],
            deleted: vec![DeletedDoc {
                id: "app.Coll$1".into(),
                namespace: "app.Coll".into(),
            }],
        })
        .await
        .unwrap();

    let atoms = syncer.changes_since_sequence(Some(0)).await.unwrap().atoms.unwrap();
    assert_eq!(atoms.len(), 2);

    // Sorted ascending: the untouched document first.
    assert_eq!(atoms[0].id, "app.Coll$2");
    assert_eq!(atoms[0].sequence, 1);
    assert_eq!(atoms[1].id, "app.Coll$1");
    assert_eq!(atoms[1].sequence, 3);
    assert!(atoms[1].deleted);
    assert_eq!(atoms[1].version, Some(1), "deletion keeps the last known version");
}

#[tokio::test]
async fn listener_hears_the_returned_sequence() {
    let listener = Arc::new(LastSequence::default());
    let syncer =
        Syncer::new(Arc::new(MemoryDatastore::in_memory())).with_listener(listener.clone());

    let response = syncer.update_with_payload(&ChangeSet::default()).await.unwrap();
    assert_eq!(listener.0.load(Ordering::SeqCst), response.sequence);
}

#[tokio::test]
async fn concurrent_updates_never_share_a_sequence() {
    let syncer = Arc::new(syncer());

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let syncer = syncer.clone();
            tokio::spawn(async move {
                syncer
                    .update_with_payload(&ChangeSet {
                        modified: vec![modified(&format!("app.Coll${i}"), 1)],
                        deleted: vec![],
                    })
                    .await
                    .unwrap()
                    .sequence
            })
        })
        .collect();

    let mut sequences: Vec<u64> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    sequences.sort();
    sequences.dedup();
    assert_eq!(sequences.len(), 10);

    let changes = syncer.changes_since_sequence(Some(0)).await.unwrap();
    assert_eq!(changes.sequence, 20);
    assert_eq!(changes.atoms.unwrap().len(), 10);
}

#[tokio::test]
async fn change_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = MemoryDatastore::open(dir.path()).await.unwrap();
        let syncer = Syncer::new(Arc::new(store));
        syncer
            .update_with_payload(&ChangeSet {
                modified: vec![modified("app.Coll$1", 3)],
                deleted: vec![],
            })
            .await
            .unwrap();
    }

    let syncer = Syncer::new(Arc::new(MemoryDatastore::open(dir.path()).await.unwrap()));
    let changes = syncer.changes_since_sequence(Some(1)).await.unwrap();
    assert_eq!(changes.sequence, 2);
    assert_eq!(changes.atoms.unwrap()[0].version, Some(3));
}
