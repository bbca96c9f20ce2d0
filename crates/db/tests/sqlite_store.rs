use chrono::Utc;
use db::{DbError, SequenceStore, SqliteStore};
use sequencer_core::{CorrelationRecord, SequenceRecord, StatusRecord, VisitRecord};
use tempfile::TempDir;

async fn open_store() -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("sequences.db").display());
    let store = SqliteStore::open(&url).await.unwrap();
    (store, dir)
}

fn sequence(id: i64, group_id: Option<i64>) -> SequenceRecord {
    SequenceRecord {
        id,
        group_id,
        sequence_type: "masterBiases".to_string(),
        name: "night calib".to_string(),
        comments: "cold".to_string(),
        origin: "operator".to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_sequence_and_status_roundtrip() {
    let (store, _dir) = open_store().await;
    assert_eq!(store.last_sequence_id().await.unwrap(), 0);

    store.insert_sequence(&sequence(41, None)).await.unwrap();
    store.insert_sequence(&sequence(42, None)).await.unwrap();
    assert_eq!(store.last_sequence_id().await.unwrap(), 42);

    store
        .insert_status(&StatusRecord {
            sequence_id: 42,
            status_flag: 1,
            output: "dcb: lamp did not warm".to_string(),
            finished_at: Utc::now(),
        })
        .await
        .unwrap();

    let found = store.sequences().find_by_id(42).await.unwrap().unwrap();
    assert_eq!(found.sequence_type, "masterBiases");
    assert_eq!(found.origin, "operator");

    let status = store.sequences().find_status(42).await.unwrap().unwrap();
    assert_eq!(status.status_flag, 1);

    let history = store.history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sequence.id, 42);
    assert_eq!(history[0].status.as_ref().unwrap().output, "dcb: lamp did not warm");
    assert!(history[1].status.is_none());
}

#[tokio::test]
async fn test_duplicate_sequence_is_insert_error() {
    let (store, _dir) = open_store().await;
    store.insert_sequence(&sequence(1, None)).await.unwrap();

    let err = store.insert_sequence(&sequence(1, None)).await.unwrap_err();
    assert!(matches!(err, DbError::Insert { ref table, .. } if table == "sequence"));
}

#[tokio::test]
async fn test_visit_and_correlation() {
    let (store, _dir) = open_store().await;

    store
        .insert_visit(&VisitRecord::new(1207, "sps"))
        .await
        .unwrap();
    store
        .insert_correlation(&CorrelationRecord {
            caller: "sps".to_string(),
            visit_id: 1207,
            sequence_id: 5,
        })
        .await
        .unwrap();

    let visit = store.visits().find_by_id(1207).await.unwrap().unwrap();
    assert_eq!(visit.caller, "sps");

    let links = store.visits().find_correlations(1207).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].sequence_id, 5);
}

#[tokio::test]
async fn test_groups() {
    let (store, _dir) = open_store().await;

    assert!(matches!(
        store.last_group_matching("arcs").await,
        Err(DbError::NotFound(_))
    ));

    let first = store.insert_group("arcs").await.unwrap();
    let second = store.insert_group("arcs").await.unwrap();
    assert!(second > first);
    assert_eq!(store.last_group_matching("arcs").await.unwrap(), second);

    store.insert_sequence(&sequence(9, Some(second))).await.unwrap();
    let history = store.history(1).await.unwrap();
    assert_eq!(history[0].sequence.group_id, Some(second));
}
