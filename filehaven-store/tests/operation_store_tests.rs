use filehaven_store::OperationStore;
use filehaven_types::{OperationStatus, PendingOperation};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[test]
fn save_and_get_roundtrip() {
    let store = OperationStore::open_in_memory().unwrap();
    let op = PendingOperation::upload("/docs/a.txt", "/local/a.txt");

    store.save(&op).unwrap();
    let loaded = store.get(&op.id).unwrap().unwrap();

    assert_eq!(loaded.id, op.id);
    assert_eq!(loaded.file_path, "/docs/a.txt");
    assert_eq!(loaded.status, OperationStatus::Pending);
    assert_eq!(loaded.retry_count, 0);
    assert_eq!(loaded.max_retries, 3);
}

#[test]
fn get_missing_returns_none() {
    let store = OperationStore::open_in_memory().unwrap();
    let op = PendingOperation::delete("/gone.txt");
    assert!(store.get(&op.id).unwrap().is_none());
}

#[test]
fn save_is_an_upsert() {
    let store = OperationStore::open_in_memory().unwrap();
    let mut op = PendingOperation::delete("/docs/a.txt");
    store.save(&op).unwrap();

    op.begin_attempt();
    op.fail("connection reset");
    store.save(&op).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    let loaded = store.get(&op.id).unwrap().unwrap();
    assert_eq!(loaded.status, OperationStatus::Failed);
    assert_eq!(loaded.retry_count, 1);
    assert_eq!(loaded.error_message.as_deref(), Some("connection reset"));
    assert!(loaded.last_retry_at.is_some());
}

#[test]
fn load_incomplete_is_fifo_and_skips_completed() {
    let store = OperationStore::open_in_memory().unwrap();

    let mut first = PendingOperation::upload("/a.txt", "/local/a.txt");
    first.created_at = SystemTime::now() - Duration::from_secs(30);
    let mut done = PendingOperation::create_folder("/folder");
    done.created_at = SystemTime::now() - Duration::from_secs(20);
    done.complete();
    let second = PendingOperation::delete("/a.txt");

    store.save(&second).unwrap();
    store.save(&done).unwrap();
    store.save(&first).unwrap();

    let incomplete = store.load_incomplete().unwrap();
    assert_eq!(incomplete.len(), 2);
    // Enqueue order, regardless of insertion order.
    assert_eq!(incomplete[0].id, first.id);
    assert_eq!(incomplete[1].id, second.id);
}

#[test]
fn needs_attention_lists_only_exhausted_failures() {
    let store = OperationStore::open_in_memory().unwrap();

    let mut exhausted = PendingOperation::upload("/a.txt", "/local/a.txt");
    for _ in 0..3 {
        exhausted.begin_attempt();
        exhausted.fail("timeout");
    }
    assert!(!exhausted.can_retry());

    let mut retryable = PendingOperation::upload("/b.txt", "/local/b.txt");
    retryable.begin_attempt();
    retryable.fail("timeout");
    assert!(retryable.can_retry());

    store.save(&exhausted).unwrap();
    store.save(&retryable).unwrap();

    let attention = store.needs_attention().unwrap();
    assert_eq!(attention.len(), 1);
    assert_eq!(attention[0].id, exhausted.id);
}

#[test]
fn references_path_covers_target_and_local_source() {
    let store = OperationStore::open_in_memory().unwrap();
    let op = PendingOperation::upload("/remote/a.txt", "/cache/a.txt");
    store.save(&op).unwrap();

    assert!(store.references_path("/remote/a.txt").unwrap());
    assert!(store.references_path("/cache/a.txt").unwrap());
    assert!(!store.references_path("/other.txt").unwrap());
}

#[test]
fn references_path_ignores_completed_and_parked() {
    let store = OperationStore::open_in_memory().unwrap();

    let mut done = PendingOperation::upload("/done.txt", "/cache/done.txt");
    done.begin_attempt();
    done.complete();
    store.save(&done).unwrap();

    let mut parked = PendingOperation::upload("/parked.txt", "/cache/parked.txt");
    for _ in 0..3 {
        parked.begin_attempt();
        parked.fail("timeout");
    }
    store.save(&parked).unwrap();

    assert!(!store.references_path("/done.txt").unwrap());
    // Failed counts as neither pending nor retrying.
    assert!(!store.references_path("/parked.txt").unwrap());
}

#[test]
fn prune_removes_only_old_terminal_records() {
    let store = OperationStore::open_in_memory().unwrap();
    let horizon = SystemTime::now() - Duration::from_secs(7 * 24 * 3600);

    let mut old_done = PendingOperation::delete("/old.txt");
    old_done.begin_attempt();
    old_done.complete();
    old_done.completed_at = Some(horizon - Duration::from_secs(3600));
    store.save(&old_done).unwrap();

    let mut fresh_done = PendingOperation::delete("/fresh.txt");
    fresh_done.begin_attempt();
    fresh_done.complete();
    store.save(&fresh_done).unwrap();

    let mut old_abandoned = PendingOperation::upload("/a.txt", "/cache/a.txt");
    for _ in 0..3 {
        old_abandoned.begin_attempt();
        old_abandoned.fail("timeout");
    }
    old_abandoned.last_retry_at = Some(horizon - Duration::from_secs(3600));
    store.save(&old_abandoned).unwrap();

    let pending = PendingOperation::upload("/b.txt", "/cache/b.txt");
    store.save(&pending).unwrap();

    let removed = store.prune_terminal_before(horizon).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.count().unwrap(), 2);
    assert!(store.get(&fresh_done.id).unwrap().is_some());
    assert!(store.get(&pending.id).unwrap().is_some());
}

#[test]
fn remove_dismisses_a_parked_operation() {
    let store = OperationStore::open_in_memory().unwrap();
    let op = PendingOperation::delete("/a.txt");
    store.save(&op).unwrap();

    store.remove(&op.id).unwrap();
    assert!(store.get(&op.id).unwrap().is_none());
}

#[test]
fn survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("operations.db");

    let op = PendingOperation::upload("/a.txt", "/cache/a.txt");
    {
        let store = OperationStore::new(&db).unwrap();
        store.save(&op).unwrap();
    }

    let store = OperationStore::new(&db).unwrap();
    let loaded = store.get(&op.id).unwrap().unwrap();
    assert_eq!(loaded.file_path, "/a.txt");
    assert_eq!(loaded.status, OperationStatus::Pending);
}
