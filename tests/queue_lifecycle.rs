//! Integration tests for the durable queue's push/pop/lease/ack/fail lifecycle.

use postie::db::queue::QueueItemStatus;
use postie::db::Database;
use std::time::Duration;

async fn db() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("queue.db")).await.unwrap();
    (db, dir)
}

#[tokio::test]
async fn push_then_pop_returns_the_item_leased() {
    let (db, _dir) = db().await;
    let id = db.push("job-body", 0).await.unwrap();

    let row = db.pop(60_000, 3).await.unwrap().expect("item should be visible");
    assert_eq!(row.id, id);
    assert_eq!(row.body, "job-body");
    assert_eq!(row.received_count, 1);
}

#[tokio::test]
async fn leased_item_is_invisible_until_lease_expires() {
    let (db, _dir) = db().await;
    db.push("job-body", 0).await.unwrap();

    let first = db.pop(200, 3).await.unwrap();
    assert!(first.is_some());

    let second = db.pop(200, 3).await.unwrap();
    assert!(second.is_none(), "item should stay invisible while its lease is active");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let third = db.pop(200, 3).await.unwrap();
    assert!(third.is_some(), "item should become visible again once its lease expires");
}

#[tokio::test]
async fn higher_priority_pops_first() {
    let (db, _dir) = db().await;
    let low = db.push("low", 0).await.unwrap();
    let high = db.push("high", 10).await.unwrap();

    let row = db.pop(60_000, 3).await.unwrap().unwrap();
    assert_eq!(row.id, high);
    let row = db.pop(60_000, 3).await.unwrap().unwrap();
    assert_eq!(row.id, low);
}

#[tokio::test]
async fn ack_removes_item_and_records_completion() {
    let (db, _dir) = db().await;
    db.push("job-body", 0).await.unwrap();
    let row = db.pop(60_000, 3).await.unwrap().unwrap();

    db.ack(&row, "/out/file.bin", 1024, Some("/out/file.nzb")).await.unwrap();

    assert_eq!(db.queue_depth().await.unwrap(), 0);
    assert!(db.pop(60_000, 3).await.unwrap().is_none());
}

#[tokio::test]
async fn fail_removes_item_and_records_error() {
    let (db, _dir) = db().await;
    let id = db.push("job-body", 0).await.unwrap();

    db.fail(id, "permanent failure").await.unwrap();

    assert_eq!(db.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn item_exceeding_max_receives_is_auto_failed() {
    let (db, _dir) = db().await;
    db.push("job-body", 0).await.unwrap();

    // lease_ms=0 makes every popped item immediately visible again; after
    // `max_receives` successful pops, the next pop should auto-fail it
    // rather than hand it out a third time.
    for _ in 0..2 {
        assert!(db.pop(0, 2).await.unwrap().is_some());
    }
    assert!(db.pop(0, 2).await.unwrap().is_none());
    assert_eq!(db.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
async fn list_queue_by_status_separates_pending_from_leased() {
    let (db, _dir) = db().await;
    let leased_id = db.push("in-flight", 0).await.unwrap();
    let pending_id = db.push("waiting", 0).await.unwrap();
    db.pop(60_000, 3).await.unwrap();

    let pending = db.list_queue_by_status(QueueItemStatus::Pending).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, pending_id);

    let leased = db.list_queue_by_status(QueueItemStatus::Leased).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, leased_id);
}

#[tokio::test]
async fn requeue_makes_a_leased_item_immediately_visible_again() {
    let (db, _dir) = db().await;
    let id = db.push("job-body", 0).await.unwrap();
    db.pop(60_000, 3).await.unwrap().unwrap();

    assert!(db.pop(60_000, 3).await.unwrap().is_none());
    db.requeue(id).await.unwrap();
    assert!(db.pop(60_000, 3).await.unwrap().is_some());
}
