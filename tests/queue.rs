//! Queue behaviour against the in-process store: claiming, outcome
//! reporting, and stuck-item recovery.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use reportq::models::notification::{empty_meta, NewNotification, Notification, NotificationStatus};
use reportq::models::report::NewReport;
use reportq::queue::{NotificationQueue, QueueConfig};
use reportq::store::memory::MemoryStore;
use reportq::store::ReportStore;
use uuid::Uuid;

fn setup() -> (Arc<MemoryStore>, NotificationQueue) {
    let store = Arc::new(MemoryStore::new());
    let queue = NotificationQueue::new(store.clone(), QueueConfig::default());
    (store, queue)
}

async fn enqueue(queue: &NotificationQueue, sender_method: &str, text: &str) -> Notification {
    queue
        .enqueue(NewNotification {
            user_id: Uuid::new_v4(),
            sender_method: sender_method.to_string(),
            text: Some(text.to_string()),
            report_id: None,
            meta: empty_meta(),
        })
        .await
        .unwrap()
}

fn ids(batch: &[Notification]) -> Vec<i64> {
    batch.iter().map(|n| n.id).collect()
}

/// Push `updated_at` far enough back that the row looks abandoned.
async fn make_stale(store: &MemoryStore, id: i64) {
    let stale = Utc::now() - Duration::minutes(10);
    assert!(store.set_updated_at(id, stale).await);
}

// ═══════════════════════════════════════════════════════════════════
//  Reservation
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_end_to_end_reserve_and_complete() {
    let (_, queue) = setup();
    let first = enqueue(&queue, "telegram", "one").await;
    let second = enqueue(&queue, "telegram", "two").await;
    let third = enqueue(&queue, "telegram", "three").await;

    let batch = queue.reserve("telegram", 2).await.unwrap();
    assert_eq!(ids(&batch), vec![first.id, second.id]);
    assert!(batch.iter().all(|n| n.status == NotificationStatus::InProgress));

    let counts = queue.report_outcome(&ids(&batch), &[]).await.unwrap();
    assert_eq!(counts.success_count, 2);
    assert_eq!(counts.failed_count, 0);

    let rest = queue.reserve("telegram", 10).await.unwrap();
    assert_eq!(ids(&rest), vec![third.id]);
}

#[tokio::test]
async fn test_reserve_is_fifo_within_sender_method() {
    let (_, queue) = setup();
    let mut expected = Vec::new();
    for i in 0..5 {
        expected.push(enqueue(&queue, "email", &format!("msg {}", i)).await.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let batch = queue.reserve("email", 100).await.unwrap();
    assert_eq!(ids(&batch), expected);
    assert!(batch.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
async fn test_reserve_is_scoped_to_sender_method() {
    let (_, queue) = setup();
    let tg = enqueue(&queue, "telegram", "tg").await;
    enqueue(&queue, "email", "mail").await;

    let batch = queue.reserve("telegram", 10).await.unwrap();
    assert_eq!(ids(&batch), vec![tg.id]);

    let batch = queue.reserve("push", 10).await.unwrap();
    assert!(batch.is_empty(), "unknown sender method yields an empty batch");
}

#[tokio::test]
async fn test_reserve_limit_is_clamped() {
    let (_, queue) = setup();
    for i in 0..150 {
        enqueue(&queue, "telegram", &format!("bulk {}", i)).await;
    }

    assert_eq!(queue.reserve("telegram", 500).await.unwrap().len(), 100);
    assert_eq!(queue.reserve("telegram", 0).await.unwrap().len(), 1);
    assert_eq!(queue.reserve("telegram", -3).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reserve_on_empty_queue_is_not_an_error() {
    let (_, queue) = setup();
    let batch = queue.reserve("telegram", 10).await.unwrap();
    assert!(batch.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_share_an_id() {
    let (_, queue) = setup();
    for i in 0..200 {
        enqueue(&queue, "telegram", &format!("n{}", i)).await;
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = queue.reserve("telegram", 7).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|n| n.id));
                tokio::task::yield_now().await;
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.await.unwrap() {
            total += 1;
            assert!(seen.insert(id), "id {} claimed twice", id);
        }
    }
    assert_eq!(total, 200);
}

#[tokio::test]
async fn test_report_text_substituted_in_view_only() {
    let (store, queue) = setup();
    let (report, notification) = store
        .create_report(
            NewReport {
                user_id: Uuid::new_v4(),
                report_type: "week".into(),
                result: "You ate well this week.".into(),
            },
            Some("telegram"),
        )
        .await
        .unwrap();
    let notification = notification.expect("sender_method given, notification expected");
    assert_eq!(notification.report_id, Some(report.id));
    assert!(notification.text.is_none());
    assert_eq!(notification.meta["report_type"], "week");

    let literal = enqueue(&queue, "telegram", "plain").await;

    let batch = queue.reserve("telegram", 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, notification.id);
    assert_eq!(batch[0].text.as_deref(), Some("You ate well this week."));
    assert_eq!(batch[1].id, literal.id);
    assert_eq!(batch[1].text.as_deref(), Some("plain"));

    let stored = store.get(notification.id).await.unwrap();
    assert!(stored.text.is_none(), "stored text must stay untouched");
    assert_eq!(stored.status, NotificationStatus::InProgress);
}

#[tokio::test]
async fn test_report_without_sender_method_queues_nothing() {
    let (store, queue) = setup();
    let (_, notification) = store
        .create_report(
            NewReport {
                user_id: Uuid::new_v4(),
                report_type: "day".into(),
                result: "text".into(),
            },
            None,
        )
        .await
        .unwrap();
    assert!(notification.is_none());
    assert!(queue.reserve("telegram", 10).await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════
//  Outcome reporting
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_success_is_counted_once() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "hi").await;
    queue.reserve("telegram", 1).await.unwrap();

    let first = queue.report_outcome(&[n.id], &[]).await.unwrap();
    let second = queue.report_outcome(&[n.id], &[]).await.unwrap();
    assert_eq!(first.success_count, 1);
    assert_eq!(second.success_count, 0);
    assert_eq!(store.get(n.id).await.unwrap().status, NotificationStatus::Success);
}

#[tokio::test]
async fn test_success_and_failed_in_one_call() {
    let (store, queue) = setup();
    let a = enqueue(&queue, "email", "a").await;
    let b = enqueue(&queue, "email", "b").await;
    queue.reserve("email", 10).await.unwrap();

    let counts = queue.report_outcome(&[a.id], &[b.id, 9999]).await.unwrap();
    assert_eq!(counts.success_count, 1);
    assert_eq!(counts.failed_count, 1);
    assert_eq!(store.get(b.id).await.unwrap().status, NotificationStatus::Failed);

    // failed is final: a late success report is ignored
    let late = queue.report_outcome(&[b.id], &[]).await.unwrap();
    assert_eq!(late.success_count, 0);
    assert_eq!(store.get(b.id).await.unwrap().status, NotificationStatus::Failed);
}

#[tokio::test]
async fn test_outcome_ignores_unclaimed_ids() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "never claimed").await;

    let counts = queue.report_outcome(&[n.id], &[]).await.unwrap();
    assert_eq!(counts.success_count, 0);
    assert_eq!(store.get(n.id).await.unwrap().status, NotificationStatus::New);

    let counts = queue.report_outcome(&[], &[]).await.unwrap();
    assert_eq!(counts.success_count + counts.failed_count, 0);
}

// ═══════════════════════════════════════════════════════════════════
//  Recovery sweep
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sweep_requeues_stale_claim() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "stuck").await;
    queue.reserve("telegram", 1).await.unwrap();
    make_stale(&store, n.id).await;

    let outcome = queue.sweep().await.unwrap();
    assert_eq!(outcome.requeued, vec![n.id]);
    assert!(outcome.errored.is_empty());

    let row = store.get(n.id).await.unwrap();
    assert_eq!(row.status, NotificationStatus::New);
    assert_eq!(row.retry_count, 1);

    let again = queue.reserve("telegram", 1).await.unwrap();
    assert_eq!(ids(&again), vec![n.id]);
}

#[tokio::test]
async fn test_sweep_errors_exhausted_claim() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "stuck forever").await;
    assert!(store.force_state(n.id, NotificationStatus::InProgress, 2).await);
    make_stale(&store, n.id).await;

    let outcome = queue.sweep().await.unwrap();
    assert_eq!(outcome.errored, vec![n.id]);

    let row = store.get(n.id).await.unwrap();
    assert_eq!(row.status, NotificationStatus::Error);
    assert_eq!(row.retry_count, 2, "retry_count is not bumped on the error path");
}

#[tokio::test]
async fn test_sweep_leaves_fresh_claims_alone() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "working on it").await;
    queue.reserve("telegram", 1).await.unwrap();
    let before = store.get(n.id).await.unwrap();

    let outcome = queue.sweep().await.unwrap();
    assert!(outcome.is_empty());
    assert_eq!(store.get(n.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_sweep_ignores_other_states() {
    let (store, queue) = setup();
    let fresh = enqueue(&queue, "telegram", "new").await;
    let done = enqueue(&queue, "email", "done").await;
    queue.reserve("email", 1).await.unwrap();
    queue.report_outcome(&[done.id], &[]).await.unwrap();
    make_stale(&store, fresh.id).await;
    make_stale(&store, done.id).await;

    assert!(queue.sweep().await.unwrap().is_empty());
    assert_eq!(store.get(fresh.id).await.unwrap().status, NotificationStatus::New);
    assert_eq!(store.get(done.id).await.unwrap().status, NotificationStatus::Success);
}

#[tokio::test]
async fn test_abandoned_item_ends_in_error_after_retries() {
    let (store, queue) = setup();
    let n = enqueue(&queue, "telegram", "crashy worker").await;

    // max_retry_count = 2: two requeues, then error
    for expected_retry in 1..=2 {
        assert_eq!(ids(&queue.reserve("telegram", 1).await.unwrap()), vec![n.id]);
        make_stale(&store, n.id).await;
        queue.sweep().await.unwrap();
        let row = store.get(n.id).await.unwrap();
        assert_eq!(row.status, NotificationStatus::New);
        assert_eq!(row.retry_count, expected_retry);
    }

    queue.reserve("telegram", 1).await.unwrap();
    make_stale(&store, n.id).await;
    queue.sweep().await.unwrap();
    let row = store.get(n.id).await.unwrap();
    assert_eq!(row.status, NotificationStatus::Error);
    assert_eq!(row.retry_count, 2);
    assert!(queue.reserve("telegram", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_for_user_returns_all_states() {
    let (_, queue) = setup();
    let user_id = Uuid::new_v4();
    for sender in ["telegram", "email"] {
        queue
            .enqueue(NewNotification {
                user_id,
                sender_method: sender.into(),
                text: None,
                report_id: None,
                meta: empty_meta(),
            })
            .await
            .unwrap();
    }
    let claimed = queue.reserve("telegram", 1).await.unwrap();
    assert_eq!(claimed.len(), 1);
    enqueue(&queue, "telegram", "someone else").await;

    let rows = queue.list_for_user(user_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|n| n.status == NotificationStatus::InProgress));
    assert!(rows.iter().any(|n| n.status == NotificationStatus::New));
}
