/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Concurrency and durability tests for the work queue.
//!
//! These verify the at-most-one-concurrent-dispatch guarantee, the
//! monotonic state machine, per-entity FIFO gating, crash recovery, and
//! retention sweeping.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Barrier;

use cursus::{
    CorrelationId, DurableQueue, MemoryStore, MutationPayload, NotificationPayload,
    QueueError, WorkItem, WorkItemStatus,
};

fn note(id: &str) -> WorkItem {
    WorkItem::notification(
        CorrelationId::from(id),
        NotificationPayload::new("title", "message"),
        Utc::now() - Duration::seconds(1),
    )
}

fn update(id: &str, entity: &str) -> WorkItem {
    WorkItem::mutation(
        CorrelationId::from(id),
        MutationPayload::update(
            "task",
            entity.into(),
            BTreeMap::from([("title".to_string(), serde_json::json!(id))]),
        ),
    )
}

/// Concurrently claiming the same id yields exactly one success and one
/// `AlreadyInFlight`.
#[tokio::test]
async fn test_concurrent_mark_in_flight_one_winner() {
    let queue = Arc::new(DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap());
    queue.enqueue(note("contested")).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let queue = queue.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            queue.mark_in_flight(&"contested".into()).await
        }));
    }

    let mut successes = 0;
    let mut already_in_flight = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => successes += 1,
            Err(QueueError::AlreadyInFlight { .. }) => already_in_flight += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(already_in_flight, 1);
}

/// Many workers claiming from a full queue never claim the same item twice.
#[tokio::test]
async fn test_concurrent_claiming_no_duplicates() {
    let queue = Arc::new(DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap());

    const NUM_ITEMS: usize = 20;
    for i in 0..NUM_ITEMS {
        queue.enqueue(note(&format!("item-{i}"))).await.unwrap();
    }

    const NUM_WORKERS: usize = 8;
    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();

    for _ in 0..NUM_WORKERS {
        let queue = queue.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            for _ in 0..NUM_ITEMS {
                for item in queue.dequeue_due(Utc::now(), 2).await {
                    if queue.mark_in_flight(&item.id).await.is_ok() {
                        claimed.push(item.id);
                    }
                }
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all_claimed.iter().cloned().collect();
    assert_eq!(
        unique.len(),
        all_claimed.len(),
        "an item was claimed by more than one worker"
    );
    assert_eq!(unique.len(), NUM_ITEMS, "every item should be claimed once");
}

/// Attempts only increase and nothing transitions out of a terminal state.
#[tokio::test]
async fn test_monotonic_state_machine() {
    let queue = DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap();
    queue.enqueue(note("a")).await.unwrap();
    let id = CorrelationId::from("a");

    // Fail twice, then deliver.
    queue.mark_in_flight(&id).await.unwrap();
    queue
        .schedule_retry(&id, Utc::now() - Duration::seconds(1), "first failure")
        .await
        .unwrap();
    assert_eq!(queue.get(&id).await.unwrap().attempts, 1);

    queue.mark_in_flight(&id).await.unwrap();
    queue
        .schedule_retry(&id, Utc::now() - Duration::seconds(1), "second failure")
        .await
        .unwrap();
    assert_eq!(queue.get(&id).await.unwrap().attempts, 2);

    queue.mark_in_flight(&id).await.unwrap();
    queue.mark_delivered(&id).await.unwrap();
    let item = queue.get(&id).await.unwrap();
    assert_eq!(item.status, WorkItemStatus::Sent);
    assert_eq!(item.attempts, 2);

    // Terminal: no re-claim, no retry, no dead-letter.
    assert!(matches!(
        queue.mark_in_flight(&id).await,
        Err(QueueError::TerminalState { .. })
    ));
    assert!(matches!(
        queue.schedule_retry(&id, Utc::now(), "late").await,
        Err(QueueError::TerminalState { .. })
    ));
    assert!(matches!(
        queue.mark_dead_lettered(&id, "late").await,
        Err(QueueError::TerminalState { .. })
    ));
}

/// Mutations for one entity come out strictly in enqueue order; a later
/// mutation is withheld while an earlier one is unresolved.
#[tokio::test]
async fn test_per_entity_fifo_gating() {
    let queue = DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap();

    queue.enqueue(update("m1", "task-1")).await.unwrap();
    queue.enqueue(update("m2", "task-1")).await.unwrap();
    queue.enqueue(update("other", "task-2")).await.unwrap();

    // Only the head of task-1's line plus the unrelated entity are due.
    let due: Vec<String> = queue
        .dequeue_due(Utc::now(), 10)
        .await
        .iter()
        .map(|i| i.id.to_string())
        .collect();
    assert_eq!(due, vec!["m1".to_string(), "other".to_string()]);

    // While m1 is in flight, m2 stays gated.
    queue.mark_in_flight(&"m1".into()).await.unwrap();
    let due: Vec<String> = queue
        .dequeue_due(Utc::now(), 10)
        .await
        .iter()
        .map(|i| i.id.to_string())
        .collect();
    assert_eq!(due, vec!["other".to_string()]);

    // Once m1 resolves, m2 becomes eligible.
    queue.mark_delivered(&"m1".into()).await.unwrap();
    let due: Vec<String> = queue
        .dequeue_due(Utc::now(), 10)
        .await
        .iter()
        .map(|i| i.id.to_string())
        .collect();
    assert_eq!(due, vec!["m2".to_string(), "other".to_string()]);
}

/// Items left in flight by a crash are demoted to pending on reopen, so a
/// restart never strands work.
#[tokio::test]
async fn test_reopen_demotes_in_flight_items() {
    let store = Arc::new(MemoryStore::new());

    {
        let queue = DurableQueue::open(store.clone()).await.unwrap();
        queue.enqueue(note("interrupted")).await.unwrap();
        queue.mark_in_flight(&"interrupted".into()).await.unwrap();
        // Process "crashes" here: the queue is dropped mid-dispatch.
    }

    let reopened = DurableQueue::open(store).await.unwrap();
    let item = reopened.get(&"interrupted".into()).await.unwrap();
    assert_eq!(item.status, WorkItemStatus::Pending);

    // The recovered item is dispatchable again.
    assert_eq!(reopened.dequeue_due(Utc::now(), 10).await.len(), 1);
}

/// Sequence numbers survive a reopen, so FIFO order is stable across
/// restarts.
#[tokio::test]
async fn test_reopen_preserves_order() {
    let store = Arc::new(MemoryStore::new());

    {
        let queue = DurableQueue::open(store.clone()).await.unwrap();
        queue.enqueue(update("m1", "task-1")).await.unwrap();
        queue.enqueue(update("m2", "task-1")).await.unwrap();
    }

    let reopened = DurableQueue::open(store).await.unwrap();
    let due = reopened.dequeue_due(Utc::now(), 10).await;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id.to_string(), "m1");

    // New enqueues continue the sequence instead of colliding with it.
    reopened.enqueue(update("m3", "task-1")).await.unwrap();
    let m2 = reopened.get(&"m2".into()).await.unwrap();
    let m3 = reopened.get(&"m3".into()).await.unwrap();
    assert!(m3.seq > m2.seq);
}

/// The sweeper removes terminal items past the retention window and leaves
/// everything else alone.
#[tokio::test]
async fn test_sweep_respects_retention_window() {
    let queue = DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap();

    queue.enqueue(note("done")).await.unwrap();
    queue.enqueue(note("live")).await.unwrap();
    queue.mark_in_flight(&"done".into()).await.unwrap();
    queue.mark_delivered(&"done".into()).await.unwrap();

    // Within retention: nothing is removed.
    let removed = queue
        .sweep_terminal(Utc::now(), Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(removed, 0);

    // Past retention: the terminal item goes, the pending one stays.
    let removed = queue
        .sweep_terminal(Utc::now() + Duration::hours(2), Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(queue.get(&"done".into()).await.is_none());
    assert!(queue.get(&"live".into()).await.is_some());
}

/// Cancelled items drop out of the pending count immediately.
#[tokio::test]
async fn test_cancel_then_counts() {
    let queue = DurableQueue::open(Arc::new(MemoryStore::new())).await.unwrap();

    queue.enqueue(note("a")).await.unwrap();
    queue.enqueue(note("b")).await.unwrap();
    queue.cancel(&"a".into()).await.unwrap();

    let counts = queue.counts().await;
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.in_flight, 0);
    assert_eq!(counts.dead_lettered, 0);
}
