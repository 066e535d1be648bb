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

//! End-to-end scenarios through the runner facade: offline mutation flow
//! with id remapping, per-entity ordering, entity-wide cancellation, and
//! availability-driven mode switching.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use cursus::{
    DeliveryEventType, EntityId, MutationPayload, NotificationPayload, ReminderAnchors,
    ReminderRule, TransportMode, WorkItemStatus,
};

use serial_test::serial;

use crate::fixtures::{fast_config, start_harness, wait_for_status, wait_until};

fn fields(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// The offline-first scenario: a mutation enqueued while disconnected
/// returns a provisional entity immediately; once connectivity returns,
/// it dispatches, the server id replaces the temporary id everywhere, and
/// no pending mutations remain.
#[tokio::test]
#[serial]
async fn test_offline_mutation_reconciles_after_reconnect() {
    // Plenty of retry budget: the mutation keeps failing for as long as
    // the test holds the backend offline.
    let config = cursus::DeliveryRunnerConfig::builder()
        .poll_interval(Duration::from_millis(25))
        .push_fallback_interval(Duration::from_millis(25))
        .retry_policy(cursus::RetryPolicy {
            max_attempts: 1000,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(50),
            jitter: false,
        })
        .breaker_failure_threshold(100_000)
        .probe_interval(Duration::from_millis(50))
        .probe_ttl(Duration::from_millis(10))
        .schedule_grace(Duration::from_millis(50))
        .build();
    let harness = start_harness(config).await;
    let mut events = harness.runner.subscribe();

    // Go offline: probe down, backend unreachable.
    harness.probe.set(false);
    harness.mutations.set_offline(true);

    let entity = harness
        .runner
        .enqueue_mutation(MutationPayload::create(
            "task",
            fields(&[("title", json!("Buy milk"))]),
        ))
        .await
        .unwrap();

    // Immediate optimistic feedback with a temporary id.
    let provisional = entity.id.clone();
    assert!(provisional.is_provisional());
    assert_eq!(entity.fields.get("title"), Some(&json!("Buy milk")));
    assert_eq!(entity.pending_mutation_ids.len(), 1);

    // The monitor notices the outage and switches to poll mode.
    let runner = &harness.runner;
    assert!(
        wait_until(Duration::from_secs(5), || {
            runner.transport_mode() == TransportMode::Poll
        })
        .await
    );

    // Connectivity returns.
    harness.probe.set(true);
    harness.mutations.set_offline(false);

    // The mutation dispatches and the provisional id is remapped.
    let mutation_id = entity.pending_mutation_ids[0].clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            harness.mutations.applied().contains(&mutation_id)
        })
        .await
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            runner.resolve_entity_id(&provisional) != provisional
        })
        .await
    );

    let server_id = harness.runner.resolve_entity_id(&provisional);
    assert!(!server_id.is_provisional());

    // The old handle still reaches the entity, now fully reconciled.
    let reconciled = harness.runner.entity(&provisional).unwrap();
    assert_eq!(reconciled.id, server_id);
    assert!(reconciled.pending_mutation_ids.is_empty());

    // Applied and id-remapped events were published for the mutation.
    let mut saw_applied = false;
    let mut saw_remap = false;
    while !(saw_applied && saw_remap) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event.event_type {
            DeliveryEventType::Applied => {
                assert_eq!(event.item_id, Some(mutation_id.clone()));
                saw_applied = true;
            }
            DeliveryEventType::IdRemapped => saw_remap = true,
            _ => {}
        }
    }

    harness.runner.shutdown().await;
}

/// Mutations of one entity reach the remote in enqueue order even when the
/// first one has to retry.
#[tokio::test]
#[serial]
async fn test_per_entity_mutations_apply_in_order() {
    let harness = start_harness(fast_config()).await;
    let entity_id = EntityId::from("task-7");

    // The first dispatch attempt fails once, forcing a backoff retry; the
    // second mutation must still wait its turn.
    harness.mutations.fail_next(1);

    let first = harness
        .runner
        .enqueue_mutation(MutationPayload::update(
            "task",
            entity_id.clone(),
            fields(&[("title", json!("v1"))]),
        ))
        .await
        .unwrap();
    let second = harness
        .runner
        .enqueue_mutation(MutationPayload::update(
            "task",
            entity_id.clone(),
            fields(&[("title", json!("v2"))]),
        ))
        .await
        .unwrap();

    let first_id = first.pending_mutation_ids[0].clone();
    let second_id = second.pending_mutation_ids[1].clone();

    let mutations = harness.mutations.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            mutations.applied().len() == 2
        })
        .await
    );
    assert_eq!(mutations.applied(), vec![first_id, second_id]);

    harness.runner.shutdown().await;
}

/// `cancel_all_for_entity` cancels both reminders and queued mutations for
/// the entity and publishes a cancelled event per item.
#[tokio::test]
#[serial]
async fn test_cancel_all_for_entity() {
    let harness = start_harness(fast_config()).await;
    let mut events = harness.runner.subscribe();
    let entity_id = EntityId::from("task-9");

    // Keep everything queued: reminder far in the future, backend down so
    // the mutation keeps retrying.
    harness.mutations.set_offline(true);

    harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now() + chrono::Duration::hours(1)),
            NotificationPayload::new("Reminder", "soon").for_entity(entity_id.clone()),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();
    harness
        .runner
        .enqueue_mutation(MutationPayload::update(
            "task",
            entity_id.clone(),
            fields(&[("title", json!("v1"))]),
        ))
        .await
        .unwrap();

    let cancelled = harness.runner.cancel_all_for_entity(&entity_id).await.unwrap();
    assert_eq!(cancelled, 2);

    // Everything for the entity is terminal now.
    for item in harness.runner.list_items().await {
        assert_eq!(item.status, WorkItemStatus::Cancelled);
    }

    let mut cancelled_events = 0;
    while let Some(event) = events.try_recv() {
        if event.event_type == DeliveryEventType::Cancelled {
            cancelled_events += 1;
        }
    }
    assert_eq!(cancelled_events, 2);

    harness.runner.shutdown().await;
}

/// Queue status counts pending work and reflects the breaker state.
#[tokio::test]
#[serial]
async fn test_queue_status_reflects_pending_work() {
    let harness = start_harness(fast_config()).await;

    let status = harness.runner.queue_status().await;
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.in_flight_count, 0);
    assert!(!status.breaker_open);

    harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now() + chrono::Duration::hours(1)),
            NotificationPayload::new("Later", "much later"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    let status = harness.runner.queue_status().await;
    assert_eq!(status.pending_count, 1);

    harness.runner.shutdown().await;
}

/// A dead-lettered mutation rolls back its optimistic overlay and surfaces
/// `rejected` and `failed` events; unrelated pending edits are untouched.
#[tokio::test]
#[serial]
async fn test_rejected_mutation_rolls_back_overlay() {
    let harness = start_harness(fast_config()).await;
    let mut events = harness.runner.subscribe();
    let entity_id = EntityId::from("task-3");

    // Seed a confirmed write, then a write the backend will reject.
    let seeded = harness
        .runner
        .enqueue_mutation(MutationPayload::update(
            "task",
            entity_id.clone(),
            fields(&[("title", json!("original")), ("done", json!(false))]),
        ))
        .await
        .unwrap();
    let seed_id = seeded.pending_mutation_ids[0].clone();
    let mutations = harness.mutations.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            mutations.applied().contains(&seed_id)
        })
        .await
    );

    let doomed = harness
        .runner
        .enqueue_mutation(MutationPayload::update(
            "task",
            entity_id.clone(),
            fields(&[("title", json!("renamed"))]),
        ))
        .await
        .unwrap();
    let doomed_id = doomed.pending_mutation_ids.last().unwrap().clone();
    harness.mutations.reject(doomed_id.clone());

    // Optimistic view shows the rename until the rejection lands.
    assert_eq!(
        harness.runner.entity(&entity_id).unwrap().fields.get("title"),
        Some(&json!("renamed"))
    );

    assert!(
        wait_for_status(
            &harness.runner,
            &doomed_id,
            WorkItemStatus::DeadLettered,
            Duration::from_secs(5)
        )
        .await
    );

    // The rejection and dead-letter are surfaced per entity.
    let mut saw_rejected = false;
    let mut saw_failed = false;
    while !(saw_rejected && saw_failed) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event.event_type {
            DeliveryEventType::Rejected if event.item_id == Some(doomed_id.clone()) => {
                saw_rejected = true;
            }
            DeliveryEventType::Failed if event.item_id == Some(doomed_id.clone()) => {
                saw_failed = true;
            }
            _ => {}
        }
    }

    // Rolled back to the confirmed value; the unrelated field survives.
    let entity = harness.runner.entity(&entity_id).unwrap();
    assert_eq!(entity.fields.get("title"), Some(&json!("original")));
    assert_eq!(entity.fields.get("done"), Some(&json!(false)));
    assert!(entity.pending_mutation_ids.is_empty());

    harness.runner.shutdown().await;
}

/// Shutdown is idempotent and stops dispatching new work.
#[tokio::test]
#[serial]
async fn test_shutdown_is_idempotent() {
    let harness = start_harness(fast_config()).await;

    harness.runner.shutdown().await;
    harness.runner.shutdown().await;

    // Enqueues still persist durably after shutdown, but nothing
    // dispatches them until a new runner opens the store.
    harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.notifications.calls(), 0);
}
