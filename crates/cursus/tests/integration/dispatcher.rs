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

//! Dispatch-path tests: delivery, retry/backoff, dead-lettering, sink
//! timeouts, circuit breaking, and mid-flight cancellation.

use std::time::Duration;

use chrono::Utc;

use cursus::{
    DeliveryEventType, NotificationPayload, ReminderAnchors, ReminderRule, RetryPolicy,
    WorkItemStatus,
};

use serial_test::serial;

use crate::fixtures::{
    fast_config, start_harness, wait_for_breaker, wait_for_status, wait_until,
};

/// Scheduling an `Exact(now + ~1 tick)` reminder results in exactly one
/// sink call, a `Sent` status, and a `sent` event carrying the right id.
#[tokio::test]
#[serial]
async fn test_end_to_end_notification_delivery() {
    let harness = start_harness(fast_config()).await;
    let mut events = harness.runner.subscribe();

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now() + chrono::Duration::milliseconds(100)),
            NotificationPayload::new("Standup", "in 15 minutes"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    let notifications = harness.notifications.clone();
    assert!(wait_until(Duration::from_secs(5), || notifications.calls() == 1).await);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, DeliveryEventType::Sent);
    assert_eq!(event.item_id, Some(id.clone()));

    let item = harness
        .runner
        .list_items()
        .await
        .into_iter()
        .find(|i| i.id == id)
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Sent);
    assert_eq!(harness.notifications.sent(), vec![id]);

    harness.runner.shutdown().await;
}

/// Transient failures are retried with backoff until the sink recovers;
/// each failed attempt publishes a `retrying` event.
#[tokio::test]
#[serial]
async fn test_retry_until_success() {
    let harness = start_harness(fast_config()).await;
    let mut events = harness.runner.subscribe();
    harness.notifications.fail_next(2);

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    let notifications = harness.notifications.clone();
    assert!(wait_until(Duration::from_secs(5), || notifications.calls() == 3).await);

    // Events arrive in order: two retries, then the delivery.
    let mut retrying = 0;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event.event_type {
            DeliveryEventType::Retrying => retrying += 1,
            DeliveryEventType::Sent => break,
            other => panic!("unexpected event: {other}"),
        }
    }
    assert_eq!(retrying, 2);

    let item = harness
        .runner
        .list_items()
        .await
        .into_iter()
        .find(|i| i.id == id)
        .unwrap();
    assert_eq!(item.attempts, 2);
    assert_eq!(item.status, WorkItemStatus::Sent);

    harness.runner.shutdown().await;
}

/// Once attempts are exhausted the item dead-letters: the sink is called
/// exactly `max_attempts` times and a `failed` event is published.
#[tokio::test]
#[serial]
async fn test_dead_letter_after_max_attempts() {
    let config = fast_config();
    let max_attempts = config.retry_policy().max_attempts as usize;
    let harness = start_harness(config).await;
    let mut events = harness.runner.subscribe();
    harness.notifications.fail_always(true);

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    assert!(
        wait_for_status(
            &harness.runner,
            &id,
            WorkItemStatus::DeadLettered,
            Duration::from_secs(10)
        )
        .await
    );

    // No further attempts once dead-lettered.
    let calls = harness.notifications.calls();
    assert_eq!(calls, max_attempts);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.notifications.calls(), calls);

    let mut failed = Vec::new();
    while let Some(event) = events.try_recv() {
        if event.event_type == DeliveryEventType::Failed {
            failed.push(event);
        }
    }
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item_id, Some(id));

    harness.runner.shutdown().await;
}

/// A permanent sink rejection dead-letters immediately, without burning
/// through the retry budget.
#[tokio::test]
#[serial]
async fn test_permanent_rejection_skips_retries() {
    let harness = start_harness(fast_config()).await;
    harness.notifications.fail_permanent(true);

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    assert!(
        wait_for_status(
            &harness.runner,
            &id,
            WorkItemStatus::DeadLettered,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(harness.notifications.calls(), 1);

    harness.runner.shutdown().await;
}

/// A sink call that exceeds the timeout counts as a retryable failure
/// instead of hanging the loop.
#[tokio::test]
#[serial]
async fn test_sink_timeout_is_retryable() {
    let config = cursus::DeliveryRunnerConfig::builder()
        .poll_interval(Duration::from_millis(25))
        .push_fallback_interval(Duration::from_millis(25))
        .sink_timeout(Duration::from_millis(100))
        .retry_policy(RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(100),
            jitter: false,
        })
        .breaker_failure_threshold(100)
        .probe_ttl(Duration::from_millis(10))
        .schedule_grace(Duration::from_millis(50))
        .build();
    let harness = start_harness(config).await;

    // The first call sleeps past the timeout; later calls answer
    // promptly.
    harness
        .notifications
        .set_delay(Some(Duration::from_millis(400)));

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    let notifications = harness.notifications.clone();
    assert!(wait_until(Duration::from_secs(5), || notifications.calls() >= 1).await);
    harness.notifications.set_delay(None);

    assert!(
        wait_for_status(
            &harness.runner,
            &id,
            WorkItemStatus::Sent,
            Duration::from_secs(5)
        )
        .await
    );

    let item = harness
        .runner
        .list_items()
        .await
        .into_iter()
        .find(|i| i.id == id)
        .unwrap();
    assert!(item.attempts >= 1);

    harness.runner.shutdown().await;
}

/// After the failure threshold the breaker opens: no sink calls during
/// cooldown (verified by call count), then exactly one trial closes it.
#[tokio::test]
#[serial]
async fn test_circuit_breaker_fast_fails_and_recovers() {
    let config = cursus::DeliveryRunnerConfig::builder()
        .poll_interval(Duration::from_millis(25))
        .push_fallback_interval(Duration::from_millis(25))
        .sink_timeout(Duration::from_secs(2))
        .retry_policy(RetryPolicy {
            max_attempts: 100,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(50),
            jitter: false,
        })
        .breaker_failure_threshold(2)
        .breaker_cooldown(Duration::from_millis(600))
        .probe_ttl(Duration::from_millis(10))
        .schedule_grace(Duration::from_millis(50))
        .build();
    let harness = start_harness(config).await;
    harness.notifications.fail_always(true);

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    // Two real failures open the breaker.
    let notifications = harness.notifications.clone();
    assert!(wait_until(Duration::from_secs(5), || notifications.calls() == 2).await);
    assert!(wait_for_breaker(&harness.runner, true, Duration::from_secs(5)).await);

    // During the cooldown the item keeps rescheduling but the sink is
    // never touched.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(harness.notifications.calls(), 2);

    // Let the trial succeed: one more call closes the breaker and
    // delivers the item.
    harness.notifications.fail_always(false);
    assert!(
        wait_for_status(
            &harness.runner,
            &id,
            WorkItemStatus::Sent,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(harness.notifications.calls(), 3);
    assert!(!harness.runner.queue_status().await.breaker_open);

    harness.runner.shutdown().await;
}

/// Cancelling an in-flight item does not interrupt the sink call, but the
/// late result is discarded and the item stays cancelled.
#[tokio::test]
#[serial]
async fn test_cancel_in_flight_discards_result() {
    let harness = start_harness(fast_config()).await;
    harness
        .notifications
        .set_delay(Some(Duration::from_millis(400)));

    let id = harness
        .runner
        .schedule_notification(
            &ReminderRule::Exact(Utc::now()),
            NotificationPayload::new("t", "m"),
            &ReminderAnchors::default(),
        )
        .await
        .unwrap();

    // Wait until the dispatch is inside the sink call, then cancel.
    let notifications = harness.notifications.clone();
    assert!(wait_until(Duration::from_secs(5), || notifications.calls() == 1).await);
    assert!(harness.runner.cancel_notification(&id).await.unwrap());

    // Let the sink call finish; the success must be discarded.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let item = harness
        .runner
        .list_items()
        .await
        .into_iter()
        .find(|i| i.id == id)
        .unwrap();
    assert_eq!(item.status, WorkItemStatus::Cancelled);

    harness.runner.shutdown().await;
}
