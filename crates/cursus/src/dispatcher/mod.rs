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

//! Dispatcher Module
//!
//! The dispatcher is the single component allowed to move work items from
//! `Pending`/`Failed` into `InFlight` and onward. It runs as one
//! continuously active background loop per runner:
//!
//! 1. Wake on a signal from enqueuers, or on a poll tick (the poll
//!    interval tracks the availability monitor's mode: long fallback while
//!    push updates flow, short interval while polling). Correctness never
//!    depends on the wake signal.
//! 2. Claim due items through the queue's compare-and-set transitions and
//!    dispatch them on a bounded worker pool (semaphore permits), one
//!    in-flight attempt per item id.
//! 3. Call the external sink under a bounded timeout; a timeout counts as
//!    a retryable failure rather than hanging the loop.
//! 4. On success, record the terminal state, reconcile mutations into the
//!    optimistic mirror, and publish events. On failure, schedule a
//!    backoff retry or dead-letter the item once attempts are exhausted.
//!
//! A circuit breaker sits in front of the sinks: after a streak of
//! failures, due items are rescheduled without touching the sink at all
//! until the cooldown elapses and a single trial closes or re-opens it.
//! Fast-failed attempts count neither toward `attempts` nor toward the
//! breaker's failure streak.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::availability::{AvailabilityMonitor, TransportMode};
use crate::error::{QueueError, SinkError};
use crate::events::EventBus;
use crate::models::circuit_breaker::{BreakerDecision, CircuitBreaker};
use crate::models::delivery_event::{DeliveryEvent, DeliveryEventType};
use crate::models::work_item::{WorkItem, WorkItemKind};
use crate::optimistic::OptimisticStore;
use crate::queue::{DurableQueue, TransitionOutcome};
use crate::retry::RetryPolicy;
use crate::sink::{MutationSink, NotificationSink, RemoteAck};

pub mod wake;

pub use wake::WakeSignal;

/// Tuning for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrent dispatches (bounded worker pool).
    pub max_concurrent: usize,
    /// Poll interval while the transport is down (poll mode).
    pub poll_interval: Duration,
    /// Poll fallback interval while push updates flow (push mode).
    pub push_fallback_interval: Duration,
    /// Bound on a single sink call.
    pub sink_timeout: Duration,
    /// Retry limits and backoff.
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            poll_interval: Duration::from_millis(500),
            push_fallback_interval: Duration::from_secs(30),
            sink_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Background worker that drains the durable queue into the remote sinks.
pub struct Dispatcher {
    queue: Arc<DurableQueue>,
    notification_sink: Arc<dyn NotificationSink>,
    mutation_sink: Arc<dyn MutationSink>,
    optimistic: Arc<OptimisticStore>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    bus: Arc<EventBus>,
    wake: Arc<WakeSignal>,
    monitor: Arc<AvailabilityMonitor>,
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Wires up a dispatcher. Nothing runs until [`run`](Self::run).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DurableQueue>,
        notification_sink: Arc<dyn NotificationSink>,
        mutation_sink: Arc<dyn MutationSink>,
        optimistic: Arc<OptimisticStore>,
        breaker: Arc<Mutex<CircuitBreaker>>,
        bus: Arc<EventBus>,
        wake: Arc<WakeSignal>,
        monitor: Arc<AvailabilityMonitor>,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            queue,
            notification_sink,
            mutation_sink,
            optimistic,
            breaker,
            bus,
            wake,
            monitor,
            semaphore,
            config,
        }
    }

    /// Main dispatch loop. Returns once `shutdown` is set and the current
    /// tick finishes; in-flight sink calls complete in the background.
    pub async fn run(self: Arc<Self>, shutdown: Arc<AtomicBool>, stop: Arc<Notify>) {
        info!(
            max_concurrent = self.config.max_concurrent,
            "Starting dispatcher"
        );

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            self.drain_due().await;

            let fallback = match self.monitor.mode() {
                TransportMode::Push => self.config.push_fallback_interval,
                TransportMode::Poll => self.config.poll_interval,
            };
            tokio::select! {
                _ = stop.notified() => {}
                _ = self.wake.wait(fallback) => {}
            }
        }

        debug!("Dispatcher stopped");
    }

    /// Claims and spawns dispatches for everything currently due, within
    /// the concurrency budget.
    async fn drain_due(self: &Arc<Self>) {
        loop {
            let free = self.semaphore.available_permits();
            if free == 0 {
                debug!("All dispatch slots busy, skipping drain");
                return;
            }

            let due = self.queue.dequeue_due(Utc::now(), free).await;
            if due.is_empty() {
                return;
            }

            let mut claimed = 0usize;
            for item in due {
                let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                    break;
                };

                match self.queue.mark_in_flight(&item.id).await {
                    Ok(()) => {}
                    Err(QueueError::AlreadyInFlight { .. }) => {
                        // Lost the claim race; the winner dispatches it.
                        debug!(id = %item.id, "Item already in flight, skipping");
                        continue;
                    }
                    Err(QueueError::TerminalState { .. }) => {
                        // Cancelled between the due scan and the claim.
                        debug!(id = %item.id, "Item finished before claim, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(id = %item.id, error = %e, "Failed to claim work item");
                        continue;
                    }
                }

                claimed += 1;
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _permit = permit;
                    this.dispatch(item).await;
                });
            }

            if claimed == 0 {
                return;
            }
        }
    }

    /// Dispatches one claimed item end to end.
    async fn dispatch(&self, item: WorkItem) {
        let decision = self.breaker.lock().assess(Utc::now());
        if decision == BreakerDecision::FailFast {
            self.fail_fast(&item).await;
            return;
        }

        debug!(
            id = %item.id,
            kind = %item.kind,
            attempt = item.attempts + 1,
            trial = decision == BreakerDecision::AllowTrial,
            "Dispatching work item"
        );

        match self.call_sink(&item).await {
            Ok(ack) => self.complete(&item, ack).await,
            Err(err) => self.handle_failure(&item, err).await,
        }
    }

    /// Calls the appropriate sink under the configured timeout.
    async fn call_sink(&self, item: &WorkItem) -> Result<Option<RemoteAck>, SinkError> {
        match item.kind {
            WorkItemKind::Notification => {
                match tokio::time::timeout(
                    self.config.sink_timeout,
                    self.notification_sink.send(item),
                )
                .await
                {
                    Ok(Ok(())) => Ok(None),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SinkError::timeout()),
                }
            }
            WorkItemKind::Mutation => {
                match tokio::time::timeout(self.config.sink_timeout, self.mutation_sink.apply(item))
                    .await
                {
                    Ok(Ok(ack)) => Ok(Some(ack)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SinkError::timeout()),
                }
            }
        }
    }

    /// Circuit-open path: reschedule with the standard backoff without
    /// touching the sink. Counts neither an attempt nor a breaker failure.
    async fn fail_fast(&self, item: &WorkItem) {
        let delay = self.config.retry.delay(item.attempts);
        let retry_at = Utc::now() + to_chrono(delay);

        match self
            .queue
            .defer_retry(&item.id, retry_at, "circuit breaker open")
            .await
        {
            Ok(TransitionOutcome::Applied) => {
                counter!("cursus_dispatch_total", "kind" => item.kind.as_str(), "outcome" => "circuit_open")
                    .increment(1);
                debug!(id = %item.id, retry_at = %retry_at, "Circuit open, dispatch fast-failed");
                self.bus.publish(DeliveryEvent::item_event(
                    DeliveryEventType::Retrying,
                    item.id.clone(),
                    Some("circuit breaker open".to_string()),
                ));
            }
            Ok(TransitionOutcome::DiscardedCancelled) => {}
            Err(e) => warn!(id = %item.id, error = %e, "Failed to defer item past open circuit"),
        }
    }

    /// Success path: terminal state, breaker reset, reconciliation, events.
    async fn complete(&self, item: &WorkItem, ack: Option<RemoteAck>) {
        self.breaker.lock().record_success();

        match self.queue.mark_delivered(&item.id).await {
            Ok(TransitionOutcome::Applied) => {
                counter!("cursus_dispatch_total", "kind" => item.kind.as_str(), "outcome" => "delivered")
                    .increment(1);
                info!(id = %item.id, kind = %item.kind, "Work item delivered");

                let event_type = match item.kind {
                    WorkItemKind::Notification => DeliveryEventType::Sent,
                    WorkItemKind::Mutation => DeliveryEventType::Applied,
                };
                self.bus.publish(DeliveryEvent::item_event(
                    event_type,
                    item.id.clone(),
                    None,
                ));

                if item.kind == WorkItemKind::Mutation {
                    let remote = ack.and_then(|a| a.entity);
                    if let Some(remap) = self.optimistic.confirm(&item.id, remote.as_ref()) {
                        self.bus.publish(DeliveryEvent::item_event(
                            DeliveryEventType::IdRemapped,
                            item.id.clone(),
                            Some(format!("{} -> {}", remap.old, remap.new)),
                        ));
                    }
                }
            }
            Ok(TransitionOutcome::DiscardedCancelled) => {
                debug!(id = %item.id, "Sink result discarded; item was cancelled mid-flight");
            }
            Err(e) => warn!(id = %item.id, error = %e, "Failed to record delivery"),
        }
    }

    /// Failure path: backoff retry or dead-letter.
    async fn handle_failure(&self, item: &WorkItem, err: SinkError) {
        self.breaker.lock().record_failure(Utc::now());

        let attempts_after = item.attempts + 1;
        let exhausted = self.config.retry.is_exhausted(attempts_after);

        if !err.retryable || exhausted {
            match self.queue.mark_dead_lettered(&item.id, &err.message).await {
                Ok(TransitionOutcome::Applied) => {
                    counter!("cursus_dispatch_total", "kind" => item.kind.as_str(), "outcome" => "dead_lettered")
                        .increment(1);
                    error!(
                        id = %item.id,
                        attempts = attempts_after,
                        error = %err.message,
                        "Work item dead-lettered"
                    );

                    if item.kind == WorkItemKind::Mutation {
                        if let Some(rolled_back) = self.optimistic.reject(&item.id) {
                            self.bus.publish(DeliveryEvent::item_event(
                                DeliveryEventType::Rejected,
                                item.id.clone(),
                                Some(format!("rolled back entity {}", rolled_back.id)),
                            ));
                        }
                    }
                    self.bus.publish(DeliveryEvent::item_event(
                        DeliveryEventType::Failed,
                        item.id.clone(),
                        Some(err.message.clone()),
                    ));
                }
                Ok(TransitionOutcome::DiscardedCancelled) => {}
                Err(e) => warn!(id = %item.id, error = %e, "Failed to dead-letter item"),
            }
            return;
        }

        let delay = self.config.retry.delay(attempts_after);
        let retry_at = Utc::now() + to_chrono(delay);
        match self
            .queue
            .schedule_retry(&item.id, retry_at, &err.message)
            .await
        {
            Ok(TransitionOutcome::Applied) => {
                counter!("cursus_dispatch_total", "kind" => item.kind.as_str(), "outcome" => "retried")
                    .increment(1);
                warn!(
                    id = %item.id,
                    attempt = attempts_after,
                    retry_at = %retry_at,
                    error = %err.message,
                    "Dispatch failed, retry scheduled"
                );
                self.bus.publish(DeliveryEvent::item_event(
                    DeliveryEventType::Retrying,
                    item.id.clone(),
                    Some(err.message.clone()),
                ));
            }
            Ok(TransitionOutcome::DiscardedCancelled) => {}
            Err(e) => warn!(id = %item.id, error = %e, "Failed to schedule retry"),
        }
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365))
}
