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

//! Delivery Runner
//!
//! The runner is the library's facade: it wires the durable queue,
//! scheduler, dispatcher, optimistic mirror, availability monitor, and
//! event bus together, owns the background services, and exposes the
//! public API consumed by UI and form code.
//!
//! # Example
//!
//! ```rust,ignore
//! use cursus::runner::{DeliveryRunner, DeliveryRunnerConfig};
//!
//! let runner = DeliveryRunner::start(
//!     store,              // Arc<dyn DurableStore>
//!     notification_sink,  // Arc<dyn NotificationSink>
//!     mutation_sink,      // Arc<dyn MutationSink>
//!     probe,              // Arc<dyn ConnectivityProbe>
//!     DeliveryRunnerConfig::default(),
//! )
//! .await?;
//!
//! let id = runner
//!     .schedule_notification(&rule, payload, &anchors)
//!     .await?;
//!
//! runner.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::availability::{AvailabilityMonitor, MonitorConfig, TransportMode};
use crate::dispatcher::{Dispatcher, DispatcherConfig, WakeSignal};
use crate::error::{QueueError, SchedulerError};
use crate::events::{EventBus, EventSubscription};
use crate::models::circuit_breaker::CircuitBreaker;
use crate::models::reminder_rule::{ReminderAnchors, ReminderRule};
use crate::models::work_item::{
    CorrelationId, EntityId, MutationPayload, NotificationPayload, WorkItem,
};
use crate::optimistic::{OptimisticEntity, OptimisticStore};
use crate::queue::DurableQueue;
use crate::scheduler::ReminderScheduler;
use crate::sink::{ConnectivityProbe, MutationSink, NotificationSink};
use crate::storage::DurableStore;

mod config;

pub use config::{DeliveryRunnerConfig, DeliveryRunnerConfigBuilder};

/// Public queue diagnostics for UI status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Items waiting for dispatch (pending and retry-waiting).
    pub pending_count: usize,
    /// Items currently being dispatched.
    pub in_flight_count: usize,
    /// True while the circuit breaker is fast-failing dispatches.
    pub breaker_open: bool,
}

/// Handles of the background services, held for shutdown.
struct RuntimeHandles {
    dispatcher_handle: Option<tokio::task::JoinHandle<()>>,
    monitor_handle: Option<tokio::task::JoinHandle<()>>,
    sweeper_handle: Option<tokio::task::JoinHandle<()>>,
}

/// The reliable delivery and synchronization engine.
pub struct DeliveryRunner {
    config: DeliveryRunnerConfig,
    queue: Arc<DurableQueue>,
    scheduler: ReminderScheduler,
    optimistic: Arc<OptimisticStore>,
    monitor: Arc<AvailabilityMonitor>,
    bus: Arc<EventBus>,
    wake: Arc<WakeSignal>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
    handles: tokio::sync::Mutex<RuntimeHandles>,
}

impl DeliveryRunner {
    /// Opens the durable queue (recovering any in-flight leftovers from a
    /// previous process) and starts the background services.
    pub async fn start(
        store: Arc<dyn DurableStore>,
        notification_sink: Arc<dyn NotificationSink>,
        mutation_sink: Arc<dyn MutationSink>,
        probe: Arc<dyn ConnectivityProbe>,
        config: DeliveryRunnerConfig,
    ) -> Result<Self, QueueError> {
        let queue = Arc::new(DurableQueue::open(store).await?);
        let bus = Arc::new(EventBus::new());
        let wake = Arc::new(WakeSignal::new());
        let optimistic = Arc::new(OptimisticStore::new());
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            config.breaker_failure_threshold(),
            to_chrono(config.breaker_cooldown()),
        )));
        let monitor = Arc::new(AvailabilityMonitor::new(
            probe,
            Arc::clone(&bus),
            MonitorConfig {
                ttl: config.probe_ttl(),
                failure_threshold: config.probe_failure_threshold(),
                probe_interval: config.probe_interval(),
            },
        ));
        let scheduler = ReminderScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            Arc::clone(&wake),
            to_chrono(config.schedule_grace()),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            notification_sink,
            mutation_sink,
            Arc::clone(&optimistic),
            Arc::clone(&breaker),
            Arc::clone(&bus),
            Arc::clone(&wake),
            Arc::clone(&monitor),
            DispatcherConfig {
                max_concurrent: config.max_concurrent_dispatches(),
                poll_interval: config.poll_interval(),
                push_fallback_interval: config.push_fallback_interval(),
                sink_timeout: config.sink_timeout(),
                retry: config.retry_policy().clone(),
            },
        ));

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let dispatcher_handle = tokio::spawn({
            let shutdown = Arc::clone(&shutdown);
            let stop = Arc::clone(&stop);
            async move { dispatcher.run(shutdown, stop).await }
        });

        let monitor_handle = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            let shutdown = Arc::clone(&shutdown);
            let stop = Arc::clone(&stop);
            async move { monitor.run(shutdown, stop).await }
        });

        let sweeper_handle = tokio::spawn({
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let stop = Arc::clone(&stop);
            let retention = to_chrono(config.retention());
            let interval = config.sweep_interval();
            async move {
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::select! {
                        _ = stop.notified() => {}
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = queue.sweep_terminal(Utc::now(), retention).await {
                                warn!(error = %e, "Retention sweep failed");
                            }
                        }
                    }
                }
                debug!("Retention sweeper stopped");
            }
        });

        info!("Delivery runner started");

        Ok(Self {
            config,
            queue,
            scheduler,
            optimistic,
            monitor,
            bus,
            wake,
            breaker,
            shutdown,
            stop,
            handles: tokio::sync::Mutex::new(RuntimeHandles {
                dispatcher_handle: Some(dispatcher_handle),
                monitor_handle: Some(monitor_handle),
                sweeper_handle: Some(sweeper_handle),
            }),
        })
    }

    /// Stops the background services and waits for them to exit. Sink
    /// calls already in flight complete in the background; their results
    /// are recorded by the queue on the next start. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
        self.wake.notify();

        let mut handles = self.handles.lock().await;
        for handle in [
            handles.dispatcher_handle.take(),
            handles.monitor_handle.take(),
            handles.sweeper_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background service panicked during shutdown");
            }
        }
        info!("Delivery runner stopped");
    }

    /// Schedules a reminder notification. Returns the correlation id used
    /// to cancel it later.
    pub async fn schedule_notification(
        &self,
        rule: &ReminderRule,
        payload: NotificationPayload,
        anchors: &ReminderAnchors,
    ) -> Result<CorrelationId, SchedulerError> {
        self.scheduler.schedule(rule, payload, anchors).await
    }

    /// Cancels one scheduled notification (or any queued item by id).
    /// Returns true if a transition happened; no-op on terminal items.
    pub async fn cancel_notification(&self, id: &CorrelationId) -> Result<bool, SchedulerError> {
        self.scheduler.cancel(id).await
    }

    /// Cancels every non-terminal queued item referencing the entity.
    pub async fn cancel_all_for_entity(
        &self,
        entity: &EntityId,
    ) -> Result<usize, SchedulerError> {
        self.scheduler.cancel_all_for_entity(entity).await
    }

    /// Queues a mutation for remote application and applies it to the
    /// local mirror synchronously. The returned provisional entity is
    /// ready for immediate UI use; reconciliation events follow once the
    /// dispatcher hears back from the remote.
    pub async fn enqueue_mutation(
        &self,
        payload: MutationPayload,
    ) -> Result<OptimisticEntity, QueueError> {
        let id = CorrelationId::generate();
        let entity = self.optimistic.apply_locally(&payload, id.clone());

        let item = WorkItem::mutation(id.clone(), payload);
        if let Err(e) = self.queue.enqueue(item).await {
            // The mutation never made it into the queue; undo the overlay
            // so the mirror does not advertise a write that will not run.
            self.optimistic.reject(&id);
            return Err(e);
        }

        self.wake.notify();
        Ok(entity)
    }

    /// Current queue and breaker status for UI indicators.
    pub async fn queue_status(&self) -> QueueStatus {
        let counts = self.queue.counts().await;
        QueueStatus {
            pending_count: counts.pending,
            in_flight_count: counts.in_flight,
            breaker_open: self.breaker.lock().is_open(),
        }
    }

    /// Subscribes to delivery events. The subscription unsubscribes itself
    /// when dropped.
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// Returns the optimistic snapshot of an entity, resolving remapped
    /// provisional ids.
    pub fn entity(&self, id: &EntityId) -> Option<OptimisticEntity> {
        self.optimistic.get(id)
    }

    /// Resolves an entity id through the remap alias table.
    pub fn resolve_entity_id(&self, id: &EntityId) -> EntityId {
        self.optimistic.resolve_id(id)
    }

    /// Drops a fully reconciled entity from the mirror after the caller
    /// refreshed it from the remote. No-op while mutations are pending.
    pub fn evict_reconciled(&self, id: &EntityId) -> bool {
        self.optimistic.evict_reconciled(id)
    }

    /// Snapshot of all queued items, for diagnostics views.
    pub async fn list_items(&self) -> Vec<WorkItem> {
        self.queue.list_all().await
    }

    /// Current transport mode (push-driven or poll-driven).
    pub fn transport_mode(&self) -> TransportMode {
        self.monitor.mode()
    }

    /// The availability monitor, for read-refresh logic that wants to
    /// share the probe cache.
    pub fn availability(&self) -> &Arc<AvailabilityMonitor> {
        &self.monitor
    }

    /// The active configuration.
    pub fn config(&self) -> &DeliveryRunnerConfig {
        &self.config
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
