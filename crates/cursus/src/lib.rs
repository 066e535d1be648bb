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

//! # Cursus
//!
//! A Rust library for reliable client-side delivery and offline
//! synchronization.
//!
//! Cursus is the engine behind a task/calendar application's "it just
//! works offline" behavior. It solves one design problem in two guises:
//! *do work now if possible, otherwise durably queue it, and converge
//! later without duplicating or losing effects.*
//!
//! - **Reminder delivery** — time-triggered notifications are resolved to
//!   absolute fire times, durably queued, and dispatched with retry,
//!   deduplication, and failure isolation.
//! - **Offline mutations** — edits made while disconnected are queued,
//!   applied optimistically to a local mirror for immediate UI feedback,
//!   and reconciled against the remote once connectivity returns.
//!
//! ## Architecture
//!
//! ```text
//!  scheduler ──┐                            ┌─> NotificationSink (remoteSend)
//!              ├─> DurableQueue ─> Dispatcher
//!  mutations ──┘        │            │  │   └─> MutationSink (remoteApply)
//!      │                │            │  └─> CircuitBreaker / RetryPolicy
//!      v                v            v
//!  OptimisticStore   DurableStore   EventBus ─> UI subscribers
//!
//!  AvailabilityMonitor ─> push/poll mode for the dispatcher wake strategy
//! ```
//!
//! The embedding application supplies the four external seams: a durable
//! key-value store ([`storage::DurableStore`]), the notification transport
//! ([`sink::NotificationSink`]), the backend mutation API
//! ([`sink::MutationSink`]), and a connectivity probe
//! ([`sink::ConnectivityProbe`]). Everything else is owned by the
//! [`runner::DeliveryRunner`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use cursus::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runner = DeliveryRunner::start(
//!     Arc::new(FilesystemStore::open("/var/lib/myapp/queue").await?),
//!     Arc::new(MyPushTransport::new()),
//!     Arc::new(MyBackendApi::new()),
//!     Arc::new(MyProbe::new()),
//!     DeliveryRunnerConfig::default(),
//! )
//! .await?;
//!
//! // Schedule "15 minutes before due".
//! let id = runner
//!     .schedule_notification(
//!         &ReminderRule::before(AnchorField::Due, 15, OffsetUnit::Minutes),
//!         NotificationPayload::new("Standup", "in 15 minutes"),
//!         &ReminderAnchors { start: None, due: Some(due_at) },
//!     )
//!     .await?;
//!
//! // Queue an offline edit; the returned entity is ready for the UI.
//! let entity = runner
//!     .enqueue_mutation(MutationPayload::create("task", fields))
//!     .await?;
//! assert!(entity.id.is_provisional());
//!
//! runner.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - At most one concurrent dispatch attempt per work item id; duplicate
//!   deliveries after a crash are ignorable via the correlation id.
//! - Work item status transitions are monotonic; nothing leaves a
//!   terminal state.
//! - Per-entity FIFO: mutations of one entity reach the remote in enqueue
//!   order. No cross-entity ordering is promised.
//! - Transient sink failures are absorbed by backoff retries and a
//!   circuit breaker; callers only see dead-letter events and synchronous
//!   validation errors.

pub mod availability;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod models;
pub mod optimistic;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod sink;
pub mod storage;

pub use availability::{Availability, AvailabilityMonitor, MonitorConfig, TransportMode};
pub use error::{QueueError, SchedulerError, SinkError, StorageError};
pub use events::{EventBus, EventSubscription};
pub use models::circuit_breaker::{BreakerDecision, BreakerState, CircuitBreaker};
pub use models::delivery_event::{DeliveryEvent, DeliveryEventType};
pub use models::reminder_rule::{
    AnchorField, OffsetDirection, OffsetUnit, ReminderAnchors, ReminderRule,
};
pub use models::work_item::{
    CorrelationId, EntityId, MutationOp, MutationPayload, NotificationPayload, WorkItem,
    WorkItemKind, WorkItemPayload, WorkItemStatus,
};
pub use optimistic::{IdRemap, OptimisticEntity, OptimisticStore};
pub use queue::{DurableQueue, QueueCounts, TransitionOutcome};
pub use retry::RetryPolicy;
pub use runner::{DeliveryRunner, DeliveryRunnerConfig, QueueStatus};
pub use scheduler::ReminderScheduler;
pub use sink::{ConnectivityProbe, MutationSink, NotificationSink, RemoteAck, RemoteEntity};
pub use storage::{DurableStore, FilesystemStore, MemoryStore};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::error::{QueueError, SchedulerError, SinkError};
    pub use crate::models::reminder_rule::{
        AnchorField, OffsetUnit, ReminderAnchors, ReminderRule,
    };
    pub use crate::models::work_item::{
        CorrelationId, EntityId, MutationPayload, NotificationPayload,
    };
    pub use crate::runner::{DeliveryRunner, DeliveryRunnerConfig, QueueStatus};
    pub use crate::sink::{ConnectivityProbe, MutationSink, NotificationSink};
    pub use crate::storage::{DurableStore, FilesystemStore, MemoryStore};
}
