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

//! Error types for the cursus delivery engine.
//!
//! The taxonomy mirrors how failures propagate through the system:
//!
//! - [`StorageError`] — the durable key-value backend failed.
//! - [`QueueError`] — a queue operation was invalid (bad transition, race,
//!   unknown item) or the backing store failed underneath it.
//! - [`SchedulerError`] — a reminder rule could not be resolved, or the
//!   resulting work item could not be enqueued.
//! - [`SinkError`] — a remote sink call failed; carries the `retryable`
//!   flag that drives the retry/backoff machinery.
//!
//! Transient sink failures never reach the caller: they are absorbed by the
//! dispatcher's retry loop and only surface as events once an item is
//! dead-lettered. Synchronous validation failures (`InvalidAnchor`) and
//! programming errors (`AlreadyInFlight`) are returned directly.

use thiserror::Error;

use crate::models::work_item::{CorrelationId, WorkItemStatus};

/// Errors from the durable key-value store backing the queue.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// An I/O failure from a filesystem-backed store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from durable queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A second in-flight claim was attempted for an item that is already
    /// being dispatched. This is the at-most-one-concurrent-dispatch guard;
    /// dispatch races log and skip the item rather than failing the loop.
    #[error("work item already in flight: {id}")]
    AlreadyInFlight { id: CorrelationId },

    /// The referenced work item does not exist (or was already swept).
    #[error("work item not found: {id}")]
    NotFound { id: CorrelationId },

    /// An item with the same correlation id is already queued and live.
    #[error("duplicate work item id: {id}")]
    DuplicateItem { id: CorrelationId },

    /// The item is in a terminal state and cannot transition further.
    #[error("work item {id} is terminal ({status})")]
    TerminalState {
        id: CorrelationId,
        status: WorkItemStatus,
    },

    /// The requested status transition is not part of the state machine.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: CorrelationId,
        from: WorkItemStatus,
        to: WorkItemStatus,
    },

    /// The durable store failed underneath the queue.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A work item could not be (de)serialized for storage.
    #[error("work item serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from scheduling reminder notifications.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The rule is `Relative` and the referenced anchor field is unset.
    /// Rejected synchronously; nothing is enqueued.
    #[error("reminder rule references unset anchor field: {field}")]
    InvalidAnchor { field: &'static str },

    /// The resolved work item could not be persisted.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A failed call to a remote sink (`remoteSend` / `remoteApply`).
///
/// `retryable` decides whether the dispatcher schedules a backoff retry or
/// dead-letters the item immediately.
#[derive(Debug, Clone, Error)]
#[error("sink call failed: {message} (retryable: {retryable})")]
pub struct SinkError {
    /// Human-readable failure reason, recorded as the item's `last_error`.
    pub message: String,
    /// Whether the failure is transient and worth retrying.
    pub retryable: bool,
}

impl SinkError {
    /// A transient failure that should be retried with backoff.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent rejection; the item is dead-lettered without retries.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The bounded sink timeout elapsed. Counted as a retryable failure.
    pub fn timeout() -> Self {
        Self::retryable("sink call timed out")
    }
}
