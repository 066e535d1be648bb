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

//! Durable work queue.
//!
//! The queue is the only component that mutates [`WorkItem`] state. Items
//! are persisted as JSON documents in the [`DurableStore`] under
//! `item/<id>` and mirrored in an in-memory index for due-time scans; every
//! state transition is written through to the store before the index is
//! updated, so a crash never loses a transition that was acknowledged.
//!
//! All operations serialize on one internal lock. This gives the
//! compare-and-set semantics the dispatcher relies on: claiming an item
//! that is already in flight fails with [`QueueError::AlreadyInFlight`]
//! (the at-most-one-concurrent-dispatch guarantee), and transitions out of
//! a terminal state are refused.
//!
//! Crash recovery: items found `InFlight` when the queue is opened are
//! demoted to `Pending`. The outcome of that dispatch attempt is unknown,
//! and every sink call carries the item's correlation id, so the receiving
//! side treats the re-send as a duplicate and ignores it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::models::work_item::{
    CorrelationId, EntityId, WorkItem, WorkItemKind, WorkItemStatus,
};
use crate::storage::DurableStore;

/// Key prefix for work item documents in the durable store.
const ITEM_PREFIX: &str = "item/";

/// Outcome of a dispatcher-reported transition.
///
/// A result arriving for an item that was cancelled while in flight is
/// discarded rather than applied: cancellation of an in-flight item is
/// best-effort, and the monotonic state machine wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied and persisted.
    Applied,
    /// The item was cancelled mid-flight; the result was dropped.
    DiscardedCancelled,
}

/// Counts of live items by status, for diagnostics and the public
/// queue-status API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Items waiting for their scheduled time (`Pending` and retry-waiting
    /// `Failed`).
    pub pending: usize,
    /// Items currently being dispatched.
    pub in_flight: usize,
    /// Items that exhausted their retries.
    pub dead_lettered: usize,
}

struct QueueInner {
    items: HashMap<CorrelationId, WorkItem>,
    next_seq: u64,
}

/// Append-only durable queue of pending work items.
pub struct DurableQueue {
    store: Arc<dyn DurableStore>,
    inner: Mutex<QueueInner>,
}

impl DurableQueue {
    /// Opens the queue over a durable store, rebuilding the in-memory index
    /// and demoting any `InFlight` leftovers from a previous process.
    pub async fn open(store: Arc<dyn DurableStore>) -> Result<Self, QueueError> {
        let mut items: HashMap<CorrelationId, WorkItem> = HashMap::new();
        let mut next_seq: u64 = 1;
        let mut recovered = 0usize;

        for (key, bytes) in store.list(ITEM_PREFIX).await? {
            let mut item: WorkItem = match serde_json::from_slice(&bytes) {
                Ok(item) => item,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable work item");
                    continue;
                }
            };

            if item.status == WorkItemStatus::InFlight {
                item.status = WorkItemStatus::Pending;
                item.updated_at = Utc::now();
                store.put(&item_key(&item.id), serde_json::to_vec(&item)?).await?;
                recovered += 1;
            }

            next_seq = next_seq.max(item.seq + 1);
            items.insert(item.id.clone(), item);
        }

        if recovered > 0 {
            info!(recovered, "Demoted in-flight work items to pending on queue open");
        }
        debug!(items = items.len(), "Durable queue opened");

        Ok(Self {
            store,
            inner: Mutex::new(QueueInner { items, next_seq }),
        })
    }

    /// Persists and indexes a new work item.
    ///
    /// Enqueue is idempotent by correlation id: a second enqueue of a live
    /// id fails with [`QueueError::DuplicateItem`] instead of creating a
    /// second item.
    pub async fn enqueue(&self, mut item: WorkItem) -> Result<CorrelationId, QueueError> {
        let mut inner = self.inner.lock().await;

        if inner.items.contains_key(&item.id) {
            return Err(QueueError::DuplicateItem { id: item.id });
        }

        item.seq = inner.next_seq;
        item.status = WorkItemStatus::Pending;
        item.updated_at = Utc::now();

        self.store
            .put(&item_key(&item.id), serde_json::to_vec(&item)?)
            .await?;

        inner.next_seq += 1;
        debug!(id = %item.id, kind = %item.kind, scheduled_at = %item.scheduled_at, "Work item enqueued");
        let id = item.id.clone();
        inner.items.insert(id.clone(), item);
        Ok(id)
    }

    /// Returns due items eligible for dispatch, oldest first.
    ///
    /// Eligible means `Pending` (or retry-waiting `Failed`) with
    /// `scheduled_at <= now`, ordered by `scheduled_at` then insertion
    /// sequence. Mutations are additionally gated to per-entity FIFO: a
    /// later mutation for an entity is withheld while an earlier one is
    /// unresolved or any mutation for that entity is in flight, so creates
    /// and updates reach the remote in enqueue order.
    pub async fn dequeue_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<WorkItem> {
        let inner = self.inner.lock().await;

        let mut entities_in_flight: HashSet<&EntityId> = HashSet::new();
        let mut entity_head_seq: HashMap<&EntityId, u64> = HashMap::new();
        for item in inner.items.values() {
            if item.kind != WorkItemKind::Mutation || item.status.is_terminal() {
                continue;
            }
            let Some(entity) = item.entity() else { continue };
            if item.status == WorkItemStatus::InFlight {
                entities_in_flight.insert(entity);
            }
            entity_head_seq
                .entry(entity)
                .and_modify(|seq| *seq = (*seq).min(item.seq))
                .or_insert(item.seq);
        }

        let mut due: Vec<&WorkItem> = inner
            .items
            .values()
            .filter(|item| {
                matches!(
                    item.status,
                    WorkItemStatus::Pending | WorkItemStatus::Failed
                ) && item.scheduled_at <= now
            })
            .filter(|item| {
                if item.kind != WorkItemKind::Mutation {
                    return true;
                }
                let Some(entity) = item.entity() else {
                    return true;
                };
                !entities_in_flight.contains(entity)
                    && entity_head_seq.get(entity) == Some(&item.seq)
            })
            .collect();

        due.sort_by_key(|item| (item.scheduled_at, item.seq));
        due.into_iter().take(limit).cloned().collect()
    }

    /// Claims an item for dispatch: `Pending | Failed -> InFlight`.
    ///
    /// # Errors
    ///
    /// - [`QueueError::AlreadyInFlight`] if a claim is already outstanding
    ///   for this id (at-most-one-concurrent-dispatch)
    /// - [`QueueError::TerminalState`] if the item already finished
    /// - [`QueueError::NotFound`] if the id is unknown
    pub async fn mark_in_flight(&self, id: &CorrelationId) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get(id)
            .ok_or_else(|| QueueError::NotFound { id: id.clone() })?;

        match item.status {
            WorkItemStatus::Pending | WorkItemStatus::Failed => {}
            WorkItemStatus::InFlight => {
                return Err(QueueError::AlreadyInFlight { id: id.clone() });
            }
            status => {
                return Err(QueueError::TerminalState {
                    id: id.clone(),
                    status,
                });
            }
        }

        let mut updated = item.clone();
        updated.status = WorkItemStatus::InFlight;
        updated.updated_at = Utc::now();
        self.store
            .put(&item_key(id), serde_json::to_vec(&updated)?)
            .await?;
        inner.items.insert(id.clone(), updated);
        Ok(())
    }

    /// Records a successful dispatch: `InFlight -> Sent | Applied`
    /// (terminal status chosen from the item's kind).
    pub async fn mark_delivered(
        &self,
        id: &CorrelationId,
    ) -> Result<TransitionOutcome, QueueError> {
        self.finish_in_flight(id, |item| {
            item.status = match item.kind {
                WorkItemKind::Notification => WorkItemStatus::Sent,
                WorkItemKind::Mutation => WorkItemStatus::Applied,
            };
            item.last_error = None;
        })
        .await
    }

    /// Records a failed dispatch attempt and schedules the retry:
    /// `InFlight -> Failed` with `attempts + 1`, the backoff time in
    /// `scheduled_at`, and the failure reason in `last_error`.
    pub async fn schedule_retry(
        &self,
        id: &CorrelationId,
        retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<TransitionOutcome, QueueError> {
        self.finish_in_flight(id, |item| {
            item.status = WorkItemStatus::Failed;
            item.attempts += 1;
            item.scheduled_at = retry_at;
            item.last_error = Some(error.to_string());
        })
        .await
    }

    /// Reschedules an item without counting an attempt. Used by the
    /// circuit-open fast-fail path, where no sink call happened.
    pub async fn defer_retry(
        &self,
        id: &CorrelationId,
        retry_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<TransitionOutcome, QueueError> {
        self.finish_in_flight(id, |item| {
            item.status = WorkItemStatus::Failed;
            item.scheduled_at = retry_at;
            item.last_error = Some(reason.to_string());
        })
        .await
    }

    /// Dead-letters an item after its final failed attempt:
    /// `InFlight -> DeadLettered` with `attempts + 1`.
    pub async fn mark_dead_lettered(
        &self,
        id: &CorrelationId,
        error: &str,
    ) -> Result<TransitionOutcome, QueueError> {
        self.finish_in_flight(id, |item| {
            item.status = WorkItemStatus::DeadLettered;
            item.attempts += 1;
            item.last_error = Some(error.to_string());
        })
        .await
    }

    /// Shared guard for dispatcher-reported outcomes of in-flight items.
    async fn finish_in_flight(
        &self,
        id: &CorrelationId,
        apply: impl FnOnce(&mut WorkItem),
    ) -> Result<TransitionOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let item = inner
            .items
            .get(id)
            .ok_or_else(|| QueueError::NotFound { id: id.clone() })?;

        match item.status {
            WorkItemStatus::InFlight => {}
            WorkItemStatus::Cancelled => {
                debug!(id = %id, "Discarding dispatch result for cancelled item");
                return Ok(TransitionOutcome::DiscardedCancelled);
            }
            status if status.is_terminal() => {
                return Err(QueueError::TerminalState {
                    id: id.clone(),
                    status,
                });
            }
            status => {
                // A dispatch outcome arrived for an item that was never
                // claimed; report the transition it would have made.
                let mut probe = item.clone();
                apply(&mut probe);
                return Err(QueueError::InvalidTransition {
                    id: id.clone(),
                    from: status,
                    to: probe.status,
                });
            }
        }

        let mut updated = item.clone();
        apply(&mut updated);
        updated.updated_at = Utc::now();
        self.store
            .put(&item_key(id), serde_json::to_vec(&updated)?)
            .await?;
        inner.items.insert(id.clone(), updated);
        Ok(TransitionOutcome::Applied)
    }

    /// Cancels a non-terminal item. Returns true if a transition happened;
    /// cancelling a terminal or unknown item is a no-op, never an error.
    ///
    /// Cancelling a `Pending` item is guaranteed to prevent dispatch.
    /// Cancelling an `InFlight` item does not interrupt the sink call, but
    /// its result will be discarded when it arrives.
    pub async fn cancel(&self, id: &CorrelationId) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(item) = inner.items.get(id) else {
            return Ok(false);
        };
        if item.status.is_terminal() {
            return Ok(false);
        }

        let mut updated = item.clone();
        updated.status = WorkItemStatus::Cancelled;
        updated.updated_at = Utc::now();
        self.store
            .put(&item_key(id), serde_json::to_vec(&updated)?)
            .await?;
        inner.items.insert(id.clone(), updated);
        debug!(id = %id, "Work item cancelled");
        Ok(true)
    }

    /// Cancels every non-terminal item referencing the given entity.
    /// Returns the ids that transitioned.
    pub async fn cancel_all_for_entity(
        &self,
        entity: &EntityId,
    ) -> Result<Vec<CorrelationId>, QueueError> {
        let mut inner = self.inner.lock().await;
        let targets: Vec<CorrelationId> = inner
            .items
            .values()
            .filter(|item| !item.status.is_terminal() && item.entity() == Some(entity))
            .map(|item| item.id.clone())
            .collect();

        let mut cancelled = Vec::with_capacity(targets.len());
        for id in targets {
            let Some(item) = inner.items.get(&id) else { continue };
            let mut updated = item.clone();
            updated.status = WorkItemStatus::Cancelled;
            updated.updated_at = Utc::now();
            self.store
                .put(&item_key(&id), serde_json::to_vec(&updated)?)
                .await?;
            inner.items.insert(id.clone(), updated);
            cancelled.push(id);
        }

        if !cancelled.is_empty() {
            debug!(entity = %entity, count = cancelled.len(), "Cancelled work items for entity");
        }
        Ok(cancelled)
    }

    /// Returns a snapshot of one item.
    pub async fn get(&self, id: &CorrelationId) -> Option<WorkItem> {
        self.inner.lock().await.items.get(id).cloned()
    }

    /// Returns a snapshot of all items in insertion order (diagnostics/UI).
    pub async fn list_all(&self) -> Vec<WorkItem> {
        let inner = self.inner.lock().await;
        let mut items: Vec<WorkItem> = inner.items.values().cloned().collect();
        items.sort_by_key(|item| item.seq);
        items
    }

    /// Current item counts by status.
    pub async fn counts(&self) -> QueueCounts {
        let inner = self.inner.lock().await;
        let mut counts = QueueCounts::default();
        for item in inner.items.values() {
            match item.status {
                WorkItemStatus::Pending | WorkItemStatus::Failed => counts.pending += 1,
                WorkItemStatus::InFlight => counts.in_flight += 1,
                WorkItemStatus::DeadLettered => counts.dead_lettered += 1,
                _ => {}
            }
        }
        counts
    }

    /// Removes terminal items older than the retention window. Returns the
    /// number of items removed.
    pub async fn sweep_terminal(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().await;
        let expired: Vec<CorrelationId> = inner
            .items
            .values()
            .filter(|item| item.status.is_terminal() && item.updated_at + retention <= now)
            .map(|item| item.id.clone())
            .collect();

        for id in &expired {
            self.store.delete(&item_key(id)).await?;
            inner.items.remove(id);
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "Swept expired terminal work items");
        }
        Ok(expired.len())
    }
}

fn item_key(id: &CorrelationId) -> String {
    format!("{}{}", ITEM_PREFIX, id)
}
