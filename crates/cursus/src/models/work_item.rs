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

//! Work Item Model
//!
//! This module defines the unit of deferred work managed by the durable
//! queue: a [`WorkItem`] is either a time-triggered reminder notification or
//! a queued user mutation, together with its dispatch state machine.
//!
//! Work items are append-only rows in the durable store; status transitions
//! are monotonic and there is no transition out of a terminal state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable correlation identifier for a work item.
///
/// The id survives retries and process restarts: it deduplicates enqueues,
/// addresses cancellation, and is sent to the remote sink with every dispatch
/// attempt so that a duplicate delivery (e.g. after a crash between sink
/// success and the terminal transition) is ignorable by the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a domain entity (task, time block) in the local mirror.
///
/// Locally created entities carry a provisional, client-generated id until
/// the remote confirms the create and assigns the authoritative one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

/// Prefix distinguishing provisional client-generated ids from server ids.
const PROVISIONAL_PREFIX: &str = "local-";

impl EntityId {
    /// Generates a provisional client-side id (`local-<uuid>`).
    pub fn provisional() -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4()))
    }

    /// Returns true if this id was generated locally and is not yet
    /// confirmed by the remote.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two kinds of deferred work the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemKind {
    /// A time-triggered reminder notification.
    Notification,
    /// A queued user mutation awaiting remote application.
    Mutation,
}

impl WorkItemKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemKind::Notification => "notification",
            WorkItemKind::Mutation => "mutation",
        }
    }
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch state machine for a work item.
///
/// ```text
/// Pending -> InFlight -> Sent | Applied            (success, terminal)
///                     -> Failed -> InFlight ...    (retry with backoff)
///                     -> DeadLettered              (attempts exhausted, terminal)
/// Pending | InFlight | Failed -> Cancelled         (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemStatus {
    /// Waiting for its `scheduled_at` time to pass.
    Pending,
    /// Claimed by the dispatcher; a sink call may be in progress.
    InFlight,
    /// Notification delivered successfully.
    Sent,
    /// Mutation applied remotely.
    Applied,
    /// The last dispatch attempt failed; eligible for redispatch once the
    /// backoff delay in `scheduled_at` passes.
    Failed,
    /// Cancelled by the caller before (or during) dispatch.
    Cancelled,
    /// Retries exhausted or the sink rejected the item permanently.
    DeadLettered,
}

impl WorkItemStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::InFlight => "in_flight",
            WorkItemStatus::Sent => "sent",
            WorkItemStatus::Applied => "applied",
            WorkItemStatus::Failed => "failed",
            WorkItemStatus::Cancelled => "cancelled",
            WorkItemStatus::DeadLettered => "dead_lettered",
        }
    }

    /// Parses a status from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkItemStatus::Pending),
            "in_flight" => Some(WorkItemStatus::InFlight),
            "sent" => Some(WorkItemStatus::Sent),
            "applied" => Some(WorkItemStatus::Applied),
            "failed" => Some(WorkItemStatus::Failed),
            "cancelled" => Some(WorkItemStatus::Cancelled),
            "dead_lettered" => Some(WorkItemStatus::DeadLettered),
            _ => None,
        }
    }

    /// Returns true if no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Sent
                | WorkItemStatus::Applied
                | WorkItemStatus::Cancelled
                | WorkItemStatus::DeadLettered
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a reminder notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Short notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// The domain entity this reminder is about, if any. Used by
    /// `cancel_all_for_entity`.
    pub entity: Option<EntityId>,
    /// Free-form metadata forwarded to the transport.
    pub metadata: BTreeMap<String, String>,
}

impl NotificationPayload {
    /// Creates a payload with empty metadata and no entity reference.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            entity: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Associates the notification with a domain entity.
    pub fn for_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// Operation type of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    /// Returns the string representation of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a queued mutation: an operation against one entity plus the
/// field diff it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPayload {
    /// What the mutation does to the entity.
    pub op: MutationOp,
    /// Domain entity type (e.g. `"task"`, `"time_block"`).
    pub entity_type: String,
    /// The entity the mutation targets. Provisional for local creates.
    pub entity_id: EntityId,
    /// Fields written by this mutation. Empty for deletes.
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl MutationPayload {
    /// A create for a brand-new local entity with a provisional id.
    pub fn create(
        entity_type: impl Into<String>,
        fields: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            op: MutationOp::Create,
            entity_type: entity_type.into(),
            entity_id: EntityId::provisional(),
            fields,
        }
    }

    /// An update of specific fields on an existing entity.
    pub fn update(
        entity_type: impl Into<String>,
        entity_id: EntityId,
        fields: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            op: MutationOp::Update,
            entity_type: entity_type.into(),
            entity_id,
            fields,
        }
    }

    /// A delete of an existing entity.
    pub fn delete(entity_type: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            op: MutationOp::Delete,
            entity_type: entity_type.into(),
            entity_id,
            fields: BTreeMap::new(),
        }
    }
}

/// Kind-specific payload of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkItemPayload {
    Notification(NotificationPayload),
    Mutation(MutationPayload),
}

/// The unit of deferred work managed by the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Correlation id: dedup, cancellation, sink idempotency key.
    pub id: CorrelationId,
    /// Whether this is a notification or a mutation.
    pub kind: WorkItemKind,
    /// Kind-specific payload.
    pub payload: WorkItemPayload,
    /// When the item becomes eligible for dispatch. Rewritten to the retry
    /// time on failure.
    pub scheduled_at: DateTime<Utc>,
    /// Current dispatch status.
    pub status: WorkItemStatus,
    /// Number of dispatch attempts so far. Non-decreasing.
    pub attempts: u32,
    /// Failure reason of the most recent attempt, if any.
    pub last_error: Option<String>,
    /// Queue insertion sequence: tie break for equal `scheduled_at` and the
    /// basis of per-entity FIFO ordering. Assigned by the queue on enqueue.
    pub seq: u64,
    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the item last changed state.
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Creates a pending notification item scheduled for `scheduled_at`.
    pub fn notification(
        id: CorrelationId,
        payload: NotificationPayload,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: WorkItemKind::Notification,
            payload: WorkItemPayload::Notification(payload),
            scheduled_at,
            status: WorkItemStatus::Pending,
            attempts: 0,
            last_error: None,
            seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a pending mutation item eligible for immediate dispatch.
    pub fn mutation(id: CorrelationId, payload: MutationPayload) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: WorkItemKind::Mutation,
            payload: WorkItemPayload::Mutation(payload),
            scheduled_at: now,
            status: WorkItemStatus::Pending,
            attempts: 0,
            last_error: None,
            seq: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The domain entity this item concerns, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match &self.payload {
            WorkItemPayload::Notification(n) => n.entity.as_ref(),
            WorkItemPayload::Mutation(m) => Some(&m.entity_id),
        }
    }

    /// The mutation payload, if this item is a mutation.
    pub fn as_mutation(&self) -> Option<&MutationPayload> {
        match &self.payload {
            WorkItemPayload::Mutation(m) => Some(m),
            _ => None,
        }
    }
}
