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

//! External sink traits.
//!
//! These are the boundaries to the excluded collaborators: the notification
//! transport (`remoteSend`), the backend mutation API (`remoteApply`), and
//! the live-update connectivity probe. The embedding application implements
//! them; the engine only ever calls them from the dispatcher, under a
//! bounded timeout.
//!
//! Every call receives the full [`WorkItem`], whose correlation id doubles
//! as the idempotency key: the engine guarantees at most one concurrent
//! attempt per id, not exactly-once delivery, so the receiving side must
//! treat a repeated id as already handled.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::work_item::{EntityId, WorkItem};

/// The remote entity state returned when a mutation is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    /// Server-assigned entity id. Replaces a provisional id on creates.
    pub id: EntityId,
    /// Confirmed field values.
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Acknowledgement of a successfully applied mutation.
#[derive(Debug, Clone, Default)]
pub struct RemoteAck {
    /// Confirmed entity state, when the remote returns one (creates and
    /// updates do; deletes usually do not).
    pub entity: Option<RemoteEntity>,
}

/// Push/notification transport (`remoteSend`).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers a reminder notification.
    async fn send(&self, item: &WorkItem) -> Result<(), SinkError>;
}

/// Backend mutation API (`remoteApply`).
#[async_trait]
pub trait MutationSink: Send + Sync {
    /// Applies a queued mutation and returns the confirmed entity state.
    async fn apply(&self, item: &WorkItem) -> Result<RemoteAck, SinkError>;
}

/// Liveness check for the live-update transport.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the transport (or network) is currently usable.
    async fn probe(&self) -> bool;
}
