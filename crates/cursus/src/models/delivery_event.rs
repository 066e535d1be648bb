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

//! Delivery Event Model
//!
//! This module defines the events published on the [`EventBus`] so UI
//! observers can react to queue activity (delivery, retries, failures,
//! cancellations, reconciliation rollbacks) without polling engine
//! internals.
//!
//! [`EventBus`]: crate::events::EventBus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::work_item::CorrelationId;

/// Enumeration of event types published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryEventType {
    /// A notification was delivered to the transport.
    Sent,
    /// A mutation was applied by the remote.
    Applied,
    /// A dispatch attempt failed (or was fast-failed by the open circuit
    /// breaker) and the item was rescheduled with backoff.
    Retrying,
    /// The item was dead-lettered: retries exhausted or permanently
    /// rejected. Callers surface this as a persistent failure indicator.
    Failed,
    /// The item was cancelled before completing.
    Cancelled,
    /// A mutation was rejected by the remote and its local overlay was
    /// rolled back. Published per entity so unrelated pending edits keep
    /// their optimistic state.
    Rejected,
    /// A provisional entity id was replaced by the server-assigned one.
    IdRemapped,
    /// The availability monitor switched between push and poll operation.
    AvailabilityChanged,
}

impl DeliveryEventType {
    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEventType::Sent => "sent",
            DeliveryEventType::Applied => "applied",
            DeliveryEventType::Retrying => "retrying",
            DeliveryEventType::Failed => "failed",
            DeliveryEventType::Cancelled => "cancelled",
            DeliveryEventType::Rejected => "rejected",
            DeliveryEventType::IdRemapped => "id_remapped",
            DeliveryEventType::AvailabilityChanged => "availability_changed",
        }
    }

    /// Parses an event type from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryEventType::Sent),
            "applied" => Some(DeliveryEventType::Applied),
            "retrying" => Some(DeliveryEventType::Retrying),
            "failed" => Some(DeliveryEventType::Failed),
            "cancelled" => Some(DeliveryEventType::Cancelled),
            "rejected" => Some(DeliveryEventType::Rejected),
            "id_remapped" => Some(DeliveryEventType::IdRemapped),
            "availability_changed" => Some(DeliveryEventType::AvailabilityChanged),
            _ => None,
        }
    }

    /// Returns true if the event concerns a single work item.
    pub fn is_item_event(&self) -> bool {
        !matches!(self, DeliveryEventType::AvailabilityChanged)
    }
}

impl std::fmt::Display for DeliveryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event published to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// The type of event.
    pub event_type: DeliveryEventType,
    /// The work item this event relates to (None for engine-level events).
    pub item_id: Option<CorrelationId>,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Additional human-readable detail (error message, remap target, mode).
    pub detail: Option<String>,
}

impl DeliveryEvent {
    /// Creates an event for a single work item.
    pub fn item_event(
        event_type: DeliveryEventType,
        item_id: CorrelationId,
        detail: Option<String>,
    ) -> Self {
        Self {
            event_type,
            item_id: Some(item_id),
            timestamp: Utc::now(),
            detail,
        }
    }

    /// Creates an engine-level event not tied to a work item.
    pub fn engine_event(event_type: DeliveryEventType, detail: Option<String>) -> Self {
        Self {
            event_type,
            item_id: None,
            timestamp: Utc::now(),
            detail,
        }
    }
}
