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

//! Domain models for the delivery engine.

pub mod circuit_breaker;
pub mod delivery_event;
pub mod reminder_rule;
pub mod work_item;

pub use circuit_breaker::{BreakerDecision, BreakerState, CircuitBreaker};
pub use delivery_event::{DeliveryEvent, DeliveryEventType};
pub use reminder_rule::{
    AnchorField, OffsetDirection, OffsetUnit, ReminderAnchors, ReminderRule,
};
pub use work_item::{
    CorrelationId, EntityId, MutationOp, MutationPayload, NotificationPayload, WorkItem,
    WorkItemKind, WorkItemPayload, WorkItemStatus,
};
