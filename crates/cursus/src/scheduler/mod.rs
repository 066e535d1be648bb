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

//! Reminder scheduling.
//!
//! The scheduler turns a [`ReminderRule`] into one pending notification
//! work item with an absolute fire time. Resolution happens once, at
//! enqueue time, against the anchor values passed in by the caller:
//! changing a task's due date later does not move an already-queued
//! reminder — cancel and re-schedule instead.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::error::SchedulerError;
use crate::events::EventBus;
use crate::models::delivery_event::{DeliveryEvent, DeliveryEventType};
use crate::models::reminder_rule::{ReminderAnchors, ReminderRule};
use crate::models::work_item::{CorrelationId, EntityId, NotificationPayload, WorkItem};
use crate::queue::DurableQueue;
use crate::dispatcher::wake::WakeSignal;

/// Schedules and cancels reminder notifications.
pub struct ReminderScheduler {
    queue: Arc<DurableQueue>,
    bus: Arc<EventBus>,
    wake: Arc<WakeSignal>,
    grace: Duration,
}

impl ReminderScheduler {
    /// Creates a scheduler over the shared queue.
    ///
    /// `grace` is the offset applied when a rule resolves at or before
    /// "now": the reminder fires almost immediately instead of being
    /// dropped.
    pub fn new(
        queue: Arc<DurableQueue>,
        bus: Arc<EventBus>,
        wake: Arc<WakeSignal>,
        grace: Duration,
    ) -> Self {
        Self {
            queue,
            bus,
            wake,
            grace,
        }
    }

    /// Resolves the rule and enqueues the notification with a generated
    /// correlation id. Returns the id for later cancellation.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidAnchor`] if a relative rule references an
    /// unset anchor field; queue errors if persistence fails.
    pub async fn schedule(
        &self,
        rule: &ReminderRule,
        payload: NotificationPayload,
        anchors: &ReminderAnchors,
    ) -> Result<CorrelationId, SchedulerError> {
        self.schedule_with_id(CorrelationId::generate(), rule, payload, anchors)
            .await
    }

    /// Like [`schedule`](Self::schedule) but with a caller-chosen
    /// correlation id, for callers that manage their own dedup keys.
    pub async fn schedule_with_id(
        &self,
        id: CorrelationId,
        rule: &ReminderRule,
        payload: NotificationPayload,
        anchors: &ReminderAnchors,
    ) -> Result<CorrelationId, SchedulerError> {
        let now = Utc::now();
        let fire_at = rule.resolve(anchors, now, self.grace)?;

        let item = WorkItem::notification(id, payload, fire_at);
        let id = self.queue.enqueue(item).await?;
        debug!(id = %id, fire_at = %fire_at, "Reminder scheduled");

        // Nudge the dispatcher in case the reminder is already due.
        self.wake.notify();
        Ok(id)
    }

    /// Cancels one reminder. Returns true if a pending or in-flight item
    /// transitioned; cancelling a finished or unknown id is a no-op.
    pub async fn cancel(&self, id: &CorrelationId) -> Result<bool, SchedulerError> {
        let cancelled = self.queue.cancel(id).await?;
        if cancelled {
            self.bus.publish(DeliveryEvent::item_event(
                DeliveryEventType::Cancelled,
                id.clone(),
                None,
            ));
        }
        Ok(cancelled)
    }

    /// Cancels every non-terminal item referencing the entity (reminders
    /// and queued mutations alike). Returns how many transitioned.
    pub async fn cancel_all_for_entity(
        &self,
        entity: &EntityId,
    ) -> Result<usize, SchedulerError> {
        let cancelled = self.queue.cancel_all_for_entity(entity).await?;
        for id in &cancelled {
            self.bus.publish(DeliveryEvent::item_event(
                DeliveryEventType::Cancelled,
                id.clone(),
                None,
            ));
        }
        Ok(cancelled.len())
    }
}
