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

//! In-process publish/subscribe for delivery events.
//!
//! The bus is an explicit instance owned by the runner (tests create their
//! own isolated instances; there is no module-level global). Publishing
//! never blocks the dispatcher loop: each subscriber gets an unbounded
//! buffered channel, and subscribers that went away are pruned on the next
//! publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::models::delivery_event::DeliveryEvent;

/// In-process event fan-out to UI observers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<DeliveryEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    ///
    /// The returned subscription unsubscribes itself when dropped.
    pub fn subscribe(self: &Arc<Self>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);
        EventSubscription {
            id,
            receiver: rx,
            bus: Arc::downgrade(self),
        }
    }

    /// Publishes an event to all live subscribers without blocking.
    pub fn publish(&self, event: DeliveryEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        trace!(event_type = %event.event_type, "Publishing delivery event");
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (diagnostics).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }
}

/// A handle to a subscriber's event stream.
///
/// Dropping the subscription removes the subscriber from the bus.
pub struct EventSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<DeliveryEvent>,
    bus: Weak<EventBus>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once the bus is gone and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        self.receiver.recv().await
    }

    /// Returns a buffered event if one is immediately available.
    pub fn try_recv(&mut self) -> Option<DeliveryEvent> {
        self.receiver.try_recv().ok()
    }

    /// Explicitly unsubscribes. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
