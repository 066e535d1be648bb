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

//! Wake signal for the dispatcher loop.
//!
//! Enqueuers nudge the dispatcher so newly due work is picked up without
//! waiting for the next poll tick. The signal is an optimization only:
//! [`WakeSignal::wait`] always falls back to a timed poll, so correctness
//! never depends on a wake arriving.

use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

/// Notify-or-poll wake primitive for background loops.
#[derive(Default)]
pub struct WakeSignal {
    notify: Notify,
}

impl WakeSignal {
    /// Creates a new signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the waiting loop early, if it is waiting.
    pub fn notify(&self) {
        self.notify.notify_waiters();
    }

    /// Waits until notified or until `fallback` elapses, whichever comes
    /// first.
    pub async fn wait(&self, fallback: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {
                trace!("Woke from wake signal");
            }
            _ = tokio::time::sleep(fallback) => {
                trace!("Woke from poll fallback");
            }
        }
    }
}
