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

//! Availability monitoring for the live-update transport.
//!
//! The monitor wraps the connectivity probe with a short-TTL cache and a
//! hysteretic state machine: it takes several consecutive failed probes to
//! declare the transport [`Availability::Unavailable`], but a single
//! success to come back. The asymmetry avoids flapping while recovering
//! quickly.
//!
//! The current state selects the system-wide [`TransportMode`]: push-driven
//! operation (subscribe to live updates, long poll fallback) when
//! available, poll-driven operation when not. The dispatcher's wake
//! strategy and any read-refresh logic both consume the same mode instead
//! of carrying their own fallback heuristics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::events::EventBus;
use crate::models::delivery_event::{DeliveryEvent, DeliveryEventType};
use crate::sink::ConnectivityProbe;

/// Whether the live-update transport is currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

/// How the engine should drive itself given current availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Live updates flow; poll only as a long-interval fallback.
    Push,
    /// Transport down; poll on the short interval.
    Poll,
}

/// Tuning for the availability monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a probe result stays fresh.
    pub ttl: Duration,
    /// Consecutive failed probes before declaring `Unavailable`.
    pub failure_threshold: u32,
    /// Background probe cadence.
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            failure_threshold: 2,
            probe_interval: Duration::from_secs(15),
        }
    }
}

struct MonitorState {
    availability: Availability,
    consecutive_failures: u32,
    last_probe: Option<Instant>,
}

/// Hysteretic, cached view over the connectivity probe.
pub struct AvailabilityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    bus: Arc<EventBus>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl AvailabilityMonitor {
    /// Creates a monitor that starts out assuming the transport is up.
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        bus: Arc<EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            probe,
            bus,
            config,
            state: Mutex::new(MonitorState {
                availability: Availability::Available,
                consecutive_failures: 0,
                last_probe: None,
            }),
        }
    }

    /// Returns current availability, probing if the cached result expired.
    pub async fn check(&self) -> Availability {
        {
            let state = self.state.lock();
            if let Some(last) = state.last_probe {
                if last.elapsed() < self.config.ttl {
                    return state.availability;
                }
            }
        }
        self.probe_once().await
    }

    /// Current availability from cache only; never probes.
    pub fn cached(&self) -> Availability {
        self.state.lock().availability
    }

    /// The operating mode implied by current availability.
    pub fn mode(&self) -> TransportMode {
        match self.cached() {
            Availability::Available => TransportMode::Push,
            Availability::Unavailable => TransportMode::Poll,
        }
    }

    /// Runs one probe and folds the result into the hysteresis state.
    /// Publishes `AvailabilityChanged` when the state flips.
    pub async fn probe_once(&self) -> Availability {
        let up = self.probe.probe().await;

        let (availability, changed) = {
            let mut state = self.state.lock();
            state.last_probe = Some(Instant::now());
            let before = state.availability;

            if up {
                state.consecutive_failures = 0;
                // One good probe is enough to recover.
                state.availability = Availability::Available;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.availability = Availability::Unavailable;
                }
            }
            (state.availability, state.availability != before)
        };

        if changed {
            let mode = match availability {
                Availability::Available => "push",
                Availability::Unavailable => "poll",
            };
            info!(mode, "Live-update transport availability changed");
            self.bus.publish(DeliveryEvent::engine_event(
                DeliveryEventType::AvailabilityChanged,
                Some(mode.to_string()),
            ));
        } else {
            debug!(up, "Connectivity probe completed");
        }

        availability
    }

    /// Background probing loop. Returns when `shutdown` is set.
    pub async fn run(&self, shutdown: Arc<AtomicBool>, stop: Arc<tokio::sync::Notify>) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = stop.notified() => {}
                _ = tokio::time::sleep(self.config.probe_interval) => {
                    self.probe_once().await;
                }
            }
        }
        debug!("Availability monitor stopped");
    }
}
