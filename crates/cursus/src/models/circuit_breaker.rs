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

//! Circuit Breaker Model
//!
//! A fail-fast guard in front of the remote sinks. After
//! `failure_threshold` consecutive sink failures the breaker opens and
//! dispatch attempts are rescheduled without touching the sink at all.
//! Once `cooldown` elapses, exactly one trial dispatch is allowed through
//! (half-open); its outcome either closes the breaker or re-opens it for
//! another cooldown.
//!
//! This is a pure synchronous state machine: the dispatcher consults
//! [`CircuitBreaker::assess`] before each sink call and reports outcomes
//! through [`record_success`](CircuitBreaker::record_success) /
//! [`record_failure`](CircuitBreaker::record_failure).

use chrono::{DateTime, Duration, Utc};

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Sink calls flow normally.
    Closed,
    /// Sink calls are fast-failed until the cooldown elapses.
    Open { opened_at: DateTime<Utc> },
    /// Cooldown elapsed; one trial call decides the next state.
    HalfOpen,
}

/// What the dispatcher should do with the next dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Call the sink normally.
    Allow,
    /// Call the sink as the single half-open trial.
    AllowTrial,
    /// Do not call the sink; reschedule with the standard backoff.
    FailFast,
}

/// Consecutive-failure circuit breaker with a single half-open trial.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    /// Set while the half-open trial dispatch is outstanding, so only one
    /// attempt goes through per cooldown.
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// # Arguments
    ///
    /// * `failure_threshold` - consecutive failures before opening
    /// * `cooldown` - how long to fast-fail before allowing a trial
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            trial_in_flight: false,
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Returns true while sink calls are being fast-failed.
    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    /// Number of consecutive sink failures observed.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decides whether the next dispatch may call the sink.
    ///
    /// Transitions `Open -> HalfOpen` once the cooldown has elapsed and
    /// hands out the single trial slot. Every other caller while the trial
    /// is outstanding gets [`BreakerDecision::FailFast`].
    pub fn assess(&mut self, now: DateTime<Utc>) -> BreakerDecision {
        match self.state {
            BreakerState::Closed => BreakerDecision::Allow,
            BreakerState::Open { opened_at } => {
                if now < opened_at + self.cooldown {
                    BreakerDecision::FailFast
                } else {
                    self.state = BreakerState::HalfOpen;
                    self.trial_in_flight = true;
                    BreakerDecision::AllowTrial
                }
            }
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    BreakerDecision::FailFast
                } else {
                    self.trial_in_flight = true;
                    BreakerDecision::AllowTrial
                }
            }
        }
    }

    /// Records a successful sink call: resets the failure streak and closes
    /// the breaker if it was half-open.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
        self.state = BreakerState::Closed;
    }

    /// Records a failed sink call.
    ///
    /// A failed half-open trial re-opens the breaker for another cooldown;
    /// a closed breaker opens once the failure streak reaches the
    /// threshold. Fast-failed attempts must not be reported here — only
    /// real sink outcomes count.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::HalfOpen => {
                self.trial_in_flight = false;
                self.state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Closed => {
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = BreakerState::Open { opened_at: now };
                }
            }
            BreakerState::Open { .. } => {}
        }
    }
}
