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

//! Retry policy with exponential backoff.
//!
//! The dispatcher uses one [`RetryPolicy`] for all work items: the delay
//! before attempt `n + 1` is `initial_backoff * 2^(n-1)` capped at
//! `max_backoff`, with optional ±10% jitter so a burst of failures does not
//! reschedule everything onto the same tick.

use std::time::Duration;

use rand::Rng;

/// Backoff and retry-limit parameters for failed dispatch attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum dispatch attempts before an item is dead-lettered.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the computed delay.
    pub max_backoff: Duration,
    /// Spread delays by ±10% to avoid retry stampedes.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Returns true once `attempts` has reached the retry limit.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Computes the backoff delay after the given attempt count.
    ///
    /// `attempt` is the number of attempts made so far (1 for the first
    /// failure). Values below 1 are treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        // Cap the shift well before u64 overflow; max_backoff clamps anyway.
        let shift = attempt.max(1).saturating_sub(1).min(20);
        let base_ms = self.initial_backoff.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(1u64 << shift);
        let capped_ms = raw_ms.min(self.max_backoff.as_millis() as u64);

        let delay_ms = if self.jitter && capped_ms > 0 {
            let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
            (capped_ms as f64 * factor) as u64
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms)
    }
}
