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

//! Configuration types for the DeliveryRunner.
//!
//! This module contains the configuration struct and builder for tuning
//! the runner's behavior: dispatch concurrency, polling cadence, sink
//! timeouts, retry/backoff limits, circuit-breaker thresholds, probe
//! hysteresis, and terminal-item retention.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for the delivery runner.
///
/// # Construction
///
/// Use [`DeliveryRunnerConfig::builder()`] to create a configuration:
///
/// ```rust,ignore
/// let config = DeliveryRunnerConfig::builder()
///     .max_concurrent_dispatches(8)
///     .sink_timeout(Duration::from_secs(5))
///     .build();
/// ```
///
/// Or use the default configuration:
///
/// ```rust,ignore
/// let config = DeliveryRunnerConfig::default();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DeliveryRunnerConfig {
    max_concurrent_dispatches: usize,
    poll_interval: Duration,
    push_fallback_interval: Duration,
    sink_timeout: Duration,
    retry_policy: RetryPolicy,
    breaker_failure_threshold: u32,
    breaker_cooldown: Duration,
    probe_interval: Duration,
    probe_ttl: Duration,
    probe_failure_threshold: u32,
    schedule_grace: Duration,
    retention: Duration,
    sweep_interval: Duration,
}

impl DeliveryRunnerConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> DeliveryRunnerConfigBuilder {
        DeliveryRunnerConfigBuilder::default()
    }

    /// Maximum number of concurrent dispatch attempts.
    pub fn max_concurrent_dispatches(&self) -> usize {
        self.max_concurrent_dispatches
    }

    /// Dispatcher poll interval while the transport is down.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Dispatcher poll fallback interval while push updates flow.
    pub fn push_fallback_interval(&self) -> Duration {
        self.push_fallback_interval
    }

    /// Bound on a single sink call before it counts as a failure.
    pub fn sink_timeout(&self) -> Duration {
        self.sink_timeout
    }

    /// Retry limits and backoff parameters.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Consecutive sink failures before the circuit breaker opens.
    pub fn breaker_failure_threshold(&self) -> u32 {
        self.breaker_failure_threshold
    }

    /// How long the open breaker fast-fails before allowing a trial.
    pub fn breaker_cooldown(&self) -> Duration {
        self.breaker_cooldown
    }

    /// Background connectivity probe cadence.
    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    /// How long a probe result stays fresh.
    pub fn probe_ttl(&self) -> Duration {
        self.probe_ttl
    }

    /// Consecutive failed probes before declaring the transport down.
    pub fn probe_failure_threshold(&self) -> u32 {
        self.probe_failure_threshold
    }

    /// Offset applied to reminders whose resolved time already passed.
    pub fn schedule_grace(&self) -> Duration {
        self.schedule_grace
    }

    /// How long terminal items are kept before the sweeper removes them.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// How often the retention sweeper runs.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for DeliveryRunnerConfig {
    fn default() -> Self {
        DeliveryRunnerConfigBuilder::default().build()
    }
}

/// Builder for [`DeliveryRunnerConfig`].
#[derive(Debug, Clone)]
pub struct DeliveryRunnerConfigBuilder {
    config: DeliveryRunnerConfig,
}

impl Default for DeliveryRunnerConfigBuilder {
    fn default() -> Self {
        Self {
            config: DeliveryRunnerConfig {
                max_concurrent_dispatches: 4,
                poll_interval: Duration::from_millis(500),
                push_fallback_interval: Duration::from_secs(30),
                sink_timeout: Duration::from_secs(10),
                retry_policy: RetryPolicy::default(),
                breaker_failure_threshold: 5,
                breaker_cooldown: Duration::from_secs(30),
                probe_interval: Duration::from_secs(15),
                probe_ttl: Duration::from_secs(5),
                probe_failure_threshold: 2,
                schedule_grace: Duration::from_secs(5),
                retention: Duration::from_secs(24 * 60 * 60),
                sweep_interval: Duration::from_secs(60 * 60),
            },
        }
    }
}

impl DeliveryRunnerConfigBuilder {
    /// Sets the maximum number of concurrent dispatch attempts.
    pub fn max_concurrent_dispatches(mut self, value: usize) -> Self {
        self.config.max_concurrent_dispatches = value;
        self
    }

    /// Sets the poll interval used while the transport is down.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    /// Sets the poll fallback interval used while push updates flow.
    pub fn push_fallback_interval(mut self, value: Duration) -> Self {
        self.config.push_fallback_interval = value;
        self
    }

    /// Sets the sink call timeout.
    pub fn sink_timeout(mut self, value: Duration) -> Self {
        self.config.sink_timeout = value;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, value: RetryPolicy) -> Self {
        self.config.retry_policy = value;
        self
    }

    /// Sets the circuit breaker failure threshold.
    pub fn breaker_failure_threshold(mut self, value: u32) -> Self {
        self.config.breaker_failure_threshold = value;
        self
    }

    /// Sets the circuit breaker cooldown.
    pub fn breaker_cooldown(mut self, value: Duration) -> Self {
        self.config.breaker_cooldown = value;
        self
    }

    /// Sets the background probe cadence.
    pub fn probe_interval(mut self, value: Duration) -> Self {
        self.config.probe_interval = value;
        self
    }

    /// Sets the probe cache TTL.
    pub fn probe_ttl(mut self, value: Duration) -> Self {
        self.config.probe_ttl = value;
        self
    }

    /// Sets the probe failure threshold.
    pub fn probe_failure_threshold(mut self, value: u32) -> Self {
        self.config.probe_failure_threshold = value;
        self
    }

    /// Sets the grace offset for past-due reminder resolutions.
    pub fn schedule_grace(mut self, value: Duration) -> Self {
        self.config.schedule_grace = value;
        self
    }

    /// Sets the terminal-item retention window.
    pub fn retention(mut self, value: Duration) -> Self {
        self.config.retention = value;
        self
    }

    /// Sets the retention sweeper cadence.
    pub fn sweep_interval(mut self, value: Duration) -> Self {
        self.config.sweep_interval = value;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DeliveryRunnerConfig {
        self.config
    }
}
