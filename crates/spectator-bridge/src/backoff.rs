// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect backoff policy for relay sinks.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff with additive jitter.
///
/// The delay before attempt `k` (0-based) is
/// `min(base * multiplier^k, max_delay) + jitter`, with jitter drawn from
/// `[0, max_jitter)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Growth factor per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Cap applied before jitter (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter (milliseconds).
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Attempts before automatic reconnection is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_jitter_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy without jitter, mostly useful in tests.
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter_ms = 0;
        self
    }

    /// Set the attempt ceiling.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Capped delay for `attempt`, jitter excluded.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Delay for `attempt` using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Delay for `attempt` drawing jitter from `rng`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.max_jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }

    /// Longest delay this policy can produce.
    pub fn max_total_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.saturating_add(self.max_jitter_ms))
    }

    /// True once `attempt` attempts have been made and no more are allowed.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
