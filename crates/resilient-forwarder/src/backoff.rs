// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared throttle for the drain loop.
//!
//! Forwarding workers call [`Backoff::request_increase`] when a delivery fails.
//! The drain loop calls [`Backoff::step`] once per released event: a pending
//! increase bumps the level by one, otherwise the level decays by one. Several
//! failures between two steps coalesce into a single increase.

use std::sync::Mutex;
use std::time::Duration;

pub const MIN_LEVEL: u8 = 0;
pub const MAX_LEVEL: u8 = 9;

/// Delay curve applied by the drain loop: `base * (2^level - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_level: u8,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max_level: MAX_LEVEL,
        }
    }
}

impl BackoffPolicy {
    /// Zero at level 0, ~0.2s at level 1, ~102s at level 9 with the default base.
    #[must_use]
    pub fn delay(&self, level: u8) -> Duration {
        let level = level.min(self.max_level).min(MAX_LEVEL);
        let factor = (1u32 << level) - 1;
        self.base * factor
    }
}

#[derive(Debug, Default)]
struct State {
    level: u8,
    level_up: bool,
}

#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    state: Mutex<State>,
}

#[allow(clippy::expect_used)]
impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy: BackoffPolicy {
                max_level: policy.max_level.min(MAX_LEVEL),
                ..policy
            },
            state: Mutex::new(State::default()),
        }
    }

    /// Flags a failure for the next [`Backoff::step`].
    pub fn request_increase(&self) {
        self.state.lock().expect("lock poisoned").level_up = true;
    }

    /// Applies the pending decision and returns the new level.
    pub fn step(&self) -> u8 {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.level_up {
            if state.level < self.policy.max_level {
                state.level += 1;
            }
            state.level_up = false;
        } else if state.level > MIN_LEVEL {
            state.level -= 1;
        }
        state.level
    }

    #[must_use]
    pub fn level(&self) -> u8 {
        self.state.lock().expect("lock poisoned").level
    }

    #[must_use]
    pub fn delay(&self, level: u8) -> Duration {
        self.policy.delay(level)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
