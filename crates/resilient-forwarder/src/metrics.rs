// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters and timers emitted by the forwarder and the delivery engine.
//!
//! The engine only talks to the [`MetricsReporter`] trait; nothing it reports
//! feeds back into delivery decisions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const REQUESTS_TOTAL: &str = "splunk_requests_total";
pub const REQUESTS_ERROR: &str = "splunk_requests_error";
pub const REQUESTS_DISCARDED: &str = "splunk_requests_discarded";
pub const POST_TIME: &str = "post.time";
pub const QUEUE_LATENCY: &str = "post.queue.latency";

pub trait MetricsReporter: Send + Sync {
    fn increment(&self, name: &'static str);
    fn observe(&self, name: &'static str, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsReporter for NoopMetrics {
    fn increment(&self, _name: &'static str) {}
    fn observe(&self, _name: &'static str, _duration: Duration) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerSummary {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl TimerSummary {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.max = self.max.max(duration);
    }

    #[must_use]
    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::ZERO,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: HashMap<&'static str, u64>,
    pub timers: HashMap<&'static str, TimerSummary>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn timer(&self, name: &str) -> TimerSummary {
        self.timers.get(name).copied().unwrap_or_default()
    }
}

/// Process-local registry, read out through [`InMemoryMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

#[allow(clippy::expect_used)]
impl InMemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().expect("lock poisoned").clone()
    }
}

#[allow(clippy::expect_used)]
impl MetricsReporter for InMemoryMetrics {
    fn increment(&self, name: &'static str) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        *inner.counters.entry(name).or_default() += 1;
    }

    fn observe(&self, name: &'static str, duration: Duration) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.timers.entry(name).or_default().record(duration);
    }
}
