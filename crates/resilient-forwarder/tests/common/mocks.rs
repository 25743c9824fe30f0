// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the queue and sink seams

use async_trait::async_trait;
use resilient_forwarder::cache::Cache;
use resilient_forwarder::error::{CacheError, ForwardError, Healthy, Unhealthy};
use resilient_forwarder::forwarder::{Delivery, Forwarder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory queue that hands out everything it holds on each read.
///
/// Writes rewrite `retry` to `safe` and then `error` to `retry`, so an event
/// carrying `simulated_error` is seen by the sink as `simulated_retry` and, once
/// written back after a failure, as `simulated_safe`.
#[derive(Default)]
pub struct MockCache {
    items: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockCache {
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl Healthy for MockCache {
    fn health(&self) -> Result<(), Unhealthy> {
        Ok(())
    }
}

#[async_trait]
impl Cache for MockCache {
    async fn put(&self, event: &str) -> Result<(), CacheError> {
        let event = event.replace("retry", "safe").replace("error", "retry");
        self.items.lock().unwrap().push(event);
        Ok(())
    }

    async fn list_and_delete(&self) -> Result<Vec<String>, CacheError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(std::mem::take(&mut *self.items.lock().unwrap()))
    }
}

/// Sink that fails the first attempt of every event and accepts the second.
#[derive(Default)]
pub struct FlakyForwarder {
    attempted: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FlakyForwarder {
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Healthy for FlakyForwarder {
    fn health(&self) -> Result<(), Unhealthy> {
        Ok(())
    }
}

#[async_trait]
impl Forwarder for FlakyForwarder {
    async fn forward(&self, event: &str) -> Result<Delivery, ForwardError> {
        if self.attempted.lock().unwrap().insert(event.to_string()) {
            return Err(ForwardError::Status(
                reqwest::StatusCode::SERVICE_UNAVAILABLE,
            ));
        }
        self.delivered.lock().unwrap().push(event.to_string());
        Ok(Delivery::Delivered)
    }
}

/// Sink whose requests never complete.
#[derive(Default)]
pub struct PendingForwarder {
    started: AtomicUsize,
}

#[allow(dead_code)]
impl PendingForwarder {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl Healthy for PendingForwarder {
    fn health(&self) -> Result<(), Unhealthy> {
        Ok(())
    }
}

#[async_trait]
impl Forwarder for PendingForwarder {
    async fn forward(&self, _event: &str) -> Result<Delivery, ForwardError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<Result<Delivery, ForwardError>>().await
    }
}
