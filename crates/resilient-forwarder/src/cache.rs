// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object storage backed holding area for events awaiting delivery.
//!
//! Every event is its own object, keyed `<prefix>/<unix nanos>_<uuid>`.
//! [`Cache::list_and_delete`] lists the oldest batch, fetches every body
//! concurrently and only deletes once all fetches succeeded, so a failed read
//! never loses an event. A failed delete leaves the batch in place to be
//! delivered again.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use futures::StreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CacheError, Healthy, Unhealthy};
use crate::BATCH_SIZE;

#[async_trait]
pub trait Cache: Healthy {
    async fn put(&self, event: &str) -> Result<(), CacheError>;
    async fn list_and_delete(&self) -> Result<Vec<String>, CacheError>;
}

/// Minimal storage operations the cache needs.
///
/// Keys are [`Path`]s from end to end so a listed location is handed back to
/// `get` and `delete` exactly as the store reported it, without being encoded
/// a second time.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Up to `limit` keys under `prefix`, oldest first.
    ///
    /// Backends are expected to list in lexical key order (S3 and the
    /// in-memory store do). Only the page that was taken is sorted.
    async fn list(&self, prefix: &Path, limit: usize) -> Result<Vec<Path>, CacheError>;
    async fn get(&self, key: &Path) -> Result<Bytes, CacheError>;
    async fn put(&self, key: &Path, body: Bytes) -> Result<(), CacheError>;
    async fn delete(&self, keys: &[Path]) -> Result<(), CacheError>;
}

/// [`ObjectStorage`] over any `object_store` backend (S3 in production).
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn list(&self, prefix: &Path, limit: usize) -> Result<Vec<Path>, CacheError> {
        let mut stream = self.store.list(Some(prefix)).take(limit);
        let mut keys = Vec::with_capacity(limit);
        while let Some(meta) = stream.next().await {
            keys.push(meta?.location);
        }
        // Keys embed the write timestamp, so lexical order is age order.
        keys.sort_unstable();
        Ok(keys)
    }

    async fn get(&self, key: &Path) -> Result<Bytes, CacheError> {
        let result = self.store.get(key).await?;
        Ok(result.bytes().await?)
    }

    async fn put(&self, key: &Path, body: Bytes) -> Result<(), CacheError> {
        self.store.put(key, body.into()).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[Path]) -> Result<(), CacheError> {
        let locations = futures::stream::iter(keys.iter().cloned().map(Ok)).boxed();
        let mut results = self.store.delete_stream(locations);
        while let Some(result) = results.next().await {
            result?;
        }
        Ok(())
    }
}

pub struct ObjectCache {
    storage: Arc<dyn ObjectStorage>,
    prefix: Path,
    batch_size: usize,
    last_timestamp: AtomicU64,
    latest_error: Mutex<Option<Unhealthy>>,
}

impl ObjectCache {
    /// `prefix` is free-form text; characters object stores reserve are
    /// percent-encoded once, here.
    pub fn new(storage: Arc<dyn ObjectStorage>, prefix: &str) -> Self {
        Self {
            storage,
            prefix: Path::from(prefix),
            batch_size: BATCH_SIZE,
            last_timestamp: AtomicU64::new(0),
            latest_error: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Builds a fresh key. The timestamp part never repeats or goes
    /// backwards within this process, even if the wall clock does.
    fn object_key(&self) -> Path {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let timestamp = now.max(previous.saturating_add(1));
        self.prefix
            .child(format!("{}_{}", timestamp, Uuid::new_v4()))
    }

    async fn fetch(&self, key: &Path) -> Result<String, CacheError> {
        let body = self.storage.get(key).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    #[allow(clippy::expect_used)]
    fn record(&self, error: Option<&CacheError>) {
        let mut latest = self.latest_error.lock().expect("lock poisoned");
        *latest = error.map(|e| Unhealthy::from_error(e));
    }
}

#[async_trait]
impl Cache for ObjectCache {
    async fn put(&self, event: &str) -> Result<(), CacheError> {
        let key = self.object_key();
        let result = self
            .storage
            .put(&key, Bytes::copy_from_slice(event.as_bytes()))
            .await;
        self.record(result.as_ref().err());
        result
    }

    async fn list_and_delete(&self) -> Result<Vec<String>, CacheError> {
        let keys = match self.storage.list(&self.prefix, self.batch_size).await {
            Ok(keys) => keys,
            Err(e) => {
                self.record(Some(&e));
                return Err(e);
            }
        };
        self.record(None);

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Fetch and delete errors are not recorded as unhealthy: another
        // consumer may legitimately have taken these objects first.
        let bodies = join_all(keys.iter().map(|key| self.fetch(key))).await;
        let events = bodies.into_iter().collect::<Result<Vec<_>, _>>()?;

        self.storage.delete(&keys).await?;
        debug!("CACHE | Took {} events from {}", events.len(), self.prefix);
        Ok(events)
    }
}

impl Healthy for ObjectCache {
    #[allow(clippy::expect_used)]
    fn health(&self) -> Result<(), Unhealthy> {
        match self.latest_error.lock().expect("lock poisoned").as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
