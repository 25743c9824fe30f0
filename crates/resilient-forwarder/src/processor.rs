// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The delivery engine.
//!
//! One drain loop moves batches from the [`Cache`] onto the bounded outbound
//! buffer, pacing each release by the shared [`Backoff`] level. Forwarding
//! workers consume the outbound buffer and hand failed events to the bounded
//! inbound buffer, which re-enqueue workers write back to the cache. Full
//! buffers block their writers, so a slow sink throttles the drain loop on
//! its own.
//!
//! Stopping interrupts the drain loop at the next event boundary, including
//! in the middle of a backoff pause. Events of the current batch that were not
//! released yet go straight back to the cache.
//!
//! ```text
//!   Created ──start()──> Running ──stop()──> Stopped
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::cache::Cache;
use crate::config::ForwarderConfig;
use crate::error::{CacheError, ProcessorError};
use crate::forwarder::{Delivery, Forwarder};
use crate::metrics::{MetricsReporter, QUEUE_LATENCY};

/// Pause before polling an empty cache again.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Workers in each pool
    pub workers: usize,
    /// Capacity of each bounded buffer
    pub buffer: usize,
    pub idle_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            buffer: crate::config::DEFAULT_CHAN_BUFFER,
            idle_interval: IDLE_INTERVAL,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&ForwarderConfig> for ProcessorConfig {
    fn from(config: &ForwarderConfig) -> Self {
        Self {
            workers: config.workers,
            buffer: config.chan_buffer,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Running,
    Stopped,
}

struct Channels {
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: mpsc::Receiver<String>,
    inbound_rx: mpsc::Receiver<String>,
}

struct Tasks {
    drain: JoinHandle<()>,
    forwarders: Vec<JoinHandle<()>>,
    reenqueuers: Vec<JoinHandle<()>>,
}

pub struct LogProcessor {
    forwarder: Arc<dyn Forwarder>,
    cache: Arc<dyn Cache>,
    metrics: Arc<dyn MetricsReporter>,
    backoff: Arc<Backoff>,
    config: ProcessorConfig,
    state: Mutex<Lifecycle>,
    shutdown: CancellationToken,
    inbound_tx: Mutex<Option<mpsc::Sender<String>>>,
    channels: Mutex<Option<Channels>>,
    tasks: Mutex<Option<Tasks>>,
}

#[allow(clippy::expect_used)]
impl LogProcessor {
    pub fn new(
        forwarder: Arc<dyn Forwarder>,
        cache: Arc<dyn Cache>,
        metrics: Arc<dyn MetricsReporter>,
        config: ProcessorConfig,
    ) -> Self {
        let config = ProcessorConfig {
            workers: config.workers.max(1),
            buffer: config.buffer.max(1),
            ..config
        };
        let (outbound_tx, outbound_rx) = mpsc::channel(config.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.buffer);

        Self {
            forwarder,
            cache,
            metrics,
            backoff: Arc::new(Backoff::new(config.backoff)),
            config,
            state: Mutex::new(Lifecycle::Created),
            shutdown: CancellationToken::new(),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            channels: Mutex::new(Some(Channels {
                outbound_tx,
                outbound_rx,
                inbound_rx,
            })),
            tasks: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.lock().expect("lock poisoned")
    }

    #[must_use]
    pub fn backoff_level(&self) -> u8 {
        self.backoff.level()
    }

    /// Spawns both worker pools and the drain loop on the current runtime.
    pub fn start(&self) -> Result<(), ProcessorError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            match *state {
                Lifecycle::Created => *state = Lifecycle::Running,
                Lifecycle::Running => return Err(ProcessorError::AlreadyStarted),
                Lifecycle::Stopped => return Err(ProcessorError::Stopped),
            }
        }

        let Some(channels) = self.channels.lock().expect("lock poisoned").take() else {
            return Err(ProcessorError::AlreadyStarted);
        };
        let Some(inbound_tx) = self.inbound_tx.lock().expect("lock poisoned").clone() else {
            return Err(ProcessorError::Stopped);
        };

        let outbound_rx = Arc::new(TokioMutex::new(channels.outbound_rx));
        let forwarders = (0..self.config.workers)
            .map(|worker_id| {
                tokio::spawn(forward_events(
                    worker_id,
                    Arc::clone(&outbound_rx),
                    inbound_tx.clone(),
                    Arc::clone(&self.forwarder),
                    Arc::clone(&self.backoff),
                ))
            })
            .collect();
        drop(inbound_tx);

        let inbound_rx = Arc::new(TokioMutex::new(channels.inbound_rx));
        let reenqueuers = (0..self.config.workers)
            .map(|worker_id| {
                tokio::spawn(cache_events(
                    worker_id,
                    Arc::clone(&inbound_rx),
                    Arc::clone(&self.cache),
                ))
            })
            .collect();

        let drain = tokio::spawn(drain_cache(
            Arc::clone(&self.cache),
            channels.outbound_tx,
            Arc::clone(&self.backoff),
            Arc::clone(&self.metrics),
            self.shutdown.clone(),
            self.config.idle_interval,
        ));

        *self.tasks.lock().expect("lock poisoned") = Some(Tasks {
            drain,
            forwarders,
            reenqueuers,
        });

        info!(
            "PROCESSOR | Started with {} workers per pool and buffers of {}",
            self.config.workers, self.config.buffer
        );
        Ok(())
    }

    /// Stops scheduling new work and waits for every task to finish what it
    /// holds. The drain loop returns the unreleased rest of its batch to the
    /// cache, then the forwarding workers drain the outbound buffer, then the
    /// re-enqueue workers drain the inbound buffer.
    pub async fn stop(&self) -> Result<(), ProcessorError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            match *state {
                Lifecycle::Running => *state = Lifecycle::Stopped,
                Lifecycle::Created => return Err(ProcessorError::NotRunning),
                Lifecycle::Stopped => return Err(ProcessorError::Stopped),
            }
        }

        self.shutdown.cancel();
        let Some(tasks) = self.tasks.lock().expect("lock poisoned").take() else {
            return Err(ProcessorError::NotRunning);
        };

        info!("PROCESSOR | Waiting for workers to finish processing buffered messages");
        let drained = tasks.drain.await;
        let forwarded = join_tasks(tasks.forwarders).await;
        // Closing the last engine-held sender lets the re-enqueue workers exit.
        drop(self.inbound_tx.lock().expect("lock poisoned").take());
        let cached = join_tasks(tasks.reenqueuers).await;

        drained?;
        forwarded?;
        cached?;
        info!("PROCESSOR | Stopped");
        Ok(())
    }

    /// Writes an event onto the inbound buffer, from where it is persisted to
    /// the cache. Waits while the buffer is full. Only accepted while running,
    /// since nothing consumes the buffer before [`LogProcessor::start`].
    pub async fn enqueue(&self, event: String) -> Result<(), ProcessorError> {
        match self.lifecycle() {
            Lifecycle::Running => {}
            Lifecycle::Created => return Err(ProcessorError::NotRunning),
            Lifecycle::Stopped => return Err(ProcessorError::Stopped),
        }
        let tx = self
            .inbound_tx
            .lock()
            .expect("lock poisoned")
            .clone()
            .ok_or(ProcessorError::Stopped)?;
        tx.send(event).await.map_err(|_| ProcessorError::Stopped)
    }

    pub async fn dequeue(&self) -> Result<Vec<String>, CacheError> {
        self.cache.list_and_delete().await
    }
}

async fn join_tasks(handles: Vec<JoinHandle<()>>) -> Result<(), JoinError> {
    let mut first_error = None;
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("PROCESSOR | Worker task failed: {e}");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn next_event(rx: &TokioMutex<mpsc::Receiver<String>>) -> Option<String> {
    rx.lock().await.recv().await
}

async fn forward_events(
    worker_id: usize,
    outbound: Arc<TokioMutex<mpsc::Receiver<String>>>,
    inbound: mpsc::Sender<String>,
    forwarder: Arc<dyn Forwarder>,
    backoff: Arc<Backoff>,
) {
    while let Some(event) = next_event(&outbound).await {
        match forwarder.forward(&event).await {
            Ok(Delivery::Delivered | Delivery::Discarded) => {}
            Err(e) => {
                debug!("PROCESSOR | Forwarding worker {worker_id} will retry event later: {e}");
                backoff.request_increase();
                if inbound.send(event).await.is_err() {
                    error!("PROCESSOR | Inbound buffer closed, dropping failed event");
                }
            }
        }
    }
    debug!("PROCESSOR | Forwarding worker {worker_id} stopped");
}

async fn cache_events(
    worker_id: usize,
    inbound: Arc<TokioMutex<mpsc::Receiver<String>>>,
    cache: Arc<dyn Cache>,
) {
    while let Some(event) = next_event(&inbound).await {
        if let Err(e) = cache.put(&event).await {
            error!("PROCESSOR | Unexpected error when caching message, dropping it: {e}");
        }
    }
    debug!("PROCESSOR | Re-enqueue worker {worker_id} stopped");
}

async fn drain_cache(
    cache: Arc<dyn Cache>,
    outbound: mpsc::Sender<String>,
    backoff: Arc<Backoff>,
    metrics: Arc<dyn MetricsReporter>,
    shutdown: CancellationToken,
    idle_interval: Duration,
) {
    while !shutdown.is_cancelled() {
        let events = match cache.list_and_delete().await {
            Ok(events) => events,
            Err(e) => {
                error!("PROCESSOR | Failure retrieving logs from cache: {e}");
                Vec::new()
            }
        };

        // don't hot-poll an empty cache
        if events.is_empty() {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(idle_interval) => {}
            }
            continue;
        }
        debug!("PROCESSOR | Read {} messages from cache", events.len());

        let mut pending = events.into_iter();
        while let Some(event) = pending.next() {
            match release(event, &outbound, &backoff, metrics.as_ref(), &shutdown).await {
                Released::Sent => {}
                Released::Interrupted(event) => {
                    return_to_cache(cache.as_ref(), std::iter::once(event).chain(pending)).await;
                    break;
                }
                Released::Closed => {
                    warn!("PROCESSOR | Outbound buffer closed, drain loop exiting");
                    return;
                }
            }
        }
    }
    debug!("PROCESSOR | Drain loop stopped");
}

enum Released {
    Sent,
    /// Stop was requested before the event left the drain loop.
    Interrupted(String),
    Closed,
}

/// Paces one event by the backoff level, then waits for room in the outbound
/// buffer. Both waits give up as soon as stop is requested.
async fn release(
    event: String,
    outbound: &mpsc::Sender<String>,
    backoff: &Backoff,
    metrics: &dyn MetricsReporter,
    shutdown: &CancellationToken,
) -> Released {
    if shutdown.is_cancelled() {
        return Released::Interrupted(event);
    }

    let level = backoff.step();
    if level > 0 {
        let delay = backoff.delay(level);
        debug!("PROCESSOR | Backoff level {level}, sleeping for {delay:?}");
        tokio::select! {
            () = shutdown.cancelled() => return Released::Interrupted(event),
            () = tokio::time::sleep(delay) => {}
        }
    }

    let start = Instant::now();
    let permit = tokio::select! {
        () = shutdown.cancelled() => return Released::Interrupted(event),
        permit = outbound.reserve() => permit,
    };
    match permit {
        Ok(permit) => {
            permit.send(event);
            metrics.observe(QUEUE_LATENCY, start.elapsed());
            Released::Sent
        }
        Err(_) => Released::Closed,
    }
}

async fn return_to_cache(cache: &dyn Cache, events: impl Iterator<Item = String>) {
    let events: Vec<String> = events.collect();
    info!(
        "PROCESSOR | Returning {} unreleased messages to the cache",
        events.len()
    );
    for result in futures::future::join_all(events.iter().map(|event| cache.put(event))).await {
        if let Err(e) = result {
            error!("PROCESSOR | Unexpected error when caching message, dropping it: {e}");
        }
    }
}
