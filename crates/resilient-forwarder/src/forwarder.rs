// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of single events to the Splunk HTTP event collector.
//!
//! A 200 response is a delivery. A 400 means the event is malformed and will
//! never be accepted, so it is discarded rather than retried. Anything else,
//! including transport errors, is a retryable failure.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::config::ForwarderConfig;
use crate::error::{ForwardError, Healthy, Unhealthy};
use crate::http::get_client;
use crate::metrics::{
    MetricsReporter, POST_TIME, REQUESTS_DISCARDED, REQUESTS_ERROR, REQUESTS_TOTAL,
};

/// Terminal outcome of an attempt that does not need a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Discarded,
}

#[async_trait]
pub trait Forwarder: Healthy {
    /// Sends one event. `Err` means the event should be retried later.
    async fn forward(&self, event: &str) -> Result<Delivery, ForwardError>;
}

pub struct SplunkForwarder {
    client: reqwest::Client,
    url: String,
    authorization: HeaderValue,
    metrics: Arc<dyn MetricsReporter>,
    latest_error: Mutex<Option<Unhealthy>>,
}

impl SplunkForwarder {
    pub fn new(
        config: &ForwarderConfig,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Result<Self, ForwardError> {
        let client = get_client(config.workers, config.forward_timeout);
        Self::with_client(client, config.forward_url.clone(), &config.token, metrics)
    }

    pub fn with_client(
        client: reqwest::Client,
        url: String,
        token: &str,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Result<Self, ForwardError> {
        let mut authorization = HeaderValue::from_str(&format!("Splunk {token}"))?;
        authorization.set_sensitive(true);
        Ok(Self {
            client,
            url,
            authorization,
            metrics,
            latest_error: Mutex::new(None),
        })
    }

    async fn send(&self, event: &str) -> Result<Delivery, ForwardError> {
        let resp = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, self.authorization.clone())
            .body(event.to_owned())
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics.increment(REQUESTS_ERROR);
                error!("FORWARDER | Failed to send event to {}: {e}", self.url);
                return Err(ForwardError::Transport(e));
            }
        };

        let status = resp.status();
        // Read the body out so the connection goes back to the pool.
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::OK {
            return Ok(Delivery::Delivered);
        }

        self.metrics.increment(REQUESTS_ERROR);
        warn!(
            "FORWARDER | Unexpected status code {status} when sending {} bytes to {}: {body}",
            event.len(),
            self.url
        );
        if status == StatusCode::BAD_REQUEST {
            self.metrics.increment(REQUESTS_DISCARDED);
            warn!("FORWARDER | Discarding malformed message");
            debug!("FORWARDER | Discarded message: {event}");
            Ok(Delivery::Discarded)
        } else {
            Err(ForwardError::Status(status))
        }
    }

    #[allow(clippy::expect_used)]
    fn record(&self, result: &Result<Delivery, ForwardError>) {
        let mut latest = self.latest_error.lock().expect("lock poisoned");
        *latest = result.as_ref().err().map(|e| Unhealthy::from_error(e));
    }
}

#[async_trait]
impl Forwarder for SplunkForwarder {
    async fn forward(&self, event: &str) -> Result<Delivery, ForwardError> {
        let start = Instant::now();
        self.metrics.increment(REQUESTS_TOTAL);
        let result = self.send(event).await;
        self.metrics.observe(POST_TIME, start.elapsed());
        self.record(&result);
        result
    }
}

impl Healthy for SplunkForwarder {
    #[allow(clippy::expect_used)]
    fn health(&self) -> Result<(), Unhealthy> {
        match self.latest_error.lock().expect("lock poisoned").as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
