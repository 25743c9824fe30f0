// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used to reach the Splunk event collector.

use std::time::Duration;
use tracing::error;

/// Builds a pooled client that skips certificate verification.
///
/// The idle pool keeps one connection per worker. If the builder fails the
/// error is logged and reqwest defaults are used instead.
#[must_use]
pub fn get_client(workers: usize, timeout: Duration) -> reqwest::Client {
    match build_client(workers, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("FORWARDER | Failed to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

fn build_client(workers: usize, timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(workers)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .timeout(timeout)
        .build()
}
