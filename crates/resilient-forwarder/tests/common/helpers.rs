// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use resilient_forwarder::backoff::BackoffPolicy;
use resilient_forwarder::processor::ProcessorConfig;
use std::future::Future;
use std::time::{Duration, Instant};

pub const ACCESS_LOG_EVENT: &str = r#"{event:"127.0.0.1 - - [21/Apr/2015:12:15:34 +0000] \"GET /eom-file/all/e09b49d6-e1fa-11e4-bb7f-00144feab7de HTTP/1.1\" 200 53706 919 919"}"#;

/// Engine settings with short pauses so tests finish quickly.
#[allow(dead_code)]
pub fn fast_config(workers: usize, buffer: usize) -> ProcessorConfig {
    ProcessorConfig {
        workers,
        buffer,
        idle_interval: Duration::from_millis(10),
        backoff: BackoffPolicy {
            base: Duration::from_millis(1),
            max_level: 4,
        },
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
