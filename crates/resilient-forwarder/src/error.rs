// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors returned by a single delivery attempt to the sink.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Errors returned by the durable queue.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("object store error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the delivery engine lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor already started")]
    AlreadyStarted,

    #[error("processor not running")]
    NotRunning,

    #[error("processor stopped")]
    Stopped,

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be provided")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Snapshot of the most recent error seen by a component.
///
/// Holds the rendered message only so it can be cloned out of the component
/// while the source error stays owned by whoever returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unhealthy(String);

impl Unhealthy {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self(error.to_string())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unhealthy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Unhealthy {}

/// Components that report the outcome of their most recent operation.
pub trait Healthy: Send + Sync {
    fn health(&self) -> Result<(), Unhealthy>;
}
