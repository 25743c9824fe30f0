// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Resilient Forwarder
//!
//! Relays log events to a Splunk HTTP event collector that is sometimes
//! unavailable or rate limiting, using an object store as a shock absorber.
//!
//! ```text
//!   ObjectCache ──[drain loop, backoff paced]──> outbound ──> forwarding workers ──> Splunk
//!        ^                                                          │
//!        │                                                   retryable failure
//!        └────────── re-enqueue workers <────────── inbound <───────┘
//! ```
//!
//! - [`cache`]: durable queue contract and its object storage implementation
//! - [`forwarder`]: the Splunk sink
//! - [`processor`]: the delivery engine owning both worker pools
//! - [`backoff`]: the shared adaptive backoff controller

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backoff;
pub mod cache;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod health;
pub mod http;
pub mod metrics;
pub mod processor;

/// Objects listed, fetched and deleted per `list_and_delete` call.
pub const BATCH_SIZE: usize = 100;
