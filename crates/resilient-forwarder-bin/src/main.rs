// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use object_store::aws::AmazonS3Builder;
use std::{process, sync::Arc};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use resilient_forwarder::{
    cache::{Cache, ObjectCache, ObjectStoreBackend},
    config::ForwarderConfig,
    error::Healthy,
    forwarder::SplunkForwarder,
    health::HealthService,
    metrics::{
        InMemoryMetrics, POST_TIME, QUEUE_LATENCY, REQUESTS_DISCARDED, REQUESTS_ERROR,
        REQUESTS_TOTAL,
    },
    processor::{LogProcessor, ProcessorConfig},
};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
const PANIC_GUIDE: &str = "https://runbooks.in.ft.com/resilient-splunk-forwarder";

#[tokio::main]
pub async fn main() {
    let config = ForwarderConfig::from_env();
    // an invalid configuration is still reported at the default level
    init_logging(config.as_ref().map_or("info", |config| config.log_level.as_str()));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };
    info!(
        "Starting {} ({}) forwarding to {} with {} workers",
        config.app_name, config.app_system_code, config.forward_url, config.workers
    );

    let mut s3 = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
    if let Some(region) = &config.aws_region {
        s3 = s3.with_region(region);
    }
    let store = match s3.build() {
        Ok(store) => store,
        Err(e) => {
            error!("Unable to create S3 client for bucket {}: {e}", config.bucket);
            process::exit(1);
        }
    };

    let metrics = Arc::new(InMemoryMetrics::new());
    let cache = Arc::new(ObjectCache::new(
        Arc::new(ObjectStoreBackend::new(Arc::new(store))),
        &config.env,
    ));
    let forwarder = match SplunkForwarder::new(&config, Arc::clone(&metrics) as _) {
        Ok(forwarder) => Arc::new(forwarder),
        Err(e) => {
            error!("Unable to create Splunk forwarder: {e}");
            process::exit(1);
        }
    };

    let health = HealthService::new(
        config.app_system_code.clone(),
        config.app_name.clone(),
        HealthService::forwarder_checks(
            Arc::clone(&forwarder) as Arc<dyn Healthy>,
            Arc::clone(&cache) as Arc<dyn Healthy>,
            PANIC_GUIDE,
        ),
    );

    let processor = LogProcessor::new(
        forwarder,
        cache as Arc<dyn Cache>,
        Arc::clone(&metrics) as _,
        ProcessorConfig::from(&config),
    );
    if let Err(e) = processor.start() {
        error!("Unable to start log processor: {e}");
        process::exit(1);
    }

    let cancel_token = CancellationToken::new();
    let reporter = tokio::spawn(report(
        Arc::clone(&metrics),
        health,
        cancel_token.clone(),
    ));

    shutdown_signal().await;
    info!("Shutdown requested, draining buffered messages");
    cancel_token.cancel();
    if let Err(e) = processor.stop().await {
        error!("Log processor did not stop cleanly: {e}");
    }
    if let Err(e) = reporter.await {
        debug!("Reporter task ended with error: {e}");
    }
    info!("Shutdown complete");
}

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
}

async fn report(metrics: Arc<InMemoryMetrics>, health: HealthService, cancel_token: CancellationToken) {
    let mut report_interval = interval(REPORT_INTERVAL);
    report_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = report_interval.tick() => {}
        }

        let snapshot = metrics.snapshot();
        let post = snapshot.timer(POST_TIME);
        let queue = snapshot.timer(QUEUE_LATENCY);
        info!(
            "METRICS | requests={} errors={} discarded={} post.time.mean={:?} post.time.max={:?} post.queue.latency.mean={:?}",
            snapshot.counter(REQUESTS_TOTAL),
            snapshot.counter(REQUESTS_ERROR),
            snapshot.counter(REQUESTS_DISCARDED),
            post.mean(),
            post.max,
            queue.mean(),
        );

        for check in health.check_all() {
            if !check.ok {
                warn!("HEALTH | {}: {}", check.name, check.output);
            }
        }
        let gtg = health.good_to_go();
        if !gtg.good_to_go {
            debug!("HEALTH | {} is not good to go: {}", health.system_code, gtg.message);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for interrupt signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for terminate signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
