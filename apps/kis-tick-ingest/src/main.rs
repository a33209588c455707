//! KIS Tick Ingest Binary
//!
//! Starts the tick ingestion daemon.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kis-tick-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required (live source)
//! - `KIS_APP_KEY`: KIS application key
//! - `KIS_APP_SECRET`: KIS application secret
//!
//! ## Optional
//! - `TICK_SOURCE`: live | synthetic (default: live)
//! - `KIS_SYMBOLS`: Comma-separated symbols (default: all reference symbols)
//! - `REFERENCE_DATA_PATH`: JSON reference data file
//! - `KIS_REST_URL` / `KIS_WS_URL`: Endpoint overrides
//! - `INGEST_TOPIC`: Publish topic (default: real_time_stock_prices)
//! - `INGEST_QUEUE_CAPACITY`: Consumer queue capacity (default: 10000)
//! - `INGEST_HEALTH_PORT`: Health check HTTP port (default: 8083, 0 disables)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use kis_tick_ingest::infrastructure::kis::{
    Authenticator, FrameDecoder, KisApprovalClient, LiveFeed, LiveFeedConfig,
};
use kis_tick_ingest::infrastructure::telemetry;
use kis_tick_ingest::{
    ConfigError, FeedStatus, HealthServer, HealthServerState, InMemoryReferenceLookup,
    IngestConfig, IngestionBridge, ReferenceLookup, SyntheticFeed, TickQueue, TickSource,
    TickSourceKind, TopicBus, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of each in-process topic channel.
const TOPIC_BUS_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting KIS tick ingest");

    let _metrics_handle = init_metrics();

    let config = IngestConfig::from_env()?;
    log_config(&config);

    let reference = Arc::new(match &config.reference_data_path {
        Some(path) => InMemoryReferenceLookup::from_json_file(path)?,
        None => InMemoryReferenceLookup::new(),
    });

    let symbols = if config.symbols.is_empty() {
        reference.symbols()
    } else {
        config.symbols.clone()
    };
    if symbols.is_empty() {
        return Err(ConfigError::NoSymbols.into());
    }

    let shutdown_token = CancellationToken::new();

    let bus = Arc::new(TopicBus::new(TOPIC_BUS_CAPACITY));
    let (bridge, queue) = IngestionBridge::new(bus.clone(), config.bridge.to_bridge_config());
    let bridge = Arc::new(bridge);

    let status = Arc::new(FeedStatus::new(config.source.as_str()));
    let lookup: Arc<dyn ReferenceLookup> = reference;

    let source: Arc<dyn TickSource> = match config.source {
        TickSourceKind::Live => {
            let credentials = config
                .credentials
                .clone()
                .ok_or_else(|| ConfigError::MissingEnvVar("KIS_APP_KEY".to_string()))?;
            let client =
                KisApprovalClient::new(&config.rest_url, credentials, config.stream.auth_timeout)?;
            let authenticator = Authenticator::new(Arc::new(client), config.stream.approval_ttl);
            let feed_config =
                LiveFeedConfig::from_settings(config.ws_url.clone(), symbols, &config.stream);
            Arc::new(LiveFeed::new(
                feed_config,
                authenticator,
                FrameDecoder::new(lookup),
                Arc::clone(&status),
                shutdown_token.clone(),
            ))
        }
        TickSourceKind::Synthetic => Arc::new(SyntheticFeed::new(
            symbols,
            lookup,
            config.synthetic_interval,
            Arc::clone(&status),
            shutdown_token.clone(),
        )),
    };

    // Spawn health server
    if config.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&status),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let consumer = tokio::spawn(consume_queue(queue, shutdown_token.clone()));

    let source_bridge = Arc::clone(&bridge);
    let source_task = tokio::spawn(async move {
        tracing::info!(source = source.name(), "Tick source starting");
        source.run(source_bridge).await;
        tracing::info!(source = source.name(), "Tick source stopped");
    });

    tracing::info!("Tick ingest ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = source_task.await;
        let _ = consumer.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out waiting for tasks"
        );
    }
    bus.close();

    tracing::info!("Tick ingest stopped");
    Ok(())
}

/// Drain the consumer queue until shutdown.
async fn consume_queue(mut queue: TickQueue, cancel: CancellationToken) {
    let mut consumed: u64 = 0;
    while let Some(payload) = queue.next(&cancel).await {
        consumed += 1;
        tracing::trace!(payload = %payload, "Consumed tick");
    }
    tracing::info!(consumed, "Queue consumer stopped");
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        source = config.source.as_str(),
        symbols = config.symbols.len(),
        topic = %config.bridge.topic,
        queue_capacity = config.bridge.queue_capacity,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.rest_url,
        ws_url = %config.ws_url,
        "KIS endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
