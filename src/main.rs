//! otelgate server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - OTELGATE_HOST: Bind address (default: 0.0.0.0)
//! - OTELGATE_PORT: Port number (default: 4318)
//! - OTELGATE_KEYS_FILE: JSON file of API keys to load at startup
//! - OTELGATE_MAX_MEMORY_MB: Telemetry store memory budget in MB (default: 1024)
//! - OTELGATE_SHARD_DURATION_MS: Time shard width (default: 3600000)
//! - OTELGATE_RETENTION_DAYS: Days of telemetry to keep (default: 30)
//! - OTELGATE_RETENTION_CHECK_SECS: Retention sweep interval (default: 3600)
//! - OTELGATE_MAX_BODY_BYTES: Largest accepted export body (default: 8388608)
//! - OTELGATE_REQUEST_TIMEOUT_MS: Per-request deadline (default: 30000)
//! - OTELGATE_NEGATIVE_CACHE_SECS: How long unknown keys stay cached (default: 30)
//! - RUST_LOG: Log level (default: info)
//!
//! Forwarding:
//! - OTELGATE_FORWARD_URL: Base URL of a downstream OTLP/HTTP receiver
//! - OTELGATE_FORWARD_QUEUE: Forward queue capacity (default: 10000)
//! - OTELGATE_FORWARD_MAX_ATTEMPTS: Delivery attempts per payload (default: 5)
//! - OTELGATE_FORWARD_TIMEOUT_MS: Webhook request timeout (default: 10000)
//! - KAFKA_BROKERS: Forward to Kafka instead (requires the `kafka` feature)

use otelgate::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otelgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    tracing::info!("otelgate configuration:");
    tracing::info!("  Listen: {}:{}", config.host, config.port);
    tracing::info!(
        "  Max memory: {} MB",
        config.store.max_memory_bytes / (1024 * 1024)
    );
    tracing::info!(
        "  Retention: {} days (checked every {} seconds)",
        config.store.retention_ms / (24 * 3600 * 1000),
        config.retention_check_interval_secs
    );
    tracing::info!(
        "  Body limit: {} bytes, deadline: {:?}",
        config.limits.max_body_bytes,
        config.limits.request_timeout
    );
    match &config.keys_file {
        Some(path) => tracing::info!("  Keys file: {}", path.display()),
        None => tracing::info!("  Keys file: none"),
    }
    match &config.forward.url {
        Some(url) => tracing::info!("  Forward URL: {}", url),
        None => tracing::info!("  Forward URL: none"),
    }

    println!(
        r#"
        _       _               _
   ___ | |_ ___| | __ _  __ _ | |_ ___
  / _ \| __/ _ \ |/ _` |/ _` || __/ _ \
 | (_) | ||  __/ | (_| | (_| || ||  __/
  \___/ \__\___|_|\__, |\__,_| \__\___|
                  |___/

 Multi-tenant OTLP/HTTP Ingestion Gateway
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
