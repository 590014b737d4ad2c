use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{export_logs, export_metrics, export_traces, health_check, stats, AppState, IngestLimits};
use crate::auth::{InMemoryCredentialStore, KeyVerifier, VerifierConfig};
use crate::forward::{build_forwarder, ForwardConfig};
use crate::otlp::SignalType;
use crate::sink::DualSinkWriter;
use crate::storage::{RetentionWorker, StoreConfig, TelemetryStore};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub limits: IngestLimits,
    pub store: StoreConfig,
    pub retention_check_interval_secs: u64,
    /// JSON file seeding the credential store
    pub keys_file: Option<PathBuf>,
    pub negative_cache_secs: u64,
    pub forward: ForwardConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4318,
            limits: IngestLimits::default(),
            store: StoreConfig::default(),
            retention_check_interval_secs: 3600,
            keys_file: None,
            negative_cache_secs: 30,
            forward: ForwardConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    /// Read `OTELGATE_*` environment variables over the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let store = StoreConfig {
            max_memory_bytes: env_parse::<usize>("OTELGATE_MAX_MEMORY_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.store.max_memory_bytes),
            shard_duration_ms: env_parse("OTELGATE_SHARD_DURATION_MS")
                .unwrap_or(defaults.store.shard_duration_ms),
            retention_ms: env_parse::<i64>("OTELGATE_RETENTION_DAYS")
                .map(|days| days * 24 * 3600 * 1000)
                .unwrap_or(defaults.store.retention_ms),
        };

        let limits = IngestLimits {
            max_body_bytes: env_parse("OTELGATE_MAX_BODY_BYTES").unwrap_or(defaults.limits.max_body_bytes),
            request_timeout: env_parse("OTELGATE_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.limits.request_timeout),
        };

        Self {
            host: std::env::var("OTELGATE_HOST").unwrap_or(defaults.host),
            port: env_parse("OTELGATE_PORT").unwrap_or(defaults.port),
            limits,
            store,
            retention_check_interval_secs: env_parse("OTELGATE_RETENTION_CHECK_SECS")
                .unwrap_or(defaults.retention_check_interval_secs),
            keys_file: std::env::var("OTELGATE_KEYS_FILE").ok().map(PathBuf::from),
            negative_cache_secs: env_parse("OTELGATE_NEGATIVE_CACHE_SECS").unwrap_or(defaults.negative_cache_secs),
            forward: ForwardConfig::from_env(),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // OTLP/HTTP export
        .route(SignalType::Traces.path(), post(export_traces))
        .route(SignalType::Logs.path(), post(export_logs))
        .route(SignalType::Metrics.path(), post(export_metrics))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = Arc::new(InMemoryCredentialStore::new());
    match &config.keys_file {
        Some(path) => {
            credentials.load_file(path)?;
        }
        None => tracing::warn!("OTELGATE_KEYS_FILE not set, every export will be rejected"),
    }

    let verifier = Arc::new(KeyVerifier::with_config(
        credentials,
        VerifierConfig {
            negative_cache_ttl: Duration::from_secs(config.negative_cache_secs),
            ..VerifierConfig::default()
        },
    ));

    let store = Arc::new(TelemetryStore::new(config.store.clone()));
    let forwarding = build_forwarder(&config.forward)?;
    let writer = Arc::new(DualSinkWriter::new(store.clone(), forwarding.forwarder));

    let state = Arc::new(AppState {
        verifier,
        writer,
        store: Arc::clone(&store),
        forward_queue: forwarding.queue,
        limits: config.limits.clone(),
    });

    // Start background workers
    let retention_worker = Arc::new(RetentionWorker::new(
        Arc::clone(&store),
        Duration::from_secs(config.retention_check_interval_secs),
    ));
    let retention_handle = Arc::clone(&retention_worker).start();

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting otelgate on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&retention_worker)))
        .await?;

    if let Err(e) = retention_handle.await {
        tracing::error!(error = %e, "Retention worker panicked");
    }
    if let Some(worker) = forwarding.worker {
        worker.shutdown().await;
    }

    tracing::info!("otelgate stopped");
    Ok(())
}

async fn shutdown_signal(retention_worker: Arc<RetentionWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    retention_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApiKey, CredentialStore, CredentialStoreError, KeyUsage};
    use crate::envelope::TenantId;
    use crate::otlp::{synthetic, PROTOBUF_CONTENT_TYPE};
    use crate::sink::{ForwardError, Forwarder};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use bytes::Bytes;
    use prost::Message;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::util::ServiceExt;

    const START_NANOS: u64 = 1_700_000_000_000_000_000;

    /// Counts enqueues and optionally fails them
    #[derive(Default)]
    struct TestForwarder {
        calls: AtomicUsize,
        unreachable: bool,
    }

    #[async_trait]
    impl Forwarder for TestForwarder {
        async fn enqueue(&self, _tenant_id: &TenantId, _signal: SignalType, _raw: Bytes) -> Result<(), ForwardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                Err(ForwardError::Rejected("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    struct TestApp {
        router: Router,
        store: Arc<TelemetryStore>,
        forwarder: Arc<TestForwarder>,
    }

    struct TestOptions {
        credentials: Arc<dyn CredentialStore>,
        forwarder: TestForwarder,
        store: StoreConfig,
        limits: IngestLimits,
    }

    impl Default for TestOptions {
        fn default() -> Self {
            let credentials = InMemoryCredentialStore::new();
            credentials.insert(ApiKey::new("key_1", "sk_live_abc123").with_metadata("organizationId", json!("org_42")));
            credentials.insert(ApiKey::new("key_2", "sk_live_unbound"));
            credentials.insert(
                ApiKey::new("key_3", "sk_live_disabled")
                    .with_tenant(TenantId::new("org_42").unwrap())
                    .with_enabled(false),
            );

            Self {
                credentials: Arc::new(credentials),
                forwarder: TestForwarder::default(),
                store: StoreConfig::default(),
                limits: IngestLimits::default(),
            }
        }
    }

    fn test_app_with(options: TestOptions) -> TestApp {
        let store = Arc::new(TelemetryStore::new(options.store));
        let forwarder = Arc::new(options.forwarder);
        let writer = Arc::new(DualSinkWriter::new(store.clone(), forwarder.clone()));

        let state = Arc::new(AppState {
            verifier: Arc::new(KeyVerifier::new(options.credentials)),
            writer,
            store: store.clone(),
            forward_queue: None,
            limits: options.limits,
        });

        TestApp {
            router: build_router(state),
            store,
            forwarder,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(TestOptions::default())
    }

    fn trace_body() -> Vec<u8> {
        synthetic::trace_export("checkout", 1, START_NANOS).encode_to_vec()
    }

    fn export(path: &str, auth: Option<(&str, &str)>, body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", PROTOBUF_CONTENT_TYPE);
        if let Some((name, value)) = auth {
            builder = builder.header(name, value);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn bearer(key: &str) -> Option<(&'static str, String)> {
        Some(("authorization", format!("Bearer {}", key)))
    }

    async fn send(app: &TestApp, path: &str, auth: Option<(&'static str, String)>, body: Vec<u8>) -> Response<Body> {
        let request = export(path, auth.as_ref().map(|(n, v)| (*n, v.as_str())), body);
        app.router.clone().oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn org_42() -> TenantId {
        TenantId::new("org_42").unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_valid_key_stores_trace() {
        let app = test_app();

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");

        let records = app.store.scan_all(&org_42(), SignalType::Traces);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tenant_id, org_42());
        assert_eq!(records[0].signal, SignalType::Traces);
        assert_eq!(records[0].raw().unwrap(), Bytes::from(trace_body()));
        assert_eq!(app.forwarder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_api_key_header_accepted() {
        let app = test_app();
        let body = synthetic::log_export("checkout", 2, START_NANOS).encode_to_vec();

        let response = send(&app, "/v1/logs", Some(("x-api-key", "sk_live_abc123".to_string())), body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.store.scan_all(&org_42(), SignalType::Logs).len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let app = test_app();
        let body = synthetic::metric_export("checkout", START_NANOS).encode_to_vec();

        let response = send(&app, "/v1/metrics", bearer("sk_live_abc123"), body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let records = app.store.scan_all(&org_42(), SignalType::Metrics);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].item_count, 4);
        assert!(app.store.scan_all(&org_42(), SignalType::Traces).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_without_writes() {
        let app = test_app();

        let response = send(&app, "/v1/traces", bearer("invalid_key"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Invalid API key");

        assert_eq!(app.store.record_count(), 0);
        assert_eq!(app.forwarder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credential_rejected() {
        let app = test_app();

        let response = send(&app, "/v1/traces", None, trace_body()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, "/v1/traces", Some(("authorization", "Basic abc".to_string())), trace_body()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unbound_and_disabled_keys_rejected() {
        let app = test_app();

        for key in ["sk_live_unbound", "sk_live_disabled"] {
            let response = send(&app, "/v1/traces", bearer(key), trace_body()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_text(response).await, "Invalid API key");
        }
        assert_eq!(app.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_protobuf_rejected_without_writes() {
        let app = test_app();

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), vec![0x00, 0x01]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(app.store.record_count(), 0);
        assert_eq!(app.forwarder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let app = test_app();

        let response = send(&app, "/v1/logs", bearer("sk_live_abc123"), Vec::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "Invalid payload");
    }

    #[tokio::test]
    async fn test_json_content_type_rejected() {
        let app = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/v1/traces")
            .header("authorization", "Bearer sk_live_abc123")
            .header("content-type", "application/json")
            .body(Body::from(trace_body()))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let app = test_app_with(TestOptions {
            limits: IngestLimits {
                max_body_bytes: 16,
                ..IngestLimits::default()
            },
            ..TestOptions::default()
        });

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(app.store.record_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_payload_stored_twice() {
        let app = test_app();

        for _ in 0..2 {
            let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(app.store.scan_all(&org_42(), SignalType::Traces).len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_exports_get_distinct_records() {
        let app = test_app();

        let requests = (0..16).map(|i| {
            let body = synthetic::trace_export("checkout", 1, START_NANOS + i).encode_to_vec();
            send(&app, "/v1/traces", bearer("sk_live_abc123"), body)
        });
        let responses = futures::future::join_all(requests).await;
        assert!(responses.iter().all(|r| r.status() == StatusCode::OK));

        let records = app.store.scan_all(&org_42(), SignalType::Traces);
        let mut ids: Vec<_> = records.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(app.forwarder.calls.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_unreachable_forwarder_still_succeeds() {
        let app = test_app_with(TestOptions {
            forwarder: TestForwarder {
                unreachable: true,
                ..Default::default()
            },
            ..TestOptions::default()
        });

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");

        assert_eq!(app.store.scan_all(&org_42(), SignalType::Traces).len(), 1);
        assert_eq!(app.forwarder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let app = test_app_with(TestOptions {
            store: StoreConfig::default().with_max_memory(64),
            ..TestOptions::default()
        });

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Error processing data");
    }

    struct UnavailableCredentials;

    #[async_trait]
    impl CredentialStore for UnavailableCredentials {
        async fn lookup(&self, _key_hash: &str) -> Result<Option<ApiKey>, CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("connection refused".into()))
        }

        async fn record_usage(&self, _key_id: &str, _usage: KeyUsage) -> Result<(), CredentialStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_credential_store_outage_is_server_error() {
        let app = test_app_with(TestOptions {
            credentials: Arc::new(UnavailableCredentials),
            ..TestOptions::default()
        });

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Error processing data");
    }

    struct SlowCredentials;

    #[async_trait]
    impl CredentialStore for SlowCredentials {
        async fn lookup(&self, _key_hash: &str) -> Result<Option<ApiKey>, CredentialStoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn record_usage(&self, _key_id: &str, _usage: KeyUsage) -> Result<(), CredentialStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_server_error() {
        let app = test_app_with(TestOptions {
            credentials: Arc::new(SlowCredentials),
            limits: IngestLimits {
                request_timeout: Duration::from_millis(50),
                ..IngestLimits::default()
            },
            ..TestOptions::default()
        });

        let response = send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Error processing data");
    }

    #[tokio::test]
    async fn test_stats_hide_tenants() {
        let app = test_app();
        send(&app, "/v1/traces", bearer("sk_live_abc123"), trace_body()).await;

        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        assert!(!text.contains("org_42"));

        let stats: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(stats["writer"]["traces_stored"], 1);
        assert_eq!(stats["writer"]["forwarder"], "test");
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4318);
        assert_eq!(config.limits.max_body_bytes, 8 * 1024 * 1024);
        assert_eq!(config.store.retention_ms, 30 * 24 * 3600 * 1000);
    }
}
