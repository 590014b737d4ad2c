use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, KeyVerifier, Verification};
use crate::envelope::Envelope;
use crate::forward::{ForwardStats, QueueForwarder};
use crate::otlp::{self, DecodeError, SignalType};
use crate::sink::{DualSinkWriter, WriteError, WriterStats};
use crate::storage::{StoreStats, TelemetryStore};

/// Header for API keys from exporters that predate bearer auth
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct IngestLimits {
    pub max_body_bytes: usize,
    /// Deadline for a whole export request
    pub request_timeout: Duration,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: 8 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub verifier: Arc<KeyVerifier>,
    pub writer: Arc<DualSinkWriter>,
    pub store: Arc<TelemetryStore>,
    /// Present when forwarding goes through a queue
    pub forward_queue: Option<Arc<QueueForwarder>>,
    pub limits: IngestLimits,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// OTLP export
// ============================================================================

pub async fn export_traces(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<&'static str, IngestError> {
    handle_export(state, SignalType::Traces, request).await
}

pub async fn export_logs(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<&'static str, IngestError> {
    handle_export(state, SignalType::Logs, request).await
}

pub async fn export_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<&'static str, IngestError> {
    handle_export(state, SignalType::Metrics, request).await
}

/// Authenticate, read, decode and write one export request under the
/// request deadline.
async fn handle_export(
    state: Arc<AppState>,
    signal: SignalType,
    request: Request,
) -> Result<&'static str, IngestError> {
    let deadline = state.limits.request_timeout;

    let result = match tokio::time::timeout(deadline, process_export(&state, signal, request)).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::DeadlineExceeded(deadline)),
    };

    if let Err(e) = &result {
        if e.status().is_server_error() {
            error!(signal = %signal, error = %e, "Export request failed");
        } else {
            debug!(signal = %signal, error = %e, "Export request rejected");
        }
    }
    result
}

async fn process_export(
    state: &AppState,
    signal: SignalType,
    request: Request,
) -> Result<&'static str, IngestError> {
    let (parts, body) = request.into_parts();

    let credential = extract_credential(&parts.headers)?;
    let tenant_id = match state.verifier.verify(credential).await {
        Verification::Valid { tenant_id, .. } => tenant_id,
        Verification::Invalid(err) => return Err(IngestError::Auth(err)),
    };

    let raw = read_body(&parts.headers, body, state.limits.max_body_bytes).await?;

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    otlp::validate_content_type(content_type)?;
    let payload = otlp::decode(signal, &raw)?;

    let envelope = Envelope::new(tenant_id, raw, payload);
    let items = envelope.payload.item_count();
    let tenant = envelope.tenant_id.clone();

    // The write runs on its own task so that a client disconnect, which
    // drops this future, does not cut it short.
    let writer = Arc::clone(&state.writer);
    let receipt = tokio::spawn(async move { writer.write(&envelope).await })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;

    info!(
        tenant_id = %tenant,
        signal = %signal,
        items,
        record_id = %receipt.record_id,
        forwarded = receipt.forwarded,
        "Export accepted"
    );
    Ok("OK")
}

/// Pull the API key from `Authorization: Bearer <key>`, falling back to
/// `x-api-key`.
pub fn extract_credential(headers: &HeaderMap) -> Result<&str, AuthError> {
    let bearer = headers.get(header::AUTHORIZATION).map(|value| {
        let value = value.to_str().map_err(|_| AuthError::MalformedCredential)?;
        match value.trim().split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
                Ok(token.trim())
            }
            _ => Err(AuthError::MalformedCredential),
        }
    });

    if let Some(Ok(token)) = bearer {
        return Ok(token);
    }

    if let Some(value) = headers.get(API_KEY_HEADER) {
        let key = value
            .to_str()
            .map_err(|_| AuthError::MalformedCredential)?
            .trim();
        if key.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        return Ok(key);
    }

    match bearer {
        Some(Err(e)) => Err(e),
        _ => Err(AuthError::MissingCredential),
    }
}

async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<bytes::Bytes, IngestError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if let Some(len) = declared {
        if len > limit as u64 {
            return Err(IngestError::PayloadTooLarge { limit });
        }
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        warn!(error = %e, limit, "Failed to read request body");
        IngestError::PayloadTooLarge { limit }
    })
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub store: StoreStats,
    pub writer: WriterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<ForwardStats>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: state.store.stats(),
        writer: state.writer.stats(),
        forwarding: state.forward_queue.as_ref().map(|q| q.stats()),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] DecodeError),

    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Write task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Auth(e) if e.is_internal() => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Auth(_) => StatusCode::UNAUTHORIZED,
            IngestError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            IngestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Write(_) | IngestError::DeadlineExceeded(_) | IngestError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// One-line plain-text body. Never carries internal detail.
    pub fn body(&self) -> &'static str {
        match self.status() {
            StatusCode::UNAUTHORIZED => "Invalid API key",
            StatusCode::BAD_REQUEST => "Invalid payload",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload too large",
            _ => "Error processing data",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}
