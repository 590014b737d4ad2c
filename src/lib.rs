//! otelgate: Multi-tenant OTLP/HTTP ingestion gateway
//!
//! Accepts OpenTelemetry export requests for traces, logs and metrics,
//! authenticates each one with an API key, resolves the key to its tenant,
//! decodes the protobuf body and writes it to a tenant-partitioned telemetry
//! store while forwarding the raw payload downstream.
//!
//! # Pipeline
//!
//! - **Key verification**: SHA-256 lookup in a credential store, then
//!   enabled / expiry / budget / rate-limit / tenant checks
//! - **Wire decoding**: prost bindings generated from the OTLP `.proto` files
//! - **Dual-sink write**: store and forward run concurrently; only the store
//!   decides success
//! - **Gateway**: axum routes `/v1/traces`, `/v1/logs`, `/v1/metrics`
//!
//! # Example
//!
//! ```no_run
//! use otelgate::auth::{ApiKey, InMemoryCredentialStore, KeyVerifier};
//! use otelgate::envelope::TenantId;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let store = Arc::new(InMemoryCredentialStore::new());
//! store.insert(ApiKey::new("key_1", "sk_live_abc123").with_tenant(TenantId::new("org_42").unwrap()));
//!
//! let verifier = KeyVerifier::new(store);
//! let result = verifier.verify("sk_live_abc123").await;
//! assert_eq!(result.tenant_id().map(|t| t.as_str()), Some("org_42"));
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod envelope;
pub mod forward;
pub mod otlp;
pub mod sink;
pub mod storage;

// Re-export commonly used types
pub use api::{build_router, run_server, ServerConfig};
pub use envelope::{Envelope, TenantId};
pub use otlp::{decode, DecodeError, DecodedPayload, SignalType};
pub use sink::{DualSinkWriter, Forwarder, Storer};
pub use storage::TelemetryStore;
