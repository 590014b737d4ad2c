//! OTLP/HTTP ingestion gateway

pub mod handlers;
pub mod server;

pub use handlers::{extract_credential, AppState, IngestError, IngestLimits, API_KEY_HEADER};
pub use server::{build_router, run_server, ServerConfig};
