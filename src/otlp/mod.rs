//! OTLP wire decoding
//!
//! Decodes binary OTLP/HTTP export bodies for the three signal types.
//!
//! ## Exporter configuration
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4318
//! OTEL_EXPORTER_OTLP_PROTOCOL=http/protobuf
//! OTEL_EXPORTER_OTLP_HEADERS="Authorization=Bearer sk_live_..."
//! ```
//!
//! Or forward from an OTel Collector:
//! ```yaml
//! exporters:
//!   otlphttp:
//!     endpoint: http://otelgate:4318
//!     encoding: proto
//!     headers:
//!       authorization: "Bearer sk_live_..."
//! ```

mod decode;
mod json;
mod signal;
pub mod synthetic;

pub use decode::{decode, validate_content_type, DecodeError, DecodedPayload, PROTOBUF_CONTENT_TYPE};
pub use json::any_value_json;
pub use signal::{SignalType, UnknownSignal};
