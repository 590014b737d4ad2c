//! Binary OTLP decoding
//!
//! Request bodies are decoded with the prost bindings generated from the
//! OTLP `.proto` definitions, so no schema is loaded at runtime.

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{metric, Metric};
use prost::Message;

use super::json;
use super::signal::SignalType;

/// Media type of binary OTLP/HTTP bodies
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// A decoded export request, field-for-field as defined by OTLP.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Traces(ExportTraceServiceRequest),
    Logs(ExportLogsServiceRequest),
    Metrics(ExportMetricsServiceRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Missing content type, expected application/x-protobuf")]
    MissingContentType,

    #[error("Unsupported content type '{0}'")]
    UnsupportedContentType(String),

    #[error("Empty request body")]
    Empty,

    #[error("Invalid {signal} protobuf: {source}")]
    Protobuf {
        signal: SignalType,
        #[source]
        source: prost::DecodeError,
    },

    #[error("{0} export contains no resource entries")]
    NoResources(SignalType),
}

/// Check that a `Content-Type` header names binary protobuf.
///
/// Parameters (`; charset=...`) and letter case are ignored.
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), DecodeError> {
    let value = content_type.ok_or(DecodeError::MissingContentType)?;
    let media_type = value.split(';').next().unwrap_or_default().trim();

    if media_type.eq_ignore_ascii_case(PROTOBUF_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(DecodeError::UnsupportedContentType(value.to_string()))
    }
}

/// Decode a raw request body according to the route's signal type.
///
/// Empty input and messages that carry no resource entries are rejected:
/// prost accepts both as an all-default message, which would hide a
/// mismatched or foreign top-level shape.
pub fn decode(signal: SignalType, raw: &[u8]) -> Result<DecodedPayload, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    let payload = match signal {
        SignalType::Traces => ExportTraceServiceRequest::decode(raw).map(DecodedPayload::Traces),
        SignalType::Logs => ExportLogsServiceRequest::decode(raw).map(DecodedPayload::Logs),
        SignalType::Metrics => {
            ExportMetricsServiceRequest::decode(raw).map(DecodedPayload::Metrics)
        }
    }
    .map_err(|source| DecodeError::Protobuf { signal, source })?;

    if payload.resource_count() == 0 {
        return Err(DecodeError::NoResources(signal));
    }

    Ok(payload)
}

impl DecodedPayload {
    pub fn signal(&self) -> SignalType {
        match self {
            DecodedPayload::Traces(_) => SignalType::Traces,
            DecodedPayload::Logs(_) => SignalType::Logs,
            DecodedPayload::Metrics(_) => SignalType::Metrics,
        }
    }

    /// Number of resource-level entries
    pub fn resource_count(&self) -> usize {
        match self {
            DecodedPayload::Traces(req) => req.resource_spans.len(),
            DecodedPayload::Logs(req) => req.resource_logs.len(),
            DecodedPayload::Metrics(req) => req.resource_metrics.len(),
        }
    }

    /// Number of instrumentation-scope entries across all resources
    pub fn scope_count(&self) -> usize {
        match self {
            DecodedPayload::Traces(req) => {
                req.resource_spans.iter().map(|r| r.scope_spans.len()).sum()
            }
            DecodedPayload::Logs(req) => req.resource_logs.iter().map(|r| r.scope_logs.len()).sum(),
            DecodedPayload::Metrics(req) => {
                req.resource_metrics.iter().map(|r| r.scope_metrics.len()).sum()
            }
        }
    }

    /// Spans, log records or metric data points, depending on the signal
    pub fn item_count(&self) -> usize {
        match self {
            DecodedPayload::Traces(req) => req
                .resource_spans
                .iter()
                .flat_map(|r| &r.scope_spans)
                .map(|s| s.spans.len())
                .sum(),
            DecodedPayload::Logs(req) => req
                .resource_logs
                .iter()
                .flat_map(|r| &r.scope_logs)
                .map(|s| s.log_records.len())
                .sum(),
            DecodedPayload::Metrics(req) => req
                .resource_metrics
                .iter()
                .flat_map(|r| &r.scope_metrics)
                .flat_map(|s| &s.metrics)
                .map(data_point_count)
                .sum(),
        }
    }

    /// Re-encode to protobuf. The bytes need not match the original body.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            DecodedPayload::Traces(req) => req.encode_to_vec(),
            DecodedPayload::Logs(req) => req.encode_to_vec(),
            DecodedPayload::Metrics(req) => req.encode_to_vec(),
        }
    }

    /// OTLP/JSON-shaped projection used for storage
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DecodedPayload::Traces(req) => json::traces_to_json(req),
            DecodedPayload::Logs(req) => json::logs_to_json(req),
            DecodedPayload::Metrics(req) => json::metrics_to_json(req),
        }
    }
}

fn data_point_count(metric: &Metric) -> usize {
    match &metric.data {
        Some(metric::Data::Gauge(g)) => g.data_points.len(),
        Some(metric::Data::Sum(s)) => s.data_points.len(),
        Some(metric::Data::Histogram(h)) => h.data_points.len(),
        Some(metric::Data::ExponentialHistogram(h)) => h.data_points.len(),
        Some(metric::Data::Summary(s)) => s.data_points.len(),
        None => 0,
    }
}
