//! Synthetic export requests for the load generator and tests.
//!
//! Ids are derived from the base timestamp so that the same inputs always
//! produce the same message.

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{
    any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue,
};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs, SeverityNumber};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, AggregationTemporality, Gauge, Histogram, HistogramDataPoint,
    Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, status, ResourceSpans, ScopeSpans, Span, Status};

const SCOPE_NAME: &str = "otelgate.synthetic";
const MILLI: u64 = 1_000_000;

pub fn string_value(s: &str) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::StringValue(s.to_string())),
    }
}

fn int_value(i: i64) -> AnyValue {
    AnyValue {
        value: Some(any_value::Value::IntValue(i)),
    }
}

fn attribute(key: &str, value: AnyValue) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(value),
    }
}

pub fn string_attr(key: &str, value: &str) -> KeyValue {
    attribute(key, string_value(value))
}

fn resource(service: &str) -> Resource {
    Resource {
        attributes: vec![
            string_attr("service.name", service),
            string_attr("telemetry.sdk.language", "rust"),
            attribute(
                "host.ips",
                AnyValue {
                    value: Some(any_value::Value::ArrayValue(ArrayValue {
                        values: vec![string_value("10.0.0.1"), string_value("10.0.0.2")],
                    })),
                },
            ),
        ],
        ..Default::default()
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

fn trace_id(seed: u64) -> Vec<u8> {
    let mut id = Vec::with_capacity(16);
    id.extend_from_slice(&seed.to_be_bytes());
    id.extend_from_slice(&(!seed).to_be_bytes());
    id
}

fn span_id(seed: u64, index: u64) -> Vec<u8> {
    seed.wrapping_add(index + 1).to_be_bytes().to_vec()
}

/// One resource, one scope, `span_count` spans under a shared trace.
/// The first span is the SERVER root, the rest are its INTERNAL children.
pub fn trace_export(service: &str, span_count: usize, start_nanos: u64) -> ExportTraceServiceRequest {
    let root_id = span_id(start_nanos, 0);

    let spans = (0..span_count as u64)
        .map(|i| {
            let start = start_nanos + i * MILLI;
            let is_root = i == 0;
            Span {
                trace_id: trace_id(start_nanos),
                span_id: span_id(start_nanos, i),
                parent_span_id: if is_root { Vec::new() } else { root_id.clone() },
                name: if is_root {
                    "GET /api/orders".to_string()
                } else {
                    format!("db.query.{}", i)
                },
                kind: if is_root {
                    span::SpanKind::Server as i32
                } else {
                    span::SpanKind::Internal as i32
                },
                start_time_unix_nano: start,
                end_time_unix_nano: start + 5 * MILLI,
                attributes: vec![
                    string_attr("http.method", "GET"),
                    attribute("http.status_code", int_value(200)),
                ],
                events: if is_root {
                    vec![span::Event {
                        time_unix_nano: start + MILLI,
                        name: "cache.miss".to_string(),
                        ..Default::default()
                    }]
                } else {
                    Vec::new()
                },
                status: Some(Status {
                    code: status::StatusCode::Ok as i32,
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect();

    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource(service)),
            scope_spans: vec![ScopeSpans {
                scope: Some(scope()),
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// `count` INFO records one millisecond apart.
pub fn log_export(service: &str, count: usize, start_nanos: u64) -> ExportLogsServiceRequest {
    let log_records = (0..count as u64)
        .map(|i| LogRecord {
            time_unix_nano: start_nanos + i * MILLI,
            observed_time_unix_nano: start_nanos + i * MILLI,
            severity_number: SeverityNumber::Info as i32,
            severity_text: "INFO".to_string(),
            body: Some(string_value(&format!("request {} handled", i))),
            attributes: vec![attribute("request.id", int_value(i as i64))],
            trace_id: trace_id(start_nanos),
            span_id: span_id(start_nanos, i),
            ..Default::default()
        })
        .collect();

    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(resource(service)),
            scope_logs: vec![ScopeLogs {
                scope: Some(scope()),
                log_records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn number_point(time_nanos: u64, value: i64, route: Option<&str>) -> NumberDataPoint {
    NumberDataPoint {
        attributes: route
            .map(|r| vec![string_attr("http.route", r)])
            .unwrap_or_default(),
        start_time_unix_nano: time_nanos.saturating_sub(60_000 * MILLI),
        time_unix_nano: time_nanos,
        value: Some(number_data_point::Value::AsInt(value)),
        ..Default::default()
    }
}

/// A gauge with one point, a monotonic sum with two and a histogram with one.
pub fn metric_export(service: &str, time_nanos: u64) -> ExportMetricsServiceRequest {
    let metrics = vec![
        Metric {
            name: "process.memory.usage".to_string(),
            unit: "By".to_string(),
            data: Some(metric::Data::Gauge(Gauge {
                data_points: vec![number_point(time_nanos, 52_428_800, None)],
            })),
            ..Default::default()
        },
        Metric {
            name: "http.server.requests".to_string(),
            unit: "{request}".to_string(),
            data: Some(metric::Data::Sum(Sum {
                data_points: vec![
                    number_point(time_nanos, 120, Some("/orders")),
                    number_point(time_nanos, 7, Some("/health")),
                ],
                aggregation_temporality: AggregationTemporality::Cumulative as i32,
                is_monotonic: true,
            })),
            ..Default::default()
        },
        Metric {
            name: "http.server.duration".to_string(),
            unit: "ms".to_string(),
            data: Some(metric::Data::Histogram(Histogram {
                data_points: vec![HistogramDataPoint {
                    start_time_unix_nano: time_nanos.saturating_sub(60_000 * MILLI),
                    time_unix_nano: time_nanos,
                    count: 6,
                    sum: Some(412.5),
                    bucket_counts: vec![1, 2, 3],
                    explicit_bounds: vec![10.0, 100.0],
                    min: Some(4.0),
                    max: Some(180.0),
                    ..Default::default()
                }],
                aggregation_temporality: AggregationTemporality::Delta as i32,
            })),
            ..Default::default()
        },
    ];

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource(service)),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
