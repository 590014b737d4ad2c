//! OTLP/JSON-shaped projection of decoded requests.
//!
//! Field names follow the OTLP JSON mapping (lowerCamelCase), trace and span
//! ids are lowercase hex. Unlike the canonical mapping, 64-bit integers stay
//! JSON integers so nanosecond timestamps never pass through a float or a
//! string. Absent optional messages render as empty containers.

use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, EntityRef, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::logs::v1::LogRecord;
use opentelemetry_proto::tonic::metrics::v1::{
    exemplar, exponential_histogram_data_point, metric, number_data_point, Exemplar,
    ExponentialHistogramDataPoint, HistogramDataPoint, Metric, NumberDataPoint, SummaryDataPoint,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, Span, Status};
use serde_json::{json, Map, Value};

pub fn traces_to_json(req: &ExportTraceServiceRequest) -> Value {
    let resource_spans: Vec<Value> = req
        .resource_spans
        .iter()
        .map(|rs| {
            let scope_spans: Vec<Value> = rs
                .scope_spans
                .iter()
                .map(|ss| {
                    json!({
                        "scope": scope_json(ss.scope.as_ref()),
                        "spans": ss.spans.iter().map(span_json).collect::<Vec<_>>(),
                        "schemaUrl": ss.schema_url,
                    })
                })
                .collect();

            json!({
                "resource": resource_json(rs.resource.as_ref()),
                "scopeSpans": scope_spans,
                "schemaUrl": rs.schema_url,
            })
        })
        .collect();

    json!({ "resourceSpans": resource_spans })
}

pub fn logs_to_json(req: &ExportLogsServiceRequest) -> Value {
    let resource_logs: Vec<Value> = req
        .resource_logs
        .iter()
        .map(|rl| {
            let scope_logs: Vec<Value> = rl
                .scope_logs
                .iter()
                .map(|sl| {
                    json!({
                        "scope": scope_json(sl.scope.as_ref()),
                        "logRecords": sl.log_records.iter().map(log_record_json).collect::<Vec<_>>(),
                        "schemaUrl": sl.schema_url,
                    })
                })
                .collect();

            json!({
                "resource": resource_json(rl.resource.as_ref()),
                "scopeLogs": scope_logs,
                "schemaUrl": rl.schema_url,
            })
        })
        .collect();

    json!({ "resourceLogs": resource_logs })
}

pub fn metrics_to_json(req: &ExportMetricsServiceRequest) -> Value {
    let resource_metrics: Vec<Value> = req
        .resource_metrics
        .iter()
        .map(|rm| {
            let scope_metrics: Vec<Value> = rm
                .scope_metrics
                .iter()
                .map(|sm| {
                    json!({
                        "scope": scope_json(sm.scope.as_ref()),
                        "metrics": sm.metrics.iter().map(metric_json).collect::<Vec<_>>(),
                        "schemaUrl": sm.schema_url,
                    })
                })
                .collect();

            json!({
                "resource": resource_json(rm.resource.as_ref()),
                "scopeMetrics": scope_metrics,
                "schemaUrl": rm.schema_url,
            })
        })
        .collect();

    json!({ "resourceMetrics": resource_metrics })
}

// ============================================================================
// Common
// ============================================================================

fn resource_json(resource: Option<&Resource>) -> Value {
    match resource {
        Some(r) => json!({
            "attributes": attributes_json(&r.attributes),
            "droppedAttributesCount": r.dropped_attributes_count,
            "entityRefs": r.entity_refs.iter().map(entity_ref_json).collect::<Vec<_>>(),
        }),
        None => json!({ "attributes": [], "droppedAttributesCount": 0, "entityRefs": [] }),
    }
}

fn entity_ref_json(entity: &EntityRef) -> Value {
    json!({
        "schemaUrl": entity.schema_url,
        "type": entity.r#type,
        "idKeys": entity.id_keys,
        "descriptionKeys": entity.description_keys,
    })
}

fn scope_json(scope: Option<&InstrumentationScope>) -> Value {
    match scope {
        Some(s) => json!({
            "name": s.name,
            "version": s.version,
            "attributes": attributes_json(&s.attributes),
            "droppedAttributesCount": s.dropped_attributes_count,
        }),
        None => json!({
            "name": "",
            "version": "",
            "attributes": [],
            "droppedAttributesCount": 0,
        }),
    }
}

fn attributes_json(attributes: &[KeyValue]) -> Value {
    Value::Array(
        attributes
            .iter()
            .map(|kv| {
                json!({
                    "key": kv.key,
                    "value": any_value_json(kv.value.as_ref()),
                })
            })
            .collect(),
    )
}

/// Render an `AnyValue` keeping its type tag. Arrays keep element order.
pub fn any_value_json(value: Option<&AnyValue>) -> Value {
    let Some(inner) = value.and_then(|v| v.value.as_ref()) else {
        return Value::Object(Map::new());
    };

    match inner {
        any_value::Value::StringValue(s) => json!({ "stringValue": s }),
        any_value::Value::BoolValue(b) => json!({ "boolValue": b }),
        any_value::Value::IntValue(i) => json!({ "intValue": i }),
        any_value::Value::DoubleValue(d) => json!({ "doubleValue": d }),
        any_value::Value::BytesValue(bytes) => json!({ "bytesValue": hex::encode(bytes) }),
        any_value::Value::ArrayValue(array) => {
            let values: Vec<Value> = array.values.iter().map(|v| any_value_json(Some(v))).collect();
            json!({ "arrayValue": { "values": values } })
        }
        any_value::Value::KvlistValue(list) => {
            json!({ "kvlistValue": { "values": attributes_json(&list.values) } })
        }
    }
}

// ============================================================================
// Traces
// ============================================================================

fn span_json(span: &Span) -> Value {
    json!({
        "traceId": hex::encode(&span.trace_id),
        "spanId": hex::encode(&span.span_id),
        "traceState": span.trace_state,
        "parentSpanId": hex::encode(&span.parent_span_id),
        "flags": span.flags,
        "name": span.name,
        "kind": span.kind,
        "startTimeUnixNano": span.start_time_unix_nano,
        "endTimeUnixNano": span.end_time_unix_nano,
        "attributes": attributes_json(&span.attributes),
        "droppedAttributesCount": span.dropped_attributes_count,
        "events": span.events.iter().map(event_json).collect::<Vec<_>>(),
        "droppedEventsCount": span.dropped_events_count,
        "links": span.links.iter().map(link_json).collect::<Vec<_>>(),
        "droppedLinksCount": span.dropped_links_count,
        "status": status_json(span.status.as_ref()),
    })
}

fn event_json(event: &span::Event) -> Value {
    json!({
        "timeUnixNano": event.time_unix_nano,
        "name": event.name,
        "attributes": attributes_json(&event.attributes),
        "droppedAttributesCount": event.dropped_attributes_count,
    })
}

fn link_json(link: &span::Link) -> Value {
    json!({
        "traceId": hex::encode(&link.trace_id),
        "spanId": hex::encode(&link.span_id),
        "traceState": link.trace_state,
        "attributes": attributes_json(&link.attributes),
        "droppedAttributesCount": link.dropped_attributes_count,
        "flags": link.flags,
    })
}

fn status_json(status: Option<&Status>) -> Value {
    match status {
        Some(s) => json!({ "message": s.message, "code": s.code }),
        None => json!({ "message": "", "code": 0 }),
    }
}

// ============================================================================
// Logs
// ============================================================================

fn log_record_json(record: &LogRecord) -> Value {
    json!({
        "timeUnixNano": record.time_unix_nano,
        "observedTimeUnixNano": record.observed_time_unix_nano,
        "severityNumber": record.severity_number,
        "severityText": record.severity_text,
        "body": any_value_json(record.body.as_ref()),
        "attributes": attributes_json(&record.attributes),
        "droppedAttributesCount": record.dropped_attributes_count,
        "flags": record.flags,
        "traceId": hex::encode(&record.trace_id),
        "spanId": hex::encode(&record.span_id),
        "eventName": record.event_name,
    })
}

// ============================================================================
// Metrics
// ============================================================================

fn metric_json(m: &Metric) -> Value {
    let mut out = json!({
        "name": m.name,
        "description": m.description,
        "unit": m.unit,
        "metadata": attributes_json(&m.metadata),
    });

    let (key, data) = match &m.data {
        Some(metric::Data::Gauge(g)) => (
            "gauge",
            json!({ "dataPoints": g.data_points.iter().map(number_point_json).collect::<Vec<_>>() }),
        ),
        Some(metric::Data::Sum(s)) => (
            "sum",
            json!({
                "dataPoints": s.data_points.iter().map(number_point_json).collect::<Vec<_>>(),
                "aggregationTemporality": s.aggregation_temporality,
                "isMonotonic": s.is_monotonic,
            }),
        ),
        Some(metric::Data::Histogram(h)) => (
            "histogram",
            json!({
                "dataPoints": h.data_points.iter().map(histogram_point_json).collect::<Vec<_>>(),
                "aggregationTemporality": h.aggregation_temporality,
            }),
        ),
        Some(metric::Data::ExponentialHistogram(h)) => (
            "exponentialHistogram",
            json!({
                "dataPoints": h.data_points.iter().map(exp_histogram_point_json).collect::<Vec<_>>(),
                "aggregationTemporality": h.aggregation_temporality,
            }),
        ),
        Some(metric::Data::Summary(s)) => (
            "summary",
            json!({ "dataPoints": s.data_points.iter().map(summary_point_json).collect::<Vec<_>>() }),
        ),
        None => return out,
    };

    if let Value::Object(map) = &mut out {
        map.insert(key.to_string(), data);
    }
    out
}

fn number_point_json(p: &NumberDataPoint) -> Value {
    let mut out = json!({
        "attributes": attributes_json(&p.attributes),
        "startTimeUnixNano": p.start_time_unix_nano,
        "timeUnixNano": p.time_unix_nano,
        "exemplars": p.exemplars.iter().map(exemplar_json).collect::<Vec<_>>(),
        "flags": p.flags,
    });

    if let Value::Object(map) = &mut out {
        match p.value {
            Some(number_data_point::Value::AsDouble(d)) => {
                map.insert("asDouble".to_string(), json!(d));
            }
            Some(number_data_point::Value::AsInt(i)) => {
                map.insert("asInt".to_string(), json!(i));
            }
            None => {}
        }
    }
    out
}

fn histogram_point_json(p: &HistogramDataPoint) -> Value {
    json!({
        "attributes": attributes_json(&p.attributes),
        "startTimeUnixNano": p.start_time_unix_nano,
        "timeUnixNano": p.time_unix_nano,
        "count": p.count,
        "sum": p.sum,
        "bucketCounts": p.bucket_counts,
        "explicitBounds": p.explicit_bounds,
        "exemplars": p.exemplars.iter().map(exemplar_json).collect::<Vec<_>>(),
        "flags": p.flags,
        "min": p.min,
        "max": p.max,
    })
}

fn exp_histogram_point_json(p: &ExponentialHistogramDataPoint) -> Value {
    json!({
        "attributes": attributes_json(&p.attributes),
        "startTimeUnixNano": p.start_time_unix_nano,
        "timeUnixNano": p.time_unix_nano,
        "count": p.count,
        "sum": p.sum,
        "scale": p.scale,
        "zeroCount": p.zero_count,
        "positive": buckets_json(p.positive.as_ref()),
        "negative": buckets_json(p.negative.as_ref()),
        "flags": p.flags,
        "exemplars": p.exemplars.iter().map(exemplar_json).collect::<Vec<_>>(),
        "min": p.min,
        "max": p.max,
        "zeroThreshold": p.zero_threshold,
    })
}

fn buckets_json(buckets: Option<&exponential_histogram_data_point::Buckets>) -> Value {
    match buckets {
        Some(b) => json!({ "offset": b.offset, "bucketCounts": b.bucket_counts }),
        None => json!({ "offset": 0, "bucketCounts": [] }),
    }
}

fn summary_point_json(p: &SummaryDataPoint) -> Value {
    let quantiles: Vec<Value> = p
        .quantile_values
        .iter()
        .map(|q| json!({ "quantile": q.quantile, "value": q.value }))
        .collect();

    json!({
        "attributes": attributes_json(&p.attributes),
        "startTimeUnixNano": p.start_time_unix_nano,
        "timeUnixNano": p.time_unix_nano,
        "count": p.count,
        "sum": p.sum,
        "quantileValues": quantiles,
        "flags": p.flags,
    })
}

fn exemplar_json(e: &Exemplar) -> Value {
    let mut out = json!({
        "filteredAttributes": attributes_json(&e.filtered_attributes),
        "timeUnixNano": e.time_unix_nano,
        "spanId": hex::encode(&e.span_id),
        "traceId": hex::encode(&e.trace_id),
    });

    if let Value::Object(map) = &mut out {
        match e.value {
            Some(exemplar::Value::AsDouble(d)) => {
                map.insert("asDouble".to_string(), json!(d));
            }
            Some(exemplar::Value::AsInt(i)) => {
                map.insert("asInt".to_string(), json!(i));
            }
            None => {}
        }
    }
    out
}
