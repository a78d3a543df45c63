//! Telemetry contract (§6): a span named `"Processing message"` per handler
//! invocation, and W3C trace-context propagation through envelope metadata.
//!
//! No exporter is wired up here — that is an external collaborator per §1 —
//! but the span and the metadata keys it reads/writes are part of the
//! contract the core guarantees.

use std::collections::HashMap;

use serde_json::Value;
use tracing::Span;

use crate::envelope::RawEnvelope;

/// Metadata key carrying the W3C `traceparent` header.
pub const TRACEPARENT_KEY: &str = "traceparent";
/// Metadata key carrying the OpenTelemetry tracestate header.
pub const TRACESTATE_KEY: &str = "otel.tracestate";

/// Start the per-invocation span described in §6. Callers drive the handler
/// future `.instrument()`-ed with this span so the fields are attached for
/// the whole invocation, including suspension points.
pub fn message_span(raw: &RawEnvelope, handler_type: &str) -> Span {
    let sqs_message_id = raw.sqs_message_id().unwrap_or_default();
    tracing::info_span!(
        "Processing message",
        message_id = %raw.id,
        message_type = %raw.message_type,
        handler_type = %handler_type,
        sqs_message_id = %sqs_message_id,
    )
}

/// Read an inbound W3C trace context from envelope extension metadata, if
/// the publisher wrote one.
pub fn read_trace_context(metadata: &HashMap<String, Value>) -> Option<TraceContext> {
    let traceparent = metadata.get(TRACEPARENT_KEY)?.as_str()?.to_string();
    let tracestate = metadata.get(TRACESTATE_KEY).and_then(Value::as_str).map(str::to_string);
    Some(TraceContext { traceparent, tracestate })
}

/// Write a trace context back into extension metadata before publish (§6).
pub fn write_trace_context(metadata: &mut HashMap<String, Value>, ctx: &TraceContext) {
    metadata.insert(TRACEPARENT_KEY.to_string(), Value::String(ctx.traceparent.clone()));
    if let Some(tracestate) = &ctx.tracestate {
        metadata.insert(TRACESTATE_KEY.to_string(), Value::String(tracestate.clone()));
    }
}

#[derive(Debug, Clone)]
pub struct TraceContext {
    pub traceparent: String,
    pub tracestate: Option<String>,
}
