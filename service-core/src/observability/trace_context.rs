//! W3C Trace Context propagation for proxied calls.
//!
//! See: https://www.w3.org/TR/trace-context/

use http::HeaderMap;
use opentelemetry::trace::TraceContextExt;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header name for W3C traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header name for W3C tracestate
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Header name for request correlation ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Inject the current span's trace context into outgoing headers.
///
/// Returns `false` when there is no valid OpenTelemetry context (for example
/// when no OTLP exporter is configured), leaving `headers` untouched.
pub fn inject_trace_context(headers: &mut HeaderMap) -> bool {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return false;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );

    if let Ok(value) = traceparent.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate_str = span_context.trace_state().header();
    if !tracestate_str.is_empty()
        && let Ok(value) = tracestate_str.parse()
    {
        headers.insert(TRACESTATE_HEADER, value);
    }

    true
}

/// Carry trace context from an inbound request to an outbound one.
///
/// The gateway's own span context wins when one exists; otherwise the
/// caller's `traceparent`/`tracestate` are relayed as received so the
/// downstream stays in the caller's trace.
pub fn propagate_trace_headers(incoming: &HeaderMap, outgoing: &mut HeaderMap) {
    if inject_trace_context(outgoing) {
        return;
    }

    for name in [TRACEPARENT_HEADER, TRACESTATE_HEADER] {
        if let Some(value) = incoming.get(name) {
            outgoing.insert(name, value.clone());
        }
    }
}
