//! W3C trace-context propagation and HTTP span helpers.
//!
//! Spans are opened per request by the telemetry middleware and closed on
//! every exit path; streamed-body TTLB measurement never delays span end.

use http::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector, TextMapPropagator},
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_semantic_conventions::trace::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, NETWORK_PROTOCOL_VERSION, URL_PATH,
    URL_QUERY,
};

use crate::core::Request;

// Semantic convention keys absent from the stable trace set
const URL_SCHEME: &str = "url.scheme";
const URL_FULL: &str = "url.full";
const SERVER_ADDRESS: &str = "server.address";

/// Extract W3C Trace Context from inbound request headers.
pub fn extract_context(headers: &HeaderMap) -> Context {
    let propagator = TraceContextPropagator::new();
    let extractor = HeaderExtractor(headers);
    propagator.extract(&extractor)
}

/// Inject W3C Trace Context into outbound headers.
pub fn inject_context(headers: &mut HeaderMap, context: &Context) {
    let propagator = TraceContextPropagator::new();
    let mut injector = HeaderInjector(headers);
    propagator.inject_context(context, &mut injector);
}

/// Create a server span for an HTTP request.
///
/// Span attributes carry the raw request path; metric labels are
/// normalized separately.
pub fn start_http_span(request: &Request, parent_context: &Context) -> Context {
    let tracer = global::tracer("hyperwatch");

    let method = request.method().to_string();
    let path = request.path().to_string();
    let version = format!("{:?}", request.version());

    let mut attributes = vec![
        KeyValue::new(HTTP_REQUEST_METHOD, method.clone()),
        KeyValue::new(URL_PATH, path.clone()),
        KeyValue::new(URL_SCHEME, request.scheme().to_string()),
        KeyValue::new(URL_FULL, request.full_url()),
        KeyValue::new(NETWORK_PROTOCOL_VERSION, version),
        KeyValue::new(HTTP_ROUTE, path.clone()),
    ];
    if let Some(host) = request.host() {
        attributes.push(KeyValue::new(SERVER_ADDRESS, host.to_string()));
    }
    if let Some(query) = request.query() {
        attributes.push(KeyValue::new(URL_QUERY, query.to_string()));
    }

    let span = tracer
        .span_builder(format!("HTTP {} {}", method, path))
        .with_kind(SpanKind::Server)
        .with_attributes(attributes)
        .start_with_context(&tracer, parent_context);

    Context::current_with_span(span)
}

/// End an HTTP span with response information.
pub fn end_http_span(context: &Context, status_code: u16, duration_ms: f64) {
    let span = context.span();

    span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, status_code as i64));
    span.set_attribute(KeyValue::new("http.request.duration_ms", duration_ms));

    if status_code >= 400 {
        span.set_status(Status::error(format!("HTTP {}", status_code)));
    } else {
        span.set_status(Status::Ok);
    }

    span.end();
}

/// End an HTTP span after a handler failure.
///
/// Records the error as an exception event and marks the span status with
/// the error's message. Handler failures are labeled status 500.
pub fn fail_http_span(context: &Context, error: &dyn std::error::Error, duration_ms: f64) {
    let span = context.span();

    span.set_attribute(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, 500_i64));
    span.set_attribute(KeyValue::new("http.request.duration_ms", duration_ms));
    span.record_error(error);
    span.set_status(Status::error(error.to_string()));

    span.end();
}

// Header extractor for OpenTelemetry propagation
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

// Header injector for OpenTelemetry propagation
struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}
