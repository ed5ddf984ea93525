//! Exporter-conditional HTTP instruments.
//!
//! One instrument set is built per exporter configuration. Push-style OTLP
//! exporters derive request counts from histogram bucket counts, so the
//! explicit counter is built only for the pull-based Prometheus backend.

use std::fmt;
use std::sync::OnceLock;

use opentelemetry::metrics::{Histogram as OtelHistogram, Meter};
use opentelemetry::KeyValue;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use regex::Regex;

use crate::config::MetricExporter;
use crate::core::{Error, Result};

/// HTTP latency buckets (in seconds).
pub(crate) const HTTP_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global regex for path normalization (compiled once)
static PATH_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_path_regex() -> &'static Regex {
    PATH_REGEX.get_or_init(|| Regex::new(r"/\d+(/|$)").expect("Invalid regex"))
}

/// Normalize path for metric labels (replace IDs with placeholders).
///
/// Examples:
/// - `/users/123` -> `/users/:id`
/// - `/users/123/posts/456` -> `/users/:id/posts/:id`
pub(crate) fn normalize_path(path: &str) -> String {
    get_path_regex().replace_all(path, "/:id$1").to_string()
}

/// The flat label set attached to every recorded HTTP sample.
///
/// `path` is normalized at construction; `status` is string-encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingLabels {
    pub method: String,
    pub path: String,
    pub status: String,
}

impl TimingLabels {
    /// Build labels from request data, normalizing the path.
    pub fn new(method: &str, path: &str, status: u16) -> Self {
        Self {
            method: method.to_string(),
            path: normalize_path(path),
            status: status.to_string(),
        }
    }

    /// Label values in registration order (`method`, `path`, `status`).
    #[inline]
    pub fn values(&self) -> [&str; 3] {
        [&self.method, &self.path, &self.status]
    }

    /// The same labels as OpenTelemetry attributes.
    pub fn key_values(&self) -> [KeyValue; 3] {
        [
            KeyValue::new("method", self.method.clone()),
            KeyValue::new("path", self.path.clone()),
            KeyValue::new("status", self.status.clone()),
        ]
    }
}

/// A duration histogram, backed by either metrics backend.
#[derive(Clone)]
pub enum DurationHistogram {
    Prometheus(HistogramVec),
    Otel(OtelHistogram<f64>),
}

impl DurationHistogram {
    /// Record a duration in seconds under the given labels.
    pub fn record(&self, labels: &TimingLabels, duration_secs: f64) {
        match self {
            DurationHistogram::Prometheus(hist) => {
                hist.with_label_values(&labels.values()).observe(duration_secs);
            }
            DurationHistogram::Otel(hist) => {
                hist.record(duration_secs, &labels.key_values());
            }
        }
    }
}

impl fmt::Debug for DurationHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationHistogram::Prometheus(_) => f.write_str("DurationHistogram::Prometheus"),
            DurationHistogram::Otel(_) => f.write_str("DurationHistogram::Otel"),
        }
    }
}

/// Instruments recorded by the request middleware.
///
/// Fields are `None` when the active exporter does not warrant that
/// instrument; the disabled exporter yields the all-`None` set.
#[derive(Clone, Default)]
pub struct InstrumentSet {
    /// Total requests counter (Prometheus only).
    pub requests_total: Option<IntCounterVec>,
    /// Time until the response is ready to send.
    pub request_duration: Option<DurationHistogram>,
    /// Time until the response body is fully drained.
    pub server_duration: Option<DurationHistogram>,
}

impl InstrumentSet {
    /// The all-`None` set: recording is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build instruments for the given exporter.
    ///
    /// `Prometheus` registers on `registry`; the OTLP variants require a
    /// `meter`. Must be called once per registry/exporter pair: duplicate
    /// registration surfaces as an error.
    pub fn for_exporter(
        exporter: MetricExporter,
        registry: &Registry,
        meter: Option<&Meter>,
    ) -> Result<Self> {
        match exporter {
            MetricExporter::Disabled => Ok(Self::disabled()),
            MetricExporter::Prometheus => {
                let requests_total = IntCounterVec::new(
                    Opts::new("http_requests_total", "Total HTTP requests"),
                    &["method", "path", "status"],
                )?;
                registry.register(Box::new(requests_total.clone()))?;

                let request_duration = HistogramVec::new(
                    HistogramOpts::new(
                        "http_request_duration_seconds",
                        "HTTP request duration in seconds",
                    )
                    .buckets(HTTP_BUCKETS.to_vec()),
                    &["method", "path", "status"],
                )?;
                registry.register(Box::new(request_duration.clone()))?;

                let server_duration = HistogramVec::new(
                    HistogramOpts::new(
                        "http_server_duration_seconds",
                        "HTTP server duration in seconds (full body drain)",
                    )
                    .buckets(HTTP_BUCKETS.to_vec()),
                    &["method", "path", "status"],
                )?;
                registry.register(Box::new(server_duration.clone()))?;

                Ok(Self {
                    requests_total: Some(requests_total),
                    request_duration: Some(DurationHistogram::Prometheus(request_duration)),
                    server_duration: Some(DurationHistogram::Prometheus(server_duration)),
                })
            }
            MetricExporter::Proto | MetricExporter::Http | MetricExporter::Grpc => {
                let meter = meter.ok_or_else(|| {
                    Error::Exporter(format!(
                        "{} metric exporter requires a meter",
                        exporter.as_str()
                    ))
                })?;

                let request_duration = meter
                    .f64_histogram("http_request_duration_seconds")
                    .with_description("HTTP request duration in seconds")
                    .with_unit("s")
                    .build();
                let server_duration = meter
                    .f64_histogram("http_server_duration_seconds")
                    .with_description("HTTP server duration in seconds (full body drain)")
                    .with_unit("s")
                    .build();

                Ok(Self {
                    requests_total: None,
                    request_duration: Some(DurationHistogram::Otel(request_duration)),
                    server_duration: Some(DurationHistogram::Otel(server_duration)),
                })
            }
        }
    }

    /// True when no instrument is present.
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.requests_total.is_none()
            && self.request_duration.is_none()
            && self.server_duration.is_none()
    }

    /// Record a completed request: counter (if present) plus the
    /// request-duration histogram.
    pub fn record_request(&self, labels: &TimingLabels, duration_secs: f64) {
        if let Some(ref counter) = self.requests_total {
            counter.with_label_values(&labels.values()).inc();
        }
        if let Some(ref hist) = self.request_duration {
            hist.record(labels, duration_secs);
        }
    }

    /// Record the full-body-drain duration.
    pub fn record_server_duration(&self, labels: &TimingLabels, duration_secs: f64) {
        if let Some(ref hist) = self.server_duration {
            hist.record(labels, duration_secs);
        }
    }
}

impl fmt::Debug for InstrumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSet")
            .field("requests_total", &self.requests_total.is_some())
            .field("request_duration", &self.request_duration)
            .field("server_duration", &self.server_duration)
            .finish()
    }
}
