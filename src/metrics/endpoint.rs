//! Metrics endpoint: registry snapshot rendering and content types.

use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

use crate::config::RegisterContentType;
use crate::core::{Error, Response, Result};

/// Prometheus text format 0.0.4.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// OpenMetrics text format 1.0.0.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Content type advertised for the given exposition format.
#[inline]
pub fn content_type(format: RegisterContentType) -> &'static str {
    match format {
        RegisterContentType::Prometheus => PROMETHEUS_CONTENT_TYPE,
        RegisterContentType::OpenMetrics => OPENMETRICS_CONTENT_TYPE,
    }
}

/// Serialize the registry snapshot in the configured exposition format.
///
/// OpenMetrics output carries the `# EOF` trailer. With `append_timestamp`,
/// every sample is stamped with the scrape time in milliseconds.
pub fn render(
    registry: &Registry,
    format: RegisterContentType,
    append_timestamp: bool,
) -> Result<String> {
    let mut metric_families = registry.gather();

    if append_timestamp {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        for family in &mut metric_families {
            for metric in family.mut_metric().iter_mut() {
                metric.set_timestamp_ms(now_ms);
            }
        }
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    let mut body = String::from_utf8(buffer)
        .map_err(|e| Error::Custom(format!("metrics encoding produced invalid UTF-8: {}", e)))?;

    if format == RegisterContentType::OpenMetrics {
        body.push_str("# EOF\n");
    }

    Ok(body)
}

/// Handle a scrape request against the registry.
///
/// Serialization failures are logged and answered with a plain-text 500;
/// they never propagate to the host.
pub fn handle_scrape(
    registry: &Registry,
    format: RegisterContentType,
    append_timestamp: bool,
) -> Response {
    match render(registry, format, append_timestamp) {
        Ok(body) => Response::ok(body).with_header("content-type", content_type(format)),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            Response::internal_error(&format!("Failed to render metrics: {}", e))
                .with_header("content-type", "text/plain; charset=utf-8")
        }
    }
}
