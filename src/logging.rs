//! Unified JSON logging and the telemetry export-failure watcher.
//!
//! Log format:
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"Initializing OpenTelemetry","ctx":{},"data":{}}
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prometheus::{IntCounter, Registry};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: export-failure watcher plus the JSON
/// formatter behind an env filter.
///
/// The filter applies to log output only and defaults to `hyperwatch=info`
/// when `RUST_LOG` is unset; the failure watcher sees every event, so the
/// counter does not depend on log verbosity. A host that already installed
/// its own subscriber wins; this becomes a no-op.
pub fn init(service_name: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hyperwatch=info"));

    let _ = tracing_subscriber::registry()
        .with(ExportFailureLayer)
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonFormatter::new(service_name))
                .with_filter(filter),
        )
        .try_init();
}

// ============================================================================
// Export-failure watcher
// ============================================================================

static EXPORT_FAILURES: OnceLock<IntCounter> = OnceLock::new();

fn export_failure_counter() -> &'static IntCounter {
    EXPORT_FAILURES.get_or_init(|| {
        IntCounter::new(
            "otel_export_failures_total",
            "Telemetry export failures observed in exporter log events",
        )
        .expect("valid metric name")
    })
}

/// Expose the export-failure counter on a registry.
///
/// The counter itself is process-wide; registration happens once per
/// registry, guarded by the init path.
pub fn register_export_failure_counter(registry: &Registry) -> crate::core::Result<()> {
    registry.register(Box::new(export_failure_counter().clone()))?;
    Ok(())
}

/// Layer that counts export failures reported by the telemetry crates.
///
/// The OTel 0.27 crates report exporter errors as `tracing` events under
/// `opentelemetry*` targets instead of a global error-handler hook. Matching
/// events increment `otel_export_failures_total`. The layer sits outside the
/// env filter, so the counter keeps working even when those targets are not
/// logged.
pub struct ExportFailureLayer;

impl<S: Subscriber> Layer<S> for ExportFailureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        if !meta.target().starts_with("opentelemetry") || *meta.level() > Level::WARN {
            return;
        }

        let mut visitor = ExportFailureVisitor { matched: false };
        event.record(&mut visitor);
        if visitor.matched {
            export_failure_counter().inc();
        }
    }
}

struct ExportFailureVisitor {
    matched: bool,
}

impl tracing::field::Visit for ExportFailureVisitor {
    fn record_debug(&mut self, _field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if !self.matched {
            self.matched = is_export_failure(&format!("{:?}", value));
        }
    }

    fn record_str(&mut self, _field: &tracing::field::Field, value: &str) {
        if !self.matched {
            self.matched = is_export_failure(value);
        }
    }
}

fn is_export_failure(text: &str) -> bool {
    text.to_ascii_lowercase().contains("export")
}

// ============================================================================
// JSON formatter
// ============================================================================

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let level = match *meta.level() {
            Level::TRACE => "debug",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        let log_type = if *meta.level() == Level::ERROR {
            "error"
        } else {
            "app"
        };

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let msg = visitor.message.clone().unwrap_or_default();
        let mut data = visitor.fields;
        data.remove("message");

        let entry = serde_json::json!({
            "ts": now_iso8601(),
            "level": level,
            "type": log_type,
            "msg": msg,
            "ctx": serde_json::json!({ "service": &self.service_name }),
            "data": data,
        });

        writeln!(
            writer,
            "{}",
            serde_json::to_string(&entry).unwrap_or_default()
        )
    }
}

/// Field visitor for collecting tracing fields.
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, serde_json::Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: HashMap::new(),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value).trim_matches('"').to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }
}

// ============================================================================
// Timestamp formatting
// ============================================================================

fn now_iso8601() -> String {
    iso8601(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

/// Format a duration since the UNIX epoch as `2024-01-15T10:30:00.123Z`.
/// Valid for years 1970-9999.
fn iso8601(since_epoch: Duration) -> String {
    let secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();

    let day_secs = secs % 86400;
    let hours = day_secs / 3600;
    let minutes = (day_secs % 3600) / 60;
    let seconds = day_secs % 60;

    let mut days = secs / 86400;
    let mut year = 1970u64;
    loop {
        let year_days = if is_leap_year(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }

    let month_days: [u64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };
    let mut month = 1;
    for &len in &month_days {
        if days < len {
            break;
        }
        days -= len;
        month += 1;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        days + 1,
        hours,
        minutes,
        seconds,
        millis
    )
}

const fn is_leap_year(year: u64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}
