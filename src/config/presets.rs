//! Exporter selection and exporter-specific configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::parse::{env_bool, env_labels, env_opt, env_or, env_parse};
use super::ConfigError;

/// Metric exporter backend.
///
/// Selection is a closed enum so instrument construction can match
/// exhaustively instead of falling through on unknown strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricExporter {
    /// OTLP over HTTP, binary protobuf payload.
    Proto,
    /// OTLP over HTTP, JSON payload.
    Http,
    /// OTLP over gRPC.
    Grpc,
    /// Pull-based Prometheus registry, scraped over HTTP.
    Prometheus,
    /// No metrics exported.
    #[default]
    Disabled,
}

impl MetricExporter {
    /// Parse an exporter name. Unrecognized values select `Disabled`
    /// rather than failing, matching the permissive env-var contract.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "proto" => Self::Proto,
            "http" => Self::Http,
            "grpc" => Self::Grpc,
            "prometheus" => Self::Prometheus,
            _ => Self::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proto => "proto",
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Prometheus => "prometheus",
            Self::Disabled => "disabled",
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// True for the push-based OTLP variants.
    #[inline]
    pub fn is_otlp(&self) -> bool {
        matches!(self, Self::Proto | Self::Http | Self::Grpc)
    }
}

/// Trace exporter backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporter {
    /// OTLP over HTTP, binary protobuf payload.
    Proto,
    /// OTLP over HTTP, JSON payload.
    Http,
    /// OTLP over gRPC.
    Grpc,
    /// No traces exported.
    #[default]
    Disabled,
}

impl TraceExporter {
    /// Parse an exporter name. Unrecognized values select `Disabled`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "proto" => Self::Proto,
            "http" => Self::Http,
            "grpc" => Self::Grpc,
            _ => Self::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proto => "proto",
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Disabled => "disabled",
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Prometheus registry and scrape-endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Port for the standalone scrape server (default: 9464).
    pub port: u16,
    /// Scrape endpoint path (default: /metrics).
    pub endpoint: String,
    /// Bind host for the standalone scrape server (default: 0.0.0.0).
    pub host: String,
    /// Fallback name prefix for the default process metrics (default:
    /// metrics). Request metrics are never prefixed.
    pub prefix: String,
    /// Append an explicit sample timestamp to every exposed sample.
    pub append_timestamp: bool,
    /// Constant labels attached to every metric in the registry.
    pub resource_labels: HashMap<String, String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            port: 9464,
            endpoint: "/metrics".to_string(),
            host: "0.0.0.0".to_string(),
            prefix: "metrics".to_string(),
            append_timestamp: false,
            resource_labels: HashMap::new(),
        }
    }
}

impl PrometheusConfig {
    /// Load configuration from `OTEL_PROMETHEUS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_parse("OTEL_PROMETHEUS_PORT", 9464)?,
            endpoint: env_or("OTEL_PROMETHEUS_ENDPOINT", "/metrics"),
            host: env_or("OTEL_PROMETHEUS_HOST", "0.0.0.0"),
            prefix: env_or("OTEL_PROMETHEUS_PREFIX", "metrics"),
            append_timestamp: env_bool("OTEL_PROMETHEUS_APPEND_TIMESTAMP", false),
            resource_labels: env_labels("OTEL_PROMETHEUS_RESOURCE_LABELS")?,
        })
    }
}

/// OTLP exporter configuration, shared by the trace and metric pipelines.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OtlpConfig {
    /// Collector endpoint (default: http://localhost:4317).
    pub endpoint: String,
    /// Export request timeout in seconds (default: 10).
    pub timeout_secs: u64,
    /// Trace sampling ratio in [0.0, 1.0] (default: 1.0).
    pub sampling_ratio: f64,
    /// Metric export interval in seconds (default: 60).
    pub export_interval_secs: u64,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4317".to_string(),
            timeout_secs: 10,
            sampling_ratio: 1.0,
            export_interval_secs: 60,
        }
    }
}

impl OtlpConfig {
    /// Load configuration from `OTEL_EXPORTER_OTLP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env_or("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
            timeout_secs: env_parse("OTEL_EXPORTER_OTLP_TIMEOUT_SECS", 10)?,
            sampling_ratio: env_parse("OTEL_SAMPLING_RATIO", 1.0)?,
            export_interval_secs: 60,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sampling_ratio) {
            return Err(ConfigError::Invalid {
                key: "OTEL_SAMPLING_RATIO".into(),
                message: format!("must be within [0.0, 1.0], got {}", self.sampling_ratio),
            });
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::Invalid {
                key: "OTEL_EXPORTER_OTLP_ENDPOINT".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Exporter presets: which backends are active and how they are tuned.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterPresets {
    /// Metric exporter selection.
    pub metric_exporter: MetricExporter,
    /// Trace exporter selection.
    pub trace_exporter: TraceExporter,
    /// Prometheus registry/endpoint settings (used when `metric_exporter`
    /// is `Prometheus`).
    pub prometheus: PrometheusConfig,
    /// OTLP settings (used for OTLP metric exporters and all trace exporters).
    pub otlp: OtlpConfig,
    /// Measure streamed-body TTLB with the detached async strategy instead
    /// of wrapping the stream.
    pub use_optimized_ttlb: bool,
}

impl ExporterPresets {
    /// Load presets from environment variables. `OTEL_METRICS_EXPORTER` and
    /// `OTEL_TRACES_EXPORTER` select the backends when no explicit preset is
    /// supplied by the host.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            metric_exporter: env_opt("OTEL_METRICS_EXPORTER")
                .map(|s| MetricExporter::parse_lenient(&s))
                .unwrap_or_default(),
            trace_exporter: env_opt("OTEL_TRACES_EXPORTER")
                .map(|s| TraceExporter::parse_lenient(&s))
                .unwrap_or_default(),
            prometheus: PrometheusConfig::from_env()?,
            otlp: OtlpConfig::from_env()?,
            use_optimized_ttlb: env_bool("HYPERWATCH_OPTIMIZED_TTLB", false),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metric_exporter.is_otlp() || !self.trace_exporter.is_disabled() {
            self.otlp.validate()?;
        }
        Ok(())
    }
}
