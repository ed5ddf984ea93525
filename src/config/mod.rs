//! Configuration module for hyperwatch.
//!
//! This module provides the full configuration surface, loadable from
//! environment variables or constructed in code by the host.
//!
//! # Example
//!
//! ```rust,ignore
//! use hyperwatch::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Metrics exporter: {}", config.presets.metric_exporter.as_str());
//! println!("Metrics endpoint: {}", config.metrics_url);
//! ```

mod error;
mod outbound;
mod parse;
mod presets;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use error::ConfigError;
pub use outbound::{LabelFn, ObservePredicate, OutboundConfig, OutboundLabels};
pub use presets::{
    ExporterPresets, MetricExporter, OtlpConfig, PrometheusConfig, TraceExporter,
};

use parse::{env_bool, env_opt, env_or};

/// Service identity attached to the telemetry resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAttributes {
    /// Service name (OTel `service.name`).
    pub name: String,
    /// Service version (OTel `service.version`).
    pub version: Option<String>,
}

impl Default for ServiceAttributes {
    fn default() -> Self {
        Self {
            name: "unknown_service".to_string(),
            version: None,
        }
    }
}

impl ServiceAttributes {
    /// Load from `OTEL_SERVICE_NAME` / `OTEL_SERVICE_VERSION`.
    pub fn from_env() -> Self {
        Self {
            name: env_or("OTEL_SERVICE_NAME", "unknown_service"),
            version: env_opt("OTEL_SERVICE_VERSION"),
        }
    }
}

/// Exposition format advertised by the metrics endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterContentType {
    /// Prometheus text format 0.0.4.
    #[default]
    Prometheus,
    /// OpenMetrics text format 1.0.0 (adds the `# EOF` trailer).
    OpenMetrics,
}

/// Default process metrics (memory, fds, CPU, scheduler pause sampler).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultMetricsConfig {
    /// Optional name prefix; falls back to the Prometheus preset prefix.
    pub prefix: Option<String>,
    /// Constant labels attached to every default metric.
    pub labels: HashMap<String, String>,
    /// Buckets for the scheduler pause histogram, in seconds.
    pub pause_buckets: Vec<f64>,
    /// Pause sampler interval in milliseconds.
    pub sampling_interval_ms: u64,
}

impl Default for DefaultMetricsConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            labels: HashMap::new(),
            pause_buckets: vec![0.001, 0.01, 0.1, 1.0, 2.0, 5.0],
            sampling_interval_ms: 10,
        }
    }
}

/// Standalone metrics server settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    /// Run a dedicated scrape server instead of (or in addition to) the
    /// host-mounted endpoint.
    pub enabled: bool,
    /// Bind port; falls back to the Prometheus preset port.
    pub port: Option<u16>,
}

/// Complete telemetry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false, init is a no-op yielding disabled
    /// instruments.
    pub enabled: bool,
    /// Path served by the metrics endpoint.
    pub metrics_url: String,
    /// Exposition format for the metrics endpoint.
    pub register_content_type: RegisterContentType,
    /// Service identity.
    pub service: ServiceAttributes,
    /// Default process metrics; `None` disables them.
    pub default_metrics: Option<DefaultMetricsConfig>,
    /// Standalone metrics server.
    pub standalone: StandaloneConfig,
    /// Exporter selection and tuning.
    pub presets: ExporterPresets,
    /// Outbound request observer (closures; not serialized).
    #[serde(skip)]
    pub outbound: OutboundConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_url: "/metrics".to_string(),
            register_content_type: RegisterContentType::default(),
            service: ServiceAttributes::default(),
            default_metrics: None,
            standalone: StandaloneConfig::default(),
            presets: ExporterPresets::default(),
            outbound: OutboundConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let presets = ExporterPresets::from_env()?;
        Ok(Self {
            enabled: env_bool("HYPERWATCH_ENABLED", true),
            metrics_url: presets.prometheus.endpoint.clone(),
            register_content_type: RegisterContentType::default(),
            service: ServiceAttributes::from_env(),
            default_metrics: None,
            standalone: StandaloneConfig::default(),
            presets,
            outbound: OutboundConfig::default(),
        })
    }

    /// Validate the configuration. Called once by init.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.metrics_url.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "metrics_url".into(),
                message: format!("must start with '/', got '{}'", self.metrics_url),
            });
        }
        if self.service.name.is_empty() {
            return Err(ConfigError::Invalid {
                key: "service.name".into(),
                message: "must not be empty".into(),
            });
        }
        if let Some(ref dm) = self.default_metrics {
            if dm.pause_buckets.is_empty() {
                return Err(ConfigError::Invalid {
                    key: "default_metrics.pause_buckets".into(),
                    message: "must not be empty".into(),
                });
            }
            if dm.sampling_interval_ms == 0 {
                return Err(ConfigError::Invalid {
                    key: "default_metrics.sampling_interval_ms".into(),
                    message: "must be positive".into(),
                });
            }
        }
        self.presets.validate()
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Telemetry configuration:");
        info!(
            "  Service: {} {}",
            self.service.name,
            self.service.version.as_deref().unwrap_or("")
        );
        info!(
            "  Metrics exporter: {}",
            self.presets.metric_exporter.as_str()
        );
        info!(
            "  Traces exporter: {}",
            self.presets.trace_exporter.as_str()
        );

        if self.presets.metric_exporter == MetricExporter::Prometheus {
            info!(
                "  Prometheus scrape: {}:{}{}",
                self.presets.prometheus.host, self.presets.prometheus.port, self.metrics_url
            );
        }

        if self.presets.metric_exporter.is_otlp() || !self.presets.trace_exporter.is_disabled() {
            info!("  OTLP endpoint: {}", self.presets.otlp.endpoint);
        }

        if self.standalone.enabled {
            info!("  Standalone metrics server: enabled");
        }

        if self.default_metrics.is_some() {
            info!("  Default process metrics: enabled");
        }

        if self.outbound.enabled {
            info!("  Outbound observer: enabled");
        }

        info!(
            "  TTLB strategy: {}",
            if self.presets.use_optimized_ttlb {
                "async"
            } else {
                "stream-wrap"
            }
        );
    }
}
