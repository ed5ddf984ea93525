//! SDK construction and the process-wide initialization guard.
//!
//! [`init`] is safe to call from every worker and on hot reload: concurrent
//! callers await one shared bring-up future, later callers get the existing
//! handle back, and a failed attempt clears the in-flight slot so the next
//! call can retry.
//!
//! # Example
//!
//! ```rust,ignore
//! let sdk = hyperwatch::sdk::init(Config::from_env()?).await?;
//! let response = sdk.telemetry().handle(request, route).await?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{
    MetricExporter as OtlpMetricExporter, Protocol, SpanExporter, WithExportConfig,
};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace as sdktrace;
use opentelemetry_sdk::trace::Sampler;
use opentelemetry_sdk::{runtime, Resource};
use prometheus::Registry;
use tracing::{debug, error, info, warn};

use crate::config::{
    Config, DefaultMetricsConfig, ExporterPresets, MetricExporter, TraceExporter,
};
use crate::core::{lock_unpoisoned, Error, Response, Result};
use crate::logging;
use crate::metrics::{self, InstrumentSet, ServerOptions};
use crate::middleware::{RequestTelemetry, TtlbStrategy};
use crate::outbound;

const SERVICE_NAME: &str = "service.name";
const SERVICE_VERSION: &str = "service.version";
const METER_NAME: &str = "hyperwatch";

// Signal-specific paths appended to the OTLP base endpoint for the HTTP
// transports. gRPC multiplexes signals over one endpoint.
const OTLP_TRACES_PATH: &str = "/v1/traces";
const OTLP_METRICS_PATH: &str = "/v1/metrics";

type SharedInit = Shared<BoxFuture<'static, std::result::Result<Arc<Sdk>, Arc<Error>>>>;

struct InitState {
    in_flight: Option<SharedInit>,
    default_metrics_started: bool,
    shutdown_hook_set: bool,
}

static STATE: Mutex<InitState> = Mutex::new(InitState {
    in_flight: None,
    default_metrics_started: false,
    shutdown_hook_set: false,
});

static SDK: OnceLock<Arc<Sdk>> = OnceLock::new();

/// The assembled telemetry SDK: exporter pipelines, the Prometheus
/// registry, request instruments and the middleware wired to them.
pub struct Sdk {
    config: Config,
    registry: Registry,
    instruments: InstrumentSet,
    telemetry: RequestTelemetry,
    tracer_provider: Option<sdktrace::TracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Sdk {
    /// Build an SDK from a validated configuration.
    ///
    /// Must run inside a tokio runtime: the OTLP pipelines spawn their
    /// batch/export tasks on it. Prefer [`init`], which adds the
    /// process-wide once-only guarantees on top.
    pub fn build(mut config: Config) -> Result<Self> {
        config.validate()?;

        // The master switch turns every exporter off but leaves the rest
        // of the surface (registry, endpoint, middleware) in place, so
        // host code behaves identically either way.
        if !config.enabled {
            config.presets.metric_exporter = MetricExporter::Disabled;
            config.presets.trace_exporter = TraceExporter::Disabled;
        }

        let resource_labels = &config.presets.prometheus.resource_labels;
        let registry = if resource_labels.is_empty() {
            Registry::new()
        } else {
            Registry::new_custom(None, Some(resource_labels.clone()))?
        };

        let resource = build_resource(&config);

        let tracer_provider = build_tracer_provider(&config.presets, resource.clone())?;
        if let Some(provider) = &tracer_provider {
            global::set_tracer_provider(provider.clone());
        }

        let meter_provider = build_meter_provider(&config.presets, resource)?;
        let meter = meter_provider.as_ref().map(|provider| {
            global::set_meter_provider(provider.clone());
            provider.meter(METER_NAME)
        });

        let instruments =
            InstrumentSet::for_exporter(config.presets.metric_exporter, &registry, meter.as_ref())?;
        let telemetry = RequestTelemetry::new(
            instruments.clone(),
            TtlbStrategy::from_flag(config.presets.use_optimized_ttlb),
        );

        Ok(Self {
            config,
            registry,
            instruments,
            telemetry,
            tracer_provider,
            meter_provider,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn instruments(&self) -> &InstrumentSet {
        &self.instruments
    }

    /// The request middleware bound to this SDK's instruments.
    pub fn telemetry(&self) -> &RequestTelemetry {
        &self.telemetry
    }

    /// Serve the current registry snapshot, for hosts that mount the
    /// metrics endpoint on their own router.
    pub fn scrape(&self) -> Response {
        metrics::handle_scrape(
            &self.registry,
            self.config.register_content_type,
            self.config.presets.prometheus.append_timestamp,
        )
    }

    /// Flush and shut down the exporter pipelines.
    ///
    /// Failures are logged, never raised: shutdown runs on the SIGTERM
    /// path where there is nobody left to handle an error.
    pub fn shutdown(&self) {
        if let Some(provider) = &self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                warn!("Tracer provider shutdown failed: {}", e);
            }
        }
        if let Some(provider) = &self.meter_provider {
            if let Err(e) = provider.shutdown() {
                warn!("Meter provider shutdown failed: {}", e);
            }
        }
        info!("Telemetry shutdown complete");
    }
}

impl fmt::Debug for Sdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sdk")
            .field("service", &self.config.service.name)
            .field("metric_exporter", &self.config.presets.metric_exporter)
            .field("trace_exporter", &self.config.presets.trace_exporter)
            .field("instruments_disabled", &self.instruments.is_disabled())
            .finish()
    }
}

/// Initialize telemetry for the whole process.
///
/// Idempotent and re-entrant: the first caller runs the bring-up, every
/// concurrent caller awaits the same shared future, and callers arriving
/// after success (say, a hot-reload cycle) get the existing handle back
/// without side effects. A failed attempt surfaces the same error to all
/// waiters and clears the slot so a corrected configuration can retry.
pub async fn init(config: Config) -> Result<Arc<Sdk>> {
    let pending = {
        if let Some(sdk) = SDK.get() {
            return Ok(Arc::clone(sdk));
        }
        let mut state = lock_unpoisoned(&STATE);
        match &state.in_flight {
            Some(pending) => pending.clone(),
            None => {
                let pending: SharedInit = initialize(config).boxed().shared();
                state.in_flight = Some(pending.clone());
                pending
            }
        }
    };

    pending.await.map_err(|e| Error::Init(e.to_string()))
}

/// True once a bring-up has completed successfully.
pub fn is_initialized() -> bool {
    SDK.get().is_some()
}

/// True while a bring-up is in flight.
pub fn is_initializing() -> bool {
    lock_unpoisoned(&STATE).in_flight.is_some()
}

/// The process-wide SDK handle, if initialization has completed.
pub fn current() -> Option<Arc<Sdk>> {
    SDK.get().map(Arc::clone)
}

async fn initialize(config: Config) -> std::result::Result<Arc<Sdk>, Arc<Error>> {
    info!(
        service = %config.service.name,
        metrics = config.presets.metric_exporter.as_str(),
        traces = config.presets.trace_exporter.as_str(),
        "Initializing telemetry"
    );

    match bring_up(config).await {
        Ok(sdk) => {
            let sdk = Arc::new(sdk);
            // Publish the handle before releasing the in-flight slot so a
            // racing caller cannot start a second bring-up in between.
            let _ = SDK.set(Arc::clone(&sdk));
            let mut state = lock_unpoisoned(&STATE);
            install_shutdown_hook(&mut state, &sdk);
            state.in_flight = None;
            drop(state);
            info!("Telemetry initialized");
            Ok(sdk)
        }
        Err(e) => {
            error!("Telemetry initialization failed: {}", e);
            lock_unpoisoned(&STATE).in_flight = None;
            Err(Arc::new(e))
        }
    }
}

async fn bring_up(config: Config) -> Result<Sdk> {
    config.log_summary();
    let sdk = Sdk::build(config)?;

    if !sdk.config().enabled {
        debug!("Telemetry disabled, skipping endpoints and observers");
        return Ok(sdk);
    }

    logging::register_export_failure_counter(sdk.registry())?;

    if let Some(defaults) = &sdk.config().default_metrics {
        start_default_metrics(&sdk, defaults)?;
    }

    outbound::init(&sdk.config().outbound, sdk.registry())?;

    if sdk.config().standalone.enabled {
        let options = ServerOptions::from_config(sdk.config());
        metrics::server::start(sdk.registry().clone(), options).await?;
    }

    Ok(sdk)
}

fn start_default_metrics(sdk: &Sdk, defaults: &DefaultMetricsConfig) -> Result<()> {
    if lock_unpoisoned(&STATE).default_metrics_started {
        debug!("Default process metrics already started, skipping");
        return Ok(());
    }

    let pause = metrics::default_metrics::register(
        sdk.registry(),
        defaults,
        &sdk.config().presets.prometheus.prefix,
    )?;
    let _ = metrics::default_metrics::spawn_pause_sampler(
        pause,
        Duration::from_millis(defaults.sampling_interval_ms),
    );

    lock_unpoisoned(&STATE).default_metrics_started = true;
    Ok(())
}

fn install_shutdown_hook(state: &mut InitState, sdk: &Arc<Sdk>) {
    if state.shutdown_hook_set {
        return;
    }
    state.shutdown_hook_set = true;

    #[cfg(unix)]
    {
        let sdk = Arc::clone(sdk);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("SIGTERM received, flushing telemetry");
                    sdk.shutdown();
                    std::process::exit(0);
                }
                Err(e) => warn!("SIGTERM handler not installed: {}", e),
            }
        });
    }

    #[cfg(not(unix))]
    {
        let _ = sdk;
        debug!("Signal hooks unavailable on this platform");
    }
}

fn build_resource(config: &Config) -> Resource {
    let mut attributes = vec![KeyValue::new(SERVICE_NAME, config.service.name.clone())];
    if let Some(version) = &config.service.version {
        attributes.push(KeyValue::new(SERVICE_VERSION, version.clone()));
    }
    Resource::new(attributes)
}

fn trace_protocol(exporter: TraceExporter) -> Option<Protocol> {
    match exporter {
        TraceExporter::Grpc => Some(Protocol::Grpc),
        TraceExporter::Proto => Some(Protocol::HttpBinary),
        TraceExporter::Http => Some(Protocol::HttpJson),
        TraceExporter::Disabled => None,
    }
}

fn metric_protocol(exporter: MetricExporter) -> Option<Protocol> {
    match exporter {
        MetricExporter::Grpc => Some(Protocol::Grpc),
        MetricExporter::Proto => Some(Protocol::HttpBinary),
        MetricExporter::Http => Some(Protocol::HttpJson),
        MetricExporter::Prometheus | MetricExporter::Disabled => None,
    }
}

fn http_endpoint(base: &str, signal_path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), signal_path)
}

fn build_tracer_provider(
    presets: &ExporterPresets,
    resource: Resource,
) -> Result<Option<sdktrace::TracerProvider>> {
    let Some(protocol) = trace_protocol(presets.trace_exporter) else {
        return Ok(None);
    };

    let otlp = &presets.otlp;
    let timeout = Duration::from_secs(otlp.timeout_secs);

    let exporter = match protocol {
        Protocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&otlp.endpoint)
            .with_timeout(timeout)
            .build(),
        protocol => SpanExporter::builder()
            .with_http()
            .with_protocol(protocol)
            .with_endpoint(http_endpoint(&otlp.endpoint, OTLP_TRACES_PATH))
            .with_timeout(timeout)
            .build(),
    }
    .map_err(|e| Error::Exporter(e.to_string()))?;

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            sdktrace::Config::default()
                .with_resource(resource)
                .with_sampler(Sampler::TraceIdRatioBased(otlp.sampling_ratio)),
        )
        .build();

    Ok(Some(provider))
}

fn build_meter_provider(
    presets: &ExporterPresets,
    resource: Resource,
) -> Result<Option<SdkMeterProvider>> {
    let Some(protocol) = metric_protocol(presets.metric_exporter) else {
        return Ok(None);
    };

    let otlp = &presets.otlp;
    let timeout = Duration::from_secs(otlp.timeout_secs);

    let exporter = match protocol {
        Protocol::Grpc => OtlpMetricExporter::builder()
            .with_tonic()
            .with_endpoint(&otlp.endpoint)
            .with_timeout(timeout)
            .build(),
        protocol => OtlpMetricExporter::builder()
            .with_http()
            .with_protocol(protocol)
            .with_endpoint(http_endpoint(&otlp.endpoint, OTLP_METRICS_PATH))
            .with_timeout(timeout)
            .build(),
    }
    .map_err(|e| Error::Exporter(e.to_string()))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(otlp.export_interval_secs))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    Ok(Some(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TimingLabels;

    fn prometheus_config() -> Config {
        let mut config = Config::default();
        config.presets.metric_exporter = MetricExporter::Prometheus;
        config
    }

    #[test]
    fn test_build_default_config_is_inert() {
        let sdk = Sdk::build(Config::default()).unwrap();
        assert!(sdk.instruments().is_disabled());
        assert!(sdk.tracer_provider.is_none());
        assert!(sdk.meter_provider.is_none());
    }

    #[test]
    fn test_build_master_switch_overrides_exporters() {
        let mut config = prometheus_config();
        config.enabled = false;
        let sdk = Sdk::build(config).unwrap();
        assert!(sdk.instruments().is_disabled());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = Config {
            metrics_url: "metrics".to_string(),
            ..Config::default()
        };
        assert!(matches!(Sdk::build(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_prometheus_records_and_scrapes() {
        let sdk = Sdk::build(prometheus_config()).unwrap();
        assert!(!sdk.instruments().is_disabled());

        sdk.instruments()
            .record_request(&TimingLabels::new("GET", "/pets", 200), 0.012);

        let response = sdk.scrape();
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = response.body().as_bytes().unwrap();
        let text = std::str::from_utf8(body).unwrap();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("method=\"GET\""));
    }

    #[test]
    fn test_build_applies_resource_labels() {
        let mut config = prometheus_config();
        config
            .presets
            .prometheus
            .resource_labels
            .insert("env".to_string(), "prod".to_string());
        let sdk = Sdk::build(config).unwrap();

        sdk.instruments()
            .record_request(&TimingLabels::new("GET", "/pets", 200), 0.005);
        let response = sdk.scrape();
        let body = response.body().as_bytes().unwrap();
        let text = std::str::from_utf8(body).unwrap();
        assert!(text.contains("env=\"prod\""));
    }

    #[test]
    fn test_http_endpoint_joins_paths() {
        assert_eq!(
            http_endpoint("http://collector:4318", "/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            http_endpoint("http://collector:4318/", "/v1/metrics"),
            "http://collector:4318/v1/metrics"
        );
    }

    // The guard owns process-wide state, so failure, retry and concurrent
    // settlement are exercised in one sequenced test.
    #[tokio::test]
    async fn test_init_guard_failure_retry_and_settlement() {
        let bad = Config {
            metrics_url: "no-leading-slash".to_string(),
            ..Config::default()
        };
        let err = init(bad).await.unwrap_err();
        assert!(matches!(err, Error::Init(_)));
        assert!(!is_initialized());
        assert!(!is_initializing());
        assert!(current().is_none());

        let first = init(Config::default()).await.unwrap();
        assert!(is_initialized());

        let (second, third) = tokio::join!(init(Config::default()), init(Config::default()));
        assert!(Arc::ptr_eq(&first, &second.unwrap()));
        assert!(Arc::ptr_eq(&first, &third.unwrap()));
        assert!(Arc::ptr_eq(&first, &current().unwrap()));
    }
}
