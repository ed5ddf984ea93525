//! Process-wide initialization guard: failure, retry, concurrent callers
//! and hot-reload re-entry.

use std::sync::Arc;

use hyperwatch::config::{Config, DefaultMetricsConfig, MetricExporter};
use hyperwatch::{sdk, Error, Response};

use crate::helpers::*;

type HandlerError = std::io::Error;

fn good_config() -> Config {
    let mut config = Config::default();
    config.service.name = "integration_suite".to_string();
    config.presets.metric_exporter = MetricExporter::Prometheus;
    config.default_metrics = Some(DefaultMetricsConfig::default());
    config
}

/// The guard owns process state, so failure, retry, races and re-entry are
/// exercised in order within a single test.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_init_guard_end_to_end() {
    // A broken config fails and leaves the guard clean for a retry.
    let bad = Config {
        metrics_url: "metrics-without-slash".to_string(),
        ..Config::default()
    };
    let error = sdk::init(bad).await.unwrap_err();
    assert!(matches!(error, Error::Init(_)));
    assert!(!sdk::is_initialized());
    assert!(!sdk::is_initializing());
    assert!(sdk::current().is_none());

    // Many concurrent callers settle on one handle.
    let mut racers = Vec::new();
    for _ in 0..8 {
        racers.push(tokio::spawn(sdk::init(good_config())));
    }
    let mut sdks = Vec::new();
    for racer in racers {
        sdks.push(racer.await.unwrap().unwrap());
    }
    for other in &sdks[1..] {
        assert!(Arc::ptr_eq(&sdks[0], other));
    }
    assert!(sdk::is_initialized());
    assert!(!sdk::is_initializing());

    let sdk = sdks.remove(0);

    // Default process metrics and the export-failure counter landed on the
    // registry of the successful attempt.
    let families: Vec<String> = sdk
        .registry()
        .gather()
        .iter()
        .map(|f| f.get_name().to_string())
        .collect();
    assert!(families.iter().any(|n| n == "metrics_process_start_time_seconds"));
    assert!(families.iter().any(|n| n == "metrics_process_scheduler_pause_seconds"));
    assert!(families.iter().any(|n| n == "otel_export_failures_total"));

    // The middleware wired to the handle records into that registry.
    sdk.telemetry()
        .handle(get("/pets"), |_req| async {
            Ok::<_, HandlerError>(Response::ok("ok"))
        })
        .await
        .unwrap();
    assert_eq!(
        counter_value(sdk.registry(), "http_requests_total", &[("status", "200")]),
        1.0
    );

    // Re-entry with a different config is a no-op returning the same
    // handle; the original configuration stays.
    let mut reload = good_config();
    reload.service.name = "renamed_after_reload".to_string();
    let second = sdk::init(reload).await.unwrap();
    assert!(Arc::ptr_eq(&sdk, &second));
    assert_eq!(second.config().service.name, "integration_suite");
}
