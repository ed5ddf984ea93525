//! Metrics endpoint: SDK scrape wiring and the standalone HTTP server.

use prometheus::{IntCounter, Registry};

use hyperwatch::config::{Config, MetricExporter, RegisterContentType};
use hyperwatch::metrics::{self, ServerOptions};
use hyperwatch::{Response, Sdk};

use crate::helpers::*;

type HandlerError = std::io::Error;

/// Test that a scrape through the SDK handle reflects middleware traffic
/// and honors the configured exposition format.
#[tokio::test]
async fn test_sdk_scrape_reflects_middleware_traffic() {
    let mut config = Config::default();
    config.presets.metric_exporter = MetricExporter::Prometheus;
    config.register_content_type = RegisterContentType::OpenMetrics;
    let sdk = Sdk::build(config).unwrap();

    sdk.telemetry()
        .handle(get("/pets"), |_req| async {
            Ok::<_, HandlerError>(Response::ok("ok"))
        })
        .await
        .unwrap();

    let response = sdk.scrape();
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        response.header("content-type"),
        Some(metrics::content_type(RegisterContentType::OpenMetrics))
    );

    let body = std::str::from_utf8(response.body().as_bytes().unwrap()).unwrap();
    assert!(body.contains("http_requests_total"));
    assert!(body.ends_with("# EOF\n"));
}

/// Standalone server behavior over real HTTP. The already-started guard is
/// process-wide, so every step runs sequenced in one test.
#[tokio::test(flavor = "multi_thread")]
async fn test_standalone_server_lifecycle() {
    let registry = Registry::new();
    let counter = IntCounter::new("jobs_total", "Total jobs").unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter.inc();

    let options = ServerOptions {
        host: "127.0.0.1".to_string(),
        port: 0,
        metrics_url: "/metrics".to_string(),
        format: RegisterContentType::Prometheus,
        append_timestamp: false,
    };

    let addr = metrics::server::start(registry.clone(), options.clone())
        .await
        .unwrap()
        .expect("first start binds a listener");

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let response = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = response.text().await.unwrap();
    assert!(body.contains("jobs_total 1"));

    // Anything but a GET on the metrics path is a plain 404.
    let response = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Not found");

    let response = client
        .post(format!("{}/metrics", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    // A second server never starts, whatever the options say.
    let again = metrics::server::start(registry.clone(), options).await.unwrap();
    assert!(again.is_none());
}
