//! Request middleware flow: counting, timing, streaming and error paths.

use std::time::Duration;

use prometheus::Registry;

use hyperwatch::config::MetricExporter;
use hyperwatch::metrics::InstrumentSet;
use hyperwatch::middleware::TtlbStrategy;
use hyperwatch::{RequestTelemetry, Response};

use crate::helpers::*;

type HandlerError = std::io::Error;

fn telemetry(registry: &Registry, strategy: TtlbStrategy) -> RequestTelemetry {
    let instruments =
        InstrumentSet::for_exporter(MetricExporter::Prometheus, registry, None).unwrap();
    RequestTelemetry::new(instruments, strategy)
}

/// Test a realistic request mix against one registry: buffered successes
/// (200 and 201), a 404, a failing handler and a streamed body.
#[tokio::test]
async fn test_mixed_traffic_counts_and_timings() {
    let registry = Registry::new();
    let telemetry = telemetry(&registry, TtlbStrategy::StreamWrap);

    for _ in 0..2 {
        telemetry
            .handle(get("/pets"), |_req| async {
                Ok::<_, HandlerError>(Response::ok("ok"))
            })
            .await
            .unwrap();
    }
    telemetry
        .handle(get("/foo"), |_req| async {
            Ok::<_, HandlerError>(
                Response::builder()
                    .status(http::StatusCode::CREATED)
                    .body("created")
                    .build(),
            )
        })
        .await
        .unwrap();
    telemetry
        .handle(get("/missing"), |_req| async {
            Ok::<_, HandlerError>(Response::not_found())
        })
        .await
        .unwrap();

    let error = telemetry
        .handle(post("/submit"), |_req| async {
            Err::<Response, _>(HandlerError::other("boom"))
        })
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "boom");

    let streamed = telemetry
        .handle(get("/events"), |_req| async {
            Ok::<_, HandlerError>(streamed_response())
        })
        .await
        .unwrap();

    // The streamed response is a third 200; status labels are string-encoded.
    let requests = "http_requests_total";
    assert_eq!(counter_value(&registry, requests, &[("status", "200")]), 3.0);
    assert_eq!(counter_value(&registry, requests, &[("status", "201")]), 1.0);
    assert_eq!(counter_value(&registry, requests, &[("status", "404")]), 1.0);
    assert_eq!(
        counter_value(
            &registry,
            requests,
            &[("method", "POST"), ("path", "/submit"), ("status", "500")],
        ),
        1.0
    );

    // Request duration lands immediately for all six; server duration is
    // still pending for the streamed body.
    assert_eq!(
        histogram_count(&registry, "http_request_duration_seconds", &[]),
        6
    );
    assert_eq!(
        histogram_count(&registry, "http_server_duration_seconds", &[]),
        5
    );

    assert_eq!(drain(streamed).await, 2);
    assert_eq!(
        histogram_count(&registry, "http_server_duration_seconds", &[]),
        6
    );
}

/// Test that numeric path segments fold into `:id` label values.
#[tokio::test]
async fn test_path_label_normalization() {
    let registry = Registry::new();
    let telemetry = telemetry(&registry, TtlbStrategy::StreamWrap);

    telemetry
        .handle(get("/pets/42"), |_req| async {
            Ok::<_, HandlerError>(Response::ok("one pet"))
        })
        .await
        .unwrap();
    telemetry
        .handle(get("/pets/42/toys/7"), |_req| async {
            Ok::<_, HandlerError>(Response::ok("one toy"))
        })
        .await
        .unwrap();

    let requests = "http_requests_total";
    assert_eq!(
        counter_value(&registry, requests, &[("path", "/pets/:id")]),
        1.0
    );
    assert_eq!(
        counter_value(&registry, requests, &[("path", "/pets/:id/toys/:id")]),
        1.0
    );
}

/// Test the async TTLB strategy: the caller gets the original response back
/// immediately and the measurement lands after the body drains.
#[tokio::test]
async fn test_async_strategy_records_after_drain() {
    let registry = Registry::new();
    let telemetry = telemetry(&registry, TtlbStrategy::Async);

    let response = telemetry
        .handle(get("/events"), |_req| async {
            Ok::<_, HandlerError>(streamed_response())
        })
        .await
        .unwrap();
    assert_eq!(
        histogram_count(&registry, "http_server_duration_seconds", &[]),
        0
    );

    drain(response).await;
    // The recorder runs on a detached task; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        histogram_count(&registry, "http_server_duration_seconds", &[]),
        1
    );
}

/// Test that abandoning a streamed response mid-read drops the async
/// measurement instead of recording a partial duration.
#[tokio::test]
async fn test_async_strategy_abandoned_stream_records_nothing() {
    let registry = Registry::new();
    let telemetry = telemetry(&registry, TtlbStrategy::Async);

    let response = telemetry
        .handle(get("/events"), |_req| async {
            Ok::<_, HandlerError>(streamed_response())
        })
        .await
        .unwrap();
    drop(response);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        histogram_count(&registry, "http_server_duration_seconds", &[]),
        0
    );
}

/// Test that both TTLB strategies produce one observation per streamed body.
#[tokio::test]
async fn test_strategies_agree_on_observation_count() {
    for strategy in [TtlbStrategy::StreamWrap, TtlbStrategy::Async] {
        let registry = Registry::new();
        let telemetry = telemetry(&registry, strategy);

        let response = telemetry
            .handle(get("/events"), |_req| async {
                Ok::<_, HandlerError>(streamed_response())
            })
            .await
            .unwrap();
        drain(response).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            histogram_count(&registry, "http_server_duration_seconds", &[]),
            1,
            "strategy {:?}",
            strategy
        );
    }
}

/// Test that inbound trace headers reach the handler untouched and the
/// request flows normally.
#[tokio::test]
async fn test_traceparent_header_passthrough() {
    let registry = Registry::new();
    let telemetry = telemetry(&registry, TtlbStrategy::StreamWrap);

    let mut request = get("/pets");
    request.headers_mut().insert(
        "traceparent",
        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
            .parse()
            .unwrap(),
    );

    let response = telemetry
        .handle(request, |req| async move {
            assert!(req.header("traceparent").is_some());
            Ok::<_, HandlerError>(Response::ok("ok"))
        })
        .await
        .unwrap();

    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        counter_value(&registry, "http_requests_total", &[("status", "200")]),
        1.0
    );
}
