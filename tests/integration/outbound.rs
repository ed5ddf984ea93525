//! Outbound request observer: buffering, dedup, error classification and
//! runtime reconfiguration.

use std::time::Duration;

use prometheus::Registry;

use hyperwatch::config::OutboundConfig;
use hyperwatch::outbound::{self, ResourceTiming};

use crate::helpers::*;

/// Time for the drain task to pick up buffered entries.
const DRAIN_PAUSE: Duration = Duration::from_millis(50);

fn entry(name: &str, status: u16, start_ms: f64) -> ResourceTiming {
    ResourceTiming::new(name, "GET", status, start_ms, 12.5)
}

/// The observer is a process singleton, so the full lifecycle runs in
/// order within one test.
#[tokio::test(flavor = "multi_thread")]
async fn test_observer_end_to_end() {
    assert!(!outbound::is_active());

    // Entries recorded before init are buffered, not dropped.
    outbound::record(entry("https://api.example.com/pets?page=2", 200, 1.0));

    let registry = Registry::new();
    let config = OutboundConfig::enabled()
        .with_app_label(|_| Some("petstore".to_string()))
        .with_should_observe(|timing| !timing.name.contains("/ignored"));
    outbound::init(&config, &registry).unwrap();
    assert!(outbound::is_active());

    // A second init is a no-op, not an error.
    outbound::init(&config, &registry).unwrap();

    // Live traffic: a duplicate delivery, a predicate skip, an HTTP error
    // and a network-level failure.
    outbound::record(entry("https://api.example.com/pets?page=2", 200, 1.0));
    outbound::record(entry("https://api.example.com/ignored", 200, 2.0));
    outbound::record(entry("https://api.example.com/pets", 503, 3.0));
    outbound::record(entry("https://api.example.com/pets", 0, 4.0));

    tokio::time::sleep(DRAIN_PAUSE).await;

    // Buffered entry plus the error pair: the duplicate collapses and the
    // predicate skip never counts.
    let requests = "outbound_requests_total";
    assert_eq!(counter_value(&registry, requests, &[]), 3.0);
    assert_eq!(
        counter_value(
            &registry,
            requests,
            &[
                ("endpoint", "/pets"),
                ("host", "api.example.com"),
                ("app", "petstore"),
            ],
        ),
        3.0
    );

    let errors = "outbound_request_errors_total";
    assert_eq!(
        counter_value(&registry, errors, &[("error_reason", "HTTP_503")]),
        1.0
    );
    assert_eq!(
        counter_value(&registry, errors, &[("error_reason", "network_error")]),
        1.0
    );

    // include_errors is off: only the success landed in the histogram.
    let duration = "outbound_request_duration_seconds";
    assert_eq!(histogram_count(&registry, duration, &[]), 1);

    // Flip at runtime: new errors are timed too.
    outbound::set_include_errors(true);
    outbound::record(entry("https://api.example.com/pets", 500, 5.0));
    tokio::time::sleep(DRAIN_PAUSE).await;

    assert_eq!(histogram_count(&registry, duration, &[]), 2);
    assert_eq!(counter_value(&registry, requests, &[]), 4.0);

    // Reset tears the singleton down; a fresh subscriber starts clean and
    // picks up entries recorded in between.
    outbound::reset();
    assert!(!outbound::is_active());

    outbound::record(entry("https://api.example.com/orders", 200, 6.0));
    let second_registry = Registry::new();
    outbound::init(&OutboundConfig::enabled(), &second_registry).unwrap();
    tokio::time::sleep(DRAIN_PAUSE).await;

    assert_eq!(
        counter_value(&second_registry, requests, &[("endpoint", "/orders")]),
        1.0
    );
    // The first registry saw nothing new.
    assert_eq!(counter_value(&registry, requests, &[]), 4.0);

    outbound::reset();
    assert!(!outbound::is_active());
}
