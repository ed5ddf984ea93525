//! Test helpers and utilities

use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Method};
use prometheus::proto::{Metric, MetricFamily};
use prometheus::Registry;

use hyperwatch::core::Body;
use hyperwatch::{Request, Response};

/// Build a GET request for `path`.
pub fn get(path: &str) -> Request {
    request(Method::GET, path)
}

/// Build a POST request for `path`.
pub fn post(path: &str) -> Request {
    request(Method::POST, path)
}

fn request(method: Method, path: &str) -> Request {
    Request::new(
        method,
        path.parse().expect("valid test path"),
        HeaderMap::new(),
        Bytes::new(),
    )
}

/// A small two-chunk streamed response.
pub fn streamed_response() -> Response {
    let chunks = futures_util::stream::iter(vec![
        Ok(Bytes::from_static(b"event: tick\n\n")),
        Ok(Bytes::from_static(b"event: done\n\n")),
    ]);
    Response::streaming(chunks)
}

/// Drain a streamed body to completion, returning the number of chunks.
pub async fn drain(response: Response) -> usize {
    let mut stream = match response.into_body() {
        Body::Stream(stream) => stream,
        Body::Full(_) => return 0,
    };
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        chunk.expect("stream chunk");
        chunks += 1;
    }
    chunks
}

fn find_family<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
    families.iter().find(|f| f.get_name() == name)
}

fn labels_match(metric: &Metric, labels: &[(&str, &str)]) -> bool {
    labels.iter().all(|(name, value)| {
        metric
            .get_label()
            .iter()
            .any(|l| l.get_name() == *name && l.get_value() == *value)
    })
}

/// Sum of counter samples whose labels include every pair in `labels`.
pub fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> f64 {
    let families = registry.gather();
    find_family(&families, name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .filter(|m| labels_match(m, labels))
                .map(|m| m.get_counter().get_value())
                .sum()
        })
        .unwrap_or(0.0)
}

/// Total histogram observations whose labels include every pair in `labels`.
pub fn histogram_count(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> u64 {
    let families = registry.gather();
    find_family(&families, name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .filter(|m| labels_match(m, labels))
                .map(|m| m.get_histogram().get_sample_count())
                .sum()
        })
        .unwrap_or(0)
}
