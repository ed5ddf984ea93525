//! Time-to-last-byte measurement for streamed response bodies.
//!
//! Buffered bodies are measured synchronously by the caller; streamed bodies
//! finish at their own pace, so the observation has to be deferred until the
//! last chunk leaves. Two strategies cover the trade-off between strict
//! ordering and response identity.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::oneshot;

use crate::core::{Body, ByteStream, Response};
use crate::metrics::{DurationHistogram, TimingLabels};

/// How to measure TTLB for a streamed body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtlbStrategy {
    /// Wrap the stream and record before forwarding end-of-data. Replaces
    /// the response with a new one around the wrapper; guarantees the
    /// observation is visible before any consumer sees the stream complete.
    StreamWrap,
    /// Attach a completion probe and return the original response untouched.
    /// A detached task records when (and only when) the stream drains
    /// cleanly. At-most-once, best-effort.
    Async,
}

impl TtlbStrategy {
    /// Select the strategy from the `use_optimized_ttlb` flag.
    pub fn from_flag(use_optimized: bool) -> Self {
        if use_optimized {
            Self::Async
        } else {
            Self::StreamWrap
        }
    }
}

/// Start time and instrument routing for one measurement.
#[derive(Clone, Debug)]
pub struct TtlbTiming {
    pub start: Instant,
    pub labels: TimingLabels,
    pub histogram: DurationHistogram,
}

impl TtlbTiming {
    pub fn new(start: Instant, labels: TimingLabels, histogram: DurationHistogram) -> Self {
        Self {
            start,
            labels,
            histogram,
        }
    }
}

/// Apply the TTLB strategy to a response.
///
/// Buffered bodies pass through unchanged under either strategy; the caller
/// records their duration synchronously.
pub fn measure(response: Response, timing: TtlbTiming, strategy: TtlbStrategy) -> Response {
    if !response.is_streamed() {
        return response;
    }

    match strategy {
        TtlbStrategy::StreamWrap => wrap_stream(response, timing),
        TtlbStrategy::Async => attach_probe(response, timing),
    }
}

fn wrap_stream(response: Response, timing: TtlbTiming) -> Response {
    let (status, headers, body) = response.into_parts();
    let body = match body {
        Body::Stream(inner) => Body::stream(TimedStream::new(inner, timing)),
        buffered => buffered,
    };
    Response::from_parts(status, headers, body)
}

fn attach_probe(mut response: Response, timing: TtlbTiming) -> Response {
    if let Body::Stream(stream) = response.body_mut() {
        let (tx, rx) = oneshot::channel();
        stream.attach_probe(tx);
        spawn_recorder(rx, timing);
    }
    response
}

/// Detached recorder with at-most-once semantics: a clean end-of-stream
/// fires the probe; an error or a mid-read drop cancels it and the task
/// exits without recording.
fn spawn_recorder(probe: oneshot::Receiver<()>, timing: TtlbTiming) {
    tokio::spawn(async move {
        if probe.await.is_err() {
            return;
        }
        let seconds = timing.start.elapsed().as_secs_f64();
        timing.histogram.record(&timing.labels, round_millis(seconds));
    });
}

/// Round to millisecond resolution.
fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Stream wrapper that records elapsed time when the inner stream ends.
struct TimedStream {
    inner: ByteStream,
    timing: TtlbTiming,
    recorded: bool,
}

impl TimedStream {
    fn new(inner: ByteStream, timing: TtlbTiming) -> Self {
        Self {
            inner,
            timing,
            recorded: false,
        }
    }
}

impl Stream for TimedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {
                // Record before forwarding end-of-data; guard repeat polls.
                if !self.recorded {
                    self.recorded = true;
                    let elapsed = self.timing.start.elapsed().as_secs_f64();
                    self.timing.histogram.record(&self.timing.labels, elapsed);
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
