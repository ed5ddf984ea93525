//! Request middleware: spans, timing and instrument recording around a
//! downstream handler.

use std::time::Instant;

use crate::core::{Request, Response};
use crate::metrics::{InstrumentSet, TimingLabels};
use crate::middleware::ttlb::{self, TtlbStrategy, TtlbTiming};
use crate::trace;

/// Per-request telemetry wrapper.
///
/// Opens a server span, delegates to the handler, records duration metrics
/// and closes the span. Handler errors are re-raised unchanged after
/// bookkeeping; the wrapper never swallows them.
#[derive(Clone, Debug)]
pub struct RequestTelemetry {
    instruments: InstrumentSet,
    strategy: TtlbStrategy,
}

impl RequestTelemetry {
    pub fn new(instruments: InstrumentSet, strategy: TtlbStrategy) -> Self {
        Self {
            instruments,
            strategy,
        }
    }

    /// A wrapper that records nothing. Spans are still opened so trace
    /// propagation keeps working when only the trace exporter is active.
    pub fn disabled() -> Self {
        Self::new(InstrumentSet::disabled(), TtlbStrategy::StreamWrap)
    }

    #[inline]
    pub fn instruments(&self) -> &InstrumentSet {
        &self.instruments
    }

    /// Run one request through the telemetry wrapper.
    ///
    /// The span parent is extracted from inbound `traceparent`/`tracestate`
    /// headers. On success the request duration is recorded immediately;
    /// server duration is recorded immediately for buffered bodies and
    /// deferred through the TTLB strategy for streamed ones. On failure all
    /// instruments record with `status="500"` and the error is returned
    /// unchanged.
    pub async fn handle<F, Fut, E>(&self, request: Request, next: F) -> Result<Response, E>
    where
        F: FnOnce(Request) -> Fut,
        Fut: std::future::Future<Output = Result<Response, E>>,
        E: std::error::Error,
    {
        let start = Instant::now();
        let method = request.method().to_string();
        let path = request.path().to_string();

        let parent = trace::extract_context(request.headers());
        let span_cx = trace::start_http_span(&request, &parent);

        match next(request).await {
            Ok(response) => {
                let status = response.status().as_u16();
                let elapsed = start.elapsed().as_secs_f64();
                let labels = TimingLabels::new(&method, &path, status);

                self.instruments.record_request(&labels, elapsed);

                let response = if response.is_streamed() {
                    match self.instruments.server_duration.clone() {
                        Some(histogram) => ttlb::measure(
                            response,
                            TtlbTiming::new(start, labels, histogram),
                            self.strategy,
                        ),
                        None => response,
                    }
                } else {
                    self.instruments.record_server_duration(&labels, elapsed);
                    response
                };

                // Span ends now; deferred TTLB completion never delays it.
                trace::end_http_span(&span_cx, status, elapsed * 1000.0);
                Ok(response)
            }
            Err(error) => {
                let elapsed = start.elapsed().as_secs_f64();
                let labels = TimingLabels::new(&method, &path, 500);

                self.instruments.record_request(&labels, elapsed);
                self.instruments.record_server_duration(&labels, elapsed);

                trace::fail_http_span(&span_cx, &error, elapsed * 1000.0);
                Err(error)
            }
        }
    }
}
