//! Response body abstraction: fully buffered bytes or a byte stream.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::oneshot;

/// A stream of body chunks with an optional completion probe.
///
/// The probe is a oneshot sender fired when the inner stream reports a clean
/// end-of-data. If the stream yields an error or is dropped mid-read, the
/// probe is dropped without firing, so the receiving side observes
/// cancellation instead of completion.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>,
    probe: Option<oneshot::Sender<()>>,
}

impl ByteStream {
    /// Wrap a chunk stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            inner: Box::pin(stream),
            probe: None,
        }
    }

    /// Attach a completion probe. A previously attached probe is dropped.
    pub fn attach_probe(&mut self, probe: oneshot::Sender<()>) {
        self.probe = Some(probe);
    }
}

impl Stream for ByteStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                if let Some(probe) = self.probe.take() {
                    let _ = probe.send(());
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                // Error terminates measurement: drop the probe unfired.
                self.probe.take();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("probe", &self.probe.is_some())
            .finish_non_exhaustive()
    }
}

/// HTTP response body.
#[derive(Debug)]
pub enum Body {
    /// Fully buffered body.
    Full(Bytes),

    /// Streamed body.
    Stream(ByteStream),
}

impl Body {
    /// Create an empty buffered body.
    #[inline]
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    /// Create a buffered body.
    #[inline]
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Body::Full(bytes.into())
    }

    /// Create a streamed body from a chunk stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Body::Stream(ByteStream::new(stream))
    }

    /// Check whether this body is streamed.
    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Get the buffered bytes, if any.
    #[inline]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    /// Convert into a hyper-compatible boxed body for serving.
    pub fn into_http_body(self) -> BoxBody<Bytes, io::Error> {
        match self {
            Body::Full(bytes) => http_body_util::Full::new(bytes)
                .map_err(|never| match never {})
                .boxed(),
            Body::Stream(stream) => {
                StreamBody::new(futures_util::StreamExt::map(stream, |chunk| {
                    chunk.map(Frame::data)
                }))
                .boxed()
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Full(Bytes::from(s))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Full(Bytes::from(v))
    }
}
