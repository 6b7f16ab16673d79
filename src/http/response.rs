//! Response body observation.
//!
//! # Responsibilities
//! - Detect when a response body has been fully streamed to the client
//! - Detect transport failures and bodies dropped before their end
//! - Report exactly one outcome per body
//!
//! # Design Decisions
//! - Streaming responses are passed through frame by frame, never buffered
//! - A body dropped after its last frame counts as complete (the server may
//!   stop polling once `is_end_stream` is true)

use std::error::Error as _;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

/// How a response body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    /// Every frame was handed to the server.
    Complete { bytes: u64 },
    /// The body stream yielded an error.
    Failed { message: String, sources: Vec<String> },
    /// The body was dropped before its end, e.g. the client went away.
    Disconnected { bytes: u64 },
}

/// Callback receiving the single outcome of an [`ObservedBody`].
pub type OnBodyDone = Box<dyn FnOnce(BodyOutcome) + Send + 'static>;

/// Response body wrapper that reports its outcome once.
pub struct ObservedBody {
    inner: Body,
    bytes: u64,
    on_done: Option<OnBodyDone>,
}

impl ObservedBody {
    pub fn new(inner: Body, on_done: OnBodyDone) -> Self {
        Self {
            inner,
            bytes: 0,
            on_done: Some(on_done),
        }
    }

    fn finish(&mut self, outcome: BodyOutcome) {
        if let Some(on_done) = self.on_done.take() {
            on_done(outcome);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
                if this.inner.is_end_stream() {
                    let bytes = this.bytes;
                    this.finish(BodyOutcome::Complete { bytes });
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let mut sources = Vec::new();
                let mut source = e.source();
                while let Some(err) = source {
                    sources.push(err.to_string());
                    source = err.source();
                }
                this.finish(BodyOutcome::Failed {
                    message: e.to_string(),
                    sources,
                });
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                let bytes = this.bytes;
                this.finish(BodyOutcome::Complete { bytes });
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        let bytes = self.bytes;
        if self.inner.is_end_stream() {
            self.finish(BodyOutcome::Complete { bytes });
        } else {
            self.finish(BodyOutcome::Disconnected { bytes });
        }
    }
}
