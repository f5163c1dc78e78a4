use axum::BoxError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("request body exceeds {limit} bytes")]
pub struct LimitExceeded {
    pub limit: u64,
}

/// Shared view of whether a `LimitedBody` hit its ceiling.
///
/// The body itself is moved into the multipart decoder, which only reports
/// opaque stream errors; this handle lets the caller tell an exceeded ceiling
/// apart from any other decode failure.
#[derive(Debug, Clone, Default)]
pub struct LimitTrip(Arc<AtomicBool>);

impl LimitTrip {
    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Wraps a body stream and fails as soon as more than `limit` bytes have
/// been read. The inner stream is never polled again after that.
pub struct LimitedBody<S> {
    inner: S,
    limit: u64,
    read: u64,
    trip: LimitTrip,
    done: bool,
}

impl<S> LimitedBody<S> {
    pub fn new(inner: S, limit: u64) -> (Self, LimitTrip) {
        let trip = LimitTrip::default();
        let body = Self {
            inner,
            limit,
            read: 0,
            trip: trip.clone(),
            done: false,
        };
        (body, trip)
    }

    #[cfg(test)]
    fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<S, E> Stream for LimitedBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.read = self.read.saturating_add(chunk.len() as u64);
                if self.read > self.limit {
                    self.done = true;
                    self.trip.trip();
                    return Poll::Ready(Some(Err(Box::new(LimitExceeded { limit: self.limit }))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
