use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BodyError {
    #[error("body exceeds the declared maximum of {limit} bytes")]
    Oversize { limit: u64 },
    #[error("body read failed")]
    Io(#[from] io::Error),
}

/// Counts bytes flowing from the client toward a storage backend and fails
/// fast once a hard ceiling is crossed.
///
/// The wrapped stream is pull-based: the backend requests the next buffer,
/// which requests from the inbound body, so backpressure and cancellation
/// propagate through the whole chain. After the stream ends (or fails),
/// [`bytes_received`](Self::bytes_received) is the single source of truth
/// for how many bytes actually reached the backend.
pub struct ByteCountingBody<S> {
    inner: S,
    max_allowed: u64,
    received: u64,
    done: bool,
}

impl<S> ByteCountingBody<S> {
    pub fn new(inner: S, max_allowed: u64) -> Self {
        Self {
            inner,
            max_allowed,
            received: 0,
            done: false,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }
}

impl<S> Stream for ByteCountingBody<S>
where
    S: Stream<Item = std::result::Result<Bytes, io::Error>> + Unpin,
{
    type Item = std::result::Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(BodyError::Io(e))))
            }
            Poll::Ready(Some(Ok(chunk))) => {
                let next = self.received + chunk.len() as u64;
                if next > self.max_allowed {
                    self.done = true;
                    return Poll::Ready(Some(Err(BodyError::Oversize {
                        limit: self.max_allowed,
                    })));
                }
                self.received = next;
                Poll::Ready(Some(Ok(chunk)))
            }
        }
    }
}
