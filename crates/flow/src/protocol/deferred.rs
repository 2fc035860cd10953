//! One-shot deferred results.
//!
//! A [`Deferred`] is the write side, a [`DeferredResult`] the read side. The first
//! call to [`Deferred::complete`] wins; later calls are ignored and logged, never
//! surfaced as a second value to the reader.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::FlowError;

/// Creates a connected deferred writer and reader.
pub fn deferred<T, E>() -> (Deferred<T, E>, DeferredResult<T, E>) {
    let (sender, receiver) = oneshot::channel();
    (Deferred { sender: Mutex::new(Some(sender)) }, DeferredResult { receiver })
}

pub struct Deferred<T, E> {
    sender: Mutex<Option<oneshot::Sender<Result<T, E>>>>,
}

impl<T, E> Deferred<T, E> {
    /// Resolves the result. Returns `false` if it was already resolved.
    pub fn complete(&self, result: Result<T, E>) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            debug!("deferred result already completed, ignoring the new value");
            return false;
        };

        if sender.send(result).is_err() {
            debug!("deferred result completed after its reader was dropped");
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("completed", &self.is_completed()).finish()
    }
}

/// The read side of a [`Deferred`], resolving once with the first completed value.
///
/// If the writer is dropped without completing, the result resolves to
/// [`FlowError::Abandoned`].
#[derive(Debug)]
pub struct DeferredResult<T, E> {
    receiver: oneshot::Receiver<Result<T, E>>,
}

impl<T, E: From<FlowError>> Future for DeferredResult<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(FlowError::Abandoned.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
