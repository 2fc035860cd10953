//! Completion-based byte channels.
//!
//! A [`ByteChannel`] reads into a caller-supplied buffer and reports the outcome
//! through a completion callback, which may run on any thread, including inline on
//! the caller. The buffer is always handed back to the completion, whether the read
//! succeeded or not, so pooled storage is never lost on an error path.
//!
//! [`TokioChannel`] adapts any tokio `AsyncRead` to this interface.

use std::io;

use bytes::BytesMut;

mod tokio_channel;

pub use tokio_channel::TokioChannel;

/// Receives the buffer of a finished read and the number of bytes appended to it,
/// `0` meaning end of stream.
pub type ReadCompletion = Box<dyn FnOnce(BytesMut, io::Result<usize>) + Send + 'static>;

/// A connection that can be shut down from any stage of the pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait Closeable: Send + Sync {
    fn is_open(&self) -> bool;

    /// Closes the connection. Returns `true` only for the call that actually closed it.
    fn close(&self) -> bool;
}

pub trait ByteChannel: Closeable + 'static {
    /// Starts a read appending at most `dst`'s spare capacity, then calls `completion`
    /// exactly once.
    fn read(&self, dst: BytesMut, completion: ReadCompletion);
}
