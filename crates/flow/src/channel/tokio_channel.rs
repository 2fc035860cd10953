use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::channel::{ByteChannel, Closeable, ReadCompletion};

/// A [`ByteChannel`] over a tokio reader, typically the read half of a `TcpStream`.
///
/// Every read runs as a task on the runtime the channel was created on and completes
/// on one of its workers. Closing drops the reader, which shuts down its side of the
/// connection.
pub struct TokioChannel<R> {
    reader: Arc<Mutex<Option<R>>>,
    open: Arc<AtomicBool>,
    handle: Handle,
}

impl<R> TokioChannel<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates a channel running its reads on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(reader: R) -> Self {
        Self::with_handle(reader, Handle::current())
    }

    pub fn with_handle(reader: R, handle: Handle) -> Self {
        Self { reader: Arc::new(Mutex::new(Some(reader))), open: Arc::new(AtomicBool::new(true)), handle }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "channel closed")
}

impl<R> Closeable for TokioChannel<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }

        debug!("closing channel");
        match self.reader.try_lock() {
            Ok(mut reader) => drop(reader.take()),
            Err(_) => {
                // a read is in flight, drop the reader once it finishes
                let reader = Arc::clone(&self.reader);
                self.handle.spawn(async move {
                    reader.lock().await.take();
                });
            }
        }
        true
    }
}

impl<R> ByteChannel for TokioChannel<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn read(&self, mut dst: BytesMut, completion: ReadCompletion) {
        if !self.is_open() {
            completion(dst, Err(closed_error()));
            return;
        }

        let reader = Arc::clone(&self.reader);
        self.handle.spawn(async move {
            let mut reader = reader.lock().await;
            let result = match reader.as_mut() {
                Some(reader) => reader.read_buf(&mut dst).await,
                None => Err(closed_error()),
            };
            drop(reader);

            trace!(result = ?result, "read finished");
            completion(dst, result);
        });
    }
}

impl<R> fmt::Debug for TokioChannel<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioChannel").field("open", &self.open.load(Ordering::Relaxed)).finish()
    }
}
