use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Buf;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::LeasedBuffer;
use crate::flow::{Demand, Subscriber, Subscription};
use crate::protocol::{Deferred, DeferredResult, FlowError, ParseError, deferred};

/// An incremental parser fed one byte at a time.
pub trait ByteParser: Send + 'static {
    type Output: Send + 'static;

    /// Consumes `byte`. Returns the parsed value once the byte completed it.
    ///
    /// # Errors
    ///
    /// Any error ends the parse, no further bytes are fed afterwards.
    fn parse(&mut self, byte: u8) -> Result<Option<Self::Output>, ParseError>;
}

/// Drives a [`ByteParser`] over a stream of leased buffers.
///
/// Requests everything from upstream, feeds each buffer byte by byte and releases it.
/// When the parser produces its value, or fails, the subscription is cancelled and the
/// buffer is released with its unparsed bytes left in place, so the publisher hands them
/// to whoever subscribes next. The outcome resolves the [`DeferredResult`] returned by
/// [`new`](Self::new) exactly once.
pub struct ByteSubscriber<P: ByteParser> {
    parsing: Mutex<Parsing<P>>,
    subscription: OnceCell<Arc<dyn Subscription>>,
    result: Deferred<P::Output, ParseError>,
    finished: AtomicBool,
}

struct Parsing<P> {
    parser: P,
    consumed: u64,
}

impl<P: ByteParser> ByteSubscriber<P> {
    pub fn new(parser: P) -> (Arc<Self>, DeferredResult<P::Output, ParseError>) {
        let (result, reader) = deferred();
        let subscriber = Self {
            parsing: Mutex::new(Parsing { parser, consumed: 0 }),
            subscription: OnceCell::new(),
            result,
            finished: AtomicBool::new(false),
        };
        (Arc::new(subscriber), reader)
    }

    /// Number of bytes fed to the parser so far.
    pub fn consumed(&self) -> u64 {
        self.parsing.lock().consumed
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish(&self, result: Result<P::Output, ParseError>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
        }
        self.result.complete(result);
    }
}

impl<P: ByteParser> Subscriber<LeasedBuffer> for ByteSubscriber<P> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError> {
        if self.subscription.set(Arc::clone(&subscription)).is_err() {
            subscription.cancel();
            return Err(FlowError::AlreadySubscribed);
        }
        subscription.request(Demand::UNBOUNDED);
        Ok(())
    }

    fn on_next(&self, mut buffer: LeasedBuffer) -> Result<(), FlowError> {
        if self.is_finished() {
            buffer.release();
            return Ok(());
        }

        let outcome = {
            let mut parsing = self.parsing.lock();
            let mut outcome = None;
            while buffer.has_remaining() {
                let byte = buffer.get_u8();
                parsing.consumed += 1;
                match parsing.parser.parse(byte) {
                    Ok(None) => {}
                    Ok(Some(output)) => {
                        outcome = Some(Ok(output));
                        break;
                    }
                    Err(e) => {
                        outcome = Some(Err(e));
                        break;
                    }
                }
            }
            trace!(consumed = parsing.consumed, remaining = buffer.remaining(), "parsed buffer");
            outcome
        };

        match outcome {
            None => {
                buffer.release();
                Ok(())
            }
            Some(Ok(output)) => {
                self.finish(Ok(output));
                buffer.release();
                Ok(())
            }
            Some(Err(e)) => {
                debug!(cause = %e, "parse failed");
                let failure = FlowError::delivery(&e);
                self.finish(Err(e));
                buffer.release();
                Err(failure)
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.finish(Err(ParseError::from(error)));
    }

    fn on_complete(&self) -> Result<(), FlowError> {
        let consumed = self.consumed();
        self.finish(Err(ParseError::unexpected_end(consumed)));
        Ok(())
    }
}

impl<P: ByteParser> fmt::Debug for ByteSubscriber<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSubscriber")
            .field("consumed", &self.consumed())
            .field("finished", &self.is_finished())
            .finish()
    }
}
