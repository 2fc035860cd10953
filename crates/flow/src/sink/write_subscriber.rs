use std::fmt;
use std::sync::Arc;

use bytes::Buf;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::buffer::LeasedBuffer;
use crate::flow::{Subscriber, Subscription};
use crate::protocol::{Deferred, DeferredResult, FlowError, deferred};

enum SinkSignal {
    Next(LeasedBuffer),
    Complete,
    Error(FlowError),
}

type SharedSubscription = Arc<OnceCell<Arc<dyn Subscription>>>;

/// Persists a buffer stream into a tokio writer.
///
/// Requests one buffer at a time, writes it on a task of the given runtime and
/// releases it as soon as the write finished, then asks for the next one. The total
/// number of bytes written resolves once the stream completes and the writer is
/// flushed.
pub struct WriteSubscriber {
    sender: mpsc::UnboundedSender<SinkSignal>,
    subscription: SharedSubscription,
}

impl WriteSubscriber {
    pub fn spawn<W>(writer: W, handle: &Handle) -> (Arc<Self>, DeferredResult<u64, FlowError>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription: SharedSubscription = Arc::new(OnceCell::new());
        let (result, reader) = deferred();

        handle.spawn(write_loop(writer, receiver, Arc::clone(&subscription), result));
        (Arc::new(Self { sender, subscription }), reader)
    }

    fn send(&self, signal: SinkSignal) -> Result<(), FlowError> {
        self.sender.send(signal).map_err(|_e| FlowError::delivery("writer task has stopped"))
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut receiver: mpsc::UnboundedReceiver<SinkSignal>,
    subscription: SharedSubscription,
    result: Deferred<u64, FlowError>,
) where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let outcome = loop {
        match receiver.recv().await {
            Some(SinkSignal::Next(mut buffer)) => {
                let bytes = buffer.remaining();
                if let Err(e) = writer.write_all_buf(&mut buffer).await {
                    error!(cause = %e, "failed to write buffer");
                    drop(buffer);
                    if let Some(subscription) = subscription.get() {
                        subscription.cancel();
                    }
                    break Err(FlowError::io(e));
                }
                buffer.release();

                total += bytes as u64;
                trace!(bytes, total, "buffer written");
                if let Some(subscription) = subscription.get() {
                    subscription.request(1);
                }
            }
            Some(SinkSignal::Complete) => {
                break writer.flush().await.map(|()| total).map_err(FlowError::io);
            }
            Some(SinkSignal::Error(e)) => break Err(e),
            None => break Err(FlowError::Abandoned),
        }
    };

    debug!(total, success = outcome.is_ok(), "write subscriber finished");
    result.complete(outcome);
}

impl Subscriber<LeasedBuffer> for WriteSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError> {
        if self.subscription.set(Arc::clone(&subscription)).is_err() {
            subscription.cancel();
            return Err(FlowError::AlreadySubscribed);
        }
        subscription.request(1);
        Ok(())
    }

    fn on_next(&self, item: LeasedBuffer) -> Result<(), FlowError> {
        self.send(SinkSignal::Next(item))
    }

    fn on_error(&self, error: FlowError) {
        if let Err(e) = self.send(SinkSignal::Error(error)) {
            debug!(cause = %e, "error arrived after the writer stopped");
        }
    }

    fn on_complete(&self) -> Result<(), FlowError> {
        self.send(SinkSignal::Complete)
    }
}

impl fmt::Debug for WriteSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSubscriber")
            .field("subscribed", &self.subscription.get().is_some())
            .field("running", &!self.sender.is_closed())
            .finish()
    }
}
