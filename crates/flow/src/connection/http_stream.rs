use std::fmt;
use std::sync::Arc;

use crate::buffer::{BufferPool, ChannelPublisher, LeasedBuffer};
use crate::channel::{ByteChannel, Closeable};
use crate::codec::read_head;
use crate::config::StreamConfig;
use crate::flow::OperatorNode;
use crate::operator::{CloseOnError, DrainOnCancel, Scheduler, Timeout};
use crate::protocol::{DeferredResult, FlowError, ParseError, RequestHead};

/// The request body stream handed out by [`HttpStream::body`].
///
/// Subscribe to read the body. Cancelling, or calling `operator().drain_idle()` when
/// the body is not wanted at all, drains the remaining input so the connection can
/// carry the next request.
pub type Body = Arc<OperatorNode<LeasedBuffer, DrainOnCancel>>;

/// The inbound side of one connection.
///
/// Owns the channel publisher and assembles the pipeline stages on top of it: the head
/// of each request first, then its body, both reading from the same position in the
/// byte stream.
pub struct HttpStream<C> {
    channel: Arc<C>,
    publisher: ChannelPublisher<C>,
    scheduler: Arc<dyn Scheduler>,
    config: StreamConfig,
}

impl<C: ByteChannel> HttpStream<C> {
    pub fn new(channel: C, pool: BufferPool, scheduler: Arc<dyn Scheduler>, config: StreamConfig) -> Self {
        let channel = Arc::new(channel);
        let publisher = ChannelPublisher::with_shared_channel(Arc::clone(&channel), pool);
        Self { channel, publisher, scheduler, config }
    }

    /// Parses the next request head.
    ///
    /// The connection must deliver the complete head within the configured idle
    /// timeout. A timeout, a read error or a malformed head closes the connection.
    ///
    /// # Errors
    ///
    /// Fails if a pipeline stage refuses to subscribe.
    pub fn read_head(&self) -> Result<DeferredResult<RequestHead, ParseError>, FlowError> {
        let idle_timeout = self.config.idle_timeout();
        let timeout = Timeout::subscription(idle_timeout, Arc::clone(&self.scheduler), move || {
            FlowError::timeout("read request head", idle_timeout)
        });

        let timed = OperatorNode::attach(&self.publisher, timeout)?;
        let guarded = OperatorNode::attach(&timed, CloseOnError::new(self.connection()))?;
        timed.operator().start();

        read_head(&guarded, &self.config)
    }

    /// Opens the body stream that follows the last parsed head.
    ///
    /// Each requested buffer must arrive within the configured body timeout. A
    /// timeout, a read error or a failing subscriber closes the connection.
    ///
    /// # Errors
    ///
    /// Fails if a pipeline stage refuses to subscribe.
    pub fn body(&self) -> Result<Body, FlowError> {
        let body_timeout = self.config.body_timeout();
        let timeout = Timeout::publication(body_timeout, Arc::clone(&self.scheduler), move || {
            FlowError::timeout("read request body", body_timeout)
        });

        let timed = OperatorNode::attach(&self.publisher, timeout)?;
        let guarded = OperatorNode::attach(&timed, CloseOnError::new(self.connection()))?;
        OperatorNode::attach(&guarded, DrainOnCancel::new())
    }

    /// Closes the connection, returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.channel.close()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn publisher(&self) -> &ChannelPublisher<C> {
        &self.publisher
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn connection(&self) -> Arc<dyn Closeable> {
        Arc::clone(&self.channel) as Arc<dyn Closeable>
    }
}

impl<C> fmt::Debug for HttpStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStream").field("publisher", &self.publisher).field("config", &self.config).finish()
    }
}
