use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::channel::Closeable;
use crate::flow::{Link, Operator};
use crate::protocol::FlowError;

/// Closes the connection when the stream below it fails.
///
/// A downstream that cannot handle an item or the completion leaves the connection in
/// an unknown state, so the connection is closed and the failure is handed back to the
/// caller as [`FlowError::PublisherClosed`]. Upstream errors close it as well before
/// they are forwarded. Only the call that actually closes the connection logs it.
pub struct CloseOnError {
    connection: Arc<dyn Closeable>,
}

impl CloseOnError {
    pub fn new(connection: Arc<dyn Closeable>) -> Self {
        Self { connection }
    }

    fn fail(&self, cause: FlowError) -> FlowError {
        if self.connection.close() {
            error!(cause = %cause, "downstream failed, connection closed");
        }
        FlowError::publisher_closed(cause)
    }
}

impl<T: Send + 'static> Operator<T> for CloseOnError {
    fn on_next(&self, link: &Link<T>, item: T) -> Result<(), FlowError> {
        link.emit_next(item).map_err(|e| self.fail(e))
    }

    fn on_complete(&self, link: &Link<T>) -> Result<(), FlowError> {
        link.emit_complete().map_err(|e| self.fail(e))
    }

    fn on_error(&self, link: &Link<T>, error: FlowError) {
        // a rejected subscription says nothing about the connection
        if !matches!(error, FlowError::AlreadySubscribed) && self.connection.close() {
            error!(cause = %error, "stream failed, connection closed");
        }
        link.emit_error(error);
    }
}

impl fmt::Debug for CloseOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseOnError").field("open", &self.connection.is_open()).finish()
    }
}
