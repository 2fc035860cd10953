use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Buf;
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::buffer::LeasedBuffer;
use crate::flow::{Demand, Link, Operator};
use crate::protocol::FlowError;

/// Keeps reading and discarding input after the consumer stopped caring about it.
///
/// A connection can only serve its next request once the current body has been read
/// off the wire. When the downstream cancels, or [`drain_idle`](Self::drain_idle) is
/// called for a body nobody subscribed to, this operator enters discard mode: it
/// requests everything from upstream and releases each buffer with its remaining bytes
/// dropped. Buffers the downstream still holds at that point are discarded when they
/// are released instead of being requeued.
pub struct DrainOnCancel {
    discarding: Arc<AtomicBool>,
    link: OnceCell<Weak<Link<LeasedBuffer>>>,
}

impl DrainOnCancel {
    pub fn new() -> Self {
        Self { discarding: Arc::new(AtomicBool::new(false)), link: OnceCell::new() }
    }

    /// Drains the stream whether or not a downstream ever subscribed.
    pub fn drain_idle(&self) {
        if let Some(link) = self.link.get().and_then(Weak::upgrade) {
            self.enter_discard_mode(&link);
        }
    }

    pub fn is_draining(&self) -> bool {
        self.discarding.load(Ordering::Acquire)
    }

    fn enter_discard_mode(&self, link: &Link<LeasedBuffer>) {
        if self.discarding.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("entering discard mode, draining the rest of the input");
        link.request_upstream(Demand::UNBOUNDED);
    }
}

impl Default for DrainOnCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator<LeasedBuffer> for DrainOnCancel {
    fn on_attach(&self, link: &Arc<Link<LeasedBuffer>>) {
        let _ = self.link.set(Arc::downgrade(link));
    }

    fn on_next(&self, link: &Link<LeasedBuffer>, mut item: LeasedBuffer) -> Result<(), FlowError> {
        if self.is_draining() {
            trace!(bytes = item.remaining(), "discarding buffer");
            item.discard_remaining();
            item.release();
            return Ok(());
        }

        let discarding = Arc::clone(&self.discarding);
        item.on_release(move |buffer| {
            if discarding.load(Ordering::Acquire) {
                buffer.discard_remaining();
            }
        });
        link.emit_next(item)
    }

    fn on_complete(&self, link: &Link<LeasedBuffer>) -> Result<(), FlowError> {
        if self.is_draining() {
            debug!("input drained to the end");
            return Ok(());
        }
        link.emit_complete()
    }

    fn on_error(&self, link: &Link<LeasedBuffer>, error: FlowError) {
        if self.is_draining() {
            debug!(cause = %error, "input failed while draining");
            return;
        }
        link.emit_error(error);
    }

    fn cancel(&self, link: &Link<LeasedBuffer>) {
        self.enter_discard_mode(link);
    }
}

impl fmt::Debug for DrainOnCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainOnCancel").field("draining", &self.is_draining()).finish()
    }
}
