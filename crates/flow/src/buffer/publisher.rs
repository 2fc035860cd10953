//! Publishes the bytes read from a channel as a stream of leased buffers.
//!
//! A [`ChannelPublisher`] reads only when its subscriber has demand, no lease is out
//! and no partially consumed buffer is waiting to be redelivered. Everything that
//! touches its state (subscribing, demand, cancellation, read completions and
//! releases) is submitted to one [`SerialExecutor`], so a release from inside `on_next`
//! queues the follow-up delivery instead of recursing into it.

use std::fmt;
use std::io;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::buffer::{BufferPool, LeasedBuffer, Reclaim};
use crate::channel::ByteChannel;
use crate::flow::{Demand, Publisher, SerialExecutor, Subscriber, Subscription};
use crate::protocol::FlowError;

/// Consecutive requeues without any consumed byte before a stall is reported.
const STALL_WARN_THRESHOLD: usize = 64;

pub struct ChannelPublisher<C> {
    shared: Arc<Shared<C>>,
}

struct Shared<C> {
    this: Weak<Shared<C>>,
    channel: Arc<C>,
    pool: BufferPool,
    serial: SerialExecutor,
    // only touched from serial actions, the lock is never contended
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    active: Option<Active>,
    next_id: u64,
    pending: Option<Pending>,
    lent_at: Option<usize>,
    reading: bool,
    terminal: Option<Terminal>,
    stalled_requeues: usize,
}

struct Active {
    id: u64,
    subscriber: Arc<dyn Subscriber<LeasedBuffer>>,
    demand: Arc<Demand>,
}

/// Storage holding unread bytes from `position` on.
struct Pending {
    storage: BytesMut,
    position: usize,
}

#[derive(Clone)]
enum Terminal {
    Complete,
    Failed { kind: io::ErrorKind, message: String },
}

impl Terminal {
    fn failed(e: &io::Error) -> Self {
        Self::Failed { kind: e.kind(), message: e.to_string() }
    }

    fn signal(&self, subscriber: &dyn Subscriber<LeasedBuffer>) {
        match self {
            Self::Complete => {
                if let Err(e) = subscriber.on_complete() {
                    debug!(cause = %e, "subscriber failed to handle completion");
                }
            }
            Self::Failed { kind, message } => {
                subscriber.on_error(FlowError::io(io::Error::new(*kind, message.clone())));
            }
        }
    }
}

impl<C: ByteChannel> ChannelPublisher<C> {
    pub fn new(channel: C, pool: BufferPool) -> Self {
        Self::with_shared_channel(Arc::new(channel), pool)
    }

    /// Creates a publisher over a channel that other parts of the connection also hold,
    /// typically to close it.
    pub fn with_shared_channel(channel: Arc<C>, pool: BufferPool) -> Self {
        let shared = Arc::new_cyclic(|this| Shared {
            this: Weak::clone(this),
            channel,
            pool,
            serial: SerialExecutor::new(),
            state: Mutex::new(State::default()),
        });
        Self { shared }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.shared.channel
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }
}

impl<C: ByteChannel> Publisher<LeasedBuffer> for ChannelPublisher<C> {
    /// Queues the subscriber for attachment. A subscriber arriving while another one
    /// is active is rejected with [`FlowError::AlreadySubscribed`] through its
    /// `on_error`; one arriving after the stream ended receives the same terminal
    /// signal as its predecessor.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<LeasedBuffer>>) -> Result<(), FlowError> {
        let shared = Arc::clone(&self.shared);
        self.shared.serial.submit(move || shared.attach(subscriber));
        Ok(())
    }
}

impl<C> fmt::Debug for ChannelPublisher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ChannelPublisher")
            .field("subscribed", &state.active.is_some())
            .field("pending", &state.pending.is_some())
            .field("on_loan", &state.lent_at.is_some())
            .field("reading", &state.reading)
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

impl<C: ByteChannel> Shared<C> {
    fn schedule_pump(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        self.serial.submit(move || shared.pump());
    }

    fn attach(self: &Arc<Self>, subscriber: Arc<dyn Subscriber<LeasedBuffer>>) {
        let mut state = self.state.lock();
        if state.active.is_some() {
            drop(state);
            debug!("publisher already has an active subscriber, rejecting the new one");
            subscriber.on_error(FlowError::AlreadySubscribed);
            return;
        }

        let id = state.next_id;
        state.next_id += 1;
        let demand = Arc::new(Demand::new());
        state.active = Some(Active { id, subscriber: Arc::clone(&subscriber), demand: Arc::clone(&demand) });
        drop(state);

        debug!(id, "subscriber attached");
        let subscription = Arc::new(LeaseSubscription { shared: Weak::clone(&self.this), id, demand });
        if let Err(e) = subscriber.on_subscribe(subscription) {
            debug!(id, cause = %e, "subscriber refused the subscription");
            self.end(id);
            return;
        }

        self.pump();
    }

    /// Moves the stream forward as far as the current state allows: redelivers a
    /// requeued buffer, signals a terminal, or issues the next read.
    fn pump(self: &Arc<Self>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.lent_at.is_some() || state.reading {
            return;
        }
        let Some(active) = state.active.as_ref() else { return };

        if state.pending.is_none()
            && let Some(terminal) = state.terminal.clone()
        {
            let id = active.id;
            let subscriber = Arc::clone(&active.subscriber);
            state.active = None;
            drop(guard);

            debug!(id, "stream terminated, signalling subscriber");
            terminal.signal(subscriber.as_ref());
            return;
        }

        if !active.demand.has_demand() {
            return;
        }

        if let Some(pending) = state.pending.take() {
            active.demand.take_one();
            let id = active.id;
            let subscriber = Arc::clone(&active.subscriber);
            state.lent_at = Some(pending.position);
            drop(guard);

            let buffer = LeasedBuffer::leased(pending.storage, pending.position, Arc::clone(self) as Arc<dyn Reclaim>);
            self.deliver(id, subscriber.as_ref(), buffer);
            return;
        }

        state.reading = true;
        drop(guard);

        let storage = self.pool.acquire();
        trace!(capacity = storage.capacity(), "issuing read");
        let shared = Arc::clone(self);
        self.channel.read(
            storage,
            Box::new(move |storage, result| {
                let completed = Arc::clone(&shared);
                shared.serial.submit(move || completed.on_read(storage, result));
            }),
        );
    }

    fn deliver(self: &Arc<Self>, id: u64, subscriber: &dyn Subscriber<LeasedBuffer>, buffer: LeasedBuffer) {
        trace!(id, position = buffer.position(), limit = buffer.limit(), "delivering buffer");
        if let Err(e) = subscriber.on_next(buffer) {
            debug!(id, cause = %e, "subscriber failed to handle buffer, ending its subscription");
            self.end(id);
        }
    }

    fn on_read(self: &Arc<Self>, storage: BytesMut, result: io::Result<usize>) {
        let mut state = self.state.lock();
        state.reading = false;

        match result {
            Ok(0) => {
                trace!("end of stream");
                self.pool.recycle(storage);
                state.terminal = Some(Terminal::Complete);
            }
            Ok(bytes) => {
                trace!(bytes, "read completed");
                state.pending = Some(Pending { storage, position: 0 });
            }
            Err(e) => {
                error!(cause = %e, "read failed");
                self.pool.recycle(storage);
                state.terminal = Some(Terminal::failed(&e));
            }
        }
        drop(state);

        self.pump();
    }

    fn on_release(self: &Arc<Self>, storage: BytesMut, position: usize) {
        let mut state = self.state.lock();
        let lent_at = state.lent_at.take();

        if position < storage.len() {
            if lent_at == Some(position) {
                state.stalled_requeues += 1;
                if state.stalled_requeues == STALL_WARN_THRESHOLD {
                    warn!(
                        requeues = state.stalled_requeues,
                        "buffer released repeatedly without consuming any byte, reads are stalled"
                    );
                }
            } else {
                state.stalled_requeues = 0;
            }

            trace!(remaining = storage.len() - position, "requeueing partially consumed buffer");
            state.pending = Some(Pending { storage, position });
            drop(state);
        } else {
            state.stalled_requeues = 0;
            drop(state);
            self.pool.recycle(storage);
        }

        self.pump();
    }

    fn end(&self, id: u64) {
        let mut state = self.state.lock();
        if state.active.as_ref().is_some_and(|active| active.id == id) {
            state.active = None;
            debug!(id, "subscription ended");
        }
    }
}

impl<C: ByteChannel> Reclaim for Shared<C> {
    fn reclaim(self: Arc<Self>, storage: BytesMut, position: usize) {
        let shared = Arc::clone(&self);
        self.serial.submit(move || shared.on_release(storage, position));
    }
}

impl<C> Drop for Shared<C> {
    fn drop(&mut self) {
        if let Some(pending) = self.state.get_mut().pending.take() {
            self.pool.recycle(pending.storage);
        }
    }
}

struct LeaseSubscription<C> {
    shared: Weak<Shared<C>>,
    id: u64,
    demand: Arc<Demand>,
}

impl<C: ByteChannel> Subscription for LeaseSubscription<C> {
    fn request(&self, n: u64) {
        if n == 0 {
            debug!(id = self.id, "ignoring request for zero items");
            return;
        }
        let Some(shared) = self.shared.upgrade() else { return };

        self.demand.add(n);
        shared.schedule_pump();
    }

    fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else { return };

        let id = self.id;
        let task = Arc::clone(&shared);
        shared.serial.submit(move || task.end(id));
    }
}
