//! In-memory collaborators for unit tests: a scripted byte channel, a recording
//! subscriber, a hand-driven publisher and a manual scheduler.

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::buffer::LeasedBuffer;
use crate::channel::{ByteChannel, Closeable, ReadCompletion};
use crate::flow::{Publisher, Subscriber, Subscription};
use crate::operator::{ScheduledTask, Scheduler};
use crate::protocol::FlowError;

pub(crate) fn buffer(bytes: &[u8]) -> LeasedBuffer {
    LeasedBuffer::unpooled(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Next(Vec<u8>),
    Complete,
    Error(String),
}

pub(crate) fn next(bytes: &[u8]) -> Event {
    Event::Next(bytes.to_vec())
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Consume up to the limit (everything when `None`), then release.
    Consume(Option<usize>),
    /// Keep the lease until `release_held`, optionally consuming it first.
    Hold { consume: bool },
    /// Drop the buffer untouched and report a failure.
    Fail,
}

/// A subscriber recording every signal it receives.
///
/// `Next` events carry the readable bytes at the moment of delivery.
pub(crate) struct Recorder {
    initial_request: u64,
    mode: Mode,
    events: Mutex<Vec<Event>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    held: Mutex<Vec<LeasedBuffer>>,
}

impl Recorder {
    fn with_mode(initial_request: u64, mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            initial_request,
            mode,
            events: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            held: Mutex::new(Vec::new()),
        })
    }

    /// Requests `initial_request` on subscribe, consumes and releases every buffer.
    pub(crate) fn new(initial_request: u64) -> Arc<Self> {
        Self::with_mode(initial_request, Mode::Consume(None))
    }

    /// Consumes at most `limit` bytes of each buffer before releasing it.
    pub(crate) fn consuming(initial_request: u64, limit: usize) -> Arc<Self> {
        Self::with_mode(initial_request, Mode::Consume(Some(limit)))
    }

    /// Consumes every buffer but keeps the lease.
    pub(crate) fn holding(initial_request: u64) -> Arc<Self> {
        Self::with_mode(initial_request, Mode::Hold { consume: true })
    }

    /// Keeps every lease without consuming anything.
    pub(crate) fn peeking(initial_request: u64) -> Arc<Self> {
        Self::with_mode(initial_request, Mode::Hold { consume: false })
    }

    /// Fails every item and the completion.
    pub(crate) fn failing(initial_request: u64) -> Arc<Self> {
        Self::with_mode(initial_request, Mode::Fail)
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn request(&self, n: u64) {
        let subscription = self.subscription.lock().as_ref().map(Arc::clone);
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    pub(crate) fn cancel(&self) {
        let subscription = self.subscription.lock().as_ref().map(Arc::clone);
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub(crate) fn release_held(&self) {
        let held = mem::take(&mut *self.held.lock());
        drop(held);
    }

    fn failure() -> FlowError {
        FlowError::delivery("recorder failure")
    }
}

impl Subscriber<LeasedBuffer> for Recorder {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError> {
        {
            let mut slot = self.subscription.lock();
            if slot.is_some() {
                drop(slot);
                subscription.cancel();
                return Err(FlowError::AlreadySubscribed);
            }
            *slot = Some(Arc::clone(&subscription));
        }

        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
        Ok(())
    }

    fn on_next(&self, mut item: LeasedBuffer) -> Result<(), FlowError> {
        self.events.lock().push(Event::Next(item.chunk().to_vec()));

        match self.mode {
            Mode::Consume(limit) => {
                let remaining = item.remaining();
                item.advance(limit.map_or(remaining, |limit| limit.min(remaining)));
                item.release();
                Ok(())
            }
            Mode::Hold { consume } => {
                if consume {
                    item.advance(item.remaining());
                }
                self.held.lock().push(item);
                Ok(())
            }
            Mode::Fail => {
                drop(item);
                Err(Self::failure())
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        self.events.lock().push(Event::Error(error.to_string()));
    }

    fn on_complete(&self) -> Result<(), FlowError> {
        self.events.lock().push(Event::Complete);
        match self.mode {
            Mode::Fail => Err(Self::failure()),
            _ => Ok(()),
        }
    }
}

/// A subscription recording the demand and cancellation it receives.
#[derive(Default)]
pub(crate) struct TestSubscription {
    requests: Mutex<Vec<u64>>,
    cancelled: AtomicBool,
}

impl TestSubscription {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn requests(&self) -> Vec<u64> {
        self.requests.lock().clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Subscription for TestSubscription {
    fn request(&self, n: u64) {
        self.requests.lock().push(n);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A publisher whose signals are emitted by the test itself, ignoring demand.
pub(crate) struct ManualPublisher<T> {
    subscriber: Mutex<Option<Arc<dyn Subscriber<T>>>>,
    subscription: Arc<TestSubscription>,
}

impl<T> ManualPublisher<T> {
    pub(crate) fn new() -> Self {
        Self { subscriber: Mutex::new(None), subscription: TestSubscription::new() }
    }

    pub(crate) fn subscription(&self) -> Arc<TestSubscription> {
        Arc::clone(&self.subscription)
    }

    pub(crate) fn subscriber(&self) -> Arc<dyn Subscriber<T>> {
        self.subscriber.lock().as_ref().map(Arc::clone).expect("nothing subscribed yet")
    }

    pub(crate) fn next(&self, item: T) -> Result<(), FlowError> {
        self.subscriber().on_next(item)
    }

    pub(crate) fn complete(&self) -> Result<(), FlowError> {
        self.subscriber().on_complete()
    }

    pub(crate) fn error(&self, error: FlowError) {
        self.subscriber().on_error(error);
    }
}

impl<T> Publisher<T> for ManualPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Result<(), FlowError> {
        {
            let mut slot = self.subscriber.lock();
            if slot.is_some() {
                return Err(FlowError::AlreadySubscribed);
            }
            *slot = Some(Arc::clone(&subscriber));
        }
        subscriber.on_subscribe(Arc::clone(&self.subscription) as Arc<dyn Subscription>)
    }
}

enum Script {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    Stall,
}

/// Shared view of a [`ScriptedChannel`]'s read count.
#[derive(Clone)]
pub(crate) struct ReadCounter(Arc<AtomicUsize>);

impl ReadCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// A byte channel completing every read inline from a script. Reads past the end of
/// the script report end of stream.
pub(crate) struct ScriptedChannel {
    script: Mutex<VecDeque<Script>>,
    reads: ReadCounter,
    open: AtomicBool,
    stalled: Mutex<Vec<(BytesMut, ReadCompletion)>>,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            reads: ReadCounter(Arc::new(AtomicUsize::new(0))),
            open: AtomicBool::new(true),
            stalled: Mutex::new(Vec::new()),
        }
    }

    /// Delivers `bytes`, split over several reads if they exceed the buffer capacity.
    pub(crate) fn data(mut self, bytes: &[u8]) -> Self {
        self.script.get_mut().push_back(Script::Data(bytes.to_vec()));
        self
    }

    pub(crate) fn fail(mut self, kind: io::ErrorKind) -> Self {
        self.script.get_mut().push_back(Script::Fail(kind));
        self
    }

    /// A read that never completes.
    pub(crate) fn stall(mut self) -> Self {
        self.script.get_mut().push_back(Script::Stall);
        self
    }

    pub(crate) fn reads(&self) -> ReadCounter {
        self.reads.clone()
    }
}

impl Closeable for ScriptedChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}

impl ByteChannel for ScriptedChannel {
    fn read(&self, mut dst: BytesMut, completion: ReadCompletion) {
        self.reads.0.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            completion(dst, Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed")));
            return;
        }

        let step = self.script.lock().pop_front();
        match step {
            None => completion(dst, Ok(0)),
            Some(Script::Data(bytes)) => {
                let n = bytes.len().min(dst.capacity() - dst.len());
                dst.extend_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.script.lock().push_front(Script::Data(bytes[n..].to_vec()));
                }
                completion(dst, Ok(n));
            }
            Some(Script::Fail(kind)) => completion(dst, Err(io::Error::new(kind, "scripted failure"))),
            Some(Script::Stall) => self.stalled.lock().push((dst, completion)),
        }
    }
}

struct ManualTask {
    task: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    cancelled: AtomicBool,
}

impl ManualTask {
    fn is_live(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && self.task.lock().is_some()
    }
}

struct ManualHandle(Arc<ManualTask>);

impl ScheduledTask for ManualHandle {
    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }
}

/// A scheduler whose tasks only run when the test fires them.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    tasks: Mutex<Vec<Arc<ManualTask>>>,
    scheduled: AtomicUsize,
}

impl ManualScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs every task that is neither cancelled nor already run.
    pub(crate) fn fire_all(&self) {
        let tasks = mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if task.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            let callback = task.task.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Number of tasks still waiting to run.
    pub(crate) fn live(&self) -> usize {
        self.tasks.lock().iter().filter(|task| task.is_live()).count()
    }

    /// Number of tasks scheduled so far.
    pub(crate) fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn ScheduledTask> {
        let task = Arc::new(ManualTask { task: Mutex::new(Some(task)), cancelled: AtomicBool::new(false) });
        self.tasks.lock().push(Arc::clone(&task));
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        Box::new(ManualHandle(task))
    }
}
