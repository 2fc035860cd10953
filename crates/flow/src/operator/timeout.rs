use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::flow::{Demand, Link, Operator};
use crate::operator::timer::{Scheduler, TimerSlot};
use crate::protocol::FlowError;

/// When a [`Timeout`] keeps its deadline running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMode {
    /// From [`Timeout::start`] until the stream terminates, restarted by every item.
    Subscription,
    /// Only while the downstream has requested items that have not arrived yet.
    Publication,
}

type ErrorFactory = Box<dyn Fn() -> FlowError + Send + Sync>;

/// Fails a stream that goes quiet for too long.
///
/// On expiry the upstream is cancelled and the error built by the factory is emitted
/// downstream. Terminal signals and downstream cancellation stop the deadline for good.
pub struct Timeout<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    mode: TimeoutMode,
    duration: Duration,
    scheduler: Arc<dyn Scheduler>,
    error_factory: ErrorFactory,
    timer: TimerSlot,
    demand: Demand,
    link: OnceCell<Weak<Link<T>>>,
}

impl<T: Send + 'static> Timeout<T> {
    pub fn subscription<F>(duration: Duration, scheduler: Arc<dyn Scheduler>, error_factory: F) -> Self
    where
        F: Fn() -> FlowError + Send + Sync + 'static,
    {
        Self::new(TimeoutMode::Subscription, duration, scheduler, Box::new(error_factory))
    }

    pub fn publication<F>(duration: Duration, scheduler: Arc<dyn Scheduler>, error_factory: F) -> Self
    where
        F: Fn() -> FlowError + Send + Sync + 'static,
    {
        Self::new(TimeoutMode::Publication, duration, scheduler, Box::new(error_factory))
    }

    fn new(mode: TimeoutMode, duration: Duration, scheduler: Arc<dyn Scheduler>, error_factory: ErrorFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode,
                duration,
                scheduler,
                error_factory,
                timer: TimerSlot::new(),
                demand: Demand::new(),
                link: OnceCell::new(),
            }),
        }
    }

    /// Starts the deadline of a [`TimeoutMode::Subscription`] timeout. Has no effect in
    /// publication mode, where demand drives the deadline.
    pub fn start(&self) {
        if self.inner.mode == TimeoutMode::Subscription {
            self.inner.arm(false);
        }
    }

    pub fn mode(&self) -> TimeoutMode {
        self.inner.mode
    }

    pub fn is_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    pub fn has_fired(&self) -> bool {
        self.inner.timer.has_fired()
    }
}

impl<T: Send + 'static> Inner<T> {
    fn arm(self: &Arc<Self>, only_if_armed: bool) {
        let this = Arc::downgrade(self);
        self.timer.arm(only_if_armed, |token| {
            self.scheduler.schedule(
                self.duration,
                Box::new(move || {
                    if let Some(inner) = this.upgrade() {
                        inner.expire(token);
                    }
                }),
            )
        });
    }

    /// Rearms while demand is outstanding, disarms once it ran out. The demand is read
    /// under the timer lock, so a request racing this call either sees its deadline
    /// kept or arms a fresh one afterwards.
    fn follow_demand(self: &Arc<Self>) {
        if !self.timer.disarm_if(|| !self.demand.has_demand()) {
            self.arm(false);
        }
    }

    fn expire(&self, token: u64) {
        if !self.timer.try_fire(token) {
            return;
        }

        debug!(mode = ?self.mode, after = ?self.duration, "stream timed out");
        if let Some(link) = self.link.get().and_then(Weak::upgrade) {
            link.cancel_upstream();
            link.emit_error((self.error_factory)());
        }
    }
}

impl<T: Send + 'static> Operator<T> for Timeout<T> {
    fn on_attach(&self, link: &Arc<Link<T>>) {
        let _ = self.inner.link.set(Arc::downgrade(link));
    }

    fn on_next(&self, link: &Link<T>, item: T) -> Result<(), FlowError> {
        match self.inner.mode {
            TimeoutMode::Subscription => self.inner.arm(true),
            TimeoutMode::Publication => {
                self.inner.demand.take_one();
                self.inner.follow_demand();
            }
        }
        link.emit_next(item)
    }

    fn on_complete(&self, link: &Link<T>) -> Result<(), FlowError> {
        self.inner.timer.close();
        link.emit_complete()
    }

    fn on_error(&self, link: &Link<T>, error: FlowError) {
        self.inner.timer.close();
        link.emit_error(error);
    }

    fn request(&self, link: &Link<T>, n: u64) {
        if self.inner.mode == TimeoutMode::Publication && n > 0 && self.inner.demand.add(n) == 0 {
            self.inner.arm(false);
        }
        link.request_upstream(n);
    }

    fn cancel(&self, link: &Link<T>) {
        self.inner.timer.close();
        link.cancel_upstream();
    }
}

impl<T> fmt::Debug for Timeout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("mode", &self.inner.mode)
            .field("duration", &self.inner.duration)
            .field("timer", &self.inner.timer)
            .field("demand", &self.inner.demand)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LeasedBuffer;
    use crate::flow::{OperatorNode, Publisher};
    use crate::testing::{Event, ManualPublisher, ManualScheduler, Recorder, buffer, next};

    const AFTER: Duration = Duration::from_secs(1);

    type Node = Arc<OperatorNode<LeasedBuffer, Timeout<LeasedBuffer>>>;

    fn subscription_timeout(scheduler: &Arc<ManualScheduler>) -> Timeout<LeasedBuffer> {
        Timeout::subscription(AFTER, Arc::clone(scheduler) as _, || FlowError::timeout("read", AFTER))
    }

    fn publication_timeout(scheduler: &Arc<ManualScheduler>) -> Timeout<LeasedBuffer> {
        Timeout::publication(AFTER, Arc::clone(scheduler) as _, || FlowError::timeout("read", AFTER))
    }

    fn wire(timeout: Timeout<LeasedBuffer>, recorder: &Arc<Recorder>) -> (ManualPublisher<LeasedBuffer>, Node) {
        let publisher = ManualPublisher::new();
        let node = OperatorNode::attach(&publisher, timeout).unwrap();
        node.subscribe(Arc::clone(recorder) as _).unwrap();
        (publisher, node)
    }

    fn timed_out() -> Event {
        Event::Error("read timed out after 1s".to_string())
    }

    #[test]
    fn subscription_mode_waits_for_start() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(Demand::UNBOUNDED);
        let (publisher, node) = wire(subscription_timeout(&scheduler), &recorder);
        assert_eq!(node.operator().mode(), TimeoutMode::Subscription);

        publisher.next(buffer(b"a")).unwrap();
        assert_eq!(scheduler.live(), 0);

        node.operator().start();
        assert_eq!(scheduler.live(), 1);
        assert!(node.operator().is_armed());
    }

    #[test]
    fn subscription_mode_expiry_cancels_and_fails() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(Demand::UNBOUNDED);
        let (publisher, node) = wire(subscription_timeout(&scheduler), &recorder);

        node.operator().start();
        scheduler.fire_all();

        assert!(publisher.subscription().is_cancelled());
        assert_eq!(recorder.events(), vec![timed_out()]);
        assert!(node.operator().has_fired());
    }

    #[test]
    fn subscription_mode_rearms_on_every_item() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(Demand::UNBOUNDED);
        let (publisher, node) = wire(subscription_timeout(&scheduler), &recorder);

        node.operator().start();
        publisher.next(buffer(b"a")).unwrap();
        publisher.next(buffer(b"b")).unwrap();

        assert_eq!(scheduler.scheduled(), 3);
        assert_eq!(scheduler.live(), 1);

        scheduler.fire_all();
        assert_eq!(recorder.events(), vec![next(b"a"), next(b"b"), timed_out()]);
    }

    #[test]
    fn completion_stops_the_deadline() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(Demand::UNBOUNDED);
        let (publisher, node) = wire(subscription_timeout(&scheduler), &recorder);

        node.operator().start();
        publisher.complete().unwrap();
        scheduler.fire_all();

        assert_eq!(scheduler.live(), 0);
        assert!(!publisher.subscription().is_cancelled());
        assert_eq!(recorder.events(), vec![Event::Complete]);
    }

    #[test]
    fn downstream_cancel_stops_the_deadline() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(1);
        let (_publisher, node) = wire(subscription_timeout(&scheduler), &recorder);

        node.operator().start();
        recorder.cancel();
        scheduler.fire_all();

        assert!(recorder.events().is_empty());
        assert!(!node.operator().has_fired());
    }

    #[test]
    fn publication_mode_follows_demand() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(0);
        let (publisher, node) = wire(publication_timeout(&scheduler), &recorder);
        assert_eq!(scheduler.live(), 0);

        recorder.request(1);
        assert_eq!(scheduler.live(), 1);

        publisher.next(buffer(b"a")).unwrap();
        assert_eq!(scheduler.live(), 0);
        assert!(!node.operator().is_armed());

        scheduler.fire_all();
        assert_eq!(recorder.events(), vec![next(b"a")]);
        assert_eq!(publisher.subscription().requests(), vec![1]);
    }

    #[test]
    fn publication_mode_fires_while_demand_is_outstanding() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(0);
        let (publisher, _node) = wire(publication_timeout(&scheduler), &recorder);

        recorder.request(2);
        publisher.next(buffer(b"a")).unwrap();
        assert_eq!(scheduler.live(), 1);

        scheduler.fire_all();

        assert!(publisher.subscription().is_cancelled());
        assert_eq!(recorder.events(), vec![next(b"a"), timed_out()]);
    }

    #[test]
    fn items_after_expiry_are_dropped() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(Demand::UNBOUNDED);
        let (publisher, node) = wire(subscription_timeout(&scheduler), &recorder);

        node.operator().start();
        scheduler.fire_all();
        publisher.next(buffer(b"late")).unwrap();

        assert_eq!(recorder.events(), vec![timed_out()]);
        assert_eq!(scheduler.live(), 0);
    }

    #[test]
    fn request_racing_the_last_item_keeps_the_deadline() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(0);
        let timeout = publication_timeout(&scheduler);
        let inner = Arc::clone(&timeout.inner);
        let (publisher, node) = wire(timeout, &recorder);
        assert_eq!(node.operator().mode(), TimeoutMode::Publication);

        recorder.request(1);
        // the last item consumed the demand, a new request lands before the deadline
        // is settled
        inner.demand.take_one();
        recorder.request(1);
        inner.follow_demand();

        assert!(node.operator().is_armed());
        assert_eq!(scheduler.live(), 1);

        scheduler.fire_all();
        assert!(publisher.subscription().is_cancelled());
        assert_eq!(recorder.events(), vec![timed_out()]);
    }

    #[test]
    fn last_item_without_new_demand_disarms() {
        let scheduler = Arc::new(ManualScheduler::new());
        let recorder = Recorder::new(0);
        let timeout = publication_timeout(&scheduler);
        let inner = Arc::clone(&timeout.inner);
        let (_publisher, node) = wire(timeout, &recorder);

        recorder.request(1);
        inner.demand.take_one();
        inner.follow_demand();

        assert!(!node.operator().is_armed());
        assert_eq!(scheduler.live(), 0);
    }
}
