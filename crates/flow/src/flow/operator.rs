//! The decorator base for stream transforms.
//!
//! An [`OperatorNode`] sits between one upstream publisher and one downstream
//! subscriber. It subscribes to the upstream the moment it is built and hands itself out
//! as a publisher to exactly one downstream. Every signal passing through is routed to
//! an [`Operator`], whose methods default to plain pass-through:
//!
//! ```text
//!            on_next / on_complete / on_error
//! upstream  ───────────────────────────────────▶  downstream
//!           ◀───────────────────────────────────
//!                     request / cancel
//! ```
//!
//! A transform overrides only the interception points it changes and continues
//! propagation through the [`Link`]. An override that does not call through to the link
//! silently ends the chain at that point; that is the contract, it is not checked.
//!
//! The node takes care of the bookkeeping every transform would otherwise repeat:
//!
//! - the upstream subscription is set once and never swapped, a second one is
//!   cancelled and rejected
//! - demand or cancellation requested before the upstream subscription arrives is
//!   replayed onto it
//! - the downstream is granted once, a second subscriber is rejected
//! - downstream signals never overlap across threads and stop after the first
//!   terminal signal
//! - a terminal signal arriving before the downstream subscribes is replayed to it

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::flow::{Publisher, Subscriber, Subscription};
use crate::protocol::FlowError;

/// Interception points of a stream transform.
///
/// Downstream-bound signals are `on_next`, `on_complete` and `on_error`; upstream-bound
/// ones are `request` and `cancel`. Every default forwards the signal unchanged.
pub trait Operator<T: Send + 'static>: Send + Sync + 'static {
    /// Called once when the node is built, before it subscribes upstream.
    fn on_attach(&self, _link: &Arc<Link<T>>) {}

    fn on_next(&self, link: &Link<T>, item: T) -> Result<(), FlowError> {
        link.emit_next(item)
    }

    fn on_complete(&self, link: &Link<T>) -> Result<(), FlowError> {
        link.emit_complete()
    }

    fn on_error(&self, link: &Link<T>, error: FlowError) {
        link.emit_error(error);
    }

    fn request(&self, link: &Link<T>, n: u64) {
        link.request_upstream(n);
    }

    fn cancel(&self, link: &Link<T>) {
        link.cancel_upstream();
    }
}

enum Terminal {
    Complete,
    Error(FlowError),
}

enum Upstream {
    Waiting { demand: u64, cancelled: bool },
    Ready(Arc<dyn Subscription>),
}

/// Both ends of an operator node: the upstream subscription and the downstream
/// subscriber.
pub struct Link<T> {
    upstream: Mutex<Upstream>,
    downstream: OnceCell<Arc<dyn Subscriber<T>>>,
    signal_guard: ReentrantMutex<()>,
    terminated: AtomicBool,
    early_terminal: Mutex<Option<Terminal>>,
}

impl<T: Send + 'static> Link<T> {
    pub fn new() -> Self {
        Self {
            upstream: Mutex::new(Upstream::Waiting { demand: 0, cancelled: false }),
            downstream: OnceCell::new(),
            signal_guard: ReentrantMutex::new(()),
            terminated: AtomicBool::new(false),
            early_terminal: Mutex::new(None),
        }
    }

    /// Delivers an item downstream. Items arriving without a downstream or after a
    /// terminal signal are dropped.
    pub fn emit_next(&self, item: T) -> Result<(), FlowError> {
        let _guard = self.signal_guard.lock();
        if self.terminated.load(Ordering::Acquire) {
            trace!("item after terminal signal, dropping it");
            return Ok(());
        }

        match self.downstream.get() {
            Some(downstream) => downstream.on_next(item),
            None => {
                warn!("item emitted without a downstream subscriber, dropping it");
                Ok(())
            }
        }
    }

    pub fn emit_complete(&self) -> Result<(), FlowError> {
        let _guard = self.signal_guard.lock();
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        match self.downstream.get() {
            Some(downstream) => downstream.on_complete(),
            None => {
                *self.early_terminal.lock() = Some(Terminal::Complete);
                Ok(())
            }
        }
    }

    pub fn emit_error(&self, error: FlowError) {
        let _guard = self.signal_guard.lock();
        if self.terminated.swap(true, Ordering::AcqRel) {
            debug!(cause = %error, "error after terminal signal, dropping it");
            return;
        }

        match self.downstream.get() {
            Some(downstream) => downstream.on_error(error),
            None => *self.early_terminal.lock() = Some(Terminal::Error(error)),
        }
    }

    pub fn request_upstream(&self, n: u64) {
        let subscription = {
            let mut upstream = self.upstream.lock();
            match &mut *upstream {
                Upstream::Ready(subscription) => Arc::clone(subscription),
                Upstream::Waiting { demand, .. } => {
                    *demand = demand.saturating_add(n);
                    return;
                }
            }
        };
        subscription.request(n);
    }

    pub fn cancel_upstream(&self) {
        let subscription = {
            let mut upstream = self.upstream.lock();
            match &mut *upstream {
                Upstream::Ready(subscription) => Arc::clone(subscription),
                Upstream::Waiting { cancelled, .. } => {
                    *cancelled = true;
                    return;
                }
            }
        };
        subscription.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.get().is_some()
    }

    pub(crate) fn set_upstream(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError> {
        let pending = {
            let mut upstream = self.upstream.lock();
            match *upstream {
                Upstream::Ready(_) => None,
                Upstream::Waiting { demand, cancelled } => {
                    *upstream = Upstream::Ready(Arc::clone(&subscription));
                    Some((demand, cancelled))
                }
            }
        };

        let Some((demand, cancelled)) = pending else {
            warn!("second upstream subscription offered, cancelling it");
            subscription.cancel();
            return Err(FlowError::AlreadySubscribed);
        };

        if cancelled {
            subscription.cancel();
        } else if demand > 0 {
            subscription.request(demand);
        }
        Ok(())
    }

    pub(crate) fn attach_downstream(
        &self,
        subscriber: Arc<dyn Subscriber<T>>,
        subscription: Arc<dyn Subscription>,
    ) -> Result<(), FlowError> {
        let _guard = self.signal_guard.lock();
        if self.downstream.set(Arc::clone(&subscriber)).is_err() {
            return Err(FlowError::AlreadySubscribed);
        }

        if let Err(e) = subscriber.on_subscribe(subscription) {
            self.cancel_upstream();
            return Err(e);
        }

        let early_terminal = self.early_terminal.lock().take();
        match early_terminal {
            Some(Terminal::Complete) => subscriber.on_complete(),
            Some(Terminal::Error(error)) => {
                subscriber.on_error(error);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<T: Send + 'static> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("upstream_ready", &matches!(&*self.upstream.lock(), Upstream::Ready(_)))
            .field("has_downstream", &self.downstream.get().is_some())
            .field("terminated", &self.terminated.load(Ordering::Relaxed))
            .finish()
    }
}

/// A pipeline stage: one upstream subscription, one downstream subscriber, and an
/// [`Operator`] deciding what happens in between.
pub struct OperatorNode<T, O> {
    this: Weak<Self>,
    link: Arc<Link<T>>,
    operator: O,
}

impl<T, O> OperatorNode<T, O>
where
    T: Send + 'static,
    O: Operator<T>,
{
    /// Builds the node and subscribes it to `upstream` right away.
    ///
    /// # Errors
    ///
    /// Returns the upstream's error if it refuses the subscription.
    pub fn attach<P>(upstream: &P, operator: O) -> Result<Arc<Self>, FlowError>
    where
        P: Publisher<T> + ?Sized,
    {
        let node = Arc::new_cyclic(|this| Self { this: Weak::clone(this), link: Arc::new(Link::new()), operator });
        node.operator.on_attach(&node.link);
        upstream.subscribe(Arc::new(Inbound { node: Arc::clone(&node) }))?;
        Ok(node)
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn link(&self) -> &Arc<Link<T>> {
        &self.link
    }
}

impl<T, O> Publisher<T> for OperatorNode<T, O>
where
    T: Send + 'static,
    O: Operator<T>,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Result<(), FlowError> {
        let subscription = Arc::new(Outbound { node: Weak::clone(&self.this) });
        self.link.attach_downstream(subscriber, subscription)
    }
}

impl<T, O: fmt::Debug> fmt::Debug for OperatorNode<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorNode").field("link", &self.link).field("operator", &self.operator).finish()
    }
}

/// The node's subscriber on the upstream side.
struct Inbound<T, O> {
    node: Arc<OperatorNode<T, O>>,
}

impl<T, O> Subscriber<T> for Inbound<T, O>
where
    T: Send + 'static,
    O: Operator<T>,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError> {
        self.node.link.set_upstream(subscription)
    }

    fn on_next(&self, item: T) -> Result<(), FlowError> {
        self.node.operator.on_next(&self.node.link, item)
    }

    fn on_error(&self, error: FlowError) {
        self.node.operator.on_error(&self.node.link, error);
    }

    fn on_complete(&self) -> Result<(), FlowError> {
        self.node.operator.on_complete(&self.node.link)
    }
}

/// The subscription handed to the downstream.
struct Outbound<T, O> {
    node: Weak<OperatorNode<T, O>>,
}

impl<T, O> Subscription for Outbound<T, O>
where
    T: Send + 'static,
    O: Operator<T>,
{
    fn request(&self, n: u64) {
        match self.node.upgrade() {
            Some(node) => node.operator.request(&node.link, n),
            None => trace!(n, "request on a dropped operator node"),
        }
    }

    fn cancel(&self) {
        if let Some(node) = self.node.upgrade() {
            node.operator.cancel(&node.link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LeasedBuffer;
    use crate::testing::{Event, ManualPublisher, Recorder, TestSubscription, buffer, next};

    #[derive(Debug)]
    struct Passthrough;

    impl<T: Send + 'static> Operator<T> for Passthrough {}

    #[test]
    fn passes_every_signal_through() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let node = OperatorNode::attach(&publisher, Passthrough).unwrap();
        let recorder = Recorder::new(2);

        node.subscribe(Arc::clone(&recorder) as _).unwrap();
        assert_eq!(publisher.subscription().requests(), vec![2]);

        publisher.next(buffer(b"ab")).unwrap();
        publisher.next(buffer(b"cd")).unwrap();
        publisher.complete().unwrap();

        assert_eq!(recorder.events(), vec![next(b"ab"), next(b"cd"), Event::Complete]);
    }

    #[test]
    fn cancel_propagates_upstream() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let node = OperatorNode::attach(&publisher, Passthrough).unwrap();
        let recorder = Recorder::new(1);
        node.subscribe(Arc::clone(&recorder) as _).unwrap();

        recorder.cancel();

        assert!(publisher.subscription().is_cancelled());
    }

    #[test]
    fn second_downstream_is_rejected() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let node = OperatorNode::attach(&publisher, Passthrough).unwrap();

        node.subscribe(Recorder::new(1)).unwrap();
        let second = Recorder::new(1);

        assert!(matches!(node.subscribe(Arc::clone(&second) as _), Err(FlowError::AlreadySubscribed)));
        assert!(second.events().is_empty());
    }

    #[test]
    fn second_upstream_subscription_is_cancelled() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let _node = OperatorNode::attach(&publisher, Passthrough).unwrap();

        let intruder = TestSubscription::new();
        let result = publisher.subscriber().on_subscribe(Arc::clone(&intruder) as _);

        assert!(matches!(result, Err(FlowError::AlreadySubscribed)));
        assert!(intruder.is_cancelled());
        assert!(!publisher.subscription().is_cancelled());
    }

    #[test]
    fn demand_before_upstream_is_replayed() {
        let link = Link::<LeasedBuffer>::new();
        link.request_upstream(3);
        link.request_upstream(4);

        let subscription = TestSubscription::new();
        link.set_upstream(Arc::clone(&subscription) as _).unwrap();

        assert_eq!(subscription.requests(), vec![7]);
        assert!(!subscription.is_cancelled());
    }

    #[test]
    fn cancel_before_upstream_is_replayed() {
        let link = Link::<LeasedBuffer>::new();
        link.request_upstream(3);
        link.cancel_upstream();

        let subscription = TestSubscription::new();
        link.set_upstream(Arc::clone(&subscription) as _).unwrap();

        assert!(subscription.requests().is_empty());
        assert!(subscription.is_cancelled());
    }

    #[test]
    fn terminal_before_downstream_is_replayed() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let node = OperatorNode::attach(&publisher, Passthrough).unwrap();
        publisher.error(FlowError::delivery("early"));

        let recorder = Recorder::new(1);
        node.subscribe(Arc::clone(&recorder) as _).unwrap();

        assert_eq!(recorder.events(), vec![Event::Error("delivery failed: early".to_string())]);
    }

    #[test]
    fn nothing_flows_after_terminal_signal() {
        let publisher = ManualPublisher::<LeasedBuffer>::new();
        let node = OperatorNode::attach(&publisher, Passthrough).unwrap();
        let recorder = Recorder::new(4);
        node.subscribe(Arc::clone(&recorder) as _).unwrap();

        publisher.complete().unwrap();
        publisher.next(buffer(b"late")).unwrap();
        publisher.error(FlowError::delivery("late"));
        publisher.complete().unwrap();

        assert_eq!(recorder.events(), vec![Event::Complete]);
        assert!(node.link().is_terminated());
    }
}
