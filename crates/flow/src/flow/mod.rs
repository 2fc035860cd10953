//! The publish/subscribe contract the pipeline is built on.
//!
//! This is a restricted reactive-streams variant:
//!
//! - a [`Publisher`] grants at most one active [`Subscriber`] at a time
//! - the subscriber receives a [`Subscription`] in `on_subscribe`, and nothing is
//!   delivered to it beyond what it requested through [`Subscription::request`]
//! - signals to one subscriber never overlap in time and arrive in the order they were
//!   produced
//! - `on_complete` and `on_error` are terminal, as is [`Subscription::cancel`]
//!
//! Unlike reactive streams, `on_subscribe`, `on_next` and `on_complete` return a
//! `Result`. A subscriber that fails to handle a signal says so to its caller, which is
//! how [`crate::operator::CloseOnError`] learns that the connection must be torn down.
//!
//! # Components
//!
//! - [`Demand`]: saturating outstanding-demand counter
//! - [`SerialExecutor`]: FIFO, mutually exclusive execution over many threads
//! - [`Operator`], [`OperatorNode`], [`Link`]: the decorator base every stream
//!   transform is built from

use std::sync::Arc;

use crate::protocol::FlowError;

mod demand;
mod operator;
mod serial;

pub use demand::Demand;
pub use operator::Link;
pub use operator::Operator;
pub use operator::OperatorNode;
pub use serial::SerialExecutor;

/// The link between one publisher and its one subscriber.
pub trait Subscription: Send + Sync {
    /// Asks for `n` more items. Use [`Demand::UNBOUNDED`] to receive everything.
    fn request(&self, n: u64);

    /// Stops the flow. Items already handed out stay with their holder.
    fn cancel(&self);
}

pub trait Subscriber<T>: Send + Sync {
    /// Receives the subscription. A subscriber accepts exactly one; a second one must
    /// be cancelled and rejected with [`FlowError::AlreadySubscribed`].
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) -> Result<(), FlowError>;

    fn on_next(&self, item: T) -> Result<(), FlowError>;

    fn on_error(&self, error: FlowError);

    fn on_complete(&self) -> Result<(), FlowError>;
}

pub trait Publisher<T> {
    /// Attaches `subscriber`, failing when this publisher cannot take another one.
    ///
    /// Publishers that settle subscriptions asynchronously may instead signal the
    /// rejection through [`Subscriber::on_error`].
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Result<(), FlowError>;
}

impl<T, P> Publisher<T> for Arc<P>
where
    P: Publisher<T> + ?Sized,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Result<(), FlowError> {
        (**self).subscribe(subscriber)
    }
}
