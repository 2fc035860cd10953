//! Stream transforms built on [`crate::flow::Operator`].
//!
//! - [`Timeout`]: fails a stream that stays silent for too long
//! - [`DrainOnCancel`]: reads and discards the rest of the input once nobody wants it
//! - [`CloseOnError`]: closes the connection when the stream below it fails
//!
//! Deadlines are scheduled through the [`Scheduler`] trait, [`TokioScheduler`]
//! being the provided implementation.

mod close_on_error;
mod drain;
mod timeout;
pub mod timer;

pub use close_on_error::CloseOnError;
pub use drain::DrainOnCancel;
pub use timeout::Timeout;
pub use timeout::TimeoutMode;
pub use timer::ScheduledTask;
pub use timer::Scheduler;
pub use timer::TokioScheduler;
