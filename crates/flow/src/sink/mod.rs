//! Consumers that persist a buffer stream.

mod write_subscriber;

pub use write_subscriber::WriteSubscriber;
