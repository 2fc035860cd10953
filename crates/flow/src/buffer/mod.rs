//! Pooled read buffers and the publisher that lends them out.
//!
//! - [`BufferPool`]: fixed-capacity `BytesMut` storage shared by every connection
//! - [`LeasedBuffer`]: a buffer lent to one consumer, returned on release or drop
//! - [`ChannelPublisher`]: reads from a [`crate::channel::ByteChannel`] into pooled
//!   buffers and publishes them one lease at a time

mod leased;
mod pool;
mod publisher;

pub(crate) use leased::Reclaim;
pub use leased::LeasedBuffer;
pub use pool::BufferPool;
pub use pool::PoolStats;
pub use publisher::ChannelPublisher;
