//! Decoding of the inbound byte stream.
//!
//! - [`ByteSubscriber`] adapts any [`ByteParser`] to a stream of leased buffers
//! - [`HeadParser`] and [`HeadTokenizer`] reduce the bytes to a request head
//! - [`read_head`] wires a head parser to a publisher in one call

mod byte_subscriber;
mod head;

pub use byte_subscriber::ByteParser;
pub use byte_subscriber::ByteSubscriber;
pub use head::HeadParser;
pub use head::HeadTokenizer;
pub use head::read_head;
