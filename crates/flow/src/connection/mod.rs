//! Per-connection assembly of the inbound pipeline.
//!
//! ```text
//! ChannelPublisher ─▶ Timeout(subscription) ─▶ CloseOnError ─▶ ByteSubscriber<HeadParser>
//!                  └▶ Timeout(publication)  ─▶ CloseOnError ─▶ DrainOnCancel ─▶ body subscriber
//! ```
//!
//! The head pipeline and the body pipeline take turns on the same publisher: the head
//! parser cancels as soon as the head is complete and the body picks up the bytes that
//! follow it.

mod http_stream;

pub use http_stream::Body;
pub use http_stream::HttpStream;
