//! The byte-level streaming core of the micro http server
//!
//! This crate turns the raw byte stream of an inbound connection into parsed protocol
//! structures under backpressure. It is built around a small publish/subscribe
//! contract (a restricted reactive-streams variant) where every signal a subscriber
//! sees is serialized, every pooled buffer is lent to exactly one consumer at a time,
//! and every failure path ends with a closed connection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use micro_flow::channel::TokioChannel;
//! use micro_flow::config::StreamConfig;
//! use micro_flow::connection::HttpStream;
//! use micro_flow::flow::Publisher;
//! use micro_flow::operator::TokioScheduler;
//! use micro_flow::sink::WriteSubscriber;
//! use tokio::io::AsyncWriteExt;
//! use tokio::runtime::Handle;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), micro_flow::protocol::HttpError> {
//!     let (mut client, server) = tokio::io::duplex(1024);
//!     client.write_all(b"PUT /notes HTTP/1.1\r\nHost: localhost\r\n\r\nsome text").await.expect("duplex accepts writes");
//!     drop(client);
//!
//!     let config = StreamConfig::default();
//!     let stream = HttpStream::new(TokioChannel::new(server), config.buffer_pool(), Arc::new(TokioScheduler::current()), config);
//!
//!     let head = stream.read_head()?.await?;
//!     assert_eq!(head.target(), "/notes");
//!
//!     let (sink, written) = WriteSubscriber::spawn(tokio::io::sink(), &Handle::current());
//!     stream.body()?.subscribe(sink)?;
//!     assert_eq!(written.await?, 9);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`flow`]: the publish/subscribe contract, the [`flow::SerialExecutor`], the demand
//!   counter and the operator base every stream transform is built from
//! - [`buffer`]: the buffer pool, leased buffers and the channel publisher that reads
//!   into them
//! - [`channel`]: the completion-based byte channel abstraction and its tokio adapter
//! - [`operator`]: timeout, cancellation-drain and error-closing operators
//! - [`codec`]: the byte-at-a-time subscriber adapter and the request head parser
//! - [`sink`]: the write subscriber persisting a buffer stream
//! - [`connection`]: per-connection assembly of the pipeline
//! - [`protocol`]: parsed head, deferred results and error types
//! - [`config`]: the limits and timeouts consumed by the pipeline
//!
//! # Threading
//!
//! No component owns a thread. Work runs on whichever thread delivers an I/O completion,
//! a timer expiry or an application call, and is serialized per stream through the
//! [`flow::SerialExecutor`].
//!
//! # Limitations
//!
//! - Only the request head is tokenized, body framing belongs to higher layers
//! - No TLS support (use a reverse proxy for HTTPS)
//! - Default maximum head size: 8KB
//! - Default maximum number of headers: 64

pub mod buffer;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod flow;
pub mod operator;
pub mod protocol;
pub mod sink;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
pub(crate) mod testing;
