//! Protocol level values produced by the pipeline.
//!
//! - **Head** ([`head`]): the parsed request line and raw header tokens
//!   - [`RequestHead`]: method, target, version and header lines
//!   - [`HeaderField`]: one raw `name: value` pair
//!
//! - **Deferred results** ([`deferred`]): one-shot containers resolved exactly once
//!   - [`Deferred`]: the write side, first writer wins
//!   - [`DeferredResult`]: the read side, a `Future`
//!
//! - **Error Handling** ([`error`]):
//!   - [`HttpError`]: Top-level error type
//!   - [`ParseError`]: Request head parsing errors
//!   - [`FlowError`]: Stream and signal delivery errors

mod head;
pub use head::HeaderField;
pub use head::RequestHead;

mod deferred;
pub use deferred::Deferred;
pub use deferred::DeferredResult;
pub use deferred::deferred;

mod error;
pub use error::FlowError;
pub use error::HttpError;
pub use error::ParseError;
