use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request head error: {source}")]
    HeadError {
        #[from]
        source: ParseError,
    },

    #[error("stream error: {source}")]
    StreamError {
        #[from]
        source: FlowError,
    },
}

/// Failures of the publish/subscribe pipeline itself.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("a subscription is already established, each stage accepts exactly one subscriber")]
    AlreadySubscribed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("publisher closed: {source}")]
    PublisherClosed { source: Box<FlowError> },

    #[error("delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("deferred result was dropped before it completed")]
    Abandoned,
}

impl FlowError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Wraps a downstream failure, leaving an already wrapped one untouched.
    pub fn publisher_closed(cause: FlowError) -> Self {
        match cause {
            closed @ Self::PublisherClosed { .. } => closed,
            cause => Self::PublisherClosed { source: Box::new(cause) },
        }
    }

    pub fn delivery<S: ToString>(str: S) -> Self {
        Self::Delivery { reason: str.to_string() }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failures while reducing a byte stream to a request head.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("head size exceed the limit {max_size}")]
    TooLargeHead { max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid request target")]
    InvalidTarget,

    #[error("invalid http version: {0}")]
    InvalidVersion(String),

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("carriage return not followed by line feed")]
    InvalidLineEnding,

    #[error("stream ended after {consumed} bytes without a complete head")]
    UnexpectedEnd { consumed: u64 },

    #[error("flow error: {source}")]
    Flow {
        #[from]
        source: FlowError,
    },
}

impl ParseError {
    pub fn too_large_head(max_size: usize) -> Self {
        Self::TooLargeHead { max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_version(version: &[u8]) -> Self {
        Self::InvalidVersion(String::from_utf8_lossy(version).into_owned())
    }

    pub fn unexpected_end(consumed: u64) -> Self {
        Self::UnexpectedEnd { consumed }
    }

    pub fn is_too_large(&self) -> bool {
        matches!(self, Self::TooLargeHead { .. })
    }
}
