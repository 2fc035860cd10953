//! Request head parsing.
//!
//! [`HeadTokenizer`] recognizes the RFC 9112 request head grammar one byte at a time:
//!
//! ```text
//! request-head = *( CRLF ) request-line *( header-line ) CRLF
//! request-line = method SP request-target SP HTTP-version CRLF
//! header-line  = field-name ":" OWS field-value OWS CRLF
//! ```
//!
//! A bare LF is accepted wherever CRLF is expected, a CR followed by anything else is
//! rejected. Obsolete line folding is rejected as well.
//!
//! [`HeadParser`] wraps the tokenizer with the head size limit and plugs it into a
//! [`ByteSubscriber`](crate::codec::ByteSubscriber).

use std::mem;

use bytes::Bytes;
use http::{Method, Version};
use tracing::trace;

use crate::buffer::LeasedBuffer;
use crate::codec::{ByteParser, ByteSubscriber};
use crate::config::{DEFAULT_MAX_HEADERS, StreamConfig};
use crate::ensure;
use crate::flow::Publisher;
use crate::protocol::{DeferredResult, FlowError, HeaderField, ParseError, RequestHead};

const MAX_VERSION_LEN: usize = b"HTTP/1.1".len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Start,
    StartLineEnd,
    Method,
    Target,
    Version,
    RequestLineEnd,
    HeaderStart,
    HeaderName,
    HeaderValueStart,
    HeaderValue,
    HeaderLineEnd,
    HeadEnd,
}

/// Recognizes a request head byte by byte. Resets itself after every complete head.
#[derive(Debug)]
pub struct HeadTokenizer {
    phase: Phase,
    max_headers: usize,
    method: Vec<u8>,
    target: Vec<u8>,
    version: Vec<u8>,
    name: Vec<u8>,
    value: Vec<u8>,
    headers: Vec<HeaderField>,
}

#[inline]
fn is_tchar(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

#[inline]
fn is_visible(byte: u8) -> bool {
    (0x21..=0x7e).contains(&byte)
}

#[inline]
fn is_whitespace(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

#[inline]
fn is_value_byte(byte: u8) -> bool {
    is_visible(byte) || is_whitespace(byte) || byte >= 0x80
}

impl HeadTokenizer {
    pub fn new(max_headers: usize) -> Self {
        Self {
            phase: Phase::Start,
            max_headers,
            method: Vec::new(),
            target: Vec::new(),
            version: Vec::with_capacity(MAX_VERSION_LEN),
            name: Vec::new(),
            value: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Feeds one byte, returning the head once its terminating empty line is complete.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` naming the first element that breaks the grammar.
    pub fn push(&mut self, byte: u8) -> Result<Option<RequestHead>, ParseError> {
        match self.phase {
            Phase::Start => match byte {
                b'\r' => self.phase = Phase::StartLineEnd,
                b'\n' => {}
                _ => {
                    ensure!(is_tchar(byte), ParseError::InvalidMethod);
                    self.method.push(byte);
                    self.phase = Phase::Method;
                }
            },

            Phase::StartLineEnd => {
                ensure!(byte == b'\n', ParseError::InvalidLineEnding);
                self.phase = Phase::Start;
            }

            Phase::Method => match byte {
                b' ' => self.phase = Phase::Target,
                _ => {
                    ensure!(is_tchar(byte), ParseError::InvalidMethod);
                    self.method.push(byte);
                }
            },

            Phase::Target => match byte {
                b' ' => {
                    ensure!(!self.target.is_empty(), ParseError::InvalidTarget);
                    self.phase = Phase::Version;
                }
                _ => {
                    ensure!(is_visible(byte), ParseError::InvalidTarget);
                    self.target.push(byte);
                }
            },

            Phase::Version => match byte {
                b'\r' => {
                    self.check_version()?;
                    self.phase = Phase::RequestLineEnd;
                }
                b'\n' => {
                    self.check_version()?;
                    self.phase = Phase::HeaderStart;
                }
                _ => {
                    self.version.push(byte);
                    ensure!(self.version.len() <= MAX_VERSION_LEN, ParseError::invalid_version(&self.version));
                }
            },

            Phase::RequestLineEnd => {
                ensure!(byte == b'\n', ParseError::InvalidLineEnding);
                self.phase = Phase::HeaderStart;
            }

            Phase::HeaderStart => match byte {
                b'\r' => self.phase = Phase::HeadEnd,
                b'\n' => return self.finish_head().map(Some),
                b' ' | b'\t' => return Err(ParseError::invalid_header("obsolete line folding is not supported")),
                _ => {
                    ensure!(is_tchar(byte), ParseError::invalid_header("invalid header name"));
                    ensure!(self.headers.len() < self.max_headers, ParseError::too_many_headers(self.max_headers));
                    self.name.push(byte);
                    self.phase = Phase::HeaderName;
                }
            },

            Phase::HeaderName => match byte {
                b':' => self.phase = Phase::HeaderValueStart,
                b' ' | b'\t' => return Err(ParseError::invalid_header("whitespace between header name and colon")),
                _ => {
                    ensure!(is_tchar(byte), ParseError::invalid_header("invalid header name"));
                    self.name.push(byte);
                }
            },

            Phase::HeaderValueStart => match byte {
                b' ' | b'\t' => {}
                b'\r' => self.phase = Phase::HeaderLineEnd,
                b'\n' => {
                    self.finish_header();
                    self.phase = Phase::HeaderStart;
                }
                _ => {
                    ensure!(is_value_byte(byte), ParseError::invalid_header("invalid header value"));
                    self.value.push(byte);
                    self.phase = Phase::HeaderValue;
                }
            },

            Phase::HeaderValue => match byte {
                b'\r' => self.phase = Phase::HeaderLineEnd,
                b'\n' => {
                    self.finish_header();
                    self.phase = Phase::HeaderStart;
                }
                _ => {
                    ensure!(is_value_byte(byte), ParseError::invalid_header("invalid header value"));
                    self.value.push(byte);
                }
            },

            Phase::HeaderLineEnd => {
                ensure!(byte == b'\n', ParseError::InvalidLineEnding);
                self.finish_header();
                self.phase = Phase::HeaderStart;
            }

            Phase::HeadEnd => {
                ensure!(byte == b'\n', ParseError::InvalidLineEnding);
                return self.finish_head().map(Some);
            }
        }

        Ok(None)
    }

    /// Drops any partially recognized head.
    pub fn reset(&mut self) {
        self.phase = Phase::Start;
        self.method.clear();
        self.target.clear();
        self.version.clear();
        self.name.clear();
        self.value.clear();
        self.headers.clear();
    }

    fn check_version(&self) -> Result<(), ParseError> {
        match self.version.as_slice() {
            b"HTTP/1.1" | b"HTTP/1.0" => Ok(()),
            other => Err(ParseError::invalid_version(other)),
        }
    }

    fn finish_header(&mut self) {
        while self.value.last().copied().is_some_and(is_whitespace) {
            self.value.pop();
        }

        let name = String::from_utf8_lossy(&self.name).into_owned();
        let value = Bytes::copy_from_slice(&self.value);
        self.name.clear();
        self.value.clear();
        self.headers.push(HeaderField::new(name, value));
    }

    fn finish_head(&mut self) -> Result<RequestHead, ParseError> {
        let method = Method::from_bytes(&self.method).map_err(|_e| ParseError::InvalidMethod)?;
        let target = String::from_utf8(mem::take(&mut self.target)).map_err(|_e| ParseError::InvalidTarget)?;
        let version = if self.version.as_slice() == b"HTTP/1.0" { Version::HTTP_10 } else { Version::HTTP_11 };
        let headers = mem::take(&mut self.headers);

        self.reset();
        trace!(method = %method, target, headers = headers.len(), "request head complete");
        Ok(RequestHead::new(method, target, version, headers))
    }
}

impl Default for HeadTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADERS)
    }
}

/// Parses a request head under a size limit.
///
/// Every byte counts against `max_head_size`, including leading empty lines, and the
/// byte that pushes the count past the limit fails the parse with
/// [`ParseError::TooLargeHead`].
#[derive(Debug)]
pub struct HeadParser {
    max_head_size: usize,
    consumed: usize,
    tokenizer: HeadTokenizer,
}

impl HeadParser {
    pub fn new(max_head_size: usize) -> Self {
        Self { max_head_size, consumed: 0, tokenizer: HeadTokenizer::default() }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.max_head_size()).with_max_headers(config.max_headers())
    }

    #[must_use]
    pub fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.tokenizer.max_headers = max_headers;
        self
    }

    /// Bytes consumed by the head in progress.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl ByteParser for HeadParser {
    type Output = RequestHead;

    fn parse(&mut self, byte: u8) -> Result<Option<RequestHead>, ParseError> {
        self.consumed += 1;
        ensure!(self.consumed <= self.max_head_size, ParseError::too_large_head(self.max_head_size));

        let head = self.tokenizer.push(byte)?;
        if head.is_some() {
            self.consumed = 0;
        }
        Ok(head)
    }
}

/// Subscribes a head parser to `upstream` and returns the head it will produce.
///
/// The parser cancels its subscription right after the head, leaving the bytes that
/// follow it with the publisher for the body.
///
/// # Errors
///
/// Returns the upstream's error if it refuses the subscription.
pub fn read_head<P>(upstream: &P, config: &StreamConfig) -> Result<DeferredResult<RequestHead, ParseError>, FlowError>
where
    P: Publisher<LeasedBuffer> + ?Sized,
{
    let (subscriber, head) = ByteSubscriber::new(HeadParser::from_config(config));
    upstream.subscribe(subscriber)?;
    Ok(head)
}
