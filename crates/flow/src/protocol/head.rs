//! The parsed request head.
//!
//! Fields are kept as raw tokens: the method and version are validated into their
//! `http` crate types, but header names and values are not interpreted. Modeling
//! them further is left to the layer that consumes the head.

use bytes::Bytes;
use http::{Method, Request, Version};

use crate::protocol::ParseError;

/// One `name: value` line of the head, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value bytes with surrounding whitespace removed.
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Returns the value as text when it only holds UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// A request line plus its header lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    target: String,
    version: Version,
    headers: Vec<HeaderField>,
}

impl RequestHead {
    pub fn new(method: Method, target: String, version: Version, headers: Vec<HeaderField>) -> Self {
        Self { method, target, version, headers }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Returns the first header whose name matches ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&HeaderField> {
        self.headers.iter().find(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// Converts the raw tokens into an `http::Request` without a body.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the target is not a valid URI or a header does not
    /// form a valid `http` header name or value.
    pub fn into_request(self) -> Result<Request<()>, ParseError> {
        let mut builder = Request::builder().method(self.method).uri(self.target).version(self.version);
        for field in self.headers {
            builder = builder.header(field.name, field.value.as_ref());
        }
        builder.body(()).map_err(ParseError::invalid_header)
    }
}
