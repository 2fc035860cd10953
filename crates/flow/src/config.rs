//! Limits and timeouts consumed by the pipeline.
//!
//! The pipeline never owns configuration, it reads a [`StreamConfig`] when a
//! connection is set up. Defaults follow the limits documented at the crate root.

use std::time::Duration;

use crate::buffer::BufferPool;

/// Default maximum size of a request head in bytes.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 8 * 1024;

/// Default maximum number of header lines in a request head.
pub const DEFAULT_MAX_HEADERS: usize = 64;

/// Default capacity of a pooled read buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

pub const DEFAULT_MAX_IDLE_BUFFERS: usize = 256;

/// Default time a connection may stay silent before its request head is complete.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a requested body chunk may take to arrive.
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    max_head_size: usize,
    max_headers: usize,
    buffer_size: usize,
    max_idle_buffers: usize,
    idle_timeout: Duration,
    body_timeout: Duration,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self {
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            max_headers: DEFAULT_MAX_HEADERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE_BUFFERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            body_timeout: DEFAULT_BODY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_max_head_size(mut self, max_head_size: usize) -> Self {
        self.max_head_size = max_head_size;
        self
    }

    #[must_use]
    pub fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers;
        self
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_max_idle_buffers(mut self, max_idle_buffers: usize) -> Self {
        self.max_idle_buffers = max_idle_buffers;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn with_body_timeout(mut self, body_timeout: Duration) -> Self {
        self.body_timeout = body_timeout;
        self
    }

    pub fn max_head_size(&self) -> usize {
        self.max_head_size
    }

    pub fn max_headers(&self) -> usize {
        self.max_headers
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn max_idle_buffers(&self) -> usize {
        self.max_idle_buffers
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn body_timeout(&self) -> Duration {
        self.body_timeout
    }

    /// Creates a buffer pool sized by this configuration, meant to be shared by every
    /// connection.
    pub fn buffer_pool(&self) -> BufferPool {
        BufferPool::new(self.buffer_size, self.max_idle_buffers)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}
