use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;
use tracing::trace;

/// A point-in-time view of a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers handed out and not yet recycled.
    pub leased: usize,
    /// Buffers parked for reuse.
    pub idle: usize,
    /// Buffers allocated over the pool's lifetime.
    pub allocated: usize,
}

/// Shared storage for fixed-capacity read buffers.
///
/// Cloning is cheap and every clone draws from the same idle list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    buffer_size: usize,
    idle: Option<ArrayQueue<BytesMut>>,
    leased: AtomicUsize,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool of `buffer_size` byte buffers that keeps at most `max_idle` of
    /// them around between uses.
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        let idle = (max_idle > 0).then(|| ArrayQueue::new(max_idle));
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                idle,
                leased: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    /// Hands out an empty buffer with at least `buffer_size` bytes of capacity.
    pub fn acquire(&self) -> BytesMut {
        self.inner.leased.fetch_add(1, Ordering::Relaxed);

        if let Some(buffer) = self.inner.idle.as_ref().and_then(ArrayQueue::pop) {
            return buffer;
        }

        self.inner.allocated.fetch_add(1, Ordering::Relaxed);
        trace!(size = self.inner.buffer_size, "allocating read buffer");
        BytesMut::with_capacity(self.inner.buffer_size)
    }

    /// Takes back a buffer handed out by [`acquire`](Self::acquire).
    ///
    /// Buffers beyond the idle limit, or that lost capacity, are freed.
    pub fn recycle(&self, mut buffer: BytesMut) {
        self.inner.leased.fetch_sub(1, Ordering::Relaxed);

        buffer.clear();
        if buffer.capacity() < self.inner.buffer_size {
            return;
        }
        if let Some(idle) = &self.inner.idle {
            let _ = idle.push(buffer);
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            leased: self.inner.leased.load(Ordering::Relaxed),
            idle: self.inner.idle.as_ref().map_or(0, ArrayQueue::len),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool").field("buffer_size", &self.inner.buffer_size).field("stats", &self.stats()).finish()
    }
}
