//! Serial execution without a dedicated thread.
//!
//! A [`SerialExecutor`] gives its embedder single-threaded-equivalent execution over
//! any number of calling threads. Whoever submits while nobody is draining becomes the
//! drainer and runs queued actions until the queue is empty; everyone else just
//! enqueues. Actions therefore run one at a time, in submission order, and an action
//! sees every effect of the actions before it.
//!
//! Submitting from inside an action never recurses: the nested action is appended to
//! the tail and run by the same drainer after the current action returns. This is what
//! keeps a release-triggers-read-triggers-delivery chain from growing the stack.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

type Action = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialExecutor {
    queue: SegQueue<Action>,
    // number of submitted actions not yet run, non-zero while someone drains
    wip: AtomicUsize,
}

impl SerialExecutor {
    pub fn new() -> Self {
        Self { queue: SegQueue::new(), wip: AtomicUsize::new(0) }
    }

    /// Runs `action` now if no drain is in progress, otherwise queues it for the
    /// active drainer.
    ///
    /// An action that panics leaves the executor permanently draining, so actions
    /// must not panic.
    pub fn submit<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(action));
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        let mut missed = 1;
        loop {
            for _ in 0..missed {
                if let Some(action) = self.queue.pop() {
                    action();
                }
            }

            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    /// Returns `true` while a thread is draining the queue.
    pub fn is_draining(&self) -> bool {
        self.wip.load(Ordering::Acquire) != 0
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor").field("pending", &self.wip.load(Ordering::Relaxed)).finish()
    }
}
