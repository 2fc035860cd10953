//! Deadline scheduling for the timeout operator.
//!
//! A [`TimerSlot`] holds at most one live deadline. Every arming draws a fresh
//! generation token and the expiry callback carries the token it was armed with, so
//! an expiry racing a rearm, a disarm or a close loses the compare-and-swap and does
//! nothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// A scheduled callback that can be called off.
pub trait ScheduledTask: Send + Sync {
    /// Prevents the callback from running if it has not started yet.
    fn cancel(&self);
}

/// Runs callbacks after a delay.
///
/// `task` must not run before `schedule` returns.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn ScheduledTask>;
}

/// Schedules callbacks as sleeping tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) -> Box<dyn ScheduledTask> {
        let join_handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(join_handle.abort_handle())
    }
}

impl ScheduledTask for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

const IDLE: u64 = 0;
const FIRED: u64 = u64::MAX;
const CLOSED: u64 = u64::MAX - 1;

/// One replaceable deadline.
pub(crate) struct TimerSlot {
    token: AtomicU64,
    slot: Mutex<Slot>,
}

struct Slot {
    next_token: u64,
    task: Option<Box<dyn ScheduledTask>>,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        Self { token: AtomicU64::new(IDLE), slot: Mutex::new(Slot { next_token: IDLE + 1, task: None }) }
    }

    /// Replaces the current deadline with a new one built by `schedule`, which receives
    /// the token its expiry must present to [`try_fire`](Self::try_fire).
    ///
    /// Returns `false` without scheduling anything once the slot fired or closed, or
    /// when `only_if_armed` is set and no deadline is live.
    pub(crate) fn arm<F>(&self, only_if_armed: bool, schedule: F) -> bool
    where
        F: FnOnce(u64) -> Box<dyn ScheduledTask>,
    {
        let mut slot = self.slot.lock();
        let current = self.token.load(Ordering::Acquire);
        if current == FIRED || current == CLOSED || (only_if_armed && current == IDLE) {
            return false;
        }

        let token = slot.next_token;
        slot.next_token += 1;
        if self.token.compare_exchange(current, token, Ordering::AcqRel, Ordering::Acquire).is_err() {
            // fired in between
            return false;
        }

        if let Some(previous) = slot.task.replace(schedule(token)) {
            previous.cancel();
        }
        true
    }

    /// Claims the expiry for `token`. Only the live token wins, and only once.
    pub(crate) fn try_fire(&self, token: u64) -> bool {
        self.token.compare_exchange(token, FIRED, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Cancels the live deadline for good.
    pub(crate) fn close(&self) {
        self.settle(CLOSED);
    }

    pub(crate) fn is_armed(&self) -> bool {
        !matches!(self.token.load(Ordering::Acquire), IDLE | FIRED | CLOSED)
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.token.load(Ordering::Acquire) == FIRED
    }

    /// Cancels the live deadline if `idle` still holds once the slot is locked, the slot
    /// can be armed again afterwards. Arming
    /// takes the same lock, so a deadline armed concurrently by a caller that changed
    /// the condition is never cancelled here.
    pub(crate) fn disarm_if<F>(&self, idle: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut slot = self.slot.lock();
        if !idle() {
            return false;
        }
        self.settle_locked(&mut slot, IDLE);
        true
    }

    fn settle(&self, state: u64) {
        let mut slot = self.slot.lock();
        self.settle_locked(&mut slot, state);
    }

    fn settle_locked(&self, slot: &mut Slot, state: u64) {
        let updated = self.token.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
            FIRED | CLOSED => None,
            _ => Some(state),
        });

        if updated.is_ok()
            && let Some(task) = slot.task.take()
        {
            task.cancel();
        }
    }
}

impl fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.token.load(Ordering::Relaxed) {
            IDLE => "idle",
            FIRED => "fired",
            CLOSED => "closed",
            _ => "armed",
        };
        f.debug_struct("TimerSlot").field("state", &state).finish()
    }
}
