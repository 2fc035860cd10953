use std::sync::atomic::{AtomicU64, Ordering};

/// A saturating counter of items a subscriber is ready to receive.
///
/// Adding never overflows: a sum past `u64::MAX` clamps to [`Demand::UNBOUNDED`], and
/// once unbounded the counter is never decremented again. Taking never goes below
/// zero.
#[derive(Debug, Default)]
pub struct Demand {
    outstanding: AtomicU64,
}

impl Demand {
    /// Sentinel for "send everything".
    pub const UNBOUNDED: u64 = u64::MAX;

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` and returns the value before the addition.
    pub fn add(&self, n: u64) -> u64 {
        let (Ok(previous) | Err(previous)) = self.outstanding.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if current == Self::UNBOUNDED { None } else { Some(current.saturating_add(n)) }
        });
        previous
    }

    /// Consumes one unit of demand, returns `false` if there was none.
    pub fn take_one(&self) -> bool {
        match self.outstanding.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
            0 | Self::UNBOUNDED => None,
            n => Some(n - 1),
        }) {
            Ok(_) => true,
            Err(previous) => previous == Self::UNBOUNDED,
        }
    }

    pub fn get(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn has_demand(&self) -> bool {
        self.get() > 0
    }

    pub fn is_unbounded(&self) -> bool {
        self.get() == Self::UNBOUNDED
    }
}
