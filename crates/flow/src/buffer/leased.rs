use std::fmt;
use std::mem;
use std::sync::Arc;

use bytes::{Buf, BytesMut};

/// Receives the storage of a released lease.
pub(crate) trait Reclaim: Send + Sync {
    /// Takes back `storage`, of which everything before `position` has been consumed.
    fn reclaim(self: Arc<Self>, storage: BytesMut, position: usize);
}

type ReleaseHook = Box<dyn FnOnce(&mut LeasedBuffer) + Send>;

/// A pooled buffer lent to exactly one consumer.
///
/// The readable window runs from [`position`](Self::position) to
/// [`limit`](Self::limit) and is consumed through [`Buf`]. The holder gives the buffer
/// back with [`release`](Self::release); dropping it has the same effect. If unread
/// bytes remain at that point, the owner delivers the same buffer again as its next
/// item, so a consumer that only takes part of a buffer never loses the rest.
pub struct LeasedBuffer {
    storage: BytesMut,
    position: usize,
    hooks: Vec<ReleaseHook>,
    owner: Option<Arc<dyn Reclaim>>,
}

impl LeasedBuffer {
    pub(crate) fn leased(storage: BytesMut, position: usize, owner: Arc<dyn Reclaim>) -> Self {
        Self { storage, position, hooks: Vec::new(), owner: Some(owner) }
    }

    /// A buffer with no owner, releasing it only drops the bytes.
    pub fn unpooled(data: impl AsRef<[u8]>) -> Self {
        Self { storage: BytesMut::from(data.as_ref()), position: 0, hooks: Vec::new(), owner: None }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// End of the filled region.
    pub fn limit(&self) -> usize {
        self.storage.len()
    }

    /// Marks every remaining byte as consumed.
    pub fn discard_remaining(&mut self) {
        self.position = self.storage.len();
    }

    pub fn is_pooled(&self) -> bool {
        self.owner.is_some()
    }

    /// Registers `hook` to run when the buffer is released, before its storage goes
    /// back to the owner. Hooks run in registration order and may still consume or
    /// discard bytes.
    pub fn on_release<F>(&mut self, hook: F)
    where
        F: FnOnce(&mut LeasedBuffer) + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Gives the buffer back to its owner.
    pub fn release(self) {
        drop(self);
    }
}

impl Buf for LeasedBuffer {
    fn remaining(&self) -> usize {
        self.storage.len() - self.position
    }

    fn chunk(&self) -> &[u8] {
        &self.storage[self.position..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past the limit: {} > {}",
            cnt,
            self.remaining()
        );
        self.position += cnt;
    }
}

impl Drop for LeasedBuffer {
    fn drop(&mut self) {
        while !self.hooks.is_empty() {
            for hook in mem::take(&mut self.hooks) {
                hook(self);
            }
        }

        if let Some(owner) = self.owner.take() {
            owner.reclaim(mem::take(&mut self.storage), self.position);
        }
    }
}

impl fmt::Debug for LeasedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasedBuffer")
            .field("position", &self.position)
            .field("limit", &self.storage.len())
            .field("hooks", &self.hooks.len())
            .field("pooled", &self.owner.is_some())
            .finish()
    }
}
