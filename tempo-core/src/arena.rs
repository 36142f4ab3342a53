//! Entity registry and core context.
//!
//! Every persistent entity (object, token, variable, constraint) draws its key
//! from a single monotonic counter owned by the [`CoreContext`]. Keys are never
//! reused during a run, so a stale key can be recognised at lookup instead of
//! aliasing a newer entity. The context also carries the global purge flag and
//! the deferred-discard batch, so cascade relationships can be traversed
//! without invalidating live iterators.

use std::cell::RefCell;
use std::rc::Rc;

use crate::collections::FxHashMap;
use crate::keys::EntityKey;

/// Kind tag recorded for every allocated key, for typed lookup and
/// use-after-discard diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Object,
    Token,
    Variable,
    Constraint,
}

#[derive(Debug, Default)]
struct ContextInner {
    next_key: u32,
    kinds: FxHashMap<EntityKey, EntityKind>,
    released: FxHashMap<EntityKey, EntityKind>,
    purging: bool,
    discard_queue: Vec<EntityKey>,
}

/// Shared handle on the entity registry.
///
/// Cloning is cheap; the engine and the plan database each hold a clone built
/// from the same context at construction time.
#[derive(Debug, Clone, Default)]
pub struct CoreContext {
    inner: Rc<RefCell<ContextInner>>,
}

impl CoreContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh key for an entity of the given kind.
    pub fn allocate(&self, kind: EntityKind) -> EntityKey {
        let mut inner = self.inner.borrow_mut();
        let key = EntityKey(inner.next_key);
        inner.next_key += 1;
        inner.kinds.insert(key, kind);
        key
    }

    /// Kind of a live entity, or `None` if the key was never allocated or has
    /// been released.
    pub fn kind_of(&self, key: EntityKey) -> Option<EntityKind> {
        self.inner.borrow().kinds.get(&key).copied()
    }

    /// True if the key was allocated and later released. Touching such a key
    /// is a programmer error surfaced by the owning store.
    pub fn is_released(&self, key: EntityKey) -> bool {
        self.inner.borrow().released.contains_key(&key)
    }

    /// Mark an entity as gone. The key is never handed out again.
    pub fn release(&self, key: EntityKey) {
        let mut inner = self.inner.borrow_mut();
        if let Some(kind) = inner.kinds.remove(&key) {
            inner.released.insert(key, kind);
        }
    }

    /// Defer a discard into the batch drained by `drain_discards`.
    pub fn schedule_discard(&self, key: EntityKey) {
        self.inner.borrow_mut().discard_queue.push(key);
    }

    /// Take the pending discard batch, oldest first.
    pub fn drain_discards(&self) -> Vec<EntityKey> {
        std::mem::take(&mut self.inner.borrow_mut().discard_queue)
    }

    /// Raise the purge flag. While purging, cascade notifications are
    /// suppressed and cross-entity invariants are allowed to lapse.
    pub fn begin_purge(&self) {
        self.inner.borrow_mut().purging = true;
    }

    pub fn end_purge(&self) {
        self.inner.borrow_mut().purging = false;
    }

    pub fn is_purging(&self) -> bool {
        self.inner.borrow().purging
    }

    /// Number of keys allocated so far.
    pub fn allocated(&self) -> u32 {
        self.inner.borrow().next_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_monotonic_and_never_reused() {
        let ctx = CoreContext::new();
        let a = ctx.allocate(EntityKind::Token);
        let b = ctx.allocate(EntityKind::Object);
        assert!(a < b);

        ctx.release(a);
        assert!(ctx.is_released(a));
        assert_eq!(ctx.kind_of(a), None);

        let c = ctx.allocate(EntityKind::Token);
        assert!(c > b, "released keys must not be recycled");
    }

    #[test]
    fn purge_flag_round_trip() {
        let ctx = CoreContext::new();
        assert!(!ctx.is_purging());
        ctx.begin_purge();
        assert!(ctx.is_purging());
        ctx.end_purge();
        assert!(!ctx.is_purging());
    }

    #[test]
    fn discard_batch_preserves_order() {
        let ctx = CoreContext::new();
        let a = ctx.allocate(EntityKind::Variable);
        let b = ctx.allocate(EntityKind::Variable);
        ctx.schedule_discard(a);
        ctx.schedule_discard(b);
        assert_eq!(ctx.drain_discards(), vec![a, b]);
        assert!(ctx.drain_discards().is_empty());
    }
}
