//! Rollback barrier (spec.md §5.4): readers must never observe a page mid
//! rollback. A transaction's dirty pages are evicted from the cache under
//! an exclusive barrier so no `with_page_ro` call can interleave with a
//! partially-completed rollback.

use std::sync::RwLock;

/// Readers take the shared side, rollback takes the exclusive side. Plain
/// page reads/writes during normal operation don't need the barrier at all
/// — it only protects the brief window where dirty cache entries are being
/// discarded.
pub(crate) struct RollbackBarrier {
    lock: RwLock<()>,
}

impl RollbackBarrier {
    pub(crate) fn new() -> Self {
        Self {
            lock: RwLock::new(()),
        }
    }

    pub(crate) fn read(&self) -> RollbackReadGuard<'_> {
        RollbackReadGuard {
            _guard: self.lock.read().unwrap(),
        }
    }

    pub(crate) fn exclusive(&self) -> RollbackWriteGuard<'_> {
        RollbackWriteGuard {
            _guard: self.lock.write().unwrap(),
        }
    }
}

pub(crate) struct RollbackReadGuard<'a> {
    _guard: std::sync::RwLockReadGuard<'a, ()>,
}

pub(crate) struct RollbackWriteGuard<'a> {
    _guard: std::sync::RwLockWriteGuard<'a, ()>,
}
