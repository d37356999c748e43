use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

// The state behind these locks (drainer lifecycle, last-error slot) is
// overwritten whole, so it stays usable after a panic in another thread.

pub(crate) fn read_state<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!(state = what, "Purge state lock poisoned, reading anyway");
        poisoned.into_inner()
    })
}

pub(crate) fn write_state<'a, T>(
    lock: &'a RwLock<T>,
    what: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!(state = what, "Purge state lock poisoned, writing anyway");
        poisoned.into_inner()
    })
}
