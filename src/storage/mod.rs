//! Storage layer: the `SQLite` store, the advisory-lock table, and the
//! deep-read backend strategy.
//!
//! The engine owns one shared mutable surface — the build registry tables —
//! and reads everything else. Readers never take the writer locks: they see
//! committed rows and active-flags only, so activation swaps are invisible
//! to them except as an atomic change of answer.

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod deep_read;
pub mod lock;
pub mod sqlite;

pub use deep_read::{ClosureBackend, DeepReadBackend, EdgesBackend, SnapshotBackend};
pub use lock::{KeyedMutex, deep_read_lock_key};
pub use sqlite::HierarchyStore;

use std::sync::{Mutex, MutexGuard};

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), the
/// inner value is recovered and a warning logged. The guarded state is a
/// database connection or a lock table entry; both remain valid across a
/// poisoning panic.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("orgdeep_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}
