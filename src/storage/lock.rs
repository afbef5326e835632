//! In-process advisory locks for build/activate/prune writers.
//!
//! Every write operation against a build-registry key acquires the lock for
//! a deterministic string derived from (kind, tenant, hierarchy[, as-of
//! date]) and holds it for the duration of the operation. This guarantees a
//! single writer per key; writers for different keys proceed independently.
//! Readers never touch this table.
//!
//! A single-process deployment is fully served by this keyed mutex table. A
//! multi-process deployment must swap in a true distributed lock (the
//! storage engine's advisory-lock primitive, or a lease in a coordination
//! service); the key derivation below is the stable contract either way.

use crate::Result;
use crate::storage::acquire_lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Derives the advisory-lock key for a deep-read writer.
///
/// Empty parts are skipped, so closure keys (no as-of date) and snapshot
/// keys share one derivation.
#[must_use]
pub fn deep_read_lock_key(parts: &[&str]) -> String {
    let mut key = String::from("org:deep-read");
    for part in parts {
        if part.is_empty() {
            continue;
        }
        key.push(':');
        key.push_str(part);
    }
    key
}

/// A table of named mutexes, one per lock key.
///
/// Entries are created on first use and never removed; the key space is
/// bounded by (tenant × hierarchy × as-of date) combinations that actually
/// get built.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    ///
    /// Blocks until the key's lock is available. Locks for distinct keys do
    /// not contend.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`; acquisition itself does not fail.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let entry = {
            let mut table = acquire_lock(&self.locks);
            Arc::clone(table.entry(key.to_string()).or_default())
        };
        let _guard = acquire_lock(&entry);
        f()
    }
}
