//! Activity Clock (AC) — process-wide mapping from namespace to last-seen
//! activity, backed by a monotonic clock.
//!
//! `touch`, `snapshot`, and `evict` are all constant-time point operations
//! guarded by a single `Mutex`; `snapshot` copies the key list out before
//! returning so the reaper never holds the lock while awaiting an
//! orchestrator call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

pub struct ActivityClock {
    entries: Mutex<HashMap<String, Instant>>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record activity for `namespace` at the current instant.
    ///
    /// Within a key, the stored timestamp never decreases: a `Mutex`-guarded
    /// `insert` on a monotonic clock already guarantees this since
    /// `Instant::now()` is non-decreasing across calls.
    pub fn touch(&self, namespace: &str) {
        let mut entries = self.entries.lock().expect("activity clock mutex poisoned");
        entries.insert(namespace.to_string(), Instant::now());
    }

    /// A stable, owned copy of all entries for the reaper to iterate over.
    pub fn snapshot(&self) -> Vec<(String, Instant)> {
        let entries = self.entries.lock().expect("activity clock mutex poisoned");
        entries.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Remove a namespace's entry — called by the reaper in the same pass
    /// it scales a namespace down.
    pub fn evict(&self, namespace: &str) {
        let mut entries = self.entries.lock().expect("activity clock mutex poisoned");
        entries.remove(namespace);
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
