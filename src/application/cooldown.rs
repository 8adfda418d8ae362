//! Trade deduplication with timed expiry.
//!
//! Remembers which delisting events already traded so a repeated or
//! re-broadcast announcement cannot open a second position. Every key is
//! forgotten after the cooldown window by a per-key scheduled removal, so
//! bookkeeping cost stays proportional to active keys rather than
//! wall-clock ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

enum CooldownEntry {
    /// Key reserved by an in-flight execution; no expiry timer yet.
    Pending,
    /// Trade recorded; removal scheduled.
    Recorded(AbortHandle),
}

/// Shared trade-dedup set.
///
/// `claim` / `record` / `release` keep the invariant that at most one
/// execution can hold a key at a time: the claim is an atomic test-and-set
/// taken before an execution starts, so two concurrent events with the same
/// key can never both pass.
pub struct DedupCooldown {
    window: Duration,
    entries: Arc<Mutex<HashMap<String, CooldownEntry>>>,
}

impl DedupCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// True when the key has never traded or its cooldown has expired.
    pub fn check(&self, key: &str) -> bool {
        !self
            .entries
            .lock()
            .expect("cooldown lock poisoned")
            .contains_key(key)
    }

    /// Atomically reserve `key` for an execution. Returns false when the key
    /// is already reserved or recorded; the caller must skip the trade.
    pub fn claim(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), CooldownEntry::Pending);
        true
    }

    /// Mark `key` as traded and schedule its removal after the window.
    ///
    /// Idempotent: a key that already carries a timer keeps it; no second
    /// timer is spawned.
    pub fn record(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        if let Some(CooldownEntry::Recorded(_)) = entries.get(key) {
            debug!("DedupCooldown: {} already recorded, keeping existing timer", key);
            return;
        }

        let window = self.window;
        let map = Arc::clone(&self.entries);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            map.lock().expect("cooldown lock poisoned").remove(&owned_key);
            info!("DedupCooldown: cooldown expired for {}", owned_key);
        })
        .abort_handle();

        entries.insert(key.to_string(), CooldownEntry::Recorded(handle));
    }

    /// Drop a pending reservation after a failed execution so a later
    /// announcement for the same key can trade. A recorded key is left
    /// untouched.
    pub fn release(&self, key: &str) {
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        if let Some(CooldownEntry::Pending) = entries.get(key) {
            entries.remove(key);
        }
    }

    /// Number of keys currently tracked (pending + recorded).
    pub fn active(&self) -> usize {
        self.entries.lock().expect("cooldown lock poisoned").len()
    }

    /// Abort all expiry timers and clear the set. Called on shutdown so no
    /// timer task outlives the orchestrator.
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        for (_, entry) in entries.drain() {
            if let CooldownEntry::Recorded(handle) = entry {
                handle.abort();
            }
        }
    }
}
