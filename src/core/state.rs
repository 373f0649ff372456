//! Shared state store
//!
//! The [`StateStore`] is the coordination point between modules: a key/value
//! registry with per-entry provenance metadata, optional time-based expiry,
//! change notification through a [`ChangeNotifier`], and a persistence
//! round-trip (see `core::persistence`).
//!
//! One `std::sync::Mutex` guards the entry map and the watcher registry
//! together, so every operation observes both in a consistent state.
//! Notifications are dispatched *after* the lock is released: `set_state`
//! snapshots the prior value and the watcher set inside the critical section,
//! then publishes outside it. Watcher callbacks may therefore call back into
//! the store without deadlocking, and lock-hold time stays independent of
//! watcher fan-out.
//!
//! No public operation panics or returns an error; failures are logged and
//! reported through a `bool` or a `None`/default value.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::events::{ChangeNotifier, Event, StateChange, WatchNotification};

/// A stored value together with its provenance metadata.
///
/// Entries are immutable once created; a write always installs a fresh entry,
/// so a clone handed out earlier never changes under the holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: Value,
    /// Instant the entry was written (UTC)
    pub timestamp: DateTime<Utc>,
    /// Module id that wrote the entry
    pub source: String,
    /// Seconds until the entry reads as absent; `None` means no expiry
    pub ttl: Option<u64>,
    /// Whether the entry is included in persistence snapshots
    pub persistent: bool,
}

impl StateEntry {
    pub fn new(value: Value, source: &str, ttl: Option<u64>, persistent: bool) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            source: source.to_string(),
            ttl,
            persistent,
        }
    }

    /// An entry is expired once strictly more than `ttl` seconds have passed
    /// since it was written. Entries without a TTL never expire, and a TTL
    /// too large for the time type is treated the same way rather than
    /// overflowing.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        let Ok(ttl) = i64::try_from(ttl) else {
            return false;
        };
        match Duration::try_seconds(ttl) {
            Some(limit) => now.signed_duration_since(self.timestamp) > limit,
            None => false,
        }
    }
}

/// Atomic summary of the store contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateInfo {
    pub total_keys: usize,
    /// Watcher count per watched key
    pub watchers: HashMap<String, usize>,
    /// Distinct sources present, sorted
    pub sources: Vec<String>,
    /// All keys present, sorted
    pub keys: Vec<String>,
}

#[derive(Default)]
pub(crate) struct StoreInner {
    pub(crate) entries: HashMap<String, StateEntry>,
    pub(crate) watchers: HashMap<String, HashSet<String>>,
}

/// Guarded key/value registry shared by all modules.
///
/// Constructed explicitly and passed by `Arc` to every collaborator; there is
/// no process-global instance.
pub struct StateStore {
    inner: Mutex<StoreInner>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl StateStore {
    pub fn new(notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            notifier,
        }
    }

    // A panicked holder cannot leave a half-written entry behind (writes are
    // whole-entry inserts), so a poisoned lock is safe to recover.
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a value under `key`, replacing any existing entry.
    ///
    /// The write is installed before any notification is published: a
    /// notification failure is logged and reported through the `false`
    /// return, but the new value stays in place. One `StateChanged` event is
    /// published per call, plus one `StateWatch` event per module watching
    /// the key at the time of the write.
    pub fn set_state(
        &self,
        key: &str,
        value: Value,
        source: &str,
        ttl: Option<u64>,
        persistent: bool,
    ) -> bool {
        let entry = StateEntry::new(value.clone(), source, ttl, persistent);
        let timestamp = entry.timestamp;

        let (old_value, watchers) = {
            let mut inner = self.lock();
            let old_value = inner
                .entries
                .insert(key.to_string(), entry)
                .map(|old| old.value);
            let watchers: Vec<String> = inner
                .watchers
                .get(key)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
            (old_value, watchers)
        };

        let mut ok = true;

        if let Err(e) = self.notifier.publish(Event::StateChanged(StateChange {
            key: key.to_string(),
            old_value,
            new_value: value.clone(),
            source: source.to_string(),
        })) {
            error!(key, source, error = %e, "failed to publish state change");
            ok = false;
        }

        for module_id in watchers {
            if let Err(e) = self.notifier.publish(Event::StateWatch(WatchNotification {
                key: key.to_string(),
                value: value.clone(),
                source: source.to_string(),
                timestamp,
                module_id: module_id.clone(),
            })) {
                error!(key, module_id, error = %e, "failed to notify watcher");
                ok = false;
            }
        }

        ok
    }

    /// Read the value under `key`.
    ///
    /// Expiry is lazy: the read that observes an expired entry evicts it and
    /// returns `None`, as if the key never existed. Use
    /// [`get_state_or`](Self::get_state_or) for a caller-supplied default.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();

        let expired = inner.entries.get(key)?.is_expired(Utc::now());
        if expired {
            debug!(key, "evicting expired state entry");
            inner.entries.remove(key);
            return None;
        }

        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Read the value under `key`, falling back to `default` when the key is
    /// absent or expired.
    pub fn get_state_or(&self, key: &str, default: Value) -> Value {
        self.get_state(key).unwrap_or(default)
    }

    /// Register `module_id` to be notified when `key` changes. Idempotent.
    pub fn watch_state(&self, key: &str, module_id: &str) {
        let mut inner = self.lock();
        inner
            .watchers
            .entry(key.to_string())
            .or_default()
            .insert(module_id.to_string());
    }

    /// Remove `module_id` from the watchers of `key`. Unwatching a module
    /// that is not registered is a no-op.
    pub fn unwatch_state(&self, key: &str, module_id: &str) {
        let mut inner = self.lock();
        if let Some(ids) = inner.watchers.get_mut(key) {
            ids.remove(module_id);
            if ids.is_empty() {
                inner.watchers.remove(key);
            }
        }
    }

    /// Remove entries. With `Some(source)` only entries written by that
    /// source are removed; with `None` the store is emptied. Watcher
    /// registrations are untouched either way.
    pub fn clear_state(&self, source: Option<&str>) {
        let mut inner = self.lock();
        match source {
            Some(source) => inner.entries.retain(|_, entry| entry.source != source),
            None => inner.entries.clear(),
        }
    }

    /// Summary of the store, atomic with respect to concurrent writers.
    ///
    /// Key and source lists are sorted for deterministic logs; callers must
    /// not rely on any storage order.
    pub fn get_state_info(&self) -> StateInfo {
        let inner = self.lock();

        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort();

        let mut sources: Vec<String> = inner
            .entries
            .values()
            .map(|entry| entry.source.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sources.sort();

        StateInfo {
            total_keys: inner.entries.len(),
            watchers: inner
                .watchers
                .iter()
                .map(|(key, ids)| (key.clone(), ids.len()))
                .collect(),
            sources,
            keys,
        }
    }
}
