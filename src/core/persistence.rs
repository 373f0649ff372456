//! State persistence
//!
//! Snapshots the persistent subset of the store to a flat JSON document and
//! restores it on startup. The file maps each state key to the full entry:
//!
//! ```json
//! { "<key>": { "value": ..., "timestamp": "<RFC 3339>", "source": "...",
//!              "ttl": null, "persistent": true } }
//! ```
//!
//! Both operations report success as `bool` and never panic; I/O failures and
//! malformed documents are logged and reported as `false`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{error, info};

use super::state::{StateEntry, StateStore};

impl StateStore {
    /// Snapshot every entry with `persistent = true` to `path`.
    ///
    /// The snapshot is taken under the store lock, so it is consistent with
    /// respect to concurrent writers; the file write itself happens after the
    /// lock is released. The document is written to a temporary file and
    /// renamed into place so a crash mid-write cannot truncate an existing
    /// snapshot.
    pub fn save_state(&self, path: &Path) -> bool {
        // BTreeMap keeps the document key-sorted across runs
        let snapshot: BTreeMap<String, StateEntry> = {
            let inner = self.lock();
            inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.persistent)
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect()
        };

        let document = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to serialize state snapshot");
                return false;
            }
        };

        let tmp = path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, &document) {
            error!(path = %tmp.display(), error = %e, "failed to write state snapshot");
            return false;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            error!(path = %path.display(), error = %e, "failed to move state snapshot into place");
            return false;
        }

        info!(path = %path.display(), entries = snapshot.len(), "state snapshot saved");
        true
    }

    /// Restore entries from the document at `path`, overwriting any live
    /// entry with the same key. Keys absent from the file are left untouched
    /// (load is a merge, not a wholesale replace). No change notifications
    /// are published for restored entries.
    ///
    /// The document is parsed in full before the store is touched, so a
    /// malformed file leaves existing entries unchanged.
    pub fn load_state(&self, path: &Path) -> bool {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read state snapshot");
                return false;
            }
        };

        let loaded: BTreeMap<String, StateEntry> = match serde_json::from_str(&raw) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(path = %path.display(), error = %e, "malformed state snapshot");
                return false;
            }
        };

        let count = loaded.len();
        {
            let mut inner = self.lock();
            for (key, entry) in loaded {
                inner.entries.insert(key, entry);
            }
        }

        info!(path = %path.display(), entries = count, "state snapshot restored");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tempfile::tempdir;

    use crate::core::events::{ChangeNotifier, Event, NotifyError};
    use crate::core::state::StateStore;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<Event>>,
    }

    impl ChangeNotifier for RecordingNotifier {
        fn publish(&self, event: Event) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn new_store() -> StateStore {
        StateStore::new(Arc::new(RecordingNotifier::default()))
    }

    #[test]
    fn test_roundtrip_restores_persistent_entries_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = new_store();
        store.set_state("balance", json!(1234.5), "account", None, true);
        store.set_state("position", json!({"pair": "BTC-USD", "size": 0.5}), "trader", Some(3600), true);
        store.set_state("last_tick", json!(50_000.0), "feed", Some(5), false);

        assert!(store.save_state(&path));

        let restored = new_store();
        assert!(restored.load_state(&path));

        assert_eq!(restored.get_state("balance"), Some(json!(1234.5)));
        assert_eq!(
            restored.get_state("position"),
            Some(json!({"pair": "BTC-USD", "size": 0.5}))
        );
        assert_eq!(restored.get_state("last_tick"), None);

        let info = restored.get_state_info();
        assert_eq!(info.total_keys, 2);
        assert_eq!(info.sources, vec!["account".to_string(), "trader".to_string()]);
    }

    #[test]
    fn test_document_matches_wire_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = new_store();
        store.set_state("balance", json!(10.0), "account", Some(60), true);
        assert!(store.save_state(&path));

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();

        let entry = &doc["balance"];
        assert_eq!(entry["value"], json!(10.0));
        assert_eq!(entry["source"], "account");
        assert_eq!(entry["ttl"], json!(60));
        assert_eq!(entry["persistent"], json!(true));
        // RFC 3339 timestamp parses back
        let ts = entry["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_load_is_a_merge_with_per_key_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let saver = new_store();
        saver.set_state("shared", json!("from_file"), "old_run", None, true);
        assert!(saver.save_state(&path));

        let store = new_store();
        store.set_state("shared", json!("live"), "current_run", None, true);
        store.set_state("untouched", json!(1), "current_run", None, true);

        assert!(store.load_state(&path));

        assert_eq!(store.get_state("shared"), Some(json!("from_file")));
        assert_eq!(store.get_state("untouched"), Some(json!(1)));
    }

    #[test]
    fn test_load_missing_file_returns_false() {
        let dir = tempdir().unwrap();
        let store = new_store();
        assert!(!store.load_state(&dir.path().join("nope.json")));
    }

    #[test]
    fn test_load_malformed_document_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = new_store();
        store.set_state("k", json!(1), "m", None, true);

        assert!(!store.load_state(&path));
        assert_eq!(store.get_state("k"), Some(json!(1)));
    }

    #[test]
    fn test_save_to_unwritable_path_returns_false() {
        let store = new_store();
        store.set_state("k", json!(1), "m", None, true);
        assert!(!store.save_state(std::path::Path::new("/nonexistent/dir/state.json")));
    }

    #[test]
    fn test_save_empty_store_writes_empty_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        assert!(new_store().save_state(&path));

        let restored = new_store();
        assert!(restored.load_state(&path));
        assert_eq!(restored.get_state_info().total_keys, 0);
    }
}
