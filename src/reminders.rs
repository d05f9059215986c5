//! Locally persisted reminders list.
//!
//! The whole list is stored as one JSON array under a fixed key and
//! rewritten after every change. Memory and disk never disagree: when a
//! write fails, the in-memory change is undone before the error is returned.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const REMINDERS_KEY: &str = "reminders";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize reminders: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String key-value persistence, one value per key.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Key-value store backed by a single JSON object file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write to a sibling temp file, then rename over the target.
    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!("Wrote {} key(s) to {}", entries.len(), self.path.display());
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(StoreError::Corrupt { path, source }) => {
                warn!("Replacing unreadable storage file {}: {source}", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Creation time in Unix milliseconds, bumped if needed to stay unique.
    pub id: i64,
    pub text: String,
}

pub struct ReminderStore {
    items: Vec<Reminder>,
    store: Box<dyn KeyValueStore>,
}

impl ReminderStore {
    /// Load the persisted list. Missing or unreadable data gives an empty list.
    pub fn load(store: Box<dyn KeyValueStore>) -> Self {
        let items = match store.get(REMINDERS_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<Reminder>>(&json) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Ignoring malformed reminders data: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read reminders: {e}");
                Vec::new()
            }
        };
        info!("Loaded {} reminder(s)", items.len());
        Self { items, store }
    }

    pub fn items(&self) -> &[Reminder] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, text: &str) -> Result<&Reminder, StoreError> {
        let id = self.next_id(chrono::Utc::now().timestamp_millis());
        self.items.push(Reminder {
            id,
            text: text.to_string(),
        });

        if let Err(e) = self.persist() {
            self.items.pop();
            return Err(e);
        }

        info!("Added reminder {id}");
        Ok(&self.items[self.items.len() - 1])
    }

    /// Remove the reminder with `id`. Returns `None` if no entry matched.
    pub fn delete(&mut self, id: i64) -> Result<Option<Reminder>, StoreError> {
        let Some(index) = self.items.iter().position(|r| r.id == id) else {
            debug!("No reminder with id {id}");
            return Ok(None);
        };

        let removed = self.items.remove(index);
        if let Err(e) = self.persist() {
            self.items.insert(index, removed);
            return Err(e);
        }

        info!("Deleted reminder {id}");
        Ok(Some(removed))
    }

    fn next_id(&self, now_ms: i64) -> i64 {
        match self.items.iter().map(|r| r.id).max() {
            Some(last) if now_ms <= last => last + 1,
            _ => now_ms,
        }
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.items)?;
        self.store.set(REMINDERS_KEY, &json)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory store whose contents stay inspectable after being boxed.
    #[derive(Clone, Default)]
    pub(crate) struct MemoryStore {
        pub entries: Arc<Mutex<BTreeMap<String, String>>>,
        pub fail_writes: Arc<Mutex<bool>>,
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            if *self.fail_writes.lock().unwrap() {
                return Err(StoreError::Io {
                    path: PathBuf::from("memory"),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    fn persisted(store: &MemoryStore) -> Vec<Reminder> {
        let json = store.get(REMINDERS_KEY).unwrap().unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_add_then_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/storage.json");

        let mut reminders = ReminderStore::load(Box::new(JsonFileStore::new(&path)));
        assert!(reminders.is_empty());
        let added = reminders.add("call Sam").unwrap().clone();

        let reloaded = ReminderStore::load(Box::new(JsonFileStore::new(&path)));
        assert_eq!(reloaded.items(), &[added]);
        assert_eq!(reloaded.items()[0].text, "call Sam");
    }

    #[test]
    fn test_file_layout_is_json_array_under_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let mut reminders = ReminderStore::load(Box::new(JsonFileStore::new(&path)));
        reminders.add("buy milk").unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let items: Vec<serde_json::Value> = serde_json::from_str(&raw[REMINDERS_KEY]).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["text"], "buy milk");
        assert!(items[0]["id"].is_i64());
    }

    #[test]
    fn test_delete_keeps_order_of_others() {
        let store = MemoryStore::default();
        let mut reminders = ReminderStore::load(Box::new(store.clone()));
        let a = reminders.add("a").unwrap().id;
        let b = reminders.add("b").unwrap().id;
        let c = reminders.add("c").unwrap().id;

        let removed = reminders.delete(b).unwrap().unwrap();
        assert_eq!(removed.text, "b");

        let ids: Vec<i64> = reminders.items().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(persisted(&store), reminders.items());
    }

    #[test]
    fn test_delete_unknown_id_is_noop() {
        let store = MemoryStore::default();
        let mut reminders = ReminderStore::load(Box::new(store.clone()));
        reminders.add("a").unwrap();
        assert!(reminders.delete(42).unwrap().is_none());
        assert_eq!(reminders.len(), 1);
    }

    #[test]
    fn test_rapid_adds_get_unique_increasing_ids() {
        let mut reminders = ReminderStore::load(Box::new(MemoryStore::default()));
        let ids: Vec<i64> = (0..20)
            .map(|i| reminders.add(&format!("item {i}")).unwrap().id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_next_id_bumps_past_clock() {
        let mut reminders = ReminderStore::load(Box::new(MemoryStore::default()));
        reminders.items.push(Reminder {
            id: 5_000,
            text: "future".into(),
        });
        assert_eq!(reminders.next_id(4_000), 5_001);
        assert_eq!(reminders.next_id(6_000), 6_000);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = MemoryStore::default();
        let mut reminders = ReminderStore::load(Box::new(store.clone()));
        let keep = reminders.add("keep").unwrap().id;

        *store.fail_writes.lock().unwrap() = true;
        assert!(reminders.add("lost").is_err());
        assert!(reminders.delete(keep).is_err());

        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders.items()[0].id, keep);
        assert_eq!(persisted(&store), reminders.items());
    }

    #[test]
    fn test_malformed_data_loads_empty() {
        let store = MemoryStore::default();
        store
            .entries
            .lock()
            .unwrap()
            .insert(REMINDERS_KEY.into(), "{not json".into());
        let reminders = ReminderStore::load(Box::new(store));
        assert!(reminders.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "garbage").unwrap();

        let mut reminders = ReminderStore::load(Box::new(JsonFileStore::new(&path)));
        assert!(reminders.is_empty());
        reminders.add("fresh start").unwrap();

        let reloaded = ReminderStore::load(Box::new(JsonFileStore::new(&path)));
        assert_eq!(reloaded.items()[0].text, "fresh start");
    }

    #[test]
    fn test_other_keys_survive_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("storage.json"));
        store.set("theme", "large-text").unwrap();

        let mut reminders = ReminderStore::load(Box::new(JsonFileStore::new(store.path())));
        reminders.add("stretch").unwrap();

        assert_eq!(store.get("theme").unwrap().as_deref(), Some("large-text"));
    }
}
