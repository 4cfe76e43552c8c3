//! Session storage adapter.
//!
//! The storage collaborator is an injected key/value mapping; the
//! adapter owns one slot and the snapshot (de)serialization. Saves and
//! erases are fire-and-forget: failures are logged, never surfaced.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;
use tracing::warn;

use walletwire_core::Session;

/// The single storage slot used for the session snapshot.
pub const STORAGE_KEY: &str = "walletwire";

/// Injected key/value storage collaborator.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value.
    fn set(&self, key: &str, value: String);
    /// Delete a value.
    fn remove(&self, key: &str);
}

/// In-process store, for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(key);
    }
}

/// File-backed store: one JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path(key)).ok()
    }

    fn set(&self, key: &str, value: String) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(error = %e, "failed to create store directory");
            return;
        }
        if let Err(e) = std::fs::write(self.path(key), value) {
            warn!(error = %e, "failed to persist store slot");
        }
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.path(key));
    }
}

/// Adapter binding a [`KeyValueStore`] to the session snapshot slot.
pub struct SessionStorage {
    store: Box<dyn KeyValueStore>,
}

impl SessionStorage {
    /// Wrap an injected store.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the snapshot if the slot holds a structurally valid one.
    ///
    /// Validity is a non-empty `bridge` field; anything else yields
    /// `None`.
    pub fn load(&self) -> Option<Session> {
        let raw = self.store.get(STORAGE_KEY)?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        let bridge = value.get("bridge").and_then(Value::as_str)?;
        if bridge.is_empty() {
            return None;
        }
        serde_json::from_value(value).ok()
    }

    /// Persist the snapshot. Snapshots without a key are never written.
    pub fn save(&self, session: &Session) {
        if session.key.is_none() {
            warn!("refusing to persist session without a key");
            return;
        }
        match serde_json::to_string(session) {
            Ok(raw) => self.store.set(STORAGE_KEY, raw),
            Err(e) => warn!(error = %e, "failed to serialize session snapshot"),
        }
    }

    /// Clear the slot.
    pub fn erase(&self) {
        self.store.remove(STORAGE_KEY);
    }
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").finish_non_exhaustive()
    }
}
