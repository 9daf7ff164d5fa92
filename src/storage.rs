//! Key/value storage with browser local-storage semantics.
//!
//! One string blob per key, no transactions, no locking: when two hosts share
//! a store the last writer wins. That is an accepted limitation of the flow,
//! not something the router tries to paper over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::ReviewError;

// ---------------------------------------------------------------------------
// SessionStore trait
// ---------------------------------------------------------------------------

/// Backing storage for the session blob.
///
/// Object-safe so the router can hold a `Box<dyn SessionStore>`.
/// Implementations must not panic; failures are returned as
/// `ReviewError::Storage`.
pub trait SessionStore: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// `Ok(None)` when the key has never been written.
    fn get_item(&self, key: &str) -> Result<Option<String>, ReviewError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), ReviewError>;

    /// Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), ReviewError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Clones share the same map, which is how tests model two
/// tabs writing to the same local storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<Mutex<HashMap<String, String>>>,
    unavailable: Arc<AtomicBool>,
    drop_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as if storage were disabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Accept writes but silently discard them (quota exhaustion in some
    /// browsers behaves this way).
    pub fn set_drop_writes(&self, drop_writes: bool) {
        self.drop_writes.store(drop_writes, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ReviewError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReviewError::Storage("storage unavailable".to_string()));
        }
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, ReviewError> {
        self.check_available()?;
        match self.items.lock() {
            Ok(guard) => Ok(guard.get(key).cloned()),
            Err(_) => Err(ReviewError::Storage("memory store mutex poisoned".to_string())),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), ReviewError> {
        self.check_available()?;
        if self.drop_writes.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.items.lock() {
            Ok(mut guard) => {
                guard.insert(key.to_string(), value.to_string());
                Ok(())
            }
            Err(_) => Err(ReviewError::Storage("memory store mutex poisoned".to_string())),
        }
    }

    fn remove_item(&self, key: &str) -> Result<(), ReviewError> {
        self.check_available()?;
        match self.items.lock() {
            Ok(mut guard) => {
                guard.remove(key);
                Ok(())
            }
            Err(_) => Err(ReviewError::Storage("memory store mutex poisoned".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// One JSON file per key under a directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash never leaves a half-written blob behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ReviewError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ReviewError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ReviewError::Storage(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl SessionStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, ReviewError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), ReviewError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), ReviewError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("k").unwrap(), None);
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v"));
        store.remove_item("k").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_memory_store_clones_share_items() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set_item("k", "from-a").unwrap();
        assert_eq!(b.get_item("k").unwrap().as_deref(), Some("from-a"));
    }

    #[test]
    fn test_memory_store_unavailable_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.get_item("k").is_err());
        assert!(store.set_item("k", "v").is_err());
        assert!(store.remove_item("k").is_err());
    }

    #[test]
    fn test_memory_store_drop_writes() {
        let store = MemoryStore::new();
        store.set_drop_writes(true);
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_item("jhui_session").unwrap(), None);
        store.set_item("jhui_session", "{\"a\":1}").unwrap();
        assert_eq!(
            store.get_item("jhui_session").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(dir.path().join("jhui_session.json").exists());
        assert!(!dir.path().join("jhui_session.json.tmp").exists());
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.remove_item("nothing").is_ok());
    }

    #[test]
    fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.set_item("../escape", "x").is_err());
        assert!(store.get_item("").is_err());
    }

    #[test]
    fn test_file_store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).unwrap();
        assert!(store.dir().is_dir());
    }
}
