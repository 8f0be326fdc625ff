//! Durable, bounded cache of the most recent chat messages.
//!
//! The server owns the conversation; this cache only seeds the UI before
//! the server's history arrives. Every read and write is best-effort.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::PersistenceError;
use crate::state::ChatMessage;

const KEY_PREFIX: &str = "docchat";
const MESSAGES_SLOT: &str = "messages";
const FILENAME_SLOT: &str = "filename";

pub const DEFAULT_CACHE_LIMIT: usize = 20;

/// A string key/value store.
pub trait Storage: Send {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// What the cache held at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedSession {
    pub messages: Vec<ChatMessage>,
    pub uploaded_filename: Option<String>,
}

pub struct MessageCache {
    storage: Box<dyn Storage>,
    limit: usize,
}

impl MessageCache {
    pub fn new(storage: impl Storage + 'static, limit: usize) -> Self {
        Self {
            storage: Box::new(storage),
            limit,
        }
    }

    fn key(slot: &str) -> String {
        format!("{}_{}", KEY_PREFIX, slot)
    }

    pub fn load(&self) -> CachedSession {
        let messages = match self.read_messages() {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%err, "failed to read cached messages");
                Vec::new()
            }
        };
        let uploaded_filename = match self.storage.get(&Self::key(FILENAME_SLOT)) {
            Ok(name) => name.filter(|n| !n.is_empty()),
            Err(err) => {
                warn!(%err, "failed to read cached filename");
                None
            }
        };
        CachedSession {
            messages,
            uploaded_filename,
        }
    }

    fn read_messages(&self) -> Result<Vec<ChatMessage>, PersistenceError> {
        match self.storage.get(&Self::key(MESSAGES_SLOT))? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Store the last `limit` messages, oldest first.
    pub fn save_messages(&mut self, messages: &[ChatMessage]) {
        let start = messages.len().saturating_sub(self.limit);
        let result = serde_json::to_string(&messages[start..])
            .map_err(PersistenceError::from)
            .and_then(|raw| self.storage.set(&Self::key(MESSAGES_SLOT), &raw));
        if let Err(err) = result {
            warn!(%err, "failed to persist messages");
        }
    }

    pub fn save_filename(&mut self, filename: Option<&str>) {
        let key = Self::key(FILENAME_SLOT);
        let result = match filename {
            Some(name) => self.storage.set(&key, name),
            None => self.storage.remove(&key),
        };
        if let Err(err) = result {
            warn!(%err, "failed to persist filename");
        }
    }

    pub fn purge(&mut self) {
        for slot in [MESSAGES_SLOT, FILENAME_SLOT] {
            if let Err(err) = self.storage.remove(&Self::key(slot)) {
                warn!(%err, slot, "failed to purge cache slot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("q{i}"))
                } else {
                    ChatMessage::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn reload_keeps_only_the_most_recent_messages_in_order() {
        let storage = MemoryStorage::new();
        let mut cache = MessageCache::new(storage.clone(), DEFAULT_CACHE_LIMIT);
        let all = numbered(27);
        cache.save_messages(&all);

        let reloaded = MessageCache::new(storage, DEFAULT_CACHE_LIMIT).load();
        assert_eq!(reloaded.messages.len(), 20);
        assert_eq!(reloaded.messages, all[7..].to_vec());
    }

    #[test]
    fn file_storage_round_trip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = MessageCache::new(FileStorage::new(dir.path().join("cache")), 20);
        cache.save_messages(&numbered(3));
        cache.save_filename(Some("paper.pdf"));

        let loaded = MessageCache::new(FileStorage::new(dir.path().join("cache")), 20).load();
        assert_eq!(loaded.messages, numbered(3));
        assert_eq!(loaded.uploaded_filename.as_deref(), Some("paper.pdf"));

        cache.purge();
        let loaded = MessageCache::new(FileStorage::new(dir.path().join("cache")), 20).load();
        assert_eq!(loaded, CachedSession::default());
    }

    #[test]
    fn corrupt_cache_loads_as_empty() {
        let mut storage = MemoryStorage::new();
        storage.set("docchat_messages", "{not json").unwrap();
        let loaded = MessageCache::new(storage, 20).load();
        assert!(loaded.messages.is_empty());
    }

    #[test]
    fn unwritable_storage_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // A regular file where the cache directory should be.
        let mut cache = MessageCache::new(FileStorage::new(&blocker), 20);
        cache.save_messages(&numbered(2));
        cache.save_filename(Some("a.pdf"));
        assert!(cache.load().messages.is_empty());
    }
}
