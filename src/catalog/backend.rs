//! Durable ordered mappings backing the schema store
//!
//! The store only needs string keys and string values with per-key atomic
//! writes. Two implementations ship: an in-memory map and a directory of
//! one file per key.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::error::{StorageError, StorageResult};
use super::storage::Storage;

const ENTRY_EXTENSION: &str = "xml";

/// String-keyed, string-valued persistent mapping
pub trait SchemaBackend: Send + Sync + fmt::Debug {
    /// Fetch the value stored under a key
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or replace a value; atomic per key
    fn insert(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key, returning its previous value
    fn remove(&self, key: &str) -> StorageResult<Option<String>>;

    /// All keys in ascending order
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Whether a key is present
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of stored entries
    fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.len())
    }
}

/// Process-local backend, mostly for tests and ephemeral catalogs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaBackend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn insert(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.write().remove(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.entries.read().len())
    }
}

/// One file per entry under `<root>/schemas/`
#[derive(Debug, Clone)]
pub struct FsBackend {
    storage: Storage,
    dir: PathBuf,
}

impl FsBackend {
    /// Open (and create if needed) the schema directory under `storage`
    pub fn open(storage: Storage) -> StorageResult<Self> {
        let dir = storage.schemas_dir();
        storage.create_dir_all(&dir)?;
        Ok(Self { storage, dir })
    }

    fn entry_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION)))
    }
}

impl SchemaBackend for FsBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.entry_path(key)?;
        match self.storage.read_file(&path)? {
            Some(data) => String::from_utf8(data)
                .map(Some)
                .map_err(|_| StorageError::InvalidUtf8(key.to_string())),
            None => Ok(None),
        }
    }

    fn insert(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key)?;
        self.storage.write_atomic(&path, value.as_bytes())
    }

    fn remove(&self, key: &str) -> StorageResult<Option<String>> {
        let previous = self.get(key)?;
        if previous.is_some() {
            self.storage.remove_file(&self.entry_path(key)?)?;
        }
        Ok(previous)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .storage
            .list_dir(&self.dir)?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .filter(|stem| stem.chars().all(|c| c.is_ascii_alphanumeric()))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.storage.exists(&self.entry_path(key)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(backend: &dyn SchemaBackend) {
        assert_eq!(backend.len().unwrap(), 0);
        backend.insert("bb", "two").unwrap();
        backend.insert("aa", "one").unwrap();
        assert_eq!(backend.get("aa").unwrap().as_deref(), Some("one"));
        assert!(backend.contains("bb").unwrap());
        assert_eq!(backend.keys().unwrap(), vec!["aa", "bb"]);

        backend.insert("aa", "uno").unwrap();
        assert_eq!(backend.get("aa").unwrap().as_deref(), Some("uno"));

        assert_eq!(backend.remove("aa").unwrap().as_deref(), Some("uno"));
        assert_eq!(backend.remove("aa").unwrap(), None);
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_memory_backend_mapping() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn test_fs_backend_mapping() {
        let temp = TempDir::new().unwrap();
        let backend = FsBackend::open(Storage::new(temp.path().to_path_buf())).unwrap();
        exercise(&backend);
    }

    #[test]
    fn test_fs_backend_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let backend = FsBackend::open(Storage::new(temp.path().to_path_buf())).unwrap();
        assert!(matches!(
            backend.insert("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(backend.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_fs_backend_ignores_foreign_files() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let backend = FsBackend::open(storage.clone()).unwrap();
        backend.insert("abc", "x").unwrap();
        std::fs::write(storage.schemas_dir().join("notes.txt"), "n").unwrap();
        std::fs::write(storage.schemas_dir().join("abc.123.tmp"), "partial").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["abc"]);
    }
}
