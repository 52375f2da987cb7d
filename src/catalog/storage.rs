//! Filesystem layout helpers and atomic write operations
//!
//! Manages the catalog directory structure, ensures atomic writes via
//! temp files and renames, and persists the catalog configuration.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::CatalogConfig;
use super::error::{StorageError, StorageResult};

/// Storage manager for catalog persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the schema object directory
    pub fn schemas_dir(&self) -> PathBuf {
        self.root.join("schemas")
    }

    /// Write data atomically to a file
    ///
    /// Writes a uniquely named temporary file, syncs it, then renames it over
    /// the destination so concurrent writers of one key never interleave.
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let failed = |detail: String| StorageError::AtomicWriteFailed {
            path: path.to_path_buf(),
            detail,
        };

        let mut file = File::create(&temp_path)
            .map_err(|e| failed(format!("create {:?}: {}", temp_path, e)))?;
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| failed(format!("write {:?}: {}", temp_path, e)))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(failed(format!("rename {:?}: {}", temp_path, e)));
        }

        // Sync parent directory
        if let Some(parent) = path.parent() {
            let dir = OpenOptions::new().read(true).open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Read a file, `None` if it does not exist
    pub fn read_file(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a file, returning whether it existed
    pub fn remove_file(&self, path: &Path) -> StorageResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a path exists
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    /// List files in a directory
    pub fn list_dir(&self, path: &Path) -> StorageResult<Vec<PathBuf>> {
        if !path.exists() {
            return Err(StorageError::PathNotFound(path.to_path_buf()));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            entries.push(entry?.path());
        }

        Ok(entries)
    }
}

/// Initialize storage directories for a new catalog
pub fn init_storage(root: &Path) -> StorageResult<()> {
    let storage = Storage::new(root.to_path_buf());

    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.schemas_dir())?;

    Ok(())
}

/// Write catalog configuration
pub fn write_config(config: &CatalogConfig) -> StorageResult<()> {
    let storage = Storage::new(config.root.clone());
    let json = serde_json::to_vec_pretty(config)?;
    storage.write_atomic(&storage.config_path(), &json)
}

/// Load catalog configuration
pub fn load_config(root: &Path) -> StorageResult<CatalogConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();

    let data = storage
        .read_file(&config_path)?
        .ok_or_else(|| StorageError::ConfigError(format!("missing {:?}", config_path)))?;
    let config: CatalogConfig = serde_json::from_slice(&data)?;

    Ok(config)
}
