//! Catalog orchestrator and public API
//!
//! This module provides the `Catalog` struct that wires the schema store,
//! the transient cache, the type registry and dispatch together. It is the
//! service entities and callers look the active store up through.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// Submodules
pub mod backend;
pub mod cache;
pub mod codec;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod registry;
pub mod signature;
pub mod storage;
pub mod store;

/// Where schema text is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process memory only
    Memory,
    /// One file per schema under `<root>/schemas/`
    Filesystem,
}

/// Configuration for a schema catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root directory for catalog storage (default: .dynschema/)
    pub root: PathBuf,

    /// Persistence backend for schema text
    pub backend: BackendKind,

    /// Use the process-wide transient cache instead of a private one
    pub shared_cache: bool,

    /// Log at DEBUG instead of INFO when the catalog is used from the CLI
    pub debug: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".dynschema"),
            backend: BackendKind::Filesystem,
            shared_cache: true,
            debug: false,
        }
    }
}

impl CatalogConfig {
    /// Ephemeral configuration with a private cache
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            shared_cache: false,
            ..Self::default()
        }
    }

    /// Most verbose level a subscriber for this catalog should emit
    pub fn log_level(&self) -> tracing::Level {
        if self.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

use backend::{FsBackend, MemoryBackend};
use cache::TransientSchemaCache;
use dispatch::{EffectiveType, SignatureAware, SignatureAwareDispatch};
use entity::{EntityRecord, SchemaContext, SchemaSignedEntity};
use error::{CatalogError, Result};
use registry::DynamicTypeRegistry;
use storage::Storage;
use store::SchemaStore;

/// The main catalog orchestrator
///
/// Owns the store, registry and dispatch for one durable schema mapping.
pub struct Catalog {
    config: CatalogConfig,
    store: Arc<SchemaStore>,
    registry: Arc<DynamicTypeRegistry>,
    dispatch: SignatureAwareDispatch,
}

impl Catalog {
    /// Create a catalog with the given configuration
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let cache = if config.shared_cache {
            TransientSchemaCache::global()
        } else {
            Arc::new(TransientSchemaCache::new())
        };

        let store = match config.backend {
            BackendKind::Memory => SchemaStore::open(MemoryBackend::new(), cache)?,
            BackendKind::Filesystem => {
                let storage = Storage::new(config.root.clone());
                SchemaStore::open(FsBackend::open(storage)?, cache)?
            }
        };
        let store = Arc::new(store);
        let registry = Arc::new(DynamicTypeRegistry::new(store.clone()));
        let dispatch = SignatureAwareDispatch::new(registry.clone());

        tracing::debug!(root = ?config.root, backend = ?config.backend, "Catalog opened");

        Ok(Self {
            config,
            store,
            registry,
            dispatch,
        })
    }

    /// Ephemeral catalog with a private cache
    pub fn in_memory() -> Result<Self> {
        Self::new(CatalogConfig::in_memory())
    }

    /// Initialize catalog storage directories and configuration
    pub fn init(config: CatalogConfig) -> Result<()> {
        if config.backend == BackendKind::Memory {
            return Err(CatalogError::Config(
                "a memory catalog has nothing to initialize".to_string(),
            ));
        }
        storage::init_storage(&config.root)?;
        storage::write_config(&config)?;
        info!(root = ?config.root, "Initialized schema catalog");
        Ok(())
    }

    /// Load an existing catalog from storage
    pub fn load(root: PathBuf) -> Result<Self> {
        let mut config = storage::load_config(&root)?;
        // The directory may have moved since init.
        config.root = root;
        Self::new(config)
    }

    /// Get the current configuration
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Get the schema store
    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// Get the dynamic type registry
    pub fn registry(&self) -> &Arc<DynamicTypeRegistry> {
        &self.registry
    }

    /// Get the dispatcher
    pub fn dispatch(&self) -> &SignatureAwareDispatch {
        &self.dispatch
    }

    /// Create an entity, signing it with the context's schema if any
    pub fn create_entity(
        &self,
        context: Option<&Arc<dyn SchemaContext>>,
    ) -> Result<SchemaSignedEntity> {
        Ok(SchemaSignedEntity::new(self.store.clone(), context)?)
    }

    /// Rebuild an entity from a persisted record
    pub fn restore_entity(
        &self,
        record: EntityRecord,
        context: Option<&Arc<dyn SchemaContext>>,
    ) -> SchemaSignedEntity {
        SchemaSignedEntity::from_record(self.store.clone(), record, context)
    }

    /// Current effective type of an entity
    pub fn effective_type<E>(&self, entity: &E) -> EffectiveType
    where
        E: SignatureAware + ?Sized,
    {
        self.dispatch.effective_type(entity)
    }

    /// Release process-local state
    ///
    /// Clears the registry, and the transient cache when it is private to
    /// this catalog. The shared cache lives until `TransientSchemaCache::clear`.
    pub fn close(self) {
        self.registry.clear();
        if !self.config.shared_cache {
            self.store.cache().clear();
        }
    }
}

// Re-export commonly used types
pub use codec::{DEFAULT_MODEL_XML, Field, FieldKind, Schema, Value};
pub use signature::{DEFAULT_SIGNATURE, Signature};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_catalog() {
        let catalog = Catalog::in_memory().unwrap();
        assert_eq!(catalog.store().len().unwrap(), 1);
        assert!(catalog.registry().is_empty());
    }

    #[test]
    fn test_init_and_load_filesystem_catalog() {
        let temp = TempDir::new().unwrap();
        let config = CatalogConfig {
            root: temp.path().to_path_buf(),
            backend: BackendKind::Filesystem,
            shared_cache: false,
            debug: false,
        };
        Catalog::init(config).unwrap();

        let sig = {
            let catalog = Catalog::load(temp.path().to_path_buf()).unwrap();
            let sig = catalog
                .store()
                .add("<schema><field name='kept'/></schema>")
                .unwrap();
            catalog.close();
            sig
        };

        let catalog = Catalog::load(temp.path().to_path_buf()).unwrap();
        assert!(catalog.store().contains(&sig).unwrap());
        assert_eq!(catalog.store().len().unwrap(), 2);
    }

    #[test]
    fn test_debug_flag_selects_log_level() {
        let mut config = CatalogConfig::in_memory();
        assert_eq!(config.log_level(), tracing::Level::INFO);
        config.debug = true;
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_memory_catalog_cannot_be_initialized() {
        assert!(matches!(
            Catalog::init(CatalogConfig::in_memory()),
            Err(CatalogError::Config(_))
        ));
    }

    #[test]
    fn test_close_clears_private_state() {
        let catalog = Catalog::in_memory().unwrap();
        let sig = catalog
            .store()
            .add("<schema><field name='a'/></schema>")
            .unwrap();
        catalog.registry().resolve(&sig);
        let cache = catalog.store().cache().clone();
        let registry = catalog.registry().clone();
        assert!(!cache.is_empty());

        catalog.close();
        assert!(cache.is_empty());
        assert!(registry.is_empty());
    }
}
