//! Process-wide transient cache of materialized schemas
//!
//! Maps signatures to decoded schema objects so repeated loads skip the
//! codec. Signatures are content hashes, so a hit is valid no matter which
//! store handle produced it. Nothing here is durable.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::codec::{InstanceId, Schema};
use super::error::CodecResult;
use super::signature::Signature;

static GLOBAL_CACHE: OnceLock<Arc<TransientSchemaCache>> = OnceLock::new();

#[derive(Debug, Default)]
struct CacheInner {
    by_signature: HashMap<Signature, Arc<Schema>>,
    /// Reverse index: which signature a schema lineage is cached under
    by_instance: HashMap<InstanceId, Signature>,
}

impl CacheInner {
    fn remove_signature(&mut self, signature: &Signature) -> Option<Arc<Schema>> {
        let schema = self.by_signature.remove(signature)?;
        if self.by_instance.get(&schema.instance()) == Some(signature) {
            self.by_instance.remove(&schema.instance());
        }
        Some(schema)
    }

    fn insert(&mut self, signature: Signature, schema: Arc<Schema>) {
        // A lineage owns at most one entry.
        if let Some(previous) = self.by_instance.get(&schema.instance()).copied() {
            if previous != signature {
                self.remove_signature(&previous);
            }
        }
        self.remove_signature(&signature);
        self.by_instance.insert(schema.instance(), signature);
        self.by_signature.insert(signature, schema);
    }
}

/// Signature to materialized schema mapping
#[derive(Debug, Default)]
pub struct TransientSchemaCache {
    inner: RwLock<CacheInner>,
}

impl TransientSchemaCache {
    /// Create an isolated cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every store in this process
    pub fn global() -> Arc<Self> {
        GLOBAL_CACHE.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Cached schema for a signature
    pub fn get(&self, signature: &Signature) -> Option<Arc<Schema>> {
        self.inner.read().by_signature.get(signature).cloned()
    }

    /// Whether a signature is cached
    pub fn contains(&self, signature: &Signature) -> bool {
        self.inner.read().by_signature.contains_key(signature)
    }

    /// Signature a schema lineage is currently cached under
    pub fn signature_of_instance(&self, instance: InstanceId) -> Option<Signature> {
        self.inner.read().by_instance.get(&instance).copied()
    }

    /// Return the cached schema, decoding and caching it on a miss
    ///
    /// Decoding runs outside the lock. If another thread wins the race its
    /// object is kept and returned, so every caller sees one instance.
    pub(crate) fn get_or_insert_with<F>(&self, signature: Signature, decode: F) -> CodecResult<Arc<Schema>>
    where
        F: FnOnce() -> CodecResult<Schema>,
    {
        if let Some(schema) = self.get(&signature) {
            return Ok(schema);
        }

        let decoded = Arc::new(decode()?);
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_signature.get(&signature) {
            return Ok(existing.clone());
        }
        inner.insert(signature, decoded.clone());
        Ok(decoded)
    }

    /// Cache a schema unless the signature already has an entry
    ///
    /// Returns the object that ends up cached.
    pub(crate) fn insert_if_absent(&self, signature: Signature, schema: Arc<Schema>) -> Arc<Schema> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_signature.get(&signature) {
            return existing.clone();
        }
        inner.insert(signature, schema.clone());
        schema
    }

    /// Drop the entry held by a schema lineage, returning its signature
    pub fn invalidate(&self, instance: InstanceId) -> Option<Signature> {
        let mut inner = self.inner.write();
        let signature = inner.by_instance.remove(&instance)?;
        inner.by_signature.remove(&signature);
        Some(signature)
    }

    /// Drop the entry for a signature
    pub fn remove(&self, signature: &Signature) -> Option<Arc<Schema>> {
        self.inner.write().remove_signature(signature)
    }

    /// Cached signatures, unordered
    pub fn signatures(&self) -> Vec<Signature> {
        self.inner.read().by_signature.keys().copied().collect()
    }

    /// Number of cached schemas
    pub fn len(&self) -> usize {
        self.inner.read().by_signature.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_signature.is_empty()
    }

    /// Drop everything; used at shutdown
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_signature.clear();
        inner.by_instance.clear();
    }
}
