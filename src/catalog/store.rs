//! Content-addressed schema store
//!
//! Persists canonical schema text under its signature. Every write path
//! recomputes the signature, so `signature == hash(text.trim())` holds for
//! every entry, and the default entry can never be touched.

use std::sync::Arc;
use tracing::{debug, warn};

use super::backend::{MemoryBackend, SchemaBackend};
use super::cache::TransientSchemaCache;
use super::codec::{self, DEFAULT_MODEL_XML, Schema};
use super::error::{StoreError, StoreResult};
use super::signature::{DEFAULT_SIGNATURE, Signature};

/// Input accepted wherever a schema may be given as text or as an object
#[derive(Debug, Clone, Copy)]
pub enum SchemaSource<'a> {
    /// Serialized schema text
    Text(&'a str),
    /// Materialized schema
    Schema(&'a Schema),
    /// Shared materialized schema; cached as-is when added
    Shared(&'a Arc<Schema>),
}

impl<'a> From<&'a str> for SchemaSource<'a> {
    fn from(text: &'a str) -> Self {
        SchemaSource::Text(text)
    }
}

impl<'a> From<&'a String> for SchemaSource<'a> {
    fn from(text: &'a String) -> Self {
        SchemaSource::Text(text)
    }
}

impl<'a> From<&'a Schema> for SchemaSource<'a> {
    fn from(schema: &'a Schema) -> Self {
        SchemaSource::Schema(schema)
    }
}

impl<'a> From<&'a Arc<Schema>> for SchemaSource<'a> {
    fn from(schema: &'a Arc<Schema>) -> Self {
        SchemaSource::Shared(schema)
    }
}

/// Durable signature to schema text mapping
#[derive(Debug)]
pub struct SchemaStore {
    backend: Box<dyn SchemaBackend>,
    cache: Arc<TransientSchemaCache>,
}

impl SchemaStore {
    /// Open a store over a backend, seeding the default entry
    pub fn open(
        backend: impl SchemaBackend + 'static,
        cache: Arc<TransientSchemaCache>,
    ) -> StoreResult<Self> {
        let store = Self {
            backend: Box::new(backend),
            cache,
        };

        let key = DEFAULT_SIGNATURE.to_hex();
        if store.backend.get(&key)?.as_deref() != Some(DEFAULT_MODEL_XML) {
            store.backend.insert(&key, DEFAULT_MODEL_XML)?;
        }

        Ok(store)
    }

    /// In-memory store with its own transient cache
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(MemoryBackend::new(), Arc::new(TransientSchemaCache::new()))
    }

    /// Transient cache used by this store
    pub fn cache(&self) -> &Arc<TransientSchemaCache> {
        &self.cache
    }

    /// Signature of a schema or schema text
    pub fn signature_of<'a>(source: impl Into<SchemaSource<'a>>) -> Signature {
        match source.into() {
            SchemaSource::Text(text) => Signature::of_text(text),
            SchemaSource::Schema(schema) => Signature::of_schema(schema),
            SchemaSource::Shared(schema) => Signature::of_schema(schema),
        }
    }

    /// Save a schema, returning its signature
    ///
    /// Materialized input is cached under the new signature after dropping
    /// whatever entry its lineage held before. Text input is decoded first,
    /// so unparsable text is rejected and never stored.
    pub fn add<'a>(&self, source: impl Into<SchemaSource<'a>>) -> StoreResult<Signature> {
        let (signature, text) = match source.into() {
            SchemaSource::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(*DEFAULT_SIGNATURE);
                }
                self.load(text)?;
                (Signature::of_text(text), text.to_string())
            }
            SchemaSource::Schema(schema) => {
                let text = codec::encode(schema);
                let signature = Signature::of_text(&text);
                self.cache_lineage(signature, || Arc::new(schema.clone()), schema);
                (signature, text)
            }
            SchemaSource::Shared(schema) => {
                let text = codec::encode(schema);
                let signature = Signature::of_text(&text);
                self.cache_lineage(signature, || schema.clone(), schema);
                (signature, text)
            }
        };

        if !signature.is_default() {
            self.write(signature, &text)?;
        }
        Ok(signature)
    }

    fn cache_lineage<F>(&self, signature: Signature, shared: F, schema: &Schema)
    where
        F: FnOnce() -> Arc<Schema>,
    {
        if signature.is_default() {
            return;
        }
        if let Some(stale) = self.cache.invalidate(schema.instance()) {
            if stale != signature {
                debug!(%stale, %signature, "Invalidated stale cached schema");
            }
        }
        self.cache.insert_if_absent(signature, shared());
    }

    fn write(&self, signature: Signature, text: &str) -> StoreResult<()> {
        let key = signature.to_hex();
        match self.backend.get(&key)? {
            Some(existing) if existing == text => return Ok(()),
            Some(_) => warn!(%signature, "Replacing stored schema text that did not match its signature"),
            None => debug!(%signature, "Storing schema"),
        }
        self.backend.insert(&key, text)?;
        Ok(())
    }

    /// Write text under an explicit signature
    ///
    /// Rejected for the default signature and whenever the signature is not
    /// the hash of the stripped text.
    pub fn set(&self, signature: &Signature, text: &str) -> StoreResult<()> {
        if signature.is_default() {
            return Err(StoreError::ProtectedKey(*signature));
        }

        let text = text.trim();
        let actual = Signature::of_text(text);
        if actual != *signature {
            return Err(StoreError::KeyMismatch {
                key: *signature,
                actual,
            });
        }

        self.load(text)?;
        self.write(actual, text)
    }

    /// Remove an entry, returning its text
    pub fn delete(&self, signature: &Signature) -> StoreResult<Option<String>> {
        if signature.is_default() {
            return Err(StoreError::ProtectedKey(*signature));
        }
        let removed = self.backend.remove(&signature.to_hex())?;
        if removed.is_some() {
            debug!(%signature, "Deleted schema");
        }
        Ok(removed)
    }

    /// Stored text for a signature
    pub fn get(&self, signature: &Signature) -> StoreResult<Option<String>> {
        Ok(self.backend.get(&signature.to_hex())?)
    }

    /// Whether a signature is stored
    pub fn contains(&self, signature: &Signature) -> StoreResult<bool> {
        Ok(self.backend.contains(&signature.to_hex())?)
    }

    /// Stored signatures in ascending order
    pub fn signatures(&self) -> StoreResult<Vec<Signature>> {
        let mut signatures = Vec::new();
        for key in self.backend.keys()? {
            match Signature::from_hex(&key) {
                Ok(signature) => signatures.push(signature),
                Err(_) => warn!(key = %key, "Skipping store key that is not a signature"),
            }
        }
        Ok(signatures)
    }

    /// Number of stored entries, the default included
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.backend.len()?)
    }

    /// Whether only the default entry is stored
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? <= 1)
    }

    /// Materialize schema text
    ///
    /// The default text yields a fresh empty schema every time. Anything else
    /// is decoded once per signature and served from the transient cache.
    /// Nothing is persisted.
    pub fn load(&self, text: &str) -> StoreResult<Arc<Schema>> {
        let text = text.trim();
        if text.is_empty() || text == DEFAULT_MODEL_XML {
            return Ok(Arc::new(Schema::new()));
        }

        let signature = Signature::of_text(text);
        Ok(self
            .cache
            .get_or_insert_with(signature, || codec::decode(text))?)
    }

    /// Materialize the schema stored under a signature, or the default
    /// schema if there is none
    pub fn load_signature(&self, signature: &Signature) -> StoreResult<Arc<Schema>> {
        if let Some(schema) = self.cache.get(signature) {
            return Ok(schema);
        }
        match self.get(signature)? {
            Some(text) => self.load(&text),
            None => self.load(DEFAULT_MODEL_XML),
        }
    }

    /// Drop the transient cache entry held by this schema object
    pub fn invalidate(&self, schema: &Schema) -> bool {
        self.cache.invalidate(schema.instance()).is_some()
    }

    /// Stored signatures whose text no longer hashes to them
    pub fn verify(&self) -> StoreResult<Vec<Signature>> {
        let mut corrupted = Vec::new();
        for signature in self.signatures()? {
            let Some(text) = self.get(&signature)? else {
                continue;
            };
            let actual = Signature::of_text(&text);
            if actual != signature {
                warn!(%signature, %actual, "Stored schema does not match its signature");
                corrupted.push(signature);
            }
        }
        Ok(corrupted)
    }
}
