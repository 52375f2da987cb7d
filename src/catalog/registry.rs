//! Dynamic type registry keyed by schema signature
//!
//! Lazily materializes one [`DynamicType`] per signature and hands out the
//! same object for the rest of the process. Dispatch compares types by
//! identity, so creation is serialized behind a mutex while reads of
//! registered types only take a shared lock.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::codec::{Schema, Value};
use super::signature::Signature;
use super::store::SchemaStore;

static NEXT_TYPE_KEY: AtomicU64 = AtomicU64::new(1);

/// Runtime type materialized for a signature
///
/// Equality is identity: two descriptors are equal only if they are the same
/// registered type.
#[derive(Debug)]
pub struct DynamicType {
    key: u64,
    name: String,
    signature: Signature,
    schema: Option<Arc<Schema>>,
}

impl DynamicType {
    /// Type backed by a materialized schema
    pub fn from_schema(signature: Signature, schema: Arc<Schema>) -> Self {
        Self {
            key: NEXT_TYPE_KEY.fetch_add(1, Ordering::Relaxed),
            name: signature.type_name(),
            signature,
            schema: Some(schema),
        }
    }

    /// Anonymous marker type for a signature whose schema is unavailable
    pub fn placeholder(signature: Signature) -> Self {
        Self {
            key: NEXT_TYPE_KEY.fetch_add(1, Ordering::Relaxed),
            name: signature.type_name(),
            signature,
            schema: None,
        }
    }

    /// Identity key, unique per created type
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Type name, `I` followed by the hex signature
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signature this type was created for
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Backing schema, `None` for placeholders
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Whether this is a placeholder
    pub fn is_placeholder(&self) -> bool {
        self.schema.is_none()
    }

    /// Field names declared by this type, in order
    pub fn field_names(&self) -> Vec<&str> {
        self.schema
            .as_ref()
            .map(|schema| schema.field_names())
            .unwrap_or_default()
    }

    /// Whether this type declares a field
    pub fn declares(&self, name: &str) -> bool {
        self.schema.as_ref().is_some_and(|schema| schema.contains(name))
    }

    /// Default value for a declared field
    pub fn field_default(&self, name: &str) -> Option<&Value> {
        self.schema.as_ref()?.default_for(name)
    }
}

impl PartialEq for DynamicType {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DynamicType {}

impl fmt::Display for DynamicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Factory building the type for a signature on first request
pub type TypeFactory = Arc<dyn Fn(&Signature) -> DynamicType + Send + Sync>;

/// Factory that materializes types from a schema store
///
/// Falls back to a placeholder, with a warning, when the signature is not
/// stored or its text cannot be read or decoded.
pub fn store_type_factory(store: Arc<SchemaStore>) -> TypeFactory {
    Arc::new(move |signature: &Signature| {
        if let Some(schema) = store.cache().get(signature) {
            return DynamicType::from_schema(*signature, schema);
        }

        match store.get(signature) {
            Ok(Some(text)) => match store.load(&text) {
                Ok(schema) => DynamicType::from_schema(*signature, schema),
                Err(e) => {
                    warn!(%signature, error = %e, "Unable to decode dynamic schema; using placeholder");
                    DynamicType::placeholder(*signature)
                }
            },
            Ok(None) => {
                warn!(%signature, "Unable to obtain dynamic schema from store; using placeholder");
                DynamicType::placeholder(*signature)
            }
            Err(e) => {
                warn!(%signature, error = %e, "Schema store unavailable; using placeholder");
                DynamicType::placeholder(*signature)
            }
        }
    })
}

/// Signature to dynamic type registry
pub struct DynamicTypeRegistry {
    types: RwLock<HashMap<Signature, Arc<DynamicType>>>,
    create_lock: Mutex<()>,
    factory: TypeFactory,
}

impl DynamicTypeRegistry {
    /// Registry materializing types from a schema store
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self::with_factory(store_type_factory(store))
    }

    /// Registry with a custom factory
    pub fn with_factory(factory: TypeFactory) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            factory,
        }
    }

    /// Type for a signature, creating it on first request
    ///
    /// Never fails: unknown signatures get a placeholder type. Concurrent
    /// first requests for one signature all receive the same object.
    pub fn resolve(&self, signature: &Signature) -> Arc<DynamicType> {
        if let Some(ty) = self.get(signature) {
            return ty;
        }

        let _guard = self.create_lock.lock();
        if let Some(ty) = self.get(signature) {
            return ty;
        }

        let ty = Arc::new((self.factory)(signature));
        debug!(%signature, placeholder = ty.is_placeholder(), "Registered dynamic type");
        self.types.write().insert(*signature, ty.clone());
        ty
    }

    /// Registered type for a signature, without creating one
    pub fn get(&self, signature: &Signature) -> Option<Arc<DynamicType>> {
        self.types.read().get(signature).cloned()
    }

    /// Whether a type has been registered for a signature
    pub fn contains(&self, signature: &Signature) -> bool {
        self.types.read().contains_key(signature)
    }

    /// Signatures with a registered type, unordered
    pub fn signatures(&self) -> Vec<Signature> {
        self.types.read().keys().copied().collect()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether no type has been registered
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Forget every registered type; used at shutdown
    pub fn clear(&self) {
        let _guard = self.create_lock.lock();
        self.types.write().clear();
    }
}

impl fmt::Debug for DynamicTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicTypeRegistry")
            .field("types", &self.len())
            .finish_non_exhaustive()
    }
}
