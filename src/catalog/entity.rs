//! Schema-signed entities and schema contexts
//!
//! An entity records the signature of the schema it was built against.
//! Attribute reads that miss on the entity fall back to the defaults
//! declared by that schema.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::warn;
use uuid::Uuid;

use super::codec::{RESERVED_PREFIX, Schema, Value};
use super::dispatch::{SignatureAware, StaticType};
use super::error::{EntityError, EntityResult, StoreResult};
use super::signature::{DEFAULT_SIGNATURE, Signature};
use super::store::{SchemaSource, SchemaStore};

/// Plain record carrying an identity
pub static RECORD_TYPE: StaticType = StaticType {
    name: "Record",
    attributes: &["record_uid"],
};

/// Record whose structure is given by a signed schema
pub static SCHEMA_SIGNED_ENTITY_TYPE: StaticType = StaticType {
    name: "SchemaSignedEntity",
    attributes: &["record_uid", "signature"],
};

static ENTITY_TYPES: [&StaticType; 2] = [&SCHEMA_SIGNED_ENTITY_TYPE, &RECORD_TYPE];

/// Anything that may expose a schema to entities created against it
pub trait SchemaContext: Send + Sync {
    /// Schema offered to new entities, if any
    fn schema(&self) -> Option<Arc<Schema>>;

    /// Signature the offered schema is stored under, if known
    ///
    /// Entities adopt it as-is when it is stored, so they share the
    /// context's signature even when the stored text is not canonical.
    fn schema_signature(&self) -> Option<Signature> {
        None
    }
}

/// Schema resolved for a signature, kept until the signature changes
#[derive(Debug, Default)]
struct ResolvedSchema {
    slot: Mutex<Option<(Signature, Arc<Schema>)>>,
}

impl ResolvedSchema {
    fn resolve(&self, store: &SchemaStore, signature: Signature) -> StoreResult<Arc<Schema>> {
        let mut slot = self.slot.lock();
        if let Some((cached, schema)) = slot.as_ref() {
            if *cached == signature {
                return Ok(schema.clone());
            }
        }

        let schema = store.load_signature(&signature)?;
        *slot = Some((signature, schema.clone()));
        Ok(schema)
    }

    fn cached_signature(&self) -> Option<Signature> {
        self.slot.lock().as_ref().map(|(signature, _)| *signature)
    }
}

/// Context exposing the schema stored under a signature
#[derive(Debug)]
pub struct SignatureContext {
    store: Arc<SchemaStore>,
    signature: Option<Signature>,
    resolved: ResolvedSchema,
}

impl SignatureContext {
    /// Context for a signature; `None` means the default schema
    pub fn new(store: Arc<SchemaStore>, signature: Option<Signature>) -> Self {
        Self {
            store,
            signature,
            resolved: ResolvedSchema::default(),
        }
    }

    /// Signature whose schema is exposed
    pub fn signature(&self) -> Signature {
        self.signature.unwrap_or(*DEFAULT_SIGNATURE)
    }

    /// Point the context at another signature
    pub fn set_signature(&mut self, signature: Option<Signature>) {
        self.signature = signature;
    }

    /// Resolve the exposed schema
    pub fn resolve(&self) -> StoreResult<Arc<Schema>> {
        self.resolved.resolve(&self.store, self.signature())
    }
}

impl SchemaContext for SignatureContext {
    fn schema(&self) -> Option<Arc<Schema>> {
        match self.resolve() {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(signature = %self.signature(), error = %e, "Context schema unavailable");
                None
            }
        }
    }
    fn schema_signature(&self) -> Option<Signature> {
        Some(self.signature())
    }
}

/// Serializable snapshot of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Record identity
    pub record_uid: Uuid,
    /// Signature of the schema the entity is signed with
    pub signature: Option<Signature>,
    /// Explicitly assigned values
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Last time the entity was signed or assigned
    pub modified: DateTime<Utc>,
}

/// Record-like entity tagged with a schema signature
pub struct SchemaSignedEntity {
    record_uid: Uuid,
    context: Option<Weak<dyn SchemaContext>>,
    signature: Option<Signature>,
    values: BTreeMap<String, Value>,
    modified: DateTime<Utc>,
    store: Arc<SchemaStore>,
    resolved: ResolvedSchema,
}

impl SchemaSignedEntity {
    /// Create an entity with a fresh record id
    ///
    /// A context whose signature is stored hands that signature over
    /// directly. Otherwise the entity is signed with the context's schema,
    /// which also saves the schema to the store.
    pub fn new(
        store: Arc<SchemaStore>,
        context: Option<&Arc<dyn SchemaContext>>,
    ) -> StoreResult<Self> {
        Self::with_uid(store, context, None)
    }

    /// Create an entity with an explicit record id
    pub fn with_uid(
        store: Arc<SchemaStore>,
        context: Option<&Arc<dyn SchemaContext>>,
        record_uid: Option<Uuid>,
    ) -> StoreResult<Self> {
        let mut entity = Self {
            record_uid: record_uid.unwrap_or_else(Uuid::new_v4),
            context: context.map(Arc::downgrade),
            signature: None,
            values: BTreeMap::new(),
            modified: Utc::now(),
            store,
            resolved: ResolvedSchema::default(),
        };

        if let Some(context) = context {
            entity.adopt(&**context)?;
        }

        Ok(entity)
    }

    /// Sign with whatever the context exposes, preferring its signature
    fn adopt(&mut self, context: &dyn SchemaContext) -> StoreResult<()> {
        if let Some(signature) = context.schema_signature() {
            if signature.is_default() || self.store.contains(&signature)? {
                self.signature = Some(signature);
                return Ok(());
            }
        }

        if let Some(schema) = context.schema() {
            self.sign(&schema)?;
        }
        Ok(())
    }

    /// Rebuild an entity from its record without re-signing
    pub fn from_record(
        store: Arc<SchemaStore>,
        record: EntityRecord,
        context: Option<&Arc<dyn SchemaContext>>,
    ) -> Self {
        Self {
            record_uid: record.record_uid,
            context: context.map(Arc::downgrade),
            signature: record.signature,
            values: record.values,
            modified: record.modified,
            store,
            resolved: ResolvedSchema::default(),
        }
    }

    /// Snapshot for persistence
    pub fn to_record(&self) -> EntityRecord {
        EntityRecord {
            record_uid: self.record_uid,
            signature: self.signature,
            values: self.values.clone(),
            modified: self.modified,
        }
    }

    /// Record identity
    pub fn record_uid(&self) -> Uuid {
        self.record_uid
    }

    /// Parent context, if it is still alive
    pub fn context(&self) -> Option<Arc<dyn SchemaContext>> {
        self.context.as_ref().and_then(Weak::upgrade)
    }

    /// Current signature, `None` until first signed
    pub fn signature(&self) -> Option<Signature> {
        self.signature
    }

    /// Last modification time
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Explicitly assigned values
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Sign the entity with a schema, saving the schema to the store
    pub fn sign<'a>(&mut self, schema: impl Into<SchemaSource<'a>>) -> StoreResult<Signature> {
        let signature = self.store.add(schema)?;
        self.signature = Some(signature);
        self.modified = Utc::now();
        Ok(signature)
    }

    /// Schema for the current signature
    ///
    /// Resolved lazily and reused until the signature changes. Unsigned
    /// entities see the default schema.
    pub fn schema(&self) -> StoreResult<Arc<Schema>> {
        let signature = self.signature.unwrap_or(*DEFAULT_SIGNATURE);
        self.resolved.resolve(&self.store, signature)
    }

    /// Read an attribute
    ///
    /// Declared attributes first, then explicitly assigned values, then the
    /// current schema's field default. Reserved names never fall back.
    pub fn get(&self, name: &str) -> EntityResult<Value> {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(EntityError::UnknownAttribute(name.to_string()));
        }

        match name {
            "record_uid" => return Ok(Value::Text(self.record_uid.to_string())),
            "signature" => {
                return Ok(self
                    .signature
                    .map(|sig| Value::Text(sig.to_hex()))
                    .unwrap_or(Value::Null));
            }
            _ => {}
        }

        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }

        let schema = self.schema()?;
        schema
            .default_for(name)
            .cloned()
            .ok_or_else(|| EntityError::UnknownAttribute(name.to_string()))
    }

    /// Assign a field of the current schema
    pub fn set(&mut self, name: &str, value: Value) -> EntityResult<()> {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(EntityError::UnknownAttribute(name.to_string()));
        }
        if SCHEMA_SIGNED_ENTITY_TYPE.declares(name) {
            return Err(EntityError::ReadOnly(name.to_string()));
        }

        let schema = self.schema()?;
        let field = schema
            .get(name)
            .ok_or_else(|| EntityError::UnknownAttribute(name.to_string()))?;
        if value.kind().is_some_and(|kind| kind != field.kind) {
            return Err(EntityError::KindMismatch {
                field: name.to_string(),
                expected: field.kind.as_str(),
            });
        }

        self.values.insert(name.to_string(), value);
        self.modified = Utc::now();
        Ok(())
    }

    /// Drop an assigned value so reads fall back to the default again
    pub fn unset(&mut self, name: &str) -> Option<Value> {
        let previous = self.values.remove(name);
        if previous.is_some() {
            self.modified = Utc::now();
        }
        previous
    }
}

impl SignatureAware for SchemaSignedEntity {
    fn current_signature(&self) -> Option<Signature> {
        self.signature
    }

    fn static_types(&self) -> &'static [&'static StaticType] {
        &ENTITY_TYPES
    }
}

impl SchemaContext for SchemaSignedEntity {
    fn schema(&self) -> Option<Arc<Schema>> {
        match SchemaSignedEntity::schema(self) {
            Ok(schema) => Some(schema),
            Err(e) => {
                warn!(record_uid = %self.record_uid, error = %e, "Entity schema unavailable");
                None
            }
        }
    }
    fn schema_signature(&self) -> Option<Signature> {
        self.signature
    }
}

impl fmt::Debug for SchemaSignedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaSignedEntity")
            .field("record_uid", &self.record_uid)
            .field("signature", &self.signature)
            .field("values", &self.values)
            .field("modified", &self.modified)
            .field("resolved", &self.resolved.cached_signature())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::codec::{Field, FieldKind};

    const TITLE_XML: &str = "<schema><field name='title' default=''/></schema>";

    fn store() -> Arc<SchemaStore> {
        Arc::new(SchemaStore::in_memory().unwrap())
    }

    #[test]
    fn test_entity_without_context_is_unsigned() {
        let entity = SchemaSignedEntity::new(store(), None).unwrap();
        assert_eq!(entity.signature(), None);
        assert!(entity.schema().unwrap().is_empty());
        assert_eq!(entity.get("signature").unwrap(), Value::Null);
    }

    #[test]
    fn test_default_fallback_and_unknown_attribute() {
        let mut entity = SchemaSignedEntity::new(store(), None).unwrap();
        entity.sign(TITLE_XML).unwrap();

        assert_eq!(entity.get("title").unwrap(), Value::Text(String::new()));
        assert!(matches!(
            entity.get("missing"),
            Err(EntityError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_reserved_names_fail_immediately() {
        let entity = SchemaSignedEntity::new(store(), None).unwrap();
        assert!(matches!(
            entity.get("_v_schema"),
            Err(EntityError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_assigned_value_shadows_default() {
        let mut entity = SchemaSignedEntity::new(store(), None).unwrap();
        entity.sign(TITLE_XML).unwrap();

        entity.set("title", Value::Text("Hello".into())).unwrap();
        assert_eq!(entity.get("title").unwrap(), Value::Text("Hello".into()));

        assert_eq!(entity.unset("title"), Some(Value::Text("Hello".into())));
        assert_eq!(entity.get("title").unwrap(), Value::Text(String::new()));
    }

    #[test]
    fn test_set_validates_against_schema() {
        let mut entity = SchemaSignedEntity::new(store(), None).unwrap();
        let schema = Schema::with_fields([Field::new("n", FieldKind::Int)]).unwrap();
        entity.sign(&schema).unwrap();

        assert!(matches!(
            entity.set("n", Value::Text("x".into())),
            Err(EntityError::KindMismatch { .. })
        ));
        assert!(matches!(
            entity.set("other", Value::Int(1)),
            Err(EntityError::UnknownAttribute(_))
        ));
        assert!(matches!(
            entity.set("signature", Value::Null),
            Err(EntityError::ReadOnly(_))
        ));
        entity.set("n", Value::Null).unwrap();
        entity.set("n", Value::Int(4)).unwrap();
        assert_eq!(entity.get("n").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_resolved_schema_follows_resigning() {
        let mut entity = SchemaSignedEntity::new(store(), None).unwrap();
        entity.sign(TITLE_XML).unwrap();
        assert_eq!(entity.schema().unwrap().field_names(), vec!["title"]);

        let first = entity.schema().unwrap();
        assert!(Arc::ptr_eq(&first, &entity.schema().unwrap()));

        entity
            .sign("<schema><field name='body'/></schema>")
            .unwrap();
        assert_eq!(entity.schema().unwrap().field_names(), vec!["body"]);
        assert!(entity.get("title").is_err());
    }

    #[test]
    fn test_signature_context_signs_new_entities() {
        let store = store();
        let sig = store.add(TITLE_XML).unwrap();
        let context: Arc<dyn SchemaContext> =
            Arc::new(SignatureContext::new(store.clone(), Some(sig)));

        let entity = SchemaSignedEntity::new(store.clone(), Some(&context)).unwrap();
        assert_eq!(entity.signature(), Some(sig));
        assert!(entity.context().is_some());
        // No re-encoded copy is written alongside the raw text.
        assert_eq!(store.len().unwrap(), 2);
        let schema = entity.schema().unwrap();
        assert_eq!(store.cache().signature_of_instance(schema.instance()), Some(sig));
    }

    #[test]
    fn test_child_entity_shares_parent_signature() {
        let store = store();
        let sig = store.add(TITLE_XML).unwrap();
        let mut parent = SchemaSignedEntity::new(store.clone(), None).unwrap();
        parent.sign(TITLE_XML).unwrap();
        let parent: Arc<dyn SchemaContext> = Arc::new(parent);

        let child = SchemaSignedEntity::new(store.clone(), Some(&parent)).unwrap();
        assert_eq!(child.signature(), Some(sig));
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_unstored_context_signature_signs_with_exposed_schema() {
        let store = store();
        let missing = Signature::of_text("<schema><field name='gone'/></schema>");
        let context: Arc<dyn SchemaContext> =
            Arc::new(SignatureContext::new(store.clone(), Some(missing)));

        let entity = SchemaSignedEntity::new(store, Some(&context)).unwrap();
        assert_eq!(entity.signature(), Some(*DEFAULT_SIGNATURE));
    }

    #[test]
    fn test_repointed_context_resolves_new_schema() {
        let store = store();
        let title = store.add(TITLE_XML).unwrap();
        let body = store.add("<schema><field name='body'/></schema>").unwrap();

        let mut context = SignatureContext::new(store.clone(), Some(title));
        assert_eq!(context.resolve().unwrap().field_names(), vec!["title"]);

        context.set_signature(Some(body));
        assert_eq!(context.signature(), body);
        assert_eq!(context.resolve().unwrap().field_names(), vec!["body"]);

        let context: Arc<dyn SchemaContext> = Arc::new(context);
        let entity = SchemaSignedEntity::new(store, Some(&context)).unwrap();
        assert_eq!(entity.signature(), Some(body));
        assert!(entity.get("body").unwrap().is_null());
    }

    #[test]
    fn test_context_is_not_kept_alive() {
        let store = store();
        let context: Arc<dyn SchemaContext> = Arc::new(SignatureContext::new(store.clone(), None));
        let entity = SchemaSignedEntity::new(store, Some(&context)).unwrap();
        // Default context signs with the default schema.
        assert_eq!(entity.signature(), Some(*DEFAULT_SIGNATURE));
        drop(context);
        assert!(entity.context().is_none());
    }

    #[test]
    fn test_record_roundtrip_keeps_signature() {
        let store = store();
        let mut entity = SchemaSignedEntity::new(store.clone(), None).unwrap();
        entity.sign(TITLE_XML).unwrap();
        entity.set("title", Value::Text("kept".into())).unwrap();

        let json = serde_json::to_string(&entity.to_record()).unwrap();
        let record: EntityRecord = serde_json::from_str(&json).unwrap();
        let restored = SchemaSignedEntity::from_record(store, record, None);

        assert_eq!(restored.record_uid(), entity.record_uid());
        assert_eq!(restored.signature(), entity.signature());
        assert_eq!(restored.get("title").unwrap(), Value::Text("kept".into()));
    }
}
