//! Signature-aware dispatch
//!
//! An entity's effective type is its current signature's dynamic type
//! followed by the entity's static types. It is recomputed on every request
//! because re-signing changes the signature.

use std::fmt;
use std::sync::Arc;

use super::registry::{DynamicType, DynamicTypeRegistry};
use super::signature::Signature;

/// A statically declared entity type and the attributes it declares
#[derive(Debug)]
pub struct StaticType {
    /// Type name
    pub name: &'static str,
    /// Attributes every instance carries
    pub attributes: &'static [&'static str],
}

impl StaticType {
    /// Whether this type declares an attribute
    pub fn declares(&self, name: &str) -> bool {
        self.attributes.iter().any(|attribute| *attribute == name)
    }
}

/// One entry in an effective type's resolution order
#[derive(Debug, Clone)]
pub enum TypeRef {
    /// Type registered for a signature
    Dynamic(Arc<DynamicType>),
    /// Statically declared type
    Static(&'static StaticType),
}

impl TypeRef {
    /// Type name
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Dynamic(ty) => ty.name(),
            TypeRef::Static(ty) => ty.name,
        }
    }

    /// Whether the type declares an attribute or field
    pub fn declares(&self, name: &str) -> bool {
        match self {
            TypeRef::Dynamic(ty) => ty.declares(name),
            TypeRef::Static(ty) => ty.declares(name),
        }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeRef::Dynamic(a), TypeRef::Dynamic(b)) => a == b,
            (TypeRef::Static(a), TypeRef::Static(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl Eq for TypeRef {}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something whose runtime type depends on its current signature
pub trait SignatureAware {
    /// Current signature, if signed
    fn current_signature(&self) -> Option<Signature>;

    /// Statically declared types, most specific first
    fn static_types(&self) -> &'static [&'static StaticType];
}

/// Composed runtime type of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveType {
    order: Vec<TypeRef>,
}

impl EffectiveType {
    /// Effective type made of static types alone
    pub fn from_static(types: &'static [&'static StaticType]) -> Self {
        Self {
            order: types.iter().map(|ty| TypeRef::Static(*ty)).collect(),
        }
    }

    /// Types in dispatch order, dynamic type first
    pub fn resolution_order(&self) -> &[TypeRef] {
        &self.order
    }

    /// The dynamic type, if the entity is signed
    pub fn dynamic(&self) -> Option<&Arc<DynamicType>> {
        match self.order.first() {
            Some(TypeRef::Dynamic(ty)) => Some(ty),
            _ => None,
        }
    }

    /// Whether a type is part of this effective type
    pub fn provides(&self, ty: &TypeRef) -> bool {
        self.order.contains(ty)
    }

    /// Whether the dynamic type was created for this signature
    pub fn provides_signature(&self, signature: &Signature) -> bool {
        self.dynamic().is_some_and(|ty| ty.signature() == *signature)
    }

    /// Whether a static type is part of this effective type
    pub fn provides_static(&self, ty: &'static StaticType) -> bool {
        self.provides(&TypeRef::Static(ty))
    }

    /// First type in dispatch order that declares a name
    pub fn declaring(&self, name: &str) -> Option<&TypeRef> {
        self.order.iter().find(|ty| ty.declares(name))
    }

    /// Whether any type declares a name
    pub fn declares(&self, name: &str) -> bool {
        self.declaring(name).is_some()
    }
}

/// Computes effective types from a dynamic type registry
#[derive(Debug, Clone)]
pub struct SignatureAwareDispatch {
    registry: Arc<DynamicTypeRegistry>,
}

impl SignatureAwareDispatch {
    /// Create a dispatcher over a registry
    pub fn new(registry: Arc<DynamicTypeRegistry>) -> Self {
        Self { registry }
    }

    /// Registry used for dynamic types
    pub fn registry(&self) -> &Arc<DynamicTypeRegistry> {
        &self.registry
    }

    /// Current effective type of an entity
    pub fn effective_type<E>(&self, entity: &E) -> EffectiveType
    where
        E: SignatureAware + ?Sized,
    {
        let mut order = Vec::new();
        if let Some(signature) = entity.current_signature() {
            order.push(TypeRef::Dynamic(self.registry.resolve(&signature)));
        }
        order.extend(entity.static_types().iter().map(|ty| TypeRef::Static(*ty)));
        EffectiveType { order }
    }

    /// Whether an entity currently provides a type
    pub fn provided_by<E>(&self, entity: &E, ty: &TypeRef) -> bool
    where
        E: SignatureAware + ?Sized,
    {
        self.effective_type(entity).provides(ty)
    }
}
