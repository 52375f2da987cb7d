//! Error types for the schema catalog
//!
//! Each concern gets its own thiserror enum and result alias; the catalog
//! facade rolls them up into [`CatalogError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::signature::Signature;

/// Top-level catalog error
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Schema store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Entity attribute errors
    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while decoding or building a schema
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Text is not well-formed XML
    #[error("could not parse field schema xml: {0}")]
    Malformed(String),

    /// An element appeared where it is not allowed
    #[error("Unexpected element <{found}>, expected <{expected}>")]
    UnexpectedElement {
        /// Element name the decoder expected
        expected: &'static str,
        /// Element name found in the document
        found: String,
    },

    /// A required attribute is missing
    #[error("Element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Element name
        element: &'static str,
        /// Attribute name
        attribute: &'static str,
    },

    /// Field type is not one of the known kinds
    #[error("Unknown type '{kind}' for field '{field}'")]
    UnknownFieldType {
        /// Field name
        field: String,
        /// Offending type name
        kind: String,
    },

    /// A default or flag could not be parsed
    #[error("Invalid value '{raw}' for {what} of field '{field}'")]
    InvalidValue {
        /// Field name
        field: String,
        /// Which part of the field was being parsed
        what: &'static str,
        /// Raw text that failed to parse
        raw: String,
    },

    /// Two fields share a name
    #[error("Duplicate field '{0}'")]
    DuplicateField(String),

    /// Field name is empty or uses the reserved prefix
    #[error("Invalid field name '{0}'")]
    InvalidFieldName(String),

    /// Text contains characters XML 1.0 cannot carry
    #[error("Field '{0}' contains characters that cannot be serialized")]
    InvalidCharacter(String),

    /// Default value does not match the field kind
    #[error("Default for field '{field}' does not match kind {kind}")]
    KindMismatch {
        /// Field name
        field: String,
        /// Declared kind
        kind: &'static str,
    },
}

/// Convenience result alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors parsing a signature from its text form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Not a 64 character hex digest
    #[error("Invalid signature '{0}'")]
    InvalidHex(String),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// Key cannot be mapped onto the backend
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// Stored bytes are not valid text
    #[error("Entry '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    /// Config file error
    #[error("Config file error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Schema store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Schema text could not be decoded
    #[error("Schema parse error: {0}")]
    Parse(#[from] CodecError),

    /// Attempt to mutate or remove the default entry
    #[error("Default schema {0} cannot be modified or removed")]
    ProtectedKey(Signature),

    /// Keyed write whose key is not the hash of its value
    #[error("Key {key} does not match signature {actual} of value")]
    KeyMismatch {
        /// Key supplied by the caller
        key: Signature,
        /// Signature computed from the value
        actual: Signature,
    },

    /// Backend failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Convenience result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entity attribute errors
#[derive(Debug, Error)]
pub enum EntityError {
    /// Name is neither declared nor a field of the current schema
    #[error("Unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// Declared attribute that cannot be assigned
    #[error("Attribute '{0}' is read-only")]
    ReadOnly(String),

    /// Assigned value does not match the field kind
    #[error("Value for '{field}' must be {expected}")]
    KindMismatch {
        /// Field name
        field: String,
        /// Declared kind
        expected: &'static str,
    },

    /// Schema resolution failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience result alias for entity operations
pub type EntityResult<T> = std::result::Result<T, EntityError>;

/// Result type using CatalogError
pub type Result<T> = std::result::Result<T, CatalogError>;
