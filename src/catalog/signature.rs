//! Schema signatures
//!
//! A signature is the Blake3 digest of a schema's canonical text with
//! surrounding whitespace stripped. It names the schema in the store, the
//! transient cache and the type registry.

use blake3::Hasher;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use super::codec::{self, DEFAULT_MODEL_XML, Schema};
use super::error::SignatureError;

/// Prefix of dynamic type names derived from a signature
pub const TYPE_NAME_PREFIX: &str = "I";

/// Signature of the built-in empty schema. Its store entry is immutable.
pub static DEFAULT_SIGNATURE: LazyLock<Signature> =
    LazyLock::new(|| Signature::of_text(DEFAULT_MODEL_XML));

/// Content hash of a schema's canonical text
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 32]);

impl Signature {
    /// Hash schema text; leading and trailing whitespace is ignored
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(text.trim().as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash the canonical encoding of a materialized schema
    pub fn of_schema(schema: &Schema) -> Self {
        Self::of_text(&codec::encode(schema))
    }

    /// Parse a 64 character hex digest
    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        blake3::Hash::from_hex(hex)
            .map(|hash| Self(*hash.as_bytes()))
            .map_err(|_| SignatureError::InvalidHex(hex.to_string()))
    }

    /// Lowercase hex rendering, the form used as a storage key
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether this is the reserved default signature
    pub fn is_default(&self) -> bool {
        *self == *DEFAULT_SIGNATURE
    }

    /// Name of the dynamic type registered for this signature
    pub fn type_name(&self) -> String {
        format!("{}{}", TYPE_NAME_PREFIX, self.to_hex())
    }

    /// Recover a signature from a dynamic type name
    pub fn from_type_name(name: &str) -> Option<Self> {
        name.strip_prefix(TYPE_NAME_PREFIX)
            .and_then(|hex| Self::from_hex(hex).ok())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.trim())
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
