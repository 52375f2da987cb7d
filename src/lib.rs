//! Dynschema – content-addressed dynamic schemas
//!
//! This crate lets records carry their structure as data:
//! - Schemas are stored as canonical text keyed by the hash of that text
//! - Decoded schemas are cached per signature for the life of the process
//! - One runtime type is materialized per signature, lazily and exactly once
//! - An entity's effective type combines its static types with the dynamic
//!   type of its current signature
//! - Undeclared attribute reads fall back to schema field defaults

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Schema store, caches, registry, dispatch and entities
pub mod catalog;

// Re-export key types for convenience
pub use catalog::{Catalog, CatalogConfig};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
