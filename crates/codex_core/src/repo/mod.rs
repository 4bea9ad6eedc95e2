//! Repository layer: persistence of notebooks and attachment files.
//!
//! # Responsibility
//! - Define the storage contract the services depend on.
//! - Isolate filesystem details from document and merge logic.
//!
//! # Invariants
//! - Only this layer performs I/O; the rest of core is pure.

pub mod document_repo;
