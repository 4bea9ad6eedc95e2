//! Notebook domain model.
//!
//! # Responsibility
//! - Define the serialized shapes of notebooks, cells, attachments and edits.
//! - Provide field-path access used by mutators and the merge resolver.
//!
//! # Invariants
//! - Every cell is identified by a stable `metadata.id`.
//! - Deletion is represented by a soft-delete flag, not by removal.
//! - The wire format keeps the editor's camelCase field names.

pub mod cell;
pub mod edit;
pub mod notebook;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
