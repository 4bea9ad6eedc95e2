//! Replica reconciliation.
//!
//! # Responsibility
//! - Merge two divergent copies of one notebook (`resolver`).
//! - Reconcile per-cell attachment sets and audio selection (`attachments`).
//!
//! # Invariants
//! - Merging never performs I/O; binary side effects belong to services.

pub mod attachments;
pub mod resolver;
