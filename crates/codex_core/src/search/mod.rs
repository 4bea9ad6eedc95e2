//! Find-and-replace across notebook cells.
//!
//! # Responsibility
//! - Locate matches in cell content with plain or regex patterns.
//! - Apply replacements as tracked search/replace edits.

pub mod replace;
