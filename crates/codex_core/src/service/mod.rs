//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate document mutations, storage and the audio tool into
//!   use-case level APIs.
//! - Keep host layers decoupled from storage and tool details.

pub mod attachment_service;
pub mod audio;
pub mod cell_merge;
