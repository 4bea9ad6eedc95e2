//! Core domain logic for codex notebooks.
//! Edit history, cell mutation and replica merging live here; hosts only
//! route messages and perform I/O through `repo`.

pub mod command;
pub mod document;
pub mod logging;
pub mod merge;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;
pub mod session;

pub use command::DocumentCommand;
pub use document::{
    AddCellRequest, CellDocument, CellTimestamps, ContentUpdateOptions, DocumentError,
    DocumentResult, InsertDirection, MutationOutcome,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use merge::resolver::{resolve, resolve_notebooks, resolve_with_summary, MergeError, MergeSummary};
pub use model::cell::{Attachment, Cell, CellData, CellMetadata};
pub use model::edit::{EditHistory, EditRecord, EditType, FieldPath, ValidationEntry};
pub use model::notebook::{Notebook, NotebookMetadata};
pub use repo::document_repo::{DocumentRepository, FileDocumentRepository, RepoError, RepoResult};
pub use search::replace::{find_matches, replace_all, ReplaceReport, SearchError, SearchQuery};
pub use service::audio::{AudioConcatenator, AudioMergeStatus, AudioToolError, NoAudioTool};
pub use session::{Clock, EditSession, ManualClock, SystemClock};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
