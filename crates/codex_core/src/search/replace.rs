//! Cell content search and bulk replace.
//!
//! # Responsibility
//! - Find cells whose content matches a plain or regex pattern.
//! - Rewrite matching cells through `update_cell_content` as search/replace
//!   edits.
//!
//! # Invariants
//! - Soft-deleted and merged cells are skipped unless `include_deleted`.
//! - Locked cells are never rewritten; they are reported in `skipped_locked`.
//! - Replacements do not auto-validate; only `retain_validations` carries the
//!   author's own validation forward.

use log::info;
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::document::{CellDocument, ContentUpdateOptions, DocumentError, MutationOutcome};
use crate::model::cell::Cell;
use crate::model::edit::EditType;
use crate::session::EditSession;

pub type SearchResult<T> = Result<T, SearchError>;

/// Search/replace error.
#[derive(Debug)]
pub enum SearchError {
    EmptyPattern,
    InvalidPattern(regex::Error),
    Document(DocumentError),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPattern => write!(f, "search pattern cannot be empty"),
            Self::InvalidPattern(err) => write!(f, "invalid search pattern: {err}"),
            Self::Document(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyPattern => None,
            Self::InvalidPattern(err) => Some(err),
            Self::Document(err) => Some(err),
        }
    }
}

impl From<DocumentError> for SearchError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

/// Query options for find and replace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchQuery {
    pub pattern: String,
    /// Treat `pattern` as a regular expression instead of literal text.
    pub regex: bool,
    pub case_sensitive: bool,
    /// Also search soft-deleted and merged cells.
    pub include_deleted: bool,
}

impl SearchQuery {
    pub fn plain(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: true,
            ..Self::default()
        }
    }

    fn compile(&self) -> SearchResult<Regex> {
        if self.pattern.is_empty() {
            return Err(SearchError::EmptyPattern);
        }
        let source = if self.regex {
            self.pattern.clone()
        } else {
            regex::escape(&self.pattern)
        };
        RegexBuilder::new(&source)
            .case_insensitive(!self.case_sensitive)
            .build()
            .map_err(SearchError::InvalidPattern)
    }

    fn covers(&self, cell: &Cell) -> bool {
        self.include_deleted || !(cell.is_deleted() || cell.is_merged())
    }
}

/// One cell with at least one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub cell_id: String,
    pub occurrences: usize,
}

/// Cells touched by `replace_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceReport {
    pub replaced: Vec<String>,
    pub skipped_locked: Vec<String>,
}

/// Lists matching cells in document order.
pub fn find_matches(doc: &CellDocument, query: &SearchQuery) -> SearchResult<Vec<SearchMatch>> {
    let matcher = query.compile()?;
    Ok(doc
        .cells()
        .iter()
        .filter(|cell| query.covers(cell))
        .filter_map(|cell| {
            let occurrences = matcher.find_iter(&cell.value).count();
            (occurrences > 0).then(|| SearchMatch {
                cell_id: cell.id().to_string(),
                occurrences,
            })
        })
        .collect())
}

/// Replaces every match in every covered cell.
///
/// Regex queries expand `$1`-style group references in `replacement`; plain
/// queries insert it literally.
pub fn replace_all(
    doc: &mut CellDocument,
    query: &SearchQuery,
    replacement: &str,
    retain_validations: bool,
    session: &EditSession,
) -> SearchResult<ReplaceReport> {
    let matcher = query.compile()?;
    let rewrites: Vec<(String, String)> = doc
        .cells()
        .iter()
        .filter(|cell| query.covers(cell) && matcher.is_match(&cell.value))
        .map(|cell| {
            let rewritten = if query.regex {
                matcher.replace_all(&cell.value, replacement)
            } else {
                matcher.replace_all(&cell.value, NoExpand(replacement))
            };
            (cell.id().to_string(), rewritten.into_owned())
        })
        .collect();

    let mut report = ReplaceReport::default();
    for (cell_id, value) in rewrites {
        let outcome = doc.update_cell_content(
            &cell_id,
            &value,
            EditType::UserEdit,
            ContentUpdateOptions::search_replace(retain_validations),
            session,
        )?;
        match outcome {
            MutationOutcome::Applied => report.replaced.push(cell_id),
            MutationOutcome::Locked => report.skipped_locked.push(cell_id),
            MutationOutcome::Unchanged => {}
        }
    }

    info!(
        "event=search_replace module=search status=ok regex={} replaced={} skipped_locked={}",
        query.regex,
        report.replaced.len(),
        report.skipped_locked.len()
    );
    Ok(report)
}
