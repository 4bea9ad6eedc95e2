//! Notebook/attachment repository contract and filesystem implementation.
//!
//! # Responsibility
//! - Read and write notebook JSON and attachment bytes for the core use-cases.
//! - Keep filesystem details out of document, merge and service code.
//!
//! # Invariants
//! - Every path is relative to the repository root; absolute paths and `..`
//!   segments are rejected before any I/O.
//! - Notebooks are written pretty-printed with unknown fields preserved.

use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::model::notebook::Notebook;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for notebook and attachment persistence.
#[derive(Debug)]
pub enum RepoError {
    Io { path: PathBuf, source: io::Error },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidPath(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "io error at `{}`: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "invalid notebook json at `{}`: {source}", path.display())
            }
            Self::InvalidPath(path) => write!(f, "path escapes repository root: `{path}`"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::InvalidPath(_) => None,
        }
    }
}

/// Repository interface for notebook documents and their attachment files.
pub trait DocumentRepository {
    fn read_notebook(&self, relative_path: &str) -> RepoResult<Notebook>;
    fn write_notebook(&self, relative_path: &str, notebook: &Notebook) -> RepoResult<()>;
    fn write_attachment(&self, relative_path: &str, bytes: &[u8]) -> RepoResult<()>;
    fn attachment_exists(&self, relative_path: &str) -> bool;
}

/// Filesystem-backed repository rooted at a project directory.
#[derive(Debug, Clone)]
pub struct FileDocumentRepository {
    root: PathBuf,
}

impl FileDocumentRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins `relative_path` onto the root after rejecting escapes.
    pub fn resolve(&self, relative_path: &str) -> RepoResult<PathBuf> {
        let trimmed = relative_path.trim();
        if trimmed.is_empty() {
            return Err(RepoError::InvalidPath(relative_path.to_string()));
        }
        let path = Path::new(trimmed);
        let safe = path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(RepoError::InvalidPath(relative_path.to_string()));
        }
        Ok(self.root.join(path))
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> RepoResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RepoError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, bytes).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DocumentRepository for FileDocumentRepository {
    fn read_notebook(&self, relative_path: &str) -> RepoResult<Notebook> {
        let path = self.resolve(relative_path)?;
        let text = fs::read_to_string(&path).map_err(|source| RepoError::Io {
            path: path.clone(),
            source,
        })?;
        let notebook =
            Notebook::from_json_str(&text).map_err(|source| RepoError::Json { path, source })?;
        debug!(
            "event=notebook_read module=repo status=ok path={} cells={}",
            relative_path,
            notebook.cells.len()
        );
        Ok(notebook)
    }

    fn write_notebook(&self, relative_path: &str, notebook: &Notebook) -> RepoResult<()> {
        let path = self.resolve(relative_path)?;
        let text = notebook.to_json_string().map_err(|source| RepoError::Json {
            path: path.clone(),
            source,
        })?;
        self.write_bytes(&path, text.as_bytes())?;
        info!(
            "event=notebook_write module=repo status=ok path={} cells={}",
            relative_path,
            notebook.cells.len()
        );
        Ok(())
    }

    fn write_attachment(&self, relative_path: &str, bytes: &[u8]) -> RepoResult<()> {
        let path = self.resolve(relative_path)?;
        self.write_bytes(&path, bytes)?;
        info!(
            "event=attachment_write module=repo status=ok path={} bytes={}",
            relative_path,
            bytes.len()
        );
        Ok(())
    }

    fn attachment_exists(&self, relative_path: &str) -> bool {
        match self.resolve(relative_path) {
            Ok(path) => path.is_file(),
            Err(err) => {
                warn!(
                    "event=attachment_check module=repo status=rejected error={}",
                    err
                );
                false
            }
        }
    }
}
