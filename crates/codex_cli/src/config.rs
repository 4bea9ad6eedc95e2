//! Global CLI settings.
//!
//! # Responsibility
//! - Collect author, logging and tool settings from flags or environment.
//! - Turn them into the core's `EditSession` and logging init.
//!
//! # Invariants
//! - Flags win over environment variables; both are optional.
//! - Logging stays off unless a log directory is given.

use clap::Args;
use std::path::PathBuf;

use codex_core::{default_log_level, init_logging, EditSession, LoggingError};

#[derive(Debug, Clone, Args)]
pub struct GlobalOptions {
    /// User recorded as the author of edits
    #[arg(long, global = true, env = "CODEX_AUTHOR", default_value = "anonymous")]
    pub author: String,

    /// trace|debug|info|warn|error
    #[arg(long, global = true, env = "CODEX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Absolute directory for rolling log files
    #[arg(long, global = true, env = "CODEX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// ffmpeg executable used to combine audio on cell merges
    #[arg(long, global = true, env = "CODEX_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Project root that notebook and attachment paths are relative to
    #[arg(long, global = true, default_value = ".")]
    pub project_root: PathBuf,
}

impl GlobalOptions {
    pub fn session(&self) -> EditSession {
        EditSession::with_system_clock(self.author.clone())
    }

    /// Starts file logging when a log directory is configured.
    pub fn init_logging(&self) -> Result<(), LoggingError> {
        let Some(dir) = &self.log_dir else {
            return Ok(());
        };
        let level = self.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &dir.to_string_lossy())
    }
}
