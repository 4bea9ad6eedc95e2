//! `codex` command-line entry point.
//!
//! # Responsibility
//! - Expose the notebook resolver as a Git merge driver.
//! - Run cell-merge and attachment maintenance over notebooks on disk.
//!
//! # Invariants
//! - All edits are attributed to `--author`.
//! - `merge-driver` writes the merged notebook into the `ours` file and exits 0;
//!   unparseable inputs exit 1 so Git reports a conflict.

mod config;
mod ffmpeg;

use clap::{Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use codex_core::service::attachment_service::revalidate_missing_attachments;
use codex_core::service::cell_merge::{
    cancel_merge, cancel_merge_pair, merge_cell_pair, merge_cell_with_previous,
};
use codex_core::{
    resolve, CellDocument, DocumentError, DocumentRepository, FileDocumentRepository, LoggingError,
    MergeError, RepoError,
};

use crate::config::GlobalOptions;
use crate::ffmpeg::FfmpegConcatenator;

#[derive(Parser)]
#[command(name = "codex")]
#[command(version)]
#[command(about = "Edit-history aware tools for codex notebooks", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge two replicas of a notebook and print or write the result
    Resolve {
        ours: PathBuf,
        theirs: PathBuf,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Git merge driver: `codex merge-driver %O %A %B`
    MergeDriver {
        /// Common ancestor; unused, history carries the causality
        base: PathBuf,
        ours: PathBuf,
        theirs: PathBuf,
    },

    /// Merge a cell into the cell before it
    MergeCells {
        /// Notebook path relative to the project root
        notebook: String,
        previous: String,
        current: String,
        /// Paired source/target notebook to mirror the merge into
        #[arg(long)]
        paired: Option<String>,
    },

    /// Undo a cell merge
    CancelMerge {
        notebook: String,
        cell: String,
        #[arg(long)]
        paired: Option<String>,
    },

    /// Re-check attachment files and flag the missing ones
    RevalidateAttachments { notebook: String },

    /// Print the core version
    Version,
}

#[derive(Debug)]
enum CliError {
    Io { path: PathBuf, source: std::io::Error },
    Merge(MergeError),
    Document(DocumentError),
    Repo(RepoError),
    Logging(LoggingError),
    Output(serde_json::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Merge(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Output(err) => write!(f, "failed to encode output: {err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Merge(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Output(err) => Some(err),
        }
    }
}

impl From<MergeError> for CliError {
    fn from(value: MergeError) -> Self {
        Self::Merge(value)
    }
}

impl From<DocumentError> for CliError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<RepoError> for CliError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<LoggingError> for CliError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_command module=cli status=error error={}", err);
            eprintln!("codex: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let options = cli.options;
    options.init_logging()?;

    match cli.command {
        Commands::Resolve {
            ours,
            theirs,
            output,
        } => {
            let merged = resolve(&read_text(&ours)?, &read_text(&theirs)?)?;
            match output {
                Some(path) => write_text(&path, &merged),
                None => {
                    println!("{merged}");
                    Ok(())
                }
            }
        }
        Commands::MergeDriver { base, ours, theirs } => {
            let merged = resolve(&read_text(&ours)?, &read_text(&theirs)?)?;
            write_text(&ours, &merged)?;
            info!(
                "event=merge_driver module=cli status=ok base={} ours={}",
                base.display(),
                ours.display()
            );
            Ok(())
        }
        Commands::MergeCells {
            notebook,
            previous,
            current,
            paired,
        } => {
            let repo = FileDocumentRepository::new(&options.project_root);
            let audio = FfmpegConcatenator::new(&options.ffmpeg, &options.project_root);
            let session = options.session();
            let mut doc = CellDocument::new(repo.read_notebook(&notebook)?);
            match paired {
                Some(paired) => {
                    let mut counterpart = CellDocument::new(repo.read_notebook(&paired)?);
                    let report = merge_cell_pair(
                        &mut doc,
                        &mut counterpart,
                        &previous,
                        &current,
                        &session,
                        &audio,
                    )?;
                    repo.write_notebook(&notebook, doc.notebook())?;
                    repo.write_notebook(&paired, counterpart.notebook())?;
                    print_json(&report)
                }
                None => {
                    let report =
                        merge_cell_with_previous(&mut doc, &previous, &current, &session, &audio)?;
                    repo.write_notebook(&notebook, doc.notebook())?;
                    print_json(&report)
                }
            }
        }
        Commands::CancelMerge {
            notebook,
            cell,
            paired,
        } => {
            let repo = FileDocumentRepository::new(&options.project_root);
            let session = options.session();
            let mut doc = CellDocument::new(repo.read_notebook(&notebook)?);
            match paired {
                Some(paired) => {
                    let mut counterpart = CellDocument::new(repo.read_notebook(&paired)?);
                    let outcomes = cancel_merge_pair(&mut doc, &mut counterpart, &cell, &session)?;
                    repo.write_notebook(&notebook, doc.notebook())?;
                    repo.write_notebook(&paired, counterpart.notebook())?;
                    print_json(&outcomes)
                }
                None => {
                    let outcome = cancel_merge(&mut doc, &cell, &session)?;
                    repo.write_notebook(&notebook, doc.notebook())?;
                    print_json(&outcome)
                }
            }
        }
        Commands::RevalidateAttachments { notebook } => {
            let repo = FileDocumentRepository::new(&options.project_root);
            let session = options.session();
            let mut doc = CellDocument::new(repo.read_notebook(&notebook)?);
            let changed = revalidate_missing_attachments(&mut doc, &repo, &session);
            if !changed.is_empty() {
                repo.write_notebook(&notebook, doc.notebook())?;
            }
            print_json(&changed)
        }
        Commands::Version => {
            println!("codex_core version={}", codex_core::core_version());
            Ok(())
        }
    }
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_text(path: &Path, text: &str) -> Result<(), CliError> {
    fs::write(path, text).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::Output)?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
