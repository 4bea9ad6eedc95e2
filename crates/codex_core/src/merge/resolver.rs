//! Notebook merge resolver.
//!
//! # Responsibility
//! - Reconcile two replicas ("ours", "theirs") of one notebook into a single
//!   deterministic notebook.
//! - Resolve every tracked field by most-recent-wins over the union of both
//!   edit histories.
//!
//! # Invariants
//! - Pure: no I/O, no randomness, no shared state. Safe to run concurrently.
//! - No edit record from either side is dropped; exact duplicates collapse.
//! - Winners follow `EditRecord::precedence_cmp`, so neither the side a record
//!   came from nor its position in the list changes the outcome.
//! - Cells pair up by id and occurrence; id-less or repeated cells are never
//!   dropped. Cells present on only one side are carried over unchanged; a
//!   cell absent from both inputs is absent from the output.
//! - Re-running the resolver on its own output is a no-op.

use log::{info, warn};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

use super::attachments::reconcile_cell_attachments;
use crate::model::cell::Cell;
use crate::model::edit::{EditHistory, EditRecord, FieldPath};
use crate::model::notebook::{Notebook, NotebookMetadata};

/// Which replica an input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ours,
    Theirs,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Raised only for inputs that are not notebooks at all.
#[derive(Debug)]
pub enum MergeError {
    Parse {
        side: Side,
        source: serde_json::Error,
    },
    Serialize(serde_json::Error),
}

impl Display for MergeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { side, source } => write!(f, "failed to parse {side} notebook: {source}"),
            Self::Serialize(err) => write!(f, "failed to serialize merged notebook: {err}"),
        }
    }
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse { source, .. } => Some(source),
            Self::Serialize(err) => Some(err),
        }
    }
}

/// Counts reported for one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub shared_cells: usize,
    pub ours_only_cells: usize,
    pub theirs_only_cells: usize,
    /// Shared cells whose merged form differs from ours.
    pub cells_changed: usize,
}

/// Merges two serialized notebooks into one serialized notebook.
///
/// # Errors
/// - `MergeError::Parse` when either input is not a notebook document.
pub fn resolve(ours: &str, theirs: &str) -> Result<String, MergeError> {
    let ours = Notebook::from_json_str(ours).map_err(|source| MergeError::Parse {
        side: Side::Ours,
        source,
    })?;
    let theirs = Notebook::from_json_str(theirs).map_err(|source| MergeError::Parse {
        side: Side::Theirs,
        source,
    })?;
    resolve_notebooks(&ours, &theirs)
        .to_json_string()
        .map_err(MergeError::Serialize)
}

/// Merges two parsed notebooks.
pub fn resolve_notebooks(ours: &Notebook, theirs: &Notebook) -> Notebook {
    resolve_with_summary(ours, theirs).0
}

/// Identity of a cell within one notebook: its id and how many earlier cells
/// carry the same id.
type CellKey<'a> = (&'a str, usize);

fn cell_keys(notebook: &Notebook, side: Side) -> Vec<CellKey<'_>> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    notebook
        .cells
        .iter()
        .map(|cell| {
            let occurrence = seen.entry(cell.id()).or_insert(0);
            if *occurrence == 1 && !cell.id().is_empty() {
                warn!(
                    "event=notebook_merge module=merge status=duplicate_id side={} cell_id={}",
                    side,
                    cell.id()
                );
            }
            let key = (cell.id(), *occurrence);
            *occurrence += 1;
            key
        })
        .collect()
}

/// Merges two parsed notebooks and reports what happened.
pub fn resolve_with_summary(ours: &Notebook, theirs: &Notebook) -> (Notebook, MergeSummary) {
    let mut summary = MergeSummary::default();

    let ours_keys = cell_keys(ours, Side::Ours);
    let theirs_keys = cell_keys(theirs, Side::Theirs);
    let theirs_by_key: HashMap<CellKey<'_>, &Cell> = theirs_keys
        .iter()
        .copied()
        .zip(theirs.cells.iter())
        .collect();
    let ours_key_set: HashSet<CellKey<'_>> = ours_keys.iter().copied().collect();

    let capacity = ours.cells.len() + theirs.cells.len();
    let mut cells: Vec<Cell> = Vec::with_capacity(capacity);
    let mut placed: Vec<CellKey<'_>> = Vec::with_capacity(capacity);
    for (key, cell) in ours_keys.iter().zip(&ours.cells) {
        match theirs_by_key.get(key) {
            Some(their_cell) => {
                summary.shared_cells += 1;
                let merged = merge_cell(cell, their_cell);
                if merged != *cell {
                    summary.cells_changed += 1;
                }
                cells.push(merged);
            }
            None => {
                summary.ours_only_cells += 1;
                cells.push(cell.clone());
            }
        }
        placed.push(*key);
    }

    // Theirs-only cells go right after the closest preceding cell (in theirs'
    // order) that is already placed, or first when there is none.
    let mut anchor: Option<CellKey<'_>> = None;
    for (key, cell) in theirs_keys.iter().zip(&theirs.cells) {
        if !ours_key_set.contains(key) {
            summary.theirs_only_cells += 1;
            let index = anchor
                .and_then(|anchor| placed.iter().position(|slot| *slot == anchor))
                .map_or(0, |position| position + 1);
            cells.insert(index, cell.clone());
            placed.insert(index, *key);
        }
        anchor = Some(*key);
    }

    let metadata = merge_notebook_metadata(&ours.metadata, &theirs.metadata);
    let mut extra = ours.extra.clone();
    fill_missing(&mut extra, &theirs.extra);

    info!(
        "event=notebook_merge module=merge status=ok shared={} ours_only={} theirs_only={} changed={}",
        summary.shared_cells,
        summary.ours_only_cells,
        summary.theirs_only_cells,
        summary.cells_changed
    );

    (
        Notebook {
            cells,
            metadata,
            extra,
        },
        summary,
    )
}

/// Merges one cell present on both sides.
pub fn merge_cell(ours: &Cell, theirs: &Cell) -> Cell {
    let history = merge_histories(&ours.metadata.edits, &theirs.metadata.edits);

    let mut merged = ours.clone();
    merged.metadata.edits = EditHistory::new();
    fill_cell_gaps(&mut merged, theirs);

    for path in history.field_paths() {
        if path.starts_with(&["metadata", "attachments"]) {
            continue;
        }
        let Some(winner) = history.latest_for(path) else {
            continue;
        };
        if let Err(err) = merged.set_field(path, winner.value.clone()) {
            warn!(
                "event=field_merge module=merge status=skipped cell_id={} path={} error={}",
                ours.id(),
                path,
                err
            );
        }
    }

    reconcile_cell_attachments(&mut merged.metadata, &ours.metadata, &theirs.metadata);
    merged.metadata.edits = history;
    merged
}

/// Union of two histories, stably ordered by timestamp.
///
/// Exact duplicates (same path, timestamp and value) collapse into one record
/// whose validators are merged. Which record wins a path is left to
/// `EditRecord::precedence_cmp`, so the result does not depend on input order.
pub fn merge_histories(ours: &EditHistory, theirs: &EditHistory) -> EditHistory {
    let mut records: Vec<EditRecord> = Vec::with_capacity(ours.len() + theirs.len());
    let mut by_key: HashMap<(i64, FieldPath), Vec<usize>> = HashMap::new();

    for record in ours.iter().chain(theirs.iter()) {
        let key = (record.timestamp, record.field_path.clone());
        let slots = by_key.entry(key).or_default();
        match slots.iter().find(|&&slot| records[slot].is_same_edit(record)) {
            Some(&slot) => records[slot].merge_validators(&record.validated_by),
            None => {
                slots.push(records.len());
                records.push(record.clone());
            }
        }
    }

    records.sort_by_key(|record| record.timestamp);
    EditHistory::from(records)
}

fn merge_notebook_metadata(ours: &NotebookMetadata, theirs: &NotebookMetadata) -> NotebookMetadata {
    let history = merge_histories(&ours.edits, &theirs.edits);
    let mut merged = NotebookMetadata {
        edits: EditHistory::new(),
        fields: ours.fields.clone(),
    };
    fill_missing(&mut merged.fields, &theirs.fields);
    for path in history.field_paths() {
        if let Some(winner) = history.latest_for(path) {
            if !merged.set_field(path, winner.value.clone()) {
                warn!(
                    "event=field_merge module=merge status=skipped scope=notebook path={}",
                    path
                );
            }
        }
    }
    merged.edits = history;
    merged
}

/// Fills fields only theirs has; tracked fields are overwritten afterwards.
fn fill_cell_gaps(merged: &mut Cell, theirs: &Cell) {
    if merged.value.is_empty() {
        merged.value.clone_from(&theirs.value);
    }
    let metadata = &mut merged.metadata;
    let their_metadata = &theirs.metadata;
    if metadata.cell_type.is_none() {
        metadata.cell_type.clone_from(&their_metadata.cell_type);
    }
    if metadata.cell_label.is_none() {
        metadata.cell_label.clone_from(&their_metadata.cell_label);
    }
    let data = &mut metadata.data;
    let their_data = &their_metadata.data;
    if data.start_time.is_none() {
        data.start_time.clone_from(&their_data.start_time);
    }
    if data.end_time.is_none() {
        data.end_time.clone_from(&their_data.end_time);
    }
    data.deleted = data.deleted.or(their_data.deleted);
    data.merged = data.merged.or(their_data.merged);
    fill_missing(&mut data.extra, &their_data.extra);
    fill_missing(&mut metadata.extra, &their_metadata.extra);
    fill_missing(&mut merged.extra, &theirs.extra);
}

fn fill_missing(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}
