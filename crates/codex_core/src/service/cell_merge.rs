//! Cell merge use-cases.
//!
//! # Responsibility
//! - Fold a cell into its predecessor: concatenated text on the previous cell,
//!   `merged = true` on the current one.
//! - Combine both cells' audio through the external tool when both have some.
//! - Mirror merges and cancellations into the paired source/target notebook.
//!
//! # Invariants
//! - Text and flag changes are recorded edits, so they merge across replicas
//!   like any other field.
//! - The text merge is committed before the audio step; audio failure is
//!   reported, never propagated.
//! - Cancelling a merge is another timestamped edit (`merged = false`).

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

use crate::document::{
    CellDocument, ContentUpdateOptions, DocumentError, DocumentResult, MutationOutcome,
};
use crate::merge::attachments::current_audio;
use crate::model::cell::Attachment;
use crate::model::edit::EditType;
use crate::service::audio::{AudioConcatenator, AudioMergeStatus};
use crate::session::EditSession;

const DEFAULT_AUDIO_EXTENSION: &str = "webm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CellMergeStatus {
    Merged,
    /// One of the cells is locked; nothing changed.
    Locked,
    /// The current cell is already merged; nothing changed.
    AlreadyMerged,
}

/// Result of one cell merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellMergeReport {
    pub status: CellMergeStatus,
    pub audio: AudioMergeStatus,
}

impl CellMergeReport {
    fn unchanged(status: CellMergeStatus) -> Self {
        Self {
            status,
            audio: AudioMergeStatus::NotNeeded,
        }
    }
}

/// Result of a merge mirrored into a paired notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairedMergeReport {
    pub primary: CellMergeReport,
    /// `None` when the counterpart lacks one of the cells or was not touched.
    pub counterpart: Option<CellMergeReport>,
}

/// Merges `current_id` into `previous_id`.
///
/// # Errors
/// - `CellNotFound` when either cell is missing. Audio problems are reported
///   in `CellMergeReport::audio` instead.
pub fn merge_cell_with_previous(
    doc: &mut CellDocument,
    previous_id: &str,
    current_id: &str,
    session: &EditSession,
    audio: &dyn AudioConcatenator,
) -> DocumentResult<CellMergeReport> {
    let previous = doc
        .cell(previous_id)
        .ok_or_else(|| DocumentError::CellNotFound(previous_id.to_string()))?;
    let current = doc
        .cell(current_id)
        .ok_or_else(|| DocumentError::CellNotFound(current_id.to_string()))?;

    if previous.is_locked() || current.is_locked() {
        return Ok(CellMergeReport::unchanged(CellMergeStatus::Locked));
    }
    if current.is_merged() {
        return Ok(CellMergeReport::unchanged(CellMergeStatus::AlreadyMerged));
    }

    let combined = join_content(&previous.value, &current.value);
    let first_audio = current_audio(&previous.metadata).map(|(_, attachment)| attachment.url.clone());
    let second_audio = current_audio(&current.metadata).map(|(_, attachment)| attachment.url.clone());

    doc.update_cell_content(
        previous_id,
        &combined,
        EditType::UserEdit,
        ContentUpdateOptions::default(),
        session,
    )?;
    doc.update_cell_data(current_id, &merged_flag(true), session)?;
    info!(
        "event=cell_merge module=service status=ok previous_id={} current_id={}",
        previous_id, current_id
    );

    let audio_status = match (first_audio, second_audio) {
        (Some(first), Some(second)) => {
            merge_audio(doc, previous_id, &first, &second, session, audio)
        }
        _ => AudioMergeStatus::NotNeeded,
    };

    Ok(CellMergeReport {
        status: CellMergeStatus::Merged,
        audio: audio_status,
    })
}

/// Merges in `primary` and mirrors the merge into `counterpart`.
///
/// The counterpart is only touched when the primary merge happened and both
/// cells exist there.
pub fn merge_cell_pair(
    primary: &mut CellDocument,
    counterpart: &mut CellDocument,
    previous_id: &str,
    current_id: &str,
    session: &EditSession,
    audio: &dyn AudioConcatenator,
) -> DocumentResult<PairedMergeReport> {
    let primary_report = merge_cell_with_previous(primary, previous_id, current_id, session, audio)?;
    if primary_report.status != CellMergeStatus::Merged {
        return Ok(PairedMergeReport {
            primary: primary_report,
            counterpart: None,
        });
    }

    let counterpart_report =
        if counterpart.cell(previous_id).is_some() && counterpart.cell(current_id).is_some() {
            Some(merge_cell_with_previous(
                counterpart,
                previous_id,
                current_id,
                session,
                audio,
            )?)
        } else {
            debug!(
                "event=cell_merge_mirror module=service status=skipped reason=cells_missing previous_id={} current_id={}",
                previous_id, current_id
            );
            None
        };

    Ok(PairedMergeReport {
        primary: primary_report,
        counterpart: counterpart_report,
    })
}

/// Un-merges a cell by recording `merged = false`.
pub fn cancel_merge(
    doc: &mut CellDocument,
    cell_id: &str,
    session: &EditSession,
) -> DocumentResult<MutationOutcome> {
    let cell = doc
        .cell(cell_id)
        .ok_or_else(|| DocumentError::CellNotFound(cell_id.to_string()))?;
    if !cell.is_merged() {
        return Ok(MutationOutcome::Unchanged);
    }
    doc.update_cell_data(cell_id, &merged_flag(false), session)
}

/// Cancels in `primary` and, when the cell exists there, in `counterpart`.
pub fn cancel_merge_pair(
    primary: &mut CellDocument,
    counterpart: &mut CellDocument,
    cell_id: &str,
    session: &EditSession,
) -> DocumentResult<(MutationOutcome, Option<MutationOutcome>)> {
    let primary_outcome = cancel_merge(primary, cell_id, session)?;
    let counterpart_outcome = if counterpart.cell(cell_id).is_some() {
        Some(cancel_merge(counterpart, cell_id, session)?)
    } else {
        None
    };
    Ok((primary_outcome, counterpart_outcome))
}

fn merge_audio(
    doc: &mut CellDocument,
    previous_id: &str,
    first: &str,
    second: &str,
    session: &EditSession,
    audio: &dyn AudioConcatenator,
) -> AudioMergeStatus {
    let attachment_id = format!("audio-{}", Uuid::new_v4());
    let destination = combined_audio_url(first, &attachment_id);

    if let Err(err) = audio.concat(Path::new(first), Path::new(second), Path::new(&destination)) {
        warn!(
            "event=audio_merge module=service status=error cell_id={} error={}",
            previous_id, err
        );
        return err.into();
    }

    let attachment = Attachment::audio(destination, session.author(), session.now_ms());
    let attached = doc
        .update_cell_attachment(previous_id, &attachment_id, attachment)
        .and_then(|_| doc.select_audio_attachment(previous_id, &attachment_id, session));
    match attached {
        Ok(_) => {
            info!(
                "event=audio_merge module=service status=ok cell_id={} attachment_id={}",
                previous_id, attachment_id
            );
            AudioMergeStatus::Merged { attachment_id }
        }
        Err(err) => {
            warn!(
                "event=audio_merge module=service status=error cell_id={} error={}",
                previous_id, err
            );
            AudioMergeStatus::Failed {
                reason: err.to_string(),
            }
        }
    }
}

/// Joins two cell contents with a single space, skipping empty parts.
pub fn join_content(previous: &str, current: &str) -> String {
    match (previous.trim_end(), current.trim_start()) {
        ("", current) => current.to_string(),
        (previous, "") => previous.to_string(),
        (previous, current) => format!("{previous} {current}"),
    }
}

/// Sibling of `first` named after the new attachment, same extension.
fn combined_audio_url(first: &str, attachment_id: &str) -> String {
    let extension = Path::new(first)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(DEFAULT_AUDIO_EXTENSION);
    match first.rfind('/') {
        Some(index) => format!("{}/{attachment_id}.{extension}", &first[..index]),
        None => format!("{attachment_id}.{extension}"),
    }
}

fn merged_flag(merged: bool) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("merged".to_string(), Value::Bool(merged));
    data
}
