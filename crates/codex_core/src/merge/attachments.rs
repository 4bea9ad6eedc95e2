//! Attachment reconciliation.
//!
//! # Responsibility
//! - Union two replicas' attachment maps for one cell.
//! - Pick the selected audio by `selectionTimestamp`, not by creation time.
//! - Re-derive attachment availability after files go missing or come back.
//!
//! # Invariants
//! - No attachment id present on either side is dropped.
//! - Same id on both sides: newer `updatedAt` wins; a tie keeps ours.
//! - Revalidation never touches edit history.

use std::collections::BTreeMap;

use crate::model::cell::{Attachment, Cell, CellMetadata};

/// Resolved `selectedAudioId` / `selectionTimestamp` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioSelection {
    pub selected_audio_id: Option<String>,
    pub selection_timestamp: Option<i64>,
}

impl AudioSelection {
    fn of(metadata: &CellMetadata) -> Self {
        Self {
            selected_audio_id: metadata.selected_audio_id.clone(),
            selection_timestamp: metadata.selection_timestamp,
        }
    }
}

/// Union of both attachment maps keyed by attachment id.
pub fn merge_attachment_maps(
    ours: &BTreeMap<String, Attachment>,
    theirs: &BTreeMap<String, Attachment>,
) -> BTreeMap<String, Attachment> {
    let mut merged = ours.clone();
    for (id, incoming) in theirs {
        match merged.get(id) {
            Some(existing) if incoming.updated_at <= existing.updated_at => {}
            _ => {
                merged.insert(id.clone(), incoming.clone());
            }
        }
    }
    merged
}

/// The side whose selection is newer wins; equal or absent timestamps keep ours.
pub fn resolve_selection(ours: &CellMetadata, theirs: &CellMetadata) -> AudioSelection {
    let ours_at = ours.selection_timestamp.unwrap_or(i64::MIN);
    let theirs_at = theirs.selection_timestamp.unwrap_or(i64::MIN);
    if theirs.selected_audio_id.is_some() && (theirs_at > ours_at || ours.selected_audio_id.is_none())
    {
        AudioSelection::of(theirs)
    } else {
        AudioSelection::of(ours)
    }
}

/// Writes the reconciled attachments and selection into `merged`.
pub fn reconcile_cell_attachments(
    merged: &mut CellMetadata,
    ours: &CellMetadata,
    theirs: &CellMetadata,
) {
    merged.attachments = merge_attachment_maps(&ours.attachments, &theirs.attachments);
    let selection = resolve_selection(ours, theirs);
    merged.selected_audio_id = selection.selected_audio_id;
    merged.selection_timestamp = selection.selection_timestamp;
}

/// Audio the editor should play for this cell.
///
/// The explicit selection when it is still usable, otherwise the most
/// recently updated usable audio attachment.
pub fn current_audio(metadata: &CellMetadata) -> Option<(&str, &Attachment)> {
    let selected = metadata.selected_audio_id.as_deref().and_then(|id| {
        metadata
            .attachments
            .get_key_value(id)
            .filter(|(_, attachment)| attachment.is_audio() && attachment.is_usable())
    });
    selected
        .or_else(|| {
            metadata
                .attachments
                .iter()
                .filter(|(_, attachment)| attachment.is_audio() && attachment.is_usable())
                .max_by_key(|(_, attachment)| attachment.updated_at)
        })
        .map(|(id, attachment)| (id.as_str(), attachment))
}

/// Re-checks the backing file of every non-deleted attachment.
///
/// Flips `isMissing` to match `exists(url)` and bumps `updatedAt` for the
/// attachments that changed. Returns their ids.
pub fn revalidate_attachments<F>(cell: &mut Cell, exists: F, now: i64) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let mut changed = Vec::new();
    for (id, attachment) in cell.metadata.attachments.iter_mut() {
        if attachment.is_deleted {
            continue;
        }
        let missing = !exists(&attachment.url);
        if attachment.is_missing() != missing {
            attachment.is_missing = Some(missing);
            attachment.updated_at = now;
            changed.push(id.clone());
        }
    }
    changed
}
