//! Serializable command API over `CellDocument`.
//!
//! # Responsibility
//! - Give host message routers one tagged-union entry point for every
//!   document mutator.
//! - Dispatch commands by pattern match; no string-keyed handler tables.
//!
//! # Invariants
//! - Each variant maps to exactly one mutator and returns its outcome as-is.
//! - Wire shape is `{"type": "<Variant>", "params": {...}}` with camelCase
//!   parameter names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{
    AddCellRequest, CellDocument, CellTimestamps, ContentUpdateOptions, DocumentResult,
    MutationOutcome,
};
use crate::model::cell::Attachment;
use crate::model::edit::EditType;
use crate::service::cell_merge::cancel_merge;
use crate::session::EditSession;

/// Every mutation a host may request on an open notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "params",
    rename_all_fields = "camelCase"
)]
pub enum DocumentCommand {
    UpdateCellContent {
        cell_id: String,
        value: String,
        #[serde(default = "default_edit_type")]
        edit_type: EditType,
        #[serde(default)]
        options: ContentUpdateOptions,
    },
    UpdateCellLabel {
        cell_id: String,
        label: String,
    },
    UpdateCellTimestamps {
        cell_id: String,
        timestamps: CellTimestamps,
    },
    UpdateCellData {
        cell_id: String,
        data: Map<String, Value>,
    },
    UpdateCellAttachment {
        cell_id: String,
        attachment_id: String,
        attachment: Attachment,
    },
    UpdateCellIsLocked {
        cell_id: String,
        is_locked: bool,
    },
    AddCell(AddCellRequest),
    SoftDeleteCell {
        cell_id: String,
    },
    RestoreCell {
        cell_id: String,
    },
    /// Hard delete from this replica.
    DeleteCell {
        cell_id: String,
    },
    SelectAudioAttachment {
        cell_id: String,
        attachment_id: String,
    },
    ValidateCellContent {
        cell_id: String,
        validate: bool,
    },
    UpdateNotebookMetadata {
        key: String,
        value: Value,
    },
    CancelMerge {
        cell_id: String,
    },
}

fn default_edit_type() -> EditType {
    EditType::UserEdit
}

impl DocumentCommand {
    /// Variant name as it appears in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateCellContent { .. } => "UpdateCellContent",
            Self::UpdateCellLabel { .. } => "UpdateCellLabel",
            Self::UpdateCellTimestamps { .. } => "UpdateCellTimestamps",
            Self::UpdateCellData { .. } => "UpdateCellData",
            Self::UpdateCellAttachment { .. } => "UpdateCellAttachment",
            Self::UpdateCellIsLocked { .. } => "UpdateCellIsLocked",
            Self::AddCell(_) => "AddCell",
            Self::SoftDeleteCell { .. } => "SoftDeleteCell",
            Self::RestoreCell { .. } => "RestoreCell",
            Self::DeleteCell { .. } => "DeleteCell",
            Self::SelectAudioAttachment { .. } => "SelectAudioAttachment",
            Self::ValidateCellContent { .. } => "ValidateCellContent",
            Self::UpdateNotebookMetadata { .. } => "UpdateNotebookMetadata",
            Self::CancelMerge { .. } => "CancelMerge",
        }
    }
}

impl CellDocument {
    /// Runs one command against this document.
    pub fn execute(
        &mut self,
        command: DocumentCommand,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let name = command.name();
        let outcome = match command {
            DocumentCommand::UpdateCellContent {
                cell_id,
                value,
                edit_type,
                options,
            } => self.update_cell_content(&cell_id, &value, edit_type, options, session),
            DocumentCommand::UpdateCellLabel { cell_id, label } => {
                self.update_cell_label(&cell_id, &label, session)
            }
            DocumentCommand::UpdateCellTimestamps {
                cell_id,
                timestamps,
            } => self.update_cell_timestamps(&cell_id, timestamps, session),
            DocumentCommand::UpdateCellData { cell_id, data } => {
                self.update_cell_data(&cell_id, &data, session)
            }
            DocumentCommand::UpdateCellAttachment {
                cell_id,
                attachment_id,
                attachment,
            } => self.update_cell_attachment(&cell_id, &attachment_id, attachment),
            DocumentCommand::UpdateCellIsLocked { cell_id, is_locked } => {
                self.update_cell_is_locked(&cell_id, is_locked, session)
            }
            DocumentCommand::AddCell(request) => self.add_cell(request, session),
            DocumentCommand::SoftDeleteCell { cell_id } => self.soft_delete_cell(&cell_id, session),
            DocumentCommand::RestoreCell { cell_id } => self.restore_cell(&cell_id, session),
            DocumentCommand::DeleteCell { cell_id } => self.delete_cell(&cell_id),
            DocumentCommand::SelectAudioAttachment {
                cell_id,
                attachment_id,
            } => self.select_audio_attachment(&cell_id, &attachment_id, session),
            DocumentCommand::ValidateCellContent { cell_id, validate } => {
                self.validate_cell_content(&cell_id, validate, session)
            }
            DocumentCommand::UpdateNotebookMetadata { key, value } => {
                self.update_notebook_metadata(&key, value, session)
            }
            DocumentCommand::CancelMerge { cell_id } => cancel_merge(self, &cell_id, session),
        };
        match &outcome {
            Ok(result) => log::debug!(
                "event=command_execute module=command status=ok command={} outcome={:?}",
                name,
                result
            ),
            Err(err) => log::warn!(
                "event=command_execute module=command status=error command={} error={}",
                name,
                err
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentCommand;
    use crate::model::edit::EditType;
    use serde_json::json;

    #[test]
    fn content_command_defaults_to_user_edit() {
        let command: DocumentCommand = serde_json::from_value(json!({
            "type": "UpdateCellContent",
            "params": {"cellId": "GEN 1:1", "value": "In the beginning"}
        }))
        .expect("command should parse");

        match command {
            DocumentCommand::UpdateCellContent {
                edit_type, options, ..
            } => {
                assert_eq!(edit_type, EditType::UserEdit);
                assert!(options.should_update_value);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
