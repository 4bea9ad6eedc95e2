//! In-memory cell document with tracked, field-level mutators.
//!
//! # Responsibility
//! - Apply user/LLM changes to one notebook and record an `EditRecord` per
//!   changed field.
//! - Enforce per-cell lock state and report locked no-ops to the caller.
//!
//! # Invariants
//! - A mutator that changes nothing records nothing.
//! - The first tracked edit of a field is preceded by an `initial-import`
//!   record holding the prior value (when there was one).
//! - Locked cells reject content, label, timestamp, data, attachment and
//!   delete mutations without error. LLM previews and lock toggles are exempt.
//! - Unknown cell ids fail fast with `DocumentError::CellNotFound`.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::model::cell::{Attachment, Cell, CellData, CellMetadata, FieldError};
use crate::model::edit::{EditHistory, EditRecord, EditType, FieldPath, ValidationEntry};
use crate::model::notebook::Notebook;
use crate::session::EditSession;

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Mutator failure. Locked cells are not an error; see `MutationOutcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    CellNotFound(String),
    DuplicateCellId(String),
    AttachmentNotFound {
        cell_id: String,
        attachment_id: String,
    },
    InvalidField(FieldError),
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CellNotFound(id) => write!(f, "cell not found: {id}"),
            Self::DuplicateCellId(id) => write!(f, "cell id already exists: {id}"),
            Self::AttachmentNotFound {
                cell_id,
                attachment_id,
            } => write!(f, "attachment `{attachment_id}` not found on cell {cell_id}"),
            Self::InvalidField(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DocumentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidField(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FieldError> for DocumentError {
    fn from(value: FieldError) -> Self {
        Self::InvalidField(value)
    }
}

/// What a mutator did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOutcome {
    Applied,
    /// The new value equals the current one; nothing was recorded.
    Unchanged,
    /// The target cell is locked; nothing was recorded.
    Locked,
}

impl MutationOutcome {
    pub fn is_applied(self) -> bool {
        self == Self::Applied
    }

    fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Applied
        } else {
            Self::Unchanged
        }
    }
}

/// Flags for `update_cell_content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentUpdateOptions {
    /// `false` records an LLM preview without touching the live value.
    pub should_update_value: bool,
    /// With `is_search_replace`, keep the author's own active validation.
    pub retain_validations: bool,
    /// Bulk search/replace edits do not auto-validate.
    pub is_search_replace: bool,
}

impl Default for ContentUpdateOptions {
    fn default() -> Self {
        Self {
            should_update_value: true,
            retain_validations: false,
            is_search_replace: false,
        }
    }
}

impl ContentUpdateOptions {
    pub fn preview() -> Self {
        Self {
            should_update_value: false,
            ..Self::default()
        }
    }

    pub fn search_replace(retain_validations: bool) -> Self {
        Self {
            retain_validations,
            is_search_replace: true,
            ..Self::default()
        }
    }
}

/// Partial timing update; `None` leaves a bound untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellTimestamps {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsertDirection {
    Above,
    Below,
}

/// Request model for `add_cell`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCellRequest {
    pub new_id: String,
    /// `None` appends at the end of the notebook.
    #[serde(default)]
    pub reference_cell_id: Option<String>,
    pub direction: InsertDirection,
    #[serde(default)]
    pub cell_type: Option<String>,
    #[serde(default)]
    pub data: CellData,
    /// Full metadata to start from; `id`, `type` and `data` above take precedence.
    #[serde(default)]
    pub metadata: Option<CellMetadata>,
}

/// Mutable notebook that tracks every field change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellDocument {
    notebook: Notebook,
}

impl From<Notebook> for CellDocument {
    fn from(notebook: Notebook) -> Self {
        Self { notebook }
    }
}

impl CellDocument {
    pub fn new(notebook: Notebook) -> Self {
        Self { notebook }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        Notebook::from_json_str(text).map(Self::new)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        self.notebook.to_json_string()
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn into_notebook(self) -> Notebook {
        self.notebook
    }

    pub fn cells(&self) -> &[Cell] {
        &self.notebook.cells
    }

    pub fn cell(&self, cell_id: &str) -> Option<&Cell> {
        self.notebook.cell(cell_id)
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.notebook.cells
    }

    fn require_cell_mut(&mut self, cell_id: &str) -> DocumentResult<&mut Cell> {
        self.notebook
            .cell_mut(cell_id)
            .ok_or_else(|| DocumentError::CellNotFound(cell_id.to_string()))
    }

    /// Like `require_cell_mut`, but `None` when the cell is locked.
    fn unlocked_cell_mut(
        &mut self,
        cell_id: &str,
        operation: &str,
    ) -> DocumentResult<Option<&mut Cell>> {
        let cell = self.require_cell_mut(cell_id)?;
        if cell.is_locked() {
            debug!(
                "event=cell_mutation module=document status=locked op={} cell_id={}",
                operation, cell_id
            );
            return Ok(None);
        }
        Ok(Some(cell))
    }

    /// Updates the primary cell content.
    ///
    /// # Contract
    /// - `USER_EDIT` auto-validates for the author unless `is_search_replace`.
    /// - Search/replace with `retain_validations` re-validates for the author only
    ///   when the author had an active validation on the previous value edit.
    /// - `should_update_value = false` records a preview and keeps `value`.
    pub fn update_cell_content(
        &mut self,
        cell_id: &str,
        value: &str,
        edit_type: EditType,
        options: ContentUpdateOptions,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        if !options.should_update_value {
            let cell = self.require_cell_mut(cell_id)?;
            if cell.value == value {
                return Ok(MutationOutcome::Unchanged);
            }
            let mut record = EditRecord::new(
                FieldPath::value(),
                Value::String(value.to_string()),
                edit_type,
                session.author(),
                session.now_ms(),
            );
            record.preview = true;
            cell.metadata.edits.push(record);
            return Ok(MutationOutcome::Applied);
        }

        let Some(cell) = self.unlocked_cell_mut(cell_id, "update_cell_content")? else {
            return Ok(MutationOutcome::Locked);
        };

        let author = session.author();
        let had_own_validation = cell
            .metadata
            .edits
            .latest_value_edit()
            .is_some_and(|record| record.is_validated_by(author));

        let Some(index) = record_edit(
            cell,
            FieldPath::value(),
            Value::String(value.to_string()),
            edit_type,
            session,
        )?
        else {
            return Ok(MutationOutcome::Unchanged);
        };

        let validate = edit_type == EditType::UserEdit
            && (!options.is_search_replace || (options.retain_validations && had_own_validation));
        if validate {
            if let Some(record) = cell.metadata.edits.get_mut(index) {
                record
                    .validated_by
                    .push(ValidationEntry::new(author, record.timestamp));
            }
        }
        Ok(MutationOutcome::Applied)
    }

    pub fn update_cell_label(
        &mut self,
        cell_id: &str,
        label: &str,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "update_cell_label")? else {
            return Ok(MutationOutcome::Locked);
        };
        let changed = record_edit(
            cell,
            FieldPath::cell_label(),
            Value::String(label.to_string()),
            EditType::UserEdit,
            session,
        )?;
        Ok(MutationOutcome::from_changed(changed.is_some()))
    }

    /// Records one edit per bound that actually changed.
    pub fn update_cell_timestamps(
        &mut self,
        cell_id: &str,
        timestamps: CellTimestamps,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "update_cell_timestamps")? else {
            return Ok(MutationOutcome::Locked);
        };
        let mut changed = false;
        for (path, bound) in [
            (FieldPath::start_time(), timestamps.start_time),
            (FieldPath::end_time(), timestamps.end_time),
        ] {
            if let Some(bound) = bound {
                changed |=
                    record_edit(cell, path, Value::from(bound), EditType::UserEdit, session)?
                        .is_some();
            }
        }
        Ok(MutationOutcome::from_changed(changed))
    }

    /// Merges `partial` into `metadata.data`, one edit per changed key.
    pub fn update_cell_data(
        &mut self,
        cell_id: &str,
        partial: &Map<String, Value>,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "update_cell_data")? else {
            return Ok(MutationOutcome::Locked);
        };
        let mut changed = false;
        for (key, value) in partial {
            changed |= record_edit(
                cell,
                FieldPath::data(key),
                value.clone(),
                EditType::UserEdit,
                session,
            )?
            .is_some();
        }
        Ok(MutationOutcome::from_changed(changed))
    }

    /// Inserts or replaces one attachment.
    ///
    /// Attachments version themselves through `updatedAt`; they are reconciled
    /// by the attachment merge rather than by edit history.
    pub fn update_cell_attachment(
        &mut self,
        cell_id: &str,
        attachment_id: &str,
        attachment: Attachment,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "update_cell_attachment")? else {
            return Ok(MutationOutcome::Locked);
        };
        if cell.metadata.attachments.get(attachment_id) == Some(&attachment) {
            return Ok(MutationOutcome::Unchanged);
        }
        cell.metadata
            .attachments
            .insert(attachment_id.to_string(), attachment);
        Ok(MutationOutcome::Applied)
    }

    /// Lock toggles are always allowed and are themselves tracked edits.
    pub fn update_cell_is_locked(
        &mut self,
        cell_id: &str,
        is_locked: bool,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let cell = self.require_cell_mut(cell_id)?;
        let changed = record_edit(
            cell,
            FieldPath::is_locked(),
            Value::Bool(is_locked),
            EditType::UserEdit,
            session,
        )?;
        Ok(MutationOutcome::from_changed(changed.is_some()))
    }

    /// Inserts a new cell next to a reference cell.
    ///
    /// A missing or unknown reference cell appends at the end.
    ///
    /// # Errors
    /// - `DuplicateCellId` when `new_id` is already present.
    pub fn add_cell(
        &mut self,
        request: AddCellRequest,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        if self.notebook.cell(&request.new_id).is_some() {
            return Err(DocumentError::DuplicateCellId(request.new_id));
        }
        let reference = request
            .reference_cell_id
            .as_deref()
            .and_then(|reference| self.notebook.position(reference));
        let index = match (reference, request.direction) {
            (Some(position), InsertDirection::Above) => position,
            (Some(position), InsertDirection::Below) => position + 1,
            (None, _) => self.notebook.cells.len(),
        };

        let mut metadata = request.metadata.unwrap_or_default();
        metadata.id = request.new_id.clone();
        if request.cell_type.is_some() {
            metadata.cell_type = request.cell_type;
        }
        if !request.data.is_empty() {
            metadata.data = request.data;
        }

        let mut cell = Cell {
            value: String::new(),
            metadata,
            extra: Map::new(),
        };
        cell.extra.insert("kind".to_string(), Value::from(2));
        cell.extra
            .insert("languageId".to_string(), Value::String("html".to_string()));

        let now = session.now_ms();
        for path in [FieldPath::start_time(), FieldPath::end_time()] {
            let current = cell.field_value(&path);
            if !current.is_null() && cell.metadata.edits.latest_for(&path).is_none() {
                cell.metadata.edits.push(EditRecord::new(
                    path,
                    current,
                    EditType::InitialImport,
                    session.author(),
                    now,
                ));
            }
        }

        debug!(
            "event=cell_add module=document status=ok cell_id={} index={}",
            request.new_id, index
        );
        self.notebook.cells.insert(index, cell);
        Ok(MutationOutcome::Applied)
    }

    /// Hides a cell by recording `metadata.data.deleted = true`.
    pub fn soft_delete_cell(
        &mut self,
        cell_id: &str,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        self.set_deleted_flag(cell_id, true, session)
    }

    /// Reverses a soft delete.
    pub fn restore_cell(
        &mut self,
        cell_id: &str,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        self.set_deleted_flag(cell_id, false, session)
    }

    fn set_deleted_flag(
        &mut self,
        cell_id: &str,
        deleted: bool,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "set_deleted")? else {
            return Ok(MutationOutcome::Locked);
        };
        let changed = record_edit(
            cell,
            FieldPath::deleted(),
            Value::Bool(deleted),
            EditType::UserEdit,
            session,
        )?;
        Ok(MutationOutcome::from_changed(changed.is_some()))
    }

    /// Removes a cell from this replica only.
    ///
    /// The merge resolver keeps the cell if the other replica still has it.
    pub fn delete_cell(&mut self, cell_id: &str) -> DocumentResult<MutationOutcome> {
        let position = self
            .notebook
            .position(cell_id)
            .ok_or_else(|| DocumentError::CellNotFound(cell_id.to_string()))?;
        if self.notebook.cells[position].is_locked() {
            return Ok(MutationOutcome::Locked);
        }
        self.notebook.cells.remove(position);
        debug!(
            "event=cell_delete module=document status=ok mode=hard cell_id={}",
            cell_id
        );
        Ok(MutationOutcome::Applied)
    }

    /// Makes `attachment_id` the current audio and stamps the selection time.
    pub fn select_audio_attachment(
        &mut self,
        cell_id: &str,
        attachment_id: &str,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let Some(cell) = self.unlocked_cell_mut(cell_id, "select_audio_attachment")? else {
            return Ok(MutationOutcome::Locked);
        };
        let selectable = cell
            .metadata
            .attachments
            .get(attachment_id)
            .is_some_and(|attachment| !attachment.is_deleted);
        if !selectable {
            return Err(DocumentError::AttachmentNotFound {
                cell_id: cell_id.to_string(),
                attachment_id: attachment_id.to_string(),
            });
        }
        cell.metadata.selected_audio_id = Some(attachment_id.to_string());
        cell.metadata.selection_timestamp = Some(session.now_ms());
        Ok(MutationOutcome::Applied)
    }

    /// Adds or removes the author's validation on the latest value edit.
    ///
    /// A cell whose value predates tracking gets an `initial-import` record first,
    /// so there is always an edit to attach the validation to.
    pub fn validate_cell_content(
        &mut self,
        cell_id: &str,
        validate: bool,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let cell = self.require_cell_mut(cell_id)?;
        let now = session.now_ms();
        if cell.metadata.edits.latest_value_edit().is_none() {
            if !validate || cell.value.is_empty() {
                return Ok(MutationOutcome::Unchanged);
            }
            cell.metadata.edits.push(EditRecord::new(
                FieldPath::value(),
                Value::String(cell.value.clone()),
                EditType::InitialImport,
                session.author(),
                now,
            ));
        }
        let Some(record) = cell.metadata.edits.latest_value_edit_mut() else {
            return Ok(MutationOutcome::Unchanged);
        };
        let changed = if validate {
            record.add_validator(session.author(), now)
        } else {
            record.remove_validator(session.author(), now)
        };
        Ok(MutationOutcome::from_changed(changed))
    }

    /// Sets a notebook-level metadata key with a tracked edit.
    pub fn update_notebook_metadata(
        &mut self,
        key: &str,
        value: Value,
        session: &EditSession,
    ) -> DocumentResult<MutationOutcome> {
        let path = FieldPath::notebook_metadata(key);
        let metadata = &mut self.notebook.metadata;
        let current = metadata.field_value(&path);
        if values_equal(&current, &value) {
            return Ok(MutationOutcome::Unchanged);
        }
        let now = next_timestamp(&metadata.edits, &path, session);
        if metadata.edits.latest_for(&path).is_none() && !current.is_null() {
            metadata.edits.push(EditRecord::new(
                path.clone(),
                current,
                EditType::InitialImport,
                session.author(),
                now - 1,
            ));
        }
        if !metadata.set_field(&path, value.clone()) {
            return Err(DocumentError::InvalidField(FieldError {
                path,
                message: "field is not editable".to_string(),
            }));
        }
        metadata.edits.push(EditRecord::new(
            path,
            value,
            EditType::UserEdit,
            session.author(),
            now,
        ));
        Ok(MutationOutcome::Applied)
    }
}

/// Writes `value` at `path` and appends the matching edit record.
///
/// Returns the index of the new record, or `None` when the value was unchanged.
pub(crate) fn record_edit(
    cell: &mut Cell,
    path: FieldPath,
    value: Value,
    edit_type: EditType,
    session: &EditSession,
) -> DocumentResult<Option<usize>> {
    let current = cell.field_value(&path);
    if values_equal(&current, &value) {
        return Ok(None);
    }
    let now = next_timestamp(&cell.metadata.edits, &path, session);
    cell.set_field(&path, value.clone())?;
    if cell.metadata.edits.latest_for(&path).is_none() && !current.is_null() {
        cell.metadata.edits.push(EditRecord::new(
            path.clone(),
            current,
            EditType::InitialImport,
            session.author(),
            now - 1,
        ));
    }
    let index = cell.metadata.edits.push(EditRecord::new(
        path,
        value,
        edit_type,
        session.author(),
        now,
    ));
    Ok(Some(index))
}

/// Session time, pushed past the field's current winner so a local edit
/// always supersedes it.
fn next_timestamp(history: &EditHistory, path: &FieldPath, session: &EditSession) -> i64 {
    let now = session.now_ms();
    match history.latest_for(path) {
        Some(winner) if winner.timestamp >= now => winner.timestamp + 1,
        _ => now,
    }
}

/// JSON equality that treats `5` and `5.0` as the same number.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}
