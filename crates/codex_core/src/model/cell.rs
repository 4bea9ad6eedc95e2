//! Cell domain model.
//!
//! # Responsibility
//! - Define the on-disk shape of one notebook cell and its metadata.
//! - Read and write individual fields addressed by `FieldPath`.
//!
//! # Invariants
//! - `metadata.id` is stable for the cell lifetime.
//! - Unknown JSON fields survive a read/write round trip.
//! - Soft delete is `metadata.data.deleted == true`; the cell is never removed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

use super::edit::{EditHistory, FieldPath};
use super::is_false;

/// Attachment kind used for audio recordings.
pub const AUDIO_ATTACHMENT_TYPE: &str = "audio";

/// Field could not be written with the given value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: FieldPath,
    pub message: String,
}

impl FieldError {
    fn new(path: &FieldPath, message: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            message: message.into(),
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot write field `{}`: {}", self.path, self.message)
    }
}

impl Error for FieldError {}

/// File attached to a cell (audio recordings today).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Project-relative path of the backing file.
    pub url: String,
    #[serde(rename = "type", default = "audio_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_missing: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn audio_type() -> String {
    AUDIO_ATTACHMENT_TYPE.to_string()
}

impl Attachment {
    pub fn audio(url: impl Into<String>, created_by: impl Into<String>, now: i64) -> Self {
        Self {
            url: url.into(),
            kind: audio_type(),
            created_by: Some(created_by.into()),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            is_missing: None,
            extra: Map::new(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.kind == AUDIO_ATTACHMENT_TYPE
    }

    pub fn is_missing(&self) -> bool {
        self.is_missing.unwrap_or(false)
    }

    /// Not deleted and its file was not reported missing.
    pub fn is_usable(&self) -> bool {
        !self.is_deleted && !self.is_missing()
    }
}

/// Free-form `metadata.data` block with the keys the engine reasons about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CellData {
    pub fn is_empty(&self) -> bool {
        self.start_time.is_none()
            && self.end_time.is_none()
            && self.deleted.is_none()
            && self.merged.is_none()
            && self.extra.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(false)
    }

    pub fn is_merged(&self) -> bool {
        self.merged.unwrap_or(false)
    }

    /// Start bound in seconds; the stored number keeps its on-disk form.
    pub fn start_seconds(&self) -> Option<f64> {
        self.start_time.as_ref().and_then(Number::as_f64)
    }

    pub fn end_seconds(&self) -> Option<f64> {
        self.end_time.as_ref().and_then(Number::as_f64)
    }

    /// JSON view of one key; absent keys read as `null`.
    pub fn get(&self, key: &str) -> Value {
        match key {
            "startTime" => self.start_time.clone().map(Value::Number).unwrap_or(Value::Null),
            "endTime" => self.end_time.clone().map(Value::Number).unwrap_or(Value::Null),
            "deleted" => self.deleted.map(Value::Bool).unwrap_or(Value::Null),
            "merged" => self.merged.map(Value::Bool).unwrap_or(Value::Null),
            other => self.extra.get(other).cloned().unwrap_or(Value::Null),
        }
    }

    fn set(&mut self, path: &FieldPath, key: &str, value: Value) -> Result<(), FieldError> {
        match key {
            "startTime" => self.start_time = as_optional_number(path, value)?,
            "endTime" => self.end_time = as_optional_number(path, value)?,
            "deleted" => self.deleted = as_optional_bool(path, value)?,
            "merged" => self.merged = as_optional_bool(path, value)?,
            other => {
                if value.is_null() {
                    self.extra.remove(other);
                } else {
                    self.extra.insert(other.to_string(), value);
                }
            }
        }
        Ok(())
    }
}

/// `cell.metadata` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMetadata {
    /// Empty for cells the host never assigned an id to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub cell_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_label: Option<String>,
    #[serde(default, skip_serializing_if = "CellData::is_empty")]
    pub data: CellData,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_audio_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "EditHistory::is_empty")]
    pub edits: EditHistory,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One notebook cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub metadata: CellMetadata,
    /// Notebook-host fields such as `kind` and `languageId`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            metadata: CellMetadata {
                id: id.into(),
                ..CellMetadata::default()
            },
            extra: Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.data.is_deleted()
    }

    pub fn is_merged(&self) -> bool {
        self.metadata.data.is_merged()
    }

    pub fn is_locked(&self) -> bool {
        self.metadata.is_locked
    }

    /// Reads the live value at `path`; absent fields read as `null`.
    pub fn field_value(&self, path: &FieldPath) -> Value {
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["value"] => Value::String(self.value.clone()),
            ["metadata", "cellLabel"] => self
                .metadata
                .cell_label
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            ["metadata", "isLocked"] => Value::Bool(self.metadata.is_locked),
            ["metadata", "data", key] => self.metadata.data.get(key),
            _ => serde_json::to_value(self)
                .ok()
                .and_then(|json| json_at(&json, path.segments()).cloned())
                .unwrap_or(Value::Null),
        }
    }

    /// Writes `value` at `path` on the live cell. Does not touch edit history.
    pub fn set_field(&mut self, path: &FieldPath, value: Value) -> Result<(), FieldError> {
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        match segments.as_slice() {
            [] => Err(FieldError::new(path, "empty field path")),
            ["value"] => {
                self.value = as_optional_string(path, value)?.unwrap_or_default();
                Ok(())
            }
            ["metadata", "cellLabel"] => {
                self.metadata.cell_label = as_optional_string(path, value)?;
                Ok(())
            }
            ["metadata", "isLocked"] => {
                self.metadata.is_locked = as_optional_bool(path, value)?.unwrap_or(false);
                Ok(())
            }
            ["metadata", "data", key] => self.metadata.data.set(path, key, value),
            ["metadata", "edits", ..] | ["metadata", "id"] => {
                Err(FieldError::new(path, "field is not editable"))
            }
            _ => self.set_generic(path, value),
        }
    }

    fn set_generic(&mut self, path: &FieldPath, value: Value) -> Result<(), FieldError> {
        let edits = std::mem::take(&mut self.metadata.edits);
        let result = write_through_json(self, path, value);
        self.metadata.edits = edits;
        result
    }
}

fn write_through_json(cell: &mut Cell, path: &FieldPath, value: Value) -> Result<(), FieldError> {
    let mut json =
        serde_json::to_value(&*cell).map_err(|err| FieldError::new(path, err.to_string()))?;
    set_json_at(&mut json, path.segments(), value);
    *cell = serde_json::from_value(json).map_err(|err| FieldError::new(path, err.to_string()))?;
    Ok(())
}

/// Looks up a nested object key path.
pub(crate) fn json_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Writes a nested object key path, creating intermediate objects.
///
/// Non-object intermediates are replaced by objects.
pub(crate) fn set_json_at(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}

fn as_optional_string(path: &FieldPath, value: Value) -> Result<Option<String>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(FieldError::new(path, format!("expected string, got {other}"))),
    }
}

fn as_optional_bool(path: &FieldPath, value: Value) -> Result<Option<bool>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(flag) => Ok(Some(flag)),
        other => Err(FieldError::new(path, format!("expected boolean, got {other}"))),
    }
}

fn as_optional_number(path: &FieldPath, value: Value) -> Result<Option<Number>, FieldError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(Some(number)),
        other => Err(FieldError::new(path, format!("expected number, got {other}"))),
    }
}
