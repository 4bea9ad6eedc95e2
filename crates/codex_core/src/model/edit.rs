//! Edit-history model.
//!
//! # Responsibility
//! - Define the timestamped, attributed `EditRecord` shared by cells and
//!   notebook metadata.
//! - Derive the current value of a field from its records instead of trusting
//!   separately maintained state.
//!
//! # Invariants
//! - For one field path, the current value is the non-preview record with the
//!   greatest `timestamp`. Equal timestamps fall back to edit type, author and
//!   value, so the winner never depends on where a record sits in the list.
//! - History is append-only; records are never rewritten except for their
//!   validator lists.
//! - A validator entry is active iff `is_deleted == false`.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use super::is_false;

/// Author recorded when the acting user is unknown.
pub const ANONYMOUS_AUTHOR: &str = "anonymous";

/// Ordered path segments identifying one field of a cell or notebook.
///
/// Serialized as a plain JSON array (`editMap` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// `["value"]`, the primary cell content.
    pub fn value() -> Self {
        Self::new(["value"])
    }

    pub fn cell_label() -> Self {
        Self::new(["metadata", "cellLabel"])
    }

    pub fn is_locked() -> Self {
        Self::new(["metadata", "isLocked"])
    }

    /// `["metadata", "data", key]`.
    pub fn data(key: &str) -> Self {
        Self::new(["metadata", "data", key])
    }

    pub fn start_time() -> Self {
        Self::data("startTime")
    }

    pub fn end_time() -> Self {
        Self::data("endTime")
    }

    pub fn deleted() -> Self {
        Self::data("deleted")
    }

    pub fn merged() -> Self {
        Self::data("merged")
    }

    /// Notebook-level metadata key, rooted at `metadata`.
    pub fn notebook_metadata(key: &str) -> Self {
        Self::new(["metadata", key])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.0.len() >= prefix.len()
            && self
                .0
                .iter()
                .zip(prefix.iter())
                .all(|(segment, expected)| segment == expected)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Provenance of one edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditType {
    /// Value present before any tracked edit (import or synthesized baseline).
    #[serde(rename = "initial-import", alias = "INITIAL_IMPORT")]
    InitialImport,
    /// Change made by a person in the editor.
    #[serde(rename = "user-edit", alias = "USER_EDIT")]
    UserEdit,
    /// Change produced by an LLM completion.
    #[serde(rename = "llm-generation", alias = "LLM_GENERATION")]
    LlmGeneration,
}

impl EditType {
    /// Tie-break rank at equal timestamps: people beat generators beat imports.
    fn precedence(self) -> u8 {
        match self {
            Self::InitialImport => 0,
            Self::LlmGeneration => 1,
            Self::UserEdit => 2,
        }
    }
}

/// One user's endorsement of an edit's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationEntry {
    pub username: String,
    pub creation_timestamp: i64,
    pub updated_timestamp: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

impl ValidationEntry {
    pub fn new(username: impl Into<String>, now: i64) -> Self {
        Self {
            username: username.into(),
            creation_timestamp: now,
            updated_timestamp: now,
            is_deleted: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Timestamped, attributed record of one field's new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    #[serde(rename = "editMap", alias = "fieldPath")]
    pub field_path: FieldPath,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", alias = "editType")]
    pub edit_type: EditType,
    #[serde(default = "anonymous_author")]
    pub author: String,
    pub timestamp: i64,
    /// LLM preview records are history only; they never become the current value.
    #[serde(default, skip_serializing_if = "is_false")]
    pub preview: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validated_by: Vec<ValidationEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn anonymous_author() -> String {
    ANONYMOUS_AUTHOR.to_string()
}

impl EditRecord {
    pub fn new(
        field_path: FieldPath,
        value: Value,
        edit_type: EditType,
        author: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            field_path,
            value,
            edit_type,
            author: author.into(),
            timestamp,
            preview: false,
            validated_by: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Order in which records of one path compete for the current value.
    pub fn precedence_cmp(&self, other: &EditRecord) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| {
                self.edit_type
                    .precedence()
                    .cmp(&other.edit_type.precedence())
            })
            .then_with(|| self.author.cmp(&other.author))
            .then_with(|| self.value.to_string().cmp(&other.value.to_string()))
    }

    /// Identity used to collapse duplicates across replicas.
    pub fn is_same_edit(&self, other: &EditRecord) -> bool {
        self.timestamp == other.timestamp
            && self.field_path == other.field_path
            && self.value == other.value
    }

    pub fn active_validators(&self) -> impl Iterator<Item = &ValidationEntry> {
        self.validated_by.iter().filter(|entry| entry.is_active())
    }

    pub fn is_validated_by(&self, username: &str) -> bool {
        self.active_validators()
            .any(|entry| entry.username == username)
    }

    /// Adds or reactivates `username`. Returns `false` when already active.
    pub fn add_validator(&mut self, username: &str, now: i64) -> bool {
        match self
            .validated_by
            .iter_mut()
            .find(|entry| entry.username == username)
        {
            Some(entry) if entry.is_active() => false,
            Some(entry) => {
                entry.is_deleted = false;
                entry.updated_timestamp = now;
                true
            }
            None => {
                self.validated_by.push(ValidationEntry::new(username, now));
                true
            }
        }
    }

    /// Soft-removes `username`. Returns `false` when there was no active entry.
    pub fn remove_validator(&mut self, username: &str, now: i64) -> bool {
        match self
            .validated_by
            .iter_mut()
            .find(|entry| entry.username == username && entry.is_active())
        {
            Some(entry) => {
                entry.is_deleted = true;
                entry.updated_timestamp = now;
                true
            }
            None => false,
        }
    }

    /// Folds another replica's validator list into this one.
    ///
    /// Per username the entry with the newer `updated_timestamp` wins; on a
    /// tie the entry already on `self` is kept.
    pub fn merge_validators(&mut self, other: &[ValidationEntry]) {
        for incoming in other {
            match self
                .validated_by
                .iter_mut()
                .find(|entry| entry.username == incoming.username)
            {
                Some(existing) => {
                    if incoming.updated_timestamp > existing.updated_timestamp {
                        *existing = incoming.clone();
                    }
                }
                None => self.validated_by.push(incoming.clone()),
            }
        }
    }
}

/// Append-only record list with a memoized "current record per path" index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditHistory {
    records: Vec<EditRecord>,
    #[serde(skip)]
    winners: OnceCell<BTreeMap<FieldPath, usize>>,
}

impl PartialEq for EditHistory {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl From<Vec<EditRecord>> for EditHistory {
    fn from(records: Vec<EditRecord>) -> Self {
        Self {
            records,
            winners: OnceCell::new(),
        }
    }
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<EditRecord> {
        self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EditRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends one record and returns its index.
    pub fn push(&mut self, record: EditRecord) -> usize {
        self.records.push(record);
        self.winners.take();
        self.records.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&EditRecord> {
        self.records.get(index)
    }

    /// Mutable access for validator bookkeeping.
    ///
    /// Validators do not take part in winner selection, so the index stays valid.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut EditRecord> {
        self.records.get_mut(index)
    }

    /// Record currently holding the value of `path`, if any.
    pub fn latest_for(&self, path: &FieldPath) -> Option<&EditRecord> {
        let index = *self.winners().get(path)?;
        self.records.get(index)
    }

    pub fn latest_index_for(&self, path: &FieldPath) -> Option<usize> {
        self.winners().get(path).copied()
    }

    /// Paths with at least one non-preview record, in sorted order.
    pub fn field_paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.winners().keys()
    }

    /// Latest non-preview record for the primary `value` field.
    pub fn latest_value_edit(&self) -> Option<&EditRecord> {
        self.latest_for(&FieldPath::value())
    }

    pub fn latest_value_edit_mut(&mut self) -> Option<&mut EditRecord> {
        let index = self.latest_index_for(&FieldPath::value())?;
        self.records.get_mut(index)
    }

    fn winners(&self) -> &BTreeMap<FieldPath, usize> {
        self.winners.get_or_init(|| build_winner_index(&self.records))
    }
}

impl<'a> IntoIterator for &'a EditHistory {
    type Item = &'a EditRecord;
    type IntoIter = std::slice::Iter<'a, EditRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn build_winner_index(records: &[EditRecord]) -> BTreeMap<FieldPath, usize> {
    let mut winners: BTreeMap<FieldPath, usize> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        if record.preview {
            continue;
        }
        match winners.get(&record.field_path) {
            // Full ties are duplicates of one edit; the later copy carries the
            // freshest validators.
            Some(&current) if record.precedence_cmp(&records[current]) == Ordering::Less => {}
            _ => {
                winners.insert(record.field_path.clone(), index);
            }
        }
    }
    winners
}

#[cfg(test)]
mod tests {
    use super::{EditHistory, EditRecord, EditType, FieldPath};
    use serde_json::json;

    fn record(path: FieldPath, value: &str, timestamp: i64) -> EditRecord {
        EditRecord::new(path, json!(value), EditType::UserEdit, "u1", timestamp)
    }

    #[test]
    fn latest_for_prefers_greatest_timestamp_regardless_of_append_order() {
        let mut history = EditHistory::new();
        history.push(record(FieldPath::value(), "new", 200));
        history.push(record(FieldPath::value(), "old", 100));

        assert_eq!(history.latest_value_edit().unwrap().value, json!("new"));
    }

    #[test]
    fn latest_for_ties_ignore_append_order() {
        for values in [["first", "second"], ["second", "first"]] {
            let mut history = EditHistory::new();
            for value in values {
                history.push(record(FieldPath::cell_label(), value, 100));
            }
            assert_eq!(
                history.latest_for(&FieldPath::cell_label()).unwrap().value,
                json!("second")
            );
        }
    }

    #[test]
    fn index_is_invalidated_on_push() {
        let mut history = EditHistory::new();
        history.push(record(FieldPath::value(), "a", 1));
        assert_eq!(history.latest_value_edit().unwrap().value, json!("a"));

        history.push(record(FieldPath::value(), "b", 2));
        assert_eq!(history.latest_value_edit().unwrap().value, json!("b"));
    }

    #[test]
    fn preview_records_never_win() {
        let mut history = EditHistory::new();
        history.push(record(FieldPath::value(), "kept", 1));
        let mut preview = record(FieldPath::value(), "preview", 5);
        preview.preview = true;
        history.push(preview);

        assert_eq!(history.latest_value_edit().unwrap().value, json!("kept"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn field_path_display_joins_segments() {
        assert_eq!(FieldPath::start_time().to_string(), "metadata.data.startTime");
        assert!(FieldPath::start_time().starts_with(&["metadata", "data"]));
        assert!(!FieldPath::value().starts_with(&["metadata"]));
    }
}
