//! Notebook document model.
//!
//! # Responsibility
//! - Define the serialized notebook: ordered cells plus versioned metadata.
//! - Parse and print the JSON wire format.
//!
//! # Invariants
//! - Cell order is meaningful and preserved as read.
//! - Notebook metadata edits use field paths rooted at `metadata`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::cell::{json_at, set_json_at, Cell};
use super::edit::{EditHistory, FieldPath};

/// Notebook-level metadata with its own edit history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    #[serde(default, skip_serializing_if = "EditHistory::is_empty")]
    pub edits: EditHistory,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NotebookMetadata {
    /// Reads a `["metadata", ...]` path; other roots read as `null`.
    pub fn field_value(&self, path: &FieldPath) -> Value {
        match path.segments().split_first() {
            Some((root, rest)) if root == "metadata" && !rest.is_empty() => {
                let (key, nested) = (&rest[0], &rest[1..]);
                self.fields
                    .get(key)
                    .and_then(|value| json_at(value, nested))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    /// Writes a `["metadata", ...]` path. Returns `false` for other roots.
    pub fn set_field(&mut self, path: &FieldPath, value: Value) -> bool {
        match path.segments().split_first() {
            Some((root, rest)) if root == "metadata" && !rest.is_empty() => {
                if rest[0] == "edits" {
                    return false;
                }
                let mut object = Value::Object(std::mem::take(&mut self.fields));
                set_json_at(&mut object, rest, value);
                if let Value::Object(map) = object {
                    self.fields = map;
                }
                true
            }
            _ => false,
        }
    }
}

/// Serialized notebook: `{ "cells": [...], "metadata": {...} }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: NotebookMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Pretty JSON with two-space indentation, as stored on disk.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn cell(&self, id: &str) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.id() == id)
    }

    pub fn cell_mut(&mut self, id: &str) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|cell| cell.id() == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.cells.iter().position(|cell| cell.id() == id)
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(Cell::id)
    }
}

#[cfg(test)]
mod tests {
    use super::Notebook;
    use crate::model::edit::FieldPath;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let input = json!({
            "cells": [{
                "kind": 2,
                "languageId": "html",
                "value": "<span>hi</span>",
                "metadata": {
                    "id": "GEN 1:1",
                    "type": "text",
                    "data": { "verseRange": [1, 2] },
                    "customFlag": "x"
                }
            }],
            "metadata": { "textDirection": "rtl" },
            "schemaVersion": 3
        });

        let notebook: Notebook = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(notebook.cells[0].id(), "GEN 1:1");
        assert_eq!(notebook.cells[0].metadata.cell_type.as_deref(), Some("text"));

        let output = serde_json::to_value(&notebook).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn notebook_metadata_paths_are_rooted_at_metadata() {
        let mut notebook = Notebook::default();
        let path = FieldPath::notebook_metadata("textDirection");

        assert!(notebook.metadata.set_field(&path, json!("rtl")));
        assert_eq!(notebook.metadata.field_value(&path), json!("rtl"));
        assert!(!notebook.metadata.set_field(&FieldPath::value(), json!("x")));
    }
}
