use std::sync::Arc;

use codex_core::{
    Cell, CellDocument, DocumentCommand, DocumentError, EditSession, EditType, ManualClock,
    MutationOutcome, Notebook,
};
use serde_json::json;

fn session(clock: &Arc<ManualClock>) -> EditSession {
    EditSession::new("u1", clock.clone())
}

fn document() -> CellDocument {
    CellDocument::new(Notebook::new(vec![
        Cell::new("GEN 1:1", "X"),
        Cell::new("GEN 1:2", "Y"),
    ]))
}

fn command(value: serde_json::Value) -> DocumentCommand {
    serde_json::from_value(value).unwrap()
}

#[test]
fn host_messages_drive_the_mutators() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    let user = session(&clock);

    let messages = [
        json!({"type": "UpdateCellLabel", "params": {"cellId": "GEN 1:1", "label": "1"}}),
        json!({"type": "UpdateCellTimestamps", "params": {"cellId": "GEN 1:1", "timestamps": {"startTime": 0.5}}}),
        json!({"type": "AddCell", "params": {"newId": "GEN 1:1a", "referenceCellId": "GEN 1:1", "direction": "below"}}),
        json!({"type": "SoftDeleteCell", "params": {"cellId": "GEN 1:2"}}),
        json!({"type": "UpdateNotebookMetadata", "params": {"key": "textDirection", "value": "rtl"}}),
        json!({"type": "UpdateCellContent", "params": {
            "cellId": "GEN 1:1",
            "value": "suggestion",
            "editType": "llm-generation",
            "options": {"shouldUpdateValue": false}
        }}),
    ];
    for message in messages {
        clock.advance(10);
        let outcome = doc.execute(command(message), &user).unwrap();
        assert_eq!(outcome, MutationOutcome::Applied);
    }

    let first = doc.cell("GEN 1:1").unwrap();
    assert_eq!(first.metadata.cell_label.as_deref(), Some("1"));
    assert_eq!(first.metadata.data.start_seconds(), Some(0.5));
    assert_eq!(first.value, "X");
    let preview = first.metadata.edits.records().last().unwrap();
    assert_eq!(preview.edit_type, EditType::LlmGeneration);
    assert!(preview.preview);

    let ids: Vec<&str> = doc.cells().iter().map(Cell::id).collect();
    assert_eq!(ids, vec!["GEN 1:1", "GEN 1:1a", "GEN 1:2"]);
    assert!(doc.cell("GEN 1:2").unwrap().is_deleted());
    assert_eq!(
        doc.notebook().metadata.fields.get("textDirection"),
        Some(&json!("rtl"))
    );
}

#[test]
fn lock_outcomes_and_errors_pass_through() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    let user = session(&clock);

    doc.execute(
        command(json!({"type": "UpdateCellIsLocked", "params": {"cellId": "GEN 1:1", "isLocked": true}})),
        &user,
    )
    .unwrap();
    let outcome = doc
        .execute(
            command(json!({"type": "UpdateCellContent", "params": {"cellId": "GEN 1:1", "value": "new"}})),
            &user,
        )
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Locked);

    let error = doc
        .execute(
            command(json!({"type": "DeleteCell", "params": {"cellId": "missing"}})),
            &user,
        )
        .unwrap_err();
    assert_eq!(error, DocumentError::CellNotFound("missing".to_string()));
}

#[test]
fn commands_serialize_with_camel_case_params() {
    let command = DocumentCommand::ValidateCellContent {
        cell_id: "GEN 1:1".to_string(),
        validate: true,
    };
    assert_eq!(
        serde_json::to_value(&command).unwrap(),
        json!({"type": "ValidateCellContent", "params": {"cellId": "GEN 1:1", "validate": true}})
    );
    assert_eq!(command.name(), "ValidateCellContent");
}

#[test]
fn cancel_merge_command_resets_the_flag() {
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    let user = session(&clock);
    doc.execute(
        command(json!({"type": "UpdateCellData", "params": {"cellId": "GEN 1:2", "data": {"merged": true}}})),
        &user,
    )
    .unwrap();

    clock.advance(10);
    let outcome = doc
        .execute(
            command(json!({"type": "CancelMerge", "params": {"cellId": "GEN 1:2"}})),
            &user,
        )
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);
    assert!(!doc.cell("GEN 1:2").unwrap().is_merged());
}
