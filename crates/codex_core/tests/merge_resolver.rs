use std::sync::Arc;

use codex_core::merge::resolver::Side;
use codex_core::{
    resolve, resolve_notebooks, resolve_with_summary, AddCellRequest, Cell, CellData,
    CellDocument, ContentUpdateOptions, EditSession, EditType, FieldPath, InsertDirection,
    ManualClock, MergeError, Notebook,
};
use serde_json::json;

fn session(author: &str, clock: &Arc<ManualClock>) -> EditSession {
    EditSession::new(author, clock.clone())
}

fn base() -> CellDocument {
    CellDocument::new(Notebook::new(vec![
        Cell::new("GEN 1:1", "X"),
        Cell::new("GEN 1:2", "Y"),
    ]))
}

fn set_value(doc: &mut CellDocument, cell_id: &str, value: &str, author: &str, at: i64) {
    let clock = Arc::new(ManualClock::new(at));
    doc.update_cell_content(
        cell_id,
        value,
        EditType::UserEdit,
        ContentUpdateOptions::default(),
        &session(author, &clock),
    )
    .unwrap();
}

fn add_cell(doc: &mut CellDocument, new_id: &str, reference: &str, at: i64) {
    let clock = Arc::new(ManualClock::new(at));
    doc.add_cell(
        AddCellRequest {
            new_id: new_id.to_string(),
            reference_cell_id: Some(reference.to_string()),
            direction: InsertDirection::Below,
            cell_type: None,
            data: CellData::default(),
            metadata: None,
        },
        &session("u1", &clock),
    )
    .unwrap();
}

fn ids(notebook: &Notebook) -> Vec<&str> {
    notebook.cell_ids().collect()
}

#[test]
fn resolving_a_document_with_itself_is_a_no_op() {
    let clock = Arc::new(ManualClock::new(100));
    let mut doc = base();
    let user = session("u1", &clock);
    doc.update_cell_label("GEN 1:1", "1", &user).unwrap();
    clock.advance(10);
    set_value(&mut doc, "GEN 1:1", "In the beginning", "u1", 110);
    clock.set(120);
    doc.soft_delete_cell("GEN 1:2", &user).unwrap();
    clock.set(130);
    doc.update_notebook_metadata("textDirection", json!("ltr"), &user)
        .unwrap();

    let notebook = doc.notebook();
    let merged = resolve_notebooks(notebook, notebook);
    assert_eq!(&merged, notebook);

    let text = doc.to_json_string().unwrap();
    assert_eq!(resolve(&text, &text).unwrap(), text);
}

#[test]
fn resolving_a_merge_result_again_is_stable() {
    let mut ours = base();
    let mut theirs = base();
    set_value(&mut ours, "GEN 1:1", "A", "ua", 100);
    set_value(&mut theirs, "GEN 1:1", "B", "ub", 200);
    add_cell(&mut theirs, "GEN 1:1a", "GEN 1:1", 210);

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    assert_eq!(resolve_notebooks(&merged, &merged), merged);
    assert_eq!(resolve_notebooks(&merged, theirs.notebook()), merged);
}

#[test]
fn most_recent_edit_wins_and_both_records_are_kept() {
    let mut ours = base();
    let mut theirs = base();
    set_value(&mut ours, "GEN 1:1", "A", "ua", 100);
    set_value(&mut theirs, "GEN 1:1", "B", "ub", 200);

    for merged in [
        resolve_notebooks(ours.notebook(), theirs.notebook()),
        resolve_notebooks(theirs.notebook(), ours.notebook()),
    ] {
        let cell = merged.cell("GEN 1:1").unwrap();
        assert_eq!(cell.value, "B");
        let values: Vec<_> = cell
            .metadata
            .edits
            .iter()
            .filter(|record| record.edit_type == EditType::UserEdit)
            .map(|record| (record.timestamp, record.value.clone()))
            .collect();
        assert_eq!(values, vec![(100, json!("A")), (200, json!("B"))]);
    }
}

#[test]
fn timestamp_ties_resolve_the_same_from_either_side() {
    let mut ours = base();
    let mut theirs = base();
    set_value(&mut ours, "GEN 1:1", "A", "ua", 100);
    set_value(&mut theirs, "GEN 1:1", "B", "ub", 100);

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    assert_eq!(merged.cell("GEN 1:1").unwrap().value, "B", "author breaks the tie");
    assert_eq!(resolve_notebooks(&merged, &merged), merged);

    let flipped = resolve_notebooks(theirs.notebook(), ours.notebook());
    assert_eq!(flipped.cell("GEN 1:1").unwrap().value, "B");

    let imports = merged
        .cell("GEN 1:1")
        .unwrap()
        .metadata
        .edits
        .iter()
        .filter(|record| record.edit_type == EditType::InitialImport)
        .count();
    assert_eq!(imports, 1, "identical initial imports collapse");
}

#[test]
fn later_label_from_theirs_wins() {
    let t1 = 100;
    let t2 = 200;
    let mut ours = base();
    let mut theirs = base();
    ours.update_cell_label(
        "GEN 1:1",
        "first label",
        &session("u1", &Arc::new(ManualClock::new(t1))),
    )
    .unwrap();
    theirs
        .update_cell_label(
            "GEN 1:1",
            "second label",
            &session("u2", &Arc::new(ManualClock::new(t2))),
        )
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let cell = merged.cell("GEN 1:1").unwrap();
    assert_eq!(cell.metadata.cell_label.as_deref(), Some("second label"));
    assert_eq!(cell.value, "X");
    let labels: Vec<_> = cell
        .metadata
        .edits
        .iter()
        .filter(|record| record.field_path == FieldPath::cell_label())
        .map(|record| record.value.clone())
        .collect();
    assert_eq!(labels, vec![json!("first label"), json!("second label")]);
}

#[test]
fn cells_unique_to_either_side_are_kept() {
    let mut ours = base();
    let mut theirs = base();
    add_cell(&mut ours, "unique-ours", "GEN 1:2", 100);
    add_cell(&mut theirs, "unique-theirs", "GEN 1:1", 100);

    let (merged, summary) = resolve_with_summary(ours.notebook(), theirs.notebook());
    assert_eq!(
        ids(&merged),
        vec!["GEN 1:1", "unique-theirs", "GEN 1:2", "unique-ours"]
    );
    assert_eq!(summary.shared_cells, 2);
    assert_eq!(summary.ours_only_cells, 1);
    assert_eq!(summary.theirs_only_cells, 1);

    let flipped = resolve_notebooks(theirs.notebook(), ours.notebook());
    let mut flipped_ids = ids(&flipped);
    flipped_ids.sort_unstable();
    assert_eq!(
        flipped_ids,
        vec!["GEN 1:1", "GEN 1:2", "unique-ours", "unique-theirs"]
    );
}

#[test]
fn theirs_only_cells_at_the_front_stay_first() {
    let ours = base();
    let mut theirs = base();
    theirs
        .add_cell(
            AddCellRequest {
                new_id: "intro".to_string(),
                reference_cell_id: Some("GEN 1:1".to_string()),
                direction: InsertDirection::Above,
                cell_type: None,
                data: CellData::default(),
                metadata: None,
            },
            &session("u1", &Arc::new(ManualClock::new(100))),
        )
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    assert_eq!(ids(&merged), vec!["intro", "GEN 1:1", "GEN 1:2"]);
}

#[test]
fn soft_deleted_cells_are_always_retained() {
    let ours = base();
    let mut theirs = base();
    theirs
        .soft_delete_cell("GEN 1:2", &session("u2", &Arc::new(ManualClock::new(100))))
        .unwrap();

    for merged in [
        resolve_notebooks(ours.notebook(), theirs.notebook()),
        resolve_notebooks(theirs.notebook(), ours.notebook()),
    ] {
        let cell = merged.cell("GEN 1:2").unwrap();
        assert!(cell.is_deleted());
    }
}

#[test]
fn later_soft_delete_beats_earlier_edit() {
    let mut ours = base();
    let mut theirs = base();
    set_value(&mut ours, "GEN 1:2", "edited", "u1", 100);
    theirs
        .soft_delete_cell("GEN 1:2", &session("u2", &Arc::new(ManualClock::new(200))))
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let cell = merged.cell("GEN 1:2").unwrap();
    assert!(cell.is_deleted());
    assert_eq!(cell.value, "edited");
}

#[test]
fn hard_delete_on_one_side_does_not_beat_an_edit_on_the_other() {
    let mut ours = base();
    let mut theirs = base();
    ours.delete_cell("GEN 1:2").unwrap();
    set_value(&mut theirs, "GEN 1:2", "still here", "u2", 100);

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let cell = merged.cell("GEN 1:2").unwrap();
    assert_eq!(cell.value, "still here");
    assert!(!cell.is_deleted());
}

#[test]
fn cells_missing_from_both_sides_stay_gone() {
    let mut ours = base();
    let mut theirs = base();
    ours.delete_cell("GEN 1:2").unwrap();
    theirs.delete_cell("GEN 1:2").unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    assert_eq!(ids(&merged), vec!["GEN 1:1"]);
}

#[test]
fn duplicate_records_merge_their_validators() {
    let mut shared = base();
    set_value(&mut shared, "GEN 1:1", "Z", "u0", 50);
    let mut ours = shared.clone();
    let mut theirs = shared;
    ours.validate_cell_content("GEN 1:1", true, &session("u1", &Arc::new(ManualClock::new(100))))
        .unwrap();
    theirs
        .validate_cell_content("GEN 1:1", true, &session("u2", &Arc::new(ManualClock::new(200))))
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let edits = &merged.cell("GEN 1:1").unwrap().metadata.edits;
    assert_eq!(edits.len(), 2);
    let mut active: Vec<&str> = edits
        .latest_value_edit()
        .unwrap()
        .active_validators()
        .map(|entry| entry.username.as_str())
        .collect();
    active.sort_unstable();
    assert_eq!(active, vec!["u0", "u1", "u2"]);
}

#[test]
fn newer_validator_removal_wins() {
    let mut shared = base();
    set_value(&mut shared, "GEN 1:1", "Z", "u0", 50);
    let ours = shared.clone();
    let mut theirs = shared;
    theirs
        .validate_cell_content("GEN 1:1", false, &session("u0", &Arc::new(ManualClock::new(80))))
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let latest = merged
        .cell("GEN 1:1")
        .unwrap()
        .metadata
        .edits
        .latest_value_edit()
        .unwrap()
        .clone();
    assert!(!latest.is_validated_by("u0"));
}

#[test]
fn notebook_metadata_merges_per_key() {
    let mut ours = base();
    let mut theirs = base();
    ours.update_notebook_metadata(
        "textDirection",
        json!("rtl"),
        &session("u1", &Arc::new(ManualClock::new(100))),
    )
    .unwrap();
    let their_session = session("u2", &Arc::new(ManualClock::new(200)));
    theirs
        .update_notebook_metadata("textDirection", json!("ltr"), &their_session)
        .unwrap();
    theirs
        .update_notebook_metadata("corpusMarker", json!("NT"), &their_session)
        .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    assert_eq!(
        merged.metadata.fields.get("textDirection"),
        Some(&json!("ltr"))
    );
    assert_eq!(merged.metadata.fields.get("corpusMarker"), Some(&json!("NT")));
    assert_eq!(merged.metadata.edits.len(), 3);
}

#[test]
fn preview_records_merge_without_winning() {
    let mut ours = base();
    let theirs = base();
    ours.update_cell_content(
        "GEN 1:1",
        "suggestion",
        EditType::LlmGeneration,
        ContentUpdateOptions::preview(),
        &session("u1", &Arc::new(ManualClock::new(100))),
    )
    .unwrap();

    let merged = resolve_notebooks(ours.notebook(), theirs.notebook());
    let cell = merged.cell("GEN 1:1").unwrap();
    assert_eq!(cell.value, "X");
    assert_eq!(cell.metadata.edits.len(), 1);
}

#[test]
fn unparseable_inputs_name_the_side() {
    let valid = base().to_json_string().unwrap();
    assert!(matches!(
        resolve("not json", &valid),
        Err(MergeError::Parse {
            side: Side::Ours,
            ..
        })
    ));
    assert!(matches!(
        resolve(&valid, "[1, 2]"),
        Err(MergeError::Parse {
            side: Side::Theirs,
            ..
        })
    ));
}

#[test]
fn serialized_merge_round_trips_through_json() {
    let mut ours = base();
    let mut theirs = base();
    set_value(&mut ours, "GEN 1:1", "A", "ua", 100);
    set_value(&mut theirs, "GEN 1:2", "B", "ub", 200);

    let text = resolve(
        &ours.to_json_string().unwrap(),
        &theirs.to_json_string().unwrap(),
    )
    .unwrap();
    let merged = Notebook::from_json_str(&text).unwrap();
    assert_eq!(merged.cell("GEN 1:1").unwrap().value, "A");
    assert_eq!(merged.cell("GEN 1:2").unwrap().value, "B");
}
