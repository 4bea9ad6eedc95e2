use std::sync::Arc;

use codex_core::service::attachment_service::{
    revalidate_missing_attachments, save_audio_attachment, SaveAudioRequest,
    MALFORMED_PAYLOAD_CODE,
};
use codex_core::{
    Cell, CellDocument, DocumentRepository, EditSession, FileDocumentRepository, ManualClock,
    Notebook,
};

fn session(clock: &Arc<ManualClock>) -> EditSession {
    EditSession::new("u1", clock.clone())
}

fn document() -> CellDocument {
    CellDocument::new(Notebook::new(vec![Cell::new("GEN 1:1", "X")]))
}

fn request(payload: &str, extension: Option<&str>) -> SaveAudioRequest {
    SaveAudioRequest {
        cell_id: "GEN 1:1".to_string(),
        attachment_id: "audio-1".to_string(),
        payload: payload.to_string(),
        extension: extension.map(str::to_string),
    }
}

#[test]
fn saves_decoded_bytes_and_selects_the_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileDocumentRepository::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();

    let status = save_audio_attachment(
        &mut doc,
        &repo,
        &request("data:audio/wav;base64,aGVsbG8=", None),
        &session(&clock),
    );

    assert!(status.ok, "{}", status.message);
    assert_eq!(status.attachment_id.as_deref(), Some("audio-1"));
    let stored = dir
        .path()
        .join(".project/attachments/files/GEN/audio-1.wav");
    assert_eq!(std::fs::read(&stored).unwrap(), b"hello");

    let metadata = &doc.cell("GEN 1:1").unwrap().metadata;
    let attachment = &metadata.attachments["audio-1"];
    assert_eq!(attachment.url, ".project/attachments/files/GEN/audio-1.wav");
    assert_eq!(attachment.created_by.as_deref(), Some("u1"));
    assert_eq!(metadata.selected_audio_id.as_deref(), Some("audio-1"));
    assert_eq!(metadata.selection_timestamp, Some(1_000));
    assert!(repo.attachment_exists(&attachment.url));
}

#[test]
fn explicit_extension_wins_over_mime() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileDocumentRepository::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();

    let status = save_audio_attachment(
        &mut doc,
        &repo,
        &request("aGVsbG8=", Some(".M4A")),
        &session(&clock),
    );

    assert!(status.ok);
    assert!(dir
        .path()
        .join(".project/attachments/files/GEN/audio-1.m4a")
        .is_file());
}

#[test]
fn malformed_payloads_change_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileDocumentRepository::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    let before = doc.clone();

    for payload in ["", "data:audio/webm,raw", "%%%not-base64%%%"] {
        let status = save_audio_attachment(&mut doc, &repo, &request(payload, None), &session(&clock));
        assert!(!status.ok);
        assert_eq!(status.error_code.as_deref(), Some(MALFORMED_PAYLOAD_CODE));
        assert!(status.attachment_id.is_none());
    }

    assert_eq!(doc, before);
    assert!(!dir.path().join(".project").exists());
}

#[test]
fn locked_and_unknown_cells_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileDocumentRepository::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    doc.update_cell_is_locked("GEN 1:1", true, &session(&clock))
        .unwrap();

    let status = save_audio_attachment(&mut doc, &repo, &request("aGVsbG8=", None), &session(&clock));
    assert!(!status.ok);
    assert_eq!(status.error_code.as_deref(), Some("cell_locked"));
    assert!(!dir.path().join(".project").exists());

    let mut unknown = request("aGVsbG8=", None);
    unknown.cell_id = "EXO 1:1".to_string();
    let status = save_audio_attachment(&mut doc, &repo, &unknown, &session(&clock));
    assert_eq!(status.error_code.as_deref(), Some("cell_not_found"));

    let mut escaping = request("aGVsbG8=", None);
    escaping.attachment_id = "../escape".to_string();
    let status = save_audio_attachment(&mut doc, &repo, &escaping, &session(&clock));
    assert_eq!(status.error_code.as_deref(), Some("invalid_attachment_id"));
}

#[test]
fn revalidation_tracks_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FileDocumentRepository::new(dir.path());
    let clock = Arc::new(ManualClock::new(1_000));
    let mut doc = document();
    let status = save_audio_attachment(&mut doc, &repo, &request("aGVsbG8=", None), &session(&clock));
    assert!(status.ok);

    assert!(revalidate_missing_attachments(&mut doc, &repo, &session(&clock)).is_empty());

    let stored = dir
        .path()
        .join(".project/attachments/files/GEN/audio-1.webm");
    std::fs::remove_file(&stored).unwrap();
    clock.advance(10);
    let changed = revalidate_missing_attachments(&mut doc, &repo, &session(&clock));
    assert_eq!(changed.len(), 1);
    assert!(changed[0].is_missing);
    assert_eq!(changed[0].cell_id, "GEN 1:1");
    let attachment = &doc.cell("GEN 1:1").unwrap().metadata.attachments["audio-1"];
    assert_eq!(attachment.is_missing, Some(true));
    assert_eq!(attachment.updated_at, 1_010);

    std::fs::write(&stored, b"hello").unwrap();
    let changed = revalidate_missing_attachments(&mut doc, &repo, &session(&clock));
    assert_eq!(changed.len(), 1);
    assert!(!changed[0].is_missing);
}
