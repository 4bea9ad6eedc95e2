//! Audio attachment use-cases.
//!
//! # Responsibility
//! - Decode recorded audio payloads sent by the editor and store them as cell
//!   attachments.
//! - Re-check attachment files on disk and flag the missing ones.
//!
//! # Invariants
//! - A malformed payload never writes a file or touches the document.
//! - Locked cells are rejected before any bytes are written.
//! - Results cross the host boundary as `AttachmentSaveStatus`; this module
//!   never panics on bad input.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::document::{CellDocument, DocumentError, MutationOutcome};
use crate::merge::attachments::revalidate_attachments;
use crate::model::cell::Attachment;
use crate::repo::document_repo::{DocumentRepository, RepoError};
use crate::session::EditSession;

const ATTACHMENT_ROOT: &str = ".project/attachments/files";
const DEFAULT_EXTENSION: &str = "webm";
const FALLBACK_BOOK: &str = "misc";

pub const MALFORMED_PAYLOAD_CODE: &str = "malformed_attachment_payload";

static DATA_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^data:([a-zA-Z0-9.+/-]+)?(?:;[^;,]*)*;base64,(.*)$")
        .expect("valid data url regex")
});
static SAFE_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid segment regex"));

/// Attachment use-case error.
#[derive(Debug)]
pub enum AttachmentError {
    MalformedPayload(String),
    InvalidAttachmentId(String),
    Document(DocumentError),
    Repo(RepoError),
}

impl Display for AttachmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPayload(message) => write!(f, "malformed attachment payload: {message}"),
            Self::InvalidAttachmentId(id) => write!(f, "invalid attachment id: `{id}`"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AttachmentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Document(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DocumentError> for AttachmentError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<RepoError> for AttachmentError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Decoded audio bytes plus the MIME type a data URL declared, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

/// Request model for `save_audio_attachment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAudioRequest {
    pub cell_id: String,
    pub attachment_id: String,
    /// Raw base64 or a `data:<mime>;base64,` URL.
    pub payload: String,
    /// File extension; derived from the data URL MIME type when `None`.
    pub extension: Option<String>,
}

/// Host-facing result of saving one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentSaveStatus {
    pub ok: bool,
    pub attachment_id: Option<String>,
    /// Stable machine-readable failure code.
    pub error_code: Option<String>,
    pub message: String,
}

impl AttachmentSaveStatus {
    fn success(message: impl Into<String>, attachment_id: String) -> Self {
        Self {
            ok: true,
            attachment_id: Some(attachment_id),
            error_code: None,
            message: message.into(),
        }
    }

    fn failure(err: &AttachmentError) -> Self {
        let error_code = match err {
            AttachmentError::MalformedPayload(_) => Some(MALFORMED_PAYLOAD_CODE.to_string()),
            AttachmentError::InvalidAttachmentId(_) => Some("invalid_attachment_id".to_string()),
            AttachmentError::Document(DocumentError::CellNotFound(_)) => {
                Some("cell_not_found".to_string())
            }
            AttachmentError::Document(_) => Some("document_error".to_string()),
            AttachmentError::Repo(_) => Some("storage_error".to_string()),
        };
        Self {
            ok: false,
            attachment_id: None,
            error_code,
            message: err.to_string(),
        }
    }

    fn locked() -> Self {
        Self {
            ok: false,
            attachment_id: None,
            error_code: Some("cell_locked".to_string()),
            message: "cell is locked".to_string(),
        }
    }
}

/// One attachment whose availability flag changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidatedAttachment {
    pub cell_id: String,
    pub attachment_id: String,
    pub is_missing: bool,
}

/// Decodes an audio payload.
///
/// # Errors
/// - `MalformedPayload` for empty input, a non-base64 data URL or invalid
///   base64 text.
pub fn decode_audio_payload(payload: &str) -> Result<DecodedAudio, AttachmentError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(AttachmentError::MalformedPayload(
            "payload is empty".to_string(),
        ));
    }

    let (mime, encoded) = if trimmed.starts_with("data:") {
        let captures = DATA_URL_RE.captures(trimmed).ok_or_else(|| {
            AttachmentError::MalformedPayload("data url is not base64 encoded".to_string())
        })?;
        let mime = captures.get(1).map(|m| m.as_str().to_ascii_lowercase());
        let encoded = captures.get(2).map_or("", |m| m.as_str());
        (mime, encoded)
    } else {
        (None, trimmed)
    };

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(AttachmentError::MalformedPayload(
            "payload has no data".to_string(),
        ));
    }
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| AttachmentError::MalformedPayload(err.to_string()))?;
    Ok(DecodedAudio { bytes, mime })
}

/// Project-relative path of an attachment file, grouped by book.
///
/// The book is the part of the cell id before the first space
/// (`"GEN 1:1"` -> `GEN`).
pub fn attachment_path(cell_id: &str, attachment_id: &str, extension: &str) -> String {
    let book = cell_id
        .split_whitespace()
        .next()
        .filter(|book| SAFE_SEGMENT_RE.is_match(book))
        .unwrap_or(FALLBACK_BOOK);
    format!("{ATTACHMENT_ROOT}/{book}/{attachment_id}.{extension}")
}

/// Writes the payload through `repo`, then records and selects the attachment.
pub fn save_audio_attachment<R: DocumentRepository>(
    doc: &mut CellDocument,
    repo: &R,
    request: &SaveAudioRequest,
    session: &EditSession,
) -> AttachmentSaveStatus {
    match try_save_audio_attachment(doc, repo, request, session) {
        Ok(MutationOutcome::Locked) => {
            info!(
                "event=attachment_save module=service status=locked cell_id={}",
                request.cell_id
            );
            AttachmentSaveStatus::locked()
        }
        Ok(_) => {
            info!(
                "event=attachment_save module=service status=ok cell_id={} attachment_id={}",
                request.cell_id, request.attachment_id
            );
            AttachmentSaveStatus::success("attachment saved", request.attachment_id.clone())
        }
        Err(err) => {
            warn!(
                "event=attachment_save module=service status=error cell_id={} error={}",
                request.cell_id, err
            );
            AttachmentSaveStatus::failure(&err)
        }
    }
}

fn try_save_audio_attachment<R: DocumentRepository>(
    doc: &mut CellDocument,
    repo: &R,
    request: &SaveAudioRequest,
    session: &EditSession,
) -> Result<MutationOutcome, AttachmentError> {
    if !SAFE_SEGMENT_RE.is_match(&request.attachment_id) {
        return Err(AttachmentError::InvalidAttachmentId(
            request.attachment_id.clone(),
        ));
    }
    let cell = doc
        .cell(&request.cell_id)
        .ok_or_else(|| DocumentError::CellNotFound(request.cell_id.clone()))?;
    if cell.is_locked() {
        return Ok(MutationOutcome::Locked);
    }

    let decoded = decode_audio_payload(&request.payload)?;
    let extension = request
        .extension
        .as_deref()
        .map(|ext| ext.trim_start_matches('.'))
        .filter(|ext| SAFE_SEGMENT_RE.is_match(ext))
        .map(str::to_ascii_lowercase)
        .or_else(|| decoded.mime.as_deref().and_then(extension_for_mime))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let path = attachment_path(&request.cell_id, &request.attachment_id, &extension);

    repo.write_attachment(&path, &decoded.bytes)?;

    let attachment = Attachment::audio(path, session.author(), session.now_ms());
    let outcome =
        doc.update_cell_attachment(&request.cell_id, &request.attachment_id, attachment)?;
    if outcome == MutationOutcome::Locked {
        return Ok(outcome);
    }
    Ok(doc.select_audio_attachment(&request.cell_id, &request.attachment_id, session)?)
}

/// Flags attachments whose files are gone and clears the flag on those that
/// came back.
pub fn revalidate_missing_attachments<R: DocumentRepository>(
    doc: &mut CellDocument,
    repo: &R,
    session: &EditSession,
) -> Vec<RevalidatedAttachment> {
    let now = session.now_ms();
    let mut changed = Vec::new();
    for cell in doc.cells_mut() {
        let ids = revalidate_attachments(cell, |url| repo.attachment_exists(url), now);
        for attachment_id in ids {
            let is_missing = cell
                .metadata
                .attachments
                .get(&attachment_id)
                .is_some_and(|attachment| attachment.is_missing());
            changed.push(RevalidatedAttachment {
                cell_id: cell.id().to_string(),
                attachment_id,
                is_missing,
            });
        }
    }
    info!(
        "event=attachment_revalidate module=service status=ok changed={}",
        changed.len()
    );
    changed
}

fn extension_for_mime(mime: &str) -> Option<String> {
    let extension = match mime {
        "audio/webm" | "video/webm" => "webm",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => "m4a",
        "audio/ogg" => "ogg",
        _ => return None,
    };
    Some(extension.to_string())
}
