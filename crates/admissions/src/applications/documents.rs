use mime::Mime;
use serde::Deserialize;

use super::domain::ApplicationId;

/// Largest supporting document accepted, in bytes.
pub const MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

const STORAGE_BUCKET: &str = "application-documents";

const DOC: &str = "application/msword";
const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Upload metadata reported by the client after it pushed bytes to the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentUpload {
    pub file_name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

/// Validated upload ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AcceptedUpload {
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentRejection {
    #[error("file name is required")]
    MissingFileName,
    #[error("invalid file type '{0}': only PDF, JPEG, PNG, and DOC files are allowed")]
    UnsupportedType(String),
    #[error("file is empty")]
    Empty,
    #[error("file exceeds the {max} byte limit ({found} bytes)")]
    TooLarge { max: u64, found: u64 },
}

const ALLOWED_TYPES: [&str; 5] = ["application/pdf", "image/jpeg", "image/png", DOC, DOCX];

fn is_allowed(content_type: &Mime) -> bool {
    ALLOWED_TYPES.contains(&content_type.essence_str())
}

pub(crate) fn accept(upload: DocumentUpload) -> Result<AcceptedUpload, DocumentRejection> {
    let file_name = sanitize_file_name(&upload.file_name);
    if file_name.is_empty() {
        return Err(DocumentRejection::MissingFileName);
    }

    let content_type = match upload.content_type.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<Mime>()
            .map_err(|_| DocumentRejection::UnsupportedType(raw.to_string()))?,
        _ => mime_guess::from_path(&file_name).first_or_octet_stream(),
    };
    if !is_allowed(&content_type) {
        return Err(DocumentRejection::UnsupportedType(
            content_type.essence_str().to_string(),
        ));
    }

    if upload.size_bytes == 0 {
        return Err(DocumentRejection::Empty);
    }
    if upload.size_bytes > MAX_DOCUMENT_BYTES {
        return Err(DocumentRejection::TooLarge {
            max: MAX_DOCUMENT_BYTES,
            found: upload.size_bytes,
        });
    }

    Ok(AcceptedUpload {
        file_name,
        content_type: content_type.essence_str().to_string(),
        size_bytes: upload.size_bytes,
    })
}

/// Keeps only the final path component and drops control characters.
fn sanitize_file_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    last.chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Blob-store locator, unique per upload.
pub(crate) fn storage_path(application_id: ApplicationId, file_name: &str) -> String {
    format!(
        "{STORAGE_BUCKET}/{application_id}/{}-{file_name}",
        uuid::Uuid::new_v4()
    )
}
