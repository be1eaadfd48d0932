use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Application, ApplicationId, ApplicationStatus, Document, FormData, HistoryEntry, UserId,
};

/// Row to insert when an application is first created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApplication {
    pub owner: UserId,
    pub form_data: FormData,
    pub created_at: DateTime<Utc>,
}

/// History row waiting to be appended. The store assigns `id` and `application_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub status: Option<ApplicationStatus>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub recorded_at: DateTime<Utc>,
}

/// A status change guarded by the status the caller observed.
///
/// Stores apply it only while the application still carries `expected`, and write the
/// status update together with its history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub application_id: ApplicationId,
    pub expected: ApplicationStatus,
    pub next: ApplicationStatus,
    pub notes: Option<String>,
    pub actor: UserId,
    pub recorded_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn entry(&self) -> PendingEntry {
        PendingEntry {
            status: Some(self.next),
            notes: self.notes.clone(),
            actor: self.actor,
            recorded_at: self.recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub application_id: ApplicationId,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Storage abstraction so the lifecycle service can be exercised in isolation.
///
/// Every method that writes a status also writes its history entry in the same unit of
/// work: either both rows land or neither does. History rows are never updated or removed.
pub trait ApplicationRepository: Send + Sync {
    fn create(
        &self,
        application: NewApplication,
        opening: PendingEntry,
    ) -> Result<(Application, HistoryEntry), RepositoryError>;

    fn fetch(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError>;

    /// All applications, or only those owned by `owner`, ordered by id.
    fn list(&self, owner: Option<UserId>) -> Result<Vec<Application>, RepositoryError>;

    /// Replaces the form payload. With `expected` set, the write only lands while the
    /// application still carries that status and `Conflict` is returned otherwise.
    fn update_form(
        &self,
        id: ApplicationId,
        form_data: FormData,
        updated_at: DateTime<Utc>,
        expected: Option<ApplicationStatus>,
    ) -> Result<Application, RepositoryError>;

    /// Returns `Conflict` when the stored status no longer equals `change.expected`.
    fn transition(&self, change: StatusChange)
        -> Result<(Application, HistoryEntry), RepositoryError>;

    fn append_note(
        &self,
        id: ApplicationId,
        entry: PendingEntry,
    ) -> Result<HistoryEntry, RepositoryError>;

    /// History in insertion order (`created_at`, then `id`).
    fn history(&self, id: ApplicationId) -> Result<Vec<HistoryEntry>, RepositoryError>;

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError>;

    fn documents(&self, id: ApplicationId) -> Result<Vec<Document>, RepositoryError>;

    /// Newest timestamp the store holds, used to keep new entries ordered after a restart.
    fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(None)
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("status changed concurrently (expected {expected})")]
    Conflict { expected: ApplicationStatus },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outbound hook fired after a status change commits (e-mail, queue, webhook adapters).
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, notice: StatusNotice) -> Result<(), NotifyError>;
}

/// Payload describing a committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    pub application_id: ApplicationId,
    pub owner: UserId,
    pub from: ApplicationStatus,
    pub to: ApplicationStatus,
    pub actor: UserId,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Notifier that drops every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl StatusNotifier for SilentNotifier {
    fn notify(&self, _notice: StatusNotice) -> Result<(), NotifyError> {
        Ok(())
    }
}
