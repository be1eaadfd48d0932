//! Application status lifecycle and its append-only audit trail.
//!
//! The lifecycle service is the only writer of `status`; every change it makes is recorded
//! as a history entry in the same store transaction. Storage and outbound notifications sit
//! behind the [`ApplicationRepository`] and [`StatusNotifier`] traits.

pub(crate) mod documents;
pub mod domain;
pub mod history;
pub mod policy;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use documents::{DocumentRejection, DocumentUpload, MAX_DOCUMENT_BYTES};
pub use domain::{
    Actor, Application, ApplicationId, ApplicationStatus, Document, DocumentId, FormData,
    FormDataError, HistoryEntry, HistoryEntryId, Role, UserId,
};
pub use history::{HistoryOrder, HistoryTrail};
pub use policy::{DenialKind, TransitionMode, TransitionPolicy, TransitionVerdict};
pub use repository::{
    ApplicationRepository, NewApplication, NewDocument, NotifyError, PendingEntry,
    RepositoryError, SilentNotifier, StatusChange, StatusNotice, StatusNotifier,
};
pub use router::{actor_from_headers, application_router, ActorRejection};
pub use service::{ApplicationLifecycleService, LifecycleError};
pub use sqlite::SqliteApplicationRepository;
