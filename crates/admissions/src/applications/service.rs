use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, info, warn};

use super::documents::{self, DocumentRejection, DocumentUpload};
use super::domain::{
    Actor, Application, ApplicationId, ApplicationStatus, Document, FormData, FormDataError,
    HistoryEntry, Role, UserId,
};
use super::history::{HistoryOrder, HistoryTrail};
use super::policy::{DenialKind, TransitionPolicy, TransitionVerdict};
use super::repository::{
    ApplicationRepository, NewApplication, NewDocument, PendingEntry, RepositoryError,
    StatusChange, StatusNotice, StatusNotifier,
};

const CREATED_NOTE: &str = "Application created";

/// Lifecycle manager: owns `status`, the audit trail, and the CRUD rules around them.
pub struct ApplicationLifecycleService<R, N> {
    repository: Arc<R>,
    notifier: Arc<N>,
    policy: TransitionPolicy,
    clock: MonotonicClock,
}

impl<R, N> ApplicationLifecycleService<R, N>
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    pub fn new(repository: Arc<R>, notifier: Arc<N>, policy: TransitionPolicy) -> Self {
        let clock = match repository.latest_timestamp() {
            Ok(floor) => MonotonicClock::starting_after(floor),
            Err(err) => {
                warn!(error = %err, "latest stored timestamp unavailable, clock follows wall time");
                MonotonicClock::default()
            }
        };
        Self {
            repository,
            notifier,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Create a draft owned by `owner` and record its opening history entry.
    pub fn create(
        &self,
        owner: Actor,
        form_data: serde_json::Value,
    ) -> Result<Application, LifecycleError> {
        let form_data = FormData::new(form_data)?;
        let now = self.clock.now();

        let (application, _) = self.repository.create(
            NewApplication {
                owner: owner.id,
                form_data,
                created_at: now,
            },
            PendingEntry {
                status: Some(ApplicationStatus::Draft),
                notes: Some(CREATED_NOTE.to_string()),
                actor: owner.id,
                recorded_at: now,
            },
        )?;

        info!(application_id = %application.id, owner = %owner.id, "application created");
        Ok(application)
    }

    /// Owner-initiated `draft -> submitted`.
    pub fn request_submission(
        &self,
        id: ApplicationId,
        actor: Actor,
    ) -> Result<Application, LifecycleError> {
        let application = self.load(id)?;
        if application.owner != actor.id {
            debug!(application_id = %id, actor = %actor.id, "submission by non-owner refused");
            return Err(LifecycleError::Forbidden(
                "only the owner can submit an application",
            ));
        }
        self.apply(
            application,
            actor.id,
            Role::Student,
            ApplicationStatus::Submitted,
            None,
        )
    }

    /// Reviewer-initiated status change with optional notes.
    pub fn set_status(
        &self,
        id: ApplicationId,
        actor: Actor,
        next: ApplicationStatus,
        notes: Option<String>,
    ) -> Result<Application, LifecycleError> {
        let application = self.load(id)?;
        if !actor.is_admin() {
            return Err(LifecycleError::Forbidden(
                "administrative authority required to set status",
            ));
        }
        self.apply(application, actor.id, Role::Admin, next, normalize(notes))
    }

    /// Entry point for `PUT /status`: admins set any status, everyone else may only submit.
    pub fn change_status(
        &self,
        id: ApplicationId,
        actor: Actor,
        next: ApplicationStatus,
        notes: Option<String>,
    ) -> Result<Application, LifecycleError> {
        let application = self.load(id)?;
        if actor.is_admin() {
            return self.apply(application, actor.id, Role::Admin, next, normalize(notes));
        }
        if application.owner != actor.id {
            return Err(LifecycleError::Forbidden("access forbidden"));
        }
        self.apply(application, actor.id, Role::Student, next, normalize(notes))
    }

    /// Append a reviewer note without touching `status`.
    pub fn add_note(
        &self,
        id: ApplicationId,
        actor: Actor,
        notes: &str,
    ) -> Result<HistoryEntry, LifecycleError> {
        self.load(id)?;
        if !actor.is_admin() {
            return Err(LifecycleError::Forbidden(
                "administrative authority required to add notes",
            ));
        }
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(LifecycleError::Validation("notes must not be empty".to_string()));
        }

        let entry = self
            .repository
            .append_note(
                id,
                PendingEntry {
                    status: None,
                    notes: Some(notes.to_string()),
                    actor: actor.id,
                    recorded_at: self.clock.now(),
                },
            )
            .map_err(|err| not_found_as(id, err))?;

        info!(application_id = %id, actor = %actor.id, entry_id = %entry.id, "review note added");
        Ok(entry)
    }

    pub fn history(
        &self,
        id: ApplicationId,
        actor: Actor,
        order: HistoryOrder,
    ) -> Result<HistoryTrail, LifecycleError> {
        let application = self.load(id)?;
        self.authorize_access(&application, actor)?;
        let entries = self.repository.history(id)?;
        Ok(HistoryTrail::new(id, entries, order))
    }

    pub fn get(&self, id: ApplicationId, actor: Actor) -> Result<Application, LifecycleError> {
        let application = self.load(id)?;
        self.authorize_access(&application, actor)?;
        Ok(application)
    }

    pub fn list(&self, actor: Actor) -> Result<Vec<Application>, LifecycleError> {
        let owner = if actor.is_admin() { None } else { Some(actor.id) };
        Ok(self.repository.list(owner)?)
    }

    /// Replace the form payload. Owners may only edit drafts; admins may edit at any time.
    pub fn update_form(
        &self,
        id: ApplicationId,
        actor: Actor,
        form_data: serde_json::Value,
    ) -> Result<Application, LifecycleError> {
        let application = self.load(id)?;
        self.authorize_access(&application, actor)?;
        if !actor.is_admin() && application.status != ApplicationStatus::Draft {
            return Err(LifecycleError::NotEditable {
                id,
                status: application.status,
            });
        }
        let form_data = FormData::new(form_data)?;
        let expected = if actor.is_admin() {
            None
        } else {
            Some(ApplicationStatus::Draft)
        };

        let updated = self
            .repository
            .update_form(id, form_data, self.clock.now(), expected)
            .map_err(|err| match err {
                RepositoryError::Conflict { .. } => LifecycleError::Conflict(id),
                other => not_found_as(id, other),
            })?;
        debug!(application_id = %id, actor = %actor.id, "form data updated");
        Ok(updated)
    }

    pub fn register_document(
        &self,
        id: ApplicationId,
        actor: Actor,
        upload: DocumentUpload,
    ) -> Result<Document, LifecycleError> {
        let application = self.load(id)?;
        self.authorize_access(&application, actor)?;
        let accepted = documents::accept(upload)?;
        let storage_path = documents::storage_path(id, &accepted.file_name);

        let document = self
            .repository
            .insert_document(NewDocument {
                application_id: id,
                file_name: accepted.file_name,
                content_type: accepted.content_type,
                size_bytes: accepted.size_bytes,
                storage_path,
                uploaded_at: self.clock.now(),
            })
            .map_err(|err| not_found_as(id, err))?;

        info!(application_id = %id, document_id = %document.id, "document registered");
        Ok(document)
    }

    pub fn documents(
        &self,
        id: ApplicationId,
        actor: Actor,
    ) -> Result<Vec<Document>, LifecycleError> {
        let application = self.load(id)?;
        self.authorize_access(&application, actor)?;
        Ok(self.repository.documents(id)?)
    }

    fn load(&self, id: ApplicationId) -> Result<Application, LifecycleError> {
        self.repository
            .fetch(id)?
            .ok_or(LifecycleError::NotFound(id))
    }

    fn authorize_access(
        &self,
        application: &Application,
        actor: Actor,
    ) -> Result<(), LifecycleError> {
        if actor.can_access(application) {
            Ok(())
        } else {
            Err(LifecycleError::Forbidden("access forbidden"))
        }
    }

    fn apply(
        &self,
        application: Application,
        actor: UserId,
        role: Role,
        next: ApplicationStatus,
        notes: Option<String>,
    ) -> Result<Application, LifecycleError> {
        let current = application.status;
        match self.policy.evaluate(current, next, role) {
            TransitionVerdict::Allow => {}
            TransitionVerdict::Deny(DenialKind::Forbidden) => {
                debug!(application_id = %application.id, %role, to = %next, "transition forbidden");
                return Err(LifecycleError::Forbidden(
                    "students can only submit applications",
                ));
            }
            TransitionVerdict::Deny(DenialKind::Invalid) => {
                debug!(application_id = %application.id, from = %current, to = %next, "transition rejected");
                return Err(LifecycleError::InvalidTransition {
                    from: current,
                    to: next,
                });
            }
        }

        let change = StatusChange {
            application_id: application.id,
            expected: current,
            next,
            notes,
            actor,
            recorded_at: self.clock.now(),
        };
        let (updated, entry) = self
            .repository
            .transition(change)
            .map_err(|err| match err {
                RepositoryError::Conflict { .. } => LifecycleError::Conflict(application.id),
                other => not_found_as(application.id, other),
            })?;

        info!(
            application_id = %updated.id,
            actor = %actor,
            from = %current,
            to = %next,
            entry_id = %entry.id,
            "application status changed"
        );

        let notice = StatusNotice {
            application_id: updated.id,
            owner: updated.owner,
            from: current,
            to: next,
            actor,
        };
        if let Err(err) = self.notifier.notify(notice) {
            warn!(application_id = %updated.id, error = %err, "status notification failed");
        }

        Ok(updated)
    }
}

fn normalize(notes: Option<String>) -> Option<String> {
    notes
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn not_found_as(id: ApplicationId, err: RepositoryError) -> LifecycleError {
    match err {
        RepositoryError::NotFound => LifecycleError::NotFound(id),
        other => LifecycleError::Repository(other),
    }
}

/// Hands out strictly increasing UTC timestamps so history order never depends on ties.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    /// Stored rows survive restarts, so a new process must not hand out earlier timestamps.
    fn starting_after(floor: Option<DateTime<Utc>>) -> Self {
        Self {
            last: Mutex::new(floor),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let wall = truncate_to_micros(Utc::now());
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = match *last {
            Some(previous) if wall <= previous => previous + Duration::microseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

/// Stores keep microsecond precision; handing out finer values would reorder after a reload.
fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_nanosecond(at.nanosecond() / 1_000 * 1_000)
        .unwrap_or(at)
}

/// Error raised by the lifecycle service.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("application {id} can no longer be edited (status {status})")]
    NotEditable {
        id: ApplicationId,
        status: ApplicationStatus,
    },
    #[error("application {0} was modified concurrently; reload and retry")]
    Conflict(ApplicationId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<FormDataError> for LifecycleError {
    fn from(value: FormDataError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<DocumentRejection> for LifecycleError {
    fn from(value: DocumentRejection) -> Self {
        Self::Validation(value.to_string())
    }
}
