use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::applications::domain::{
    Actor, Application, ApplicationId, ApplicationStatus, Document, DocumentId, FormData,
    HistoryEntry, HistoryEntryId, UserId,
};
use crate::applications::repository::{
    ApplicationRepository, NewApplication, NewDocument, NotifyError, PendingEntry,
    RepositoryError, StatusChange, StatusNotice, StatusNotifier,
};
use crate::applications::router::{USER_ID_HEADER, USER_ROLE_HEADER};
use crate::applications::{
    application_router, ApplicationLifecycleService, TransitionMode, TransitionPolicy,
};

pub(super) const OWNER: Actor = Actor::student(42);
pub(super) const STRANGER: Actor = Actor::student(99);
pub(super) const REVIEWER: Actor = Actor::admin(7);

pub(super) type MemoryService = ApplicationLifecycleService<MemoryRepository, RecordingNotifier>;

pub(super) fn build_service() -> (MemoryService, Arc<MemoryRepository>, Arc<RecordingNotifier>) {
    build_service_with(TransitionMode::Permissive)
}

pub(super) fn build_service_with(
    mode: TransitionMode,
) -> (MemoryService, Arc<MemoryRepository>, Arc<RecordingNotifier>) {
    let repository = Arc::new(MemoryRepository::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = ApplicationLifecycleService::new(
        repository.clone(),
        notifier.clone(),
        TransitionPolicy::new(mode),
    );
    (service, repository, notifier)
}

pub(super) fn form() -> Value {
    json!({
        "personal": { "first_name": "Ada", "last_name": "Lovelace" },
        "academics": { "gpa": 3.9 }
    })
}

/// Draft owned by [`OWNER`], walked forward to `status` through the service.
pub(super) fn application_in<R, N>(
    service: &ApplicationLifecycleService<R, N>,
    status: ApplicationStatus,
) -> Application
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let application = service.create(OWNER, form()).expect("create draft");
    if status == ApplicationStatus::Draft {
        return application;
    }
    let application = service
        .request_submission(application.id, OWNER)
        .expect("submit draft");
    if status == ApplicationStatus::Submitted {
        return application;
    }
    let application = service
        .set_status(application.id, REVIEWER, ApplicationStatus::Review, None)
        .expect("move to review");
    if status == ApplicationStatus::Review {
        return application;
    }
    service
        .set_status(application.id, REVIEWER, status, None)
        .expect("decide")
}

#[derive(Debug, Default)]
struct MemoryState {
    applications: BTreeMap<ApplicationId, Application>,
    history: Vec<HistoryEntry>,
    documents: Vec<Document>,
    next_application: i64,
    next_entry: i64,
    next_document: i64,
}

impl MemoryState {
    fn push_entry(&mut self, id: ApplicationId, entry: PendingEntry) -> HistoryEntry {
        self.next_entry += 1;
        let stored = HistoryEntry {
            id: HistoryEntryId(self.next_entry),
            application_id: id,
            status: entry.status,
            notes: entry.notes,
            actor: entry.actor,
            created_at: entry.recorded_at,
        };
        self.history.push(stored.clone());
        stored
    }
}

#[derive(Debug, Default, Clone)]
pub(super) struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    pub(super) fn history_len(&self, id: ApplicationId) -> usize {
        let guard = self.state.lock().expect("repository mutex poisoned");
        guard
            .history
            .iter()
            .filter(|entry| entry.application_id == id)
            .count()
    }

    /// Moves the stored status behind the service's back, as a concurrent writer would.
    pub(super) fn force_status(&self, id: ApplicationId, status: ApplicationStatus) {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        if let Some(application) = guard.applications.get_mut(&id) {
            application.status = status;
        }
    }
}

impl ApplicationRepository for MemoryRepository {
    fn create(
        &self,
        application: NewApplication,
        opening: PendingEntry,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        guard.next_application += 1;
        let id = ApplicationId(guard.next_application);
        let stored = Application {
            id,
            owner: application.owner,
            status: ApplicationStatus::Draft,
            form_data: application.form_data,
            created_at: application.created_at,
            updated_at: application.created_at,
        };
        guard.applications.insert(id, stored.clone());
        let entry = guard.push_entry(id, opening);
        Ok((stored, entry))
    }

    fn fetch(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let guard = self.state.lock().expect("repository mutex poisoned");
        Ok(guard.applications.get(&id).cloned())
    }

    fn list(&self, owner: Option<UserId>) -> Result<Vec<Application>, RepositoryError> {
        let guard = self.state.lock().expect("repository mutex poisoned");
        Ok(guard
            .applications
            .values()
            .filter(|application| owner.map_or(true, |owner| application.owner == owner))
            .cloned()
            .collect())
    }

    fn update_form(
        &self,
        id: ApplicationId,
        form_data: FormData,
        updated_at: DateTime<Utc>,
        expected: Option<ApplicationStatus>,
    ) -> Result<Application, RepositoryError> {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        let application = guard
            .applications
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        if let Some(expected) = expected {
            if application.status != expected {
                return Err(RepositoryError::Conflict { expected });
            }
        }
        application.form_data = form_data;
        application.updated_at = updated_at;
        Ok(application.clone())
    }

    fn transition(
        &self,
        change: StatusChange,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        let application = guard
            .applications
            .get_mut(&change.application_id)
            .ok_or(RepositoryError::NotFound)?;
        if application.status != change.expected {
            return Err(RepositoryError::Conflict {
                expected: change.expected,
            });
        }
        application.status = change.next;
        application.updated_at = change.recorded_at;
        let updated = application.clone();
        let entry = guard.push_entry(change.application_id, change.entry());
        Ok((updated, entry))
    }

    fn append_note(
        &self,
        id: ApplicationId,
        entry: PendingEntry,
    ) -> Result<HistoryEntry, RepositoryError> {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        if !guard.applications.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        Ok(guard.push_entry(id, entry))
    }

    fn history(&self, id: ApplicationId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let guard = self.state.lock().expect("repository mutex poisoned");
        Ok(guard
            .history
            .iter()
            .filter(|entry| entry.application_id == id)
            .cloned()
            .collect())
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let mut guard = self.state.lock().expect("repository mutex poisoned");
        if !guard.applications.contains_key(&document.application_id) {
            return Err(RepositoryError::NotFound);
        }
        guard.next_document += 1;
        let stored = Document {
            id: DocumentId(guard.next_document),
            application_id: document.application_id,
            file_name: document.file_name,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            storage_path: document.storage_path,
            uploaded_at: document.uploaded_at,
        };
        guard.documents.push(stored.clone());
        Ok(stored)
    }

    fn documents(&self, id: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        let guard = self.state.lock().expect("repository mutex poisoned");
        Ok(guard
            .documents
            .iter()
            .filter(|document| document.application_id == id)
            .cloned()
            .collect())
    }
}

/// Lets another writer move the status between the service's read and its guarded write.
pub(super) struct RacingRepository {
    pub(super) inner: MemoryRepository,
    pub(super) interloper: ApplicationStatus,
}

impl ApplicationRepository for RacingRepository {
    fn create(
        &self,
        application: NewApplication,
        opening: PendingEntry,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        self.inner.create(application, opening)
    }

    fn fetch(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn list(&self, owner: Option<UserId>) -> Result<Vec<Application>, RepositoryError> {
        self.inner.list(owner)
    }

    fn update_form(
        &self,
        id: ApplicationId,
        form_data: FormData,
        updated_at: DateTime<Utc>,
        expected: Option<ApplicationStatus>,
    ) -> Result<Application, RepositoryError> {
        self.inner.force_status(id, self.interloper);
        self.inner.update_form(id, form_data, updated_at, expected)
    }

    fn transition(
        &self,
        change: StatusChange,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        self.inner.force_status(change.application_id, self.interloper);
        self.inner.transition(change)
    }

    fn append_note(
        &self,
        id: ApplicationId,
        entry: PendingEntry,
    ) -> Result<HistoryEntry, RepositoryError> {
        self.inner.append_note(id, entry)
    }

    fn history(&self, id: ApplicationId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.inner.history(id)
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        self.inner.insert_document(document)
    }

    fn documents(&self, id: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        self.inner.documents(id)
    }
}

pub(super) struct UnavailableRepository;

impl UnavailableRepository {
    fn offline<T>() -> Result<T, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

impl ApplicationRepository for UnavailableRepository {
    fn create(
        &self,
        _application: NewApplication,
        _opening: PendingEntry,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        Self::offline()
    }

    fn fetch(&self, _id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Self::offline()
    }

    fn list(&self, _owner: Option<UserId>) -> Result<Vec<Application>, RepositoryError> {
        Self::offline()
    }

    fn update_form(
        &self,
        _id: ApplicationId,
        _form_data: FormData,
        _updated_at: DateTime<Utc>,
        _expected: Option<ApplicationStatus>,
    ) -> Result<Application, RepositoryError> {
        Self::offline()
    }

    fn transition(
        &self,
        _change: StatusChange,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        Self::offline()
    }

    fn append_note(
        &self,
        _id: ApplicationId,
        _entry: PendingEntry,
    ) -> Result<HistoryEntry, RepositoryError> {
        Self::offline()
    }

    fn history(&self, _id: ApplicationId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        Self::offline()
    }

    fn insert_document(&self, _document: NewDocument) -> Result<Document, RepositoryError> {
        Self::offline()
    }

    fn documents(&self, _id: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        Self::offline()
    }
}

#[derive(Debug, Default, Clone)]
pub(super) struct RecordingNotifier {
    notices: Arc<Mutex<Vec<StatusNotice>>>,
}

impl RecordingNotifier {
    pub(super) fn notices(&self) -> Vec<StatusNotice> {
        self.notices.lock().expect("notifier mutex poisoned").clone()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, notice: StatusNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl StatusNotifier for FailingNotifier {
    fn notify(&self, _notice: StatusNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay refused".to_string()))
    }
}

pub(super) fn router_with_service(service: MemoryService) -> axum::Router {
    application_router(Arc::new(service))
}

pub(super) fn request(
    method: Method,
    uri: &str,
    actor: Option<Actor>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder
            .header(USER_ID_HEADER, actor.id.to_string())
            .header(USER_ROLE_HEADER, actor.role.label());
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(axum::http::header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize body"))
        }
        None => Body::empty(),
    };
    builder.body(body).expect("build request")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
