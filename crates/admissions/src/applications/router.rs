use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::documents::DocumentUpload;
use super::domain::{Actor, ApplicationId, ApplicationStatus, Role, UserId};
use super::history::HistoryOrder;
use super::repository::{ApplicationRepository, StatusNotifier};
use super::service::{ApplicationLifecycleService, LifecycleError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

type SharedService<R, N> = Arc<ApplicationLifecycleService<R, N>>;

/// Router builder exposing the application lifecycle over HTTP.
pub fn application_router<R, N>(service: SharedService<R, N>) -> Router
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    Router::new()
        .route(
            "/api/applications",
            post(create_handler::<R, N>).get(list_handler::<R, N>),
        )
        .route(
            "/api/applications/:id",
            get(get_handler::<R, N>).put(update_handler::<R, N>),
        )
        .route("/api/applications/:id/status", put(status_handler::<R, N>))
        .route("/api/applications/:id/notes", post(note_handler::<R, N>))
        .route("/api/applications/:id/history", get(history_handler::<R, N>))
        .route(
            "/api/applications/:id/documents",
            post(upload_handler::<R, N>).get(documents_handler::<R, N>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRequest {
    /// Absent means an empty form; an explicit `null` is passed through and rejected.
    #[serde(default = "empty_form")]
    pub(crate) form_data: serde_json::Value,
}

fn empty_form() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateRequest {
    pub(crate) form_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusRequest {
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NoteRequest {
    pub(crate) notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(default)]
    pub(crate) order: Option<HistoryOrder>,
}

pub(crate) async fn create_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match service.create(actor, request.form_data) {
        Ok(application) => (StatusCode::CREATED, Json(application)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn list_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    match service.list(actor) {
        Ok(applications) => Json(applications).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn get_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match service.get(id, actor) {
        Ok(application) => Json(application).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn update_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateRequest>, JsonRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match service.update_form(id, actor, request.form_data) {
        Ok(application) => Json(application).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn status_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(next) = ApplicationStatus::parse(&request.status) else {
        return bad_request(format!("invalid status '{}'", request.status));
    };

    match service.change_status(id, actor, next, request.notes) {
        Ok(application) => Json(application).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn note_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<NoteRequest>, JsonRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match service.add_note(id, actor, &request.notes) {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn history_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let order = match query {
        Ok(Query(query)) => query.order.unwrap_or_default(),
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match service.history(id, actor, order) {
        Ok(trail) => Json(trail.into_entries()).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn upload_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<DocumentUpload>, JsonRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Json(upload) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match service.register_document(id, actor, upload) {
        Ok(document) => (StatusCode::CREATED, Json(document)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(crate) async fn documents_handler<R, N>(
    State(service): State<SharedService<R, N>>,
    actor: Actor,
    id: Result<Path<i64>, PathRejection>,
) -> Response
where
    R: ApplicationRepository + 'static,
    N: StatusNotifier + 'static,
{
    let id = match application_id(id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match service.documents(id, actor) {
        Ok(documents) => Json(documents).into_response(),
        Err(err) => err.into_response(),
    }
}

fn application_id(path: Result<Path<i64>, PathRejection>) -> Result<ApplicationId, Response> {
    path.map(|Path(id)| ApplicationId(id))
        .map_err(|rejection| bad_request(format!("invalid application id: {}", rejection.body_text())))
}

fn bad_request(message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let status = match &self {
            LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
            LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
            LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
            LifecycleError::InvalidTransition { .. }
            | LifecycleError::NotEditable { .. }
            | LifecycleError::Conflict(_) => StatusCode::CONFLICT,
            LifecycleError::Repository(err) => {
                error!(error = %err, "application store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let payload = json!({ "error": self.to_string() });
        (status, Json(payload)).into_response()
    }
}

/// Why the identity headers could not be turned into an [`Actor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorRejection {
    Missing(&'static str),
    Malformed(&'static str),
}

impl IntoResponse for ActorRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ActorRejection::Missing(header) => (
                StatusCode::UNAUTHORIZED,
                format!("missing {header} header"),
            ),
            ActorRejection::Malformed(header) => {
                (StatusCode::BAD_REQUEST, format!("malformed {header} header"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ActorRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers)
    }
}

/// Reads the identity forwarded by the upstream identity provider.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ActorRejection> {
    let id = header_str(headers, USER_ID_HEADER)?
        .trim()
        .parse::<i64>()
        .map_err(|_| ActorRejection::Malformed(USER_ID_HEADER))?;
    let role = Role::parse(header_str(headers, USER_ROLE_HEADER)?)
        .ok_or(ActorRejection::Malformed(USER_ROLE_HEADER))?;
    Ok(Actor {
        id: UserId(id),
        role,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ActorRejection> {
    headers
        .get(name)
        .ok_or(ActorRejection::Missing(name))?
        .to_str()
        .map_err(|_| ActorRejection::Malformed(name))
}
