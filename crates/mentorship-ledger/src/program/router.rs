use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::audit::AuditSubject;
use super::domain::{
    BonusActivityId, FamilyId, ImageLocator, PairingId, Role, SubmissionId, UserId,
};
use super::error::ProgramError;
use super::identity::IdentityProvider;
use super::review::NewSubmission;
use super::service::MentorshipProgram;
use super::storage::FileStorage;
use super::store::{DocumentStore, StoreError};

/// Caller id, set by the authenticating proxy in front of this service.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Caller role: `admin`, `mentor`, or `mentee`.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Authenticated caller of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ProgramError> {
        let id = headers
            .get(ACTOR_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ProgramError::Authz("missing caller identity".to_string()))?;

        let role = match headers
            .get(ACTOR_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("admin") => Role::Admin,
            Some("mentor") => Role::Mentor,
            Some("mentee") => Role::Mentee,
            _ => return Err(ProgramError::Authz("missing or unknown caller role".to_string())),
        };

        Ok(Self {
            id: UserId::from(id),
            role,
        })
    }

    pub fn require_admin(&self) -> Result<(), ProgramError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ProgramError::Authz(format!(
                "{} {} may not perform administrative actions",
                self.role.label(),
                self.id
            )))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubmissionRequest {
    pub week_number: u32,
    pub year: i32,
    pub image: ImageLocator,
    #[serde(default)]
    pub bonus_activity_ids: Vec<BonusActivityId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentRequest {
    pub delta: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody<'a> {
    error: String,
    kind: &'a str,
}

/// Router builder exposing review, ledger, cleanup, and audit endpoints.
pub fn program_router<S, F, I>(service: Arc<MentorshipProgram<S, F, I>>) -> Router
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    Router::new()
        .route("/api/v1/submissions", post(create_handler::<S, F, I>))
        .route(
            "/api/v1/submissions/:submission_id",
            get(submission_handler::<S, F, I>),
        )
        .route(
            "/api/v1/submissions/:submission_id/approve",
            post(approve_handler::<S, F, I>),
        )
        .route(
            "/api/v1/submissions/:submission_id/reject",
            post(reject_handler::<S, F, I>),
        )
        .route(
            "/api/v1/pairings/:pairing_id",
            delete(delete_pairing_handler::<S, F, I>),
        )
        .route(
            "/api/v1/pairings/:pairing_id/adjustments",
            post(adjust_handler::<S, F, I>),
        )
        .route(
            "/api/v1/pairings/:pairing_id/ledger",
            get(verify_handler::<S, F, I>),
        )
        .route(
            "/api/v1/pairings/:pairing_id/audit",
            get(pairing_audit_handler::<S, F, I>),
        )
        .route(
            "/api/v1/families/:family_id",
            delete(delete_family_handler::<S, F, I>),
        )
        .route(
            "/api/v1/users/:user_id",
            delete(delete_user_handler::<S, F, I>),
        )
        .route(
            "/api/v1/users/:user_id/audit",
            get(user_audit_handler::<S, F, I>),
        )
        .route("/api/v1/standings", get(standings_handler::<S, F, I>))
        .with_state(service)
}

/// Maps the error taxonomy onto HTTP statuses.
pub fn status_for(error: &ProgramError) -> StatusCode {
    match error {
        ProgramError::NotFound { .. } => StatusCode::NOT_FOUND,
        ProgramError::Conflict(_) => StatusCode::CONFLICT,
        ProgramError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ProgramError::Precondition(_) => StatusCode::PRECONDITION_FAILED,
        ProgramError::Authz(_) => StatusCode::FORBIDDEN,
        ProgramError::Storage(_) => StatusCode::BAD_GATEWAY,
        ProgramError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub(crate) fn error_response(error: ProgramError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, kind = error.kind(), "request failed");
    }
    let body = ErrorBody {
        error: error.to_string(),
        kind: error.kind(),
    };
    (status, axum::Json(body)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, ProgramError>) -> Response {
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(error) => error_response(error),
    }
}

fn admin(headers: &HeaderMap) -> Result<Actor, ProgramError> {
    let actor = Actor::from_headers(headers)?;
    actor.require_admin()?;
    Ok(actor)
}

/// Program operations block on the store and on file storage, so they run on the blocking
/// pool instead of the async worker serving the request.
async fn run_blocking<S, F, I, T>(
    service: Arc<MentorshipProgram<S, F, I>>,
    operation: impl FnOnce(&MentorshipProgram<S, F, I>) -> Result<T, ProgramError> + Send + 'static,
) -> Result<T, ProgramError>
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || operation(&service))
        .await
        .map_err(|err| {
            ProgramError::Store(StoreError::Unavailable(format!(
                "request task aborted: {err}"
            )))
        })?
}

pub(crate) async fn create_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<CreateSubmissionRequest>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match Actor::from_headers(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.create_submission(NewSubmission {
                    submitter_id: actor.id,
                    week_number: request.week_number,
                    year: request.year,
                    image: request.image,
                    bonus_activity_ids: request.bonus_activity_ids,
                })
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn submission_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(submission_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match Actor::from_headers(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                let submission = program.submission(&SubmissionId(submission_id))?;
                if actor.role != Role::Admin && submission.submitter_id != actor.id {
                    let pairing = program.pairing(&submission.pairing_id)?;
                    if !pairing.includes(&actor.id) {
                        return Err(ProgramError::Authz(format!(
                            "{} is not part of pairing {}",
                            actor.id, pairing.id
                        )));
                    }
                }
                Ok(submission)
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn approve_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(submission_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.approve_submission(&SubmissionId(submission_id), &actor.id)
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn reject_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(submission_id): Path<String>,
    axum::Json(request): axum::Json<RejectRequest>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.reject_submission(
                    &SubmissionId(submission_id),
                    &actor.id,
                    &request.reason,
                )
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn adjust_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(pairing_id): Path<String>,
    axum::Json(request): axum::Json<AdjustmentRequest>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.adjust_points(
                    &PairingId(pairing_id),
                    &actor.id,
                    request.delta,
                    &request.reason,
                )
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn verify_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(pairing_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(_) => {
            run_blocking(service, move |program| {
                program.verify_ledger(&PairingId(pairing_id))
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_pairing_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(pairing_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.delete_pairing(&PairingId(pairing_id), &actor.id)
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_family_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(family_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.delete_family(&FamilyId(family_id), &actor.id)
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn delete_user_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(actor) => {
            run_blocking(service, move |program| {
                program.delete_user(&UserId(user_id), &actor.id)
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn pairing_audit_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(pairing_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(_) => {
            run_blocking(service, move |program| {
                program.audit_trail(&AuditSubject::Pairing(PairingId(pairing_id)))
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn user_audit_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match admin(&headers) {
        Ok(_) => {
            run_blocking(service, move |program| {
                program.audit_trail(&AuditSubject::User(UserId(user_id)))
            })
            .await
        }
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}

pub(crate) async fn standings_handler<S, F, I>(
    State(service): State<Arc<MentorshipProgram<S, F, I>>>,
    headers: HeaderMap,
) -> Response
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    let result = match Actor::from_headers(&headers) {
        Ok(_) => run_blocking(service, |program| program.standings()).await,
        Err(error) => Err(error),
    };
    respond(StatusCode::OK, result)
}
