//! JSON HTTP API.
//!
//! Every `/api` route except signup identifies its caller through the
//! `X-User-Id` header, resolved by the [`Actor`] extractor. Organization
//! scope always comes from the path, never from ambient state.

mod boards;
mod orgs;
mod wiki;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::analytics::SummaryClient;
use crate::db::DbHandle;
use crate::errors::{AnalyticsError, BoardError, TenancyError, UploadError, WikiError};
use crate::events::BoardEvent;
use crate::models::{User, UserProfile};
use crate::tenancy;

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub events: broadcast::Sender<BoardEvent>,
    /// `None` when no AI API key is configured.
    pub ai: Option<Arc<dyn SummaryClient>>,
    pub media_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        db: DbHandle,
        ai: Option<Arc<dyn SummaryClient>>,
        media_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db,
            events,
            ai,
            media_dir,
            max_upload_bytes,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "request failed");
        ApiError::Internal("Internal server error".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::BadGateway(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err)
    }
}

impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        let msg = err.to_string();
        match err {
            TenancyError::InvalidEmail(_)
            | TenancyError::InvalidDomain(_)
            | TenancyError::DomainMismatch { .. }
            | TenancyError::MissingField(_) => ApiError::BadRequest(msg),
            TenancyError::DomainChangeBlocked { .. }
            | TenancyError::EmailTaken(_)
            | TenancyError::AlreadyMember { .. }
            | TenancyError::LastAdmin { .. } => ApiError::Conflict(msg),
            TenancyError::UserNotFound { .. } | TenancyError::OrganizationNotFound { .. } => {
                ApiError::NotFound(msg)
            }
            TenancyError::NotMember { .. }
            | TenancyError::AdminRequired { .. }
            | TenancyError::NoOrganization { .. } => ApiError::Forbidden(msg),
            TenancyError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            BoardError::BoardNotFound { .. }
            | BoardError::ColumnNotFound { .. }
            | BoardError::TaskNotFound { .. } => ApiError::NotFound(msg),
            BoardError::WipLimitReached { .. }
            | BoardError::WipLimitBelowCurrent { .. }
            | BoardError::ColumnNotEmpty { .. } => ApiError::Conflict(msg),
            BoardError::InvalidWipLimit(_)
            | BoardError::InvalidColumnOrder { .. }
            | BoardError::CrossBoard { .. }
            | BoardError::SelfReference { .. }
            | BoardError::ParentCycle { .. }
            | BoardError::AssigneeNotMember { .. }
            | BoardError::InvalidDueDate(_)
            | BoardError::ColumnOnOtherBoard { .. }
            | BoardError::MissingField(_) => ApiError::BadRequest(msg),
            BoardError::Forbidden { .. } | BoardError::OrganizationForbidden { .. } => {
                ApiError::Forbidden(msg)
            }
            BoardError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<WikiError> for ApiError {
    fn from(err: WikiError) -> Self {
        let msg = err.to_string();
        match err {
            WikiError::PageNotFound { .. }
            | WikiError::SlugNotFound { .. }
            | WikiError::CategoryNotFound { .. }
            | WikiError::VersionNotFound { .. }
            | WikiError::MeetingNotFound { .. }
            | WikiError::LinkNotFound { .. } => ApiError::NotFound(msg),
            WikiError::DuplicateCategory(_) => ApiError::Conflict(msg),
            WikiError::ForeignTarget { .. }
            | WikiError::InvalidDate(_)
            | WikiError::MissingField(_) => ApiError::BadRequest(msg),
            WikiError::Forbidden { .. } => ApiError::Forbidden(msg),
            WikiError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        let msg = err.to_string();
        match err {
            AnalyticsError::NotConfigured => ApiError::Unavailable(msg),
            AnalyticsError::Request(_) | AnalyticsError::EmptyResponse => {
                ApiError::BadGateway("AI summary is currently unavailable".to_string())
            }
            AnalyticsError::Board(e) => e.into(),
            AnalyticsError::Storage(e) => ApiError::internal(e),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let msg = err.to_string();
        match err {
            UploadError::Empty | UploadError::UnsupportedType(_) => ApiError::BadRequest(msg),
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge(msg),
            UploadError::Io(e) => ApiError::internal(e),
        }
    }
}

// ── Actor extraction ──────────────────────────────────────────────────

/// The user making the request, with their organization profile if any.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    pub profile: Option<UserProfile>,
}

impl Actor {
    pub fn organization_id(&self) -> Result<i64, ApiError> {
        self.profile
            .as_ref()
            .map(|p| p.organization_id)
            .ok_or_else(|| ApiError::from(TenancyError::NoOrganization { user_id: self.user.id }))
    }
}

impl FromRequestParts<SharedState> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))?;
        let user_id: i64 = raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| ApiError::Unauthorized("Invalid X-User-Id header".to_string()))?;

        let account = state
            .db
            .call(move |db| tenancy::account(db, user_id))
            .await
            .map_err(|e| match e {
                TenancyError::UserNotFound { id } => ApiError::Unauthorized(format!("Unknown user {}", id)),
                other => other.into(),
            })?;
        Ok(Actor {
            user: account.user,
            profile: account.profile,
        })
    }
}

// ── Shared request types ──────────────────────────────────────────────

/// `?filename=` on raw-body upload routes.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .merge(orgs::routes())
        .merge(boards::routes())
        .merge(wiki::routes())
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::AppDb;
    use crate::models::Organization;
    use crate::tenancy::{NewUser, register_user};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn test_state() -> SharedState {
        test_state_with(None, std::env::temp_dir().join("orgboard-test-media"))
    }

    pub fn test_state_with(ai: Option<Arc<dyn SummaryClient>>, media_dir: PathBuf) -> SharedState {
        let db = AppDb::new_in_memory().unwrap();
        Arc::new(AppState::new(DbHandle::new(db), ai, media_dir, 1024))
    }

    pub fn app(state: &SharedState) -> Router {
        api_router().with_state(state.clone())
    }

    pub fn signup(state: &SharedState, email: &str) -> User {
        let db = state.db.lock_sync().unwrap();
        register_user(
            &db,
            &NewUser {
                email: email.to_string(),
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
            },
        )
        .unwrap()
        .user
    }

    /// A fresh organization on `domain` whose first admin is returned.
    pub fn founder(state: &SharedState, email: &str, domain: &str) -> (User, Organization) {
        let user = signup(state, email);
        let db = state.db.lock_sync().unwrap();
        let (org, _) = tenancy::create_organization(&db, &user, "Acme", domain).unwrap();
        (user, org)
    }

    pub async fn send_raw(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Body,
        content_type: Option<&str>,
    ) -> (StatusCode, axum::body::Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = user {
            builder = builder.header(USER_HEADER, id.to_string());
        }
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = match body {
            Some(json) => {
                send_raw(
                    app,
                    method,
                    uri,
                    user,
                    Body::from(json.to_string()),
                    Some("application/json"),
                )
                .await
            }
            None => send_raw(app, method, uri, user, Body::empty(), None).await,
        };
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let state = test_state();
        let (status, body) = send(&app(&state), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::String("ok".into()));
    }

    #[tokio::test]
    async fn test_missing_or_unknown_actor_is_unauthorized() {
        let state = test_state();
        let app = app(&state);

        let (status, body) = send(&app, "GET", "/api/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("X-User-Id"));

        let (status, _) = send(&app, "GET", "/api/me", Some(999), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_status_mapping() {
        let conflict: ApiError = BoardError::WipLimitReached {
            column: "Doing".into(),
            limit: 2,
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let forbidden: ApiError = TenancyError::AdminRequired { action: "x" }.into();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let blocked: ApiError = TenancyError::DomainChangeBlocked {
            domain: "new.io".into(),
            emails: vec![],
        }
        .into();
        assert_eq!(blocked.status(), StatusCode::CONFLICT);

        let not_found: ApiError = WikiError::SlugNotFound { slug: "x".into() }.into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let unavailable: ApiError = AnalyticsError::NotConfigured.into();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let gateway: ApiError = AnalyticsError::Request("boom".into()).into();
        assert_eq!(gateway.status(), StatusCode::BAD_GATEWAY);

        let nested: ApiError = AnalyticsError::Board(BoardError::Forbidden { board_id: 1 }).into();
        assert_eq!(nested.status(), StatusCode::FORBIDDEN);

        let too_large: ApiError = UploadError::TooLarge { size: 2, max: 1 }.into();
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_storage_errors_hide_details() {
        let err: ApiError = WikiError::Storage(anyhow::anyhow!("disk I/O error at sector 7")).into();
        match err {
            ApiError::Internal(msg) => assert_eq!(msg, "Internal server error"),
            other => panic!("expected Internal, got {:?}", other),
        }
    }
}
