//! Signup, the caller's own account, organizations and memberships.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};

use super::{Actor, ApiError, SharedState, UploadQuery};
use crate::errors::TenancyError;
use crate::models::{Organization, UserProfile};
use crate::tenancy::{self, NewUser};
use crate::uploads;

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Deserialize)]
pub struct NamesRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateOrgRequest {
    pub name: String,
    pub domain: String,
}

#[derive(Deserialize)]
pub struct UpdateOrgRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
}

#[derive(Deserialize)]
pub struct MemberUpdateRequest {
    pub is_admin: bool,
}

#[derive(Deserialize)]
pub struct LookupQuery {
    /// Defaults to the caller's email domain.
    pub domain: Option<String>,
}

#[derive(Serialize)]
pub struct Membership {
    pub organization: Organization,
    pub profile: UserProfile,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/users", post(signup))
        .route("/api/me", get(me))
        .route("/api/me/profile", patch(update_names))
        .route("/api/me/profile/picture", put(upload_picture))
        .route("/api/orgs", post(create_org))
        .route("/api/orgs/lookup", get(lookup_orgs))
        .route(
            "/api/orgs/{org_id}",
            get(get_org).patch(update_org).delete(delete_org),
        )
        .route("/api/orgs/{org_id}/join", post(join_org))
        .route("/api/orgs/{org_id}/members", get(list_members))
        .route(
            "/api/orgs/{org_id}/members/{user_id}",
            patch(update_member).delete(remove_member),
        )
}

async fn signup(
    State(state): State<SharedState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewUser {
        email: req.email,
        first_name: req.first_name,
        last_name: req.last_name,
    };
    let registration = state
        .db
        .call(move |db| tenancy::register_user(db, &new))
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn me(actor: Actor) -> impl IntoResponse {
    Json(serde_json::json!({
        "user": actor.user,
        "profile": actor.profile,
    }))
}

async fn update_names(
    State(state): State<SharedState>,
    actor: Actor,
    Json(req): Json<NamesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = actor.user.id;
    let user = state
        .db
        .call(move |db| {
            tenancy::update_names(db, user_id, req.first_name.as_deref(), req.last_name.as_deref())
        })
        .await?;
    Ok(Json(user))
}

async fn upload_picture(
    State(state): State<SharedState>,
    actor: Actor,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = actor.user.id;
    let Some(previous) = actor.profile.map(|p| p.picture) else {
        return Err(TenancyError::NoOrganization { user_id }.into());
    };
    let stored = uploads::store_profile_picture(
        &state.media_dir,
        user_id,
        &query.filename,
        &body,
        state.max_upload_bytes,
    )
    .await?;
    let path = stored.relative_path.clone();
    let recorded = state
        .db
        .call(move |db| tenancy::set_profile_picture(db, user_id, &path))
        .await;
    match recorded {
        Ok(profile) => {
            if let Some(old) = previous {
                uploads::remove_stored(&state.media_dir, &[old]).await;
            }
            Ok(Json(profile))
        }
        Err(e) => {
            uploads::remove_stored(&state.media_dir, &[stored.relative_path]).await;
            Err(e.into())
        }
    }
}

async fn create_org(
    State(state): State<SharedState>,
    actor: Actor,
    Json(req): Json<CreateOrgRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (organization, profile) = state
        .db
        .call(move |db| tenancy::create_organization(db, &actor.user, &req.name, &req.domain))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Membership {
            organization,
            profile,
        }),
    ))
}

async fn lookup_orgs(
    State(state): State<SharedState>,
    actor: Actor,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let domain = match query.domain {
        Some(domain) => domain,
        None => tenancy::email_domain(&actor.user.email)?,
    };
    let orgs = state
        .db
        .call(move |db| tenancy::lookup_domain(db, &domain))
        .await?;
    Ok(Json(orgs))
}

async fn get_org(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let org = state
        .db
        .call(move |db| tenancy::get_organization(db, actor_id, org_id))
        .await?;
    Ok(Json(org))
}

async fn update_org(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Json(req): Json<UpdateOrgRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let org = state
        .db
        .call(move |db| {
            tenancy::update_organization(db, actor_id, org_id, req.name.as_deref(), req.domain.as_deref())
        })
        .await?;
    Ok(Json(org))
}

async fn delete_org(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let stored = state
        .db
        .call(move |db| tenancy::delete_organization(db, actor_id, org_id))
        .await?;
    uploads::remove_stored(&state.media_dir, &stored).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_org(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .db
        .call(move |db| tenancy::join_organization(db, &actor.user, org_id))
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn list_members(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let members = state
        .db
        .call(move |db| tenancy::list_members(db, actor_id, org_id))
        .await?;
    Ok(Json(members))
}

async fn update_member(
    State(state): State<SharedState>,
    actor: Actor,
    Path((org_id, user_id)): Path<(i64, i64)>,
    Json(req): Json<MemberUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let profile = state
        .db
        .call(move |db| tenancy::set_admin(db, actor_id, org_id, user_id, req.is_admin))
        .await?;
    Ok(Json(profile))
}

async fn remove_member(
    State(state): State<SharedState>,
    actor: Actor,
    Path((org_id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    state
        .db
        .call(move |db| tenancy::remove_member(db, actor_id, org_id, user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
