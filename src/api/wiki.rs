//! Wiki categories, pages, versions, links, attachments, meeting notes and
//! the server-rendered page view.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;

use super::{Actor, ApiError, SharedState, UploadQuery};
use crate::events::{self, BoardEvent};
use crate::models::{LinkTarget, WikiPage};
use crate::uploads;
use crate::wiki::{self, CategoryInput, CategoryUpdate, LinkInput, MeetingInput, PageFilter, PageInput, PageUpdate};

#[derive(Deserialize)]
pub struct BacklinkQuery {
    pub target_type: LinkTarget,
    pub target_id: i64,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/orgs/{org_id}/wiki/categories",
            get(list_categories).post(create_category),
        )
        .route(
            "/api/wiki/categories/{id}",
            patch(update_category).delete(delete_category),
        )
        .route("/api/orgs/{org_id}/wiki/pages", get(list_pages).post(create_page))
        .route("/api/orgs/{org_id}/wiki/pages/{slug}", get(get_page_by_slug))
        .route(
            "/api/wiki/pages/{id}",
            get(get_page).patch(update_page).delete(delete_page),
        )
        .route("/api/wiki/pages/{id}/versions", get(list_versions))
        .route("/api/wiki/pages/{id}/versions/{version}", get(get_version))
        .route(
            "/api/wiki/pages/{id}/versions/{version}/restore",
            post(restore_version),
        )
        .route("/api/wiki/pages/{id}/links", get(list_links).post(add_link))
        .route("/api/wiki/links/{id}", delete(delete_link))
        .route("/api/wiki/backlinks", get(backlinks))
        .route(
            "/api/wiki/pages/{id}/attachments",
            get(list_attachments).put(upload_attachment),
        )
        .route("/api/orgs/{org_id}/meetings", get(list_meetings).post(create_meeting))
        .route("/api/meetings/{id}", get(get_meeting).delete(delete_meeting))
        .route("/orgs/{org_id}/wiki/{slug}", get(page_html))
}

fn page_saved(state: &SharedState, page: &WikiPage) {
    events::publish(
        &state.events,
        BoardEvent::WikiPageSaved {
            organization_id: page.organization_id,
            page_id: page.id,
            slug: page.slug.clone(),
            version: page.version,
        },
    );
}

// ── Categories ────────────────────────────────────────────────────────

async fn list_categories(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let categories = state
        .db
        .call(move |db| wiki::list_categories(db, actor_id, org_id))
        .await?;
    Ok(Json(categories))
}

async fn create_category(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Json(input): Json<CategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let category = state
        .db
        .call(move |db| wiki::create_category(db, actor_id, org_id, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(update): Json<CategoryUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let category = state
        .db
        .call(move |db| wiki::update_category(db, actor_id, id, &update))
        .await?;
    Ok(Json(category))
}

async fn delete_category(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    state
        .db
        .call(move |db| wiki::delete_category(db, actor_id, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Pages ─────────────────────────────────────────────────────────────

async fn list_pages(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Query(filter): Query<PageFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let pages = state
        .db
        .call(move |db| wiki::list_pages(db, actor_id, org_id, &filter))
        .await?;
    Ok(Json(pages))
}

async fn create_page(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Json(input): Json<PageInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::create_page(db, actor_id, org_id, &input))
        .await?;
    page_saved(&state, &page);
    Ok((StatusCode::CREATED, Json(page)))
}

async fn get_page_by_slug(
    State(state): State<SharedState>,
    actor: Actor,
    Path((org_id, slug)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::get_page_by_slug(db, actor_id, org_id, &slug))
        .await?;
    Ok(Json(page))
}

async fn get_page(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::get_page(db, actor_id, id))
        .await?;
    Ok(Json(page))
}

async fn update_page(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(update): Json<PageUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::update_page(db, actor_id, id, &update))
        .await?;
    page_saved(&state, &page);
    Ok(Json(page))
}

async fn delete_page(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let stored = state
        .db
        .call(move |db| wiki::delete_page(db, actor_id, id))
        .await?;
    uploads::remove_stored(&state.media_dir, &stored).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_versions(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let versions = state
        .db
        .call(move |db| wiki::list_versions(db, actor_id, id))
        .await?;
    Ok(Json(versions))
}

async fn get_version(
    State(state): State<SharedState>,
    actor: Actor,
    Path((id, version)): Path<(i64, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let snapshot = state
        .db
        .call(move |db| wiki::get_version(db, actor_id, id, version))
        .await?;
    Ok(Json(snapshot))
}

async fn restore_version(
    State(state): State<SharedState>,
    actor: Actor,
    Path((id, version)): Path<(i64, i32)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::restore_version(db, actor_id, id, version))
        .await?;
    page_saved(&state, &page);
    Ok(Json(page))
}

// ── Links ─────────────────────────────────────────────────────────────

async fn list_links(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let links = state
        .db
        .call(move |db| wiki::list_links(db, actor_id, id))
        .await?;
    Ok(Json(links))
}

async fn add_link(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(input): Json<LinkInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let link = state
        .db
        .call(move |db| wiki::add_link(db, actor_id, id, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn delete_link(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    state
        .db
        .call(move |db| wiki::delete_link(db, actor_id, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn backlinks(
    State(state): State<SharedState>,
    actor: Actor,
    Query(query): Query<BacklinkQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let pages = state
        .db
        .call(move |db| wiki::pages_linked_to(db, actor_id, query.target_type, query.target_id))
        .await?;
    Ok(Json(pages))
}

// ── Attachments ───────────────────────────────────────────────────────

async fn list_attachments(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let attachments = state
        .db
        .call(move |db| wiki::list_attachments(db, actor_id, id))
        .await?;
    Ok(Json(attachments))
}

async fn upload_attachment(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::get_page(db, actor_id, id))
        .await?;
    let stored = uploads::store_wiki_attachment(
        &state.media_dir,
        page.organization_id,
        &query.filename,
        &body,
        state.max_upload_bytes,
    )
    .await?;

    let filename = query.filename;
    let path = stored.relative_path.clone();
    let size = stored.size as i64;
    let recorded = state
        .db
        .call(move |db| wiki::record_attachment(db, actor_id, id, &filename, &path, size))
        .await;
    match recorded {
        Ok(attachment) => Ok((StatusCode::CREATED, Json(attachment))),
        Err(e) => {
            uploads::remove_stored(&state.media_dir, &[stored.relative_path]).await;
            Err(e.into())
        }
    }
}

// ── Meeting notes ─────────────────────────────────────────────────────

async fn list_meetings(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let meetings = state
        .db
        .call(move |db| wiki::list_meetings(db, actor_id, org_id))
        .await?;
    Ok(Json(meetings))
}

async fn create_meeting(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Json(input): Json<MeetingInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let detail = state
        .db
        .call(move |db| wiki::create_meeting(db, actor_id, org_id, &input))
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_meeting(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let detail = state
        .db
        .call(move |db| wiki::get_meeting(db, actor_id, id))
        .await?;
    Ok(Json(detail))
}

async fn delete_meeting(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    state
        .db
        .call(move |db| wiki::delete_meeting(db, actor_id, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── HTML view ─────────────────────────────────────────────────────────

async fn page_html(
    State(state): State<SharedState>,
    actor: Actor,
    Path((org_id, slug)): Path<(i64, String)>,
) -> Result<Html<String>, ApiError> {
    let actor_id = actor.user.id;
    let page = state
        .db
        .call(move |db| wiki::get_page_by_slug(db, actor_id, org_id, &slug))
        .await?;
    Ok(Html(wiki::render_page_html(&page)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_page_versioning_over_http() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);

        let (status, page) = send(
            &app,
            "POST",
            &format!("/api/orgs/{}/wiki/pages", org.id),
            Some(boss.id),
            Some(json!({"title": "Release Process", "content": "v1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(page["slug"], "release-process");
        assert_eq!(page["version"], 1);
        let page_id = page["id"].as_i64().unwrap();

        let (status, page) = send(
            &app,
            "PATCH",
            &format!("/api/wiki/pages/{}", page_id),
            Some(boss.id),
            Some(json!({"content": "v2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["version"], 2);

        let (_, versions) = send(
            &app,
            "GET",
            &format!("/api/wiki/pages/{}/versions", page_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(versions.as_array().unwrap().len(), 1);

        let (status, old) = send(
            &app,
            "GET",
            &format!("/api/wiki/pages/{}/versions/1", page_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(old["content"], "v1");

        let (status, restored) = send(
            &app,
            "POST",
            &format!("/api/wiki/pages/{}/versions/1/restore", page_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(restored["content"], "v1");
        assert_eq!(restored["version"], 3);

        let (status, _) = send(
            &app,
            "GET",
            &format!("/api/wiki/pages/{}/versions/9", page_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_slug_lookup_search_and_html_view() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);

        send(
            &app,
            "POST",
            &format!("/api/orgs/{}/wiki/pages", org.id),
            Some(boss.id),
            Some(json!({"title": "On-call", "content": "# Pager\n<script>alert(1)</script>"})),
        )
        .await;

        let (status, page) = send(
            &app,
            "GET",
            &format!("/api/orgs/{}/wiki/pages/on-call", org.id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["title"], "On-call");

        let (_, found) = send(
            &app,
            "GET",
            &format!("/api/orgs/{}/wiki/pages?q=pager", org.id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let (status, html) = send_raw(
            &app,
            "GET",
            &format!("/orgs/{}/wiki/on-call", org.id),
            Some(boss.id),
            Body::empty(),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(html.to_vec()).unwrap();
        assert!(html.contains("<h1>Pager</h1>"));
        assert!(!html.contains("<script>"));

        let (outsider, _) = founder(&state, "x@other.com", "other.com");
        let (status, _) = send(
            &app,
            "GET",
            &format!("/orgs/{}/wiki/on-call", org.id),
            Some(outsider.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_categories_and_duplicates() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let uri = format!("/api/orgs/{}/wiki/categories", org.id);

        let (status, category) = send(&app, "POST", &uri, Some(boss.id), Some(json!({"name": "Runbooks"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, "POST", &uri, Some(boss.id), Some(json!({"name": "Runbooks"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, renamed) = send(
            &app,
            "PATCH",
            &format!("/api/wiki/categories/{}", category["id"]),
            Some(boss.id),
            Some(json!({"name": "Playbooks"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Playbooks");

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/wiki/categories/{}", category["id"]),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_links_and_backlinks() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);

        let (_, view) = send(
            &app,
            "POST",
            &format!("/api/orgs/{}/boards", org.id),
            Some(boss.id),
            Some(json!({"name": "Roadmap"})),
        )
        .await;
        let board_id = view["board"]["id"].as_i64().unwrap();
        let (_, page) = send(
            &app,
            "POST",
            &format!("/api/orgs/{}/wiki/pages", org.id),
            Some(boss.id),
            Some(json!({"title": "Roadmap notes"})),
        )
        .await;
        let page_id = page["id"].as_i64().unwrap();

        let (status, link) = send(
            &app,
            "POST",
            &format!("/api/wiki/pages/{}/links", page_id),
            Some(boss.id),
            Some(json!({"target_type": "board", "target_id": board_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, pages) = send(
            &app,
            "GET",
            &format!("/api/wiki/backlinks?target_type=board&target_id={}", board_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pages[0]["id"], page_id);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/wiki/pages/{}/links", page_id),
            Some(boss.id),
            Some(json!({"target_type": "task", "target_id": 999})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/wiki/links/{}", link["id"]),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_attachment_upload() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state_with(None, media.path().to_path_buf());
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (_, page) = send(
            &app,
            "POST",
            &format!("/api/orgs/{}/wiki/pages", org.id),
            Some(boss.id),
            Some(json!({"title": "Specs"})),
        )
        .await;
        let uri = format!("/api/wiki/pages/{}/attachments", page["id"]);

        let (status, bytes) = send_raw(
            &app,
            "PUT",
            &format!("{}?filename=diagram.svg", uri),
            Some(boss.id),
            Body::from("<svg/>"),
            Some("application/octet-stream"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let attachment: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(attachment["filename"], "diagram.svg");
        assert_eq!(attachment["size_bytes"], 6);
        let stored = attachment["stored_path"].as_str().unwrap();
        assert!(stored.starts_with(&format!("wiki/{}/", org.id)));
        assert!(media.path().join(stored).exists());

        let (status, _) = send_raw(
            &app,
            "PUT",
            &format!("{}?filename=big.bin", uri),
            Some(boss.id),
            Body::from(vec![0u8; 2048]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (_, list) = send(&app, "GET", &uri, Some(boss.id), None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deleting_page_removes_attachment_files() {
        let media = tempfile::tempdir().unwrap();
        let state = test_state_with(None, media.path().to_path_buf());
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (_, page) = send(
            &app,
            "POST",
            &format!("/api/orgs/{}/wiki/pages", org.id),
            Some(boss.id),
            Some(json!({"title": "Runbook"})),
        )
        .await;
        let (_, bytes) = send_raw(
            &app,
            "PUT",
            &format!("/api/wiki/pages/{}/attachments?filename=steps.md", page["id"]),
            Some(boss.id),
            Body::from("# steps"),
            None,
        )
        .await;
        let attachment: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let stored = media.path().join(attachment["stored_path"].as_str().unwrap());
        assert!(stored.exists());

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/wiki/pages/{}", page["id"]),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!stored.exists());
    }

    #[tokio::test]
    async fn test_meeting_notes() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let uri = format!("/api/orgs/{}/meetings", org.id);

        let (status, detail) = send(
            &app,
            "POST",
            &uri,
            Some(boss.id),
            Some(json!({
                "title": "Weekly sync",
                "meeting_date": "2024-03-04",
                "attendee_ids": [boss.id],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(detail["attendees"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            "POST",
            &uri,
            Some(boss.id),
            Some(json!({"title": "Bad", "meeting_date": "next tuesday"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = send(&app, "GET", &uri, Some(boss.id), None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let meeting_uri = format!("/api/meetings/{}", detail["notes"]["id"]);
        let (status, _) = send(&app, "DELETE", &meeting_uri, Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &meeting_uri, Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
