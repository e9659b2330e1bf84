//! Boards, columns, tasks, metrics and AI summaries.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};

use super::{Actor, ApiError, SharedState};
use crate::analytics::{self, BoardMetrics, OrgMetrics};
use crate::board::{self, BoardInput, BoardUpdate, ColumnInput, ColumnUpdate, TaskInput, TaskUpdate};
use crate::errors::{AnalyticsError, BoardError};
use crate::events::{self, BoardEvent};

#[derive(Deserialize)]
pub struct ColumnOrderRequest {
    pub column_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub column_id: i64,
    /// Defaults to the end of the target column.
    pub position: Option<i32>,
}

#[derive(Deserialize)]
pub struct RelateRequest {
    pub task_id: i64,
}

#[derive(Serialize)]
pub struct Summary<M> {
    pub metrics: M,
    pub summary: String,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/orgs/{org_id}/boards", get(list_boards).post(create_board))
        .route(
            "/api/boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/api/boards/{id}/columns", post(add_column))
        .route("/api/boards/{id}/columns/order", put(reorder_columns))
        .route("/api/columns/{id}", patch(update_column).delete(delete_column))
        .route("/api/columns/{id}/tasks", post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/api/tasks/{id}/activity", get(task_activity))
        .route("/api/tasks/{id}/related", post(relate_tasks))
        .route("/api/tasks/{id}/related/{other_id}", axum::routing::delete(unrelate_tasks))
        .route("/api/boards/{id}/metrics", get(board_metrics))
        .route("/api/boards/{id}/summary", post(board_summary))
        .route("/api/orgs/{org_id}/metrics", get(org_metrics))
        .route("/api/orgs/{org_id}/summary", post(org_summary))
}

// ── Boards ────────────────────────────────────────────────────────────

async fn list_boards(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let boards = state
        .db
        .call(move |db| board::list_boards(db, actor_id, org_id))
        .await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
    Json(input): Json<BoardInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let view = state
        .db
        .call(move |db| {
            let created = board::create_board(db, actor_id, org_id, &input)?;
            board::board_view(db, actor_id, created.id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_board(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let view = state
        .db
        .call(move |db| board::board_view(db, actor_id, id))
        .await?;
    Ok(Json(view))
}

async fn update_board(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(update): Json<BoardUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let updated = state
        .db
        .call(move |db| board::update_board(db, actor_id, id, &update))
        .await?;
    events::publish(
        &state.events,
        BoardEvent::BoardUpdated {
            organization_id: updated.organization_id,
            board: updated.clone(),
        },
    );
    Ok(Json(updated))
}

async fn delete_board(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let deleted = state
        .db
        .call(move |db| {
            let target = board::require_board(db, actor_id, id)?;
            board::delete_board(db, actor_id, id)?;
            Ok::<_, BoardError>(target)
        })
        .await?;
    events::publish(
        &state.events,
        BoardEvent::BoardDeleted {
            organization_id: deleted.organization_id,
            board_id: deleted.id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Columns ───────────────────────────────────────────────────────────

fn columns_changed(state: &SharedState, organization_id: i64, board_id: i64) {
    events::publish(
        &state.events,
        BoardEvent::ColumnsChanged {
            organization_id,
            board_id,
        },
    );
}

async fn add_column(
    State(state): State<SharedState>,
    actor: Actor,
    Path(board_id): Path<i64>,
    Json(input): Json<ColumnInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, column) = state
        .db
        .call(move |db| {
            let column = board::add_column(db, actor_id, board_id, &input)?;
            let target = board::require_board(db, actor_id, board_id)?;
            Ok::<_, BoardError>((target, column))
        })
        .await?;
    columns_changed(&state, target.organization_id, target.id);
    Ok((StatusCode::CREATED, Json(column)))
}

async fn reorder_columns(
    State(state): State<SharedState>,
    actor: Actor,
    Path(board_id): Path<i64>,
    Json(req): Json<ColumnOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, columns) = state
        .db
        .call(move |db| {
            let columns = board::reorder_columns(db, actor_id, board_id, &req.column_ids)?;
            let target = board::require_board(db, actor_id, board_id)?;
            Ok::<_, BoardError>((target, columns))
        })
        .await?;
    columns_changed(&state, target.organization_id, target.id);
    Ok(Json(columns))
}

async fn update_column(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(update): Json<ColumnUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, column) = state
        .db
        .call(move |db| {
            let column = board::update_column(db, actor_id, id, &update)?;
            let target = board::board_for_column(db, actor_id, id)?;
            Ok::<_, BoardError>((target, column))
        })
        .await?;
    columns_changed(&state, target.organization_id, target.id);
    Ok(Json(column))
}

async fn delete_column(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let target = state
        .db
        .call(move |db| {
            let target = board::board_for_column(db, actor_id, id)?;
            board::delete_column(db, actor_id, id)?;
            Ok::<_, BoardError>(target)
        })
        .await?;
    columns_changed(&state, target.organization_id, target.id);
    Ok(StatusCode::NO_CONTENT)
}

// ── Tasks ─────────────────────────────────────────────────────────────

async fn create_task(
    State(state): State<SharedState>,
    actor: Actor,
    Path(column_id): Path<i64>,
    Json(input): Json<TaskInput>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, task) = state
        .db
        .call(move |db| {
            let task = board::create_task(db, actor_id, column_id, &input)?;
            let target = board::board_for_column(db, actor_id, column_id)?;
            Ok::<_, BoardError>((target, task))
        })
        .await?;
    events::publish(
        &state.events,
        BoardEvent::TaskCreated {
            organization_id: target.organization_id,
            board_id: target.id,
            task: task.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let detail = state
        .db
        .call(move |db| board::task_detail(db, actor_id, id))
        .await?;
    Ok(Json(detail))
}

async fn update_task(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(update): Json<TaskUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, task) = state
        .db
        .call(move |db| {
            let task = board::update_task(db, actor_id, id, &update)?;
            let target = board::board_for_task(db, actor_id, id)?;
            Ok::<_, BoardError>((target, task))
        })
        .await?;
    events::publish(
        &state.events,
        BoardEvent::TaskUpdated {
            organization_id: target.organization_id,
            board_id: target.id,
            task: task.clone(),
        },
    );
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let target = state
        .db
        .call(move |db| {
            let target = board::board_for_task(db, actor_id, id)?;
            board::delete_task(db, actor_id, id)?;
            Ok::<_, BoardError>(target)
        })
        .await?;
    events::publish(
        &state.events,
        BoardEvent::TaskDeleted {
            organization_id: target.organization_id,
            board_id: target.id,
            task_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn move_task(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let (target, from_column_id, task) = state
        .db
        .call(move |db| {
            let target = board::board_for_task(db, actor_id, id)?;
            let before = db.get_task(id)?.ok_or(BoardError::TaskNotFound { id })?;
            let task = board::move_task(db, actor_id, id, req.column_id, req.position)?;
            Ok::<_, BoardError>((target, before.column_id, task))
        })
        .await?;
    events::publish(
        &state.events,
        BoardEvent::TaskMoved {
            organization_id: target.organization_id,
            board_id: target.id,
            task_id: task.id,
            from_column_id,
            to_column_id: task.column_id,
            position: task.position,
        },
    );
    Ok(Json(task))
}

async fn task_activity(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let activity = state
        .db
        .call(move |db| board::list_activity(db, actor_id, id))
        .await?;
    Ok(Json(activity))
}

async fn relate_tasks(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<RelateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let related = state
        .db
        .call(move |db| board::relate_tasks(db, actor_id, id, req.task_id))
        .await?;
    Ok((StatusCode::CREATED, Json(related)))
}

async fn unrelate_tasks(
    State(state): State<SharedState>,
    actor: Actor,
    Path((id, other_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    state
        .db
        .call(move |db| board::unrelate_tasks(db, actor_id, id, other_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Metrics & summaries ───────────────────────────────────────────────

async fn board_metrics(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let metrics = state
        .db
        .call(move |db| analytics::collect_board_metrics(db, actor_id, id))
        .await?;
    Ok(Json(metrics))
}

async fn board_summary(
    State(state): State<SharedState>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Summary<BoardMetrics>>, ApiError> {
    let actor_id = actor.user.id;
    let metrics = state
        .db
        .call(move |db| analytics::collect_board_metrics(db, actor_id, id))
        .await?;
    let client = state.ai.clone().ok_or(AnalyticsError::NotConfigured)?;
    let summary = analytics::summarize(client.as_ref(), &analytics::build_board_prompt(&metrics)).await?;
    tracing::info!(board_id = id, "generated board summary");
    Ok(Json(Summary { metrics, summary }))
}

async fn org_metrics(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = actor.user.id;
    let metrics = state
        .db
        .call(move |db| analytics::collect_org_metrics(db, actor_id, org_id))
        .await?;
    Ok(Json(metrics))
}

async fn org_summary(
    State(state): State<SharedState>,
    actor: Actor,
    Path(org_id): Path<i64>,
) -> Result<Json<Summary<OrgMetrics>>, ApiError> {
    let actor_id = actor.user.id;
    let metrics = state
        .db
        .call(move |db| analytics::collect_org_metrics(db, actor_id, org_id))
        .await?;
    let client = state.ai.clone().ok_or(AnalyticsError::NotConfigured)?;
    let summary = analytics::summarize(client.as_ref(), &analytics::build_org_prompt(&metrics)).await?;
    tracing::info!(org_id, "generated organization summary");
    Ok(Json(Summary { metrics, summary }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::analytics::SummaryClient;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;

    struct FixedSummary(Result<&'static str, &'static str>);

    #[async_trait]
    impl SummaryClient for FixedSummary {
        async fn summarize(&self, prompt: &str) -> Result<String, AnalyticsError> {
            assert!(prompt.contains("Total tasks"));
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(AnalyticsError::Request(e.to_string())),
            }
        }
    }

    /// Create a board with the default columns and return (board id, column ids).
    async fn seeded_board(app: &axum::Router, user_id: i64, org_id: i64) -> (i64, Vec<i64>) {
        let (status, view) = send(
            app,
            "POST",
            &format!("/api/orgs/{}/boards", org_id),
            Some(user_id),
            Some(json!({"name": "Roadmap"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let columns = view["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_i64().unwrap())
            .collect();
        (view["board"]["id"].as_i64().unwrap(), columns)
    }

    async fn new_task(app: &axum::Router, user_id: i64, column_id: i64, title: &str) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            &format!("/api/columns/{}/tasks", column_id),
            Some(user_id),
            Some(json!({"title": title})),
        )
        .await
    }

    #[tokio::test]
    async fn test_board_lifecycle() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);

        let (board_id, columns) = seeded_board(&app, boss.id, org.id).await;
        assert_eq!(columns.len(), 3);

        let (status, boards) = send(&app, "GET", &format!("/api/orgs/{}/boards", org.id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(boards.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/boards/{}", board_id),
            Some(boss.id),
            Some(json!({"name": "Q3 Roadmap"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Q3 Roadmap");

        let (status, _) = send(&app, "DELETE", &format!("/api/boards/{}", board_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/boards/{}", board_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_other_organization_cannot_see_board() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let (outsider, _) = founder(&state, "x@other.com", "other.com");
        let app = app(&state);
        let (board_id, _) = seeded_board(&app, boss.id, org.id).await;

        let (status, _) = send(&app, "GET", &format!("/api/boards/{}", board_id), Some(outsider.id), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "GET", &format!("/api/orgs/{}/boards", org.id), Some(outsider.id), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_wip_limit_conflict_and_move() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (_, columns) = seeded_board(&app, boss.id, org.id).await;
        let (todo, doing) = (columns[0], columns[1]);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/columns/{}", doing),
            Some(boss.id),
            Some(json!({"wip_limit": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, first) = new_task(&app, boss.id, todo, "First").await;
        let (_, second) = new_task(&app, boss.id, todo, "Second").await;
        let first_id = first["id"].as_i64().unwrap();
        let second_id = second["id"].as_i64().unwrap();

        let mut rx = state.events.subscribe();
        let (status, moved) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}/move", first_id),
            Some(boss.id),
            Some(json!({"column_id": doing})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["column_id"], doing);
        assert!(moved["started_at"].is_string());
        match rx.recv().await.unwrap() {
            BoardEvent::TaskMoved {
                from_column_id,
                to_column_id,
                ..
            } => {
                assert_eq!(from_column_id, todo);
                assert_eq!(to_column_id, doing);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}/move", second_id),
            Some(boss.id),
            Some(json!({"column_id": doing})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("WIP limit"));

        let (status, activity) = send(
            &app,
            "GET",
            &format!("/api/tasks/{}/activity", first_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = activity
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"created"));
        assert!(actions.contains(&"moved"));
    }

    #[tokio::test]
    async fn test_task_update_related_and_delete() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (_, columns) = seeded_board(&app, boss.id, org.id).await;

        let (status, body) = new_task(&app, boss.id, columns[0], "  ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("title"));

        let (_, a) = new_task(&app, boss.id, columns[0], "A").await;
        let (_, b) = new_task(&app, boss.id, columns[0], "B").await;
        let a_id = a["id"].as_i64().unwrap();
        let b_id = b["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}", a_id),
            Some(boss.id),
            Some(json!({"priority": "urgent", "due_date": "2030-01-31"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["priority"], "urgent");
        assert_eq!(body["due_date"], "2030-01-31");

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}", a_id),
            Some(boss.id),
            Some(json!({"due_date": "31/01/2030"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, related) = send(
            &app,
            "POST",
            &format!("/api/tasks/{}/related", a_id),
            Some(boss.id),
            Some(json!({"task_id": b_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(related.as_array().unwrap().len(), 1);

        let (_, detail) = send(&app, "GET", &format!("/api/tasks/{}", b_id), Some(boss.id), None).await;
        assert_eq!(detail["related"][0]["id"], a_id);

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/tasks/{}/related/{}", a_id, b_id),
            Some(boss.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "DELETE", &format!("/api/tasks/{}", a_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/tasks/{}", a_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_columns_add_reorder_delete() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (board_id, columns) = seeded_board(&app, boss.id, org.id).await;

        let (status, review) = send(
            &app,
            "POST",
            &format!("/api/boards/{}/columns", board_id),
            Some(boss.id),
            Some(json!({"name": "Review", "wip_limit": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let review_id = review["id"].as_i64().unwrap();

        let mut order = vec![review_id];
        order.extend(&columns);
        let (status, reordered) = send(
            &app,
            "PUT",
            &format!("/api/boards/{}/columns/order", board_id),
            Some(boss.id),
            Some(json!({"column_ids": order})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reordered[0]["id"], review_id);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/boards/{}/columns/order", board_id),
            Some(boss.id),
            Some(json!({"column_ids": [review_id]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        new_task(&app, boss.id, review_id, "Blocker").await;
        let (status, _) = send(&app, "DELETE", &format!("/api/columns/{}", review_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&app, "DELETE", &format!("/api/columns/{}", columns[2]), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_metrics_and_summary() {
        let state = test_state_with(
            Some(Arc::new(FixedSummary(Ok("All good.")))),
            std::env::temp_dir(),
        );
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app = app(&state);
        let (board_id, columns) = seeded_board(&app, boss.id, org.id).await;
        new_task(&app, boss.id, columns[0], "One").await;

        let (status, metrics) = send(&app, "GET", &format!("/api/boards/{}/metrics", board_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metrics["total_tasks"], 1);

        let (status, body) = send(&app, "POST", &format!("/api/boards/{}/summary", board_id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "All good.");
        assert_eq!(body["metrics"]["total_tasks"], 1);

        let (status, body) = send(&app, "POST", &format!("/api/orgs/{}/summary", org.id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metrics"]["boards"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_without_ai_or_with_failure() {
        let state = test_state();
        let (boss, org) = founder(&state, "boss@example.com", "example.com");
        let app_plain = app(&state);
        let (status, _) = send(&app_plain, "POST", &format!("/api/orgs/{}/summary", org.id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let failing = test_state_with(
            Some(Arc::new(FixedSummary(Err("quota exceeded")))),
            std::env::temp_dir(),
        );
        let (boss, org) = founder(&failing, "boss@example.com", "example.com");
        let (status, body) = send(&app(&failing), "POST", &format!("/api/orgs/{}/summary", org.id), Some(boss.id), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "AI summary is currently unavailable");
    }
}
