use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::{Actor, ApiError, SharedState};
use crate::board;
use crate::models::{Board, Task};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Event types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    BoardUpdated {
        organization_id: i64,
        board: Board,
    },
    BoardDeleted {
        organization_id: i64,
        board_id: i64,
    },
    /// Columns were added, edited, reordered or removed; clients refetch.
    ColumnsChanged {
        organization_id: i64,
        board_id: i64,
    },
    TaskCreated {
        organization_id: i64,
        board_id: i64,
        task: Task,
    },
    TaskUpdated {
        organization_id: i64,
        board_id: i64,
        task: Task,
    },
    TaskMoved {
        organization_id: i64,
        board_id: i64,
        task_id: i64,
        from_column_id: i64,
        to_column_id: i64,
        position: i32,
    },
    TaskDeleted {
        organization_id: i64,
        board_id: i64,
        task_id: i64,
    },
    WikiPageSaved {
        organization_id: i64,
        page_id: i64,
        slug: String,
        version: i32,
    },
}

impl BoardEvent {
    pub fn organization_id(&self) -> i64 {
        match self {
            Self::BoardUpdated { organization_id, .. }
            | Self::BoardDeleted { organization_id, .. }
            | Self::ColumnsChanged { organization_id, .. }
            | Self::TaskCreated { organization_id, .. }
            | Self::TaskUpdated { organization_id, .. }
            | Self::TaskMoved { organization_id, .. }
            | Self::TaskDeleted { organization_id, .. }
            | Self::WikiPageSaved { organization_id, .. } => *organization_id,
        }
    }

    pub fn board_id(&self) -> Option<i64> {
        match self {
            Self::BoardUpdated { board, .. } => Some(board.id),
            Self::BoardDeleted { board_id, .. }
            | Self::ColumnsChanged { board_id, .. }
            | Self::TaskCreated { board_id, .. }
            | Self::TaskUpdated { board_id, .. }
            | Self::TaskMoved { board_id, .. }
            | Self::TaskDeleted { board_id, .. } => Some(*board_id),
            Self::WikiPageSaved { .. } => None,
        }
    }
}

/// Which events a subscriber receives: everything in its organization, or
/// only one board's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subscription {
    pub organization_id: i64,
    pub board_id: Option<i64>,
}

impl Subscription {
    pub fn wants(&self, event: &BoardEvent) -> bool {
        if event.organization_id() != self.organization_id {
            return false;
        }
        match self.board_id {
            Some(board_id) => event.board_id() == Some(board_id),
            None => true,
        }
    }
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Publish an event to every connected subscriber. Having no subscribers is
/// not an error.
pub fn publish(tx: &broadcast::Sender<BoardEvent>, event: BoardEvent) {
    let _ = tx.send(event);
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub board_id: Option<i64>,
}

/// `GET /ws[?board_id=]`: live events for the actor's organization.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    actor: Actor,
    Query(query): Query<FeedQuery>,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let organization_id = actor.organization_id()?;
    if let Some(board_id) = query.board_id {
        let actor_id = actor.user.id;
        state
            .db
            .call(move |db| board::require_board(db, actor_id, board_id))
            .await?;
    }
    let subscription = Subscription {
        organization_id,
        board_id: query.board_id,
    };
    let rx = state.events.subscribe();
    tracing::debug!(user_id = actor.user.id, ?subscription, "websocket subscribed");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx, subscription)))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<BoardEvent>, subscription: Subscription) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, subscription).await;
}

/// Forward matching events, answer keepalives, and drop the connection
/// when no Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<BoardEvent>,
    subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !subscription.wants(&event) {
                            continue;
                        }
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize board event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "websocket subscriber lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
