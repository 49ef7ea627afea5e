use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::ConnectionId,
    error::{ApiError, ErrorCode},
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

pub mod config;
pub mod room;

use config::Settings;
use room::{RoomError, RoomHandle, Rooms};

#[derive(Clone)]
pub struct AppState {
    rooms: Arc<Rooms>,
    default_room: Arc<str>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            rooms: Arc::new(Rooms::new(
                settings.chain.clone(),
                settings.cluster.clone(),
                settings.broadcast_capacity,
            )),
            default_room: Arc::from(settings.default_room.as_str()),
        }
    }

    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(default_room_baseline))
        .route("/parties/:room", get(room_endpoint))
        .fallback(not_found)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, "no such endpoint")),
    )
}

fn unavailable(err: RoomError) -> (StatusCode, Json<ApiError>) {
    warn!(error = %err, "room unavailable");
    let (status, code) = match err {
        RoomError::Closed(_) => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable),
        RoomError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal),
    };
    (status, Json(ApiError::new(code, err.to_string())))
}

async fn baseline_response(room: &RoomHandle) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let baseline = room.snapshot().await.map_err(unavailable)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], baseline).into_response())
}

async fn default_room_baseline(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let room = state.rooms.get_or_open(&state.default_room).await;
    baseline_response(&room).await
}

/// WebSocket upgrade joins the room; a plain GET reads its baseline.
async fn room_endpoint(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    if name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "room name must not be empty")),
        ));
    }
    let room = state.rooms.get_or_open(&name).await;
    match ws {
        Some(ws) => Ok(ws.on_upgrade(move |socket| ws_connection(room, socket))),
        None => baseline_response(&room).await,
    }
}

async fn ws_connection(room: RoomHandle, socket: WebSocket) {
    let conn = ConnectionId::random();
    let joined = match room.connect(conn).await {
        Ok(joined) => joined,
        Err(err) => {
            warn!(room = room.name(), error = %err, "could not join room");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    if sender.send(Message::Text(joined.baseline)).await.is_err() {
        room.disconnect(conn).await;
        return;
    }

    let mut feed = BroadcastStream::new(joined.events);
    let send_task = tokio::spawn(async move {
        while let Some(item) = feed.next().await {
            match item {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%conn, skipped, "slow connection skipped envelopes");
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if room.receive(conn, text).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(%conn, "connection closed");
    send_task.abort();
    room.disconnect(conn).await;
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
