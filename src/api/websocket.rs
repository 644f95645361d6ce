//! WebSocket endpoints for live status streaming
//!
//! Each delivery of the subscription is sent as one text message. The
//! subscription is opened before the upgrade so bad paths and parameters are
//! answered with a regular HTTP error.

use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::BoxStream, stream::StreamExt};
use tracing::{debug, info};

use crate::api::{
    error::ApiResult,
    state::{ApiState, Target},
    types::StatusQuery,
};

async fn upgrade(ws: WebSocketUpgrade, target: Target<'_>, query: StatusQuery) -> ApiResult<Response> {
    let updates = target.stream(query.subscribe_options()?).await?;
    Ok(ws.on_upgrade(|socket| handle_websocket(socket, updates)))
}

/// GET /api/ws/applications
pub async fn collection_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    upgrade(ws, state.collection(), query).await
}

/// GET /api/ws/application/{app}[/{service}[/{instance}]]
pub async fn node_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(path): Path<String>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    upgrade(ws, state.resolve(&path)?, query).await
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, mut updates: BoxStream<'static, String>) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = updates.next().await {
            if sender.send(Message::Text(json)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Clients only ever close; anything else is ignored
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
