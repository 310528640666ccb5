//! Websocket observers.
//!
//! Each upgraded socket is registered with the `ConnectionRegistry` and
//! served by one task that forwards queued frames out and answers inbound
//! control frames. The observer is unregistered when either side closes.

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use scalewise_fanout::{ConnectionRegistry, ServerFrame, reply_for};

use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub client_id: Option<String>,
}

/// GET /ws?client_id=...
pub async fn upgrade(
    State(state): State<ApiState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let registry = state.controller.registry().clone();
    ws.on_upgrade(move |socket| serve_observer(socket, registry, query.client_id))
}

/// GET /ws/connections
pub async fn connections(State(state): State<ApiState>) -> impl IntoResponse {
    let observers = state.controller.registry().snapshot().await;
    Json(json!({
        "active_connections": observers.len(),
        "connections": observers,
    }))
}

async fn serve_observer(mut socket: WebSocket, registry: ConnectionRegistry, client_id: Option<String>) {
    let (observer, mut outbound) = registry.connect(client_id).await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    // Evicted by the registry.
                    debug!(client_id = %observer.client_id, "observer channel closed");
                    break;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let reply = match inbound {
                    Some(Ok(Message::Text(text))) => reply_for(text.as_str()),
                    Some(Ok(Message::Binary(_))) => ServerFrame::error("binary frames are not supported"),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(client_id = %observer.client_id, error = %e, "websocket receive failed");
                        break;
                    }
                };
                if socket.send(Message::Text(reply.to_json().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    registry.unregister(observer.id).await;
}
