//! Websocket endpoint: authenticate, upgrade, and run the per-connection
//! event loop.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::SharedState;

use super::events::ServerEvent;
use super::message_types::ClientEvent;
use super::pipeline::NewMessage;
use super::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT passed as a query parameter for clients that cannot set headers.
    pub token: Option<String>,
}

/// `GET /ws`. The token is verified before the upgrade completes, so an
/// unauthenticated client never holds a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> Result<Response, AppError> {
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or(AppError::Unauthorized)?;
    let user_id = state.verifier.verify(&token)?.user_id;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(String::from)
}

async fn handle_socket(socket: WebSocket, state: SharedState, user_id: Uuid) {
    let connection_id = Uuid::new_v4();
    let registry = state.pipeline.registry().clone();
    let mut outbound = registry.register(connection_id, user_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(%connection_id, %user_id, "websocket connected");

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        if ws_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    // Registry entry was dropped, e.g. a forced disconnect.
                    None => break,
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) =
                            dispatch_frame(&state, connection_id, user_id, text.as_str()).await
                        {
                            report_error(&registry, connection_id, err).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%connection_id, error = %e, "websocket transport error");
                        break;
                    }
                }
            }
        }
    }

    // Cascades through every joined room before the entry disappears.
    registry.remove(connection_id, state.pipeline.rooms()).await;
    info!(%connection_id, %user_id, "websocket disconnected");
}

async fn dispatch_frame(
    state: &SharedState,
    connection_id: ConnectionId,
    user_id: Uuid,
    raw: &str,
) -> AppResult<()> {
    let event: ClientEvent = serde_json::from_str(raw)
        .map_err(|e| AppError::BadRequest(format!("malformed frame: {e}")))?;

    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            state
                .pipeline
                .join(connection_id, user_id, conversation_id)
                .await
        }
        ClientEvent::LeaveConversation { conversation_id } => {
            state.pipeline.leave(connection_id, conversation_id).await;
            Ok(())
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            message_type,
            media_url,
            media_thumbnail,
            media_size,
            media_duration,
            reply_to,
        } => {
            let new_message = NewMessage {
                content,
                message_type,
                media_url,
                media_thumbnail,
                media_size,
                media_duration,
                reply_to,
            };
            state
                .pipeline
                .send(connection_id, user_id, conversation_id, new_message)
                .await
                .map(|_| ())
        }
        ClientEvent::Typing {
            conversation_id,
            is_typing,
        } => {
            state
                .pipeline
                .set_typing(connection_id, user_id, conversation_id, is_typing)
                .await
        }
        ClientEvent::MarkAsRead {
            conversation_id,
            message_ids,
        } => {
            state
                .pipeline
                .mark_read(connection_id, user_id, conversation_id, message_ids)
                .await
        }
        ClientEvent::DeleteMessage { message_id } => {
            state.pipeline.delete_message(user_id, message_id).await
        }
    }
}

/// Failures of a single frame go back to the offending connection only;
/// the socket stays open.
async fn report_error(registry: &ConnectionRegistry, connection_id: ConnectionId, err: AppError) {
    warn!(%connection_id, error = %err, "client frame rejected");
    if let Ok(notice) = (ServerEvent::Error {
        message: err.to_string(),
    })
    .to_ws_message()
    {
        registry.send_to(connection_id, notice).await;
    }
}
