//! Websocket hubs.
//!
//! `/hubs/chat` carries [`ClientCommand`]s in and [`ServerEvent`]s out.
//! `/hubs/stats` is push-only and restricted to staff. Both authenticate
//! during the handshake, before the upgrade is accepted.

use std::fmt::Display;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        RawQuery, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use rentline_shared::protocol::{error_codes, ClientCommand, ServerEvent};
use rentline_shared::types::Principal;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::ServerError;
use crate::registry::{ConnectionId, Group};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hub {
    Chat,
    Stats,
}

impl Hub {
    fn name(self) -> &'static str {
        match self {
            Hub::Chat => "chat",
            Hub::Stats => "stats",
        }
    }
}

/// Resolve the caller of a hub handshake.
pub async fn hub_principal(
    state: &AppState,
    hub: Hub,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<Principal, ServerError> {
    let principal = auth::authenticate(&state.verifier, headers, query)?;
    if hub == Hub::Stats && !principal.role.is_staff() {
        return Err(ServerError::Forbidden("staff role required".into()));
    }
    state.chat.ensure_user(&principal).await?;
    Ok(principal)
}

pub async fn chat_hub(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ServerError> {
    let principal = hub_principal(&state, Hub::Chat, &headers, query.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, principal, Hub::Chat)))
}

pub async fn stats_hub(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ServerError> {
    let principal = hub_principal(&state, Hub::Stats, &headers, query.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, principal, Hub::Stats)))
}

async fn run_connection(socket: WebSocket, state: AppState, principal: Principal, hub: Hub) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, state, principal, hub).await;
}

/// Connection lifecycle over any frame sink and stream: register, join the
/// hub's groups, pump frames until close, unregister.
async fn serve_connection<S, R, E>(
    mut sink: S,
    mut stream: R,
    state: AppState,
    principal: Principal,
    hub: Hub,
) where
    S: Sink<Message> + Send + Unpin + 'static,
    R: Stream<Item = Result<Message, E>> + Send + Unpin,
    E: Display + Send,
{
    let (conn, mut rx) = state.registry.register(principal.clone()).await;
    let staff_chat = hub == Hub::Chat && principal.role.is_staff();

    match hub {
        Hub::Chat if staff_chat => {
            state.registry.join(conn, Group::Staff).await;
            state.stats.push().await;
        }
        Hub::Chat => {}
        Hub::Stats => {
            state.registry.join(conn, Group::StaffStats).await;
            state.stats.send_to(conn).await;
        }
    }

    let active = state.registry.connection_count().await;
    info!(
        conn,
        hub = hub.name(),
        user = %principal.user_id,
        role = principal.role.as_str(),
        active,
        "Hub connected"
    );

    // Writer: drains the registry queue into the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, event = event.kind(), "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn, error = %e, "Websocket read failed");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let reply = match hub {
                    Hub::Chat => handle_frame(&state, conn, &principal, &text).await,
                    Hub::Stats => handle_stats_frame(&text),
                };
                if let Some(reply) = reply {
                    state.registry.send_to_connection(conn, reply).await;
                }
            }
            Message::Binary(_) => {
                state
                    .registry
                    .send_to_connection(
                        conn,
                        ServerEvent::error(error_codes::BAD_FRAME, "binary frames are not supported"),
                    )
                    .await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.registry.unregister(conn).await;
    writer.abort();

    if staff_chat {
        state.stats.push().await;
    }
    info!(conn, hub = hub.name(), user = %principal.user_id, "Hub disconnected");
}

/// Decode one chat frame, apply the per-user rate limit and dispatch it.
pub async fn handle_frame(
    state: &AppState,
    conn: ConnectionId,
    principal: &Principal,
    text: &str,
) -> Option<ServerEvent> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(conn, error = %e, "Undecodable frame");
            return Some(ServerEvent::error(error_codes::BAD_FRAME, e.to_string()));
        }
    };

    if !matches!(command, ClientCommand::Ping) && !state.chat_limiter.check(principal.user_id).await {
        warn!(conn, user = %principal.user_id, "Chat rate limit exceeded");
        return Some(ServerEvent::error(
            error_codes::RATE_LIMITED,
            "too many messages, slow down",
        ));
    }

    handle_command(state, conn, principal, command).await
}

/// Run a decoded command. Returns the event to send back to the caller, if
/// any; broadcasts happen inside the relay.
pub async fn handle_command(
    state: &AppState,
    conn: ConnectionId,
    principal: &Principal,
    command: ClientCommand,
) -> Option<ServerEvent> {
    let chat = &state.chat;
    let result = match command {
        ClientCommand::Ping => return Some(ServerEvent::Pong),
        ClientCommand::Join { conversation_id } => {
            chat.join(conn, principal, conversation_id).await;
            Ok(())
        }
        ClientCommand::Leave { conversation_id } => {
            chat.leave(conn, conversation_id).await;
            Ok(())
        }
        ClientCommand::SendMessage {
            conversation_id,
            text,
        } => chat.send(principal, conversation_id, &text).await.map(|_| ()),
        ClientCommand::AssignStaff {
            conversation_id,
            staff_id,
        } => chat
            .assign_staff(principal, conversation_id, staff_id)
            .await
            .map(|_| ()),
        ClientCommand::StartConversation {
            subject,
            priority,
            text,
        } => chat
            .start_conversation(principal, Some(conn), &subject, priority, &text)
            .await
            .map(|_| ()),
        ClientCommand::SetStatus {
            conversation_id,
            status,
        } => chat
            .set_status(principal, conversation_id, status)
            .await
            .map(|_| ()),
    };

    match result {
        Ok(()) => None,
        Err(e) => {
            debug!(conn, user = %principal.user_id, code = e.code(), error = %e, "Command rejected");
            Some(e.to_event())
        }
    }
}

fn handle_stats_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Ping) => Some(ServerEvent::Pong),
        Ok(_) => Some(ServerEvent::error(
            error_codes::INVALID,
            "the statistics hub does not accept commands",
        )),
        Err(e) => Some(ServerEvent::error(error_codes::BAD_FRAME, e.to_string())),
    }
}
