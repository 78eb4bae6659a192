//! The realtime WebSocket endpoint.
//!
//! Each connection gets an unbounded outbound channel; a writer task drains
//! it onto the socket while the read loop parses frames into
//! [`ClientMessage`] and dispatches them. Malformed frames are answered
//! with an `error` event on the same connection, which stays open.
//!
//! Closing the socket triggers exactly one implicit leave: the connection
//! is unregistered, its vacated room is notified, and the viewer's open
//! join session is closed. The join fee is not refunded.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use coincast_shared::auth::verify_auth_token;
use coincast_shared::protocol::{ChatBroadcast, ClientMessage, ServerMessage};
use coincast_shared::types::{ConnectionId, StreamId, UserId};

use crate::api::AppState;
use crate::registry::{ConnectionSender, RegistryError};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = ConnectionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    debug!(conn = %conn.short(), "WebSocket connection opened");

    // Writer task: serialize outbound events onto the socket. Exits when
    // the channel closes or the transport errors.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => dispatch(&state, conn, &tx, message).await,
                Err(err) => {
                    debug!(conn = %conn.short(), error = %err, "Malformed frame");
                    send(
                        &tx,
                        ServerMessage::Error {
                            message: "Invalid message format".into(),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            // Ping/pong are answered by axum; binary frames are ignored.
            _ => {}
        }
    }

    disconnect(&state, conn).await;
    writer.abort();
    let remaining = state.registry.connection_count().await;
    debug!(
        conn = %conn.short(),
        remaining = remaining,
        "WebSocket connection closed"
    );
}

fn send(tx: &ConnectionSender, event: ServerMessage) {
    // The writer task may already be gone during teardown.
    let _ = tx.send(event);
}

/// Handle one inbound message. Split out from the socket loop so the
/// protocol surface is testable with plain channels.
async fn dispatch(
    state: &AppState,
    conn: ConnectionId,
    tx: &ConnectionSender,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Authenticate { token } => handle_authenticate(state, conn, tx, &token).await,
        ClientMessage::JoinStream { stream_id } => handle_join(state, conn, tx, stream_id).await,
        ClientMessage::LeaveStream => handle_leave(state, conn, tx).await,
        ClientMessage::ChatMessage { content } => handle_chat(state, conn, tx, &content).await,
        ClientMessage::WebrtcSignal {
            signal,
            target_user_id,
        } => handle_signal(state, conn, tx, signal, target_user_id).await,
    }
}

async fn handle_authenticate(state: &AppState, conn: ConnectionId, tx: &ConnectionSender, token: &str) {
    let claims = match verify_auth_token(token, &state.config.auth_pubkey) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(conn = %conn.short(), error = %err, "Authentication failed");
            send(
                tx,
                ServerMessage::AuthError {
                    message: err.to_string(),
                },
            );
            return;
        }
    };

    // The token must belong to a known ledger identity.
    if state.ledger.get_user(claims.user_id).await.is_err() {
        debug!(conn = %conn.short(), user = %claims.user_id.short(), "Token for unknown user");
        send(
            tx,
            ServerMessage::AuthError {
                message: "Unknown user".into(),
            },
        );
        return;
    }

    match state.registry.register(conn, claims.user_id, tx.clone()).await {
        Ok(()) => send(
            tx,
            ServerMessage::Authenticated {
                user_id: claims.user_id,
            },
        ),
        Err(RegistryError::AlreadyRegistered(_)) => send(
            tx,
            ServerMessage::Error {
                message: "Already authenticated".into(),
            },
        ),
        Err(err) => warn!(conn = %conn.short(), error = %err, "Registration failed"),
    }
}

async fn handle_join(state: &AppState, conn: ConnectionId, tx: &ConnectionSender, room: StreamId) {
    let Some(user_id) = state.registry.identity_of(conn).await else {
        send(
            tx,
            ServerMessage::Error {
                message: "Not authenticated".into(),
            },
        );
        return;
    };

    let previous = match state.registry.join_room(conn, room).await {
        Ok(previous) => previous,
        Err(err) => {
            warn!(conn = %conn.short(), error = %err, "Room join failed");
            return;
        }
    };

    // Re-joining the current room changes nothing.
    if previous == Some(room) {
        return;
    }

    if let Some(vacated) = previous {
        leave_side_effects(state, conn, user_id, vacated).await;
    }

    state
        .router
        .broadcast_to_room(
            room,
            &ServerMessage::UserJoined {
                stream_id: room,
                user_id,
            },
            Some(conn),
        )
        .await;
}

async fn handle_leave(state: &AppState, conn: ConnectionId, tx: &ConnectionSender) {
    let Some(user_id) = state.registry.identity_of(conn).await else {
        send(
            tx,
            ServerMessage::Error {
                message: "Not authenticated".into(),
            },
        );
        return;
    };

    if let Some(vacated) = state.registry.leave_room(conn).await {
        leave_side_effects(state, conn, user_id, vacated).await;
    }
}

/// Notify a vacated room and close the viewer's open join session. Shared
/// by explicit leaves, room switches and disconnects.
async fn leave_side_effects(
    state: &AppState,
    _conn: ConnectionId,
    user_id: UserId,
    room: StreamId,
) {
    state
        .router
        .broadcast_to_room(
            room,
            &ServerMessage::UserLeft {
                stream_id: room,
                user_id,
            },
            None,
        )
        .await;

    // No refund on leave; this only closes the session and the counter.
    if let Err(err) = state.settlement.settle_leave(user_id, room).await {
        warn!(
            user = %user_id.short(),
            room = %room.short(),
            error = %err,
            "Leave settlement failed"
        );
    }
}

async fn handle_chat(state: &AppState, conn: ConnectionId, tx: &ConnectionSender, content: &str) {
    let Some(user_id) = state.registry.identity_of(conn).await else {
        send(
            tx,
            ServerMessage::Error {
                message: "Not authenticated".into(),
            },
        );
        return;
    };
    let Some(room) = state.registry.room_of(conn).await else {
        send(
            tx,
            ServerMessage::Error {
                message: "Join a stream first".into(),
            },
        );
        return;
    };

    if !state.throttle.check(conn).await {
        send(
            tx,
            ServerMessage::Error {
                message: "Too many messages, slow down".into(),
            },
        );
        return;
    }

    // Persist first, then broadcast: the store's append order is the order
    // every room member observes.
    match state.ledger.append_chat_message(room, user_id, content).await {
        Ok((message, username)) => {
            state
                .router
                .broadcast_to_room(
                    room,
                    &ServerMessage::NewChatMessage {
                        message: ChatBroadcast {
                            id: message.id,
                            stream_id: message.stream_id,
                            user_id: message.user_id,
                            username,
                            message: message.content,
                            created_at: message.created_at,
                        },
                    },
                    None,
                )
                .await;
        }
        Err(err) => {
            warn!(
                user = %user_id.short(),
                room = %room.short(),
                error = %err,
                "Chat persist failed"
            );
            send(
                tx,
                ServerMessage::Error {
                    message: err.to_string(),
                },
            );
        }
    }
}

async fn handle_signal(
    state: &AppState,
    conn: ConnectionId,
    tx: &ConnectionSender,
    signal: serde_json::Value,
    target: UserId,
) {
    let Some(source) = state.registry.identity_of(conn).await else {
        send(
            tx,
            ServerMessage::Error {
                message: "Not authenticated".into(),
            },
        );
        return;
    };

    state.relay.relay_signal(source, target, signal).await;
}

/// Transport-close cleanup: exactly one implicit leave.
async fn disconnect(state: &AppState, conn: ConnectionId) {
    state.throttle.forget(conn).await;

    if let Some(removed) = state.registry.unregister(conn).await {
        if let Some(room) = removed.room {
            leave_side_effects(state, conn, removed.user_id, room).await;
        }
    }
}
