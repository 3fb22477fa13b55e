mod config;
mod registry;
mod room;
mod scoring;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::registry::Registry;
use crate::room::{Outbound, RoomCommand, create_room};
use crate::types::*;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    quiz: QuizData,
}

// ─── Event Gateway ────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {}", conn_id);

    // Room event subscription for this connection. Replaced on create/join;
    // subscribing happens before the command is dispatched so the room's
    // reply cannot be missed.
    let mut room_rx: Option<broadcast::Receiver<Outbound>> = None;

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(msg)) = inbound else { break };
                let Message::Text(text) = msg else { continue };

                let client_msg: ClientMsg = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", conn_id, e);
                        continue;
                    }
                };

                if dispatch(client_msg, &conn_id, &state, &mut sender, &mut room_rx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            event = room_event(&mut room_rx) => {
                match event {
                    Ok(out) => {
                        if out.conn_id == conn_id
                            && send_msg(&mut sender, &out.msg).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Connection {} lagged {} room events", conn_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Room torn down; stop listening until the next join.
                        room_rx = None;
                    }
                }
            }
        }
    }

    tracing::info!("WebSocket disconnected: {}", conn_id);

    // Tell the room (if any) that this connection is gone. Codes are cloned
    // out so no registry guard is held across the await.
    let host_room = state
        .registry
        .host_conns
        .get(&conn_id)
        .map(|c| c.value().clone());
    if let Some(code) = host_room {
        if let Some(handle) = state.registry.room(&code) {
            let _ = handle
                .cmd_tx
                .send(RoomCommand::HostDisconnect {
                    conn_id: conn_id.clone(),
                })
                .await;
        }
    }

    let player_room = state
        .registry
        .player_conns
        .get(&conn_id)
        .map(|c| c.value().clone());
    if let Some(code) = player_room {
        if let Some(handle) = state.registry.room(&code) {
            let _ = handle
                .cmd_tx
                .send(RoomCommand::PlayerDisconnect { conn_id })
                .await;
        }
    }
}

/// Await the next room event, or park forever when no room is joined.
async fn room_event(
    rx: &mut Option<broadcast::Receiver<Outbound>>,
) -> Result<Outbound, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Translate one inbound message into a room command (or a direct reply).
/// Errors only when the socket itself is gone.
async fn dispatch(
    msg: ClientMsg,
    conn_id: &str,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    room_rx: &mut Option<broadcast::Receiver<Outbound>>,
) -> Result<(), axum::Error> {
    match msg {
        ClientMsg::CreateRoom => {
            leave_bound_room(conn_id, &state.registry, None).await;
            let handle = create_room(
                &state.registry,
                conn_id.to_string(),
                state.quiz.questions.clone(),
            );
            *room_rx = Some(handle.event_tx.subscribe());
            send_msg(
                sender,
                &ServerMsg::RoomCreated {
                    room_code: handle.room_code,
                },
            )
            .await?;
        }

        ClientMsg::Join { room_code, name } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            leave_bound_room(conn_id, &state.registry, Some(room_code.as_str())).await;
            *room_rx = Some(handle.event_tx.subscribe());
            let _ = handle
                .cmd_tx
                .send(RoomCommand::Join {
                    conn_id: conn_id.to_string(),
                    name,
                })
                .await;
        }

        ClientMsg::Rejoin {
            room_code,
            token,
            name,
        } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            leave_bound_room(conn_id, &state.registry, Some(room_code.as_str())).await;
            *room_rx = Some(handle.event_tx.subscribe());
            let _ = handle
                .cmd_tx
                .send(RoomCommand::Rejoin {
                    conn_id: conn_id.to_string(),
                    token,
                    name,
                })
                .await;
        }

        ClientMsg::StartGame { room_code } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            let _ = handle
                .cmd_tx
                .send(RoomCommand::StartGame {
                    conn_id: conn_id.to_string(),
                })
                .await;
        }

        ClientMsg::AdvancePhase { room_code } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            let _ = handle
                .cmd_tx
                .send(RoomCommand::AdvancePhase {
                    conn_id: conn_id.to_string(),
                })
                .await;
        }

        ClientMsg::SubmitAnswer { room_code, answer } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            let _ = handle
                .cmd_tx
                .send(RoomCommand::SubmitAnswer {
                    conn_id: conn_id.to_string(),
                    answer,
                })
                .await;
        }

        ClientMsg::GetState { room_code } => {
            let Some(handle) = state.registry.room(&room_code) else {
                return room_not_found(sender).await;
            };
            let _ = handle
                .cmd_tx
                .send(RoomCommand::StateRequest {
                    conn_id: conn_id.to_string(),
                })
                .await;
        }
    }

    Ok(())
}

/// A connection drives at most one room. Before it binds elsewhere, its
/// current room must see a disconnect, otherwise that room keeps a ghost
/// entry nothing will ever detach: a host slot that blocks teardown, or a
/// player stuck `connected` who stalls every early round end. Rebinding to
/// the room it is already in is left to that room's own handlers.
async fn leave_bound_room(conn_id: &str, registry: &Registry, target: Option<&str>) {
    let hosted = registry
        .host_conns
        .get(conn_id)
        .map(|c| c.value().clone());
    if let Some(code) = hosted {
        if target != Some(code.as_str()) {
            registry.host_conns.remove(conn_id);
            if let Some(handle) = registry.room(&code) {
                let _ = handle
                    .cmd_tx
                    .send(RoomCommand::HostDisconnect {
                        conn_id: conn_id.to_string(),
                    })
                    .await;
            }
        }
    }

    let playing = registry
        .player_conns
        .get(conn_id)
        .map(|c| c.value().clone());
    if let Some(code) = playing {
        if target != Some(code.as_str()) {
            registry.unbind_player(conn_id);
            if let Some(handle) = registry.room(&code) {
                let _ = handle
                    .cmd_tx
                    .send(RoomCommand::PlayerDisconnect {
                        conn_id: conn_id.to_string(),
                    })
                    .await;
            }
        }
    }
}

async fn room_not_found(
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    send_msg(
        sender,
        &ServerMsg::Error {
            message: "Room not found".to_string(),
        },
    )
    .await
}

async fn send_msg(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            Ok(())
        }
    }
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    config::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse()
        .expect("Invalid PORT");

    let quiz = config::load_quiz();
    tracing::info!(
        "Loaded quiz '{}' with {} questions",
        quiz.title,
        quiz.questions.len()
    );

    let registry = Registry::new();

    let state = AppState { registry, quiz };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind");

    tracing::info!("quizwire server running on port {}", port);

    axum::serve(listener, app).await.unwrap();
}
