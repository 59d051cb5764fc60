use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use pubgoods_protocol::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod config;
mod error;
mod game;
mod lobby;
mod partition;
mod payout;
mod timer;

use config::ServerConfig;
use error::GameError;
use lobby::{Lobby, Outbox};

#[derive(Clone)]
struct AppState {
    lobby: Lobby,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ServerConfig::parse();
    config::init_tracing(cfg.log_json);

    let state = AppState {
        lobby: Lobby::new(),
    };
    spawn_sweeper(state.lobby.clone(), &cfg);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "server listening on ws://{addr}/ws");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_sweeper(lobby: Lobby, cfg: &ServerConfig) {
    let ttl = cfg.room_idle_ttl();
    let mut every = tokio::time::interval(cfg.sweep_interval());
    tokio::spawn(async move {
        loop {
            every.tick().await;
            let evicted = lobby.sweep_idle(ttl);
            if evicted > 0 {
                info!(evicted, remaining = lobby.room_count(), "idle rooms swept");
            }
        }
    });
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// What the gateway remembers about one connection.
struct Session {
    player_id: Uuid,
    room: Option<String>,
    tx: Outbox,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerToClient>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        player_id: Uuid::new_v4(),
        room: None,
        tx,
    };
    let _ = session.tx.send(ServerToClient::Hello {
        your_id: session.player_id,
    });
    debug!(conn = %session.player_id, "connection opened");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(t) => handle_text(&t, &state, &mut session),
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(room) = session.room.take() {
        state.lobby.disconnect(&room, session.player_id, &session.tx);
    }
    debug!(conn = %session.player_id, "connection closed");
}

fn handle_text(text: &str, state: &AppState, session: &mut Session) {
    match serde_json::from_str::<ClientToServer>(text) {
        Ok(cmd) => route_cmd(cmd, state, session),
        Err(e) => {
            let _ = session.tx.send(ServerToClient::Error {
                kind: ErrorKind::Validation,
                message: format!("malformed message: {e}"),
            });
        }
    }
}

fn route_cmd(cmd: ClientToServer, state: &AppState, session: &mut Session) {
    debug!(player = %session.player_id, ?cmd, "command");
    if let Err(e) = dispatch(cmd, state, session) {
        report(session, e);
    }
}

fn dispatch(cmd: ClientToServer, state: &AppState, session: &mut Session) -> Result<(), GameError> {
    let lobby = &state.lobby;
    let me = session.player_id;

    match cmd {
        ClientToServer::ListRooms => {
            let _ = session.tx.send(ServerToClient::RoomList {
                rooms: lobby.available_rooms(),
            });
        }
        ClientToServer::RoomStatus { room_id } => {
            let view = lobby.room_status(&room_id)?;
            let _ = session.tx.send(ServerToClient::RoomStatus {
                room_id,
                status: view.status,
                current_round: view.current_round,
                time_left: view.time_left,
            });
        }
        ClientToServer::CreateRoom {
            leader_name,
            settings,
        } => {
            leave_current(lobby, session);
            let room_id = lobby.create_room(me, &leader_name, settings, session.tx.clone())?;
            session.room = Some(room_id);
        }
        ClientToServer::Join {
            room_id,
            name,
            resume,
        } => {
            // resuming adopts the earlier identity for this connection
            let id = resume.unwrap_or(me);
            if session.room.as_deref() != Some(room_id.as_str()) || id != me {
                leave_current(lobby, session);
            }
            lobby.join_room(&room_id, id, &name, session.tx.clone())?;
            session.player_id = id;
            session.room = Some(room_id);
        }
        ClientToServer::Leave => leave_current(lobby, session),
        ClientToServer::SetReady => lobby.set_ready(joined(session)?, me)?,
        ClientToServer::StartGame => lobby.start_game(joined(session)?, me)?,
        ClientToServer::SubmitContribution { amount } => {
            lobby.submit_contribution(joined(session)?, me, amount)?
        }
        ClientToServer::RequestNextRound => {
            lobby.request_next_round(joined(session)?, me)?;
        }
    }
    Ok(())
}

fn joined(session: &Session) -> Result<&str, GameError> {
    session
        .room
        .as_deref()
        .ok_or_else(|| GameError::precondition("join a room first"))
}

fn leave_current(lobby: &Lobby, session: &mut Session) {
    if let Some(room) = session.room.take() {
        lobby.disconnect(&room, session.player_id, &session.tx);
    }
}

/// Errors go to the acting connection only; a lost resolution race is not
/// an error from the client's point of view.
fn report(session: &Session, e: GameError) {
    match e.kind() {
        Some(kind) => {
            debug!(player = %session.player_id, ?kind, error = %e, "command rejected");
            let _ = session.tx.send(ServerToClient::Error {
                kind,
                message: e.to_string(),
            });
        }
        None => debug!(player = %session.player_id, error = %e, "dropped race loss"),
    }
}
