//! WebSocket message dispatch
//!
//! Authorization is checked here before any store write. Phase publications
//! go through the same transition rules the host controller uses locally.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{Connection, RelayState};
use crate::capture::JPEG_DATA_URL_PREFIX;
use crate::error::{ShuffleError, StoreError};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::{validate_update, MIN_PLAYERS};
use crate::session::{allocate_room, normalize_room_code, register_player};
use crate::types::{PlayerRecord, Role, RoomCode, RoomDoc, RoomPhase, RoomUpdate};

/// Macro to check host authorization and return early if unauthorized
macro_rules! check_host {
    ($role:expr, $action:expr) => {
        if *$role != Role::Host {
            return Some(ServerMessage::error(
                "UNAUTHORIZED",
                format!("Only host can {}", $action),
            ));
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<RelayState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Watch { code } => handle_watch(state, conn, code).await,

        ClientMessage::Unwatch { code } => {
            let code = normalize_room_code(&code);
            if conn.unwatch(&code) {
                tracing::debug!("{} stopped watching {}", conn.id, code);
            }
            None
        }

        // Player messages
        ClientMessage::JoinRoom { code, name } => {
            match register_player(state.store.as_ref(), &code, &conn.id, &name).await {
                Ok(code) => Some(ServerMessage::Joined {
                    code,
                    id: conn.id.clone(),
                }),
                Err(e) => Some(e.into()),
            }
        }

        ClientMessage::LeaveRoom { code } => {
            let code = normalize_room_code(&code);
            match state.store.remove_player(&code, &conn.id).await {
                Ok(()) => {
                    tracing::info!("{} left room {}", conn.id, code);
                    Some(ServerMessage::Left { code })
                }
                Err(e) => Some(e.into()),
            }
        }

        ClientMessage::UploadPhoto { code, photo } => {
            if let Some(photo) = &photo {
                if !photo.starts_with(JPEG_DATA_URL_PREFIX) {
                    return Some(ServerMessage::error(
                        "INVALID_PHOTO",
                        "Photo must be a base64 JPEG data URL",
                    ));
                }
            }
            let code = normalize_room_code(&code);
            match state.store.update_photo(&code, &conn.id, photo).await {
                // Uploads arrive several times a second; only failures are answered
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!("Photo upload from {} failed: {}", conn.id, e);
                    Some(e.into())
                }
            }
        }

        // Host-only commands (authorization checked before dispatch)
        ClientMessage::CreateRoom => {
            check_host!(&conn.role, "create rooms");
            match allocate_room(state.store.as_ref(), &conn.id).await {
                Ok(code) => Some(ServerMessage::RoomCreated { code }),
                Err(e) => Some(e.into()),
            }
        }

        ClientMessage::CloseRoom { code } => {
            check_host!(&conn.role, "close rooms");
            let code = normalize_room_code(&code);
            if let Err(msg) = owned_room(state, conn, &code).await {
                return Some(msg);
            }
            match state.store.delete_room(&code).await {
                // Watchers, including this connection, get `room_closed`
                Ok(()) => None,
                Err(e) => Some(e.into()),
            }
        }

        ClientMessage::PublishPhase {
            code,
            phase,
            winner_id,
        } => {
            check_host!(&conn.role, "publish the room phase");
            let code = normalize_room_code(&code);
            let update = RoomUpdate { phase, winner_id };
            match handle_publish(state, conn, &code, update).await {
                Ok(()) => Some(ServerMessage::Published { code, phase }),
                Err(msg) => Some(msg),
            }
        }
    }
}

/// Load a room and make sure this connection is its host
async fn owned_room(
    state: &Arc<RelayState>,
    conn: &Connection,
    code: &str,
) -> Result<RoomDoc, ServerMessage> {
    let room = state
        .store
        .get_room(code)
        .await?
        .ok_or_else(|| StoreError::RoomNotFound(code.to_string()))?;

    if room.host_id != conn.id {
        return Err(ServerMessage::error(
            "UNAUTHORIZED",
            format!("Not the host of room {}", code),
        ));
    }
    Ok(room)
}

async fn handle_publish(
    state: &Arc<RelayState>,
    conn: &Connection,
    code: &str,
    update: RoomUpdate,
) -> Result<(), ServerMessage> {
    let room = owned_room(state, conn, code).await?;
    validate_update(room.phase, &update)?;

    if update.phase == RoomPhase::Spinning {
        let players = state.store.watch_players(code).await?;
        let count = players.borrow().len();
        if count < MIN_PLAYERS {
            return Err(ShuffleError::NotEnoughPlayers { count }.into());
        }
    }

    tracing::info!("Host {} publishing {} for room {}", conn.id, update.phase, code);
    state.store.update_room(code, update).await?;
    Ok(())
}

async fn handle_watch(
    state: &Arc<RelayState>,
    conn: &mut Connection,
    code: RoomCode,
) -> Option<ServerMessage> {
    let code = normalize_room_code(&code);

    match state.store.get_room(&code).await {
        Ok(Some(_)) => {}
        Ok(None) => return Some(StoreError::RoomNotFound(code).into()),
        Err(e) => return Some(e.into()),
    }

    let room_rx = match state.store.watch_room(&code).await {
        Ok(rx) => rx,
        Err(e) => return Some(e.into()),
    };
    let players_rx = match state.store.watch_players(&code).await {
        Ok(rx) => rx,
        Err(e) => return Some(e.into()),
    };

    tracing::debug!("{} watching room {}", conn.id, code);
    let task = spawn_room_forwarder(code.clone(), room_rx, players_rx, conn.outbound.clone());
    conn.watch(code, task);
    None
}

/// Forward room/players snapshots to one connection until the room closes
pub fn spawn_room_forwarder(
    code: RoomCode,
    mut room_rx: watch::Receiver<Option<RoomDoc>>,
    mut players_rx: watch::Receiver<Vec<PlayerRecord>>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let room_msg = |doc: Option<RoomDoc>, code: &RoomCode| match doc {
            Some(room) => ServerMessage::Room {
                code: code.clone(),
                room: room.into(),
            },
            None => ServerMessage::RoomClosed { code: code.clone() },
        };
        let players_msg = |players: Vec<PlayerRecord>, code: &RoomCode| ServerMessage::Players {
            code: code.clone(),
            players,
        };

        let doc = room_rx.borrow_and_update().clone();
        let closed = doc.is_none();
        if outbound.send(room_msg(doc, &code)).is_err() || closed {
            return;
        }
        let players = players_rx.borrow_and_update().clone();
        if outbound.send(players_msg(players, &code)).is_err() {
            return;
        }

        let mut players_open = true;
        loop {
            tokio::select! {
                changed = room_rx.changed() => {
                    let doc = match changed {
                        Ok(()) => room_rx.borrow_and_update().clone(),
                        // Store connection gone: same terminal signal
                        Err(_) => None,
                    };
                    let closed = doc.is_none();
                    if outbound.send(room_msg(doc, &code)).is_err() || closed {
                        break;
                    }
                }
                changed = players_rx.changed(), if players_open => {
                    match changed {
                        Ok(()) => {
                            let players = players_rx.borrow_and_update().clone();
                            if outbound.send(players_msg(players, &code)).is_err() {
                                break;
                            }
                        }
                        Err(_) => players_open = false,
                    }
                }
            }
        }
        tracing::debug!("Forwarder for room {} stopped", code);
    })
}
