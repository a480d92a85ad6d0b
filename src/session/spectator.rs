//! Spectator side of a room: mirrors the published phase with a local,
//! non-authoritative animation and shows the published winner.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::SessionContext;
use crate::config::EngineConfig;
use crate::engine::{Command, Frame, Renderer};
use crate::error::{ShuffleError, StoreError};
use crate::roster::{Participant, Roster};
use crate::scheduler::FrameScheduler;
use crate::types::{ParticipantId, PlayerRecord, RoomDoc, RoomPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The host deleted the room document
    Deleted,
    /// The store connection went away
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectatorStatus {
    Room(RoomPhase),
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectatorView {
    pub status: SpectatorStatus,
    pub winner_id: Option<ParticipantId>,
    /// `None` while finished means the winner has since left the room
    pub winner: Option<Participant>,
    pub roster: Vec<Participant>,
    pub frame: Frame,
}

pub struct SpectatorController {
    roster: Roster,
    renderer: Renderer,
    status: SpectatorStatus,
    winner_id: Option<ParticipantId>,
}

impl SpectatorController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            roster: Roster::new(),
            renderer: Renderer::new(config.physics.clone(), config.strip.clone()),
            status: SpectatorStatus::Room(RoomPhase::Waiting),
            winner_id: None,
        }
    }

    pub fn status(&self) -> SpectatorStatus {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, SpectatorStatus::Closed(_))
    }

    /// Whether the local strip should be animating
    pub fn is_spinning(&self) -> bool {
        self.status == SpectatorStatus::Room(RoomPhase::Spinning)
    }

    pub fn on_players(&mut self, records: &[PlayerRecord]) {
        self.roster.sync(records);
    }

    /// Apply a room document. Closure is terminal: nothing after it is applied.
    pub fn on_room(&mut self, doc: Option<RoomDoc>) {
        if self.is_closed() {
            return;
        }
        let Some(doc) = doc else {
            self.close(CloseReason::Deleted);
            return;
        };

        let previous = self.status;
        match doc.phase {
            RoomPhase::Spinning => {
                if previous != SpectatorStatus::Room(RoomPhase::Spinning) {
                    tracing::debug!("Room is spinning, starting ambient animation");
                    self.renderer.send(Command::Spin);
                }
                // A winner is only meaningful once finished
                self.winner_id = None;
            }
            RoomPhase::Finished => {
                self.renderer.send(Command::Idle);
                self.winner_id = doc.winner_id;
                if self.winner().is_none() {
                    tracing::warn!("Winner {:?} is not in the local roster", self.winner_id);
                }
            }
            RoomPhase::Waiting => {
                self.renderer.send(Command::Idle);
                self.winner_id = None;
            }
        }
        self.status = SpectatorStatus::Room(doc.phase);
    }

    pub fn on_disconnect(&mut self) {
        self.close(CloseReason::Disconnected);
    }

    pub fn tick(&mut self) {
        // Ambient animation never targets anything, so it never lands
        let _ = self.renderer.tick();
    }

    pub fn resize(&mut self, viewport_width: f64) {
        self.renderer.set_viewport_width(viewport_width);
    }

    pub fn winner(&self) -> Option<Participant> {
        let id = self.winner_id.as_ref()?;
        self.roster.find(id).cloned()
    }

    pub fn view(&self) -> SpectatorView {
        SpectatorView {
            status: self.status,
            winner_id: self.winner_id.clone(),
            winner: self.winner(),
            roster: self.roster.participants().to_vec(),
            frame: self.renderer.frame(self.roster.len()),
        }
    }

    fn close(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        tracing::info!("Room closed ({:?})", reason);
        self.status = SpectatorStatus::Closed(reason);
        self.winner_id = None;
        self.renderer.send(Command::Idle);
    }
}

pub enum SpectatorCommand {
    Resize(f64),
}

#[derive(Clone)]
pub struct SpectatorHandle {
    commands: mpsc::Sender<SpectatorCommand>,
    view: watch::Receiver<SpectatorView>,
}

impl SpectatorHandle {
    pub fn view(&self) -> watch::Receiver<SpectatorView> {
        self.view.clone()
    }

    pub async fn resize(&self, viewport_width: f64) -> Result<(), ShuffleError> {
        self.commands
            .send(SpectatorCommand::Resize(viewport_width))
            .await
            .map_err(|_| ShuffleError::SessionEnded)
    }

    /// Wait until the room reaches a closed state
    pub async fn closed(&self) -> CloseReason {
        let mut view = self.view.clone();
        loop {
            if let SpectatorStatus::Closed(reason) = view.borrow_and_update().status {
                return reason;
            }
            if view.changed().await.is_err() {
                return CloseReason::Disconnected;
            }
        }
    }
}

/// Start mirroring the room in `ctx`. Frames only run while the room is
/// spinning; the task ends when the room closes or every handle is dropped.
pub async fn spawn_spectator(
    ctx: SessionContext,
) -> Result<(SpectatorHandle, JoinHandle<()>), ShuffleError> {
    let mut room_rx = ctx.store.watch_room(&ctx.room).await?;
    let mut players_rx = ctx.store.watch_players(&ctx.room).await?;

    let mut controller = SpectatorController::new(&ctx.config);
    let records = players_rx.borrow_and_update().clone();
    controller.on_players(&records);
    let doc = room_rx.borrow_and_update().clone();
    if doc.is_none() {
        return Err(StoreError::RoomNotFound(ctx.room.clone()).into());
    }
    controller.on_room(doc);

    let (command_tx, mut commands) = mpsc::channel(8);
    let (view_tx, view_rx) = watch::channel(controller.view());
    let handle = SpectatorHandle {
        commands: command_tx,
        view: view_rx,
    };

    let frame_interval: Duration = ctx.config.timing.frame_interval;
    let task = tokio::spawn(async move {
        let mut frames = FrameScheduler::new(frame_interval);
        let mut players_open = true;

        tracing::info!("Spectator {} watching room {}", ctx.participant, ctx.room);

        while !controller.is_closed() {
            if controller.is_spinning() {
                frames.start();
            } else {
                frames.stop();
            }

            tokio::select! {
                _ = frames.next_frame() => controller.tick(),

                cmd = commands.recv() => match cmd {
                    Some(SpectatorCommand::Resize(width)) => controller.resize(width),
                    None => break,
                },

                changed = room_rx.changed() => match changed {
                    Ok(()) => {
                        let doc = room_rx.borrow_and_update().clone();
                        controller.on_room(doc);
                    }
                    Err(_) => controller.on_disconnect(),
                },

                changed = players_rx.changed(), if players_open => match changed {
                    Ok(()) => {
                        let records = players_rx.borrow_and_update().clone();
                        controller.on_players(&records);
                    }
                    Err(_) => players_open = false,
                },
            }

            view_tx.send_replace(controller.view());
        }

        frames.stop();
        if controller.is_closed() {
            ctx.forget().await;
        }
        view_tx.send_replace(controller.view());
        tracing::info!("Spectator {} left room {}", ctx.participant, ctx.room);
    });

    Ok((handle, task))
}
