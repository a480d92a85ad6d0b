//! Per-participant orchestration on top of the shared room store.
//!
//! A [`SessionContext`] is built once per participant and passed down
//! explicitly; nothing in here reaches for global state.

pub mod host;
pub mod spectator;

pub use host::{spawn_host, HostCommand, HostController, HostEvent, HostHandle, HostView};
pub use spectator::{
    spawn_spectator, CloseReason, SpectatorController, SpectatorHandle, SpectatorStatus,
    SpectatorView,
};

use rand::Rng;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{ShuffleError, StoreError};
use crate::resume::{SavedSession, SessionFile};
use crate::scheduler::{Clock, TokioClock};
use crate::store::RoomStore;
use crate::types::{ParticipantId, PlayerDoc, Role, RoomCode, RoomDoc};

/// Safe character set for room codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 4;
const CODE_ATTEMPTS: usize = 16;

/// Generate a random room code
pub fn generate_room_code() -> RoomCode {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Normalize user-typed room codes: uppercase, no whitespace
pub fn normalize_room_code(raw: &str) -> RoomCode {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Injected handles for one participant in one room
#[derive(Clone)]
pub struct SessionContext {
    pub store: Arc<dyn RoomStore>,
    pub room: RoomCode,
    pub participant: ParticipantId,
    pub config: Arc<EngineConfig>,
    /// Time source for spin timers; tokio time unless replaced
    pub clock: Arc<dyn Clock>,
    saved: Option<SessionFile>,
}

impl SessionContext {
    pub fn new(
        store: Arc<dyn RoomStore>,
        room: RoomCode,
        participant: ParticipantId,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            room,
            participant,
            config,
            clock: Arc::new(TokioClock::new()),
            saved: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist this session so a restart can rejoin it. Players pass their
    /// display name so they can re-register. A failed save is logged and
    /// otherwise ignored.
    pub async fn remember(mut self, file: SessionFile, role: Role, name: Option<&str>) -> Self {
        let mut session = SavedSession::new(self.room.clone(), role, self.participant.clone());
        if let Some(name) = name {
            session = session.with_name(name.trim());
        }
        if let Err(e) = file.save(&session).await {
            tracing::warn!("Failed to save session to {:?}: {}", file.path(), e);
        }
        self.saved = Some(file);
        self
    }

    /// Drop the saved session, if any
    pub async fn forget(&self) {
        if let Some(file) = &self.saved {
            if let Err(e) = file.forget().await {
                tracing::warn!("Failed to remove session file {:?}: {}", file.path(), e);
            }
        }
    }

    /// Remove this participant's player document
    pub async fn leave(&self) -> Result<(), ShuffleError> {
        tracing::info!("{} leaving room {}", self.participant, self.room);
        self.forget().await;
        self.store.remove_player(&self.room, &self.participant).await?;
        Ok(())
    }

    /// Delete the room document, ending the room for everyone
    pub async fn close_room(&self) -> Result<(), ShuffleError> {
        tracing::info!("Closing room {}", self.room);
        self.forget().await;
        self.store.delete_room(&self.room).await?;
        Ok(())
    }
}

/// Create a room document owned by `host_id` under an unused code
pub async fn allocate_room(
    store: &dyn RoomStore,
    host_id: &ParticipantId,
) -> Result<RoomCode, ShuffleError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_room_code();
        match store.create_room(&code, RoomDoc::new(host_id.clone())).await {
            Ok(()) => {
                tracing::info!("Host {} opened room {}", host_id, code);
                return Ok(code);
            }
            // Collision - try again
            Err(StoreError::RoomExists(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::WriteFailed("could not allocate a free room code".to_string()).into())
}

/// Write a fresh player document for `participant` into an existing room.
///
/// Returns the normalized room code.
pub async fn register_player(
    store: &dyn RoomStore,
    code: &str,
    participant: &ParticipantId,
    name: &str,
) -> Result<RoomCode, ShuffleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ShuffleError::EmptyName);
    }
    let code = normalize_room_code(code);

    if store.get_room(&code).await?.is_none() {
        tracing::warn!("Join attempt for unknown room {}", code);
        return Err(StoreError::RoomNotFound(code).into());
    }

    store
        .put_player(
            &code,
            participant,
            PlayerDoc {
                name: name.to_string(),
                photo: None,
            },
        )
        .await?;
    tracing::info!("{} joined room {} as {:?}", participant, code, name);
    Ok(code)
}

/// Open a new room and return the host's session
pub async fn open_room(
    store: Arc<dyn RoomStore>,
    host_id: ParticipantId,
    config: Arc<EngineConfig>,
) -> Result<SessionContext, ShuffleError> {
    let code = allocate_room(store.as_ref(), &host_id).await?;
    Ok(SessionContext::new(store, code, host_id, config))
}

/// Join an existing room as a player with the given display name
pub async fn join_room(
    store: Arc<dyn RoomStore>,
    code: &str,
    participant: ParticipantId,
    name: &str,
    config: Arc<EngineConfig>,
) -> Result<SessionContext, ShuffleError> {
    let code = register_player(store.as_ref(), code, &participant, name).await?;
    Ok(SessionContext::new(store, code, participant, config))
}

/// [`open_room`], saving the session to `file` for a later [`rejoin`]
pub async fn open_room_remembered(
    store: Arc<dyn RoomStore>,
    host_id: ParticipantId,
    config: Arc<EngineConfig>,
    file: SessionFile,
) -> Result<SessionContext, ShuffleError> {
    let ctx = open_room(store, host_id, config).await?;
    Ok(ctx.remember(file, Role::Host, None).await)
}

/// [`join_room`], saving the session to `file` for a later [`rejoin`]
pub async fn join_room_remembered(
    store: Arc<dyn RoomStore>,
    code: &str,
    participant: ParticipantId,
    name: &str,
    config: Arc<EngineConfig>,
    file: SessionFile,
) -> Result<SessionContext, ShuffleError> {
    let ctx = join_room(store, code, participant, name, config).await?;
    Ok(ctx.remember(file, Role::Player, Some(name)).await)
}

/// Pick up the session saved by a previous run.
///
/// Returns `None` when nothing usable is saved. A file pointing at a deleted
/// room, a room now owned by someone else, or a player that cannot be
/// re-registered is removed. Players whose document disappeared in the
/// meantime are registered again under their saved name.
pub async fn rejoin(
    store: Arc<dyn RoomStore>,
    file: SessionFile,
    config: Arc<EngineConfig>,
) -> Result<Option<(Role, SessionContext)>, ShuffleError> {
    let Some(saved) = file.load().await else {
        return Ok(None);
    };

    let stale = match store.get_room(&saved.code).await? {
        None => Some("the room is gone".to_string()),
        Some(doc) if saved.role == Role::Host && doc.host_id != saved.participant_id => {
            Some(format!("the room belongs to {}", doc.host_id))
        }
        Some(_) if saved.role == Role::Player => {
            match ensure_registered(store.as_ref(), &saved).await {
                Ok(()) => None,
                Err(ShuffleError::EmptyName) => Some("no display name was saved".to_string()),
                Err(e) => return Err(e),
            }
        }
        Some(_) => None,
    };

    if let Some(reason) = stale {
        tracing::info!("Not rejoining room {}: {}", saved.code, reason);
        if let Err(e) = file.forget().await {
            tracing::warn!("Failed to remove session file {:?}: {}", file.path(), e);
        }
        return Ok(None);
    }

    tracing::info!(
        "Rejoining room {} as {:?} {}",
        saved.code,
        saved.role,
        saved.participant_id
    );
    let mut ctx = SessionContext::new(store, saved.code, saved.participant_id, config);
    ctx.saved = Some(file);
    Ok(Some((saved.role, ctx)))
}

async fn ensure_registered(store: &dyn RoomStore, saved: &SavedSession) -> Result<(), ShuffleError> {
    let players = store.watch_players(&saved.code).await?;
    let present = players
        .borrow()
        .iter()
        .any(|p| p.id == saved.participant_id);
    if present {
        return Ok(());
    }
    let name = saved.name.as_deref().unwrap_or_default();
    register_player(store, &saved.code, &saved.participant_id, name).await?;
    Ok(())
}
