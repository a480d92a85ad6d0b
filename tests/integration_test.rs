use async_trait::async_trait;
use camspin::config::EngineConfig;
use camspin::error::StoreResult;
use camspin::scheduler::ManualClock;
use camspin::session::{
    join_room, open_room, spawn_host, spawn_spectator, CloseReason, SessionContext,
    SpectatorStatus,
};
use camspin::store::{MemoryStore, RoomStore};
use camspin::types::{PlayerDoc, PlayerRecord, RoomDoc, RoomPhase, RoomUpdate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Store wrapper that records every phase publication
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    updates: Mutex<Vec<RoomUpdate>>,
}

impl RecordingStore {
    fn updates(&self) -> Vec<RoomUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomStore for RecordingStore {
    async fn create_room(&self, code: &str, doc: RoomDoc) -> StoreResult<()> {
        self.inner.create_room(code, doc).await
    }

    async fn get_room(&self, code: &str) -> StoreResult<Option<RoomDoc>> {
        self.inner.get_room(code).await
    }

    async fn update_room(&self, code: &str, update: RoomUpdate) -> StoreResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        self.inner.update_room(code, update).await
    }

    async fn delete_room(&self, code: &str) -> StoreResult<()> {
        self.inner.delete_room(code).await
    }

    async fn put_player(&self, code: &str, id: &str, doc: PlayerDoc) -> StoreResult<()> {
        self.inner.put_player(code, id, doc).await
    }

    async fn update_photo(&self, code: &str, id: &str, photo: Option<String>) -> StoreResult<()> {
        self.inner.update_photo(code, id, photo).await
    }

    async fn remove_player(&self, code: &str, id: &str) -> StoreResult<()> {
        self.inner.remove_player(code, id).await
    }

    async fn watch_room(&self, code: &str) -> StoreResult<watch::Receiver<Option<RoomDoc>>> {
        self.inner.watch_room(code).await
    }

    async fn watch_players(&self, code: &str) -> StoreResult<watch::Receiver<Vec<PlayerRecord>>> {
        self.inner.watch_players(code).await
    }
}

/// Wait (in virtual time) until the watched value satisfies `pred`
async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            {
                let value = rx.borrow_and_update();
                if pred(&value) {
                    return value.clone();
                }
            }
            rx.changed().await.expect("sender dropped while waiting");
        }
    })
    .await
    .expect("timed out waiting for state")
}

async fn room_with_players(
    store: Arc<dyn RoomStore>,
    config: Arc<EngineConfig>,
    names: &[&str],
) -> (SessionContext, Vec<SessionContext>) {
    let host = open_room(store.clone(), "host".to_string(), config.clone())
        .await
        .unwrap();
    let mut players = Vec::new();
    for name in names {
        let ctx = join_room(
            store.clone(),
            &host.room,
            name.to_lowercase(),
            name,
            config.clone(),
        )
        .await
        .unwrap();
        players.push(ctx);
    }
    (host, players)
}

#[tokio::test(start_paused = true)]
async fn test_natural_stop_reaches_late_spectator() {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, players) = room_with_players(store.clone(), config, &["A", "B", "C"]).await;

    let (host, _host_task) = spawn_host(host_ctx.clone(), StdRng::seed_from_u64(7))
        .await
        .unwrap();
    let mut host_view = host.view();
    wait_for(&mut host_view, |v| v.roster.len() == 3 && v.can_spin).await;

    host.spin().await.unwrap();
    let mut room = store.watch_room(&host_ctx.room).await.unwrap();
    wait_for(&mut room, |doc| {
        doc.as_ref().is_some_and(|d| d.phase == RoomPhase::Spinning)
    })
    .await;

    // Subscribes only after the Spinning transition
    let (spectator, _spectator_task) = spawn_spectator(players[0].clone()).await.unwrap();
    let mut view = spectator.view();
    assert_eq!(view.borrow().status, SpectatorStatus::Room(RoomPhase::Spinning));

    let finished = wait_for(&mut view, |v| {
        v.status == SpectatorStatus::Room(RoomPhase::Finished)
    })
    .await;

    let winner_id = finished.winner_id.expect("finished without a winner");
    assert!(["a", "b", "c"].contains(&winner_id.as_str()));
    assert_eq!(finished.winner.map(|p| p.id), Some(winner_id.clone()));

    let host_final = wait_for(&mut host_view, |v| v.phase == RoomPhase::Finished).await;
    assert_eq!(host_final.winner.map(|p| p.id), Some(winner_id.clone()));

    let doc = store.get_room(&host_ctx.room).await.unwrap().unwrap();
    assert_eq!(doc.winner_id, Some(winner_id));
}

#[tokio::test(start_paused = true)]
async fn test_early_stop_publishes_exactly_one_finished() {
    let recording = Arc::new(RecordingStore::default());
    let store: Arc<dyn RoomStore> = recording.clone();
    // Natural timer fires at the same moment as the early stop
    let mut config = EngineConfig::default();
    config.timing.min_spin = Duration::from_millis(500);
    config.timing.max_spin = Duration::from_millis(500);
    let (host_ctx, _players) = room_with_players(store.clone(), Arc::new(config), &["A", "B"]).await;

    let (host, _task) = spawn_host(host_ctx.clone(), StdRng::seed_from_u64(1))
        .await
        .unwrap();
    let mut view = host.view();
    wait_for(&mut view, |v| v.can_spin).await;

    host.spin().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let first = host.force_stop().await;
    let second = host.force_stop().await;
    // Whichever path won, the second request is a no-op
    assert!(matches!(first, Ok(_)));
    assert_eq!(second, Ok(false));

    wait_for(&mut view, |v| v.phase == RoomPhase::Finished).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let updates = recording.updates();
    let finished: Vec<_> = updates
        .iter()
        .filter(|u| u.phase == RoomPhase::Finished)
        .collect();
    assert_eq!(finished.len(), 1, "published: {:?}", updates);
    assert_eq!(updates[0], RoomUpdate::spinning());
}

#[tokio::test(start_paused = true)]
async fn test_respin_never_exposes_stale_winner() {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, _players) = room_with_players(store.clone(), config, &["A", "B", "C"]).await;

    // Record every room document a subscriber gets to see
    let mut room = store.watch_room(&host_ctx.room).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_writer = seen.clone();
    tokio::spawn(async move {
        while room.changed().await.is_ok() {
            let doc = room.borrow_and_update().clone();
            seen_writer.lock().unwrap().push(doc);
        }
    });

    let (host, _task) = spawn_host(host_ctx, StdRng::seed_from_u64(3)).await.unwrap();
    let mut view = host.view();
    wait_for(&mut view, |v| v.can_spin).await;

    for _ in 0..2 {
        host.spin().await.unwrap();
        assert_eq!(host.spin().await, Err(camspin::error::ShuffleError::AlreadySpinning));
        host.force_stop().await.unwrap();
        wait_for(&mut view, |v| v.phase == RoomPhase::Finished && v.can_spin).await;
    }

    let seen = seen.lock().unwrap().clone();
    assert!(seen
        .iter()
        .flatten()
        .filter(|d| d.phase == RoomPhase::Spinning)
        .all(|d| d.winner_id.is_none()));
    assert!(seen
        .iter()
        .flatten()
        .any(|d| d.phase == RoomPhase::Finished && d.winner_id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_host_exit_closes_room_for_spectators() {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, players) = room_with_players(store.clone(), config, &["A", "B"]).await;

    let (host, host_task) = spawn_host(host_ctx.clone(), StdRng::seed_from_u64(5))
        .await
        .unwrap();
    let (spectator, _task) = spawn_spectator(players[1].clone()).await.unwrap();

    host.spin().await.unwrap();
    host.close().await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), spectator.closed())
        .await
        .unwrap();
    assert_eq!(reason, CloseReason::Deleted);
    assert!(store.get_room(&host_ctx.room).await.unwrap().is_none());

    host_task.await.unwrap();
    assert_eq!(
        host.spin().await,
        Err(camspin::error::ShuffleError::SessionEnded)
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_disconnect_is_distinct_from_finished() {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn RoomStore> = memory.clone();
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, players) = room_with_players(store, config, &["A", "B"]).await;

    let (spectator, task) = spawn_spectator(players[0].clone()).await.unwrap();
    memory.disconnect(&host_ctx.room).await;

    let reason = tokio::time::timeout(Duration::from_secs(5), spectator.closed())
        .await
        .unwrap();
    assert_eq!(reason, CloseReason::Disconnected);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_spin_timer_follows_injected_clock() {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, _players) = room_with_players(store.clone(), config, &["A", "B"]).await;

    let clock = ManualClock::new();
    let (host, _task) = spawn_host(host_ctx.with_clock(Arc::new(clock.clone())), StdRng::seed_from_u64(9))
        .await
        .unwrap();
    let mut view = host.view();
    wait_for(&mut view, |v| v.can_spin).await;
    host.spin().await.unwrap();

    // frames keep running, but the held clock never reaches the stop timer
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(view.borrow().phase, RoomPhase::Spinning);
    assert!(!view.borrow().stopping);

    clock.advance(Duration::from_secs(10));
    wait_for(&mut view, |v| v.phase == RoomPhase::Finished).await;
}

#[tokio::test(start_paused = true)]
async fn test_restarted_host_finishes_stored_spin() {
    let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
    let config = Arc::new(EngineConfig::default());
    let (host_ctx, _players) = room_with_players(store.clone(), config, &["A", "B", "C"]).await;

    // a previous host run got as far as publishing Spinning
    store
        .update_room(&host_ctx.room, RoomUpdate::spinning())
        .await
        .unwrap();

    let (host, _task) = spawn_host(host_ctx.clone(), StdRng::seed_from_u64(4))
        .await
        .unwrap();
    let mut view = host.view();
    {
        let current = view.borrow();
        assert_eq!(current.phase, RoomPhase::Spinning);
        assert!(!current.can_spin);
        assert_eq!(current.strip.len(), 3);
    }

    assert_eq!(host.force_stop().await, Ok(true));
    let finished = wait_for(&mut view, |v| v.phase == RoomPhase::Finished).await;
    let winner = finished.winner.expect("finished without a winner");

    let mut room = store.watch_room(&host_ctx.room).await.unwrap();
    let doc = wait_for(&mut room, |doc| {
        doc.as_ref().is_some_and(|d| d.phase == RoomPhase::Finished)
    })
    .await
    .unwrap();
    assert_eq!(doc.winner_id, Some(winner.id));
}
