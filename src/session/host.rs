//! Host side of a room: owns the authoritative spin and publishes phase.
//!
//! [`HostController`] is synchronous and clock-free so it can be stepped tick
//! by tick in tests. [`spawn_host`] wraps it in a single task that owns the
//! frame scheduler, the store subscriptions and the publication queue.

use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::SessionContext;
use crate::config::EngineConfig;
use crate::engine::{Command, Frame, Landed, Renderer, StopPolicy, WinnerSelector};
use crate::error::{ShuffleError, StoreError, StoreResult};
use crate::room::{RoomMachine, MIN_PLAYERS};
use crate::roster::{Participant, Roster};
use crate::scheduler::{Clock, FrameScheduler, Timer};
use crate::store::RoomStore;
use crate::types::{PlayerRecord, RoomCode, RoomDoc, RoomPhase, RoomUpdate};

/// A queued write of the room's phase/outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub seq: u64,
    pub update: RoomUpdate,
}

#[derive(Debug)]
pub struct PublishOutcome {
    pub seq: u64,
    pub result: StoreResult<()>,
}

/// Things the host UI may want to react to besides the per-frame view
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Landed { winner: Participant },
    /// The `Spinning` write failed; local state went back to the last
    /// confirmed document
    SpinAborted { error: StoreError },
    Closed,
}

/// Snapshot of everything the host screen draws
#[derive(Debug, Clone, PartialEq)]
pub struct HostView {
    pub phase: RoomPhase,
    pub winner: Option<Participant>,
    pub roster: Vec<Participant>,
    /// Participants the strip is laid out from (the frozen pool during a spin)
    pub strip: Vec<Participant>,
    pub frame: Frame,
    pub can_spin: bool,
    pub stopping: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSpin {
    /// Set once winner selection has happened for this spin
    stopping: bool,
    /// Sequence number of this spin's `Spinning` publication
    seq: u64,
}

pub struct HostController<R> {
    roster: Roster,
    /// Optimistic local phase, ahead of the store while writes are in flight
    machine: RoomMachine,
    /// Last outcome the store acknowledged or delivered
    confirmed: RoomUpdate,
    renderer: Renderer,
    selector: WinnerSelector<R>,
    retry_delay: Duration,
    stop_timer: Timer,
    retry_timer: Timer,
    spin: Option<ActiveSpin>,
    /// Selection pool, frozen for the duration of a spin only
    pool: Vec<Participant>,
    /// Winner of the last local landing, kept for display after they leave
    landed: Option<Participant>,
    outbox: Vec<Publication>,
    in_flight: HashMap<u64, RoomUpdate>,
    pending_retry: Option<RoomUpdate>,
    next_seq: u64,
    closed: bool,
}

impl<R: Rng> HostController<R> {
    pub fn new(config: &EngineConfig, rng: R) -> Self {
        Self {
            roster: Roster::new(),
            machine: RoomMachine::new(),
            confirmed: RoomUpdate::waiting(),
            renderer: Renderer::new(config.physics.clone(), config.strip.clone()),
            selector: WinnerSelector::new(rng, config.strip.clone(), config.timing.clone()),
            retry_delay: config.timing.publish_retry_delay,
            stop_timer: Timer::new(),
            retry_timer: Timer::new(),
            spin: None,
            pool: Vec::new(),
            landed: None,
            outbox: Vec::new(),
            in_flight: HashMap::new(),
            pending_retry: None,
            next_seq: 1,
            closed: false,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        self.machine.phase()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn pool(&self) -> &[Participant] {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_stopping(&self) -> bool {
        self.spin.is_some_and(|s| s.stopping)
    }

    /// Start a shuffle. Rejected requests leave every piece of state untouched.
    pub fn request_spin(&mut self, now: Duration) -> Result<(), ShuffleError> {
        if self.closed {
            return Err(ShuffleError::RoomClosed);
        }
        let update = self.machine.begin_spin(self.roster.len())?;

        self.pool = self.roster.snapshot();
        self.landed = None;
        self.stop_timer.cancel();
        self.retry_timer.cancel();
        self.pending_retry = None;

        let duration = self.selector.spin_duration();
        self.stop_timer.arm(now + duration);
        self.renderer.send(Command::Spin);

        let seq = self.publish(update);
        self.spin = Some(ActiveSpin {
            stopping: false,
            seq,
        });
        tracing::info!(
            "Spin started with {} participants, natural stop in {:?}",
            self.pool.len(),
            duration
        );
        Ok(())
    }

    /// Stop the running spin now.
    ///
    /// Returns `Ok(false)` when selection already happened for this spin, so a
    /// repeated stop never selects a second winner.
    pub fn force_stop(&mut self) -> Result<bool, ShuffleError> {
        if self.closed {
            return Err(ShuffleError::RoomClosed);
        }
        match self.spin {
            None => Err(ShuffleError::NotSpinning),
            Some(spin) if spin.stopping => Ok(false),
            Some(_) => {
                tracing::info!("Host forced an early stop");
                self.begin_stop(StopPolicy::Forced)?;
                self.stop_timer.cancel();
                Ok(true)
            }
        }
    }

    /// Advance one frame: fire due timers, step physics, settle a landing
    pub fn tick(&mut self, now: Duration) -> Option<HostEvent> {
        if self.closed {
            return None;
        }

        if self.stop_timer.fire(now) && self.spin.is_some_and(|s| !s.stopping) {
            tracing::info!("Spin timer expired");
            if let Err(e) = self.begin_stop(StopPolicy::Natural) {
                tracing::error!("Natural stop failed, retrying in {:?}: {}", self.retry_delay, e);
                self.stop_timer.arm(now + self.retry_delay);
            }
        }

        if self.retry_timer.fire(now) {
            if let Some(update) = self.pending_retry.take() {
                tracing::info!("Retrying {} publication", update.phase);
                self.publish(update);
            }
        }

        match self.renderer.tick() {
            Some(landed) => self.settle(landed),
            None => None,
        }
    }

    /// Mirror a fresh player collection snapshot
    pub fn on_players(&mut self, records: &[PlayerRecord]) {
        self.roster.sync(records);
    }

    /// Handle a room document from the subscription. `None` means the room
    /// was deleted.
    ///
    /// A stored `Spinning` phase with no local spin (a host reattaching to its
    /// room) starts one from the current roster, so the timer or an early
    /// stop can still finish it.
    pub fn on_room(&mut self, doc: Option<RoomDoc>, now: Duration) -> Option<HostEvent> {
        if self.closed {
            return None;
        }
        let Some(doc) = doc else {
            tracing::warn!("Room document disappeared");
            self.close();
            return Some(HostEvent::Closed);
        };

        let outcome = doc.outcome();
        let settled =
            self.in_flight.is_empty() && self.pending_retry.is_none() && self.spin.is_none();
        if settled && outcome != self.machine.current() {
            tracing::warn!(
                "Adopting stored {} over local {}",
                outcome.phase,
                self.machine.phase()
            );
            self.machine.restore(&outcome);
        }
        self.confirmed = outcome;
        if settled && self.machine.phase() == RoomPhase::Spinning {
            self.resume_spin(now);
        }
        None
    }

    /// The store subscription itself went away
    pub fn on_disconnect(&mut self) -> Option<HostEvent> {
        if self.closed {
            return None;
        }
        tracing::warn!("Store connection lost");
        self.close();
        Some(HostEvent::Closed)
    }

    /// Feed back the result of a queued publication
    pub fn on_publish_result(
        &mut self,
        seq: u64,
        result: StoreResult<()>,
        now: Duration,
    ) -> Option<HostEvent> {
        let update = self.in_flight.remove(&seq)?;
        let error = match result {
            Ok(()) => {
                tracing::debug!("Published {} (#{})", update.phase, seq);
                self.confirmed = update;
                return None;
            }
            Err(e) => e,
        };

        tracing::error!("Publishing {} (#{}) failed: {}", update.phase, seq, error);
        if self.closed {
            return None;
        }

        match update.phase {
            RoomPhase::Spinning if self.spin.is_some_and(|s| s.seq == seq) => {
                self.abort_spin();
                Some(HostEvent::SpinAborted { error })
            }
            RoomPhase::Finished if self.spin.is_none() && self.machine.current() == update => {
                // Same winner again; never re-roll
                self.pending_retry = Some(update);
                self.retry_timer.arm(now + self.retry_delay);
                None
            }
            _ => None,
        }
    }

    pub fn resize(&mut self, viewport_width: f64) {
        self.renderer.set_viewport_width(viewport_width);
    }

    /// Stop everything locally. Deleting the room is the caller's job.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_timer.cancel();
        self.retry_timer.cancel();
        self.pending_retry = None;
        self.spin = None;
        self.pool.clear();
        self.renderer.send(Command::Idle);
        tracing::info!("Host controller closed");
    }

    /// Drain publications queued since the last call, oldest first
    pub fn take_outbox(&mut self) -> Vec<Publication> {
        std::mem::take(&mut self.outbox)
    }

    pub fn frame(&self) -> Frame {
        self.renderer.frame(self.strip().len())
    }

    pub fn winner(&self) -> Option<Participant> {
        let id = self.machine.winner_id()?;
        self.roster
            .find(id)
            .or_else(|| self.landed.as_ref().filter(|p| &p.id == id))
            .or_else(|| self.pool.iter().find(|p| &p.id == id))
            .cloned()
    }

    pub fn view(&self) -> HostView {
        HostView {
            phase: self.machine.phase(),
            winner: self.winner(),
            roster: self.roster.participants().to_vec(),
            strip: self.strip().to_vec(),
            frame: self.frame(),
            can_spin: !self.closed
                && self.machine.phase() != RoomPhase::Spinning
                && self.roster.len() >= MIN_PLAYERS,
            stopping: self.is_stopping(),
            closed: self.closed,
        }
    }

    fn strip(&self) -> &[Participant] {
        if self.pool.is_empty() {
            self.roster.participants()
        } else {
            &self.pool
        }
    }

    fn begin_stop(&mut self, policy: StopPolicy) -> Result<(), ShuffleError> {
        let Some(spin) = self.spin else {
            return Err(ShuffleError::NotSpinning);
        };
        if spin.stopping {
            return Ok(());
        }
        // A resumed spin may have started before enough players were back
        if self.pool.len() < MIN_PLAYERS {
            self.pool = self.roster.snapshot();
        }

        let current = self.renderer.engine().offset();
        let selection = self
            .selector
            .select_winner(self.pool.len(), current, policy)?;
        if let Some(spin) = self.spin.as_mut() {
            spin.stopping = true;
        }
        self.renderer.send(Command::DecelerateTo {
            target: selection.target_offset,
            winner_index: selection.winner_index,
        });
        Ok(())
    }

    fn settle(&mut self, landed: Landed) -> Option<HostEvent> {
        self.spin.take()?;
        let pool = std::mem::take(&mut self.pool);
        let winner = pool.get(landed.winner_index)?.clone();

        match self.machine.finish(winner.id.clone()) {
            Ok(update) => {
                tracing::info!("Landed on {} ({})", winner.name, winner.id);
                self.landed = Some(winner.clone());
                self.publish(update);
                Some(HostEvent::Landed { winner })
            }
            Err(e) => {
                tracing::error!("Could not finish spin: {}", e);
                None
            }
        }
    }

    fn abort_spin(&mut self) {
        tracing::warn!("Aborting spin, restoring {}", self.confirmed.phase);
        self.spin = None;
        self.pool.clear();
        self.stop_timer.cancel();
        self.renderer.send(Command::Idle);
        self.machine.restore(&self.confirmed);
    }

    fn resume_spin(&mut self, now: Duration) {
        self.pool = self.roster.snapshot();
        self.landed = None;
        let duration = self.selector.spin_duration();
        self.stop_timer.arm(now + duration);
        self.renderer.send(Command::Spin);
        // Nothing was published for this spin, so no outcome can match seq 0
        self.spin = Some(ActiveSpin {
            stopping: false,
            seq: 0,
        });
        tracing::warn!(
            "Resuming a stored spin with {} participants, natural stop in {:?}",
            self.pool.len(),
            duration
        );
    }

    fn publish(&mut self, update: RoomUpdate) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!("Queueing {} publication (#{})", update.phase, seq);
        self.in_flight.insert(seq, update.clone());
        self.outbox.push(Publication { seq, update });
        seq
    }
}

pub enum HostCommand {
    Spin(oneshot::Sender<Result<(), ShuffleError>>),
    ForceStop(oneshot::Sender<Result<bool, ShuffleError>>),
    Resize(f64),
    Close(oneshot::Sender<Result<(), ShuffleError>>),
}

/// Cheap handle for talking to a running host task
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
    view: watch::Receiver<HostView>,
    events: broadcast::Sender<HostEvent>,
}

impl HostHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ShuffleError>>) -> HostCommand,
    ) -> Result<T, ShuffleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ShuffleError::SessionEnded)?;
        rx.await.map_err(|_| ShuffleError::SessionEnded)?
    }

    pub async fn spin(&self) -> Result<(), ShuffleError> {
        self.request(HostCommand::Spin).await
    }

    pub async fn force_stop(&self) -> Result<bool, ShuffleError> {
        self.request(HostCommand::ForceStop).await
    }

    /// Delete the room and end the host task
    pub async fn close(&self) -> Result<(), ShuffleError> {
        self.request(HostCommand::Close).await
    }

    pub async fn resize(&self, viewport_width: f64) -> Result<(), ShuffleError> {
        self.commands
            .send(HostCommand::Resize(viewport_width))
            .await
            .map_err(|_| ShuffleError::SessionEnded)
    }

    pub fn view(&self) -> watch::Receiver<HostView> {
        self.view.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

/// Writes publications one at a time so the store sees them in queue order
fn spawn_publisher(
    store: std::sync::Arc<dyn RoomStore>,
    room: RoomCode,
) -> (
    mpsc::UnboundedSender<Publication>,
    mpsc::UnboundedReceiver<PublishOutcome>,
) {
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Publication>();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(job) = job_rx.recv().await {
            let result = store.update_room(&room, job.update).await;
            if out_tx
                .send(PublishOutcome {
                    seq: job.seq,
                    result,
                })
                .is_err()
            {
                break;
            }
        }
        tracing::debug!("Publisher for room {} stopped", room);
    });

    (job_tx, out_rx)
}

/// Start the host loop for the room in `ctx`.
///
/// Fails if the room document does not exist.
pub async fn spawn_host<R>(
    ctx: SessionContext,
    rng: R,
) -> Result<(HostHandle, JoinHandle<()>), ShuffleError>
where
    R: Rng + Send + 'static,
{
    let mut room_rx = ctx.store.watch_room(&ctx.room).await?;
    let mut players_rx = ctx.store.watch_players(&ctx.room).await?;

    let clock = ctx.clock.clone();
    let mut controller = HostController::new(&ctx.config, rng);
    let initial = room_rx.borrow_and_update().clone();
    if initial.is_none() {
        return Err(StoreError::RoomNotFound(ctx.room.clone()).into());
    }
    // Roster first, so a stored spin resumes with everyone in the pool
    let records = players_rx.borrow_and_update().clone();
    controller.on_players(&records);
    controller.on_room(initial, clock.now());

    let (command_tx, mut commands) = mpsc::channel(32);
    let (view_tx, view_rx) = watch::channel(controller.view());
    let (events_tx, _) = broadcast::channel(16);
    let handle = HostHandle {
        commands: command_tx,
        view: view_rx,
        events: events_tx.clone(),
    };

    let task = tokio::spawn(async move {
        let (publish_tx, mut outcomes) = spawn_publisher(ctx.store.clone(), ctx.room.clone());
        let mut frames = FrameScheduler::new(ctx.config.timing.frame_interval);
        frames.start();
        let mut players_open = true;

        tracing::info!("Host loop started for room {}", ctx.room);

        loop {
            let mut event = None;
            let mut closing = false;

            tokio::select! {
                _ = frames.next_frame() => {
                    event = controller.tick(clock.now());
                }

                cmd = commands.recv() => match cmd {
                    Some(HostCommand::Spin(reply)) => {
                        let result = controller.request_spin(clock.now());
                        if let Err(e) = &result {
                            tracing::info!("Spin request rejected: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(HostCommand::ForceStop(reply)) => {
                        let _ = reply.send(controller.force_stop());
                    }
                    Some(HostCommand::Resize(width)) => controller.resize(width),
                    Some(HostCommand::Close(reply)) => {
                        controller.close();
                        let _ = reply.send(ctx.close_room().await);
                        event = Some(HostEvent::Closed);
                        closing = true;
                    }
                    None => {
                        tracing::info!("All host handles dropped");
                        closing = true;
                    }
                },

                changed = room_rx.changed() => {
                    event = match changed {
                        Ok(()) => {
                            let doc = room_rx.borrow_and_update().clone();
                            controller.on_room(doc, clock.now())
                        }
                        Err(_) => controller.on_disconnect(),
                    };
                }

                changed = players_rx.changed(), if players_open => {
                    match changed {
                        Ok(()) => {
                            let records = players_rx.borrow_and_update().clone();
                            controller.on_players(&records);
                        }
                        Err(_) => players_open = false,
                    }
                }

                Some(outcome) = outcomes.recv() => {
                    event = controller.on_publish_result(outcome.seq, outcome.result, clock.now());
                }
            }

            for publication in controller.take_outbox() {
                let seq = publication.seq;
                if publish_tx.send(publication).is_err() {
                    tracing::error!("Publisher is gone, dropping #{}", seq);
                    if let Some(e) =
                        controller.on_publish_result(seq, Err(StoreError::Disconnected), clock.now())
                    {
                        let _ = events_tx.send(e);
                    }
                }
            }

            if let Some(e) = event {
                tracing::debug!("Host event: {:?}", e);
                let _ = events_tx.send(e);
            }
            view_tx.send_replace(controller.view());

            if closing || controller.is_closed() {
                break;
            }
        }

        frames.stop();
        if controller.is_closed() {
            ctx.forget().await;
        }
        tracing::info!("Host loop for room {} ended", ctx.room);
    });

    Ok((handle, task))
}
