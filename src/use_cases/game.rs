use super::types::{GameEvent, ServerState, WorldUpdate};
use super::view::WorldView;
use crate::domain::content::{ContentGenerator, GenerationParams, SeededArenaGenerator};
use crate::domain::lag_compensation::{LagCompensator, MissPolicy};
use crate::domain::persistence::SaveGame;
use crate::domain::snapshot::SnapshotRecorder;
use crate::domain::sync::{NetworkSynchronizer, SubmitOutcome, SyncConfig};
use crate::domain::systems::register_default_systems;
use crate::domain::tuning::GameTuning;
use crate::domain::{EntityId, SimEvent, World, WorldConfig};
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Per-world settings handed to the world task.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub tick_interval: Duration,
    /// Zero disables the time limit.
    pub match_time_limit: Duration,
    pub countdown_seconds: u32,
    pub seed: i64,
    pub params: GenerationParams,
    pub tuning: GameTuning,
    pub snapshot_history: usize,
    /// Record (and broadcast) every Nth tick.
    pub snapshot_every: u64,
    pub lag_window: f64,
    pub miss_policy: MissPolicy,
    pub max_buffered_inputs: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000 / 60),
            match_time_limit: Duration::from_secs(600),
            countdown_seconds: 3,
            seed: 42,
            params: GenerationParams::default(),
            tuning: GameTuning::default(),
            snapshot_history: 120,
            snapshot_every: 1,
            lag_window: crate::domain::lag_compensation::DEFAULT_WINDOW_SECONDS,
            miss_policy: MissPolicy::default(),
            max_buffered_inputs: 64,
        }
    }
}

/// Everything the authoritative loop owns. Single-threaded; `world_task`
/// drives it from one tokio task.
pub struct GameSession {
    world: World,
    sync: NetworkSynchronizer,
    recorder: SnapshotRecorder,
    compensator: LagCompensator,
    generator: Arc<dyn ContentGenerator>,
    seed: i64,
    params: GenerationParams,
    tuning: GameTuning,
    spawn_rng: ChaCha8Rng,
    tick_seconds: f64,
    pending_events: Vec<SimEvent>,
}

impl GameSession {
    pub fn new(config: &GameConfig, generator: Arc<dyn ContentGenerator>) -> Self {
        let mut world = World::new(WorldConfig {
            seed: config.seed as u64,
        });
        generator
            .generate(config.seed, &config.params)
            .spawn_into(&mut world);
        world.update(0.0);
        Self::with_world(world, config.seed, config.params.clone(), config, generator)
    }

    /// Rebuilds the world from a save; seed and params come from the save.
    pub fn restore(
        save: &SaveGame,
        config: &GameConfig,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let world = save.restore(generator.as_ref());
        Self::with_world(world, save.seed, save.params.clone(), config, generator)
    }

    fn with_world(
        mut world: World,
        seed: i64,
        params: GenerationParams,
        config: &GameConfig,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        register_default_systems(&mut world, &config.tuning);
        let tick_seconds = config.tick_interval.as_secs_f64();
        Self {
            world,
            sync: NetworkSynchronizer::new(SyncConfig {
                input_dt: tick_seconds,
                max_buffered: config.max_buffered_inputs,
                arena: config.tuning.arena,
                default_speed: config.tuning.player.max_speed,
            }),
            recorder: SnapshotRecorder::new(config.snapshot_history, config.snapshot_every),
            compensator: LagCompensator::new(config.lag_window, config.miss_policy),
            generator,
            seed,
            params,
            tuning: config.tuning,
            spawn_rng: ChaCha8Rng::seed_from_u64((seed as u64).rotate_left(17)),
            tick_seconds,
            pending_events: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn synchronizer(&self) -> &NetworkSynchronizer {
        &self.sync
    }

    pub fn recorder(&self) -> &SnapshotRecorder {
        &self.recorder
    }

    pub fn handle_event(&mut self, event: GameEvent) {
        match event {
            GameEvent::Join { player_id, reply } => {
                let entity = self.join(player_id);
                // The socket may already be gone; Leave cleans up.
                let _ = reply.send(entity);
            }
            GameEvent::Leave { player_id } => self.leave(player_id),
            GameEvent::Input { command } => {
                let outcome = self.sync.submit(command);
                if outcome != SubmitOutcome::Accepted {
                    debug!(
                        player_id = command.player_id,
                        sequence = command.sequence,
                        ?outcome,
                        "input not buffered"
                    );
                }
            }
            GameEvent::Save { reply } => {
                let _ = reply.send(self.save());
            }
        }
    }

    /// Spawns a controlled entity for the player. One live connection per
    /// player is enforced by `LobbyHandle::claim_player`, and disconnecting
    /// sends `Leave`, so every join starts from a fresh entity.
    pub fn join(&mut self, player_id: u64) -> EntityId {
        let arena = self.tuning.arena;
        let position = DVec2::new(
            self.spawn_rng.gen_range(arena.min.x..=arena.max.x),
            self.spawn_rng.gen_range(arena.min.y..=arena.max.y),
        );
        let entity = self
            .world
            .spawn(self.tuning.player.bundle(player_id, position));
        self.sync.register_client(player_id, entity);
        info!(player_id, %entity, "player joined");
        entity
    }

    pub fn leave(&mut self, player_id: u64) {
        let Some(entity) = self.sync.unregister(player_id) else {
            return;
        };
        if let Err(err) = self.world.remove_entity(entity) {
            // Already queued for removal.
            debug!(player_id, %entity, error = %err, "player entity already gone");
        }
        info!(player_id, "player left");
    }

    pub fn save(&self) -> SaveGame {
        SaveGame::capture(&self.world, self.seed, &self.params, self.generator.as_ref())
    }

    /// Advances one tick. `now` is the server clock in seconds. Returns an
    /// update when the tick was recorded.
    pub fn step(&mut self, now: f64) -> Option<WorldUpdate> {
        let report = self.sync.apply_pending(&mut self.world, &self.compensator, now);
        if report.dropped > 0 {
            debug!(
                applied = report.applied,
                dropped = report.dropped,
                "inputs dropped this tick"
            );
        }

        self.world.update(self.tick_seconds);
        for event in self.world.drain_events() {
            if let SimEvent::Death { entity, killer, .. } = &event {
                info!(%entity, killer = ?killer, "entity died");
            }
            self.pending_events.push(event);
        }

        let snapshot = self.recorder.record(&self.world, now)?;
        self.compensator.record_snapshot(&snapshot);

        Some(WorldUpdate {
            snapshot,
            events: std::mem::take(&mut self.pending_events).into(),
            acks: Arc::new(self.sync.acks()),
        })
    }
}

/// Channels and shared state wired into one world task.
pub struct WorldChannels {
    pub input_rx: mpsc::Receiver<GameEvent>,
    pub world_tx: broadcast::Sender<WorldUpdate>,
    pub server_state_tx: watch::Sender<ServerState>,
    pub view: Arc<WorldView>,
    pub shutdown: Arc<Notify>,
}

fn set_state(view: &WorldView, server_state_tx: &watch::Sender<ServerState>, state: ServerState) {
    view.set_server_state(state.clone());
    let _ = server_state_tx.send(state);
}

pub async fn world_task(config: GameConfig, mut session: GameSession, channels: WorldChannels) {
    let WorldChannels {
        mut input_rx,
        world_tx,
        server_state_tx,
        view,
        shutdown,
    } = channels;
    let started = Instant::now();

    if config.countdown_seconds > 0 {
        set_state(
            &view,
            &server_state_tx,
            ServerState::MatchStarting {
                in_seconds: config.countdown_seconds,
            },
        );
        // Joins queue up in the input channel meanwhile.
        let countdown = Duration::from_secs(u64::from(config.countdown_seconds));
        tokio::select! {
            _ = shutdown.notified() => return,
            _ = tokio::time::sleep(countdown) => {}
        }
    }
    set_state(&view, &server_state_tx, ServerState::MatchRunning);

    // Deadline-based ticks; a late tick is skipped rather than bursted.
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut match_elapsed = Duration::ZERO;
    let mut match_ended = false;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("world task shutting down");
                break;
            }
            _ = interval.tick() => {}
        }

        let tick_started = Instant::now();

        while let Ok(event) = input_rx.try_recv() {
            session.handle_event(event);
        }

        let now = started.elapsed().as_secs_f64();
        if let Some(update) = session.step(now) {
            view.publish(update.snapshot.clone(), session.synchronizer().bindings());
            // No subscribers is fine.
            let _ = world_tx.send(update);
        }

        if !match_ended && !config.match_time_limit.is_zero() {
            match_elapsed += config.tick_interval;
            if match_elapsed >= config.match_time_limit {
                info!(tick = session.world().tick(), "match time limit reached");
                set_state(&view, &server_state_tx, ServerState::MatchEnded);
                match_ended = true;
            }
        }

        let took = tick_started.elapsed();
        if took > config.tick_interval {
            warn!(
                tick = session.world().tick(),
                took_ms = took.as_secs_f64() * 1000.0,
                budget_ms = config.tick_interval.as_secs_f64() * 1000.0,
                "tick overran its budget"
            );
        }
    }
}

/// Session for a fresh or restored world using the reference generator.
pub fn build_session(config: &GameConfig, restore: Option<&SaveGame>) -> GameSession {
    let generator: Arc<dyn ContentGenerator> = Arc::new(SeededArenaGenerator);
    match restore {
        Some(save) => GameSession::restore(save, config, generator),
        None => GameSession::new(config, generator),
    }
}
