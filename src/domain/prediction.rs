// Client-side prediction and reconciliation.
//
// The predictor runs the same `movement::step` as the server with the same
// fixed input step, so replaying an unchanged command reproduces the server's
// result bit for bit.

use crate::domain::ecs::EntityId;
use crate::domain::lag_compensation::{Sample, sample_at};
use crate::domain::snapshot::{EntityState, Snapshot};
use crate::domain::sync::{ActionFlags, InputCommand, SyncConfig, sanitize_move};
use crate::domain::systems::movement;
use crate::domain::tuning::ArenaTuning;
use glam::DVec2;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionState {
    Predicted,
    Confirmed,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileOutcome {
    /// Server agreed with the prediction within epsilon.
    Confirmed,
    /// Rolled back to the server state and replayed `replayed` inputs.
    Corrected { error: f64, replayed: usize },
    /// Ack was older than one already reconciled.
    Stale,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictorConfig {
    pub speed: f64,
    pub input_dt: f64,
    pub arena: ArenaTuning,
    /// Position error tolerated before a correction.
    pub epsilon: f64,
    pub max_pending: usize,
}

impl PredictorConfig {
    /// Matches the server's input application settings.
    pub fn from_sync(sync: &SyncConfig) -> Self {
        Self {
            speed: sync.default_speed,
            input_dt: sync.input_dt,
            arena: sync.arena,
            epsilon: 0.01,
            max_pending: 256,
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self::from_sync(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingInput {
    command: InputCommand,
    /// Predicted position after applying `command`.
    predicted: DVec2,
}

pub struct ClientPredictor {
    player_id: u64,
    config: PredictorConfig,
    state: PredictionState,
    position: DVec2,
    velocity: DVec2,
    next_sequence: u64,
    last_acked: u64,
    /// Predicted position right after the last acknowledged input.
    acked_prediction: Option<DVec2>,
    view_timestamp: f64,
    pending: VecDeque<PendingInput>,
}

impl ClientPredictor {
    pub fn new(player_id: u64, start: DVec2, config: PredictorConfig) -> Self {
        Self {
            player_id,
            config,
            state: PredictionState::Confirmed,
            position: start,
            velocity: DVec2::ZERO,
            next_sequence: 1,
            last_acked: 0,
            acked_prediction: None,
            view_timestamp: 0.0,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> PredictionState {
        self.state
    }

    pub fn position(&self) -> DVec2 {
        self.position
    }

    pub fn velocity(&self) -> DVec2 {
        self.velocity
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Speed for inputs predicted from now on. Clients pass
    /// `sync::movement_speed` of their entity whenever its stats or effects change.
    pub fn set_speed(&mut self, speed: f64) {
        self.config.speed = speed;
    }

    /// Remembers the server time of the latest snapshot shown to the player;
    /// echoed in commands for lag compensation.
    pub fn observe_server_time(&mut self, timestamp: f64) {
        if timestamp > self.view_timestamp {
            self.view_timestamp = timestamp;
        }
    }

    /// Applies input locally right away and returns the command to send.
    pub fn apply_local_input(
        &mut self,
        move_vector: DVec2,
        actions: ActionFlags,
        now: f64,
    ) -> InputCommand {
        let command = InputCommand {
            player_id: self.player_id,
            sequence: self.next_sequence,
            timestamp: now,
            view_timestamp: self.view_timestamp,
            move_vector,
            actions,
            target: None,
        };
        self.next_sequence += 1;

        self.advance(&command);
        self.pending.push_back(PendingInput {
            command,
            predicted: self.position,
        });
        if self.pending.len() > self.config.max_pending {
            self.pending.pop_front();
        }
        self.state = PredictionState::Predicted;
        command
    }

    fn advance(&mut self, command: &InputCommand) {
        // Same sanitizing as the server; dropped commands do not move.
        let Some(move_vector) = sanitize_move(command.move_vector) else {
            return;
        };
        let step = movement::step(
            self.position,
            move_vector,
            self.config.speed,
            self.config.input_dt,
            &self.config.arena,
        );
        self.position = step.position;
        self.velocity = step.velocity;
    }

    /// Compares the server's state for our entity, as of
    /// `last_processed_sequence`, against what we predicted for that input.
    pub fn reconcile(
        &mut self,
        server: &EntityState,
        last_processed_sequence: u64,
    ) -> ReconcileOutcome {
        if last_processed_sequence < self.last_acked {
            return ReconcileOutcome::Stale;
        }
        if last_processed_sequence > self.last_acked {
            let mut found = None;
            while let Some(front) = self.pending.front() {
                if front.command.sequence > last_processed_sequence {
                    break;
                }
                if front.command.sequence == last_processed_sequence {
                    found = Some(front.predicted);
                }
                self.pending.pop_front();
            }
            self.acked_prediction = found;
            self.last_acked = last_processed_sequence;
        }

        // Nothing in flight: the prediction for the ack is the current state.
        let predicted = self
            .acked_prediction
            .or_else(|| self.pending.is_empty().then_some(self.position));
        let error = predicted
            .map(|p| p.distance(server.position))
            .unwrap_or(f64::INFINITY);

        if error <= self.config.epsilon {
            trace!(sequence = last_processed_sequence, "prediction confirmed");
            self.state = if self.pending.is_empty() {
                PredictionState::Confirmed
            } else {
                PredictionState::Predicted
            };
            return ReconcileOutcome::Confirmed;
        }

        self.state = PredictionState::Reconciling;
        let before = self.position;
        self.position = server.position;
        self.velocity = server.velocity;
        self.acked_prediction = Some(server.position);
        let replay: Vec<InputCommand> = self.pending.iter().map(|p| p.command).collect();
        for (idx, command) in replay.iter().enumerate() {
            self.advance(command);
            self.pending[idx].predicted = self.position;
        }
        self.state = PredictionState::Predicted;

        let error = if error.is_finite() {
            error
        } else {
            before.distance(self.position)
        };
        debug!(
            sequence = last_processed_sequence,
            error,
            replayed = replay.len(),
            "prediction corrected"
        );
        ReconcileOutcome::Corrected {
            error,
            replayed: replay.len(),
        }
    }
}

/// Renders remote entities slightly in the past, between two received
/// snapshots, so they move smoothly despite jitter.
pub struct RemoteInterpolator {
    delay: f64,
    capacity: usize,
    buffers: BTreeMap<EntityId, VecDeque<(f64, DVec2)>>,
}

impl RemoteInterpolator {
    pub fn new(delay: f64, capacity: usize) -> Self {
        Self {
            delay,
            capacity: capacity.max(2),
            buffers: BTreeMap::new(),
        }
    }

    /// Buffers every entity except `local`, which is predicted instead.
    pub fn push_snapshot(&mut self, snapshot: &Snapshot, local: Option<EntityId>) {
        for state in &snapshot.entities {
            if Some(state.id) == local {
                continue;
            }
            let buffer = self.buffers.entry(state.id).or_default();
            if buffer.back().is_some_and(|&(t, _)| t >= snapshot.timestamp) {
                continue;
            }
            buffer.push_back((snapshot.timestamp, state.position));
            if buffer.len() > self.capacity {
                buffer.pop_front();
            }
        }
        self.buffers
            .retain(|id, _| snapshot.entity(*id).is_some());
    }

    /// Position to draw at client time `now` (in server clock terms).
    pub fn sample(&self, id: EntityId, now: f64) -> Option<DVec2> {
        match sample_at(self.buffers.get(&id)?, now - self.delay) {
            Sample::At(p) | Sample::BeforeOldest(p) | Sample::AfterNewest(p) => Some(p),
            Sample::Empty => None,
        }
    }
}
