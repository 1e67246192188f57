// Authoritative side of state synchronization: ordered input application on
// the way in, acknowledged-baseline deltas on the way out.

use crate::domain::ecs::component::{
    Attack, AttackClaim, Controller, Position, StatusEffects, Velocity,
};
use crate::domain::ecs::{ComponentTag, Entity, EntityId, World};
use crate::domain::lag_compensation::{HitValidation, LagCompensator};
use crate::domain::snapshot::{EntityState, Snapshot};
use crate::domain::stats::Stats;
use crate::domain::systems::movement;
use crate::domain::tuning::{ArenaTuning, PlayerTuning};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bitset of discrete actions carried by one input command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionFlags(pub u8);

impl ActionFlags {
    pub const NONE: ActionFlags = ActionFlags(0);
    pub const ATTACK: ActionFlags = ActionFlags(1);
    pub const FIRE: ActionFlags = ActionFlags(1 << 1);

    pub fn contains(self, other: ActionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ActionFlags {
    type Output = ActionFlags;

    fn bitor(self, rhs: ActionFlags) -> ActionFlags {
        ActionFlags(self.0 | rhs.0)
    }
}

/// One client frame of intent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    pub player_id: u64,
    /// Strictly increasing per client, starting at 1.
    pub sequence: u64,
    /// Client clock; informational only.
    pub timestamp: f64,
    /// Server timestamp of the snapshot the client was looking at.
    #[serde(default)]
    pub view_timestamp: f64,
    pub move_vector: DVec2,
    #[serde(default)]
    pub actions: ActionFlags,
    #[serde(default)]
    pub target: Option<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// At or below the last applied sequence.
    Stale,
    Duplicate,
    /// Accepted after evicting the oldest buffered command.
    BufferFull,
    UnknownPlayer,
}

/// Per-client reorder buffer.
#[derive(Debug, Clone)]
pub struct InputSequencer {
    last_applied: u64,
    buffered: BTreeMap<u64, InputCommand>,
    max_buffered: usize,
}

impl InputSequencer {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            last_applied: 0,
            buffered: BTreeMap::new(),
            max_buffered: max_buffered.max(1),
        }
    }

    pub fn submit(&mut self, command: InputCommand) -> SubmitOutcome {
        if command.sequence <= self.last_applied {
            return SubmitOutcome::Stale;
        }
        if self.buffered.contains_key(&command.sequence) {
            return SubmitOutcome::Duplicate;
        }

        let mut outcome = SubmitOutcome::Accepted;
        if self.buffered.len() >= self.max_buffered {
            if let Some((&oldest, _)) = self.buffered.iter().next() {
                if oldest > command.sequence {
                    // Older than everything kept; dropping it is the eviction.
                    return SubmitOutcome::BufferFull;
                }
                self.buffered.remove(&oldest);
            }
            outcome = SubmitOutcome::BufferFull;
        }
        self.buffered.insert(command.sequence, command);
        outcome
    }

    /// Buffered commands in ascending sequence order. Gaps are not waited for.
    pub fn drain_ready(&mut self) -> Vec<InputCommand> {
        let ready: Vec<InputCommand> = std::mem::take(&mut self.buffered).into_values().collect();
        if let Some(last) = ready.last() {
            self.last_applied = last.sequence;
        }
        ready
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Fixed step applied per input command; must match the client predictor.
    pub input_dt: f64,
    pub max_buffered: usize,
    pub arena: ArenaTuning,
    /// Fallback speed for controlled entities without stats.
    pub default_speed: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            input_dt: 1.0 / 60.0,
            max_buffered: 64,
            arena: ArenaTuning::default(),
            default_speed: PlayerTuning::default().base_stats().move_speed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub dropped: usize,
}

struct ClientSlot {
    entity: EntityId,
    sequencer: InputSequencer,
}

/// Routes client commands into the authoritative world, one client at a time
/// in player-id order.
pub struct NetworkSynchronizer {
    config: SyncConfig,
    clients: BTreeMap<u64, ClientSlot>,
}

impl NetworkSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            clients: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn register_client(&mut self, player_id: u64, entity: EntityId) {
        self.clients.insert(
            player_id,
            ClientSlot {
                entity,
                sequencer: InputSequencer::new(self.config.max_buffered),
            },
        );
    }

    pub fn unregister(&mut self, player_id: u64) -> Option<EntityId> {
        self.clients.remove(&player_id).map(|slot| slot.entity)
    }

    pub fn entity_for(&self, player_id: u64) -> Option<EntityId> {
        self.clients.get(&player_id).map(|slot| slot.entity)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Player id to controlled entity, in player-id order.
    pub fn bindings(&self) -> BTreeMap<u64, EntityId> {
        self.clients
            .iter()
            .map(|(&player, slot)| (player, slot.entity))
            .collect()
    }

    pub fn submit(&mut self, command: InputCommand) -> SubmitOutcome {
        match self.clients.get_mut(&command.player_id) {
            Some(slot) => slot.sequencer.submit(command),
            None => SubmitOutcome::UnknownPlayer,
        }
    }

    /// Last sequence applied for a player; sent back to the client as its ack.
    pub fn last_processed(&self, player_id: u64) -> Option<u64> {
        self.clients
            .get(&player_id)
            .map(|slot| slot.sequencer.last_applied())
    }

    pub fn acks(&self) -> BTreeMap<u64, u64> {
        self.clients
            .iter()
            .map(|(&player, slot)| (player, slot.sequencer.last_applied()))
            .collect()
    }

    /// Applies every buffered command. Called once per tick before
    /// `World::update`, never concurrently with it.
    pub fn apply_pending(
        &mut self,
        world: &mut World,
        compensator: &LagCompensator,
        now: f64,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let config = self.config;

        for (player_id, slot) in self.clients.iter_mut() {
            for command in slot.sequencer.drain_ready() {
                if apply_command(world, compensator, &config, slot.entity, &command, now) {
                    report.applied += 1;
                } else {
                    debug!(
                        player_id,
                        sequence = command.sequence,
                        "input command dropped"
                    );
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

/// Speed an input command moves `entity` at: effective stats, slowed by
/// status effects. Clients feed the same value to their predictor.
pub fn movement_speed(entity: &Entity, fallback: f64) -> f64 {
    let base = entity
        .get::<Stats>()
        .map(|s| s.effective().move_speed)
        .unwrap_or(fallback);
    let slow = entity
        .get::<StatusEffects>()
        .map(StatusEffects::speed_multiplier)
        .unwrap_or(1.0);
    base * slow
}

/// Drops non-finite move vectors and clamps the rest to unit length.
pub fn sanitize_move(move_vector: DVec2) -> Option<DVec2> {
    move_vector
        .is_finite()
        .then(|| move_vector.clamp_length_max(1.0))
}

fn apply_command(
    world: &mut World,
    compensator: &LagCompensator,
    config: &SyncConfig,
    entity_id: EntityId,
    command: &InputCommand,
    now: f64,
) -> bool {
    let Some(move_vector) = sanitize_move(command.move_vector) else {
        warn!(
            player_id = command.player_id,
            sequence = command.sequence,
            "non-finite move vector"
        );
        return false;
    };

    // Target lookups need the world before the attacker is borrowed mutably.
    let claim = if command.actions.contains(ActionFlags::ATTACK) {
        command
            .target
            .and_then(|target| rewind_claim(world, compensator, entity_id, target, command, now))
    } else {
        None
    };

    let Some(entity) = world.entity_mut(entity_id) else {
        return false;
    };
    if entity.is_dead() || !entity.has(ComponentTag::Controller) {
        return false;
    }
    let Some(position) = entity.get::<Position>().map(|p| p.0) else {
        return false;
    };

    let speed = movement_speed(entity, config.default_speed);
    let step = movement::step(position, move_vector, speed, config.input_dt, &config.arena);

    entity.insert(Position(step.position));
    entity.insert(Velocity(step.velocity));

    let Some(controller) = entity.get_mut::<Controller>() else {
        return false;
    };
    controller.last_sequence = command.sequence;
    controller.move_vector = move_vector;
    controller.actions = command.actions;
    if move_vector.length_squared() > 0.0 {
        controller.facing = move_vector.normalize();
    }
    if claim.is_some() {
        controller.pending_attack = claim;
    }
    if command.actions.contains(ActionFlags::FIRE) {
        controller.fire_requested = true;
    }
    true
}

fn rewind_claim(
    world: &World,
    compensator: &LagCompensator,
    attacker: EntityId,
    target: EntityId,
    command: &InputCommand,
    now: f64,
) -> Option<AttackClaim> {
    let shooter = world.entity(attacker)?;
    let from = shooter.get::<Position>()?.0;
    let range = shooter.get::<Attack>()?.range;
    let live = world
        .entity(target)
        .and_then(|e| e.get::<Position>())
        .map(|p| p.0);

    match compensator.validate_hit(from, target, command.view_timestamp, now, range, live) {
        HitValidation::Confirmed { position } => Some(AttackClaim {
            target,
            target_position: position,
        }),
        HitValidation::OutOfRange { position, distance } => {
            // Still forwarded so combat reports the miss to the client.
            debug!(%attacker, %target, distance, "rewound target out of range");
            Some(AttackClaim {
                target,
                target_position: position,
            })
        }
        HitValidation::NotInWindow => {
            debug!(%attacker, %target, view = command.view_timestamp, "hit claim outside lag window");
            None
        }
    }
}

/// Entity changes since an acknowledged baseline. `baseline_tick == None`
/// means `changed` is the full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: u64,
    pub timestamp: f64,
    pub baseline_tick: Option<u64>,
    pub changed: Vec<EntityState>,
    pub removed: Vec<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaError {
    MissingBaseline { expected: u64 },
    BaselineMismatch { expected: u64, got: u64 },
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaError::MissingBaseline { expected } => {
                write!(f, "delta needs baseline tick {expected}")
            }
            DeltaError::BaselineMismatch { expected, got } => {
                write!(f, "delta baseline is tick {expected}, got tick {got}")
            }
        }
    }
}

impl std::error::Error for DeltaError {}

impl StateDelta {
    pub fn is_full(&self) -> bool {
        self.baseline_tick.is_none()
    }

    /// Rebuilds the full snapshot on the receiving side.
    pub fn apply_to(&self, baseline: Option<&Snapshot>) -> Result<Snapshot, DeltaError> {
        let mut entities: BTreeMap<EntityId, EntityState> = BTreeMap::new();
        if let Some(expected) = self.baseline_tick {
            let base = baseline.ok_or(DeltaError::MissingBaseline { expected })?;
            if base.tick != expected {
                return Err(DeltaError::BaselineMismatch {
                    expected,
                    got: base.tick,
                });
            }
            entities.extend(base.entities.iter().map(|e| (e.id, *e)));
            for id in &self.removed {
                entities.remove(id);
            }
        }
        entities.extend(self.changed.iter().map(|e| (e.id, *e)));

        Ok(Snapshot {
            tick: self.tick,
            timestamp: self.timestamp,
            entities: entities.into_values().collect(),
        })
    }
}

/// Per-connection delta state: what was sent and what the client confirmed.
pub struct DeltaEncoder {
    sent: BTreeMap<u64, Arc<Snapshot>>,
    baseline: Option<u64>,
    history: usize,
}

impl DeltaEncoder {
    pub fn new(history: usize) -> Self {
        Self {
            sent: BTreeMap::new(),
            baseline: None,
            history: history.max(1),
        }
    }

    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    /// Marks `tick` as received by the client. Unknown or older ticks are
    /// ignored.
    pub fn acknowledge(&mut self, tick: u64) -> bool {
        if !self.sent.contains_key(&tick) || self.baseline.is_some_and(|b| tick <= b) {
            return false;
        }
        self.baseline = Some(tick);
        self.sent = self.sent.split_off(&tick);
        true
    }

    /// Forgets the baseline; the next encode sends full state.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.sent.clear();
    }

    pub fn encode(&mut self, current: &Arc<Snapshot>) -> StateDelta {
        let base = self.baseline.and_then(|tick| self.sent.get(&tick));

        let delta = match base {
            Some(base) => {
                let current_ids: BTreeSet<EntityId> =
                    current.entities.iter().map(|e| e.id).collect();
                StateDelta {
                    tick: current.tick,
                    timestamp: current.timestamp,
                    baseline_tick: Some(base.tick),
                    changed: current
                        .entities
                        .iter()
                        .filter(|e| base.entity(e.id) != Some(*e))
                        .copied()
                        .collect(),
                    removed: base
                        .entities
                        .iter()
                        .map(|e| e.id)
                        .filter(|id| !current_ids.contains(id))
                        .collect(),
                }
            }
            None => StateDelta {
                tick: current.tick,
                timestamp: current.timestamp,
                baseline_tick: None,
                changed: current.entities.clone(),
                removed: Vec::new(),
            },
        };

        self.sent.insert(current.tick, current.clone());
        while self.sent.len() > self.history {
            let Some((&oldest, _)) = self.sent.iter().next() else {
                break;
            };
            self.sent.remove(&oldest);
            if self.baseline == Some(oldest) {
                self.baseline = None;
            }
        }
        delta
    }
}
