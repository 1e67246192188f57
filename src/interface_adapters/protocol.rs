// Wire protocol DTOs and conversions for public game server messages.
// Internal service-to-service DTOs should live outside this module.

use crate::domain::sync::StateDelta;
use crate::domain::{ActionFlags, EntityId, EntityState, InputCommand, SimEvent};
use crate::use_cases::ServerState;
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Messages the server sends to connected clients over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    // Assigned identity for the connection after Join is accepted.
    Identity {
        player_id: String,
        entity_id: Option<u64>,
    },
    // Full or delta world state for a given tick.
    StateUpdate(StateUpdateDto),
    // Server-confirmed projectile lifecycle.
    ProjectileSpawn(ProjectileSpawnDto),
    ProjectileHit(ProjectileHitDto),
    ProjectileDespawn(ProjectileDespawnDto),
    // High-level server state transitions (lobby, match start/end).
    GameState(ServerStateDto),
}

/// Messages the client sends to the server over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    // Initial handshake message.
    Join(JoinPayload),
    // One per client tick after a successful Join.
    Input(InputCommandDto),
    // Confirms receipt of a StateUpdate so deltas can build on it.
    Ack { tick: u64 },
}

/// Payload for the Join handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinPayload {
    /// Reconnecting clients pass their previous id to get their entity back.
    #[serde(default)]
    pub player_id: Option<u64>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2Dto {
    pub x: f64,
    pub y: f64,
}

impl From<DVec2> for Vec2Dto {
    fn from(v: DVec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl From<Vec2Dto> for DVec2 {
    fn from(v: Vec2Dto) -> Self {
        DVec2::new(v.x, v.y)
    }
}

/// Per-tick input payload sent by the client after joining.
#[derive(Debug, Clone, Deserialize)]
pub struct InputCommandDto {
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: f64,
    /// Server timestamp of the newest state the client had rendered.
    #[serde(default)]
    pub view_timestamp: f64,
    pub move_vector: Vec2Dto,
    #[serde(default)]
    pub action_flags: u8,
    #[serde(default)]
    pub target: Option<u64>,
}

impl InputCommandDto {
    /// The player id always comes from the connection, never the payload.
    pub fn into_command(self, player_id: u64) -> InputCommand {
        InputCommand {
            player_id,
            sequence: self.sequence,
            timestamp: self.timestamp,
            view_timestamp: self.view_timestamp,
            move_vector: self.move_vector.into(),
            actions: ActionFlags(self.action_flags),
            target: self.target.map(EntityId),
        }
    }
}

/// Networked entity state for wire transmission in state updates.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStateDto {
    pub id: u64,
    pub position: Vec2Dto,
    pub velocity: Vec2Dto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    pub dead: bool,
}

impl From<&EntityState> for EntityStateDto {
    fn from(entity: &EntityState) -> Self {
        Self {
            id: entity.id.0,
            position: entity.position.into(),
            velocity: entity.velocity.into(),
            health: entity.health,
            dead: entity.dead,
        }
    }
}

/// World state for one tick, relative to `baseline_tick` when present.
#[derive(Debug, Clone, Serialize)]
pub struct StateUpdateDto {
    pub tick: u64,
    pub timestamp: f64,
    pub baseline_tick: Option<u64>,
    /// Last input sequence the server applied for this client.
    pub ack: Option<u64>,
    pub entities: Vec<EntityStateDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<u64>,
    /// Combat events (damage, deaths, respawns) since the previous update.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl StateUpdateDto {
    pub fn new(delta: &StateDelta, ack: Option<u64>, events: Vec<SimEvent>) -> Self {
        Self {
            tick: delta.tick,
            timestamp: delta.timestamp,
            baseline_tick: delta.baseline_tick,
            ack,
            entities: delta.changed.iter().map(EntityStateDto::from).collect(),
            removed: delta.removed.iter().map(|id| id.0).collect(),
            events,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectileSpawnDto {
    pub tick: u64,
    pub timestamp: f64,
    pub projectile_id: u64,
    pub owner_id: u64,
    pub position: Vec2Dto,
    pub velocity: Vec2Dto,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectileHitDto {
    pub tick: u64,
    pub timestamp: f64,
    pub projectile_id: u64,
    pub owner_id: u64,
    pub target_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectileDespawnDto {
    pub tick: u64,
    pub timestamp: f64,
    pub projectile_id: u64,
}

/// Splits tick events into dedicated projectile messages and the remainder
/// carried inside the state update.
pub fn route_events(
    events: &[SimEvent],
    timestamp: f64,
) -> (Vec<ServerMessage>, Vec<SimEvent>) {
    let mut messages = Vec::new();
    let mut rest = Vec::new();
    for event in events {
        match *event {
            SimEvent::ProjectileSpawned {
                tick,
                projectile,
                owner,
                position,
                velocity,
            } => messages.push(ServerMessage::ProjectileSpawn(ProjectileSpawnDto {
                tick,
                timestamp,
                projectile_id: projectile.0,
                owner_id: owner.0,
                position: position.into(),
                velocity: velocity.into(),
            })),
            SimEvent::ProjectileHit {
                tick,
                projectile,
                owner,
                target,
            } => messages.push(ServerMessage::ProjectileHit(ProjectileHitDto {
                tick,
                timestamp,
                projectile_id: projectile.0,
                owner_id: owner.0,
                target_id: target.0,
            })),
            SimEvent::ProjectileDespawned { tick, projectile } => {
                messages.push(ServerMessage::ProjectileDespawn(ProjectileDespawnDto {
                    tick,
                    timestamp,
                    projectile_id: projectile.0,
                }))
            }
            _ => rest.push(event.clone()),
        }
    }
    (messages, rest)
}

/// Server lifecycle state sent to clients for UI flow.
#[derive(Debug, Clone, Serialize)]
pub enum ServerStateDto {
    Lobby,
    MatchStarting { in_seconds: u32 },
    MatchRunning,
    MatchEnded,
}

impl From<ServerState> for ServerStateDto {
    fn from(state: ServerState) -> Self {
        match state {
            ServerState::Lobby => ServerStateDto::Lobby,
            ServerState::MatchStarting { in_seconds } => {
                ServerStateDto::MatchStarting { in_seconds }
            }
            ServerState::MatchRunning => ServerStateDto::MatchRunning,
            ServerState::MatchEnded => ServerStateDto::MatchEnded,
        }
    }
}
