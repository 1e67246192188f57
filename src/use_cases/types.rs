// Use-case level inputs/outputs for the game loop.

use crate::domain::persistence::SaveGame;
use crate::domain::{EntityId, InputCommand, SimEvent, Snapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum GameEvent {
    /// Spawns (or re-binds) the player's entity; replies with its id.
    Join {
        player_id: u64,
        reply: oneshot::Sender<EntityId>,
    },
    Leave {
        player_id: u64,
    },
    Input {
        command: InputCommand,
    },
    /// Captures a save of the current world.
    Save {
        reply: oneshot::Sender<SaveGame>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Lobby,
    MatchStarting { in_seconds: u32 },
    MatchRunning,
    MatchEnded,
}

/// Published after every recorded tick.
#[derive(Debug, Clone)]
pub struct WorldUpdate {
    pub snapshot: Arc<Snapshot>,
    /// Events emitted since the previous update.
    pub events: Arc<[SimEvent]>,
    /// Last applied input sequence per player id.
    pub acks: Arc<BTreeMap<u64, u64>>,
}
