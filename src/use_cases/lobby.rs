// Lobby orchestration for spawning and managing game worlds.

use crate::domain::persistence::SaveGame;
use crate::use_cases::game::{GameConfig, WorldChannels, build_session, world_task};
use crate::use_cases::view::WorldView;
use crate::use_cases::{GameEvent, ServerState, WorldUpdate};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, broadcast, mpsc, oneshot, watch};
use tracing::info;

/// Shared configuration for spawning lobby worlds.
#[derive(Debug, Clone)]
pub struct LobbySettings {
    /// Capacity for inbound player input events.
    pub input_channel_capacity: usize,
    /// Capacity for broadcast world updates.
    pub world_broadcast_capacity: usize,
    /// Simulation settings for every new world.
    pub game: GameConfig,
}

/// Errors returned by lobby registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /// Lobby already exists and cannot be re-created.
    AlreadyExists,
    NotFound,
    /// The world task is gone.
    Closed,
    /// Another live connection already controls this player.
    PlayerConnected,
}

impl fmt::Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyError::AlreadyExists => f.write_str("lobby already exists"),
            LobbyError::NotFound => f.write_str("lobby not found"),
            LobbyError::Closed => f.write_str("lobby world is not running"),
            LobbyError::PlayerConnected => f.write_str("player already connected"),
        }
    }
}

impl std::error::Error for LobbyError {}

/// Per-lobby channels and access rules.
#[derive(Clone)]
pub struct LobbyHandle {
    /// Identifier clients use to target this lobby.
    pub lobby_id: Arc<str>,
    /// Sender for game events into the lobby world task.
    pub input_tx: mpsc::Sender<GameEvent>,
    /// Broadcast sender for world updates.
    pub world_tx: broadcast::Sender<WorldUpdate>,
    /// Watch sender for high-level server state changes.
    pub server_state_tx: watch::Sender<ServerState>,
    /// Lock-guarded copy of the latest world state.
    pub view: Arc<WorldView>,
    shutdown: Arc<Notify>,
    /// Players allowed to spawn into the lobby (empty means open lobby).
    allowed_players: Arc<HashSet<u64>>,
    /// Players with a live connection.
    connected_players: Arc<RwLock<HashSet<u64>>>,
    /// Pinned lobbies survive their last disconnect.
    pinned: bool,
}

impl LobbyHandle {
    /// Returns true if the provided player id should spawn in the lobby.
    pub fn is_player_allowed(&self, player_id: u64) -> bool {
        self.allowed_players.is_empty() || self.allowed_players.contains(&player_id)
    }

    /// Reserves the player for one connection at a time.
    pub async fn claim_player(&self, player_id: u64) -> Result<(), LobbyError> {
        if self.connected_players.write().await.insert(player_id) {
            Ok(())
        } else {
            Err(LobbyError::PlayerConnected)
        }
    }

    pub async fn release_player(&self, player_id: u64) {
        self.connected_players.write().await.remove(&player_id);
    }

    pub async fn connected_players(&self) -> usize {
        self.connected_players.read().await.len()
    }

    /// Asks the world task for a save of its current state.
    pub async fn request_save(&self) -> Result<SaveGame, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(GameEvent::Save { reply })
            .await
            .map_err(|_| LobbyError::Closed)?;
        rx.await.map_err(|_| LobbyError::Closed)
    }

    fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

struct LobbyEntry {
    handle: LobbyHandle,
    connections: usize,
}

/// Thread-safe registry for active lobbies.
pub struct LobbyRegistry {
    /// Global settings applied to newly created lobbies.
    settings: LobbySettings,
    /// Map of lobby id to active handle.
    lobbies: RwLock<HashMap<String, LobbyEntry>>,
}

impl LobbyRegistry {
    /// Creates a new registry with the provided settings.
    pub fn new(settings: LobbySettings) -> Self {
        Self {
            settings,
            lobbies: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    /// Creates a new lobby and spawns its world task, optionally from a save.
    pub async fn create_lobby(
        &self,
        lobby_id: String,
        allowed_players: HashSet<u64>,
        pinned: bool,
        restore: Option<SaveGame>,
    ) -> Result<LobbyHandle, LobbyError> {
        let mut lobbies = self.lobbies.write().await;
        if lobbies.contains_key(&lobby_id) {
            return Err(LobbyError::AlreadyExists);
        }

        // Channel wiring for the lobby world loop.
        let (input_tx, input_rx) = mpsc::channel::<GameEvent>(self.settings.input_channel_capacity);
        let (world_tx, _world_rx) =
            broadcast::channel::<WorldUpdate>(self.settings.world_broadcast_capacity);
        let (server_state_tx, _server_state_rx) =
            watch::channel::<ServerState>(ServerState::Lobby);
        let view = Arc::new(WorldView::default());
        let shutdown = Arc::new(Notify::new());

        // Pinned lobbies are open sandboxes: no countdown, no time limit.
        let mut game = self.settings.game.clone();
        if pinned {
            game.countdown_seconds = 0;
            game.match_time_limit = Duration::ZERO;
        }

        let session = build_session(&game, restore.as_ref());
        info!(
            lobby_id = %lobby_id,
            restored = restore.is_some(),
            entities = session.world().entities().count(),
            "lobby created"
        );

        // Spawn the authoritative world loop for this lobby.
        tokio::spawn(world_task(
            game,
            session,
            WorldChannels {
                input_rx,
                world_tx: world_tx.clone(),
                server_state_tx: server_state_tx.clone(),
                view: view.clone(),
                shutdown: shutdown.clone(),
            },
        ));

        let lobby = LobbyHandle {
            lobby_id: Arc::from(lobby_id.clone()),
            input_tx,
            world_tx,
            server_state_tx,
            view,
            shutdown,
            allowed_players: Arc::new(allowed_players),
            connected_players: Arc::new(RwLock::new(HashSet::new())),
            pinned,
        };

        lobbies.insert(
            lobby_id,
            LobbyEntry {
                handle: lobby.clone(),
                connections: 0,
            },
        );
        Ok(lobby)
    }

    /// Returns a lobby handle for the provided id, if it exists.
    pub async fn get_lobby(&self, lobby_id: &str) -> Option<LobbyHandle> {
        let lobbies = self.lobbies.read().await;
        lobbies.get(lobby_id).map(|entry| entry.handle.clone())
    }

    /// Stops the world task and forgets the lobby.
    pub async fn remove_lobby(&self, lobby_id: &str) -> Result<(), LobbyError> {
        let entry = self
            .lobbies
            .write()
            .await
            .remove(lobby_id)
            .ok_or(LobbyError::NotFound)?;
        entry.handle.shutdown();
        info!(lobby_id, "lobby removed");
        Ok(())
    }

    /// Counts a socket against the lobby. `None` if the lobby is gone.
    pub async fn register_connection(&self, lobby_id: &str) -> Option<usize> {
        let mut lobbies = self.lobbies.write().await;
        let entry = lobbies.get_mut(lobby_id)?;
        entry.connections += 1;
        Some(entry.connections)
    }

    /// Drops a socket; unpinned lobbies are removed with their last one.
    pub async fn register_disconnect(&self, lobby_id: &str) {
        let mut lobbies = self.lobbies.write().await;
        let Some(entry) = lobbies.get_mut(lobby_id) else {
            return;
        };
        entry.connections = entry.connections.saturating_sub(1);
        if entry.connections == 0 && !entry.handle.pinned {
            if let Some(entry) = lobbies.remove(lobby_id) {
                entry.handle.shutdown();
                info!(lobby_id, "empty lobby removed");
            }
        }
    }

    pub async fn lobby_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lobbies.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::GenerationParams;

    fn registry() -> LobbyRegistry {
        LobbyRegistry::new(LobbySettings {
            input_channel_capacity: 64,
            world_broadcast_capacity: 64,
            game: GameConfig {
                tick_interval: Duration::from_millis(5),
                countdown_seconds: 0,
                params: GenerationParams {
                    monster_count: 2,
                    ..GenerationParams::default()
                },
                ..GameConfig::default()
            },
        })
    }

    #[tokio::test]
    async fn duplicate_lobby_ids_are_rejected() {
        let registry = registry();
        registry
            .create_lobby("a".into(), HashSet::new(), false, None)
            .await
            .expect("first create");

        let err = registry
            .create_lobby("a".into(), HashSet::new(), false, None)
            .await
            .err();
        assert_eq!(err, Some(LobbyError::AlreadyExists));
        assert_eq!(registry.lobby_ids().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn unpinned_lobby_is_removed_with_last_connection() {
        let registry = registry();
        registry
            .create_lobby("pinned".into(), HashSet::new(), true, None)
            .await
            .expect("create pinned");
        registry
            .create_lobby("match".into(), HashSet::new(), false, None)
            .await
            .expect("create match");

        for id in ["pinned", "match"] {
            assert_eq!(registry.register_connection(id).await, Some(1));
            registry.register_disconnect(id).await;
        }

        assert!(registry.get_lobby("pinned").await.is_some());
        assert!(registry.get_lobby("match").await.is_none());
        assert_eq!(registry.register_connection("match").await, None);
    }

    #[tokio::test]
    async fn players_are_claimed_once_and_filtered_by_allow_list() {
        let registry = registry();
        let lobby = registry
            .create_lobby("a".into(), HashSet::from([1, 2]), false, None)
            .await
            .expect("create");

        assert!(lobby.is_player_allowed(1));
        assert!(!lobby.is_player_allowed(3));

        lobby.claim_player(1).await.expect("first claim");
        assert_eq!(lobby.claim_player(1).await, Err(LobbyError::PlayerConnected));
        lobby.release_player(1).await;
        assert!(lobby.claim_player(1).await.is_ok());
    }

    #[tokio::test]
    async fn save_round_trips_through_a_new_lobby() {
        let registry = registry();
        let lobby = registry
            .create_lobby("src".into(), HashSet::new(), false, None)
            .await
            .expect("create");

        let save = lobby.request_save().await.expect("save");
        assert_eq!(save.params.monster_count, 2);

        registry
            .create_lobby("copy".into(), HashSet::new(), false, Some(save))
            .await
            .expect("restore");
        registry.remove_lobby("src").await.expect("remove");
        assert_eq!(
            registry.remove_lobby("src").await,
            Err(LobbyError::NotFound)
        );
        assert!(registry.get_lobby("copy").await.is_some());
    }
}
