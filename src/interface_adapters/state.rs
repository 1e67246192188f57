use crate::use_cases::LobbyRegistry;
use std::sync::Arc;

pub struct AppState {
    // Owns every lobby world task.
    pub lobby_registry: Arc<LobbyRegistry>,
    // Lobby used when a socket does not name one.
    pub default_lobby_id: Arc<str>,
    // Sent snapshots each connection keeps as delta baselines.
    pub delta_history: usize,
}
