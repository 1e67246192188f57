// Use cases layer: application workflows for the game server.

pub mod game;
pub mod lobby;
pub mod types;
pub mod view;

pub use game::{GameConfig, GameSession};
pub use lobby::{LobbyError, LobbyHandle, LobbyRegistry, LobbySettings};
pub use types::{GameEvent, ServerState, WorldUpdate};
pub use view::{ViewSummary, WorldView};
