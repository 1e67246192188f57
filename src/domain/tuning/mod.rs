// Gameplay tuning, kept apart from runtime/server configuration.

pub mod arena;
pub mod player;
pub mod projectile;

pub use arena::ArenaTuning;
pub use player::PlayerTuning;
pub use projectile::ProjectileTuning;

/// Every gameplay tuning group, handed to the world task as one value.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameTuning {
    pub player: PlayerTuning,
    pub projectile: ProjectileTuning,
    pub arena: ArenaTuning,
}
