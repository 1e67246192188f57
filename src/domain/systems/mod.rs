// Per-tick systems. Registration order is the execution order.

pub mod combat;
pub mod movement;
pub mod projectiles;
pub mod respawn;
pub mod status_effects;

pub use combat::CombatSystem;
pub use movement::MovementSystem;
pub use projectiles::ProjectileSystem;
pub use respawn::RespawnSystem;
pub use status_effects::StatusEffectSystem;

use crate::domain::ecs::World;
use crate::domain::tuning::GameTuning;

/// Movement, combat, projectiles, status effects, respawn.
pub fn register_default_systems(world: &mut World, tuning: &GameTuning) {
    world.add_system(MovementSystem::new(tuning.arena));
    world.add_system(CombatSystem);
    world.add_system(ProjectileSystem::new(tuning.projectile, tuning.arena));
    world.add_system(StatusEffectSystem);
    world.add_system(RespawnSystem::new(tuning.player, tuning.arena));
}
