use crate::domain::ecs::component::{Controller, Position, StatusEffects, Velocity};
use crate::domain::ecs::{ComponentTag, System, TickContext};
use crate::domain::tuning::ArenaTuning;
use glam::DVec2;

/// Result of one movement step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveStep {
    pub position: DVec2,
    pub velocity: DVec2,
}

/// Pure movement integration shared by the server and the client predictor.
/// Same inputs always produce bit-identical outputs.
pub fn step(position: DVec2, move_vector: DVec2, speed: f64, dt: f64, arena: &ArenaTuning) -> MoveStep {
    // direction (length clamped so diagonals are not faster)
    let direction = move_vector.clamp_length_max(1.0);

    // velocity = direction * speed
    let velocity = direction * speed;

    // position integrate, then keep inside the arena
    let next = arena.clamp(position + velocity * dt);

    MoveStep {
        position: next,
        velocity,
    }
}

/// Integrates free-moving entities (no controller, no projectile) from their
/// velocity. Player-controlled entities are moved per input command instead.
pub struct MovementSystem {
    arena: ArenaTuning,
}

impl MovementSystem {
    pub fn new(arena: ArenaTuning) -> Self {
        Self { arena }
    }
}

impl System for MovementSystem {
    fn name(&self) -> &'static str {
        "movement"
    }

    fn requires(&self) -> &'static [ComponentTag] {
        &[ComponentTag::Position, ComponentTag::Velocity]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64) {
        for id in ctx.query(self.requires()) {
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            if entity.is_dead()
                || entity.has(ComponentTag::Projectile)
                || entity.get::<Controller>().is_some()
            {
                continue;
            }

            let slow = entity
                .get::<StatusEffects>()
                .map(StatusEffects::speed_multiplier)
                .unwrap_or(1.0);
            let (Some(velocity), Some(position)) = (
                entity.get::<Velocity>().map(|v| v.0),
                entity.get::<Position>().map(|p| p.0),
            ) else {
                continue;
            };

            let next = self.arena.clamp(position + velocity * slow * dt);
            if let Some(p) = entity.get_mut::<Position>() {
                p.0 = next;
            }
        }
    }
}
