use crate::domain::ecs::component::{
    Attack, Controller, Dead, Health, Position, StatusEffects, Velocity,
};
use crate::domain::ecs::{ComponentTag, System, TickContext};
use crate::domain::events::SimEvent;
use crate::domain::tuning::{ArenaTuning, PlayerTuning};
use glam::DVec2;
use rand::Rng;
use tracing::info;

/// Brings dead players back after a delay and clears away other corpses.
pub struct RespawnSystem {
    player: PlayerTuning,
    arena: ArenaTuning,
}

impl RespawnSystem {
    pub fn new(player: PlayerTuning, arena: ArenaTuning) -> Self {
        Self { player, arena }
    }
}

impl System for RespawnSystem {
    fn name(&self) -> &'static str {
        "respawn"
    }

    fn requires(&self) -> &'static [ComponentTag] {
        &[ComponentTag::Dead]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64) {
        for id in ctx.query(self.requires()) {
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            let Some(elapsed) = entity.get_mut::<Dead>().map(|dead| {
                dead.elapsed += dt;
                dead.elapsed
            }) else {
                continue;
            };

            if entity.get::<Controller>().is_none() {
                if elapsed >= self.arena.corpse_seconds {
                    let _ = ctx.store.queue_remove(id);
                }
                continue;
            }
            if elapsed < self.player.respawn_seconds {
                continue;
            }

            let spawn = DVec2::new(
                ctx.rng.gen_range(self.arena.min.x..=self.arena.max.x),
                ctx.rng.gen_range(self.arena.min.y..=self.arena.max.y),
            );
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            entity.remove(ComponentTag::Dead);
            entity.insert(Position(spawn));
            entity.insert(Velocity(DVec2::ZERO));
            if let Some(health) = entity.get_mut::<Health>() {
                health.current = health.max;
            }
            if let Some(attack) = entity.get_mut::<Attack>() {
                attack.cooldown_remaining = 0.0;
            }
            if let Some(effects) = entity.get_mut::<StatusEffects>() {
                effects.effects.clear();
            }
            if let Some(controller) = entity.get_mut::<Controller>() {
                controller.pending_attack = None;
                controller.fire_requested = false;
            }

            info!(entity = %id, x = spawn.x, y = spawn.y, "respawned");
            ctx.emit(SimEvent::Respawned {
                tick: ctx.tick,
                entity: id,
                position: spawn,
            });
        }
    }
}
