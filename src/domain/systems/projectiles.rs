use crate::domain::combat::{apply_damage, compute_damage};
use crate::domain::ecs::component::{
    Attack, Collider, Controller, Health, Position, Projectile, StatusEffect, StatusKind, Team,
    Velocity,
};
use crate::domain::ecs::{ComponentTag, EntityId, System, TickContext};
use crate::domain::events::SimEvent;
use crate::domain::stats::Stats;
use crate::domain::systems::status_effects::add_effect;
use crate::domain::tuning::{ArenaTuning, ProjectileTuning};
use glam::DVec2;
use std::collections::BTreeMap;
use tracing::info;

/// Spawns, moves, expires and collides projectiles.
pub struct ProjectileSystem {
    tuning: ProjectileTuning,
    arena: ArenaTuning,
    /// Seconds until each shooter may fire again.
    fire_cooldowns: BTreeMap<EntityId, f64>,
}

impl ProjectileSystem {
    pub fn new(tuning: ProjectileTuning, arena: ArenaTuning) -> Self {
        Self {
            tuning,
            arena,
            fire_cooldowns: BTreeMap::new(),
        }
    }

    fn spawn_requested(&mut self, ctx: &mut TickContext<'_>) {
        for shooter in ctx.query(&[ComponentTag::Controller, ComponentTag::Position]) {
            let Some(entity) = ctx.store.get_mut(shooter) else {
                continue;
            };
            let requested = entity
                .get_mut::<Controller>()
                .map(|c| std::mem::take(&mut c.fire_requested))
                .unwrap_or(false);
            if !requested || entity.is_dead() {
                continue;
            }
            if self.fire_cooldowns.get(&shooter).is_some_and(|&cd| cd > 0.0) {
                continue;
            }

            let (Some(position), Some(facing)) = (
                entity.get::<Position>().map(|p| p.0),
                entity.get::<Controller>().map(|c| c.facing),
            ) else {
                continue;
            };
            let direction = facing.normalize_or_zero();
            if direction == DVec2::ZERO {
                continue;
            }
            let body = entity.get::<Collider>().map(|c| c.radius).unwrap_or(0.0);

            // Spawn at the edge of the shooter's collider, in the facing direction.
            let origin = position + direction * (body + self.tuning.radius);
            let velocity = direction * self.tuning.speed;
            let projectile = ctx.store.spawn([
                Position(origin).into(),
                Velocity(velocity).into(),
                Projectile {
                    owner: shooter,
                    damage: self.tuning.damage,
                    ttl: self.tuning.life_time,
                    radius: self.tuning.radius,
                }
                .into(),
            ]);
            self.fire_cooldowns.insert(shooter, self.tuning.cooldown);

            ctx.emit(SimEvent::ProjectileSpawned {
                tick: ctx.tick,
                projectile,
                owner: shooter,
                position: origin,
                velocity,
            });
        }
    }

    fn despawn(ctx: &mut TickContext<'_>, projectile: EntityId) {
        if ctx.store.queue_remove(projectile).is_ok() {
            ctx.emit(SimEvent::ProjectileDespawned {
                tick: ctx.tick,
                projectile,
            });
        }
    }

    /// First living, non-owner, non-allied entity overlapping the projectile.
    fn find_victim(
        ctx: &TickContext<'_>,
        candidates: &[EntityId],
        shot: &Projectile,
        at: DVec2,
    ) -> Option<EntityId> {
        let owner_team = ctx
            .store
            .get(shot.owner)
            .and_then(|e| e.get::<Team>())
            .copied();

        candidates.iter().copied().find(|&id| {
            if id == shot.owner {
                return false;
            }
            let Some(entity) = ctx.store.get(id) else {
                return false;
            };
            if entity.is_dead() || !entity.get::<Health>().is_some_and(Health::is_alive) {
                return false;
            }
            if owner_team.is_some() && owner_team == entity.get::<Team>().copied() {
                return false;
            }
            let (Some(pos), Some(collider)) =
                (entity.get::<Position>(), entity.get::<Collider>())
            else {
                return false;
            };
            pos.0.distance(at) <= collider.radius + shot.radius
        })
    }

    fn hit(&self, ctx: &mut TickContext<'_>, projectile: EntityId, shot: &Projectile, victim: EntityId) {
        let attacker_stats = ctx
            .store
            .get(shot.owner)
            .and_then(|e| e.get::<Stats>())
            .map(|s| s.effective().clone())
            .unwrap_or_default();
        let target_stats = ctx
            .store
            .get(victim)
            .and_then(|e| e.get::<Stats>())
            .map(|s| s.effective().clone())
            .unwrap_or_default();
        let weapon = Attack {
            damage: shot.damage,
            range: 0.0,
            cooldown: 0.0,
            cooldown_remaining: 0.0,
            magical: false,
            damage_type: Default::default(),
        };
        let amount = compute_damage(&weapon, &attacker_stats, &target_stats, false);

        ctx.emit(SimEvent::ProjectileHit {
            tick: ctx.tick,
            projectile,
            owner: shot.owner,
            target: victim,
        });
        let remaining = apply_damage(
            ctx.store,
            ctx.events,
            ctx.tick,
            Some(shot.owner),
            victim,
            amount,
            false,
        );
        if remaining.is_some_and(|hp| hp > 0) && self.tuning.slow_seconds > 0.0 {
            if let Some(entity) = ctx.store.get_mut(victim) {
                add_effect(
                    entity,
                    StatusEffect::new(
                        StatusKind::Slow,
                        self.tuning.slow_seconds,
                        self.tuning.slow_fraction,
                        0.0,
                    ),
                );
            }
        }

        info!(
            victim_id = %victim,
            shooter_id = %shot.owner,
            projectile_id = %projectile,
            victim_hp = ?remaining,
            "player hit"
        );
    }
}

impl System for ProjectileSystem {
    fn name(&self) -> &'static str {
        "projectiles"
    }

    fn requires(&self) -> &'static [ComponentTag] {
        &[
            ComponentTag::Projectile,
            ComponentTag::Position,
            ComponentTag::Velocity,
        ]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64) {
        for cd in self.fire_cooldowns.values_mut() {
            *cd = (*cd - dt).max(0.0);
        }
        self.fire_cooldowns
            .retain(|id, cd| *cd > 0.0 && ctx.store.contains(*id));

        // New projectiles are deferred and start moving next tick.
        self.spawn_requested(ctx);

        let candidates = ctx.query(&[
            ComponentTag::Health,
            ComponentTag::Collider,
            ComponentTag::Position,
        ]);

        for id in ctx.query(self.requires()) {
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            let (Some(velocity), Some(position)) = (
                entity.get::<Velocity>().map(|v| v.0),
                entity.get::<Position>().map(|p| p.0),
            ) else {
                continue;
            };
            let next = position + velocity * dt;
            entity.insert(Position(next));
            let Some(shot) = entity.get_mut::<Projectile>().map(|p| {
                p.ttl -= dt;
                *p
            }) else {
                continue;
            };

            if shot.ttl <= 0.0 || !self.arena.contains(next) {
                Self::despawn(ctx, id);
                continue;
            }

            if let Some(victim) = Self::find_victim(ctx, &candidates, &shot, next) {
                self.hit(ctx, id, &shot, victim);
                Self::despawn(ctx, id);
            }
        }
    }
}
