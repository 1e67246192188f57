use crate::domain::combat::apply_damage;
use crate::domain::ecs::component::{Health, StatusEffect, StatusEffects, StatusKind};
use crate::domain::ecs::{ComponentTag, Entity, System, TickContext};

/// Adds an effect, creating the container component on first use. An effect
/// of the same kind is refreshed instead of stacked.
pub fn add_effect(entity: &mut Entity, effect: StatusEffect) {
    if entity.get::<StatusEffects>().is_none() {
        entity.insert(StatusEffects::default());
    }
    let Some(effects) = entity.get_mut::<StatusEffects>() else {
        return;
    };
    match effects.effects.iter_mut().find(|e| e.kind == effect.kind) {
        Some(existing) => {
            existing.remaining = existing.remaining.max(effect.remaining);
            existing.magnitude = effect.magnitude;
            existing.interval = effect.interval;
        }
        None => effects.effects.push(effect),
    }
}

/// Ticks timed effects. Timers run on every entity, dead or alive; health
/// pulses only land on the living.
#[derive(Debug, Default)]
pub struct StatusEffectSystem;

impl System for StatusEffectSystem {
    fn name(&self) -> &'static str {
        "status_effects"
    }

    fn requires(&self) -> &'static [ComponentTag] {
        &[ComponentTag::StatusEffects]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64) {
        for id in ctx.query(self.requires()) {
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            let alive = !entity.is_dead() && entity.get::<Health>().is_some_and(Health::is_alive);

            let mut pulses: Vec<(StatusKind, f64)> = Vec::new();
            if let Some(effects) = entity.get_mut::<StatusEffects>() {
                for effect in effects.effects.iter_mut() {
                    let active = dt.min(effect.remaining.max(0.0));
                    effect.remaining -= dt;
                    if effect.interval <= 0.0 || effect.kind == StatusKind::Slow {
                        continue;
                    }
                    effect.since_pulse += active;
                    while effect.since_pulse >= effect.interval {
                        effect.since_pulse -= effect.interval;
                        pulses.push((effect.kind, effect.magnitude));
                    }
                }
                effects.effects.retain(|e| e.remaining > 0.0);
            }

            if !alive {
                continue;
            }
            for (kind, magnitude) in pulses {
                let amount = (magnitude.round() as i32).max(1);
                match kind {
                    StatusKind::Poison => {
                        // Returns None once the target died from an earlier pulse.
                        if apply_damage(ctx.store, ctx.events, ctx.tick, None, id, amount, false)
                            .is_none_or(|hp| hp == 0)
                        {
                            break;
                        }
                    }
                    StatusKind::Regeneration => {
                        if let Some(health) = ctx.store.get_mut(id).and_then(|e| e.get_mut::<Health>()) {
                            health.current = (health.current + amount).min(health.max);
                        }
                    }
                    StatusKind::Slow => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::component::Dead;
    use crate::domain::ecs::{EntityId, World, WorldConfig};
    use crate::domain::events::SimEvent;

    fn world() -> World {
        let mut world = World::new(WorldConfig::default());
        world.add_system(StatusEffectSystem);
        world
    }

    fn effects(world: &World, id: EntityId) -> Vec<StatusEffect> {
        world
            .entity(id)
            .and_then(|e| e.get::<StatusEffects>())
            .map(|s| s.effects.clone())
            .unwrap_or_default()
    }

    fn health(world: &World, id: EntityId) -> Option<i32> {
        world.entity(id).and_then(|e| e.get::<Health>()).map(|h| h.current)
    }

    #[test]
    fn poison_pulses_on_interval_and_expires() {
        let mut world = world();
        let id = world.spawn([
            Health::full(100).into(),
            StatusEffects {
                effects: vec![StatusEffect::new(StatusKind::Poison, 1.0, 4.0, 0.25)],
            }
            .into(),
        ]);

        for _ in 0..8 {
            world.update(0.125);
        }

        assert_eq!(health(&world, id), Some(84));
        assert!(effects(&world, id).is_empty());
    }

    #[test]
    fn when_entity_is_dead_then_timers_still_run_but_no_damage_lands() {
        let mut world = world();
        let id = world.spawn([
            Health { current: 0, max: 100 }.into(),
            Dead::default().into(),
            StatusEffects {
                effects: vec![
                    StatusEffect::new(StatusKind::Poison, 0.5, 4.0, 0.1),
                    StatusEffect::new(StatusKind::Slow, 2.0, 0.5, 0.0),
                ],
            }
            .into(),
        ]);

        world.update(0.5);

        assert_eq!(health(&world, id), Some(0));
        let left = effects(&world, id);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].kind, StatusKind::Slow);
        assert!((left[0].remaining - 1.5).abs() < 1e-12);
    }

    #[test]
    fn when_poison_kills_then_exactly_one_death_is_emitted() {
        let mut world = world();
        let id = world.spawn([
            Health::full(5).into(),
            StatusEffects {
                effects: vec![StatusEffect::new(StatusKind::Poison, 5.0, 3.0, 0.1)],
            }
            .into(),
        ]);

        world.update(1.0);
        world.update(1.0);

        let deaths = world
            .events()
            .iter()
            .filter(|e| matches!(e, SimEvent::Death { entity, killer: None, .. } if *entity == id))
            .count();
        assert_eq!(deaths, 1);
        assert_eq!(health(&world, id), Some(0));
    }

    #[test]
    fn regeneration_heals_up_to_max() {
        let mut world = world();
        let id = world.spawn([
            Health { current: 95, max: 100 }.into(),
            StatusEffects {
                effects: vec![StatusEffect::new(StatusKind::Regeneration, 3.0, 4.0, 1.0)],
            }
            .into(),
        ]);

        world.update(1.0);
        assert_eq!(health(&world, id), Some(99));
        world.update(1.0);
        assert_eq!(health(&world, id), Some(100));
    }

    #[test]
    fn adding_same_kind_refreshes_instead_of_stacking() {
        let mut entity = Entity::new(EntityId(1));
        add_effect(&mut entity, StatusEffect::new(StatusKind::Slow, 1.0, 0.3, 0.0));
        add_effect(&mut entity, StatusEffect::new(StatusKind::Slow, 2.0, 0.5, 0.0));

        let effects = entity.get::<StatusEffects>().expect("effects");
        assert_eq!(effects.effects.len(), 1);
        assert_eq!(effects.effects[0].remaining, 2.0);
        assert_eq!(effects.effects[0].magnitude, 0.5);
    }
}
