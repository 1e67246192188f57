use crate::domain::combat;
use crate::domain::ecs::component::{Attack, Controller};
use crate::domain::ecs::{ComponentTag, System, TickContext};

/// Advances attack cooldowns and resolves the hit claims players submitted
/// since the previous tick.
#[derive(Debug, Default)]
pub struct CombatSystem;

impl System for CombatSystem {
    fn name(&self) -> &'static str {
        "combat"
    }

    fn requires(&self) -> &'static [ComponentTag] {
        &[ComponentTag::Attack]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64) {
        for id in ctx.query(self.requires()) {
            let Some(entity) = ctx.store.get_mut(id) else {
                continue;
            };
            // Corpses keep whatever cooldown they died with.
            if entity.is_dead() {
                continue;
            }
            if let Some(attack) = entity.get_mut::<Attack>() {
                attack.cooldown_remaining = (attack.cooldown_remaining - dt).max(0.0);
            }
        }

        for id in ctx.query(&[ComponentTag::Controller]) {
            let claim = ctx
                .store
                .get_mut(id)
                .and_then(|e| e.get_mut::<Controller>())
                .and_then(|c| c.pending_attack.take());
            let Some(claim) = claim else {
                continue;
            };
            // Outcome is reported through the event queue.
            let _ = combat::resolve_attack(
                ctx.store,
                ctx.rng,
                ctx.events,
                ctx.tick,
                id,
                claim.target,
                Some(claim.target_position),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::component::{AttackClaim, Dead, Health, Position, Team};
    use crate::domain::ecs::{EntityId, World, WorldConfig};
    use crate::domain::events::SimEvent;
    use crate::domain::tuning::PlayerTuning;
    use glam::DVec2;

    fn cooling_attack(remaining: f64) -> Attack {
        Attack {
            cooldown: 1.0,
            cooldown_remaining: remaining,
            ..PlayerTuning::default().melee()
        }
    }

    fn cooldown(world: &World, id: EntityId) -> Option<f64> {
        world
            .entity(id)
            .and_then(|e| e.get::<Attack>())
            .map(|a| a.cooldown_remaining)
    }

    #[test]
    fn when_entity_is_dead_then_cooldown_does_not_advance() {
        let mut world = World::new(WorldConfig::default());
        world.add_system(CombatSystem);
        let alive = world.spawn([cooling_attack(1.0).into()]);
        let dead = world.spawn([cooling_attack(1.0).into(), Dead::default().into()]);

        world.update(0.25);

        assert_eq!(cooldown(&world, alive), Some(0.75));
        assert_eq!(cooldown(&world, dead), Some(1.0));
    }

    #[test]
    fn pending_claims_resolve_against_the_rewound_position_once() {
        let mut world = World::new(WorldConfig::default());
        world.add_system(CombatSystem);
        let target = world.spawn([
            Position(DVec2::new(500.0, 0.0)).into(),
            Health::full(100).into(),
            Team(2).into(),
        ]);
        let mut controller = Controller::new(1);
        controller.pending_attack = Some(AttackClaim {
            target,
            target_position: DVec2::new(20.0, 0.0),
        });
        let attacker = world.spawn([
            Position(DVec2::ZERO).into(),
            PlayerTuning::default().melee().into(),
            Team(1).into(),
            controller.into(),
        ]);

        world.update(0.05);
        world.update(0.05);

        let hits = world
            .events()
            .iter()
            .filter(|e| matches!(e, SimEvent::Damage { attacker: Some(a), .. } if *a == attacker))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(
            world.entity(target).and_then(|e| e.get::<Health>()).map(|h| h.current),
            Some(75)
        );
        assert!(world
            .entity(attacker)
            .and_then(|e| e.get::<Controller>())
            .is_some_and(|c| c.pending_attack.is_none()));
    }
}
