// Attack resolution: precondition checks, damage formula and death handling.

use crate::domain::ecs::component::{Attack, Dead, Health, Position, Team};
use crate::domain::ecs::{EntityId, EntityStore};
use crate::domain::events::{EventQueue, MissReason, SimEvent};
use crate::domain::stats::{StatBlock, Stats};
use glam::DVec2;
use rand::Rng;
use tracing::debug;

/// Damage that survived mitigation, before it is applied to health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRoll {
    pub amount: i32,
    pub critical: bool,
}

/// `raw = weapon + (magical ? magic_power : attack)`, optionally multiplied by
/// the crit multiplier, minus the matching defense, scaled by
/// `1 - resistance`, rounded and floored at 1.
pub fn compute_damage(
    attack: &Attack,
    attacker: &StatBlock,
    target: &StatBlock,
    critical: bool,
) -> i32 {
    let mut raw = attack.damage
        + if attack.magical {
            attacker.magic_power
        } else {
            attacker.attack
        };
    if critical {
        raw *= attacker.crit_multiplier;
    }
    let mitigated = raw
        - if attack.magical {
            target.magic_defense
        } else {
            target.defense
        };
    let scaled = mitigated * (1.0 - target.resistance(attack.damage_type));

    // NaN casts to 0 and is then floored like any other tiny result.
    (scaled.round() as i32).max(1)
}

/// Resolves `attacker` hitting `target` using live positions.
pub fn attack(
    store: &mut EntityStore,
    rng: &mut impl Rng,
    events: &mut EventQueue,
    tick: u64,
    attacker: EntityId,
    target: EntityId,
) -> bool {
    resolve_attack(store, rng, events, tick, attacker, target, None).is_ok()
}

/// Full attack resolution. `target_position` overrides the target's live
/// position for the range check (lag-compensated claims).
///
/// Preconditions short-circuit in this order: attacker able to attack,
/// target alive with health, not on the attacker's team, in range, not evaded.
pub fn resolve_attack(
    store: &mut EntityStore,
    rng: &mut impl Rng,
    events: &mut EventQueue,
    tick: u64,
    attacker: EntityId,
    target: EntityId,
    target_position: Option<DVec2>,
) -> Result<DamageRoll, MissReason> {
    let result = check_and_roll(store, rng, tick, attacker, target, target_position);

    match result {
        Ok(roll) => {
            if let Some(attack) = store.get_mut(attacker).and_then(|e| e.get_mut::<Attack>()) {
                attack.cooldown_remaining = attack.cooldown;
            }
            apply_damage(store, events, tick, Some(attacker), target, roll.amount, roll.critical);
            Ok(roll)
        }
        Err(reason) => {
            if matches!(reason, MissReason::OutOfRange | MissReason::Evaded) {
                events.push(SimEvent::Miss {
                    tick,
                    attacker,
                    target,
                    reason,
                });
            } else {
                debug!(%attacker, %target, ?reason, "attack rejected");
            }
            Err(reason)
        }
    }
}

fn check_and_roll(
    store: &mut EntityStore,
    rng: &mut impl Rng,
    tick: u64,
    attacker_id: EntityId,
    target_id: EntityId,
    target_position: Option<DVec2>,
) -> Result<DamageRoll, MissReason> {
    let attacker = store.get(attacker_id).ok_or(MissReason::InvalidAttacker)?;
    if attacker.is_dead() {
        return Err(MissReason::AttackerDead);
    }
    let attack = *attacker.get::<Attack>().ok_or(MissReason::NoAttack)?;
    if !attack.is_ready() {
        return Err(MissReason::OnCooldown);
    }
    let attacker_stats = attacker
        .get::<Stats>()
        .map(|s| s.effective().clone())
        .unwrap_or_default();
    let attacker_team = attacker.get::<Team>().copied();
    let attacker_pos = attacker.get::<Position>().map(|p| p.0);

    if attacker_id == target_id {
        return Err(MissReason::InvalidTarget);
    }
    let target = store.get(target_id).ok_or(MissReason::InvalidTarget)?;
    let alive = target.get::<Health>().is_some_and(Health::is_alive);
    if target.is_dead() || !alive {
        return Err(MissReason::InvalidTarget);
    }
    if attacker_team.is_some() && attacker_team == target.get::<Team>().copied() {
        return Err(MissReason::FriendlyTarget);
    }

    let target_pos = target_position.or_else(|| target.get::<Position>().map(|p| p.0));
    if let (Some(from), Some(to)) = (attacker_pos, target_pos) {
        if from.distance(to) > attack.range {
            return Err(MissReason::OutOfRange);
        }
    }

    let target_stats = target
        .get::<Stats>()
        .map(|s| s.effective().clone())
        .unwrap_or_default();

    // Rolls only consume the RNG when the chance is non-zero.
    if target_stats.evasion > 0.0 && rng.gen_bool(target_stats.evasion.clamp(0.0, 1.0)) {
        if let Some(attack) = store
            .get_mut(attacker_id)
            .and_then(|e| e.get_mut::<Attack>())
        {
            // The swing happened, so it still costs the cooldown.
            attack.cooldown_remaining = attack.cooldown;
        }
        debug!(tick, attacker = %attacker_id, target = %target_id, "attack evaded");
        return Err(MissReason::Evaded);
    }
    let critical = attacker_stats.crit_chance > 0.0
        && rng.gen_bool(attacker_stats.crit_chance.clamp(0.0, 1.0));

    Ok(DamageRoll {
        amount: compute_damage(&attack, &attacker_stats, &target_stats, critical),
        critical,
    })
}

/// Subtracts `amount` from the target's health. On the transition to zero the
/// target gets the `Dead` marker and exactly one `Death` event. Returns the
/// remaining health, or `None` when the target cannot take damage.
pub fn apply_damage(
    store: &mut EntityStore,
    events: &mut EventQueue,
    tick: u64,
    source: Option<EntityId>,
    target: EntityId,
    amount: i32,
    critical: bool,
) -> Option<i32> {
    let entity = store.get_mut(target)?;
    if entity.is_dead() {
        return None;
    }
    let health = entity.get_mut::<Health>()?;
    if !health.is_alive() {
        return None;
    }

    health.current = (health.current - amount).max(0);
    let remaining = health.current;
    events.push(SimEvent::Damage {
        tick,
        attacker: source,
        target,
        amount,
        critical,
        remaining,
    });

    if remaining == 0 {
        entity.insert(Dead::default());
        events.push(SimEvent::Death {
            tick,
            entity: target,
            killer: source,
        });
        debug!(tick, entity = %target, killer = ?source, "entity died");
    }
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::component::Component;
    use crate::domain::stats::{DamageType, StatKind, StatModifier};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Arena {
        store: EntityStore,
        rng: ChaCha8Rng,
        events: EventQueue,
    }

    impl Arena {
        fn new() -> Self {
            Self {
                store: EntityStore::new(),
                rng: ChaCha8Rng::seed_from_u64(7),
                events: EventQueue::default(),
            }
        }

        fn spawn(&mut self, components: Vec<Component>) -> EntityId {
            let id = self.store.spawn(components);
            self.store.flush_additions();
            id
        }

        fn attack(&mut self, attacker: EntityId, target: EntityId) -> bool {
            attack(&mut self.store, &mut self.rng, &mut self.events, 0, attacker, target)
        }

        fn health(&self, id: EntityId) -> i32 {
            self.store
                .get(id)
                .and_then(|e| e.get::<Health>())
                .map(|h| h.current)
                .expect("health")
        }

        fn deaths(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, SimEvent::Death { .. }))
                .count()
        }
    }

    fn weapon(damage: f64, range: f64) -> Attack {
        Attack {
            damage,
            range,
            cooldown: 0.0,
            cooldown_remaining: 0.0,
            magical: false,
            damage_type: DamageType::Physical,
        }
    }

    fn stats(block: StatBlock) -> Component {
        Stats::new(block).into()
    }

    fn attacker_a() -> Vec<Component> {
        vec![
            Position(DVec2::ZERO).into(),
            weapon(25.0, 50.0).into(),
            stats(StatBlock {
                attack: 10.0,
                ..StatBlock::default()
            }),
            Team(1).into(),
            Health::full(100).into(),
        ]
    }

    fn target_b() -> Vec<Component> {
        vec![
            Position(DVec2::new(10.0, 0.0)).into(),
            Health::full(50).into(),
            stats(StatBlock {
                defense: 5.0,
                ..StatBlock::default()
            }),
            Team(2).into(),
        ]
    }

    #[test]
    fn when_two_attacks_land_then_target_dies_once_with_damage_thirty_each() {
        let mut arena = Arena::new();
        let a = arena.spawn(attacker_a());
        let b = arena.spawn(target_b());

        assert!(arena.attack(a, b));
        assert_eq!(arena.health(b), 20);

        assert!(arena.attack(a, b));
        assert_eq!(arena.health(b), 0);
        assert_eq!(arena.deaths(), 1);

        // A corpse is never a valid target, so no second death.
        assert!(!arena.attack(a, b));
        assert_eq!(arena.deaths(), 1);

        let damage: Vec<i32> = arena
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Damage { amount, .. } => Some(*amount),
                _ => None,
            })
            .collect();
        assert_eq!(damage, vec![30, 30]);
    }

    #[test]
    fn when_target_is_dead_then_attack_fails_without_touching_health() {
        let mut arena = Arena::new();
        let a = arena.spawn(attacker_a());
        let mut corpse = target_b();
        corpse.push(Dead::default().into());
        let e = arena.spawn(corpse);

        assert!(!arena.attack(a, e));
        assert_eq!(arena.health(e), 50);
    }

    #[test]
    fn when_attacker_is_dead_then_attack_fails() {
        let mut arena = Arena::new();
        let mut dead = attacker_a();
        dead.push(Dead::default().into());
        let d = arena.spawn(dead);
        let t = arena.spawn(target_b());

        assert!(!arena.attack(d, t));
        assert_eq!(arena.health(t), 50);
    }

    #[test]
    fn when_cooldown_has_not_elapsed_then_attack_fails() {
        let mut arena = Arena::new();
        let mut components = attacker_a();
        components[1] = Attack {
            cooldown: 1.0,
            ..weapon(25.0, 50.0)
        }
        .into();
        let a = arena.spawn(components);
        let b = arena.spawn(target_b());

        assert!(arena.attack(a, b));
        let cooldown = arena
            .store
            .get(a)
            .and_then(|e| e.get::<Attack>())
            .map(|a| a.cooldown_remaining);
        assert_eq!(cooldown, Some(1.0));
        assert!(!arena.attack(a, b));
        assert_eq!(arena.health(b), 20);
    }

    #[test]
    fn when_target_is_out_of_range_then_miss_event_is_emitted() {
        let mut arena = Arena::new();
        let a = arena.spawn(attacker_a());
        let mut far = target_b();
        far[0] = Position(DVec2::new(51.0, 0.0)).into();
        let b = arena.spawn(far);

        assert!(!arena.attack(a, b));
        assert!(arena.events.iter().any(|e| matches!(
            e,
            SimEvent::Miss {
                reason: MissReason::OutOfRange,
                ..
            }
        )));
    }

    #[test]
    fn when_override_position_is_in_range_then_live_position_is_ignored() {
        let mut arena = Arena::new();
        let a = arena.spawn(attacker_a());
        let mut far = target_b();
        far[0] = Position(DVec2::new(500.0, 0.0)).into();
        let b = arena.spawn(far);

        let result = resolve_attack(
            &mut arena.store,
            &mut arena.rng,
            &mut arena.events,
            0,
            a,
            b,
            Some(DVec2::new(20.0, 0.0)),
        );
        assert_eq!(result.map(|r| r.amount), Ok(30));
    }

    #[test]
    fn when_teams_match_then_attack_is_rejected() {
        let mut arena = Arena::new();
        let a = arena.spawn(attacker_a());
        let mut ally = target_b();
        ally[3] = Team(1).into();
        let b = arena.spawn(ally);

        assert!(!arena.attack(a, b));
    }

    #[test]
    fn when_target_always_evades_then_attack_misses_and_costs_cooldown() {
        let mut arena = Arena::new();
        let mut components = attacker_a();
        components[1] = Attack {
            cooldown: 0.5,
            ..weapon(25.0, 50.0)
        }
        .into();
        let a = arena.spawn(components);
        let mut slippery = target_b();
        slippery[2] = stats(StatBlock {
            evasion: 1.0,
            ..StatBlock::default()
        });
        let b = arena.spawn(slippery);

        assert!(!arena.attack(a, b));
        assert_eq!(arena.health(b), 50);
        let ready = arena
            .store
            .get(a)
            .and_then(|e| e.get::<Attack>())
            .map(Attack::is_ready);
        assert_eq!(ready, Some(false));
    }

    #[test]
    fn when_crit_is_certain_then_raw_damage_is_multiplied_before_mitigation() {
        let mut arena = Arena::new();
        let mut components = attacker_a();
        components[2] = stats(StatBlock {
            attack: 10.0,
            crit_chance: 1.0,
            crit_multiplier: 2.0,
            ..StatBlock::default()
        });
        let a = arena.spawn(components);
        let b = arena.spawn(vec![
            Position(DVec2::new(10.0, 0.0)).into(),
            Health::full(500).into(),
            stats(StatBlock {
                defense: 5.0,
                ..StatBlock::default()
            }),
        ]);

        assert!(arena.attack(a, b));
        assert_eq!(arena.health(b), 500 - 65);
    }

    #[test]
    fn magical_attacks_use_magic_stats_and_resistance() {
        let attack = Attack {
            magical: true,
            damage_type: DamageType::Fire,
            ..weapon(10.0, 1.0)
        };
        let attacker = StatBlock {
            attack: 1000.0,
            magic_power: 30.0,
            ..StatBlock::default()
        };
        let mut target = Stats::new(StatBlock {
            defense: 1000.0,
            magic_defense: 20.0,
            ..StatBlock::default()
        });
        target.add_modifier(StatModifier::flat(
            "robe",
            StatKind::Resistance(DamageType::Fire),
            0.5,
        ));

        assert_eq!(compute_damage(&attack, &attacker, target.effective(), false), 10);
    }

    #[test]
    fn damage_never_drops_below_one() {
        let attack = weapon(1.0, 1.0);
        let attacker = StatBlock::default();
        let cases = [
            StatBlock {
                defense: 1_000.0,
                ..StatBlock::default()
            },
            StatBlock {
                resistances: [(DamageType::Physical, 1.0)].into_iter().collect(),
                ..StatBlock::default()
            },
            StatBlock {
                defense: f64::INFINITY,
                ..StatBlock::default()
            },
            StatBlock {
                defense: f64::NAN,
                ..StatBlock::default()
            },
        ];
        for target in cases {
            assert!(compute_damage(&attack, &attacker, &target, false) >= 1);
        }
    }
}
