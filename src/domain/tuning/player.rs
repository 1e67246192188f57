use crate::domain::ecs::component::{
    Attack, Collider, Component, Controller, Health, Position, Velocity,
};
use crate::domain::stats::{DamageType, StatBlock, Stats};
use glam::DVec2;

/// Gameplay tuning for player-controlled characters.
///
/// Keep this separate from runtime/server configuration (tick rates, buffer sizes, etc.).
#[derive(Debug, Clone, Copy)]
pub struct PlayerTuning {
    /// Maximum movement speed in world units per second.
    pub max_speed: f64,

    /// World-space collision radius (server-side hit checks).
    pub radius: f64,

    pub max_hp: i32,

    /// Seconds a dead player waits before respawning.
    pub respawn_seconds: f64,

    /// Melee weapon damage, added to the attack stat.
    pub attack_damage: f64,

    pub attack_range: f64,

    /// Seconds between melee attacks.
    pub attack_cooldown: f64,

    pub base_attack: f64,
    pub base_defense: f64,
    pub crit_chance: f64,
    pub crit_multiplier: f64,
}

impl Default for PlayerTuning {
    fn default() -> Self {
        Self {
            max_speed: 150.0,
            radius: 24.0,
            max_hp: 100,
            respawn_seconds: 3.0,
            attack_damage: 25.0,
            attack_range: 60.0,
            attack_cooldown: 0.5,
            base_attack: 10.0,
            base_defense: 5.0,
            crit_chance: 0.1,
            crit_multiplier: 1.5,
        }
    }
}

impl PlayerTuning {
    pub fn base_stats(&self) -> StatBlock {
        StatBlock {
            attack: self.base_attack,
            defense: self.base_defense,
            crit_chance: self.crit_chance,
            crit_multiplier: self.crit_multiplier,
            move_speed: self.max_speed,
            ..StatBlock::default()
        }
    }

    pub fn melee(&self) -> Attack {
        Attack {
            damage: self.attack_damage,
            range: self.attack_range,
            cooldown: self.attack_cooldown,
            cooldown_remaining: 0.0,
            magical: false,
            damage_type: DamageType::Physical,
        }
    }

    /// Components of a freshly joined player-controlled entity.
    pub fn bundle(&self, player_id: u64, position: DVec2) -> Vec<Component> {
        vec![
            Position(position).into(),
            Velocity(DVec2::ZERO).into(),
            Health::full(self.max_hp).into(),
            Stats::new(self.base_stats()).into(),
            self.melee().into(),
            Collider {
                radius: self.radius,
            }
            .into(),
            Controller::new(player_id).into(),
        ]
    }
}
