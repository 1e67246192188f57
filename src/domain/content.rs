// Deterministic world content. The same seed and params always produce the
// same content, so saves only need to store what diverged from it.

use crate::domain::ecs::component::{
    Collider, Component, ContentKey, Health, Position, Team, Velocity,
};
use crate::domain::ecs::{EntityId, World};
use crate::domain::stats::{StatBlock, Stats};
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Team shared by generated monsters so they never damage each other.
pub const MONSTER_TEAM: u32 = 0;

/// Upper bound on generated monsters per world.
pub const MAX_MONSTER_COUNT: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub monster_count: u32,
    pub arena_min: DVec2,
    pub arena_max: DVec2,
    pub monster_hp: (i32, i32),
    pub monster_defense: (f64, f64),
    pub monster_radius: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            monster_count: 8,
            arena_min: DVec2::new(-380.0, -210.0),
            arena_max: DVec2::new(380.0, 210.0),
            monster_hp: (40, 80),
            monster_defense: (0.0, 4.0),
            monster_radius: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamsError {
    TooManyMonsters { count: u32, max: u32 },
    // Bounds or spans that are not finite.
    NonFinite(&'static str),
    NegativeRadius(f64),
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsError::TooManyMonsters { count, max } => {
                write!(f, "monster_count {count} exceeds the maximum of {max}")
            }
            ParamsError::NonFinite(field) => write!(f, "{field} must be finite"),
            ParamsError::NegativeRadius(r) => write!(f, "monster_radius {r} is negative"),
        }
    }
}

impl std::error::Error for ParamsError {}

// Finite ends alone are not enough: the distance between them must fit in an f64.
fn finite_span(lo: f64, hi: f64) -> bool {
    lo.is_finite() && hi.is_finite() && (hi - lo).is_finite()
}

impl GenerationParams {
    /// Rejects params the generator cannot sample from.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.monster_count > MAX_MONSTER_COUNT {
            return Err(ParamsError::TooManyMonsters {
                count: self.monster_count,
                max: MAX_MONSTER_COUNT,
            });
        }
        let (min, max) = (self.arena_min, self.arena_max);
        if !finite_span(min.x, max.x) || !finite_span(min.y, max.y) {
            return Err(ParamsError::NonFinite("arena bounds"));
        }
        if !finite_span(self.monster_defense.0, self.monster_defense.1) {
            return Err(ParamsError::NonFinite("monster_defense"));
        }
        if !self.monster_radius.is_finite() {
            return Err(ParamsError::NonFinite("monster_radius"));
        }
        if self.monster_radius < 0.0 {
            return Err(ParamsError::NegativeRadius(self.monster_radius));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterSpawn {
    /// Stable across regenerations; used to match saves against the baseline.
    pub key: String,
    pub position: DVec2,
    pub health: i32,
    pub defense: f64,
    pub radius: f64,
}

impl MonsterSpawn {
    pub fn components(&self) -> Vec<Component> {
        vec![
            Position(self.position).into(),
            Velocity(DVec2::ZERO).into(),
            Health::full(self.health).into(),
            Stats::new(StatBlock {
                defense: self.defense,
                ..StatBlock::default()
            })
            .into(),
            Team(MONSTER_TEAM).into(),
            Collider {
                radius: self.radius,
            }
            .into(),
            ContentKey(self.key.clone()).into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub seed: i64,
    pub monsters: Vec<MonsterSpawn>,
}

impl GeneratedContent {
    /// Baseline entities as `(key, components)` in generation order.
    pub fn entities(&self) -> impl Iterator<Item = (&str, Vec<Component>)> + '_ {
        self.monsters
            .iter()
            .map(|m| (m.key.as_str(), m.components()))
    }

    /// Queues every generated entity. They are live after the next update.
    pub fn spawn_into(&self, world: &mut World) -> Vec<EntityId> {
        self.entities()
            .map(|(_, components)| world.spawn(components))
            .collect()
    }
}

/// Collaborator invoked once at world initialization. Implementations must be
/// deterministic in `(seed, params)` and may assume `params.validate()` passed.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, seed: i64, params: &GenerationParams) -> GeneratedContent;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeededArenaGenerator;

impl ContentGenerator for SeededArenaGenerator {
    fn generate(&self, seed: i64, params: &GenerationParams) -> GeneratedContent {
        let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
        let (lo, hi) = (params.arena_min.min(params.arena_max), params.arena_min.max(params.arena_max));
        let (hp_lo, hp_hi) = ordered(params.monster_hp.0.max(1), params.monster_hp.1.max(1));
        let (def_lo, def_hi) = ordered_f64(params.monster_defense.0, params.monster_defense.1);

        let monsters = (0..params.monster_count)
            .map(|idx| MonsterSpawn {
                key: format!("monster-{idx:03}"),
                position: DVec2::new(
                    rng.gen_range(lo.x..=hi.x),
                    rng.gen_range(lo.y..=hi.y),
                ),
                health: rng.gen_range(hp_lo..=hp_hi),
                defense: rng.gen_range(def_lo..=def_hi),
                radius: params.monster_radius,
            })
            .collect();

        GeneratedContent { seed, monsters }
    }
}

fn ordered(a: i32, b: i32) -> (i32, i32) {
    (a.min(b), a.max(b))
}

fn ordered_f64(a: f64, b: f64) -> (f64, f64) {
    (a.min(b), a.max(b))
}
