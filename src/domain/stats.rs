// Character stats kept as immutable base values plus modifier layers.
//
// `effective` is always derived from `base` and the modifier list. Nothing
// multiplies into a previously modified value, so re-applying an item or skill
// bonus cannot compound.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    #[default]
    Physical,
    Fire,
    Ice,
    Lightning,
    Poison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Attack,
    Defense,
    MagicPower,
    MagicDefense,
    CritChance,
    CritMultiplier,
    Evasion,
    MoveSpeed,
    Resistance(DamageType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatBlock {
    pub attack: f64,
    pub defense: f64,
    pub magic_power: f64,
    pub magic_defense: f64,
    /// Probability in `0.0..=1.0`.
    pub crit_chance: f64,
    pub crit_multiplier: f64,
    /// Probability in `0.0..=1.0`.
    pub evasion: f64,
    pub move_speed: f64,
    #[serde(default)]
    pub resistances: BTreeMap<DamageType, f64>,
}

impl Default for StatBlock {
    fn default() -> Self {
        Self {
            attack: 0.0,
            defense: 0.0,
            magic_power: 0.0,
            magic_defense: 0.0,
            crit_chance: 0.0,
            crit_multiplier: 2.0,
            evasion: 0.0,
            move_speed: 0.0,
            resistances: BTreeMap::new(),
        }
    }
}

impl StatBlock {
    /// Resistance fraction for a damage type, clamped to `-1.0..=1.0`.
    pub fn resistance(&self, damage_type: DamageType) -> f64 {
        self.resistances
            .get(&damage_type)
            .copied()
            .unwrap_or(0.0)
            .clamp(-1.0, 1.0)
    }

    pub fn get(&self, kind: StatKind) -> f64 {
        match kind {
            StatKind::Attack => self.attack,
            StatKind::Defense => self.defense,
            StatKind::MagicPower => self.magic_power,
            StatKind::MagicDefense => self.magic_defense,
            StatKind::CritChance => self.crit_chance,
            StatKind::CritMultiplier => self.crit_multiplier,
            StatKind::Evasion => self.evasion,
            StatKind::MoveSpeed => self.move_speed,
            StatKind::Resistance(t) => self.resistances.get(&t).copied().unwrap_or(0.0),
        }
    }

    pub fn set(&mut self, kind: StatKind, value: f64) {
        match kind {
            StatKind::Attack => self.attack = value,
            StatKind::Defense => self.defense = value,
            StatKind::MagicPower => self.magic_power = value,
            StatKind::MagicDefense => self.magic_defense = value,
            StatKind::CritChance => self.crit_chance = value,
            StatKind::CritMultiplier => self.crit_multiplier = value,
            StatKind::Evasion => self.evasion = value,
            StatKind::MoveSpeed => self.move_speed = value,
            StatKind::Resistance(t) => {
                self.resistances.insert(t, value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    /// Added to the base value.
    Flat,
    /// Fraction applied after flats, e.g. `0.1` for +10%.
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatModifier {
    /// Equipment slot, skill id, buff name...
    pub source: String,
    pub stat: StatKind,
    pub kind: ModifierKind,
    pub value: f64,
}

impl StatModifier {
    pub fn flat(source: impl Into<String>, stat: StatKind, value: f64) -> Self {
        Self {
            source: source.into(),
            stat,
            kind: ModifierKind::Flat,
            value,
        }
    }

    pub fn percent(source: impl Into<String>, stat: StatKind, value: f64) -> Self {
        Self {
            source: source.into(),
            stat,
            kind: ModifierKind::Percent,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StatsRecord {
    base: StatBlock,
    #[serde(default)]
    modifiers: Vec<StatModifier>,
}

/// Base stats, the active modifiers and the derived effective values.
/// Only `base` and `modifiers` are persisted; `effective` is rebuilt on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StatsRecord", into = "StatsRecord")]
pub struct Stats {
    base: StatBlock,
    modifiers: Vec<StatModifier>,
    effective: StatBlock,
}

impl From<StatsRecord> for Stats {
    fn from(record: StatsRecord) -> Self {
        let mut stats = Stats::new(record.base);
        stats.modifiers = record.modifiers;
        stats.recompute();
        stats
    }
}

impl From<Stats> for StatsRecord {
    fn from(stats: Stats) -> Self {
        Self {
            base: stats.base,
            modifiers: stats.modifiers,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(StatBlock::default())
    }
}

impl Stats {
    pub fn new(base: StatBlock) -> Self {
        Self {
            effective: base.clone(),
            base,
            modifiers: Vec::new(),
        }
    }

    pub fn base(&self) -> &StatBlock {
        &self.base
    }

    pub fn effective(&self) -> &StatBlock {
        &self.effective
    }

    pub fn modifiers(&self) -> &[StatModifier] {
        &self.modifiers
    }

    pub fn set_base(&mut self, base: StatBlock) {
        self.base = base;
        self.recompute();
    }

    /// Adds a modifier. A modifier with the same source, stat and kind is
    /// replaced rather than stacked.
    pub fn add_modifier(&mut self, modifier: StatModifier) {
        self.modifiers.retain(|m| {
            !(m.source == modifier.source && m.stat == modifier.stat && m.kind == modifier.kind)
        });
        self.modifiers.push(modifier);
        self.recompute();
    }

    /// Drops every modifier from `source`, returning how many were removed.
    pub fn remove_modifiers(&mut self, source: &str) -> usize {
        let before = self.modifiers.len();
        self.modifiers.retain(|m| m.source != source);
        let removed = before - self.modifiers.len();
        if removed > 0 {
            self.recompute();
        }
        removed
    }

    fn recompute(&mut self) {
        let mut effective = self.base.clone();
        let mut touched: Vec<StatKind> = Vec::new();
        for m in &self.modifiers {
            if !touched.contains(&m.stat) {
                touched.push(m.stat);
            }
        }

        for stat in touched {
            let (flat, percent) = self
                .modifiers
                .iter()
                .filter(|m| m.stat == stat)
                .fold((0.0, 0.0), |(flat, percent), m| match m.kind {
                    ModifierKind::Flat => (flat + m.value, percent),
                    ModifierKind::Percent => (flat, percent + m.value),
                });
            let value = (self.base.get(stat) + flat) * (1.0 + percent);
            effective.set(stat, value);
        }

        self.effective = effective;
    }
}
