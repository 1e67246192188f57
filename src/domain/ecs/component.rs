// Component records and the stable tags that identify them.

use crate::domain::ecs::EntityId;
use crate::domain::stats::{DamageType, Stats};
use crate::domain::sync::ActionFlags;
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a component type. The string form is what goes over
/// the wire and into save files, so never rename an existing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentTag {
    Position,
    Velocity,
    Health,
    Attack,
    Stats,
    Team,
    Dead,
    StatusEffects,
    Controller,
    Collider,
    Projectile,
    ContentKey,
}

impl ComponentTag {
    pub const ALL: [ComponentTag; 12] = [
        ComponentTag::Position,
        ComponentTag::Velocity,
        ComponentTag::Health,
        ComponentTag::Attack,
        ComponentTag::Stats,
        ComponentTag::Team,
        ComponentTag::Dead,
        ComponentTag::StatusEffects,
        ComponentTag::Controller,
        ComponentTag::Collider,
        ComponentTag::Projectile,
        ComponentTag::ContentKey,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ComponentTag::Position => "position",
            ComponentTag::Velocity => "velocity",
            ComponentTag::Health => "health",
            ComponentTag::Attack => "attack",
            ComponentTag::Stats => "stats",
            ComponentTag::Team => "team",
            ComponentTag::Dead => "dead",
            ComponentTag::StatusEffects => "status_effects",
            ComponentTag::Controller => "controller",
            ComponentTag::Collider => "collider",
            ComponentTag::Projectile => "projectile",
            ComponentTag::ContentKey => "content_key",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for ComponentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position(pub DVec2);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity(pub DVec2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub current: i32,
    pub max: i32,
}

impl Health {
    pub fn full(max: i32) -> Self {
        Self { current: max, max }
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0
    }
}

/// Attack capability. `cooldown_remaining` counts down to zero; an attack is
/// only allowed once it gets there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attack {
    pub damage: f64,
    pub range: f64,
    /// Seconds between attacks.
    pub cooldown: f64,
    pub cooldown_remaining: f64,
    #[serde(default)]
    pub magical: bool,
    #[serde(default)]
    pub damage_type: DamageType,
}

impl Attack {
    pub fn is_ready(&self) -> bool {
        self.cooldown_remaining <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team(pub u32);

/// Marker for entities that died. `elapsed` is seconds since death.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dead {
    pub elapsed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Damage over time; `magnitude` is damage per pulse.
    Poison,
    /// Heal over time; `magnitude` is health per pulse.
    Regeneration,
    /// Movement multiplier; `magnitude` is the fraction of speed removed.
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub kind: StatusKind,
    pub remaining: f64,
    pub magnitude: f64,
    /// Seconds between pulses for periodic effects.
    pub interval: f64,
    #[serde(default)]
    pub since_pulse: f64,
}

impl StatusEffect {
    pub fn new(kind: StatusKind, duration: f64, magnitude: f64, interval: f64) -> Self {
        Self {
            kind,
            remaining: duration,
            magnitude,
            interval,
            since_pulse: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusEffects {
    pub effects: Vec<StatusEffect>,
}

impl StatusEffects {
    /// Combined movement multiplier from all active slows, never below zero.
    pub fn speed_multiplier(&self) -> f64 {
        self.effects
            .iter()
            .filter(|e| e.kind == StatusKind::Slow)
            .fold(1.0_f64, |acc, e| acc * (1.0 - e.magnitude.clamp(0.0, 1.0)))
            .max(0.0)
    }
}

/// Hit claim that already went through lag compensation. The combat system
/// checks range against `target_position`, not the target's live position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackClaim {
    pub target: EntityId,
    pub target_position: DVec2,
}

/// Binds an entity to a remote player and carries the latest applied input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub player_id: u64,
    pub move_vector: DVec2,
    pub actions: ActionFlags,
    pub facing: DVec2,
    pub last_sequence: u64,
    #[serde(default)]
    pub pending_attack: Option<AttackClaim>,
    #[serde(default)]
    pub fire_requested: bool,
}

impl Controller {
    pub fn new(player_id: u64) -> Self {
        Self {
            player_id,
            move_vector: DVec2::ZERO,
            actions: ActionFlags::NONE,
            facing: DVec2::Y,
            last_sequence: 0,
            pending_attack: None,
            fire_requested: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub owner: EntityId,
    pub damage: f64,
    pub ttl: f64,
    pub radius: f64,
}

/// Stable key assigned by content generation; lets saves diff against the
/// deterministic baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentKey(pub String);

/// Closed set of component records, tagged on the wire by `ComponentTag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Component {
    Position(Position),
    Velocity(Velocity),
    Health(Health),
    Attack(Attack),
    Stats(Stats),
    Team(Team),
    Dead(Dead),
    StatusEffects(StatusEffects),
    Controller(Controller),
    Collider(Collider),
    Projectile(Projectile),
    ContentKey(ContentKey),
}

impl Component {
    pub fn tag(&self) -> ComponentTag {
        match self {
            Component::Position(_) => ComponentTag::Position,
            Component::Velocity(_) => ComponentTag::Velocity,
            Component::Health(_) => ComponentTag::Health,
            Component::Attack(_) => ComponentTag::Attack,
            Component::Stats(_) => ComponentTag::Stats,
            Component::Team(_) => ComponentTag::Team,
            Component::Dead(_) => ComponentTag::Dead,
            Component::StatusEffects(_) => ComponentTag::StatusEffects,
            Component::Controller(_) => ComponentTag::Controller,
            Component::Collider(_) => ComponentTag::Collider,
            Component::Projectile(_) => ComponentTag::Projectile,
            Component::ContentKey(_) => ComponentTag::ContentKey,
        }
    }
}

/// Typed access to one variant of `Component`.
pub trait ComponentKind: Sized {
    const TAG: ComponentTag;

    fn from_component(component: &Component) -> Option<&Self>;
    fn from_component_mut(component: &mut Component) -> Option<&mut Self>;
    fn from_owned(component: Component) -> Option<Self>;
    fn into_component(self) -> Component;
}

macro_rules! component_kind {
    ($($ty:ident),* $(,)?) => {
        $(
            impl ComponentKind for $ty {
                const TAG: ComponentTag = ComponentTag::$ty;

                fn from_component(component: &Component) -> Option<&Self> {
                    match component {
                        Component::$ty(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_component_mut(component: &mut Component) -> Option<&mut Self> {
                    match component {
                        Component::$ty(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn from_owned(component: Component) -> Option<Self> {
                    match component {
                        Component::$ty(inner) => Some(inner),
                        _ => None,
                    }
                }

                fn into_component(self) -> Component {
                    Component::$ty(self)
                }
            }

            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Component::$ty(value)
                }
            }
        )*
    };
}

component_kind!(
    Position,
    Velocity,
    Health,
    Attack,
    Stats,
    Team,
    Dead,
    StatusEffects,
    Controller,
    Collider,
    Projectile,
    ContentKey,
);
