// Versioned save files: generation seed + params plus whatever diverged from
// the deterministic baseline. Never a full world dump.

use crate::domain::content::{ContentGenerator, GenerationParams, ParamsError};
use crate::domain::ecs::component::{Component, ContentKey};
use crate::domain::ecs::{ComponentTag, World, WorldConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

pub const SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityDelta {
    /// A generated entity that no longer exists.
    Removed { key: String },
    /// A generated entity whose components changed; holds the full new set.
    Modified {
        key: String,
        components: Vec<Component>,
    },
    /// An entity that is not part of the generated content.
    Spawned { components: Vec<Component> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    pub schema_version: u64,
    pub seed: i64,
    pub params: GenerationParams,
    pub divergence: Vec<EntityDelta>,
}

#[derive(Debug)]
pub enum SaveError {
    Json(serde_json::Error),
    MissingVersion,
    UnsupportedVersion(u64),
    InvalidParams(ParamsError),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Json(err) => write!(f, "invalid save data: {err}"),
            SaveError::MissingVersion => f.write_str("save has no schema_version"),
            SaveError::UnsupportedVersion(v) => write!(f, "unsupported save schema version {v}"),
            SaveError::InvalidParams(err) => write!(f, "invalid generation params: {err}"),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Json(err) => Some(err),
            SaveError::InvalidParams(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SaveError {
    fn from(err: serde_json::Error) -> Self {
        SaveError::Json(err)
    }
}

/// Sessions and in-flight shots are transient and never saved.
fn is_transient(components: &BTreeMap<ComponentTag, &Component>) -> bool {
    components.contains_key(&ComponentTag::Controller)
        || components.contains_key(&ComponentTag::Projectile)
}

impl SaveGame {
    /// Diffs the live world against the content regenerated from
    /// `(seed, params)`.
    pub fn capture(
        world: &World,
        seed: i64,
        params: &GenerationParams,
        generator: &dyn ContentGenerator,
    ) -> Self {
        let baseline: BTreeMap<String, Vec<Component>> = generator
            .generate(seed, params)
            .entities()
            .map(|(key, components)| (key.to_owned(), components))
            .collect();

        let mut divergence = Vec::new();
        let mut seen = BTreeSet::new();
        for entity in world.entities() {
            let components: BTreeMap<ComponentTag, &Component> =
                entity.components().map(|c| (c.tag(), c)).collect();
            if is_transient(&components) {
                continue;
            }
            let current: Vec<Component> = components.into_values().cloned().collect();

            match entity.get::<ContentKey>().map(|k| k.0.clone()) {
                Some(key) if baseline.contains_key(&key) => {
                    let unchanged = baseline.get(&key).is_some_and(|base| {
                        let mut base = base.clone();
                        base.sort_by_key(Component::tag);
                        base == current
                    });
                    if !unchanged {
                        divergence.push(EntityDelta::Modified {
                            key: key.clone(),
                            components: current,
                        });
                    }
                    seen.insert(key);
                }
                _ => divergence.push(EntityDelta::Spawned {
                    components: current,
                }),
            }
        }
        for key in baseline.keys().filter(|k| !seen.contains(*k)) {
            divergence.push(EntityDelta::Removed { key: key.clone() });
        }

        Self {
            schema_version: SCHEMA_VERSION,
            seed,
            params: params.clone(),
            divergence,
        }
    }

    /// Rebuilds a world from the seed and replays the divergence. No systems
    /// are registered; every entity is live on return.
    pub fn restore(&self, generator: &dyn ContentGenerator) -> World {
        let mut world = World::new(WorldConfig {
            seed: self.seed as u64,
        });

        let mut removed = BTreeSet::new();
        let mut modified = BTreeMap::new();
        let mut spawned = Vec::new();
        for delta in &self.divergence {
            match delta {
                EntityDelta::Removed { key } => {
                    removed.insert(key.as_str());
                }
                EntityDelta::Modified { key, components } => {
                    modified.insert(key.as_str(), components);
                }
                EntityDelta::Spawned { components } => spawned.push(components),
            }
        }

        let content = generator.generate(self.seed, &self.params);
        for (key, components) in content.entities() {
            if removed.contains(key) {
                continue;
            }
            match modified.get(key) {
                Some(saved) => world.spawn(saved.iter().cloned()),
                None => world.spawn(components),
            };
        }
        for components in spawned {
            world.spawn(components.iter().cloned());
        }

        world.update(0.0);
        info!(
            seed = self.seed,
            entities = world.entities().count(),
            divergence = self.divergence.len(),
            "world restored"
        );
        world
    }

    pub fn to_json(&self) -> Result<String, SaveError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses any supported schema version, migrating older ones.
    pub fn from_json(raw: &str) -> Result<Self, SaveError> {
        let value: Value = serde_json::from_str(raw)?;
        let version = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or(SaveError::MissingVersion)?;

        let save: SaveGame = match version {
            SCHEMA_VERSION => serde_json::from_value(value)?,
            1 => {
                info!("migrating save from schema version 1");
                serde_json::from_value(migrate_v1(value)?)?
            }
            other => return Err(SaveError::UnsupportedVersion(other)),
        };
        save.params.validate().map_err(SaveError::InvalidParams)?;
        Ok(save)
    }
}

/// v1 saves had no params and called the divergence list `entities`.
fn migrate_v1(mut value: Value) -> Result<Value, SaveError> {
    if let Some(object) = value.as_object_mut() {
        if let Some(entities) = object.remove("entities") {
            object.insert("divergence".to_owned(), entities);
        }
        if !object.contains_key("params") {
            object.insert(
                "params".to_owned(),
                serde_json::to_value(GenerationParams::default())?,
            );
        }
        object.insert("schema_version".to_owned(), Value::from(SCHEMA_VERSION));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::SeededArenaGenerator;
    use crate::domain::ecs::component::{Controller, Dead, Health, Position};
    use crate::domain::ecs::EntityId;
    use glam::DVec2;
    use serde_json::json;

    fn fresh_world(seed: i64, params: &GenerationParams) -> (World, Vec<EntityId>) {
        let mut world = World::new(WorldConfig { seed: seed as u64 });
        let ids = SeededArenaGenerator
            .generate(seed, params)
            .spawn_into(&mut world);
        world.update(0.0);
        (world, ids)
    }

    #[test]
    fn untouched_world_saves_no_divergence() {
        let params = GenerationParams::default();
        let (world, _) = fresh_world(11, &params);

        let save = SaveGame::capture(&world, 11, &params, &SeededArenaGenerator);
        assert!(save.divergence.is_empty());
        assert_eq!(save.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn when_world_diverges_then_save_restores_same_entities() {
        let params = GenerationParams::default();
        let (mut world, ids) = fresh_world(11, &params);

        world.remove_entity(ids[0]).expect("live monster");
        world
            .insert_component(ids[1], Dead::default())
            .expect("live monster");
        world
            .insert_component(ids[1], Health { current: 0, max: 50 })
            .expect("live monster");
        world.spawn([Position(DVec2::new(1.0, 1.0)).into(), Health::full(3).into()]);
        world.spawn([Position(DVec2::ZERO).into(), Controller::new(1).into()]);
        world.update(0.0);

        let save = SaveGame::capture(&world, 11, &params, &SeededArenaGenerator);
        assert_eq!(save.divergence.len(), 3);
        assert!(save
            .divergence
            .iter()
            .any(|d| matches!(d, EntityDelta::Removed { key } if key == "monster-000")));

        let json = save.to_json().expect("serialize save");
        let loaded = SaveGame::from_json(&json).expect("parse save");
        let restored = loaded.restore(&SeededArenaGenerator);

        // Player sessions are not persisted.
        assert_eq!(restored.entities().count(), world.entities().count() - 1);
        assert_eq!(
            SaveGame::capture(&restored, 11, &params, &SeededArenaGenerator).divergence,
            loaded.divergence
        );
        let dead = restored
            .entities()
            .filter(|e| e.has(ComponentTag::Dead))
            .count();
        assert_eq!(dead, 1);
    }

    #[test]
    fn version_one_saves_are_migrated() {
        let raw = json!({
            "schema_version": 1,
            "seed": 4,
            "entities": [{ "kind": "removed", "key": "monster-001" }]
        })
        .to_string();

        let save = SaveGame::from_json(&raw).expect("migrated save");
        assert_eq!(save.schema_version, SCHEMA_VERSION);
        assert_eq!(save.params, GenerationParams::default());
        assert_eq!(
            save.divergence,
            vec![EntityDelta::Removed {
                key: "monster-001".to_owned()
            }]
        );
    }

    #[test]
    fn unknown_or_missing_versions_are_rejected() {
        let future = json!({ "schema_version": 9, "seed": 1 }).to_string();
        assert!(matches!(
            SaveGame::from_json(&future),
            Err(SaveError::UnsupportedVersion(9))
        ));

        let unversioned = json!({ "seed": 1, "divergence": [] }).to_string();
        assert!(matches!(
            SaveGame::from_json(&unversioned),
            Err(SaveError::MissingVersion)
        ));
        assert!(matches!(SaveGame::from_json("{"), Err(SaveError::Json(_))));
    }

    #[test]
    fn when_saved_params_cannot_be_generated_then_load_fails() {
        let overflowing = json!({
            "schema_version": 2,
            "seed": 1,
            "params": { "arena_min": [-1e308, 0.0], "arena_max": [1e308, 10.0] },
            "divergence": []
        })
        .to_string();
        assert!(matches!(
            SaveGame::from_json(&overflowing),
            Err(SaveError::InvalidParams(ParamsError::NonFinite(_)))
        ));

        let crowded = json!({
            "schema_version": 2,
            "seed": 1,
            "params": { "monster_count": 4_000_000_000_u64 },
            "divergence": []
        })
        .to_string();
        assert!(matches!(
            SaveGame::from_json(&crowded),
            Err(SaveError::InvalidParams(ParamsError::TooManyMonsters { .. }))
        ));
    }
}
