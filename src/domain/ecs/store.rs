// Arena of live entities plus the deferred add/remove queues.

use crate::domain::ecs::component::{Component, ComponentTag};
use crate::domain::ecs::entity::{Entity, EntityId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Structural errors. Callers inside a tick treat these as "skip and move on".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldError {
    NotFound(EntityId),
    MissingComponent { id: EntityId, tag: ComponentTag },
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldError::NotFound(id) => write!(f, "entity {id} not found"),
            WorldError::MissingComponent { id, tag } => {
                write!(f, "entity {id} has no {tag} component")
            }
        }
    }
}

impl std::error::Error for WorldError {}

/// Owns every entity. Creations and removals are queued and only become
/// visible when the world flushes them at the tick boundaries.
#[derive(Debug)]
pub struct EntityStore {
    live: BTreeMap<EntityId, Entity>,
    pending_add: Vec<Entity>,
    pending_remove: BTreeSet<EntityId>,
    next_id: u64,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            pending_add: Vec::new(),
            pending_remove: BTreeSet::new(),
            next_id: 1,
        }
    }

    /// Queues a new empty entity. The id can receive components right away.
    pub fn create(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.pending_add.push(Entity::new(id));
        id
    }

    pub fn spawn(&mut self, components: impl IntoIterator<Item = Component>) -> EntityId {
        let id = self.create();
        if let Some(entity) = self.pending_add.last_mut() {
            for component in components {
                entity.insert(component);
            }
        }
        id
    }

    pub fn insert_component(
        &mut self,
        id: EntityId,
        component: impl Into<Component>,
    ) -> Result<Option<Component>, WorldError> {
        let entity = self.any_mut(id).ok_or(WorldError::NotFound(id))?;
        Ok(entity.insert(component))
    }

    pub fn remove_component(
        &mut self,
        id: EntityId,
        tag: ComponentTag,
    ) -> Result<Component, WorldError> {
        let entity = self.any_mut(id).ok_or(WorldError::NotFound(id))?;
        entity
            .remove(tag)
            .ok_or(WorldError::MissingComponent { id, tag })
    }

    /// Queues a removal. Removing an entity that was never flushed drops it
    /// from the add queue instead.
    pub fn queue_remove(&mut self, id: EntityId) -> Result<(), WorldError> {
        if self.pending_remove.contains(&id) {
            return Err(WorldError::NotFound(id));
        }
        if self.live.contains_key(&id) {
            self.pending_remove.insert(id);
            return Ok(());
        }
        let before = self.pending_add.len();
        self.pending_add.retain(|e| e.id() != id);
        if self.pending_add.len() < before {
            Ok(())
        } else {
            Err(WorldError::NotFound(id))
        }
    }

    /// Live entity lookup. Entities already queued for removal resolve to
    /// `None` so stale handles held by later systems become no-ops.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        if self.pending_remove.contains(&id) {
            return None;
        }
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.pending_remove.contains(&id) {
            return None;
        }
        self.live.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.live
            .values()
            .filter(|e| !self.pending_remove.contains(&e.id()))
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.iter().map(Entity::id).collect()
    }

    /// Ids of live entities carrying every tag in `required`, ascending.
    pub fn query(&self, required: &[ComponentTag]) -> Vec<EntityId> {
        self.iter()
            .filter(|e| e.has_all(required))
            .map(Entity::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live.len() - self.pending_remove.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_additions(&self) -> usize {
        self.pending_add.len()
    }

    pub fn pending_removals(&self) -> usize {
        self.pending_remove.len()
    }

    pub(crate) fn flush_additions(&mut self) -> usize {
        let added = self.pending_add.len();
        for entity in self.pending_add.drain(..) {
            self.live.insert(entity.id(), entity);
        }
        added
    }

    pub(crate) fn flush_removals(&mut self) -> usize {
        let mut removed = 0;
        for id in std::mem::take(&mut self.pending_remove) {
            if self.live.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn any_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        if self.pending_remove.contains(&id) {
            return None;
        }
        if let Some(entity) = self.live.get_mut(&id) {
            return Some(entity);
        }
        self.pending_add.iter_mut().find(|e| e.id() == id)
    }
}
