use crate::domain::ecs::component::{Component, ComponentKind, ComponentTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque entity handle. Ids are never reused within one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An id plus at most one component per tag. No behavior of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    components: BTreeMap<ComponentTag, Component>,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            components: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn get<T: ComponentKind>(&self) -> Option<&T> {
        self.components.get(&T::TAG).and_then(T::from_component)
    }

    pub fn get_mut<T: ComponentKind>(&mut self) -> Option<&mut T> {
        self.components
            .get_mut(&T::TAG)
            .and_then(T::from_component_mut)
    }

    pub fn has(&self, tag: ComponentTag) -> bool {
        self.components.contains_key(&tag)
    }

    pub fn has_all(&self, tags: &[ComponentTag]) -> bool {
        tags.iter().all(|tag| self.has(*tag))
    }

    pub fn is_dead(&self) -> bool {
        self.has(ComponentTag::Dead)
    }

    /// Attaches a component, returning the one it replaced.
    pub fn insert(&mut self, component: impl Into<Component>) -> Option<Component> {
        let component = component.into();
        self.components.insert(component.tag(), component)
    }

    pub fn remove(&mut self, tag: ComponentTag) -> Option<Component> {
        self.components.remove(&tag)
    }

    pub fn take<T: ComponentKind>(&mut self) -> Option<T> {
        self.components.remove(&T::TAG).and_then(T::from_owned)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn tags(&self) -> impl Iterator<Item = ComponentTag> + '_ {
        self.components.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::component::{Dead, Health, Position};
    use glam::DVec2;

    #[test]
    fn insert_replaces_component_with_same_tag() {
        let mut entity = Entity::new(EntityId(1));
        assert!(entity.insert(Health::full(10)).is_none());
        let replaced = entity.insert(Health::full(20));

        assert_eq!(replaced, Some(Component::Health(Health::full(10))));
        assert_eq!(entity.get::<Health>(), Some(&Health::full(20)));
        assert_eq!(entity.components().count(), 1);
    }

    #[test]
    fn typed_access_reads_and_mutates() {
        let mut entity = Entity::new(EntityId(7));
        entity.insert(Position(DVec2::new(1.0, 2.0)));

        entity.get_mut::<Position>().expect("position").0.x = 5.0;

        assert_eq!(entity.get::<Position>().map(|p| p.0), Some(DVec2::new(5.0, 2.0)));
        assert!(entity.get::<Health>().is_none());
    }

    #[test]
    fn take_removes_and_returns_owned_component() {
        let mut entity = Entity::new(EntityId(3));
        entity.insert(Dead::default());
        assert!(entity.is_dead());

        assert_eq!(entity.take::<Dead>(), Some(Dead::default()));
        assert!(!entity.is_dead());
        assert_eq!(entity.take::<Dead>(), None);
    }

    #[test]
    fn has_all_requires_every_tag() {
        let mut entity = Entity::new(EntityId(2));
        entity.insert(Health::full(5));
        assert!(entity.has_all(&[ComponentTag::Health]));
        assert!(!entity.has_all(&[ComponentTag::Health, ComponentTag::Position]));
        assert!(entity.has_all(&[]));
    }
}
