// Immutable world captures and the bounded history that keeps them.

use crate::domain::ecs::component::{Health, Position, Velocity};
use crate::domain::ecs::{EntityId, World};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Networked state of one entity at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub position: DVec2,
    pub velocity: DVec2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(default)]
    pub dead: bool,
}

/// Point-in-time capture of every positioned entity, sorted by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    /// Server clock in seconds.
    pub timestamp: f64,
    pub entities: Vec<EntityState>,
}

impl Snapshot {
    pub fn capture(world: &World, timestamp: f64) -> Self {
        let entities = world
            .entities()
            .filter_map(|entity| {
                let position = entity.get::<Position>()?.0;
                Some(EntityState {
                    id: entity.id(),
                    position,
                    velocity: entity.get::<Velocity>().map(|v| v.0).unwrap_or_default(),
                    health: entity.get::<Health>().map(|h| h.current),
                    dead: entity.is_dead(),
                })
            })
            .collect();

        Self {
            tick: world.tick(),
            timestamp,
            entities,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entities[idx])
    }
}

/// Fixed-capacity FIFO; pushing into a full buffer evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns the evicted item, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn newest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapshotError {
    NonMonotonicTimestamp { last: f64, got: f64 },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::NonMonotonicTimestamp { last, got } => {
                write!(f, "snapshot timestamp {got} is not after {last}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

pub struct SnapshotRecorder {
    history: RingBuffer<Arc<Snapshot>>,
    record_every: u64,
}

impl SnapshotRecorder {
    pub fn new(capacity: usize, record_every: u64) -> Self {
        Self {
            history: RingBuffer::new(capacity),
            record_every: record_every.max(1),
        }
    }

    /// Captures the world when the current tick is due. Returns the stored
    /// snapshot, or `None` when skipped.
    pub fn record(&mut self, world: &World, timestamp: f64) -> Option<Arc<Snapshot>> {
        if world.tick() % self.record_every != 0 {
            return None;
        }
        match self.push(Snapshot::capture(world, timestamp)) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(tick = world.tick(), error = %err, "snapshot skipped");
                None
            }
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) -> Result<Arc<Snapshot>, SnapshotError> {
        if let Some(last) = self.history.newest() {
            if snapshot.timestamp <= last.timestamp {
                return Err(SnapshotError::NonMonotonicTimestamp {
                    last: last.timestamp,
                    got: snapshot.timestamp,
                });
            }
        }
        let snapshot = Arc::new(snapshot);
        self.history.push(snapshot.clone());
        Ok(snapshot)
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.history.newest().cloned()
    }

    pub fn by_tick(&self, tick: u64) -> Option<Arc<Snapshot>> {
        self.history.iter().find(|s| s.tick == tick).cloned()
    }

    /// Newest snapshot taken at or before `timestamp`.
    pub fn at_or_before(&self, timestamp: f64) -> Option<Arc<Snapshot>> {
        self.history
            .iter()
            .rev()
            .find(|s| s.timestamp <= timestamp)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::WorldConfig;
    use crate::domain::ecs::component::Dead;

    fn empty(tick: u64, timestamp: f64) -> Snapshot {
        Snapshot {
            tick,
            timestamp,
            entities: Vec::new(),
        }
    }

    #[test]
    fn ring_buffer_evicts_oldest_when_full() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), Some(1));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(ring.capacity(), 2);
    }

    #[test]
    fn capture_includes_positioned_entities_only() {
        let mut world = World::new(WorldConfig::default());
        let a = world.spawn([
            Position(DVec2::new(1.0, 2.0)).into(),
            Velocity(DVec2::X).into(),
            Health::full(10).into(),
        ]);
        world.spawn([Health::full(5).into()]);
        let corpse = world.spawn([Position(DVec2::ZERO).into(), Dead::default().into()]);
        world.update(0.0);

        let snapshot = Snapshot::capture(&world, 0.5);
        assert_eq!(snapshot.entities.len(), 2);
        let state = snapshot.entity(a).expect("entity a");
        assert_eq!(state.position, DVec2::new(1.0, 2.0));
        assert_eq!(state.velocity, DVec2::X);
        assert_eq!(state.health, Some(10));
        assert!(snapshot.entity(corpse).is_some_and(|s| s.dead));
    }

    #[test]
    fn when_timestamp_does_not_advance_then_snapshot_is_rejected() {
        let mut recorder = SnapshotRecorder::new(4, 1);
        recorder.push(empty(1, 1.0)).expect("first snapshot");
        assert!(recorder.push(empty(2, 1.0)).is_err());
        assert!(recorder.push(empty(2, 0.5)).is_err());
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn recorder_lookups_respect_eviction() {
        let mut recorder = SnapshotRecorder::new(3, 1);
        for tick in 1..=5 {
            recorder
                .push(empty(tick, tick as f64 * 0.1))
                .expect("monotonic snapshot");
        }

        assert_eq!(recorder.len(), 3);
        assert!(recorder.by_tick(2).is_none());
        assert_eq!(recorder.by_tick(4).map(|s| s.tick), Some(4));
        assert_eq!(recorder.latest().map(|s| s.tick), Some(5));
        assert_eq!(recorder.at_or_before(0.45).map(|s| s.tick), Some(4));
        assert!(recorder.at_or_before(0.05).is_none());
    }

    #[test]
    fn recorder_only_captures_on_due_ticks() {
        let mut world = World::new(WorldConfig::default());
        let mut recorder = SnapshotRecorder::new(8, 2);

        let mut recorded = Vec::new();
        for step in 0..4 {
            world.update(0.05);
            if let Some(s) = recorder.record(&world, f64::from(step) * 0.05 + 0.05) {
                recorded.push(s.tick);
            }
        }
        assert_eq!(recorded, vec![2, 4]);
    }
}
