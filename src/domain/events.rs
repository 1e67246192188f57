// Simulation events emitted by systems and drained once per tick by the owner.

use crate::domain::ecs::EntityId;
use glam::DVec2;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    InvalidAttacker,
    AttackerDead,
    NoAttack,
    OnCooldown,
    InvalidTarget,
    FriendlyTarget,
    OutOfRange,
    Evaded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Damage {
        tick: u64,
        attacker: Option<EntityId>,
        target: EntityId,
        amount: i32,
        critical: bool,
        remaining: i32,
    },
    Death {
        tick: u64,
        entity: EntityId,
        killer: Option<EntityId>,
    },
    Miss {
        tick: u64,
        attacker: EntityId,
        target: EntityId,
        reason: MissReason,
    },
    ProjectileSpawned {
        tick: u64,
        projectile: EntityId,
        owner: EntityId,
        position: DVec2,
        velocity: DVec2,
    },
    ProjectileHit {
        tick: u64,
        projectile: EntityId,
        owner: EntityId,
        target: EntityId,
    },
    ProjectileDespawned {
        tick: u64,
        projectile: EntityId,
    },
    Respawned {
        tick: u64,
        entity: EntityId,
        position: DVec2,
    },
}

/// Bounded FIFO of events. Events pushed during the current tick can be read
/// by systems that run later in the same tick.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<SimEvent>,
    tick_start: usize,
    capacity: usize,
    dropped: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            tick_start: 0,
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: SimEvent) {
        if self.events.len() == self.capacity {
            // Oldest event goes first; nobody drained the queue in time.
            self.events.pop_front();
            self.tick_start = self.tick_start.saturating_sub(1);
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                warn!(dropped = self.dropped, "event queue full; dropping oldest events");
            }
        }
        self.events.push_back(event);
    }

    /// Marks the start of a tick for `emitted_this_tick`.
    pub fn begin_tick(&mut self) {
        self.tick_start = self.events.len();
    }

    pub fn emitted_this_tick(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter().skip(self.tick_start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimEvent> {
        self.events.iter()
    }

    pub fn drain(&mut self) -> Vec<SimEvent> {
        self.tick_start = 0;
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn despawn(projectile: u64) -> SimEvent {
        SimEvent::ProjectileDespawned {
            tick: 0,
            projectile: EntityId(projectile),
        }
    }

    #[test]
    fn emitted_this_tick_only_yields_events_after_begin_tick() {
        let mut queue = EventQueue::default();
        queue.push(despawn(1));
        queue.begin_tick();
        queue.push(despawn(2));

        let current: Vec<_> = queue.emitted_this_tick().cloned().collect();
        assert_eq!(current, vec![despawn(2)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let mut queue = EventQueue::with_capacity(2);
        queue.push(despawn(1));
        queue.push(despawn(2));
        queue.push(despawn(3));

        assert_eq!(queue.drain(), vec![despawn(2), despawn(3)]);
        assert_eq!(queue.dropped(), 1);
        assert!(queue.is_empty());
    }
}
