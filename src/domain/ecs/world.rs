// Simulation world: entity store, ordered systems and the per-tick contract.

use crate::domain::combat;
use crate::domain::ecs::component::{Component, ComponentTag};
use crate::domain::ecs::entity::{Entity, EntityId};
use crate::domain::ecs::store::{EntityStore, WorldError};
use crate::domain::events::{EventQueue, SimEvent};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

/// A unit of per-tick logic. Systems borrow the world for one `run` call and
/// must not keep references across ticks.
pub trait System: Send {
    fn name(&self) -> &'static str;

    /// Component tags an entity must carry for this system to process it.
    fn requires(&self) -> &'static [ComponentTag] {
        &[]
    }

    fn run(&mut self, ctx: &mut TickContext<'_>, dt: f64);
}

/// Everything a system may touch during one tick.
pub struct TickContext<'w> {
    pub store: &'w mut EntityStore,
    pub events: &'w mut EventQueue,
    pub rng: &'w mut ChaCha8Rng,
    pub tick: u64,
    pub time: f64,
}

impl TickContext<'_> {
    pub fn query(&self, required: &[ComponentTag]) -> Vec<EntityId> {
        self.store.query(required)
    }

    pub fn emit(&mut self, event: SimEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    /// Seed for the world RNG (crit/evasion rolls, spawn points).
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

pub struct World {
    store: EntityStore,
    systems: Vec<Box<dyn System>>,
    events: EventQueue,
    rng: ChaCha8Rng,
    tick: u64,
    time: f64,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self {
            store: EntityStore::new(),
            systems: Vec::new(),
            events: EventQueue::default(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            tick: 0,
            time: 0.0,
        }
    }

    /// Queues an empty entity. It becomes live at the start of the next
    /// `update`; call `update(0.0)` when it must be live before the first tick.
    pub fn create_entity(&mut self) -> EntityId {
        self.store.create()
    }

    pub fn spawn(&mut self, components: impl IntoIterator<Item = Component>) -> EntityId {
        self.store.spawn(components)
    }

    pub fn insert_component(
        &mut self,
        id: EntityId,
        component: impl Into<Component>,
    ) -> Result<Option<Component>, WorldError> {
        self.store.insert_component(id, component)
    }

    pub fn remove_component(
        &mut self,
        id: EntityId,
        tag: ComponentTag,
    ) -> Result<Component, WorldError> {
        self.store.remove_component(id, tag)
    }

    /// Queues a removal; the entity disappears at the end of the next tick.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<(), WorldError> {
        self.store.queue_remove(id)
    }

    /// Registers a system. Systems run in registration order.
    pub fn add_system(&mut self, system: impl System + 'static) {
        self.systems.push(Box::new(system));
    }

    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    /// Runs one tick: flush additions, run systems in order, flush removals.
    pub fn update(&mut self, dt: f64) {
        let added = self.store.flush_additions();
        self.events.begin_tick();

        let mut ctx = TickContext {
            store: &mut self.store,
            events: &mut self.events,
            rng: &mut self.rng,
            tick: self.tick,
            time: self.time,
        };
        for system in self.systems.iter_mut() {
            system.run(&mut ctx, dt);
        }

        let removed = self.store.flush_removals();
        trace!(tick = self.tick, added, removed, "world tick complete");
        self.tick += 1;
        self.time += dt;
    }

    /// Current live entities (post-flush).
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.iter()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    /// Mutable access for the tick owner (input application, save restore).
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.store.get_mut(id)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Resolves one attack with the world RNG; see `combat::attack`.
    pub fn attack(&mut self, attacker: EntityId, target: EntityId) -> bool {
        combat::attack(
            &mut self.store,
            &mut self.rng,
            &mut self.events,
            self.tick,
            attacker,
            target,
        )
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulation time in seconds, the sum of every `dt` passed to `update`.
    pub fn time(&self) -> f64 {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ecs::component::{Health, Position};
    use glam::DVec2;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Probe {
        label: &'static str,
        log: Log,
    }

    impl System for Probe {
        fn name(&self) -> &'static str {
            self.label
        }

        fn run(&mut self, ctx: &mut TickContext<'_>, _dt: f64) {
            let count = ctx.store.len();
            self.log
                .lock()
                .expect("log mutex poisoned")
                .push(format!("{}:{}:{}", self.label, ctx.tick, count));
        }
    }

    /// Spawns one entity on its first run.
    struct Spawner {
        spawned: Option<EntityId>,
        shared: Arc<Mutex<Option<EntityId>>>,
    }

    impl System for Spawner {
        fn name(&self) -> &'static str {
            "spawner"
        }

        fn run(&mut self, ctx: &mut TickContext<'_>, _dt: f64) {
            if self.spawned.is_none() {
                let id = ctx.store.spawn([Health::full(1).into()]);
                self.spawned = Some(id);
                *self.shared.lock().expect("mutex poisoned") = Some(id);
            }
        }
    }

    /// Removes every entity with health; runs before `Toucher`.
    struct Killer;

    impl System for Killer {
        fn name(&self) -> &'static str {
            "killer"
        }

        fn requires(&self) -> &'static [ComponentTag] {
            &[ComponentTag::Health]
        }

        fn run(&mut self, ctx: &mut TickContext<'_>, _dt: f64) {
            for id in ctx.query(self.requires()) {
                let _ = ctx.store.queue_remove(id);
            }
        }
    }

    /// Holds ids captured before the tick and touches them after `Killer`.
    struct Toucher {
        held: Vec<EntityId>,
        misses: Arc<Mutex<usize>>,
    }

    impl System for Toucher {
        fn name(&self) -> &'static str {
            "toucher"
        }

        fn run(&mut self, ctx: &mut TickContext<'_>, _dt: f64) {
            for id in &self.held {
                match ctx.store.get_mut(*id) {
                    Some(entity) => {
                        entity.insert(Position(DVec2::ONE));
                    }
                    None => *self.misses.lock().expect("mutex poisoned") += 1,
                }
            }
        }
    }

    #[test]
    fn systems_run_in_registration_order() {
        let log: Log = Arc::default();
        let mut world = World::new(WorldConfig::default());
        world.add_system(Probe { label: "first", log: log.clone() });
        world.add_system(Probe { label: "second", log: log.clone() });

        world.update(0.05);
        world.update(0.05);

        let log = log.lock().expect("log mutex poisoned");
        assert_eq!(
            *log,
            vec!["first:0:0", "second:0:0", "first:1:0", "second:1:0"]
        );
        assert_eq!(world.system_names(), vec!["first", "second"]);
    }

    #[test]
    fn entity_created_during_tick_becomes_visible_next_tick() {
        let log: Log = Arc::default();
        let shared = Arc::new(Mutex::new(None));
        let mut world = World::new(WorldConfig::default());
        world.add_system(Spawner { spawned: None, shared: shared.clone() });
        world.add_system(Probe { label: "probe", log: log.clone() });

        world.update(0.05);
        let spawned = shared.lock().expect("mutex poisoned").expect("spawned");
        assert!(world.entity(spawned).is_none());
        assert_eq!(world.entities().count(), 0);

        world.update(0.05);
        assert!(world.entity(spawned).is_some());

        let log = log.lock().expect("log mutex poisoned");
        assert_eq!(*log, vec!["probe:0:0", "probe:1:1"]);
    }

    #[test]
    fn entity_created_outside_tick_is_live_after_zero_update() {
        let mut world = World::new(WorldConfig::default());
        let id = world.create_entity();
        world
            .insert_component(id, Health::full(3))
            .expect("pending entity accepts components");
        assert!(world.entity(id).is_none());

        world.update(0.0);

        assert!(world.entity(id).is_some());
        assert_eq!(world.time(), 0.0);
        assert_eq!(world.tick(), 1);
    }

    #[test]
    fn stale_handles_after_removal_are_safe_no_ops() {
        let misses = Arc::new(Mutex::new(0));
        let mut world = World::new(WorldConfig::default());
        let victim = world.spawn([Health::full(1).into()]);
        world.update(0.0);

        world.add_system(Killer);
        world.add_system(Toucher { held: vec![victim], misses: misses.clone() });
        world.update(0.05);

        assert_eq!(*misses.lock().expect("mutex poisoned"), 1);
        assert!(world.entity(victim).is_none());
        assert_eq!(world.remove_entity(victim), Err(WorldError::NotFound(victim)));
    }

    #[test]
    fn removal_requested_outside_tick_applies_at_end_of_next_update() {
        let mut world = World::new(WorldConfig::default());
        let id = world.spawn([Health::full(1).into()]);
        world.update(0.0);

        world.remove_entity(id).expect("live entity");
        assert!(world.entity(id).is_none());
        world.update(0.05);
        assert_eq!(world.entities().count(), 0);
    }
}
