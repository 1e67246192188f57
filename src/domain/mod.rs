// Domain layer: simulation core, synchronization and persistence rules.

pub mod combat;
pub mod content;
pub mod ecs;
pub mod events;
pub mod lag_compensation;
pub mod persistence;
pub mod prediction;
pub mod snapshot;
pub mod stats;
pub mod sync;
pub mod systems;
pub mod tuning;

pub use ecs::{Component, ComponentTag, Entity, EntityId, System, World, WorldConfig};
pub use events::SimEvent;
pub use snapshot::{EntityState, Snapshot};
pub use sync::{ActionFlags, InputCommand};
