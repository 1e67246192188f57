// Entity-component store and the tick scheduler built on top of it.

pub mod component;
pub mod entity;
pub mod store;
pub mod world;

pub use component::{Component, ComponentKind, ComponentTag};
pub use entity::{Entity, EntityId};
pub use store::{EntityStore, WorldError};
pub use world::{System, TickContext, World, WorldConfig};
