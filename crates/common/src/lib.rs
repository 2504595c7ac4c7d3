//! Shared identifiers and replicated component types.
//!
//! Everything here is plain data: it crosses the boundary between the
//! inbound message stream, the world model and the simulation.

mod property;
mod types;

pub use property::{PropertyBag, is_truthy};
pub use types::{
    AnimVariables, Animation, Appearance, Equipment, FormId, Inventory, InventoryEntry, Movement,
    Reliability, RemoteIndex, RunMode, Tint, Transform,
};
