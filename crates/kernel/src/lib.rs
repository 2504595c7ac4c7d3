//! World Kernel: the client's mirror of server-owned form state.
//!
//! # Invariants
//! - Every allocated remote index maps to exactly one local slot and back.
//! - The form sequence never ends in an empty slot; gaps in the middle are
//!   freed slots waiting for reuse.
//! - State lives in [`Storage`] and is created on first access, so it
//!   survives host reloads without relying on initialization order.

pub mod id_map;
pub mod storage;
pub mod world;

pub use id_map::{IdMapError, IdentifierMap};
pub use storage::Storage;
pub use world::{Form, WorldEvent, WorldModel};
