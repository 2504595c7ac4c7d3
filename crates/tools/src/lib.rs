//! Developer tooling: read-only views of the replicated world model.
//!
//! # Invariants
//! - Tools never mutate the world model or the identifier map.

pub mod inspector;

pub use inspector::{FormInfo, WorldInspector, WorldSummary};
