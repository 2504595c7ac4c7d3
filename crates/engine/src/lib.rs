//! Replication engine: turns the server's ordered message stream into world
//! model mutations and simulation commands.
//!
//! # Invariants
//! - Each inbound message is applied at most once; nothing is retried
//!   except through an explicit, bounded continuation.
//! - A message addressing an unknown remote index is logged and dropped.
//! - Objects below the direct-apply threshold never get a world-model slot;
//!   their updates wait (bounded) for the object and then go straight to the
//!   simulation.
//! - Continuations run only from [`ReplicationEngine::tick`] and
//!   [`ReplicationEngine::update`], never from [`ReplicationEngine::handle`].

pub mod bootstrap;
pub mod config;
pub mod custom;
mod engine;
pub mod error;
pub mod materializer;
pub mod message;

pub use bootstrap::{BootstrapPhase, PlayerBootstrap, SpawnParams};
pub use config::{ApplyPolicy, RecordTypeOverride, ReplicationConfig};
pub use custom::{CustomPacketHandler, InvokeAnim};
pub use engine::{
    HOSTED_KEY, ID_MANAGER_KEY, PLAYER_INVENTORY_KEY, ReplicationEngine, WORLD_MODEL_KEY,
};
pub use error::ReplicationError;
pub use materializer::{Attempt, DeferredMaterializer, MaterializeTask};
pub use message::{ConnectionEvent, Message, OutboundMessage, Outgoing};
