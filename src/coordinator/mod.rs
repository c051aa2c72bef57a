//! Config coordination
//!
//! The coordinator is responsible for:
//! - The committed config and its version stamp (compare-and-swap writes)
//! - Pluggable persistence of the committed config
//! - Rolling a candidate config out across the fleet
//! - The HTTP API other nodes and operators talk to

pub mod backend;
pub mod cache;
pub mod fleet;
pub mod http;
pub mod rollout;
pub mod server;
pub mod store;

pub use backend::{ConfigBackend, FileBackend, MemoryBackend, StoredConfig};
pub use cache::StampedCache;
pub use fleet::{AppliedReport, FleetProbe, HttpFleetProbe, LocalFleet};
pub use rollout::{
    CancelMode, MemberProgress, RolloutCoordinator, RolloutOutcome, RolloutPhase,
    RolloutProgress,
};
pub use server::ConfigServer;
pub use store::{Committed, ConfigStore, VersionStamp, WriteGuard};
