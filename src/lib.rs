//! # fleetconf
//!
//! Configuration coordination for a fleet of cooperating server processes:
//! - One committed config per fleet, guarded by a version stamp
//! - Compare-and-swap as the only write path
//! - Codec for packing open-ended key/value extras into a single field
//! - Rolling config changes that end in a commit or a rollback
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            HTTP API (thin adapter)           │
//! └───────────┬───────────────────────┬──────────┘
//!             │ set                   │ set-rolling / cancel
//!   ┌─────────▼─────────┐   ┌─────────▼──────────┐      ┌──────────────┐
//!   │    ConfigStore    │◀──│ RolloutCoordinator │─────▶│  FleetProbe  │
//!   │ (CAS, write lock) │   │  (state machine)   │ poll │ (members)    │
//!   └─────────┬─────────┘   └────────────────────┘      └──────────────┘
//!             │
//!   ┌─────────▼─────────┐
//!   │   ConfigBackend   │  memory | file
//!   └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! fleetconf serve --hostname zk-a --bind 0.0.0.0:8080 --state ./fleetconf/state.json
//! ```
//!
//! ### Operate on it
//! ```bash
//! fleetconf state
//! fleetconf set ./config.json --rolling
//! fleetconf rollback
//! fleetconf force-commit
//! ```

pub mod common;
pub mod coordinator;
pub mod model;
pub mod ops;

// Re-export commonly used types
pub use common::{Error, NodeConfig, Result};
pub use coordinator::{CancelMode, ConfigStore, RolloutCoordinator, VersionStamp};
pub use model::{ConfigKey, ConfigSnapshot, ExtraField, IntKey, StringKey};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
