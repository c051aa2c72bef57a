//! Configuration data model
//!
//! - Closed key catalogue with camelCase wire names
//! - Immutable, fully-populated snapshots
//! - Servers spec parsing (fleet membership)

pub mod keys;
pub mod servers;
pub mod snapshot;

pub use keys::{ConfigKey, ExtraField, IntKey, StringKey};
pub use servers::{ServerList, ServerSpec, ServerType};
pub use snapshot::{ConfigSnapshot, WireValues};
