//! Common utilities and types shared across fleetconf

pub mod codec;
pub mod config;
pub mod error;
pub mod utils;

pub use codec::Extras;
pub use config::{BackendKind, NodeConfig, ProbeConfig, RolloutConfig};
pub use error::{Error, Result};
pub use utils::{format_elapsed, percent};
