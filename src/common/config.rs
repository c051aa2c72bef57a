//! Process settings for a fleetconf node
//!
//! These are the settings of the coordinating process itself, not the
//! fleet configuration it manages (see [`crate::model::ConfigSnapshot`]).

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for overrides, e.g. `FLEETCONF_BIND_ADDR` or
/// `FLEETCONF_ROLLOUT__POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "FLEETCONF";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hostname this node is known by in the servers spec
    pub hostname: String,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Where the committed config is persisted
    pub backend: BackendKind,

    /// State file for the file backend
    pub state_path: Option<PathBuf>,

    pub rollout: RolloutConfig,

    pub probe: ProbeConfig,

    /// Logging level
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
}

/// Rollout tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Delay between convergence polls
    pub poll_interval_ms: u64,

    /// A member with no successful answer for this long is reported unresponsive
    pub member_timeout_ms: u64,

    /// Roll back automatically after this long (0 disables)
    pub timeout_ms: u64,
}

/// Fleet probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Port the other members serve the config API on
    pub port: u16,

    /// `http` or `https`
    pub scheme: String,

    pub request_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backend: BackendKind::Memory,
            state_path: None,
            rollout: RolloutConfig::default(),
            probe: ProbeConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            member_timeout_ms: 30_000,
            timeout_ms: 0,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            scheme: "http".to_string(),
            request_timeout_ms: 2_000,
        }
    }
}

impl RolloutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn member_timeout(&self) -> Duration {
        Duration::from_millis(self.member_timeout_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl ProbeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl NodeConfig {
    /// Load settings from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rollout.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "rollout.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.backend == BackendKind::File && self.state_path.is_none() {
            return Err(Error::InvalidConfig(
                "file backend requires state_path".into(),
            ));
        }
        if !matches!(self.probe.scheme.as_str(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "unsupported probe scheme: {}",
                self.probe.scheme
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rollout.timeout(), None);
        assert_eq!(config.rollout.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let config = NodeConfig {
            backend: BackendKind::File,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetconf.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
hostname = "zk-1"
bind_addr = "127.0.0.1:9090"
backend = "file"
state_path = "/var/lib/fleetconf/state.json"

[rollout]
poll_interval_ms = 250
timeout_ms = 60000
"#
        )
        .unwrap();

        let config = NodeConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.hostname, "zk-1");
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.rollout.poll_interval_ms, 250);
        assert_eq!(config.rollout.member_timeout_ms, 30_000);
        assert_eq!(config.rollout.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.probe.port, 8080);
    }
}
