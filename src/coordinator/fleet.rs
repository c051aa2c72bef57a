//! Fleet convergence probes
//!
//! A rollout is complete once every member reports the candidate's
//! fingerprint as applied. How a member is asked is pluggable.

use crate::common::{Error, ProbeConfig, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a member reports about the config it runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedReport {
    pub fingerprint: Option<String>,
}

#[async_trait]
pub trait FleetProbe: Send + Sync {
    /// Fingerprint of the config `member` has applied, if it reports one
    async fn applied_fingerprint(&self, member: &str) -> Result<Option<String>>;
}

/// Probes members over their config HTTP API
pub struct HttpFleetProbe {
    client: reqwest::Client,
    scheme: String,
    port: u16,
}

impl HttpFleetProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            port: config.port,
        })
    }

    fn applied_url(&self, member: &str) -> String {
        format!(
            "{}://{}:{}/fleetconf/v1/config/applied",
            self.scheme, member, self.port
        )
    }
}

#[async_trait]
impl FleetProbe for HttpFleetProbe {
    async fn applied_fingerprint(&self, member: &str) -> Result<Option<String>> {
        let probe_err = |reason: String| Error::Probe {
            member: member.to_string(),
            reason,
        };

        let response = self
            .client
            .get(self.applied_url(member))
            .send()
            .await
            .map_err(|e| probe_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(probe_err(format!("status {}", response.status())));
        }
        let report: AppliedReport = response
            .json()
            .await
            .map_err(|e| probe_err(e.to_string()))?;
        Ok(report.fingerprint)
    }
}

/// In-process fleet view, fed by explicit acknowledgements.
///
/// Used for embedded single-process setups and tests.
#[derive(Default)]
pub struct LocalFleet {
    members: RwLock<HashMap<String, MemberReport>>,
}

#[derive(Debug, Clone)]
enum MemberReport {
    Applied(Option<String>),
    Unreachable,
}

impl LocalFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `member` now runs the config with `fingerprint`
    pub fn acknowledge(&self, member: &str, fingerprint: impl Into<String>) {
        self.members.write().insert(
            member.to_string(),
            MemberReport::Applied(Some(fingerprint.into())),
        );
    }

    pub fn set_unreachable(&self, member: &str) {
        self.members
            .write()
            .insert(member.to_string(), MemberReport::Unreachable);
    }
}

#[async_trait]
impl FleetProbe for LocalFleet {
    async fn applied_fingerprint(&self, member: &str) -> Result<Option<String>> {
        match self.members.read().get(member) {
            Some(MemberReport::Applied(fingerprint)) => Ok(fingerprint.clone()),
            Some(MemberReport::Unreachable) => Err(Error::Probe {
                member: member.to_string(),
                reason: "unreachable".into(),
            }),
            None => Ok(None),
        }
    }
}
