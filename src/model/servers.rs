//! Parsing of the servers spec field
//!
//! Format: comma-separated `[S|O:]id:hostname` entries, e.g.
//! `S:1:zk-a,S:2:zk-b,O:3:zk-c`. The type prefix is optional and defaults to
//! a standard (voting) member.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Standard,
    Observer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub server_id: i64,
    pub hostname: String,
    pub server_type: ServerType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerList {
    specs: Vec<ServerSpec>,
}

impl ServerList {
    /// Parse a servers spec. Malformed entries are skipped.
    pub fn parse(spec: &str) -> Self {
        let specs = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let parsed = parse_entry(entry);
                if parsed.is_none() {
                    tracing::warn!(entry, "skipping malformed servers spec entry");
                }
                parsed
            })
            .collect();
        Self { specs }
    }

    pub fn specs(&self) -> &[ServerSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Hostnames in spec order, without duplicates
    pub fn hostnames(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            if !hosts.contains(&spec.hostname) {
                hosts.push(spec.hostname.clone());
            }
        }
        hosts
    }

    pub fn find_host(&self, hostname: &str) -> Option<&ServerSpec> {
        self.specs
            .iter()
            .find(|s| s.hostname.eq_ignore_ascii_case(hostname))
    }
}

fn parse_entry(entry: &str) -> Option<ServerSpec> {
    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let (server_type, id, hostname) = match parts.as_slice() {
        [id, hostname] => (ServerType::Standard, *id, *hostname),
        [kind, id, hostname] => {
            let server_type = match kind.to_ascii_uppercase().as_str() {
                "S" => ServerType::Standard,
                "O" => ServerType::Observer,
                _ => return None,
            };
            (server_type, *id, *hostname)
        }
        _ => return None,
    };

    if hostname.is_empty() {
        return None;
    }

    Some(ServerSpec {
        server_id: id.parse().ok()?,
        hostname: hostname.to_string(),
        server_type,
    })
}
