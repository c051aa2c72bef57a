//! The closed set of configuration keys

use serde::{Deserialize, Serialize};

/// Free-text configuration fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StringKey {
    ServiceInstallDirectory,
    ServiceDataDirectory,
    ServiceLogIndexDirectory,
    ServersSpec,
    /// Codec-backed backup-subsystem parameters
    BackupExtra,
    /// Codec-backed service tuning parameters
    ServiceCfgExtra,
    JavaEnvironment,
    LogProperties,
}

/// Integer configuration fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntKey {
    ClientPort,
    ConnectPort,
    ElectionPort,
    CheckMs,
    CleanupPeriodMs,
    CleanupMaxFiles,
    BackupPeriodMs,
    BackupMaxStoreMs,
    AutoManageInstances,
    AutoManageInstancesSettlingPeriodMs,
    ObserverThreshold,
}

/// The two string fields whose content is a codec-encoded map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraField {
    ServiceCfg,
    Backup,
}

/// Any configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigKey {
    String(StringKey),
    Int(IntKey),
}

impl StringKey {
    pub const ALL: [StringKey; 8] = [
        StringKey::ServiceInstallDirectory,
        StringKey::ServiceDataDirectory,
        StringKey::ServiceLogIndexDirectory,
        StringKey::ServersSpec,
        StringKey::BackupExtra,
        StringKey::ServiceCfgExtra,
        StringKey::JavaEnvironment,
        StringKey::LogProperties,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            StringKey::ServiceInstallDirectory => "SERVICE_INSTALL_DIRECTORY",
            StringKey::ServiceDataDirectory => "SERVICE_DATA_DIRECTORY",
            StringKey::ServiceLogIndexDirectory => "SERVICE_LOG_INDEX_DIRECTORY",
            StringKey::ServersSpec => "SERVERS_SPEC",
            StringKey::BackupExtra => "BACKUP_EXTRA",
            StringKey::ServiceCfgExtra => "SERVICE_CFG_EXTRA",
            StringKey::JavaEnvironment => "JAVA_ENVIRONMENT",
            StringKey::LogProperties => "LOG_PROPERTIES",
        }
    }

    /// Is this one of the codec-backed fields?
    pub fn is_extra(&self) -> bool {
        matches!(self, StringKey::BackupExtra | StringKey::ServiceCfgExtra)
    }
}

impl IntKey {
    pub const ALL: [IntKey; 11] = [
        IntKey::ClientPort,
        IntKey::ConnectPort,
        IntKey::ElectionPort,
        IntKey::CheckMs,
        IntKey::CleanupPeriodMs,
        IntKey::CleanupMaxFiles,
        IntKey::BackupPeriodMs,
        IntKey::BackupMaxStoreMs,
        IntKey::AutoManageInstances,
        IntKey::AutoManageInstancesSettlingPeriodMs,
        IntKey::ObserverThreshold,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            IntKey::ClientPort => "CLIENT_PORT",
            IntKey::ConnectPort => "CONNECT_PORT",
            IntKey::ElectionPort => "ELECTION_PORT",
            IntKey::CheckMs => "CHECK_MS",
            IntKey::CleanupPeriodMs => "CLEANUP_PERIOD_MS",
            IntKey::CleanupMaxFiles => "CLEANUP_MAX_FILES",
            IntKey::BackupPeriodMs => "BACKUP_PERIOD_MS",
            IntKey::BackupMaxStoreMs => "BACKUP_MAX_STORE_MS",
            IntKey::AutoManageInstances => "AUTO_MANAGE_INSTANCES",
            IntKey::AutoManageInstancesSettlingPeriodMs => {
                "AUTO_MANAGE_INSTANCES_SETTLING_PERIOD_MS"
            }
            IntKey::ObserverThreshold => "OBSERVER_THRESHOLD",
        }
    }
}

impl ExtraField {
    pub const fn key(&self) -> StringKey {
        match self {
            ExtraField::ServiceCfg => StringKey::ServiceCfgExtra,
            ExtraField::Backup => StringKey::BackupExtra,
        }
    }
}

impl ConfigKey {
    /// Every key, string keys first
    pub fn all() -> impl Iterator<Item = ConfigKey> {
        StringKey::ALL
            .into_iter()
            .map(ConfigKey::String)
            .chain(IntKey::ALL.into_iter().map(ConfigKey::Int))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ConfigKey::String(k) => k.name(),
            ConfigKey::Int(k) => k.name(),
        }
    }

    /// camelCase name used in JSON documents (`CLIENT_PORT` → `clientPort`)
    pub fn wire_name(&self) -> String {
        camel_case(self.name())
    }

    /// Resolve a wire name back to its key
    pub fn from_wire_name(name: &str) -> Option<ConfigKey> {
        ConfigKey::all().find(|k| k.wire_name() == name)
    }
}

impl From<StringKey> for ConfigKey {
    fn from(key: StringKey) -> Self {
        ConfigKey::String(key)
    }
}

impl From<IntKey> for ConfigKey {
    fn from(key: IntKey) -> Self {
        ConfigKey::Int(key)
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.wire_name())
    }
}

fn camel_case(screaming: &str) -> String {
    let mut out = String::with_capacity(screaming.len());
    for part in screaming.split('_').filter(|p| !p.is_empty()) {
        let lower = part.to_ascii_lowercase();
        if out.is_empty() {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(ConfigKey::Int(IntKey::ClientPort).wire_name(), "clientPort");
        assert_eq!(
            ConfigKey::String(StringKey::ServiceCfgExtra).wire_name(),
            "serviceCfgExtra"
        );
        assert_eq!(
            ConfigKey::Int(IntKey::AutoManageInstancesSettlingPeriodMs).wire_name(),
            "autoManageInstancesSettlingPeriodMs"
        );
        assert_eq!(ConfigKey::Int(IntKey::CheckMs).wire_name(), "checkMs");
    }

    #[test]
    fn test_from_wire_name() {
        for key in ConfigKey::all() {
            assert_eq!(ConfigKey::from_wire_name(&key.wire_name()), Some(key));
        }
        assert_eq!(ConfigKey::from_wire_name("noSuchKey"), None);
        assert_eq!(ConfigKey::all().count(), 19);
    }

    #[test]
    fn test_extra_fields() {
        assert!(ExtraField::Backup.key().is_extra());
        assert!(ExtraField::ServiceCfg.key().is_extra());
        assert!(!StringKey::ServersSpec.is_extra());
    }
}
