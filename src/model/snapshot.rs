//! Immutable configuration snapshots
//!
//! A snapshot always holds a value for every [`ConfigKey`]. Changing the
//! configuration means building a new snapshot; nothing is mutated in place.
//! Integer fields keep their raw text so a malformed value read from a peer
//! or a state file degrades to `0` instead of failing the whole read.

use crate::common::{codec, Extras, Result};
use crate::model::keys::{ConfigKey, ExtraField, IntKey, StringKey};
use crate::model::servers::ServerList;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire form: camelCase field name → raw text
pub type WireValues = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireValues", into = "WireValues")]
pub struct ConfigSnapshot {
    values: BTreeMap<ConfigKey, String>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        let values = ConfigKey::all()
            .map(|key| {
                let default = match key {
                    ConfigKey::String(_) => String::new(),
                    ConfigKey::Int(_) => "0".to_string(),
                };
                (key, default)
            })
            .collect();
        Self { values }
    }
}

impl ConfigSnapshot {
    /// Defaults with the given values applied
    pub fn from_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<ConfigKey>,
        V: Into<String>,
    {
        Self::default().with_overrides(values)
    }

    /// Build from a wire map. Unknown field names are ignored.
    pub fn from_wire(wire: &WireValues) -> Self {
        let mut snapshot = Self::default();
        for (name, value) in wire {
            match ConfigKey::from_wire_name(name) {
                Some(key) => {
                    snapshot.values.insert(key, value.clone());
                }
                None => tracing::debug!(field = %name, "ignoring unknown config field"),
            }
        }
        snapshot
    }

    pub fn to_wire(&self) -> WireValues {
        self.values
            .iter()
            .map(|(key, value)| (key.wire_name(), value.clone()))
            .collect()
    }

    /// Copy of this snapshot with only the listed keys replaced
    pub fn with_overrides<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<ConfigKey>,
        V: Into<String>,
    {
        let mut values = self.values.clone();
        for (key, value) in overrides {
            values.insert(key.into(), value.into());
        }
        Self { values }
    }

    pub fn with_string(&self, key: StringKey, value: impl Into<String>) -> Self {
        self.with_overrides([(ConfigKey::String(key), value.into())])
    }

    pub fn with_int(&self, key: IntKey, value: i64) -> Self {
        self.with_overrides([(ConfigKey::Int(key), value.to_string())])
    }

    /// Raw stored text for any key
    pub fn raw(&self, key: impl Into<ConfigKey>) -> &str {
        self.values
            .get(&key.into())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn get_string(&self, key: StringKey) -> &str {
        self.raw(key)
    }

    /// Integer value; absent or non-numeric text reads as 0
    pub fn get_int(&self, key: IntKey) -> i64 {
        self.raw(key).trim().parse().unwrap_or(0)
    }

    /// Decoded content of a codec-backed field
    pub fn extras(&self, field: ExtraField) -> Result<Extras> {
        codec::decode(self.get_string(field.key()))
    }

    pub fn with_extras(&self, field: ExtraField, extras: &Extras) -> Self {
        self.with_string(field.key(), codec::encode(extras))
    }

    pub fn servers(&self) -> ServerList {
        ServerList::parse(self.get_string(StringKey::ServersSpec))
    }

    /// Content digest used by fleet members to acknowledge a config
    pub fn fingerprint(&self) -> String {
        let canonical = codec::encode(&self.to_wire());
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

impl From<WireValues> for ConfigSnapshot {
    fn from(wire: WireValues) -> Self {
        ConfigSnapshot::from_wire(&wire)
    }
}

impl From<ConfigSnapshot> for WireValues {
    fn from(snapshot: ConfigSnapshot) -> Self {
        snapshot.to_wire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let snapshot = ConfigSnapshot::default();
        assert_eq!(snapshot.get_string(StringKey::ServersSpec), "");
        assert_eq!(snapshot.get_int(IntKey::ClientPort), 0);
        assert!(snapshot.extras(ExtraField::ServiceCfg).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_int_reads_as_zero() {
        let snapshot = ConfigSnapshot::from_values([(IntKey::ClientPort, "twenty-one eighty-one")]);
        assert_eq!(snapshot.get_int(IntKey::ClientPort), 0);
        assert_eq!(snapshot.raw(IntKey::ClientPort), "twenty-one eighty-one");
    }

    #[test]
    fn test_overrides_leave_base_untouched() {
        let base = ConfigSnapshot::default()
            .with_int(IntKey::ClientPort, 2181)
            .with_string(StringKey::ServiceDataDirectory, "/data");
        let changed = base.with_overrides([(IntKey::ClientPort, "2182")]);

        assert_eq!(base.get_int(IntKey::ClientPort), 2181);
        assert_eq!(changed.get_int(IntKey::ClientPort), 2182);
        assert_eq!(changed.get_string(StringKey::ServiceDataDirectory), "/data");
    }

    #[test]
    fn test_wire_round_trip() {
        let mut wire = WireValues::new();
        wire.insert("clientPort".into(), "2181".into());
        wire.insert("serversSpec".into(), "1:zk-a,2:zk-b".into());
        wire.insert("notAField".into(), "x".into());

        let snapshot = ConfigSnapshot::from_wire(&wire);
        assert_eq!(snapshot.get_int(IntKey::ClientPort), 2181);
        let back = snapshot.to_wire();
        assert_eq!(back.get("serversSpec").unwrap(), "1:zk-a,2:zk-b");
        assert!(!back.contains_key("notAField"));
        assert_eq!(back.len(), ConfigKey::all().count());
    }

    #[test]
    fn test_extras() {
        let mut tuning = Extras::new();
        tuning.insert("tickTime".into(), "2000".into());
        tuning.insert("jvmFlags".into(), "-Da=b&c".into());

        let snapshot = ConfigSnapshot::default().with_extras(ExtraField::ServiceCfg, &tuning);
        assert_eq!(snapshot.extras(ExtraField::ServiceCfg).unwrap(), tuning);
        assert!(snapshot.extras(ExtraField::Backup).unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ConfigSnapshot::default().with_int(IntKey::ClientPort, 2181);
        let b = ConfigSnapshot::default().with_int(IntKey::ClientPort, 2181);
        let c = a.with_int(IntKey::ClientPort, 2182);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let snapshot = ConfigSnapshot::default().with_int(IntKey::ClientPort, 2181);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["clientPort"], "2181");
        let back: ConfigSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
