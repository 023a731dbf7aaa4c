//! Explicit configuration context.
//!
//! Values are grouped into a global section plus optional named domains.
//! Lookups consult the selected domain first and fall back to the global
//! section, mirroring how peer configuration files are read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, MarshalResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i32),
    Double(f64),
    Str(String),
}

/// Read-only key lookup.
pub trait ConfigLookup: Send + Sync {
    fn lookup(&self, key: &str) -> Option<ConfigValue>;

    fn get_int(&self, key: &str) -> Option<i32> {
        match self.lookup(key)? {
            ConfigValue::Int(value) => Some(value),
            _ => None,
        }
    }

    fn get_double(&self, key: &str) -> Option<f64> {
        match self.lookup(key)? {
            ConfigValue::Double(value) => Some(value),
            _ => None,
        }
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self.lookup(key)? {
            ConfigValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, ConfigValue>,
    #[serde(default)]
    pub domains: BTreeMap<String, BTreeMap<String, ConfigValue>>,
}

impl ConfigContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> MarshalResult<Self> {
        serde_json::from_str(raw)
            .map_err(|error| MarshalError::invalid(format!("configuration: {error}")))
    }

    /// Selects the domain consulted before the global section.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn set_domain(&mut self, domain: Option<String>) {
        self.domain = domain;
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.values.insert(key.into(), value);
    }

    pub fn insert_in_domain(
        &mut self,
        domain: impl Into<String>,
        key: impl Into<String>,
        value: ConfigValue,
    ) {
        self.domains
            .entry(domain.into())
            .or_default()
            .insert(key.into(), value);
    }
}

impl ConfigLookup for ConfigContext {
    fn lookup(&self, key: &str) -> Option<ConfigValue> {
        if let Some(domain) = &self.domain
            && let Some(value) = self.domains.get(domain).and_then(|section| section.get(key))
        {
            return Some(value.clone());
        }
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_respect_value_kind() {
        let mut config = ConfigContext::new();
        config.insert("peer.port", ConfigValue::Int(47758));
        config.insert("peer.timeout", ConfigValue::Double(2.5));
        config.insert("peer.host", ConfigValue::Str("localhost".to_owned()));

        assert_eq!(config.get_int("peer.port"), Some(47758));
        assert_eq!(config.get_double("peer.timeout"), Some(2.5));
        assert_eq!(config.get_str("peer.host").as_deref(), Some("localhost"));
        assert_eq!(config.get_int("peer.host"), None);
        assert_eq!(config.lookup("missing"), None);
    }

    #[test]
    fn domain_values_shadow_global_values() -> anyhow::Result<()> {
        let config = ConfigContext::from_json_str(
            r#"{
                "values": { "debug_messages": 0, "host": "global" },
                "domains": { "sensor": { "host": "sensor-1" } }
            }"#,
        )?;
        assert_eq!(config.get_str("host").as_deref(), Some("global"));

        let config = config.with_domain("sensor");
        assert_eq!(config.get_str("host").as_deref(), Some("sensor-1"));
        assert_eq!(config.get_int("debug_messages"), Some(0));
        Ok(())
    }

    #[test]
    fn malformed_json_is_an_invalid_argument() {
        assert!(matches!(
            ConfigContext::from_json_str("{"),
            Err(MarshalError::ArgumentInvalid(_))
        ));
    }
}
