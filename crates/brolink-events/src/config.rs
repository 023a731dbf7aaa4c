//! Dispatcher settings read from a [`ConfigLookup`].

use brolink_protocol::ConfigLookup;
use serde::{Deserialize, Serialize};

pub const MAX_EVENT_ARGS_KEY: &str = "brolink.max_event_args";
pub const DEFAULT_MAX_EVENT_ARGS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Inbound events claiming more arguments than this are dropped.
    pub max_event_args: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_event_args: DEFAULT_MAX_EVENT_ARGS,
        }
    }
}

impl DispatcherConfig {
    /// Reads overrides from `lookup`; absent or non-positive values keep
    /// the defaults.
    pub fn from_lookup(lookup: &dyn ConfigLookup) -> Self {
        let mut config = Self::default();
        if let Some(max) = lookup.get_int(MAX_EVENT_ARGS_KEY)
            && let Ok(max) = usize::try_from(max)
            && max > 0
        {
            config.max_event_args = max;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_protocol::ConfigContext;

    #[test]
    fn reads_limit_from_the_selected_domain() -> anyhow::Result<()> {
        let config: ConfigContext = serde_json::from_value(serde_json::json!({
            "domain": "sensor",
            "values": { "brolink.max_event_args": 64 },
            "domains": { "sensor": { "brolink.max_event_args": 8 } }
        }))?;
        assert_eq!(DispatcherConfig::from_lookup(&config).max_event_args, 8);
        Ok(())
    }

    #[test]
    fn falls_back_to_defaults() {
        let mut config = ConfigContext::new();
        assert_eq!(DispatcherConfig::from_lookup(&config), DispatcherConfig::default());
        config.insert(MAX_EVENT_ARGS_KEY, brolink_protocol::ConfigValue::Int(-1));
        assert_eq!(
            DispatcherConfig::from_lookup(&config).max_event_args,
            DEFAULT_MAX_EVENT_ARGS
        );
    }
}
