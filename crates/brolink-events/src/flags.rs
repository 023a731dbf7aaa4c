//! Connection behaviour flags handed to the transport.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ConnectionFlags: u32 {
        /// Reconnect when the peer goes away.
        const RECONNECT = 1;
        /// Queue outbound events even while disconnected.
        const ALWAYS_QUEUE = 2;
        /// Ask the peer not to cache values it receives.
        const DONT_CACHE = 8;
        /// Yield to the host loop after each processed message.
        const YIELD = 16;
        /// Ask the peer to cache values it receives.
        const CACHE = 32;
    }
}

impl ConnectionFlags {
    pub const NONE: Self = Self::empty();

    /// Parses a `|`-separated list such as `reconnect|always_queue`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut flags = Self::NONE;
        for part in raw.split('|').map(str::trim).filter(|part| !part.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            flags |= Self::from_name(&part.to_ascii_uppercase())?;
        }
        Some(flags)
    }
}

impl Default for ConnectionFlags {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ConnectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<String> = self
            .iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect();
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_values_match_the_wire_catalogue() {
        assert_eq!(ConnectionFlags::NONE.bits(), 0);
        assert_eq!(ConnectionFlags::RECONNECT.bits(), 1);
        assert_eq!(ConnectionFlags::ALWAYS_QUEUE.bits(), 2);
        assert_eq!(ConnectionFlags::DONT_CACHE.bits(), 8);
        assert_eq!(ConnectionFlags::YIELD.bits(), 16);
        assert_eq!(ConnectionFlags::CACHE.bits(), 32);
    }

    #[test]
    fn parse_and_display() {
        let flags = ConnectionFlags::parse("reconnect | always_queue").unwrap_or_default();
        assert!(flags.contains(ConnectionFlags::RECONNECT));
        assert!(!flags.contains(ConnectionFlags::CACHE));
        assert_eq!(flags.to_string(), "reconnect|always_queue");
        assert_eq!(ConnectionFlags::parse("none"), Some(ConnectionFlags::NONE));
        assert_eq!(ConnectionFlags::parse("bogus"), None);
        assert_eq!(ConnectionFlags::NONE.to_string(), "none");
        assert_eq!(
            (ConnectionFlags::YIELD | ConnectionFlags::CACHE).to_string(),
            "yield|cache"
        );
    }

    #[test]
    fn serde_round_trip_keeps_bits() -> anyhow::Result<()> {
        let flags = ConnectionFlags::RECONNECT | ConnectionFlags::DONT_CACHE;
        let json = serde_json::to_string(&flags)?;
        let back: ConnectionFlags = serde_json::from_str(&json)?;
        assert_eq!(back.bits(), 9);
        assert_eq!(ConnectionFlags::from_bits(4), None);
        assert_eq!(ConnectionFlags::from_bits_truncate(6), ConnectionFlags::ALWAYS_QUEUE);
        Ok(())
    }
}
