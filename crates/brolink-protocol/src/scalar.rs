//! Domain types for the inline scalar wire values.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, MarshalResult};

/// Seconds since 1970-01-01T00:00:00 UTC, as carried on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(f64);

impl Time {
    pub const EPOCH: Time = Time(0.0);

    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    /// `None` when the value is not finite or falls outside chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if !self.0.is_finite() {
            return None;
        }
        let whole = self.0.floor();
        let nanos = ((self.0 - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp() as f64 + f64::from(value.timestamp_subsec_nanos()) / 1e9)
    }
}

impl From<f64> for Time {
    fn from(seconds: f64) -> Self {
        Self(seconds)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(datetime) => write!(f, "{}", datetime.to_rfc3339()),
            None => write!(f, "{}", self.0),
        }
    }
}

pub const IPPROTO_ICMP: i32 = 1;
pub const IPPROTO_TCP: i32 = 6;
pub const IPPROTO_UDP: i32 = 17;
pub const IPPROTO_ICMPV6: i32 = 58;

/// A transport-layer port and its IP protocol number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub number: u64,
    pub protocol: i32,
}

impl Port {
    pub fn new(number: u64, protocol: i32) -> Self {
        Self { number, protocol }
    }

    pub fn tcp(number: u64) -> Self {
        Self::new(number, IPPROTO_TCP)
    }

    pub fn udp(number: u64) -> Self {
        Self::new(number, IPPROTO_UDP)
    }

    pub fn icmp(number: u64) -> Self {
        Self::new(number, IPPROTO_ICMP)
    }

    pub fn protocol_name(&self) -> Option<&'static str> {
        match self.protocol {
            IPPROTO_ICMP => Some("icmp"),
            IPPROTO_TCP => Some("tcp"),
            IPPROTO_UDP => Some("udp"),
            IPPROTO_ICMPV6 => Some("icmpv6"),
            _ => None,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol_name() {
            Some(name) => write!(f, "{}/{name}", self.number),
            None => write!(f, "{}/iproto({})", self.number, self.protocol),
        }
    }
}

impl FromStr for Port {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (number, protocol) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| MarshalError::invalid(format!("port `{s}` lacks a protocol")))?;
        let number = number
            .parse::<u64>()
            .map_err(|error| MarshalError::invalid(format!("port number `{number}`: {error}")))?;
        let protocol = match protocol.to_ascii_lowercase().as_str() {
            "icmp" => IPPROTO_ICMP,
            "tcp" => IPPROTO_TCP,
            "udp" => IPPROTO_UDP,
            "icmpv6" => IPPROTO_ICMPV6,
            other => other
                .strip_prefix("iproto(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|raw| raw.parse::<i32>().ok())
                .ok_or_else(|| MarshalError::invalid(format!("unknown protocol `{other}`")))?,
        };
        Ok(Self { number, protocol })
    }
}

/// An IP address as 16 network-order bytes. IPv4 values use the
/// IPv4-mapped IPv6 form (`::ffff:a.b.c.d`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address([u8; 16]);

impl Address {
    pub fn from_octets(octets: [u8; 16]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0
    }

    pub fn is_ipv4(&self) -> bool {
        Ipv6Addr::from(self.0).to_ipv4_mapped().is_some()
    }

    pub fn to_ip_addr(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.0);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(value: Ipv4Addr) -> Self {
        Self(value.to_ipv6_mapped().octets())
    }
}

impl From<Ipv6Addr> for Address {
    fn from(value: Ipv6Addr) -> Self {
        Self(value.octets())
    }
}

impl From<IpAddr> for Address {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl FromStr for Address {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<IpAddr>()
            .map(Address::from)
            .map_err(|error| MarshalError::invalid(format!("address `{s}`: {error}")))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ip_addr())
    }
}

/// A network prefix. For IPv4 subnets the width counts IPv4 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub address: Address,
    pub width: u32,
}

impl Subnet {
    pub fn new(address: impl Into<Address>, width: u32) -> MarshalResult<Self> {
        let address = address.into();
        let limit = if address.is_ipv4() { 32 } else { 128 };
        if width > limit {
            return Err(MarshalError::invalid(format!(
                "prefix width {width} exceeds {limit} for {address}"
            )));
        }
        Ok(Self { address, width })
    }

    pub fn contains(&self, candidate: &Address) -> bool {
        if self.address.is_ipv4() != candidate.is_ipv4() {
            return false;
        }
        let bits = if self.address.is_ipv4() {
            96 + self.width.min(32)
        } else {
            self.width.min(128)
        };
        let mask = if bits == 0 {
            0
        } else {
            u128::MAX << (128 - bits)
        };
        let network = u128::from_be_bytes(self.address.octets());
        let candidate = u128::from_be_bytes(candidate.octets());
        network & mask == candidate & mask
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.width)
    }
}

impl FromStr for Subnet {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, width) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| MarshalError::invalid(format!("subnet `{s}` lacks a prefix width")))?;
        let width = width
            .parse::<u32>()
            .map_err(|error| MarshalError::invalid(format!("prefix width `{width}`: {error}")))?;
        Subnet::new(address.parse::<Address>()?, width)
    }
}
