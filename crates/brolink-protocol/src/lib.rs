//! # brolink-protocol — Bro event protocol contract
//!
//! Shared vocabulary for every other brolink crate: the fixed type-tag
//! catalogue, the bit-exact scalar wire layouts, the error taxonomy, and
//! the configuration lookup port. It holds no native state and performs no
//! I/O.
//!
//! ## Module Overview
//!
//! - [`tag`] — TypeTag and its classification predicates
//! - [`scalar`] — Time, Port, Address, Subnet
//! - [`codec`] — raw `repr(C)` layouts, Scalar encode/decode, foreign byte copies
//! - [`config`] — ConfigLookup, ConfigContext
//! - [`error`] — MarshalError, MarshalResult

pub mod codec;
pub mod config;
pub mod error;
pub mod scalar;
pub mod tag;

pub use codec::{
    RawAddr, RawEvArg, RawEvMeta, RawPort, RawString, RawSubnet, Scalar, WireBytes, decode,
    encode, wire_size,
};
pub use config::{ConfigContext, ConfigLookup, ConfigValue};
pub use error::{MarshalError, MarshalResult};
pub use scalar::{Address, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP, Port, Subnet, Time};
pub use tag::TypeTag;
