//! The fixed catalogue of wire type tags.
//!
//! Numeric values are part of the wire contract and must never change.
//! Gaps in the implemented set (pattern, timer, any, union, func, file,
//! error) are reserved protocol types with no marshaling support.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, MarshalResult};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum TypeTag {
    #[default]
    Unknown = 0,
    Bool = 1,
    Int = 2,
    Count = 3,
    Counter = 4,
    Double = 5,
    Time = 6,
    Interval = 7,
    String = 8,
    Pattern = 9,
    Enum = 10,
    Timer = 11,
    Port = 12,
    IpAddr = 13,
    Subnet = 14,
    Any = 15,
    Table = 16,
    Union = 17,
    Record = 18,
    List = 19,
    Func = 20,
    File = 21,
    Vector = 22,
    Error = 23,
    /// Library-private extension for captured packets.
    Packet = 24,
    Set = 25,
}

impl TypeTag {
    pub const ALL: [TypeTag; 26] = [
        TypeTag::Unknown,
        TypeTag::Bool,
        TypeTag::Int,
        TypeTag::Count,
        TypeTag::Counter,
        TypeTag::Double,
        TypeTag::Time,
        TypeTag::Interval,
        TypeTag::String,
        TypeTag::Pattern,
        TypeTag::Enum,
        TypeTag::Timer,
        TypeTag::Port,
        TypeTag::IpAddr,
        TypeTag::Subnet,
        TypeTag::Any,
        TypeTag::Table,
        TypeTag::Union,
        TypeTag::Record,
        TypeTag::List,
        TypeTag::Func,
        TypeTag::File,
        TypeTag::Vector,
        TypeTag::Error,
        TypeTag::Packet,
        TypeTag::Set,
    ];

    /// Maps a raw wire value to a tag; anything outside the catalogue is `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        usize::try_from(raw)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or(TypeTag::Unknown)
    }

    /// Strict variant of [`TypeTag::from_raw`].
    pub fn try_from_raw(raw: i32) -> MarshalResult<Self> {
        let tag = Self::from_raw(raw);
        if tag == TypeTag::Unknown && raw != 0 {
            return Err(MarshalError::invalid(format!("unknown type tag {raw}")));
        }
        Ok(tag)
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Fixed-size types whose bytes are copied by value.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            TypeTag::Bool
                | TypeTag::Int
                | TypeTag::Count
                | TypeTag::Counter
                | TypeTag::Enum
                | TypeTag::Double
                | TypeTag::Time
                | TypeTag::Interval
                | TypeTag::Port
                | TypeTag::IpAddr
                | TypeTag::Subnet
        )
    }

    pub fn is_reference(self) -> bool {
        matches!(
            self,
            TypeTag::String
                | TypeTag::Table
                | TypeTag::Record
                | TypeTag::List
                | TypeTag::Vector
                | TypeTag::Set
                | TypeTag::Packet
        )
    }

    /// Reference types accessed only through a native handle. String is the
    /// one reference type that compares by content.
    pub fn is_opaque(self) -> bool {
        self.is_reference() && self != TypeTag::String
    }

    pub fn is_unsupported(self) -> bool {
        matches!(
            self,
            TypeTag::Pattern
                | TypeTag::Timer
                | TypeTag::Any
                | TypeTag::Union
                | TypeTag::Func
                | TypeTag::File
                | TypeTag::Error
        )
    }

    pub fn is_enumerable(self) -> bool {
        matches!(
            self,
            TypeTag::Table | TypeTag::Record | TypeTag::List | TypeTag::Vector | TypeTag::Set
        )
    }

    /// Tags whose payload is an unsigned 64-bit integer.
    pub fn is_unsigned_family(self) -> bool {
        matches!(
            self,
            TypeTag::Int | TypeTag::Count | TypeTag::Counter | TypeTag::Enum
        )
    }

    /// Tags whose payload is a 64-bit float.
    pub fn is_real_family(self) -> bool {
        matches!(self, TypeTag::Double | TypeTag::Time | TypeTag::Interval)
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Unknown => "unknown",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Count => "count",
            TypeTag::Counter => "counter",
            TypeTag::Double => "double",
            TypeTag::Time => "time",
            TypeTag::Interval => "interval",
            TypeTag::String => "string",
            TypeTag::Pattern => "pattern",
            TypeTag::Enum => "enum",
            TypeTag::Timer => "timer",
            TypeTag::Port => "port",
            TypeTag::IpAddr => "addr",
            TypeTag::Subnet => "subnet",
            TypeTag::Any => "any",
            TypeTag::Table => "table",
            TypeTag::Union => "union",
            TypeTag::Record => "record",
            TypeTag::List => "list",
            TypeTag::Func => "func",
            TypeTag::File => "file",
            TypeTag::Vector => "vector",
            TypeTag::Error => "error",
            TypeTag::Packet => "packet",
            TypeTag::Set => "set",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_match_catalogue_positions() {
        for (index, tag) in TypeTag::ALL.iter().enumerate() {
            assert_eq!(tag.as_raw() as usize, index);
            assert_eq!(TypeTag::from_raw(tag.as_raw()), *tag);
        }
        assert_eq!(TypeTag::Set.as_raw(), 25);
        assert_eq!(TypeTag::Packet.as_raw(), 24);
    }

    #[test]
    fn out_of_range_raw_values_map_to_unknown() {
        assert_eq!(TypeTag::from_raw(-1), TypeTag::Unknown);
        assert_eq!(TypeTag::from_raw(26), TypeTag::Unknown);
        assert!(TypeTag::try_from_raw(99).is_err());
        assert_eq!(TypeTag::try_from_raw(0), Ok(TypeTag::Unknown));
    }

    #[test]
    fn classification_partitions_catalogue() {
        for tag in TypeTag::ALL {
            let classes = [tag.is_scalar(), tag.is_reference(), tag.is_unsupported()]
                .iter()
                .filter(|flag| **flag)
                .count();
            if tag == TypeTag::Unknown {
                assert_eq!(classes, 0);
            } else {
                assert_eq!(classes, 1, "{tag} must be in exactly one class");
            }
        }
        assert!(TypeTag::String.is_reference());
        assert!(!TypeTag::String.is_opaque());
        assert!(TypeTag::Table.is_opaque());
        assert!(TypeTag::List.is_enumerable());
        assert!(!TypeTag::Packet.is_enumerable());
        assert!(TypeTag::Timer.is_unsupported());
    }
}
