//! The tagged-union value box.
//!
//! A [`TypedValue`] matches exactly one wire type tag. Scalars are stored
//! decoded and re-encoded on demand; strings own their bytes; collection
//! tags own one wrapper each. Values never alias foreign memory: anything
//! read from a native pointer is copied first.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::ptr;

use brolink_native::{ConstPtr, NativeHandle, NativeSlot, SharedNative, WireArg};
use brolink_protocol::codec::{self, RawString};
use brolink_protocol::{
    Address, MarshalError, MarshalResult, Port, Scalar, Subnet, Time, TypeTag,
};
use chrono::{DateTime, Utc};

use crate::field::Field;
use crate::record::Record;
use crate::set::Set;
use crate::table::Table;
use crate::vector::Vector;

/// Every application-side shape accepted by [`TypedValue::new`].
#[derive(Debug)]
pub enum Source {
    Null,
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f64),
    Time(Time),
    DateTime(DateTime<Utc>),
    Port(Port),
    Addr(Address),
    Ip(IpAddr),
    Subnet(Subnet),
    Text(String),
    Bytes(Vec<u8>),
    Vector(Vector),
    Record(Record),
    Set(Set),
    Table(Table),
    Values(Vec<TypedValue>),
    Fields(Vec<Field>),
    Pairs(Vec<(TypedValue, TypedValue)>),
}

impl Source {
    pub fn shape(&self) -> &'static str {
        match self {
            Source::Null => "null",
            Source::Bool(_) => "bool",
            Source::Unsigned(_) => "unsigned integer",
            Source::Signed(_) => "signed integer",
            Source::Real(_) => "double",
            Source::Time(_) => "time",
            Source::DateTime(_) => "datetime",
            Source::Port(_) => "port",
            Source::Addr(_) => "address",
            Source::Ip(_) => "ip address",
            Source::Subnet(_) => "subnet",
            Source::Text(_) => "text",
            Source::Bytes(_) => "bytes",
            Source::Vector(_) => "vector",
            Source::Record(_) => "record",
            Source::Set(_) => "set",
            Source::Table(_) => "table",
            Source::Values(_) => "value sequence",
            Source::Fields(_) => "field sequence",
            Source::Pairs(_) => "key/value pairs",
        }
    }
}

macro_rules! source_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Source {
                fn from(value: $ty) -> Self {
                    Source::$variant(value)
                }
            }
        )*
    };
}

source_from!(
    bool => Bool,
    u64 => Unsigned,
    i64 => Signed,
    f64 => Real,
    Time => Time,
    DateTime<Utc> => DateTime,
    Port => Port,
    Address => Addr,
    IpAddr => Ip,
    Subnet => Subnet,
    String => Text,
    Vec<u8> => Bytes,
    Vector => Vector,
    Record => Record,
    Set => Set,
    Table => Table,
    Vec<TypedValue> => Values,
    Vec<Field> => Fields,
    Vec<(TypedValue, TypedValue)> => Pairs,
);

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        Source::Text(value.to_owned())
    }
}

#[derive(Debug)]
pub(crate) enum Payload {
    Empty,
    Scalar(Scalar),
    Str(Vec<u8>),
    Vector(Vector),
    Record(Record),
    Set(Set),
    Table(Table),
    Opaque(usize),
}

/// Borrowed view of a value's payload.
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'a> {
    Null,
    Scalar(Scalar),
    Str(&'a [u8]),
    Vector(&'a Vector),
    Record(&'a Record),
    Set(&'a Set),
    Table(&'a Table),
    Opaque(usize),
}

#[derive(Debug)]
pub struct TypedValue {
    tag: TypeTag,
    type_name: Option<String>,
    payload: Payload,
}

impl TypedValue {
    /// Validated construction. Unsupported tags always fail; scalar tags
    /// accept their matching shapes; collection tags accept null, their own
    /// wrapper, or a sequence the wrapper can be built from.
    pub fn new(api: &SharedNative, source: Source, tag: TypeTag) -> MarshalResult<Self> {
        if tag.is_unsupported() || tag == TypeTag::Packet {
            return Err(MarshalError::UnsupportedType(tag));
        }
        let payload = if tag.is_scalar() {
            Payload::Scalar(scalar_for(tag, source)?)
        } else {
            reference_for(api, tag, source)?
        };
        Ok(Self::from_parts(tag, payload))
    }

    pub fn with_type_name(
        api: &SharedNative,
        source: Source,
        tag: TypeTag,
        type_name: impl Into<String>,
    ) -> MarshalResult<Self> {
        let mut value = Self::new(api, source, tag)?;
        value.type_name = Some(type_name.into());
        Ok(value)
    }

    pub(crate) fn from_parts(tag: TypeTag, payload: Payload) -> Self {
        Self {
            tag,
            type_name: None,
            payload,
        }
    }

    /// Builds a scalar value, checking that `scalar` is the payload of `tag`.
    pub fn from_scalar(tag: TypeTag, scalar: Scalar) -> MarshalResult<Self> {
        codec::encode(tag, &scalar)?;
        Ok(Self::from_parts(tag, Payload::Scalar(scalar)))
    }

    /// A value without payload. Valid for reference tags and `Unknown`.
    pub fn null(tag: TypeTag) -> MarshalResult<Self> {
        if tag.is_unsupported() {
            return Err(MarshalError::UnsupportedType(tag));
        }
        if tag.is_scalar() {
            return Err(MarshalError::mismatch(tag, "null"));
        }
        Ok(Self::from_parts(tag, Payload::Empty))
    }

    pub fn bool(value: bool) -> Self {
        Self::from_parts(TypeTag::Bool, Payload::Scalar(Scalar::Bool(value)))
    }

    /// Signed integers travel as their two's-complement bit pattern.
    pub fn int(value: i64) -> Self {
        Self::from_parts(
            TypeTag::Int,
            Payload::Scalar(Scalar::Unsigned(value as u64)),
        )
    }

    pub fn count(value: u64) -> Self {
        Self::from_parts(TypeTag::Count, Payload::Scalar(Scalar::Unsigned(value)))
    }

    pub fn counter(value: u64) -> Self {
        Self::from_parts(TypeTag::Counter, Payload::Scalar(Scalar::Unsigned(value)))
    }

    pub fn enum_ordinal(value: u64) -> Self {
        Self::from_parts(TypeTag::Enum, Payload::Scalar(Scalar::Unsigned(value)))
    }

    pub fn double(value: f64) -> Self {
        Self::from_parts(TypeTag::Double, Payload::Scalar(Scalar::Real(value)))
    }

    pub fn time(value: impl Into<Time>) -> Self {
        Self::from_parts(TypeTag::Time, Payload::Scalar(Scalar::Time(value.into())))
    }

    pub fn interval(seconds: f64) -> Self {
        Self::from_parts(TypeTag::Interval, Payload::Scalar(Scalar::Real(seconds)))
    }

    pub fn port(value: Port) -> Self {
        Self::from_parts(TypeTag::Port, Payload::Scalar(Scalar::Port(value)))
    }

    pub fn addr(value: impl Into<Address>) -> Self {
        Self::from_parts(TypeTag::IpAddr, Payload::Scalar(Scalar::Addr(value.into())))
    }

    pub fn subnet(value: Subnet) -> Self {
        Self::from_parts(TypeTag::Subnet, Payload::Scalar(Scalar::Subnet(value)))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::from_parts(TypeTag::String, Payload::Str(value.into().into_bytes()))
    }

    /// Strings on the wire are byte strings; they need not be UTF-8.
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::from_parts(TypeTag::String, Payload::Str(value.into()))
    }

    pub fn vector(value: Vector) -> Self {
        Self::from_parts(TypeTag::Vector, Payload::Vector(value))
    }

    pub fn record(value: Record) -> Self {
        Self::from_parts(TypeTag::Record, Payload::Record(value))
    }

    /// A record used as an ordered tuple.
    pub fn list(value: Record) -> Self {
        Self::from_parts(TypeTag::List, Payload::Record(value))
    }

    pub fn set(value: Set) -> Self {
        Self::from_parts(TypeTag::Set, Payload::Set(value))
    }

    pub fn table(value: Table) -> Self {
        Self::from_parts(TypeTag::Table, Payload::Table(value))
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// The one mutable attribute of a value.
    pub fn set_type_name(&mut self, type_name: Option<String>) {
        self.type_name = type_name;
    }

    pub fn has_value(&self) -> bool {
        !matches!(self.payload, Payload::Empty)
    }

    pub fn value(&self) -> ValueRef<'_> {
        match &self.payload {
            Payload::Empty => ValueRef::Null,
            Payload::Scalar(scalar) => ValueRef::Scalar(*scalar),
            Payload::Str(bytes) => ValueRef::Str(bytes),
            Payload::Vector(vector) => ValueRef::Vector(vector),
            Payload::Record(record) => ValueRef::Record(record),
            Payload::Set(set) => ValueRef::Set(set),
            Payload::Table(table) => ValueRef::Table(table),
            Payload::Opaque(addr) => ValueRef::Opaque(*addr),
        }
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self.payload {
            Payload::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_scalar()? {
            Scalar::Bool(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self.as_scalar()? {
            Scalar::Unsigned(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_unsigned().map(|value| value as i64)
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.as_scalar()? {
            Scalar::Real(value) => Some(value),
            Scalar::Time(value) => Some(value.seconds()),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Time> {
        match self.as_scalar()? {
            Scalar::Time(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<Port> {
        match self.as_scalar()? {
            Scalar::Port(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_addr(&self) -> Option<Address> {
        match self.as_scalar()? {
            Scalar::Addr(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_subnet(&self) -> Option<Subnet> {
        match self.as_scalar()? {
            Scalar::Subnet(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Str(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match &self.payload {
            Payload::Vector(vector) => Some(vector),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match &self.payload {
            Payload::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match &self.payload {
            Payload::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match &self.payload {
            Payload::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Deep copy; collections get a new owned native handle.
    pub fn try_clone(&self) -> MarshalResult<Self> {
        let payload = match &self.payload {
            Payload::Empty => Payload::Empty,
            Payload::Scalar(scalar) => Payload::Scalar(*scalar),
            Payload::Str(bytes) => Payload::Str(bytes.clone()),
            Payload::Vector(vector) => Payload::Vector(vector.try_clone()?),
            Payload::Record(record) => Payload::Record(record.try_clone()?),
            Payload::Set(set) => Payload::Set(set.try_clone()?),
            Payload::Table(table) => Payload::Table(table.try_clone()?),
            Payload::Opaque(addr) => Payload::Opaque(*addr),
        };
        Ok(Self {
            tag: self.tag,
            type_name: self.type_name.clone(),
            payload,
        })
    }

    /// Copy without the specialized name, the form native collections
    /// hand back on reads.
    pub(crate) fn to_member(&self) -> MarshalResult<Self> {
        let mut member = self.try_clone()?;
        member.type_name = None;
        Ok(member)
    }

    /// Lends an ABI-correct pointer to the payload for the duration of `f`:
    /// scalar bytes, a transient string header, or the collection handle.
    /// Nothing handed to `f` may be retained after it returns.
    pub fn with_native<R>(&self, f: impl for<'a> FnOnce(WireArg<'a>) -> R) -> MarshalResult<R> {
        let type_name = self
            .type_name
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| MarshalError::invalid("type name contains a NUL byte"))?;
        let wire;
        let header;
        let data: ConstPtr = match &self.payload {
            Payload::Empty => ptr::null(),
            Payload::Scalar(scalar) => {
                wire = scalar.to_wire();
                wire.as_ptr()
            }
            Payload::Str(bytes) => {
                header = RawString::borrowed(bytes)?;
                (&header as *const RawString).cast()
            }
            Payload::Vector(vector) => vector.as_ptr()?,
            Payload::Record(record) => record.as_ptr()?,
            Payload::Set(set) => set.as_ptr()?,
            Payload::Table(table) => table.as_ptr()?,
            Payload::Opaque(addr) => *addr as ConstPtr,
        };
        // SAFETY: `data` is null, or addresses `wire`, `header` (over bytes
        // owned by `self`), a live collection owned by `self`, or the
        // retained opaque pointer. All of them outlive `f`.
        let arg = unsafe { WireArg::new(self.tag, type_name.as_deref(), data) };
        Ok(f(arg))
    }

    /// Copies a foreign value into an owned `TypedValue`.
    ///
    /// Scalars are copied (zero-filled when `data` is null); strings and
    /// collections are cloned element by element into new owned storage;
    /// tags without an interpretation keep the raw pointer value.
    ///
    /// # Safety
    ///
    /// `data` must be null or address a value in the layout of `tag`;
    /// collection tags require a live collection of `api` that is not
    /// mutated during the call.
    pub unsafe fn from_foreign(
        api: &SharedNative,
        data: ConstPtr,
        tag: TypeTag,
    ) -> MarshalResult<Self> {
        if tag.is_scalar() {
            // SAFETY: forwarded caller contract.
            let scalar = unsafe { codec::decode_foreign(tag, data)? };
            return Ok(Self::from_parts(tag, Payload::Scalar(scalar)));
        }
        if data.is_null() && tag.is_reference() {
            return Ok(Self::from_parts(tag, Payload::Empty));
        }
        let payload = match tag {
            TypeTag::String => {
                // SAFETY: forwarded caller contract; `data` is a string header.
                match unsafe { codec::read_foreign_string(data) } {
                    Some(bytes) => Payload::Str(bytes),
                    None => Payload::Empty,
                }
            }
            TypeTag::Vector => {
                // SAFETY: forwarded caller contract; `data` is a live vector.
                Payload::Vector(unsafe { Vector::clone_foreign(api, data)? })
            }
            TypeTag::Record | TypeTag::List => {
                // SAFETY: forwarded caller contract; `data` is a live record.
                Payload::Record(unsafe { Record::clone_foreign(api, data)? })
            }
            TypeTag::Set => {
                // SAFETY: forwarded caller contract; `data` is a live set.
                Payload::Set(unsafe { Set::clone_foreign(api, data)? })
            }
            TypeTag::Table => {
                // SAFETY: forwarded caller contract; `data` is a live table.
                Payload::Table(unsafe { Table::clone_foreign(api, data)? })
            }
            _ => Payload::Opaque(data as usize),
        };
        Ok(Self::from_parts(tag, payload))
    }

    /// Copies a slot out of a collection owned or viewed by `handle`.
    pub(crate) fn read_slot(handle: &NativeHandle, slot: NativeSlot<'_>) -> MarshalResult<Self> {
        // SAFETY: slots are only produced by a live handle that stays
        // borrowed (so unmodified) while the slot exists, and nested
        // collections belong to the same native api as the handle.
        unsafe { Self::from_foreign(handle.api(), slot.data(), slot.tag()) }
    }
}

/// Re-lends a slot of one collection to a native call on another.
pub(crate) fn slot_arg<'h>(slot: NativeSlot<'h>) -> WireArg<'h> {
    // SAFETY: the slot's data stays valid and unmodified while the handle
    // that produced it is borrowed, which `'h` ties the argument to.
    unsafe { WireArg::new(slot.tag(), None, slot.data()) }
}

fn scalar_for(tag: TypeTag, source: Source) -> MarshalResult<Scalar> {
    let scalar = match (tag, source) {
        (TypeTag::Bool, Source::Bool(value)) => Scalar::Bool(value),
        (tag, Source::Unsigned(value)) if tag.is_unsigned_family() => Scalar::Unsigned(value),
        (TypeTag::Int, Source::Signed(value)) => Scalar::Unsigned(value as u64),
        (tag, Source::Signed(value)) if tag.is_unsigned_family() => Scalar::Unsigned(
            u64::try_from(value).map_err(|_| MarshalError::mismatch(tag, "negative integer"))?,
        ),
        (TypeTag::Double | TypeTag::Interval, Source::Real(value)) => Scalar::Real(value),
        (TypeTag::Time, Source::Time(value)) => Scalar::Time(value),
        (TypeTag::Time, Source::Real(seconds)) => Scalar::Time(Time::from_seconds(seconds)),
        (TypeTag::Time, Source::DateTime(value)) => Scalar::Time(value.into()),
        (TypeTag::Port, Source::Port(value)) => Scalar::Port(value),
        (TypeTag::IpAddr, Source::Addr(value)) => Scalar::Addr(value),
        (TypeTag::IpAddr, Source::Ip(value)) => Scalar::Addr(value.into()),
        (TypeTag::IpAddr, Source::Text(text)) => Scalar::Addr(text.parse()?),
        (TypeTag::Subnet, Source::Subnet(value)) => Scalar::Subnet(value),
        (TypeTag::Subnet, Source::Text(text)) => Scalar::Subnet(text.parse()?),
        (tag, source) => return Err(MarshalError::mismatch(tag, source.shape())),
    };
    Ok(scalar)
}

fn reference_for(api: &SharedNative, tag: TypeTag, source: Source) -> MarshalResult<Payload> {
    let payload = match (tag, source) {
        (_, Source::Null) => Payload::Empty,
        (TypeTag::String, Source::Text(text)) => Payload::Str(text.into_bytes()),
        (TypeTag::String, Source::Bytes(bytes)) => Payload::Str(bytes),
        (TypeTag::Vector, Source::Vector(vector)) => Payload::Vector(vector),
        (TypeTag::Vector, Source::Values(values)) => {
            Payload::Vector(Vector::from_values(api.clone(), values)?)
        }
        (TypeTag::Record | TypeTag::List, Source::Record(record)) => Payload::Record(record),
        (TypeTag::Record | TypeTag::List, Source::Fields(fields)) => {
            Payload::Record(Record::from_fields(api.clone(), fields)?)
        }
        (TypeTag::Record | TypeTag::List, Source::Values(values)) => {
            Payload::Record(Record::from_values(api.clone(), values)?)
        }
        (TypeTag::Set, Source::Set(set)) => Payload::Set(set),
        (TypeTag::Set, Source::Values(values)) => {
            Payload::Set(Set::from_values(api.clone(), values)?)
        }
        (TypeTag::Table, Source::Table(table)) => Payload::Table(table),
        (TypeTag::Table, Source::Pairs(pairs)) => {
            Payload::Table(Table::from_pairs(api.clone(), pairs)?)
        }
        (tag, source) => return Err(MarshalError::mismatch(tag, source.shape())),
    };
    Ok(payload)
}

impl Payload {
    fn same(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Empty, Payload::Empty) => true,
            (Payload::Scalar(left), Payload::Scalar(right)) => left.to_wire() == right.to_wire(),
            (Payload::Str(left), Payload::Str(right)) => left == right,
            (Payload::Vector(left), Payload::Vector(right)) => left.addr() == right.addr(),
            (Payload::Record(left), Payload::Record(right)) => left.addr() == right.addr(),
            (Payload::Set(left), Payload::Set(right)) => left.addr() == right.addr(),
            (Payload::Table(left), Payload::Table(right)) => left.addr() == right.addr(),
            (Payload::Opaque(left), Payload::Opaque(right)) => left == right,
            _ => false,
        }
    }
}

/// Scalars compare by value, strings by content, collections by identity.
impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
            && self.type_name == other.type_name
            && self.payload.same(&other.payload)
    }
}

impl Eq for TypedValue {}

impl Hash for TypedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
        self.type_name.hash(state);
        std::mem::discriminant(&self.payload).hash(state);
        match &self.payload {
            Payload::Empty => {}
            Payload::Scalar(scalar) => scalar.to_wire().hash(state),
            Payload::Str(bytes) => bytes.hash(state),
            Payload::Vector(vector) => vector.addr().hash(state),
            Payload::Record(record) => record.addr().hash(state),
            Payload::Set(set) => set.addr().hash(state),
            Payload::Table(table) => table.addr().hash(state),
            Payload::Opaque(addr) => addr.hash(state),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Empty => write!(f, "{}(null)", self.tag),
            Payload::Scalar(Scalar::Bool(value)) => f.write_str(if *value { "T" } else { "F" }),
            Payload::Scalar(Scalar::Unsigned(value)) if self.tag == TypeTag::Int => {
                write!(f, "{}", *value as i64)
            }
            Payload::Scalar(Scalar::Unsigned(value)) => write!(f, "{value}"),
            Payload::Scalar(Scalar::Real(value)) => write!(f, "{value}"),
            Payload::Scalar(Scalar::Time(value)) => write!(f, "{value}"),
            Payload::Scalar(Scalar::Port(value)) => write!(f, "{value}"),
            Payload::Scalar(Scalar::Addr(value)) => write!(f, "{value}"),
            Payload::Scalar(Scalar::Subnet(value)) => write!(f, "{value}"),
            Payload::Str(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Payload::Vector(_) | Payload::Record(_) | Payload::Set(_) | Payload::Table(_) => {
                write!(f, "{}@{:#x}", self.tag, self.identity())
            }
            Payload::Opaque(addr) => write!(f, "{}@{addr:#x}", self.tag),
        }
    }
}

impl TypedValue {
    fn identity(&self) -> usize {
        match &self.payload {
            Payload::Vector(vector) => vector.addr(),
            Payload::Record(record) => record.addr(),
            Payload::Set(set) => set.addr(),
            Payload::Table(table) => table.addr(),
            Payload::Opaque(addr) => *addr,
            _ => 0,
        }
    }
}
