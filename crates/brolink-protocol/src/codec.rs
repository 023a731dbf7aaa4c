//! Bit-exact wire layouts and the scalar codec.
//!
//! Every inline scalar has one fixed native layout:
//!
//! | tag | bytes | layout |
//! |---|---|---|
//! | bool | 4 | `i32`, 0 = false, all bits set = true |
//! | int, count, counter, enum | 8 | `u64` |
//! | double, time, interval | 8 | IEEE-754 `f64` (time: seconds since the Unix epoch) |
//! | port | 16 | `u64` number @0, `i32` protocol @8, padding @12 |
//! | addr | 16 | network-order bytes, IPv4 as `::ffff:a.b.c.d` |
//! | subnet | 20 | addr @0, `u32` prefix width @16 |
//!
//! Integers use native byte order, as the foreign library reads them in place.
//! This module is the only place that reads foreign memory as bytes.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_char, c_int, c_void};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;

use crate::error::{MarshalError, MarshalResult};
use crate::scalar::{Address, Port, Subnet, Time};
use crate::tag::TypeTag;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawPort {
    pub port_num: u64,
    pub port_proto: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawAddr {
    pub addr: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSubnet {
    pub sn_net: RawAddr,
    pub sn_width: u32,
}

/// Length-prefixed byte string header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawString {
    pub str_len: u32,
    pub str_val: *mut u8,
}

impl RawString {
    /// Header over borrowed bytes. The foreign side must treat `str_val` as read-only.
    pub fn borrowed(bytes: &[u8]) -> MarshalResult<Self> {
        let str_len = u32::try_from(bytes.len())
            .map_err(|_| MarshalError::invalid(format!("string of {} bytes", bytes.len())))?;
        Ok(Self {
            str_len,
            str_val: bytes.as_ptr().cast_mut(),
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEvArg {
    pub arg_data: *mut c_void,
    pub arg_type: c_int,
}

/// Metadata handed to compact event callbacks.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEvMeta {
    pub ev_name: *const c_char,
    pub ev_ts: f64,
    pub ev_numargs: c_int,
    pub ev_args: *mut RawEvArg,
    pub ev_start: *const u8,
    pub ev_end: *const u8,
}

const WIRE_CAPACITY: usize = 24;

/// Inline scalar bytes, 8-byte aligned so a pointer to them is ABI-correct
/// for every scalar layout.
#[derive(Clone, Copy)]
#[repr(C, align(8))]
pub struct WireBytes {
    buf: [u8; WIRE_CAPACITY],
    len: usize,
}

impl WireBytes {
    pub fn zeroed(len: usize) -> Self {
        Self {
            buf: [0; WIRE_CAPACITY],
            len: len.min(WIRE_CAPACITY),
        }
    }

    fn put(&mut self, at: usize, bytes: &[u8]) {
        if let Some(slot) = self.buf.get_mut(at..at + bytes.len()) {
            slot.copy_from_slice(bytes);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.buf.as_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for WireBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for WireBytes {}

impl Hash for WireBytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for WireBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WireBytes(")?;
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(")")
    }
}

/// A decoded inline scalar. The variant alone determines the byte layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Unsigned(u64),
    Real(f64),
    Time(Time),
    Port(Port),
    Addr(Address),
    Subnet(Subnet),
}

impl Scalar {
    pub fn shape(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Unsigned(_) => "unsigned integer",
            Scalar::Real(_) => "double",
            Scalar::Time(_) => "time",
            Scalar::Port(_) => "port",
            Scalar::Addr(_) => "address",
            Scalar::Subnet(_) => "subnet",
        }
    }

    /// Whether this shape is the payload of `tag`.
    pub fn fits(&self, tag: TypeTag) -> bool {
        match self {
            Scalar::Bool(_) => tag == TypeTag::Bool,
            Scalar::Unsigned(_) => tag.is_unsigned_family(),
            Scalar::Real(_) => matches!(tag, TypeTag::Double | TypeTag::Interval),
            Scalar::Time(_) => tag == TypeTag::Time,
            Scalar::Port(_) => tag == TypeTag::Port,
            Scalar::Addr(_) => tag == TypeTag::IpAddr,
            Scalar::Subnet(_) => tag == TypeTag::Subnet,
        }
    }

    pub fn to_wire(&self) -> WireBytes {
        match self {
            Scalar::Bool(value) => {
                let raw: i32 = if *value { !0 } else { 0 };
                let mut out = WireBytes::zeroed(size_of::<i32>());
                out.put(0, &raw.to_ne_bytes());
                out
            }
            Scalar::Unsigned(value) => {
                let mut out = WireBytes::zeroed(size_of::<u64>());
                out.put(0, &value.to_ne_bytes());
                out
            }
            Scalar::Real(value) => {
                let mut out = WireBytes::zeroed(size_of::<f64>());
                out.put(0, &value.to_ne_bytes());
                out
            }
            Scalar::Time(value) => {
                let mut out = WireBytes::zeroed(size_of::<f64>());
                out.put(0, &value.seconds().to_ne_bytes());
                out
            }
            Scalar::Port(port) => {
                let mut out = WireBytes::zeroed(size_of::<RawPort>());
                out.put(0, &port.number.to_ne_bytes());
                out.put(8, &port.protocol.to_ne_bytes());
                out
            }
            Scalar::Addr(address) => {
                let mut out = WireBytes::zeroed(size_of::<RawAddr>());
                out.put(0, &address.octets());
                out
            }
            Scalar::Subnet(subnet) => {
                let mut out = WireBytes::zeroed(size_of::<RawSubnet>());
                out.put(0, &subnet.address.octets());
                out.put(16, &subnet.width.to_ne_bytes());
                out
            }
        }
    }
}

/// Byte size of a scalar tag's layout; `None` for non-scalar tags.
pub fn wire_size(tag: TypeTag) -> Option<usize> {
    match tag {
        TypeTag::Bool => Some(size_of::<i32>()),
        TypeTag::Int | TypeTag::Count | TypeTag::Counter | TypeTag::Enum => Some(size_of::<u64>()),
        TypeTag::Double | TypeTag::Time | TypeTag::Interval => Some(size_of::<f64>()),
        TypeTag::Port => Some(size_of::<RawPort>()),
        TypeTag::IpAddr => Some(size_of::<RawAddr>()),
        TypeTag::Subnet => Some(size_of::<RawSubnet>()),
        _ => None,
    }
}

pub fn encode(tag: TypeTag, value: &Scalar) -> MarshalResult<WireBytes> {
    if tag.is_unsupported() {
        return Err(MarshalError::UnsupportedType(tag));
    }
    if !tag.is_scalar() {
        return Err(MarshalError::invalid(format!(
            "{tag} is not an inline scalar type"
        )));
    }
    if !value.fits(tag) {
        return Err(MarshalError::mismatch(tag, value.shape()));
    }
    Ok(value.to_wire())
}

fn field<const N: usize>(bytes: &[u8], at: usize) -> MarshalResult<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| MarshalError::invalid(format!("wire field at {at} out of range")))
}

pub fn decode(tag: TypeTag, bytes: &[u8]) -> MarshalResult<Scalar> {
    let size = wire_size(tag).ok_or_else(|| {
        if tag.is_unsupported() {
            MarshalError::UnsupportedType(tag)
        } else {
            MarshalError::invalid(format!("{tag} is not an inline scalar type"))
        }
    })?;
    if bytes.len() < size {
        return Err(MarshalError::invalid(format!(
            "{tag} needs {size} bytes, got {}",
            bytes.len()
        )));
    }

    let scalar = match tag {
        TypeTag::Bool => Scalar::Bool(i32::from_ne_bytes(field(bytes, 0)?) != 0),
        TypeTag::Int | TypeTag::Count | TypeTag::Counter | TypeTag::Enum => {
            Scalar::Unsigned(u64::from_ne_bytes(field(bytes, 0)?))
        }
        TypeTag::Double | TypeTag::Interval => Scalar::Real(f64::from_ne_bytes(field(bytes, 0)?)),
        TypeTag::Time => Scalar::Time(Time::from_seconds(f64::from_ne_bytes(field(bytes, 0)?))),
        TypeTag::Port => Scalar::Port(Port {
            number: u64::from_ne_bytes(field(bytes, 0)?),
            protocol: i32::from_ne_bytes(field(bytes, 8)?),
        }),
        TypeTag::IpAddr => Scalar::Addr(Address::from_octets(field(bytes, 0)?)),
        TypeTag::Subnet => Scalar::Subnet(Subnet {
            address: Address::from_octets(field(bytes, 0)?),
            width: u32::from_ne_bytes(field(bytes, 16)?),
        }),
        _ => return Err(MarshalError::invalid(format!("{tag} has no scalar decoder"))),
    };
    Ok(scalar)
}

/// Copies a foreign scalar into owned bytes, zero-filling when `data` is null.
///
/// # Safety
///
/// When non-null, `data` must point to at least `wire_size(tag)` readable bytes.
pub unsafe fn copy_from_foreign(tag: TypeTag, data: *const c_void) -> MarshalResult<WireBytes> {
    let size = wire_size(tag)
        .ok_or_else(|| MarshalError::invalid(format!("{tag} is not an inline scalar type")))?;
    let mut out = WireBytes::zeroed(size);
    if !data.is_null() {
        // SAFETY: the caller guarantees `size` readable bytes at `data`, and
        // `out.buf` holds WIRE_CAPACITY >= size bytes of its own storage.
        unsafe {
            std::ptr::copy_nonoverlapping(data.cast::<u8>(), out.buf.as_mut_ptr(), size);
        }
    }
    Ok(out)
}

/// Copies and decodes a foreign scalar.
///
/// # Safety
///
/// Same contract as [`copy_from_foreign`].
pub unsafe fn decode_foreign(tag: TypeTag, data: *const c_void) -> MarshalResult<Scalar> {
    // SAFETY: forwarded caller contract.
    let bytes = unsafe { copy_from_foreign(tag, data)? };
    decode(tag, bytes.as_bytes())
}

/// Copies the bytes of a foreign [`RawString`]; `None` for a null header.
///
/// # Safety
///
/// When non-null, `data` must point to a readable `RawString` whose
/// `str_val` addresses `str_len` readable bytes (or is null).
pub unsafe fn read_foreign_string(data: *const c_void) -> Option<Vec<u8>> {
    if data.is_null() {
        return None;
    }
    // SAFETY: non-null and points to a RawString per the caller contract;
    // read_unaligned tolerates headers packed by foreign code.
    let header = unsafe { data.cast::<RawString>().read_unaligned() };
    if header.str_val.is_null() || header.str_len == 0 {
        return Some(Vec::new());
    }
    // SAFETY: the caller guarantees `str_len` readable bytes at `str_val`.
    let bytes = unsafe { std::slice::from_raw_parts(header.str_val, header.str_len as usize) };
    Some(bytes.to_vec())
}

/// Copies a NUL-terminated foreign string, replacing invalid UTF-8.
///
/// # Safety
///
/// When non-null, `ptr` must address a NUL-terminated string.
pub unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let text = unsafe { CStr::from_ptr(ptr) };
    Some(text.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn samples() -> Vec<(TypeTag, Scalar)> {
        vec![
            (TypeTag::Bool, Scalar::Bool(true)),
            (TypeTag::Bool, Scalar::Bool(false)),
            (TypeTag::Int, Scalar::Unsigned(u64::MAX)),
            (TypeTag::Count, Scalar::Unsigned(42)),
            (TypeTag::Counter, Scalar::Unsigned(7)),
            (TypeTag::Enum, Scalar::Unsigned(3)),
            (TypeTag::Double, Scalar::Real(-2.5)),
            (TypeTag::Interval, Scalar::Real(0.125)),
            (TypeTag::Time, Scalar::Time(Time::from_seconds(1_600_000_000.5))),
            (TypeTag::Port, Scalar::Port(Port::tcp(443))),
            (
                TypeTag::IpAddr,
                Scalar::Addr("172.16.0.9".parse().expect("address")),
            ),
            (
                TypeTag::Subnet,
                Scalar::Subnet("10.0.0.0/8".parse().expect("subnet")),
            ),
        ]
    }

    #[test]
    fn every_scalar_tag_round_trips() -> anyhow::Result<()> {
        for (tag, value) in samples() {
            let wire = encode(tag, &value)?;
            assert_eq!(Some(wire.len()), wire_size(tag));
            assert_eq!(decode(tag, wire.as_bytes())?, value, "{tag}");
            // SAFETY: `wire` owns wire_size(tag) aligned bytes.
            let copied = unsafe { decode_foreign(tag, wire.as_ptr())? };
            assert_eq!(copied, value, "{tag} via foreign copy");
        }
        Ok(())
    }

    #[test]
    fn layouts_are_bit_exact() -> anyhow::Result<()> {
        assert_eq!(size_of::<RawPort>(), 16);
        assert_eq!(size_of::<RawAddr>(), 16);
        assert_eq!(size_of::<RawSubnet>(), 20);

        let truthy = encode(TypeTag::Bool, &Scalar::Bool(true))?;
        assert_eq!(truthy.as_bytes(), &[0xff; 4]);

        let port = encode(TypeTag::Port, &Scalar::Port(Port::udp(53)))?;
        assert_eq!(&port.as_bytes()[..8], &53u64.to_ne_bytes());
        assert_eq!(&port.as_bytes()[8..12], &17i32.to_ne_bytes());
        assert_eq!(&port.as_bytes()[12..], &[0; 4]);

        let subnet = encode(
            TypeTag::Subnet,
            &Scalar::Subnet("192.168.1.0/24".parse()?),
        )?;
        assert_eq!(&subnet.as_bytes()[10..16], &[0xff, 0xff, 192, 168, 1, 0]);
        assert_eq!(&subnet.as_bytes()[16..], &24u32.to_ne_bytes());
        Ok(())
    }

    #[test]
    fn nonzero_bool_decodes_true() -> anyhow::Result<()> {
        assert_eq!(decode(TypeTag::Bool, &1i32.to_ne_bytes())?, Scalar::Bool(true));
        assert_eq!(decode(TypeTag::Bool, &0i32.to_ne_bytes())?, Scalar::Bool(false));
        Ok(())
    }

    #[test]
    fn encode_rejects_incompatible_shapes() {
        assert!(matches!(
            encode(TypeTag::Count, &Scalar::Real(1.0)),
            Err(MarshalError::TypeMismatch { .. })
        ));
        assert!(matches!(
            encode(TypeTag::Time, &Scalar::Unsigned(1)),
            Err(MarshalError::TypeMismatch { .. })
        ));
        assert_eq!(
            encode(TypeTag::Pattern, &Scalar::Bool(true)),
            Err(MarshalError::UnsupportedType(TypeTag::Pattern))
        );
        assert!(matches!(
            encode(TypeTag::String, &Scalar::Bool(true)),
            Err(MarshalError::ArgumentInvalid(_))
        ));
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(decode(TypeTag::Count, &[0; 4]).is_err());
        assert!(decode(TypeTag::Subnet, &[0; 16]).is_err());
    }

    #[test]
    fn null_foreign_scalar_is_zero_filled() -> anyhow::Result<()> {
        // SAFETY: null is explicitly allowed.
        let value = unsafe { decode_foreign(TypeTag::Count, std::ptr::null())? };
        assert_eq!(value, Scalar::Unsigned(0));
        Ok(())
    }

    #[test]
    fn foreign_strings_are_copied() -> anyhow::Result<()> {
        let bytes = b"hello".to_vec();
        let header = RawString::borrowed(&bytes)?;
        // SAFETY: `header` addresses `bytes`, both alive for the call.
        let copied = unsafe { read_foreign_string((&header as *const RawString).cast()) };
        assert_eq!(copied.as_deref(), Some(&b"hello"[..]));

        // SAFETY: null is explicitly allowed.
        assert!(unsafe { read_foreign_string(std::ptr::null()) }.is_none());

        let name = CString::new("ping")?;
        // SAFETY: `name` is NUL-terminated and alive.
        assert_eq!(unsafe { read_c_str(name.as_ptr()) }.as_deref(), Some("ping"));
        Ok(())
    }
}
