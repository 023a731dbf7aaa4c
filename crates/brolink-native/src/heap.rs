//! In-process implementation of [`NativeApi`].
//!
//! Collections live on the Rust heap behind `Box::into_raw` pointers and
//! deep-copy every value they store, matching the copy-on-insert behavior of
//! the foreign library. Sets and tables fix their member types on first
//! insert. Values with tags the library cannot interpret are stored as the
//! raw pointer itself.

#![allow(unsafe_code)]

use std::ffi::CStr;

use brolink_protocol::codec::{self, RawString, WireBytes};
use brolink_protocol::TypeTag;

use crate::api::{ConstPtr, NativeApi, RawPtr, RawSlot, SetVisitor, TableVisitor};

/// Stateless heap-backed native API.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapNative;

impl HeapNative {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug)]
struct HeapString {
    bytes: Box<[u8]>,
    header: RawString,
}

impl HeapString {
    fn new(bytes: Vec<u8>) -> Option<Self> {
        let bytes = bytes.into_boxed_slice();
        let header = RawString::borrowed(&bytes).ok()?;
        Some(Self { bytes, header })
    }
}

impl Clone for HeapString {
    fn clone(&self) -> Self {
        let bytes = self.bytes.clone();
        let header = RawString {
            str_len: self.header.str_len,
            str_val: bytes.as_ptr().cast_mut(),
        };
        Self { bytes, header }
    }
}

impl PartialEq for HeapString {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HeapValue {
    Scalar { tag: i32, bytes: WireBytes },
    Str(HeapString),
    Record { tag: i32, record: Box<HeapRecord> },
    Vector(Box<HeapVector>),
    Set(Box<HeapSet>),
    Table(Box<HeapTable>),
    Opaque { tag: i32, addr: usize },
}

impl HeapValue {
    /// Deep copy of a foreign value.
    ///
    /// # Safety
    ///
    /// `value` must address a value in the layout of `tag`; collection tags
    /// require a collection allocated by [`HeapNative`].
    unsafe fn copy_from(tag: i32, value: ConstPtr) -> Option<HeapValue> {
        let kind = TypeTag::from_raw(tag);
        if kind.is_scalar() {
            // SAFETY: forwarded caller contract for scalar layouts.
            let bytes = unsafe { codec::copy_from_foreign(kind, value) }.ok()?;
            return Some(HeapValue::Scalar { tag, bytes });
        }
        if kind.is_reference() && value.is_null() {
            return None;
        }
        let copied = match kind {
            TypeTag::String => {
                // SAFETY: `value` addresses a RawString per the caller contract.
                let bytes = unsafe { codec::read_foreign_string(value) }?;
                HeapValue::Str(HeapString::new(bytes)?)
            }
            TypeTag::Record | TypeTag::List => {
                // SAFETY: non-null HeapRecord from this implementation.
                let record = unsafe { deref::<HeapRecord>(value) };
                HeapValue::Record {
                    tag,
                    record: Box::new(record.clone()),
                }
            }
            TypeTag::Vector => {
                // SAFETY: non-null HeapVector from this implementation.
                HeapValue::Vector(Box::new(unsafe { deref::<HeapVector>(value) }.clone()))
            }
            TypeTag::Set => {
                // SAFETY: non-null HeapSet from this implementation.
                HeapValue::Set(Box::new(unsafe { deref::<HeapSet>(value) }.clone()))
            }
            TypeTag::Table => {
                // SAFETY: non-null HeapTable from this implementation.
                HeapValue::Table(Box::new(unsafe { deref::<HeapTable>(value) }.clone()))
            }
            _ => HeapValue::Opaque {
                tag,
                addr: value as usize,
            },
        };
        Some(copied)
    }

    fn tag(&self) -> i32 {
        match self {
            HeapValue::Scalar { tag, .. }
            | HeapValue::Record { tag, .. }
            | HeapValue::Opaque { tag, .. } => *tag,
            HeapValue::Str(_) => TypeTag::String.as_raw(),
            HeapValue::Vector(_) => TypeTag::Vector.as_raw(),
            HeapValue::Set(_) => TypeTag::Set.as_raw(),
            HeapValue::Table(_) => TypeTag::Table.as_raw(),
        }
    }

    fn as_ptr(&self) -> ConstPtr {
        match self {
            HeapValue::Scalar { bytes, .. } => bytes.as_ptr(),
            HeapValue::Str(string) => (&string.header as *const RawString).cast(),
            HeapValue::Record { record, .. } => (&**record as *const HeapRecord).cast(),
            HeapValue::Vector(vector) => (&**vector as *const HeapVector).cast(),
            HeapValue::Set(set) => (&**set as *const HeapSet).cast(),
            HeapValue::Table(table) => (&**table as *const HeapTable).cast(),
            HeapValue::Opaque { addr, .. } => *addr as ConstPtr,
        }
    }

    fn slot(&self) -> RawSlot {
        RawSlot {
            data: self.as_ptr(),
            tag: self.tag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct HeapField {
    name: Option<String>,
    value: Box<HeapValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HeapRecord {
    fields: Vec<HeapField>,
}

impl HeapRecord {
    fn position(&self, name: &CStr) -> Option<usize> {
        let name = name.to_string_lossy();
        self.fields
            .iter()
            .position(|field| field.name.as_deref().unwrap_or("") == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HeapVector {
    items: Vec<Box<HeapValue>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HeapSet {
    tag: Option<i32>,
    items: Vec<Box<HeapValue>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HeapTable {
    key_tag: Option<i32>,
    value_tag: Option<i32>,
    entries: Vec<(Box<HeapValue>, Box<HeapValue>)>,
}

/// # Safety
///
/// `ptr` must be a live, non-null `T` from this implementation.
unsafe fn deref<'a, T>(ptr: ConstPtr) -> &'a T {
    // SAFETY: forwarded caller contract.
    unsafe { &*ptr.cast::<T>() }
}

/// # Safety
///
/// `ptr` must be a live, non-null, unaliased `T` from this implementation.
unsafe fn deref_mut<'a, T>(ptr: RawPtr) -> &'a mut T {
    // SAFETY: forwarded caller contract.
    unsafe { &mut *ptr.cast::<T>() }
}

fn allocate<T: Default>() -> RawPtr {
    Box::into_raw(Box::<T>::default()).cast()
}

/// # Safety
///
/// `ptr` must be null or a `T` returned by [`allocate`] that was not freed.
unsafe fn free<T>(ptr: RawPtr) {
    if !ptr.is_null() {
        // SAFETY: produced by Box::into_raw in `allocate`, released once.
        drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
    }
}

fn untyped(tag: i32) -> bool {
    TypeTag::from_raw(tag) == TypeTag::Unknown
}

// SAFETY (applies to every method below): callers uphold the NativeApi
// contract, so non-null collection pointers address live collections of
// the named kind allocated here.
impl NativeApi for HeapNative {
    fn record_new(&self) -> RawPtr {
        allocate::<HeapRecord>()
    }

    unsafe fn record_free(&self, record: RawPtr) {
        // SAFETY: see impl note.
        unsafe { free::<HeapRecord>(record) }
    }

    unsafe fn record_len(&self, record: ConstPtr) -> usize {
        if record.is_null() {
            return 0;
        }
        // SAFETY: see impl note.
        unsafe { deref::<HeapRecord>(record) }.fields.len()
    }

    unsafe fn record_add_val(
        &self,
        record: RawPtr,
        name: Option<&CStr>,
        tag: i32,
        _type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        if record.is_null() {
            return false;
        }
        // SAFETY: see impl note; `value` follows the layout of `tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        // SAFETY: see impl note.
        let record = unsafe { deref_mut::<HeapRecord>(record) };
        record.fields.push(HeapField {
            name: name.map(|name| name.to_string_lossy().into_owned()),
            value: Box::new(value),
        });
        true
    }

    unsafe fn record_nth_val(&self, record: ConstPtr, index: usize) -> Option<RawSlot> {
        if record.is_null() {
            return None;
        }
        // SAFETY: see impl note.
        let record = unsafe { deref::<HeapRecord>(record) };
        record.fields.get(index).map(|field| field.value.slot())
    }

    unsafe fn record_nth_name(&self, record: ConstPtr, index: usize) -> Option<String> {
        if record.is_null() {
            return None;
        }
        // SAFETY: see impl note.
        let record = unsafe { deref::<HeapRecord>(record) };
        record.fields.get(index)?.name.clone()
    }

    unsafe fn record_named_val(&self, record: ConstPtr, name: &CStr) -> Option<RawSlot> {
        if record.is_null() {
            return None;
        }
        // SAFETY: see impl note.
        let record = unsafe { deref::<HeapRecord>(record) };
        let index = record.position(name)?;
        record.fields.get(index).map(|field| field.value.slot())
    }

    unsafe fn record_set_nth_val(
        &self,
        record: RawPtr,
        index: usize,
        tag: i32,
        _type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        if record.is_null() {
            return false;
        }
        // SAFETY: see impl note; `value` follows the layout of `tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        // SAFETY: see impl note.
        let record = unsafe { deref_mut::<HeapRecord>(record) };
        match record.fields.get_mut(index) {
            Some(field) => {
                field.value = Box::new(value);
                true
            }
            None => false,
        }
    }

    unsafe fn record_set_named_val(
        &self,
        record: RawPtr,
        name: &CStr,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        if record.is_null() {
            return false;
        }
        // SAFETY: see impl note.
        let index = unsafe { deref::<HeapRecord>(record) }.position(name);
        match index {
            // SAFETY: forwarded; same record and value.
            Some(index) => unsafe { self.record_set_nth_val(record, index, tag, type_name, value) },
            None => false,
        }
    }

    fn vector_new(&self) -> RawPtr {
        allocate::<HeapVector>()
    }

    unsafe fn vector_free(&self, vector: RawPtr) {
        // SAFETY: see impl note.
        unsafe { free::<HeapVector>(vector) }
    }

    unsafe fn vector_len(&self, vector: ConstPtr) -> usize {
        if vector.is_null() {
            return 0;
        }
        // SAFETY: see impl note.
        unsafe { deref::<HeapVector>(vector) }.items.len()
    }

    unsafe fn vector_add_val(
        &self,
        vector: RawPtr,
        tag: i32,
        _type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        if vector.is_null() {
            return false;
        }
        // SAFETY: see impl note; `value` follows the layout of `tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        // SAFETY: see impl note.
        unsafe { deref_mut::<HeapVector>(vector) }
            .items
            .push(Box::new(value));
        true
    }

    unsafe fn vector_nth_val(&self, vector: ConstPtr, index: usize) -> Option<RawSlot> {
        if vector.is_null() {
            return None;
        }
        // SAFETY: see impl note.
        let vector = unsafe { deref::<HeapVector>(vector) };
        vector.items.get(index).map(|item| item.slot())
    }

    unsafe fn vector_set_nth_val(
        &self,
        vector: RawPtr,
        index: usize,
        tag: i32,
        _type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        if vector.is_null() {
            return false;
        }
        // SAFETY: see impl note; `value` follows the layout of `tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        // SAFETY: see impl note.
        let vector = unsafe { deref_mut::<HeapVector>(vector) };
        match vector.items.get_mut(index) {
            Some(slot) => {
                *slot = Box::new(value);
                true
            }
            None => false,
        }
    }

    fn set_new(&self) -> RawPtr {
        allocate::<HeapSet>()
    }

    unsafe fn set_free(&self, set: RawPtr) {
        // SAFETY: see impl note.
        unsafe { free::<HeapSet>(set) }
    }

    unsafe fn set_len(&self, set: ConstPtr) -> usize {
        if set.is_null() {
            return 0;
        }
        // SAFETY: see impl note.
        unsafe { deref::<HeapSet>(set) }.items.len()
    }

    unsafe fn set_tag(&self, set: ConstPtr) -> i32 {
        if set.is_null() {
            return 0;
        }
        // SAFETY: see impl note.
        unsafe { deref::<HeapSet>(set) }.tag.unwrap_or(0)
    }

    unsafe fn set_insert(&self, set: RawPtr, tag: i32, value: ConstPtr) -> bool {
        if set.is_null() || untyped(tag) {
            return false;
        }
        // SAFETY: see impl note.
        let set = unsafe { deref_mut::<HeapSet>(set) };
        if let Some(fixed) = set.tag
            && fixed != tag
        {
            return false;
        }
        // SAFETY: `value` follows the layout of `tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        if !set.items.iter().any(|item| **item == value) {
            set.items.push(Box::new(value));
        }
        set.tag = Some(tag);
        true
    }

    unsafe fn set_find(&self, set: ConstPtr, value: ConstPtr) -> bool {
        if set.is_null() {
            return false;
        }
        // SAFETY: see impl note.
        let set = unsafe { deref::<HeapSet>(set) };
        let Some(tag) = set.tag else {
            return false;
        };
        // SAFETY: lookups use the set's member layout.
        let Some(needle) = (unsafe { HeapValue::copy_from(tag, value) }) else {
            return false;
        };
        set.items.iter().any(|item| **item == needle)
    }

    unsafe fn set_foreach(&self, set: ConstPtr, visit: SetVisitor<'_>) {
        if set.is_null() {
            return;
        }
        // SAFETY: see impl note.
        let set = unsafe { deref::<HeapSet>(set) };
        for item in &set.items {
            if !visit(item.as_ptr()) {
                break;
            }
        }
    }

    fn table_new(&self) -> RawPtr {
        allocate::<HeapTable>()
    }

    unsafe fn table_free(&self, table: RawPtr) {
        // SAFETY: see impl note.
        unsafe { free::<HeapTable>(table) }
    }

    unsafe fn table_len(&self, table: ConstPtr) -> usize {
        if table.is_null() {
            return 0;
        }
        // SAFETY: see impl note.
        unsafe { deref::<HeapTable>(table) }.entries.len()
    }

    unsafe fn table_tags(&self, table: ConstPtr) -> (i32, i32) {
        if table.is_null() {
            return (0, 0);
        }
        // SAFETY: see impl note.
        let table = unsafe { deref::<HeapTable>(table) };
        (table.key_tag.unwrap_or(0), table.value_tag.unwrap_or(0))
    }

    unsafe fn table_insert(
        &self,
        table: RawPtr,
        key_tag: i32,
        key: ConstPtr,
        value_tag: i32,
        value: ConstPtr,
    ) -> bool {
        if table.is_null() || untyped(key_tag) || untyped(value_tag) {
            return false;
        }
        // SAFETY: see impl note.
        let table = unsafe { deref_mut::<HeapTable>(table) };
        if table.key_tag.is_some_and(|fixed| fixed != key_tag)
            || table.value_tag.is_some_and(|fixed| fixed != value_tag)
        {
            return false;
        }
        // SAFETY: `key` follows the layout of `key_tag`.
        let Some(key) = (unsafe { HeapValue::copy_from(key_tag, key) }) else {
            return false;
        };
        // SAFETY: `value` follows the layout of `value_tag`.
        let Some(value) = (unsafe { HeapValue::copy_from(value_tag, value) }) else {
            return false;
        };
        match table.entries.iter_mut().find(|(existing, _)| **existing == key) {
            Some((_, slot)) => *slot = Box::new(value),
            None => table.entries.push((Box::new(key), Box::new(value))),
        }
        table.key_tag = Some(key_tag);
        table.value_tag = Some(value_tag);
        true
    }

    unsafe fn table_find(&self, table: ConstPtr, key: ConstPtr) -> Option<ConstPtr> {
        if table.is_null() {
            return None;
        }
        // SAFETY: see impl note.
        let table = unsafe { deref::<HeapTable>(table) };
        let tag = table.key_tag?;
        // SAFETY: lookups use the table's key layout.
        let needle = unsafe { HeapValue::copy_from(tag, key) }?;
        table
            .entries
            .iter()
            .find(|(existing, _)| **existing == needle)
            .map(|(_, value)| value.as_ptr())
    }

    unsafe fn table_foreach(&self, table: ConstPtr, visit: TableVisitor<'_>) {
        if table.is_null() {
            return;
        }
        // SAFETY: see impl note.
        let table = unsafe { deref::<HeapTable>(table) };
        for (key, value) in &table.entries {
            if !visit(key.as_ptr(), value.as_ptr()) {
                break;
            }
        }
    }
}
