//! The native collection API seam.
//!
//! Implementations expose the foreign library's record, vector, set, and
//! table primitives. Values cross the seam as `(tag, pointer)` pairs in the
//! wire layouts of `brolink_protocol::codec`; the native side copies what it
//! stores. Pointers returned by lookups stay valid only until the next
//! mutation or release of the collection they came from.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_void};
use std::sync::Arc;

pub type RawPtr = *mut c_void;
pub type ConstPtr = *const c_void;

/// Shared handle to a native API implementation.
pub type SharedNative = Arc<dyn NativeApi>;

/// A value slot read out of a native collection.
#[derive(Debug, Clone, Copy)]
pub struct RawSlot {
    pub data: ConstPtr,
    pub tag: i32,
}

/// Visitor for set members; return `false` to stop.
pub type SetVisitor<'a> = &'a mut dyn FnMut(ConstPtr) -> bool;
/// Visitor for table entries; return `false` to stop.
pub type TableVisitor<'a> = &'a mut dyn FnMut(ConstPtr, ConstPtr) -> bool;

/// Raw native collection primitives.
///
/// # Safety
///
/// Every `unsafe fn` taking a collection pointer requires that the pointer
/// came from the matching `*_new` of the same implementation and has not
/// been freed. Value pointers must address a value in the layout of `tag`
/// (or be null where noted).
pub trait NativeApi: Send + Sync {
    fn record_new(&self) -> RawPtr;
    unsafe fn record_free(&self, record: RawPtr);
    unsafe fn record_len(&self, record: ConstPtr) -> usize;
    unsafe fn record_add_val(
        &self,
        record: RawPtr,
        name: Option<&CStr>,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool;
    unsafe fn record_nth_val(&self, record: ConstPtr, index: usize) -> Option<RawSlot>;
    unsafe fn record_nth_name(&self, record: ConstPtr, index: usize) -> Option<String>;
    unsafe fn record_named_val(&self, record: ConstPtr, name: &CStr) -> Option<RawSlot>;
    unsafe fn record_set_nth_val(
        &self,
        record: RawPtr,
        index: usize,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool;
    unsafe fn record_set_named_val(
        &self,
        record: RawPtr,
        name: &CStr,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool;

    fn vector_new(&self) -> RawPtr;
    unsafe fn vector_free(&self, vector: RawPtr);
    unsafe fn vector_len(&self, vector: ConstPtr) -> usize;
    unsafe fn vector_add_val(
        &self,
        vector: RawPtr,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool;
    unsafe fn vector_nth_val(&self, vector: ConstPtr, index: usize) -> Option<RawSlot>;
    unsafe fn vector_set_nth_val(
        &self,
        vector: RawPtr,
        index: usize,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool;

    fn set_new(&self) -> RawPtr;
    unsafe fn set_free(&self, set: RawPtr);
    unsafe fn set_len(&self, set: ConstPtr) -> usize;
    /// Member tag, or 0 while the set is still untyped.
    unsafe fn set_tag(&self, set: ConstPtr) -> i32;
    unsafe fn set_insert(&self, set: RawPtr, tag: i32, value: ConstPtr) -> bool;
    unsafe fn set_find(&self, set: ConstPtr, value: ConstPtr) -> bool;
    unsafe fn set_foreach(&self, set: ConstPtr, visit: SetVisitor<'_>);

    fn table_new(&self) -> RawPtr;
    unsafe fn table_free(&self, table: RawPtr);
    unsafe fn table_len(&self, table: ConstPtr) -> usize;
    /// `(key tag, value tag)`, each 0 while the table is still untyped.
    unsafe fn table_tags(&self, table: ConstPtr) -> (i32, i32);
    unsafe fn table_insert(
        &self,
        table: RawPtr,
        key_tag: i32,
        key: ConstPtr,
        value_tag: i32,
        value: ConstPtr,
    ) -> bool;
    unsafe fn table_find(&self, table: ConstPtr, key: ConstPtr) -> Option<ConstPtr>;
    unsafe fn table_foreach(&self, table: ConstPtr, visit: TableVisitor<'_>);
}
