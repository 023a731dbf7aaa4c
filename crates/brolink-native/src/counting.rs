//! Call-counting decorator for any [`NativeApi`].

#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::ffi::CStr;

use parking_lot::Mutex;

use crate::api::{ConstPtr, NativeApi, RawPtr, RawSlot, SetVisitor, TableVisitor};

/// Forwards to an inner API and records how often each primitive ran.
#[derive(Debug, Default)]
pub struct CountingNative<N> {
    inner: N,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl<N: NativeApi> CountingNative<N> {
    pub fn new(inner: N) -> Self {
        Self {
            inner,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn count(&self, primitive: &str) -> usize {
        self.calls.lock().get(primitive).copied().unwrap_or(0)
    }

    /// Sum of every `*_free` call.
    pub fn releases(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name.ends_with("_free"))
            .map(|(_, count)| count)
            .sum()
    }

    /// Sum of every `*_new` call.
    pub fn allocations(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(name, _)| name.ends_with("_new"))
            .map(|(_, count)| count)
            .sum()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, usize> {
        self.calls.lock().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    fn bump(&self, primitive: &'static str) {
        *self.calls.lock().entry(primitive).or_insert(0) += 1;
    }
}

// SAFETY (applies to every method below): pure forwarding, so the caller's
// NativeApi contract carries over to the inner implementation unchanged.
impl<N: NativeApi> NativeApi for CountingNative<N> {
    fn record_new(&self) -> RawPtr {
        self.bump("record_new");
        self.inner.record_new()
    }

    unsafe fn record_free(&self, record: RawPtr) {
        self.bump("record_free");
        // SAFETY: see impl note.
        unsafe { self.inner.record_free(record) }
    }

    unsafe fn record_len(&self, record: ConstPtr) -> usize {
        self.bump("record_len");
        // SAFETY: see impl note.
        unsafe { self.inner.record_len(record) }
    }

    unsafe fn record_add_val(
        &self,
        record: RawPtr,
        name: Option<&CStr>,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        self.bump("record_add_val");
        // SAFETY: see impl note.
        unsafe { self.inner.record_add_val(record, name, tag, type_name, value) }
    }

    unsafe fn record_nth_val(&self, record: ConstPtr, index: usize) -> Option<RawSlot> {
        self.bump("record_nth_val");
        // SAFETY: see impl note.
        unsafe { self.inner.record_nth_val(record, index) }
    }

    unsafe fn record_nth_name(&self, record: ConstPtr, index: usize) -> Option<String> {
        self.bump("record_nth_name");
        // SAFETY: see impl note.
        unsafe { self.inner.record_nth_name(record, index) }
    }

    unsafe fn record_named_val(&self, record: ConstPtr, name: &CStr) -> Option<RawSlot> {
        self.bump("record_named_val");
        // SAFETY: see impl note.
        unsafe { self.inner.record_named_val(record, name) }
    }

    unsafe fn record_set_nth_val(
        &self,
        record: RawPtr,
        index: usize,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        self.bump("record_set_nth_val");
        // SAFETY: see impl note.
        unsafe { self.inner.record_set_nth_val(record, index, tag, type_name, value) }
    }

    unsafe fn record_set_named_val(
        &self,
        record: RawPtr,
        name: &CStr,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        self.bump("record_set_named_val");
        // SAFETY: see impl note.
        unsafe { self.inner.record_set_named_val(record, name, tag, type_name, value) }
    }

    fn vector_new(&self) -> RawPtr {
        self.bump("vector_new");
        self.inner.vector_new()
    }

    unsafe fn vector_free(&self, vector: RawPtr) {
        self.bump("vector_free");
        // SAFETY: see impl note.
        unsafe { self.inner.vector_free(vector) }
    }

    unsafe fn vector_len(&self, vector: ConstPtr) -> usize {
        self.bump("vector_len");
        // SAFETY: see impl note.
        unsafe { self.inner.vector_len(vector) }
    }

    unsafe fn vector_add_val(
        &self,
        vector: RawPtr,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        self.bump("vector_add_val");
        // SAFETY: see impl note.
        unsafe { self.inner.vector_add_val(vector, tag, type_name, value) }
    }

    unsafe fn vector_nth_val(&self, vector: ConstPtr, index: usize) -> Option<RawSlot> {
        self.bump("vector_nth_val");
        // SAFETY: see impl note.
        unsafe { self.inner.vector_nth_val(vector, index) }
    }

    unsafe fn vector_set_nth_val(
        &self,
        vector: RawPtr,
        index: usize,
        tag: i32,
        type_name: Option<&CStr>,
        value: ConstPtr,
    ) -> bool {
        self.bump("vector_set_nth_val");
        // SAFETY: see impl note.
        unsafe { self.inner.vector_set_nth_val(vector, index, tag, type_name, value) }
    }

    fn set_new(&self) -> RawPtr {
        self.bump("set_new");
        self.inner.set_new()
    }

    unsafe fn set_free(&self, set: RawPtr) {
        self.bump("set_free");
        // SAFETY: see impl note.
        unsafe { self.inner.set_free(set) }
    }

    unsafe fn set_len(&self, set: ConstPtr) -> usize {
        self.bump("set_len");
        // SAFETY: see impl note.
        unsafe { self.inner.set_len(set) }
    }

    unsafe fn set_tag(&self, set: ConstPtr) -> i32 {
        self.bump("set_tag");
        // SAFETY: see impl note.
        unsafe { self.inner.set_tag(set) }
    }

    unsafe fn set_insert(&self, set: RawPtr, tag: i32, value: ConstPtr) -> bool {
        self.bump("set_insert");
        // SAFETY: see impl note.
        unsafe { self.inner.set_insert(set, tag, value) }
    }

    unsafe fn set_find(&self, set: ConstPtr, value: ConstPtr) -> bool {
        self.bump("set_find");
        // SAFETY: see impl note.
        unsafe { self.inner.set_find(set, value) }
    }

    unsafe fn set_foreach(&self, set: ConstPtr, visit: SetVisitor<'_>) {
        self.bump("set_foreach");
        // SAFETY: see impl note.
        unsafe { self.inner.set_foreach(set, visit) }
    }

    fn table_new(&self) -> RawPtr {
        self.bump("table_new");
        self.inner.table_new()
    }

    unsafe fn table_free(&self, table: RawPtr) {
        self.bump("table_free");
        // SAFETY: see impl note.
        unsafe { self.inner.table_free(table) }
    }

    unsafe fn table_len(&self, table: ConstPtr) -> usize {
        self.bump("table_len");
        // SAFETY: see impl note.
        unsafe { self.inner.table_len(table) }
    }

    unsafe fn table_tags(&self, table: ConstPtr) -> (i32, i32) {
        self.bump("table_tags");
        // SAFETY: see impl note.
        unsafe { self.inner.table_tags(table) }
    }

    unsafe fn table_insert(
        &self,
        table: RawPtr,
        key_tag: i32,
        key: ConstPtr,
        value_tag: i32,
        value: ConstPtr,
    ) -> bool {
        self.bump("table_insert");
        // SAFETY: see impl note.
        unsafe { self.inner.table_insert(table, key_tag, key, value_tag, value) }
    }

    unsafe fn table_find(&self, table: ConstPtr, key: ConstPtr) -> Option<ConstPtr> {
        self.bump("table_find");
        // SAFETY: see impl note.
        unsafe { self.inner.table_find(table, key) }
    }

    unsafe fn table_foreach(&self, table: ConstPtr, visit: TableVisitor<'_>) {
        self.bump("table_foreach");
        // SAFETY: see impl note.
        unsafe { self.inner.table_foreach(table, visit) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapNative;

    #[test]
    fn counts_each_primitive() {
        let api = CountingNative::new(HeapNative::new());
        let record = api.record_new();
        // SAFETY: `record` is live until the free below.
        unsafe {
            assert_eq!(api.record_len(record), 0);
            api.record_free(record);
        }
        assert_eq!(api.count("record_new"), 1);
        assert_eq!(api.count("record_len"), 1);
        assert_eq!(api.releases(), 1);
        assert_eq!(api.allocations(), 1);

        api.reset();
        assert!(api.snapshot().is_empty());
    }
}
