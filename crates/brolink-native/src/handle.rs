//! Ownership-tagged native collection handles.
//!
//! An owned handle releases its collection exactly once, either through an
//! explicit [`NativeHandle::release`] or when dropped. A borrowed handle
//! never releases and refuses every mutating primitive. All typed access to
//! a native collection goes through the safe methods here.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use brolink_protocol::{MarshalError, MarshalResult, TypeTag};
use tracing::trace;

use crate::api::{ConstPtr, RawPtr, SharedNative};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Record,
    Vector,
    Set,
    Table,
}

impl CollectionKind {
    pub fn name(self) -> &'static str {
        match self {
            CollectionKind::Record => "record",
            CollectionKind::Vector => "vector",
            CollectionKind::Set => "set",
            CollectionKind::Table => "table",
        }
    }

    /// Native collection kind backing a wire tag, if any.
    pub fn for_tag(tag: TypeTag) -> Option<Self> {
        match tag {
            TypeTag::Record | TypeTag::List => Some(CollectionKind::Record),
            TypeTag::Vector => Some(CollectionKind::Vector),
            TypeTag::Set => Some(CollectionKind::Set),
            TypeTag::Table => Some(CollectionKind::Table),
            _ => None,
        }
    }
}

/// A value lent to one native call.
#[derive(Debug, Clone, Copy)]
pub struct WireArg<'a> {
    tag: TypeTag,
    type_name: Option<&'a CStr>,
    data: ConstPtr,
    _scope: PhantomData<&'a ()>,
}

impl<'a> WireArg<'a> {
    /// # Safety
    ///
    /// `data` must be null or address a value in the layout of `tag` that
    /// stays valid and unmodified for all of `'a`.
    pub unsafe fn new(tag: TypeTag, type_name: Option<&'a CStr>, data: ConstPtr) -> Self {
        Self {
            tag,
            type_name,
            data,
            _scope: PhantomData,
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn type_name(&self) -> Option<&'a CStr> {
        self.type_name
    }

    pub fn data(&self) -> ConstPtr {
        self.data
    }
}

/// A value slot inside a live collection. The borrow of the handle keeps
/// the collection unmodified while the slot exists.
#[derive(Debug, Clone, Copy)]
pub struct NativeSlot<'h> {
    data: ConstPtr,
    tag: TypeTag,
    _handle: PhantomData<&'h NativeHandle>,
}

impl NativeSlot<'_> {
    fn new(data: ConstPtr, tag: TypeTag) -> Self {
        Self {
            data,
            tag,
            _handle: PhantomData,
        }
    }

    pub fn data(&self) -> ConstPtr {
        self.data
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }
}

pub struct NativeHandle {
    api: SharedNative,
    kind: CollectionKind,
    ptr: RawPtr,
    owns: bool,
    released: bool,
}

impl NativeHandle {
    /// Allocates a fresh owned collection.
    pub fn allocate(api: SharedNative, kind: CollectionKind) -> MarshalResult<Self> {
        let ptr = match kind {
            CollectionKind::Record => api.record_new(),
            CollectionKind::Vector => api.vector_new(),
            CollectionKind::Set => api.set_new(),
            CollectionKind::Table => api.table_new(),
        };
        if ptr.is_null() {
            return Err(MarshalError::AllocationFailure(kind.name()));
        }
        trace!(kind = kind.name(), "native collection allocated");
        Ok(Self {
            api,
            kind,
            ptr,
            owns: true,
            released: false,
        })
    }

    /// Wraps a collection owned elsewhere. The handle never releases it and
    /// rejects mutation.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live `kind` collection of `api` that outlives the
    /// returned handle and is not mutated while the handle is in use.
    pub unsafe fn borrowed(
        api: SharedNative,
        kind: CollectionKind,
        ptr: ConstPtr,
    ) -> MarshalResult<Self> {
        if ptr.is_null() {
            return Err(MarshalError::invalid(format!("null {} pointer", kind.name())));
        }
        Ok(Self {
            api,
            kind,
            ptr: ptr.cast_mut(),
            owns: false,
            released: false,
        })
    }

    pub fn api(&self) -> &SharedNative {
        &self.api
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn owns(&self) -> bool {
        self.owns
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Raw pointer for lending to a foreign call.
    pub fn as_ptr(&self) -> MarshalResult<ConstPtr> {
        self.live().map(|ptr| ptr.cast_const())
    }

    /// Pointer identity; 0 once released.
    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    /// Releases the collection. Returns whether this call did the release;
    /// later calls are no-ops.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if self.owns && !self.ptr.is_null() {
            // SAFETY: the pointer came from this api's `*_new` for `kind` and
            // `released` guarantees this branch runs once.
            unsafe {
                match self.kind {
                    CollectionKind::Record => self.api.record_free(self.ptr),
                    CollectionKind::Vector => self.api.vector_free(self.ptr),
                    CollectionKind::Set => self.api.set_free(self.ptr),
                    CollectionKind::Table => self.api.table_free(self.ptr),
                }
            }
            trace!(kind = self.kind.name(), "native collection released");
        }
        self.ptr = ptr::null_mut();
        true
    }

    /// Swaps in `replacement` and releases the collection held before.
    pub fn replace(&mut self, mut replacement: NativeHandle) -> MarshalResult<()> {
        self.writable(self.kind)?;
        if replacement.kind != self.kind {
            return Err(MarshalError::mismatch(self.kind.name(), replacement.kind.name()));
        }
        std::mem::swap(self, &mut replacement);
        drop(replacement);
        Ok(())
    }

    fn live(&self) -> MarshalResult<RawPtr> {
        if self.released {
            return Err(MarshalError::ResourceDisposed(self.kind.name()));
        }
        Ok(self.ptr)
    }

    fn readable(&self, kind: CollectionKind) -> MarshalResult<ConstPtr> {
        let ptr = self.live()?;
        if self.kind != kind {
            return Err(MarshalError::mismatch(kind.name(), self.kind.name()));
        }
        Ok(ptr.cast_const())
    }

    fn writable(&self, kind: CollectionKind) -> MarshalResult<RawPtr> {
        let ptr = self.readable(kind)?;
        if !self.owns {
            return Err(MarshalError::invalid(format!(
                "borrowed {} is read-only",
                kind.name()
            )));
        }
        Ok(ptr.cast_mut())
    }

    pub fn record_len(&self) -> MarshalResult<usize> {
        let ptr = self.readable(CollectionKind::Record)?;
        // SAFETY: live record of this api.
        Ok(unsafe { self.api.record_len(ptr) })
    }

    pub fn record_add(&mut self, name: Option<&CStr>, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Record)?;
        // SAFETY: owned live record; `arg` upholds its layout contract.
        Ok(unsafe {
            self.api
                .record_add_val(ptr, name, arg.tag.as_raw(), arg.type_name, arg.data)
        })
    }

    pub fn record_nth(&self, index: usize) -> MarshalResult<Option<NativeSlot<'_>>> {
        let ptr = self.readable(CollectionKind::Record)?;
        // SAFETY: live record of this api.
        let slot = unsafe { self.api.record_nth_val(ptr, index) };
        Ok(slot.map(|slot| NativeSlot::new(slot.data, TypeTag::from_raw(slot.tag))))
    }

    pub fn record_nth_name(&self, index: usize) -> MarshalResult<Option<String>> {
        let ptr = self.readable(CollectionKind::Record)?;
        // SAFETY: live record of this api.
        Ok(unsafe { self.api.record_nth_name(ptr, index) })
    }

    pub fn record_named(&self, name: &CStr) -> MarshalResult<Option<NativeSlot<'_>>> {
        let ptr = self.readable(CollectionKind::Record)?;
        // SAFETY: live record of this api.
        let slot = unsafe { self.api.record_named_val(ptr, name) };
        Ok(slot.map(|slot| NativeSlot::new(slot.data, TypeTag::from_raw(slot.tag))))
    }

    pub fn record_set_nth(&mut self, index: usize, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Record)?;
        // SAFETY: owned live record; `arg` upholds its layout contract.
        Ok(unsafe {
            self.api
                .record_set_nth_val(ptr, index, arg.tag.as_raw(), arg.type_name, arg.data)
        })
    }

    pub fn record_set_named(&mut self, name: &CStr, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Record)?;
        // SAFETY: owned live record; `arg` upholds its layout contract.
        Ok(unsafe {
            self.api
                .record_set_named_val(ptr, name, arg.tag.as_raw(), arg.type_name, arg.data)
        })
    }

    pub fn vector_len(&self) -> MarshalResult<usize> {
        let ptr = self.readable(CollectionKind::Vector)?;
        // SAFETY: live vector of this api.
        Ok(unsafe { self.api.vector_len(ptr) })
    }

    pub fn vector_add(&mut self, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Vector)?;
        // SAFETY: owned live vector; `arg` upholds its layout contract.
        Ok(unsafe {
            self.api
                .vector_add_val(ptr, arg.tag.as_raw(), arg.type_name, arg.data)
        })
    }

    pub fn vector_nth(&self, index: usize) -> MarshalResult<Option<NativeSlot<'_>>> {
        let ptr = self.readable(CollectionKind::Vector)?;
        // SAFETY: live vector of this api.
        let slot = unsafe { self.api.vector_nth_val(ptr, index) };
        Ok(slot.map(|slot| NativeSlot::new(slot.data, TypeTag::from_raw(slot.tag))))
    }

    pub fn vector_set_nth(&mut self, index: usize, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Vector)?;
        // SAFETY: owned live vector; `arg` upholds its layout contract.
        Ok(unsafe {
            self.api
                .vector_set_nth_val(ptr, index, arg.tag.as_raw(), arg.type_name, arg.data)
        })
    }

    pub fn set_len(&self) -> MarshalResult<usize> {
        let ptr = self.readable(CollectionKind::Set)?;
        // SAFETY: live set of this api.
        Ok(unsafe { self.api.set_len(ptr) })
    }

    /// Member tag; `Unknown` while the set is untyped.
    pub fn set_tag(&self) -> MarshalResult<TypeTag> {
        let ptr = self.readable(CollectionKind::Set)?;
        // SAFETY: live set of this api.
        Ok(TypeTag::from_raw(unsafe { self.api.set_tag(ptr) }))
    }

    pub fn set_insert(&mut self, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Set)?;
        // SAFETY: owned live set; `arg` upholds its layout contract.
        Ok(unsafe { self.api.set_insert(ptr, arg.tag.as_raw(), arg.data) })
    }

    pub fn set_find(&self, arg: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.readable(CollectionKind::Set)?;
        // SAFETY: live set; `arg` upholds its layout contract.
        Ok(unsafe { self.api.set_find(ptr, arg.data) })
    }

    pub fn set_for_each(&self, visit: &mut dyn FnMut(NativeSlot<'_>) -> bool) -> MarshalResult<()> {
        let ptr = self.readable(CollectionKind::Set)?;
        let tag = self.set_tag()?;
        // SAFETY: live set of this api; slots do not outlive the visit.
        unsafe {
            self.api
                .set_foreach(ptr, &mut |data| visit(NativeSlot::new(data, tag)));
        }
        Ok(())
    }

    pub fn table_len(&self) -> MarshalResult<usize> {
        let ptr = self.readable(CollectionKind::Table)?;
        // SAFETY: live table of this api.
        Ok(unsafe { self.api.table_len(ptr) })
    }

    /// `(key tag, value tag)`; `Unknown` while the table is untyped.
    pub fn table_tags(&self) -> MarshalResult<(TypeTag, TypeTag)> {
        let ptr = self.readable(CollectionKind::Table)?;
        // SAFETY: live table of this api.
        let (key, value) = unsafe { self.api.table_tags(ptr) };
        Ok((TypeTag::from_raw(key), TypeTag::from_raw(value)))
    }

    pub fn table_insert(&mut self, key: &WireArg<'_>, value: &WireArg<'_>) -> MarshalResult<bool> {
        let ptr = self.writable(CollectionKind::Table)?;
        // SAFETY: owned live table; both args uphold their layout contracts.
        Ok(unsafe {
            self.api.table_insert(
                ptr,
                key.tag.as_raw(),
                key.data,
                value.tag.as_raw(),
                value.data,
            )
        })
    }

    pub fn table_find(&self, key: &WireArg<'_>) -> MarshalResult<Option<NativeSlot<'_>>> {
        let ptr = self.readable(CollectionKind::Table)?;
        let (_, value_tag) = self.table_tags()?;
        // SAFETY: live table; `key` upholds its layout contract.
        let found = unsafe { self.api.table_find(ptr, key.data) };
        Ok(found.map(|data| NativeSlot::new(data, value_tag)))
    }

    pub fn table_for_each(
        &self,
        visit: &mut dyn FnMut(NativeSlot<'_>, NativeSlot<'_>) -> bool,
    ) -> MarshalResult<()> {
        let ptr = self.readable(CollectionKind::Table)?;
        let (key_tag, value_tag) = self.table_tags()?;
        // SAFETY: live table of this api; slots do not outlive the visit.
        unsafe {
            self.api.table_foreach(ptr, &mut |key, value| {
                visit(NativeSlot::new(key, key_tag), NativeSlot::new(value, value_tag))
            });
        }
        Ok(())
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &self.kind)
            .field("ptr", &self.ptr)
            .field("owns", &self.owns)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        if !self.released && self.owns {
            trace!(kind = self.kind.name(), "releasing native collection on drop");
        }
        self.release();
    }
}
