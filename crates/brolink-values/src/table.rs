//! Key/value collection over a native table.
//!
//! The first accepted entry fixes both the key tag and the value tag.
//! Inserting an existing key replaces its value. Keys compare with the
//! native equality, so collection keys match by content. Removal is an O(n)
//! clone-round-trip into a fresh native table.

#![allow(unsafe_code)]

use indexmap::IndexMap;
use tracing::debug;

use brolink_native::{CollectionKind, ConstPtr, NativeHandle, SharedNative};
use brolink_protocol::{MarshalError, MarshalResult, TypeTag};

use crate::set::{Set, fixed_tag};
use crate::value::{TypedValue, slot_arg};

#[derive(Debug)]
pub struct Table {
    handle: NativeHandle,
    key_tag: Option<TypeTag>,
    value_tag: Option<TypeTag>,
}

impl Table {
    pub fn new(api: SharedNative) -> MarshalResult<Self> {
        Ok(Self {
            handle: NativeHandle::allocate(api, CollectionKind::Table)?,
            key_tag: None,
            value_tag: None,
        })
    }

    pub fn from_pairs(
        api: SharedNative,
        pairs: impl IntoIterator<Item = (TypedValue, TypedValue)>,
    ) -> MarshalResult<Self> {
        let mut table = Self::new(api)?;
        for (key, value) in pairs {
            table.insert(&key, &value)?;
        }
        Ok(table)
    }

    /// Read-only view of a table owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live table of `api` that outlives the view and is
    /// not mutated while the view is in use.
    pub unsafe fn borrowed(api: SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract.
        let handle = unsafe { NativeHandle::borrowed(api, CollectionKind::Table, ptr)? };
        let (key_tag, value_tag) = handle.table_tags()?;
        Ok(Self {
            handle,
            key_tag: fixed_tag(key_tag),
            value_tag: fixed_tag(value_tag),
        })
    }

    /// Owned entry-by-entry copy of a foreign table.
    ///
    /// # Safety
    ///
    /// Same contract as [`Table::borrowed`], for the duration of the call.
    pub unsafe fn clone_foreign(api: &SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract; the view dies before returning.
        let view = unsafe { Self::borrowed(api.clone(), ptr)? };
        view.try_clone()
    }

    pub fn key_tag(&self) -> Option<TypeTag> {
        self.key_tag
    }

    pub fn value_tag(&self) -> Option<TypeTag> {
        self.value_tag
    }

    pub fn len(&self) -> MarshalResult<usize> {
        self.handle.table_len()
    }

    pub fn is_empty(&self) -> MarshalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Stores copies of `key` and `value`, replacing the value of an
    /// existing key. Returns `true` when the key was new.
    pub fn insert(&mut self, key: &TypedValue, value: &TypedValue) -> MarshalResult<bool> {
        self.handle.as_ptr()?;
        check_entry_tag(self.key_tag, key)?;
        check_entry_tag(self.value_tag, value)?;
        let is_new = !self.contains_key(key)?;
        let handle = &mut self.handle;
        let stored =
            key.with_native(|key| value.with_native(|value| handle.table_insert(&key, &value)))???;
        if !stored {
            debug!(key = %key.tag(), value = %value.tag(), "native table rejected entry");
            return Err(MarshalError::invalid(format!(
                "native table rejected a {} => {} entry",
                key.tag(),
                value.tag()
            )));
        }
        self.key_tag = Some(key.tag());
        self.value_tag = Some(value.tag());
        Ok(is_new)
    }

    pub fn get(&self, key: &TypedValue) -> MarshalResult<Option<TypedValue>> {
        let handle = &self.handle;
        handle.as_ptr()?;
        if self.key_tag != Some(key.tag()) {
            return Ok(None);
        }
        key.with_native(|key| match handle.table_find(&key)? {
            Some(slot) => TypedValue::read_slot(handle, slot).map(Some),
            None => Ok(None),
        })?
    }

    pub fn contains_key(&self, key: &TypedValue) -> MarshalResult<bool> {
        let handle = &self.handle;
        handle.as_ptr()?;
        if self.key_tag != Some(key.tag()) {
            return Ok(false);
        }
        key.with_native(|key| handle.table_find(&key).map(|slot| slot.is_some()))?
    }

    /// O(n) clone-round-trip. Returns the removed value.
    pub fn remove(&mut self, key: &TypedValue) -> MarshalResult<Option<TypedValue>> {
        let Some(removed) = self.get(key)? else {
            return Ok(None);
        };
        let mut target = Set::new(self.handle.api().clone())?;
        target.insert(key)?;
        let mut kept = Vec::new();
        for (existing, value) in self.to_pairs()? {
            if !target.contains(&existing)? {
                kept.push((existing, value));
            }
        }
        self.rewrite(&kept)?;
        Ok(Some(removed))
    }

    /// Empties the table. Key and value tags stay fixed.
    pub fn clear(&mut self) -> MarshalResult<()> {
        let fresh = NativeHandle::allocate(self.handle.api().clone(), CollectionKind::Table)?;
        self.handle.replace(fresh)
    }

    pub fn to_pairs(&self) -> MarshalResult<Vec<(TypedValue, TypedValue)>> {
        let mut entries = Vec::new();
        let mut failure = None;
        let handle = &self.handle;
        handle.table_for_each(&mut |key, value| {
            let entry = TypedValue::read_slot(handle, key)
                .and_then(|key| Ok((key, TypedValue::read_slot(handle, value)?)));
            match entry {
                Ok(entry) => {
                    entries.push(entry);
                    true
                }
                Err(error) => {
                    failure = Some(error);
                    false
                }
            }
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(entries),
        }
    }

    /// Entries keyed by [`TypedValue`] equality, so collection keys hash by
    /// identity here.
    pub fn to_index_map(&self) -> MarshalResult<IndexMap<TypedValue, TypedValue>> {
        Ok(self.to_pairs()?.into_iter().collect())
    }

    pub fn keys(&self) -> MarshalResult<Vec<TypedValue>> {
        Ok(self.to_pairs()?.into_iter().map(|(key, _)| key).collect())
    }

    pub fn values(&self) -> MarshalResult<Vec<TypedValue>> {
        Ok(self.to_pairs()?.into_iter().map(|(_, value)| value).collect())
    }

    /// Lazy walk; the entries are read from the native table on the first
    /// call to `next`.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            table: self,
            entries: None,
        }
    }

    pub fn try_clone(&self) -> MarshalResult<Self> {
        let mut copy = Self::new(self.handle.api().clone())?;
        let mut failure = None;
        let target = &mut copy.handle;
        self.handle.table_for_each(&mut |key, value| {
            match target.table_insert(&slot_arg(key), &slot_arg(value)) {
                Ok(true) => true,
                Ok(false) => {
                    failure = Some(MarshalError::invalid(
                        "native table rejected an entry while cloning",
                    ));
                    false
                }
                Err(error) => {
                    failure = Some(error);
                    false
                }
            }
        })?;
        if let Some(error) = failure {
            return Err(error);
        }
        copy.key_tag = self.key_tag;
        copy.value_tag = self.value_tag;
        Ok(copy)
    }

    /// Releases the native table. Idempotent; returns whether this call
    /// released it.
    pub fn dispose(&mut self) -> bool {
        self.handle.release()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_released()
    }

    pub fn as_ptr(&self) -> MarshalResult<ConstPtr> {
        self.handle.as_ptr()
    }

    pub fn addr(&self) -> usize {
        self.handle.addr()
    }

    pub fn api(&self) -> &SharedNative {
        self.handle.api()
    }

    fn rewrite(&mut self, entries: &[(TypedValue, TypedValue)]) -> MarshalResult<()> {
        let mut scratch = Self::new(self.handle.api().clone())?;
        scratch.key_tag = self.key_tag;
        scratch.value_tag = self.value_tag;
        for (key, value) in entries {
            scratch.insert(key, value)?;
        }
        self.handle.replace(scratch.handle)
    }
}

fn check_entry_tag(fixed: Option<TypeTag>, value: &TypedValue) -> MarshalResult<()> {
    match fixed {
        Some(fixed) if fixed != value.tag() => Err(MarshalError::mismatch(fixed, value.tag())),
        _ => Ok(()),
    }
}

pub struct TableIter<'a> {
    table: &'a Table,
    entries: Option<std::vec::IntoIter<(TypedValue, TypedValue)>>,
}

impl Iterator for TableIter<'_> {
    type Item = MarshalResult<(TypedValue, TypedValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.entries.is_none() {
            match self.table.to_pairs() {
                Ok(entries) => self.entries = Some(entries.into_iter()),
                Err(error) => {
                    self.entries = Some(Vec::new().into_iter());
                    return Some(Err(error));
                }
            }
        }
        self.entries.as_mut()?.next().map(Ok)
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = MarshalResult<(TypedValue, TypedValue)>;
    type IntoIter = TableIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
