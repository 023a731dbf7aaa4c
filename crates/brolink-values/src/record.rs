//! Fielded tuple over a native record.
//!
//! Fields are addressed by position or by name; the first field carrying a
//! name wins. A record whose fields are all unnamed behaves as an ordered
//! tuple (the `list` tag). Positional insert and removal are O(n)
//! clone-round-trips, like [`crate::Vector`].

#![allow(unsafe_code)]

use std::ffi::CString;

use brolink_native::{CollectionKind, ConstPtr, NativeHandle, SharedNative};
use brolink_protocol::{MarshalError, MarshalResult};

use crate::field::Field;
use crate::value::{TypedValue, slot_arg};

#[derive(Debug)]
pub struct Record {
    handle: NativeHandle,
}

impl Record {
    pub fn new(api: SharedNative) -> MarshalResult<Self> {
        Ok(Self {
            handle: NativeHandle::allocate(api, CollectionKind::Record)?,
        })
    }

    pub fn from_fields(
        api: SharedNative,
        fields: impl IntoIterator<Item = Field>,
    ) -> MarshalResult<Self> {
        let mut record = Self::new(api)?;
        for field in fields {
            record.add_field(&field)?;
        }
        Ok(record)
    }

    /// List-mode record: every field unnamed.
    pub fn from_values(
        api: SharedNative,
        values: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<Self> {
        let mut record = Self::new(api)?;
        for value in values {
            record.add(&value, "")?;
        }
        Ok(record)
    }

    /// Read-only view of a record owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live record of `api` that outlives the view and is
    /// not mutated while the view is in use.
    pub unsafe fn borrowed(api: SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        Ok(Self {
            // SAFETY: forwarded caller contract.
            handle: unsafe { NativeHandle::borrowed(api, CollectionKind::Record, ptr)? },
        })
    }

    /// Owned field-by-field copy of a foreign record.
    ///
    /// # Safety
    ///
    /// Same contract as [`Record::borrowed`], for the duration of the call.
    pub unsafe fn clone_foreign(api: &SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract; the view dies before returning.
        let view = unsafe { Self::borrowed(api.clone(), ptr)? };
        view.try_clone()
    }

    pub fn len(&self) -> MarshalResult<usize> {
        self.handle.record_len()
    }

    pub fn is_empty(&self) -> MarshalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Appends a copy of `value` under `name`; an empty name adds a
    /// positional field.
    pub fn add(&mut self, value: &TypedValue, name: &str) -> MarshalResult<()> {
        let name = field_name(name)?;
        let handle = &mut self.handle;
        if !value.with_native(|arg| handle.record_add(name.as_deref(), &arg))?? {
            return Err(MarshalError::invalid(format!(
                "native record rejected a {} value",
                value.tag()
            )));
        }
        Ok(())
    }

    pub fn add_field(&mut self, field: &Field) -> MarshalResult<()> {
        self.add(&field.value, &field.name)
    }

    pub fn get(&self, index: usize) -> MarshalResult<Option<TypedValue>> {
        match self.handle.record_nth(index)? {
            Some(slot) => TypedValue::read_slot(&self.handle, slot).map(Some),
            None => Ok(None),
        }
    }

    pub fn field(&self, index: usize) -> MarshalResult<Option<Field>> {
        let Some(value) = self.get(index)? else {
            return Ok(None);
        };
        let name = self.handle.record_nth_name(index)?.unwrap_or_default();
        Ok(Some(Field::new(name, value)))
    }

    /// Value of the first field called `name`; `None` when absent.
    pub fn get_named(&self, name: &str) -> MarshalResult<Option<TypedValue>> {
        let Ok(key) = CString::new(name) else {
            return Ok(None);
        };
        match self.handle.record_named(&key)? {
            Some(slot) => TypedValue::read_slot(&self.handle, slot).map(Some),
            None => Ok(None),
        }
    }

    /// Name of the field at `index`; empty for positional fields.
    pub fn name_at(&self, index: usize) -> MarshalResult<Option<String>> {
        if index >= self.len()? {
            return Ok(None);
        }
        Ok(Some(self.handle.record_nth_name(index)?.unwrap_or_default()))
    }

    pub fn field_names(&self) -> MarshalResult<Vec<String>> {
        (0..self.len()?)
            .map(|index| Ok(self.handle.record_nth_name(index)?.unwrap_or_default()))
            .collect()
    }

    pub fn index_of(&self, name: &str) -> MarshalResult<Option<usize>> {
        Ok(self
            .field_names()?
            .iter()
            .position(|candidate| candidate == name))
    }

    pub fn contains_name(&self, name: &str) -> MarshalResult<bool> {
        Ok(self.index_of(name)?.is_some())
    }

    /// Overwrites the value at `index`, keeping its name.
    pub fn replace(&mut self, index: usize, value: &TypedValue) -> MarshalResult<()> {
        let len = self.len()?;
        if index >= len {
            return Err(MarshalError::invalid(format!(
                "field {index} out of range for length {len}"
            )));
        }
        let handle = &mut self.handle;
        if !value.with_native(|arg| handle.record_set_nth(index, &arg))?? {
            return Err(MarshalError::invalid(format!(
                "native record rejected a {} value at {index}",
                value.tag()
            )));
        }
        Ok(())
    }

    /// Overwrites the first field called `name`. Fails when no field has
    /// that name.
    pub fn replace_named(&mut self, name: &str, value: &TypedValue) -> MarshalResult<()> {
        let Some(index) = self.index_of(name)? else {
            return Err(MarshalError::invalid(format!("no field named `{name}`")));
        };
        self.replace(index, value)
    }

    /// O(n) clone-round-trip.
    pub fn insert(&mut self, index: usize, field: &Field) -> MarshalResult<()> {
        let mut fields = self.to_fields()?;
        if index > fields.len() {
            return Err(MarshalError::invalid(format!(
                "field {index} out of range for length {}",
                fields.len()
            )));
        }
        fields.insert(index, field.try_clone()?);
        self.rewrite(&fields)
    }

    /// O(n) clone-round-trip. Returns the removed field.
    pub fn remove(&mut self, index: usize) -> MarshalResult<Field> {
        let mut fields = self.to_fields()?;
        if index >= fields.len() {
            return Err(MarshalError::invalid(format!(
                "field {index} out of range for length {}",
                fields.len()
            )));
        }
        let removed = fields.remove(index);
        self.rewrite(&fields)?;
        Ok(removed)
    }

    pub fn remove_named(&mut self, name: &str) -> MarshalResult<Option<Field>> {
        match self.index_of(name)? {
            Some(index) => self.remove(index).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&mut self) -> MarshalResult<()> {
        let fresh = NativeHandle::allocate(self.handle.api().clone(), CollectionKind::Record)?;
        self.handle.replace(fresh)
    }

    pub fn to_fields(&self) -> MarshalResult<Vec<Field>> {
        self.iter().collect()
    }

    /// Lazy walk that re-reads each position when advanced.
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            record: self,
            index: 0,
            failed: false,
        }
    }

    pub fn try_clone(&self) -> MarshalResult<Self> {
        let mut copy = Self::new(self.handle.api().clone())?;
        for index in 0..self.len()? {
            let name = self.handle.record_nth_name(index)?;
            let name = field_name(name.as_deref().unwrap_or(""))?;
            let Some(slot) = self.handle.record_nth(index)? else {
                break;
            };
            if !copy.handle.record_add(name.as_deref(), &slot_arg(slot))? {
                return Err(MarshalError::invalid(format!(
                    "native record rejected field {index} while cloning"
                )));
            }
        }
        Ok(copy)
    }

    /// Releases the native record. Idempotent; returns whether this call
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

    fn rewrite(&mut self, fields: &[Field]) -> MarshalResult<()> {
        let mut scratch = Self::new(self.handle.api().clone())?;
        for field in fields {
            scratch.add_field(field)?;
        }
        self.handle.replace(scratch.handle)
    }
}

fn field_name(name: &str) -> MarshalResult<Option<CString>> {
    if name.is_empty() {
        return Ok(None);
    }
    CString::new(name)
        .map(Some)
        .map_err(|_| MarshalError::invalid(format!("field name `{name}` contains a NUL byte")))
}

pub struct RecordIter<'a> {
    record: &'a Record,
    index: usize,
    failed: bool,
}

impl Iterator for RecordIter<'_> {
    type Item = MarshalResult<Field>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let field = self.record.field(self.index).transpose()?;
        self.index += 1;
        self.failed = field.is_err();
        Some(field)
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = MarshalResult<Field>;
    type IntoIter = RecordIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_native::{CountingNative, HeapNative};
    use brolink_protocol::Time;
    use std::sync::Arc;

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    fn heartbeat(api: SharedNative, t0: Time) -> MarshalResult<Record> {
        Record::from_fields(
            api,
            [
                Field::new("seq", TypedValue::count(0)),
                Field::new("src_time", TypedValue::time(t0)),
            ],
        )
    }

    #[test]
    fn named_lookup() -> anyhow::Result<()> {
        let t0 = Time::from_seconds(1_700_000_000.5);
        let record = heartbeat(api(), t0)?;
        assert_eq!(record.get_named("seq")?.and_then(|v| v.as_unsigned()), Some(0));
        assert_eq!(record.get_named("src_time")?.and_then(|v| v.as_time()), Some(t0));
        assert_eq!(record.get_named("missing")?, None);
        assert_eq!(record.get_named("nul\0name")?, None);
        assert_eq!(record.field_names()?, vec!["seq", "src_time"]);
        assert_eq!(record.index_of("src_time")?, Some(1));
        assert!(!record.contains_name("dst_time")?);
        Ok(())
    }

    #[test]
    fn first_matching_name_wins() -> anyhow::Result<()> {
        let record = Record::from_fields(
            api(),
            [
                Field::new("dup", TypedValue::count(1)),
                Field::new("dup", TypedValue::count(2)),
            ],
        )?;
        assert_eq!(record.get_named("dup")?.and_then(|v| v.as_unsigned()), Some(1));
        Ok(())
    }

    #[test]
    fn replace_by_position_and_name() -> anyhow::Result<()> {
        let mut record = heartbeat(api(), Time::from_seconds(0.0))?;
        record.replace_named("seq", &TypedValue::count(7))?;
        record.replace(1, &TypedValue::string("later"))?;
        assert_eq!(record.get(0)?.and_then(|v| v.as_unsigned()), Some(7));
        assert_eq!(
            record.field(1)?.map(|f| (f.name, f.value.as_str().map(str::to_owned))),
            Some(("src_time".to_owned(), Some("later".to_owned())))
        );
        assert!(matches!(
            record.replace_named("absent", &TypedValue::count(1)),
            Err(MarshalError::ArgumentInvalid(_))
        ));
        assert!(record.replace(2, &TypedValue::count(1)).is_err());
        Ok(())
    }

    #[test]
    fn list_mode_keeps_order() -> anyhow::Result<()> {
        let mut record = Record::from_values(
            api(),
            [TypedValue::count(1), TypedValue::string("two")],
        )?;
        record.insert(1, &Field::unnamed(TypedValue::double(1.5)))?;
        assert_eq!(record.field_names()?, vec!["", "", ""]);
        assert_eq!(record.name_at(0)?, Some(String::new()));
        assert_eq!(record.name_at(3)?, None);
        assert_eq!(record.get(1)?.and_then(|v| v.as_double()), Some(1.5));
        let removed = record.remove(0)?;
        assert_eq!(removed.value.as_unsigned(), Some(1));
        assert_eq!(record.len()?, 2);
        Ok(())
    }

    #[test]
    fn clone_preserves_names() -> anyhow::Result<()> {
        let original = heartbeat(api(), Time::from_seconds(3.0))?;
        let mut copy = original.try_clone()?;
        assert_eq!(copy.field_names()?, original.field_names()?);
        assert!(copy.remove_named("seq")?.is_some());
        assert_eq!(copy.len()?, 1);
        assert_eq!(original.len()?, 2);
        Ok(())
    }

    #[test]
    fn dispose_releases_once() -> anyhow::Result<()> {
        let counting = Arc::new(CountingNative::new(HeapNative::new()));
        let mut record = heartbeat(counting.clone(), Time::from_seconds(0.0))?;
        assert!(record.dispose());
        assert!(!record.dispose());
        drop(record);
        assert_eq!(counting.count("record_free"), 1);
        Ok(())
    }

    #[test]
    fn iteration_stops_after_an_error() -> anyhow::Result<()> {
        let mut record = heartbeat(api(), Time::from_seconds(0.0))?;
        record.dispose();
        let mut fields = record.iter();
        assert!(matches!(fields.next(), Some(Err(MarshalError::ResourceDisposed(_)))));
        assert!(fields.next().is_none());
        assert_eq!(record.iter().take(10).count(), 1);
        Ok(())
    }
}
