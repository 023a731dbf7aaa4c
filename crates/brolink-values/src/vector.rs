//! Ordered list over a native vector.
//!
//! Append, indexed get/set and length go straight to the native vector.
//! Positional insert and removal are clone-round-trips: the contents are
//! snapshotted, edited in memory and written into a fresh collection that
//! replaces the old one only once every element was accepted. They cost
//! O(n) per call.

#![allow(unsafe_code)]

use brolink_native::{CollectionKind, ConstPtr, NativeHandle, SharedNative};
use brolink_protocol::{MarshalError, MarshalResult};

use crate::value::{TypedValue, slot_arg};

#[derive(Debug)]
pub struct Vector {
    handle: NativeHandle,
}

impl Vector {
    pub fn new(api: SharedNative) -> MarshalResult<Self> {
        Ok(Self {
            handle: NativeHandle::allocate(api, CollectionKind::Vector)?,
        })
    }

    pub fn from_values(
        api: SharedNative,
        values: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<Self> {
        let mut vector = Self::new(api)?;
        for value in values {
            vector.push(&value)?;
        }
        Ok(vector)
    }

    /// Read-only view of a vector owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live vector of `api` that outlives the view and is
    /// not mutated while the view is in use.
    pub unsafe fn borrowed(api: SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        Ok(Self {
            // SAFETY: forwarded caller contract.
            handle: unsafe { NativeHandle::borrowed(api, CollectionKind::Vector, ptr)? },
        })
    }

    /// Owned element-by-element copy of a foreign vector.
    ///
    /// # Safety
    ///
    /// Same contract as [`Vector::borrowed`], for the duration of the call.
    pub unsafe fn clone_foreign(api: &SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract; the view dies before returning.
        let view = unsafe { Self::borrowed(api.clone(), ptr)? };
        view.try_clone()
    }

    pub fn len(&self) -> MarshalResult<usize> {
        self.handle.vector_len()
    }

    pub fn is_empty(&self) -> MarshalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Appends a copy of `value`.
    pub fn push(&mut self, value: &TypedValue) -> MarshalResult<()> {
        let handle = &mut self.handle;
        if !value.with_native(|arg| handle.vector_add(&arg))?? {
            return Err(MarshalError::invalid(format!(
                "native vector rejected a {} value",
                value.tag()
            )));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> MarshalResult<Option<TypedValue>> {
        match self.handle.vector_nth(index)? {
            Some(slot) => TypedValue::read_slot(&self.handle, slot).map(Some),
            None => Ok(None),
        }
    }

    /// Overwrites the element at `index` in place.
    pub fn set(&mut self, index: usize, value: &TypedValue) -> MarshalResult<()> {
        let len = self.len()?;
        if index >= len {
            return Err(out_of_range(index, len));
        }
        let handle = &mut self.handle;
        if !value.with_native(|arg| handle.vector_set_nth(index, &arg))?? {
            return Err(MarshalError::invalid(format!(
                "native vector rejected a {} value at {index}",
                value.tag()
            )));
        }
        Ok(())
    }

    /// O(n) clone-round-trip.
    pub fn insert(&mut self, index: usize, value: &TypedValue) -> MarshalResult<()> {
        let mut items = self.to_vec()?;
        if index > items.len() {
            return Err(out_of_range(index, items.len()));
        }
        items.insert(index, value.try_clone()?);
        self.rewrite(&items)
    }

    /// O(n) clone-round-trip. Returns the removed element.
    pub fn remove(&mut self, index: usize) -> MarshalResult<TypedValue> {
        let mut items = self.to_vec()?;
        if index >= items.len() {
            return Err(out_of_range(index, items.len()));
        }
        let removed = items.remove(index);
        self.rewrite(&items)?;
        Ok(removed)
    }

    /// Removes the first element equal to `value`.
    pub fn remove_value(&mut self, value: &TypedValue) -> MarshalResult<bool> {
        match self.index_of(value)? {
            Some(index) => self.remove(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn index_of(&self, value: &TypedValue) -> MarshalResult<Option<usize>> {
        for (index, item) in self.iter().enumerate() {
            if item? == *value {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    pub fn contains(&self, value: &TypedValue) -> MarshalResult<bool> {
        Ok(self.index_of(value)?.is_some())
    }

    pub fn clear(&mut self) -> MarshalResult<()> {
        let fresh = NativeHandle::allocate(self.handle.api().clone(), CollectionKind::Vector)?;
        self.handle.replace(fresh)
    }

    pub fn to_vec(&self) -> MarshalResult<Vec<TypedValue>> {
        self.iter().collect()
    }

    /// Lazy walk that re-reads each position when advanced.
    pub fn iter(&self) -> VectorIter<'_> {
        VectorIter {
            vector: self,
            index: 0,
            failed: false,
        }
    }

    pub fn try_clone(&self) -> MarshalResult<Self> {
        let mut copy = Self::new(self.handle.api().clone())?;
        for index in 0..self.len()? {
            let Some(slot) = self.handle.vector_nth(index)? else {
                break;
            };
            if !copy.handle.vector_add(&slot_arg(slot))? {
                return Err(MarshalError::invalid(format!(
                    "native vector rejected element {index} while cloning"
                )));
            }
        }
        Ok(copy)
    }

    /// Releases the native vector. Idempotent; returns whether this call
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

    fn rewrite(&mut self, items: &[TypedValue]) -> MarshalResult<()> {
        let mut scratch = Self::new(self.handle.api().clone())?;
        for item in items {
            scratch.push(item)?;
        }
        self.handle.replace(scratch.handle)
    }
}

fn out_of_range(index: usize, len: usize) -> MarshalError {
    MarshalError::invalid(format!("index {index} out of range for length {len}"))
}

pub struct VectorIter<'a> {
    vector: &'a Vector,
    index: usize,
    failed: bool,
}

impl Iterator for VectorIter<'_> {
    type Item = MarshalResult<TypedValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.vector.get(self.index).transpose()?;
        self.index += 1;
        self.failed = item.is_err();
        Some(item)
    }
}

impl<'a> IntoIterator for &'a Vector {
    type Item = MarshalResult<TypedValue>;
    type IntoIter = VectorIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_native::{CountingNative, HeapNative};
    use brolink_protocol::TypeTag;
    use std::sync::Arc;

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    fn counts(vector: &Vector) -> anyhow::Result<Vec<u64>> {
        let mut out = Vec::new();
        for item in vector {
            out.push(item?.as_unsigned().ok_or_else(|| anyhow::anyhow!("not a count"))?);
        }
        Ok(out)
    }

    fn one_two_three(api: SharedNative) -> MarshalResult<Vector> {
        Vector::from_values(api, (1..=3).map(TypedValue::count))
    }

    #[test]
    fn clones_are_isolated() -> anyhow::Result<()> {
        let original = one_two_three(api())?;
        let mut copy = original.try_clone()?;
        let removed = copy.remove(0)?;
        assert_eq!(removed.as_unsigned(), Some(1));
        assert_eq!(counts(&copy)?, vec![2, 3]);
        assert_eq!(counts(&original)?, vec![1, 2, 3]);
        assert_ne!(copy.addr(), original.addr());
        Ok(())
    }

    #[test]
    fn positional_edits() -> anyhow::Result<()> {
        let mut vector = one_two_three(api())?;
        vector.insert(1, &TypedValue::count(9))?;
        vector.insert(4, &TypedValue::count(10))?;
        assert_eq!(counts(&vector)?, vec![1, 9, 2, 3, 10]);

        vector.set(0, &TypedValue::count(0))?;
        assert!(vector.remove_value(&TypedValue::count(2))?);
        assert!(!vector.remove_value(&TypedValue::count(42))?);
        assert_eq!(counts(&vector)?, vec![0, 9, 3, 10]);
        assert_eq!(vector.index_of(&TypedValue::count(3))?, Some(2));

        assert!(vector.insert(9, &TypedValue::count(1)).is_err());
        assert!(vector.set(4, &TypedValue::count(1)).is_err());
        assert!(vector.remove(4).is_err());
        assert_eq!(vector.get(4)?, None);
        Ok(())
    }

    #[test]
    fn rejected_round_trip_leaves_contents() -> anyhow::Result<()> {
        let mut vector = one_two_three(api())?;
        let before = vector.addr();
        let null = TypedValue::null(TypeTag::String)?;
        assert!(vector.insert(1, &null).is_err());
        assert_eq!(vector.addr(), before);
        assert_eq!(counts(&vector)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn iteration_is_restartable() -> anyhow::Result<()> {
        let vector = one_two_three(api())?;
        let first: Vec<_> = vector.iter().collect::<MarshalResult<_>>()?;
        let second = vector.to_vec()?;
        assert_eq!(first, second);
        assert_eq!(vector.iter().count(), 3);
        Ok(())
    }

    #[test]
    fn iteration_stops_after_an_error() -> anyhow::Result<()> {
        let mut vector = one_two_three(api())?;
        vector.dispose();
        let mut iter = vector.iter();
        assert!(matches!(iter.next(), Some(Err(MarshalError::ResourceDisposed(_)))));
        assert!(iter.next().is_none());
        assert_eq!(vector.iter().take(10).count(), 1);
        Ok(())
    }

    #[test]
    fn nested_collections_are_deep_copies() -> anyhow::Result<()> {
        let api = api();
        let inner = one_two_three(api.clone())?;
        let outer = Vector::from_values(api.clone(), [TypedValue::vector(inner)])?;
        let read = outer.get(0)?.ok_or_else(|| anyhow::anyhow!("missing element"))?;
        let nested = read.as_vector().ok_or_else(|| anyhow::anyhow!("not a vector"))?;
        assert!(nested.handle.owns());
        assert_eq!(counts(nested)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn clear_and_dispose() -> anyhow::Result<()> {
        let counting = Arc::new(CountingNative::new(HeapNative::new()));
        let mut vector = one_two_three(counting.clone())?;
        vector.clear()?;
        assert!(vector.is_empty()?);
        assert_eq!(counting.count("vector_free"), 1);
        assert!(vector.dispose());
        assert!(!vector.dispose());
        assert_eq!(counting.count("vector_free"), 2);
        assert_eq!(vector.len(), Err(MarshalError::ResourceDisposed("vector")));
        Ok(())
    }

    #[test]
    fn borrowed_views_are_read_only() -> anyhow::Result<()> {
        let api = api();
        let owner = one_two_three(api.clone())?;
        // SAFETY: `owner` outlives the view and is not mutated meanwhile.
        let mut view = unsafe { Vector::borrowed(api, owner.as_ptr()?)? };
        assert_eq!(counts(&view)?, vec![1, 2, 3]);
        assert!(view.push(&TypedValue::count(4)).is_err());
        assert!(view.clear().is_err());
        assert_eq!(owner.len()?, 3);
        Ok(())
    }
}
