//! Unique-element collection over a native set.
//!
//! The tag of the first accepted member fixes the member type for the
//! wrapper's lifetime, across `clear` and rewrites. Inserts of any other
//! tag fail with `TypeMismatch` and change nothing.
//!
//! Removal and the set-algebra operations are clone-round-trips: the other
//! operand is loaded into a scratch native set, membership is decided by the
//! native lookup, and the surviving members are written to a fresh native
//! set that replaces the current one. Equality is the native one, so nested
//! collections compare by content.

#![allow(unsafe_code)]

use indexmap::IndexSet;
use tracing::debug;

use brolink_native::{CollectionKind, ConstPtr, NativeHandle, SharedNative};
use brolink_protocol::{MarshalError, MarshalResult, TypeTag};

use crate::value::{TypedValue, slot_arg};

#[derive(Debug)]
pub struct Set {
    handle: NativeHandle,
    tag: Option<TypeTag>,
}

impl Set {
    pub fn new(api: SharedNative) -> MarshalResult<Self> {
        Ok(Self {
            handle: NativeHandle::allocate(api, CollectionKind::Set)?,
            tag: None,
        })
    }

    pub fn from_values(
        api: SharedNative,
        values: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<Self> {
        let mut set = Self::new(api)?;
        for value in values {
            set.insert(&value)?;
        }
        Ok(set)
    }

    /// Read-only view of a set owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live set of `api` that outlives the view and is not
    /// mutated while the view is in use.
    pub unsafe fn borrowed(api: SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract.
        let handle = unsafe { NativeHandle::borrowed(api, CollectionKind::Set, ptr)? };
        let tag = fixed_tag(handle.set_tag()?);
        Ok(Self { handle, tag })
    }

    /// Owned member-by-member copy of a foreign set.
    ///
    /// # Safety
    ///
    /// Same contract as [`Set::borrowed`], for the duration of the call.
    pub unsafe fn clone_foreign(api: &SharedNative, ptr: ConstPtr) -> MarshalResult<Self> {
        // SAFETY: forwarded caller contract; the view dies before returning.
        let view = unsafe { Self::borrowed(api.clone(), ptr)? };
        view.try_clone()
    }

    /// Member tag, once fixed by the first insert.
    pub fn member_tag(&self) -> Option<TypeTag> {
        self.tag
    }

    pub fn len(&self) -> MarshalResult<usize> {
        self.handle.set_len()
    }

    pub fn is_empty(&self) -> MarshalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Adds a copy of `value`. Returns `false` when an equal member was
    /// already present.
    pub fn insert(&mut self, value: &TypedValue) -> MarshalResult<bool> {
        self.handle.as_ptr()?;
        self.check_tag(value)?;
        if self.contains(value)? {
            return Ok(false);
        }
        let handle = &mut self.handle;
        if !value.with_native(|arg| handle.set_insert(&arg))?? {
            debug!(tag = %value.tag(), "native set rejected member");
            return Err(MarshalError::invalid(format!(
                "native set rejected a {} value",
                value.tag()
            )));
        }
        self.tag = Some(value.tag());
        Ok(true)
    }

    /// Native equality lookup. Values of another tag are never members.
    pub fn contains(&self, value: &TypedValue) -> MarshalResult<bool> {
        let handle = &self.handle;
        handle.as_ptr()?;
        if self.tag != Some(value.tag()) {
            return Ok(false);
        }
        value.with_native(|arg| handle.set_find(&arg))?
    }

    /// O(n) clone-round-trip. Returns whether a member was removed.
    pub fn remove(&mut self, value: &TypedValue) -> MarshalResult<bool> {
        if !self.contains(value)? {
            return Ok(false);
        }
        let lookup = self.lookup_set(std::slice::from_ref(value))?;
        self.retain(|member| Ok(!lookup.contains(member)?))?;
        Ok(true)
    }

    /// Empties the set. The member tag stays fixed.
    pub fn clear(&mut self) -> MarshalResult<()> {
        let fresh = NativeHandle::allocate(self.handle.api().clone(), CollectionKind::Set)?;
        self.handle.replace(fresh)
    }

    pub fn to_vec(&self) -> MarshalResult<Vec<TypedValue>> {
        let mut members = Vec::new();
        let mut failure = None;
        let handle = &self.handle;
        handle.set_for_each(&mut |slot| match TypedValue::read_slot(handle, slot) {
            Ok(member) => {
                members.push(member);
                true
            }
            Err(error) => {
                failure = Some(error);
                false
            }
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(members),
        }
    }

    /// Members keyed by [`TypedValue`] equality, so nested collections
    /// hash by identity here.
    pub fn to_index_set(&self) -> MarshalResult<IndexSet<TypedValue>> {
        Ok(self.to_vec()?.into_iter().collect())
    }

    /// Lazy walk; the members are read from the native set on the first
    /// call to `next`.
    pub fn iter(&self) -> SetIter<'_> {
        SetIter {
            set: self,
            members: None,
        }
    }

    /// Adds every member of `other`.
    pub fn union_with(&mut self, other: impl IntoIterator<Item = TypedValue>) -> MarshalResult<()> {
        let mut scratch = self.try_clone()?;
        for value in other {
            scratch.insert(&value)?;
        }
        let tag = scratch.tag;
        self.handle.replace(scratch.handle)?;
        self.tag = tag;
        Ok(())
    }

    /// Keeps only members also present in `other`.
    pub fn intersect_with(
        &mut self,
        other: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<()> {
        let other: Vec<_> = other.into_iter().collect();
        let lookup = self.lookup_set(&other)?;
        self.retain(|member| lookup.contains(member))
    }

    /// Drops every member present in `other`.
    pub fn except_with(&mut self, other: impl IntoIterator<Item = TypedValue>) -> MarshalResult<()> {
        let other: Vec<_> = other.into_iter().collect();
        let lookup = self.lookup_set(&other)?;
        self.retain(|member| Ok(!lookup.contains(member)?))
    }

    /// Keeps members present in exactly one of `self` and `other`.
    pub fn symmetric_except_with(
        &mut self,
        other: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<()> {
        let other: Vec<_> = other.into_iter().collect();
        let mut tag = self.tag;
        for value in &other {
            check_member_tag(&mut tag, value)?;
        }
        let incoming = Self::from_values(self.handle.api().clone(), other)?;
        let mut members = Vec::new();
        for member in self.to_vec()? {
            if !incoming.contains(&member)? {
                members.push(member);
            }
        }
        for member in incoming.to_vec()? {
            if !self.contains(&member)? {
                members.push(member);
            }
        }
        self.rewrite(tag, &members)?;
        self.tag = tag;
        Ok(())
    }

    pub fn is_subset_of(&self, other: impl IntoIterator<Item = TypedValue>) -> MarshalResult<bool> {
        let other: Vec<_> = other.into_iter().collect();
        self.within(&other)
    }

    pub fn is_superset_of(
        &self,
        other: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<bool> {
        let other: Vec<_> = other.into_iter().collect();
        self.covers(&other)
    }

    pub fn is_proper_subset_of(
        &self,
        other: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<bool> {
        let other: Vec<_> = other.into_iter().collect();
        Ok(self.within(&other)? && !self.covers(&other)?)
    }

    pub fn is_proper_superset_of(
        &self,
        other: impl IntoIterator<Item = TypedValue>,
    ) -> MarshalResult<bool> {
        let other: Vec<_> = other.into_iter().collect();
        Ok(self.covers(&other)? && !self.within(&other)?)
    }

    pub fn overlaps(&self, other: impl IntoIterator<Item = TypedValue>) -> MarshalResult<bool> {
        for value in other {
            if self.contains(&value)? {
                return Ok(true);
            }
        }
        self.handle.as_ptr()?;
        Ok(false)
    }

    pub fn set_equals(&self, other: impl IntoIterator<Item = TypedValue>) -> MarshalResult<bool> {
        let other: Vec<_> = other.into_iter().collect();
        Ok(self.within(&other)? && self.covers(&other)?)
    }

    pub fn try_clone(&self) -> MarshalResult<Self> {
        let mut copy = Self::new(self.handle.api().clone())?;
        let mut failure = None;
        let target = &mut copy.handle;
        self.handle.set_for_each(&mut |slot| match target.set_insert(&slot_arg(slot)) {
            Ok(true) => true,
            Ok(false) => {
                failure = Some(MarshalError::invalid("native set rejected a member while cloning"));
                false
            }
            Err(error) => {
                failure = Some(error);
                false
            }
        })?;
        if let Some(error) = failure {
            return Err(error);
        }
        copy.tag = self.tag;
        Ok(copy)
    }

    /// Releases the native set. Idempotent; returns whether this call
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

    fn check_tag(&self, value: &TypedValue) -> MarshalResult<()> {
        let mut tag = self.tag;
        check_member_tag(&mut tag, value)
    }

    /// Native set holding the values of `values` that carry this set's
    /// member tag; the rest can never match a member.
    fn lookup_set(&self, values: &[TypedValue]) -> MarshalResult<Self> {
        let mut lookup = Self::new(self.handle.api().clone())?;
        for value in values.iter().filter(|value| self.tag == Some(value.tag())) {
            lookup.insert(value)?;
        }
        Ok(lookup)
    }

    /// Every member is equal to some value of `values`.
    fn within(&self, values: &[TypedValue]) -> MarshalResult<bool> {
        let lookup = self.lookup_set(values)?;
        for member in self.to_vec()? {
            if !lookup.contains(&member)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Every value of `values` is a member.
    fn covers(&self, values: &[TypedValue]) -> MarshalResult<bool> {
        self.handle.as_ptr()?;
        for value in values {
            if !self.contains(value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn retain(
        &mut self,
        mut keep: impl FnMut(&TypedValue) -> MarshalResult<bool>,
    ) -> MarshalResult<()> {
        let mut kept = Vec::new();
        for member in self.to_vec()? {
            if keep(&member)? {
                kept.push(member);
            }
        }
        self.rewrite(self.tag, &kept)
    }

    fn rewrite(&mut self, tag: Option<TypeTag>, members: &[TypedValue]) -> MarshalResult<()> {
        let mut scratch = Self::new(self.handle.api().clone())?;
        scratch.tag = tag;
        for member in members {
            scratch.insert(member)?;
        }
        self.handle.replace(scratch.handle)
    }
}

pub(crate) fn fixed_tag(tag: TypeTag) -> Option<TypeTag> {
    (tag != TypeTag::Unknown).then_some(tag)
}

fn check_member_tag(tag: &mut Option<TypeTag>, value: &TypedValue) -> MarshalResult<()> {
    match *tag {
        Some(fixed) if fixed != value.tag() => Err(MarshalError::mismatch(fixed, value.tag())),
        Some(_) => Ok(()),
        None => {
            *tag = Some(value.tag());
            Ok(())
        }
    }
}

pub struct SetIter<'a> {
    set: &'a Set,
    members: Option<std::vec::IntoIter<TypedValue>>,
}

impl Iterator for SetIter<'_> {
    type Item = MarshalResult<TypedValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.members.is_none() {
            match self.set.to_vec() {
                Ok(members) => self.members = Some(members.into_iter()),
                Err(error) => {
                    self.members = Some(Vec::new().into_iter());
                    return Some(Err(error));
                }
            }
        }
        self.members.as_mut()?.next().map(Ok)
    }
}

impl<'a> IntoIterator for &'a Set {
    type Item = MarshalResult<TypedValue>;
    type IntoIter = SetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, Record};
    use brolink_native::HeapNative;
    use brolink_protocol::Time;
    use std::sync::Arc;

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    fn counts(values: impl IntoIterator<Item = u64>) -> Vec<TypedValue> {
        values.into_iter().map(TypedValue::count).collect()
    }

    fn sorted(set: &Set) -> anyhow::Result<Vec<u64>> {
        let mut out = Vec::new();
        for member in set {
            out.push(member?.as_unsigned().ok_or_else(|| anyhow::anyhow!("not a count"))?);
        }
        out.sort_unstable();
        Ok(out)
    }

    #[test]
    fn first_insert_fixes_member_tag() -> anyhow::Result<()> {
        let mut set = Set::new(api())?;
        assert!(set.insert(&TypedValue::count(1))?);
        let result = set.insert(&TypedValue::time(Time::from_seconds(5.0)));
        assert!(matches!(result, Err(MarshalError::TypeMismatch { .. })));
        assert_eq!(set.len()?, 1);
        assert_eq!(set.member_tag(), Some(TypeTag::Count));
        Ok(())
    }

    #[test]
    fn duplicates_are_ignored() -> anyhow::Result<()> {
        let mut set = Set::new(api())?;
        assert!(set.insert(&TypedValue::string("a"))?);
        assert!(!set.insert(&TypedValue::string("a"))?);
        assert!(set.contains(&TypedValue::string("a"))?);
        assert!(!set.contains(&TypedValue::count(1))?);
        assert_eq!(set.len()?, 1);
        Ok(())
    }

    #[test]
    fn clear_keeps_the_fixed_tag() -> anyhow::Result<()> {
        let mut set = Set::from_values(api(), counts([1, 2]))?;
        set.clear()?;
        assert!(set.is_empty()?);
        assert!(set.insert(&TypedValue::string("x")).is_err());
        assert!(set.insert(&TypedValue::count(3))?);
        Ok(())
    }

    #[test]
    fn remove_round_trips() -> anyhow::Result<()> {
        let mut set = Set::from_values(api(), counts([1, 2, 3]))?;
        assert!(set.remove(&TypedValue::count(2))?);
        assert!(!set.remove(&TypedValue::count(2))?);
        assert_eq!(sorted(&set)?, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn algebra() -> anyhow::Result<()> {
        let api = api();
        let mut set = Set::from_values(api.clone(), counts([1, 2, 3]))?;
        set.union_with(counts([3, 4]))?;
        assert_eq!(sorted(&set)?, vec![1, 2, 3, 4]);

        set.intersect_with(counts([2, 3, 4, 9]))?;
        assert_eq!(sorted(&set)?, vec![2, 3, 4]);

        set.except_with(counts([4]))?;
        assert_eq!(sorted(&set)?, vec![2, 3]);

        set.symmetric_except_with(counts([3, 5]))?;
        assert_eq!(sorted(&set)?, vec![2, 5]);

        assert!(set.is_subset_of(counts([2, 5, 7]))?);
        assert!(set.is_proper_subset_of(counts([2, 5, 7]))?);
        assert!(!set.is_proper_subset_of(counts([2, 5]))?);
        assert!(set.is_superset_of(counts([5]))?);
        assert!(set.is_proper_superset_of(counts([5]))?);
        assert!(set.overlaps(counts([5, 8]))?);
        assert!(!set.overlaps(counts([8]))?);
        assert!(set.set_equals(counts([5, 2]))?);
        Ok(())
    }

    #[test]
    fn algebra_with_conflicting_tags_changes_nothing() -> anyhow::Result<()> {
        let mut set = Set::from_values(api(), counts([1]))?;
        let before = set.addr();
        assert!(set.union_with([TypedValue::string("x")]).is_err());
        assert_eq!(set.addr(), before);
        assert_eq!(sorted(&set)?, vec![1]);
        Ok(())
    }

    #[test]
    fn clone_is_independent() -> anyhow::Result<()> {
        let original = Set::from_values(api(), counts([1, 2]))?;
        let mut copy = original.try_clone()?;
        assert_eq!(copy.member_tag(), Some(TypeTag::Count));
        copy.insert(&TypedValue::count(3))?;
        assert_eq!(sorted(&original)?, vec![1, 2]);
        assert_eq!(sorted(&copy)?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn named_values_match_plain_members() -> anyhow::Result<()> {
        let mut set = Set::from_values(api(), counts([1]))?;
        let mut named = TypedValue::count(1);
        named.set_type_name(Some("ident".to_owned()));
        assert!(set.contains(&named)?);
        assert!(set.remove(&named)?);
        assert!(set.is_empty()?);
        Ok(())
    }

    fn conn(api: &SharedNative, seq: u64) -> MarshalResult<TypedValue> {
        let record = Record::from_fields(api.clone(), [Field::new("seq", TypedValue::count(seq))])?;
        Ok(TypedValue::record(record))
    }

    #[test]
    fn record_members_are_removed_by_content() -> anyhow::Result<()> {
        let api = api();
        let mut set = Set::from_values(api.clone(), [conn(&api, 1)?, conn(&api, 2)?])?;
        assert!(set.contains(&conn(&api, 1)?)?);
        assert!(set.remove(&conn(&api, 1)?)?);
        assert_eq!(set.len()?, 1);
        assert!(!set.contains(&conn(&api, 1)?)?);
        assert!(set.contains(&conn(&api, 2)?)?);
        assert!(!set.remove(&conn(&api, 1)?)?);
        Ok(())
    }

    #[test]
    fn record_members_take_part_in_algebra() -> anyhow::Result<()> {
        let api = api();
        let mut set = Set::from_values(api.clone(), [conn(&api, 1)?, conn(&api, 2)?, conn(&api, 3)?])?;
        set.intersect_with([conn(&api, 2)?, conn(&api, 3)?, conn(&api, 4)?])?;
        assert_eq!(set.len()?, 2);
        set.except_with([conn(&api, 3)?])?;
        assert_eq!(set.len()?, 1);
        assert!(set.contains(&conn(&api, 2)?)?);

        set.symmetric_except_with([conn(&api, 2)?, conn(&api, 5)?])?;
        assert_eq!(set.len()?, 1);
        assert!(set.contains(&conn(&api, 5)?)?);

        assert!(set.is_subset_of([conn(&api, 5)?, conn(&api, 6)?])?);
        assert!(set.set_equals([conn(&api, 5)?])?);
        assert!(set.overlaps([conn(&api, 5)?])?);
        Ok(())
    }

    #[test]
    fn disposed_sets_refuse_lookups() -> anyhow::Result<()> {
        let mut set = Set::from_values(api(), counts([1]))?;
        set.dispose();
        assert!(matches!(
            set.contains(&TypedValue::string("x")),
            Err(MarshalError::ResourceDisposed(_))
        ));
        assert!(matches!(
            set.contains(&TypedValue::count(1)),
            Err(MarshalError::ResourceDisposed(_))
        ));
        assert!(matches!(
            set.insert(&TypedValue::string("x")),
            Err(MarshalError::ResourceDisposed(_))
        ));
        Ok(())
    }
}
