//! # brolink-native — native collection seam
//!
//! The [`NativeApi`] trait describes the foreign library's collection
//! primitives. [`NativeHandle`] wraps one native collection with an explicit
//! owned/borrowed flag and exposes safe, kind-checked access to it.
//!
//! ## Module Overview
//!
//! - [`api`] — NativeApi, raw pointer aliases, SharedNative
//! - [`handle`] — NativeHandle, CollectionKind, WireArg, NativeSlot
//! - [`heap`] — HeapNative, the in-process implementation
//! - [`counting`] — CountingNative, a call-counting decorator

pub mod api;
pub mod counting;
pub mod handle;
pub mod heap;

pub use api::{ConstPtr, NativeApi, RawPtr, RawSlot, SetVisitor, SharedNative, TableVisitor};
pub use counting::CountingNative;
pub use handle::{CollectionKind, NativeHandle, NativeSlot, WireArg};
pub use heap::HeapNative;
