//! # brolink-values — typed values and collection wrappers
//!
//! [`TypedValue`] boxes exactly one wire-typed payload. The collection
//! wrappers present native collections as editable structures: direct
//! operations go to the native collection, and the ones it lacks run as
//! clone-round-trips that only swap in the rewritten collection on success.
//!
//! ## Module Overview
//!
//! - [`value`] — TypedValue, Source, ValueRef, the scoped native bridge
//! - [`convert`] — explicit tag-to-tag conversions
//! - [`field`] — named record members
//! - [`vector`] — ordered list
//! - [`record`] — fielded tuple and list-mode record
//! - [`set`] — unique members with a fixed member tag, set algebra
//! - [`table`] — key/value map with fixed key and value tags

pub mod convert;
pub mod field;
pub mod record;
pub mod set;
pub mod table;
pub mod value;
pub mod vector;

pub use field::Field;
pub use record::{Record, RecordIter};
pub use set::{Set, SetIter};
pub use table::{Table, TableIter};
pub use value::{Source, TypedValue, ValueRef};
pub use vector::{Vector, VectorIter};
