//! Inbound events and the decode path from callback metadata.

#![allow(unsafe_code)]

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use brolink_native::SharedNative;
use brolink_protocol::codec::{RawEvArg, RawEvMeta, read_c_str};
use brolink_protocol::{Time, TypeTag};
use brolink_values::TypedValue;
use tracing::{trace, warn};

/// Opaque application data attached to events of one name.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A decoded inbound event. Every parameter is an owned copy; nothing
/// aliases the callback frame it came from.
pub struct Event {
    name: String,
    timestamp: Time,
    parameters: Vec<TypedValue>,
    user_data: Option<UserData>,
}

impl Event {
    pub fn new(name: impl Into<String>, timestamp: Time, parameters: Vec<TypedValue>) -> Self {
        Self {
            name: name.into(),
            timestamp,
            parameters,
            user_data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> Time {
        self.timestamp
    }

    pub fn parameters(&self) -> &[TypedValue] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<&TypedValue> {
        self.parameters.get(index)
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// User data downcast to `T`.
    pub fn user_data_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) fn attach(&mut self, user_data: Option<UserData>) {
        self.user_data = user_data;
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("timestamp", &self.timestamp)
            .field("parameters", &self.parameters)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Builds an [`Event`] from compact callback metadata.
///
/// Malformed metadata yields `None` and a warning: a null block or name, a
/// negative or oversized argument count, a missing argument array, or an
/// argument that cannot be copied.
///
/// # Safety
///
/// `meta` must be null or point to readable metadata whose name is null or
/// NUL-terminated, and whose `ev_args` holds `ev_numargs` entries, each
/// valid for its tag. Collection arguments must belong to `api`.
pub unsafe fn decode_event(
    api: &SharedNative,
    meta: *const RawEvMeta,
    max_args: usize,
) -> Option<Event> {
    if meta.is_null() {
        warn!("dropping event callback with null metadata");
        return None;
    }
    // SAFETY: non-null and readable per the caller contract.
    let meta = unsafe { meta.read_unaligned() };
    // SAFETY: the name is null or NUL-terminated per the caller contract.
    let Some(name) = (unsafe { read_c_str(meta.ev_name) }) else {
        warn!("dropping event callback with null name");
        return None;
    };
    let Ok(count) = usize::try_from(meta.ev_numargs) else {
        warn!(event = %name, count = meta.ev_numargs, "dropping event with negative argument count");
        return None;
    };
    if count > max_args {
        warn!(event = %name, count, max_args, "dropping event with too many arguments");
        return None;
    }
    let args: &[RawEvArg] = if count == 0 {
        &[]
    } else if meta.ev_args.is_null() {
        warn!(event = %name, count, "dropping event with null argument array");
        return None;
    } else {
        // SAFETY: non-null array of `count` entries per the caller contract.
        unsafe { std::slice::from_raw_parts(meta.ev_args, count) }
    };

    let mut parameters = Vec::with_capacity(count);
    for (index, arg) in args.iter().enumerate() {
        let tag = TypeTag::from_raw(arg.arg_type);
        // SAFETY: each argument is valid for its tag per the caller contract.
        match unsafe { TypedValue::from_foreign(api, arg.arg_data.cast_const(), tag) } {
            Ok(value) => parameters.push(value),
            Err(error) => {
                warn!(event = %name, index, %tag, %error, "dropping event with undecodable argument");
                return None;
            }
        }
    }
    trace!(event = %name, count, "event decoded");
    Some(Event::new(name, Time::from_seconds(meta.ev_ts), parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_native::HeapNative;
    use brolink_protocol::Scalar;
    use std::ffi::{CString, c_void};
    use std::ptr;

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    fn meta(name: &CString, ts: f64, args: &mut [RawEvArg]) -> RawEvMeta {
        RawEvMeta {
            ev_name: name.as_ptr(),
            ev_ts: ts,
            ev_numargs: args.len() as i32,
            ev_args: args.as_mut_ptr(),
            ev_start: ptr::null(),
            ev_end: ptr::null(),
        }
    }

    #[test]
    fn decodes_ping() -> anyhow::Result<()> {
        let api = api();
        let t0 = Time::from_seconds(1_400_000_000.25);
        let seq = Scalar::Unsigned(0).to_wire();
        let time = Scalar::Time(t0).to_wire();
        let mut args = [
            RawEvArg {
                arg_data: seq.as_ptr().cast_mut(),
                arg_type: TypeTag::Count.as_raw(),
            },
            RawEvArg {
                arg_data: time.as_ptr().cast_mut(),
                arg_type: TypeTag::Time.as_raw(),
            },
        ];
        let name = CString::new("ping")?;
        let meta = meta(&name, t0.seconds(), &mut args);
        // SAFETY: every pointer in `meta` is live for the call.
        let event = unsafe { decode_event(&api, &meta, 16) }
            .ok_or_else(|| anyhow::anyhow!("event dropped"))?;
        assert_eq!(event.name(), "ping");
        assert_eq!(event.timestamp(), t0);
        assert_eq!(event.parameters(), &[TypedValue::count(0), TypedValue::time(t0)]);
        assert!(event.user_data().is_none());
        Ok(())
    }

    #[test]
    fn drops_malformed_metadata() -> anyhow::Result<()> {
        let api = api();
        // SAFETY: null metadata is allowed.
        assert!(unsafe { decode_event(&api, ptr::null(), 16) }.is_none());

        let name = CString::new("bad")?;
        let mut nameless = meta(&name, 0.0, &mut []);
        nameless.ev_name = ptr::null();
        // SAFETY: pointers are null or live.
        assert!(unsafe { decode_event(&api, &nameless, 16) }.is_none());

        let mut negative = meta(&name, 0.0, &mut []);
        negative.ev_numargs = -1;
        // SAFETY: pointers are null or live.
        assert!(unsafe { decode_event(&api, &negative, 16) }.is_none());

        let mut missing = meta(&name, 0.0, &mut []);
        missing.ev_numargs = 2;
        missing.ev_args = ptr::null_mut();
        // SAFETY: the null array is rejected before it is read.
        assert!(unsafe { decode_event(&api, &missing, 16) }.is_none());
        Ok(())
    }

    #[test]
    fn enforces_argument_limit() -> anyhow::Result<()> {
        let api = api();
        let wire = Scalar::Unsigned(1).to_wire();
        let mut args = vec![
            RawEvArg {
                arg_data: wire.as_ptr().cast_mut(),
                arg_type: TypeTag::Count.as_raw(),
            };
            3
        ];
        let name = CString::new("many")?;
        let meta = meta(&name, 0.0, &mut args);
        // SAFETY: every pointer in `meta` is live for the call.
        assert!(unsafe { decode_event(&api, &meta, 2) }.is_none());
        // SAFETY: as above.
        assert_eq!(unsafe { decode_event(&api, &meta, 3) }.map(|e| e.parameters().len()), Some(3));
        Ok(())
    }

    #[test]
    fn unknown_tags_are_kept_opaque() -> anyhow::Result<()> {
        let api = api();
        let marker = 0x1000_usize as *mut c_void;
        let mut args = [RawEvArg {
            arg_data: marker,
            arg_type: 77,
        }];
        let name = CString::new("odd")?;
        let meta = meta(&name, 0.0, &mut args);
        // SAFETY: unknown tags are never dereferenced.
        let event = unsafe { decode_event(&api, &meta, 4) }
            .ok_or_else(|| anyhow::anyhow!("event dropped"))?;
        assert_eq!(event.parameters()[0].tag(), TypeTag::Unknown);
        Ok(())
    }
}
