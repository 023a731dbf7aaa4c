//! The transport port and an in-process loopback implementation.
//!
//! Connection handling lives outside this crate. The channel only needs a
//! way to register the compact callback per event name, to send events
//! whose arguments are lent for the duration of one call, and to inspect
//! the outbound queue.

#![allow(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::ffi::{CString, c_void};
use std::ptr;

use brolink_native::{SharedNative, WireArg};
use brolink_protocol::{MarshalError, MarshalResult, RawEvArg, RawEvMeta, Time};
use brolink_values::TypedValue;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::flags::ConnectionFlags;

/// Signature of the compact event callback.
pub type CompactCallback =
    unsafe extern "C" fn(connection: *mut c_void, context: *mut c_void, meta: *const RawEvMeta);

pub const DEFAULT_QUEUE_MAX_LENGTH: usize = 1000;

pub trait EventTransport: Send + Sync {
    /// Routes inbound events called `name` to `callback`, passing `context`
    /// back unchanged.
    fn register(
        &self,
        name: &str,
        callback: CompactCallback,
        context: *mut c_void,
    ) -> MarshalResult<()>;

    /// Returns whether a registration existed.
    fn unregister(&self, name: &str) -> bool;

    /// Announces the current registrations to the peer.
    fn request_events(&self) -> MarshalResult<()>;

    /// Sends one event. `args` are only valid for the duration of the
    /// call. Returns `false` when the event could neither be sent nor
    /// queued.
    fn send_event(&self, name: &str, args: &[WireArg<'_>]) -> MarshalResult<bool>;

    /// Sends an already serialized event.
    fn send_serialized(&self, bytes: &[u8]) -> MarshalResult<bool>;

    fn queue_length(&self) -> usize;

    fn queue_max_length(&self) -> usize;

    /// Tries to drain the outbound queue; returns the number of events
    /// still queued.
    fn flush_queue(&self) -> usize;

    fn apply_flags(&self, _flags: ConnectionFlags) {}
}

#[derive(Clone, Copy)]
struct Route {
    callback: CompactCallback,
    context: *mut c_void,
}

// SAFETY: the context pointer is never dereferenced here; it is handed back
// to the callback that registered it, whose contract covers cross-thread use.
unsafe impl Send for Route {}
// SAFETY: as above; `Route` is an immutable pair of addresses.
unsafe impl Sync for Route {}

struct Queued {
    name: String,
    timestamp: Time,
    args: Vec<TypedValue>,
}

// SAFETY: queued values own their collections exclusively, are only touched
// under the queue lock, and `NativeApi` implementations are `Send + Sync`.
unsafe impl Send for Queued {}

/// Delivers sent events straight back to the callbacks registered on the
/// same transport, as a connected peer echoing them would.
///
/// With [`ConnectionFlags::ALWAYS_QUEUE`] set, events are copied into an
/// outbound queue and delivered by [`EventTransport::flush_queue`].
pub struct LoopbackTransport {
    api: SharedNative,
    routes: Mutex<HashMap<String, Route>>,
    requested: Mutex<Vec<String>>,
    queue: Mutex<VecDeque<Queued>>,
    serialized: Mutex<Vec<Vec<u8>>>,
    flags: Mutex<ConnectionFlags>,
    queue_max_length: usize,
}

impl LoopbackTransport {
    pub fn new(api: SharedNative) -> Self {
        Self {
            api,
            routes: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            serialized: Mutex::new(Vec::new()),
            flags: Mutex::new(ConnectionFlags::NONE),
            queue_max_length: DEFAULT_QUEUE_MAX_LENGTH,
        }
    }

    pub fn with_queue_max_length(mut self, queue_max_length: usize) -> Self {
        self.queue_max_length = queue_max_length;
        self
    }

    pub fn flags(&self) -> ConnectionFlags {
        *self.flags.lock()
    }

    /// Names announced by the last `request_events`.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    /// Drains the serialized payloads sent so far.
    pub fn take_serialized(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.serialized.lock())
    }

    fn deliver(&self, name: &str, timestamp: Time, args: &[WireArg<'_>]) -> MarshalResult<bool> {
        let Some(route) = self.routes.lock().get(name).copied() else {
            trace!(event = name, "no route for loopback event");
            return Ok(true);
        };
        let c_name = CString::new(name)
            .map_err(|_| MarshalError::invalid(format!("event name `{name}` contains a NUL byte")))?;
        let mut raw: Vec<RawEvArg> = args
            .iter()
            .map(|arg| RawEvArg {
                arg_data: arg.data().cast_mut(),
                arg_type: arg.tag().as_raw(),
            })
            .collect();
        let ev_numargs = i32::try_from(raw.len())
            .map_err(|_| MarshalError::invalid(format!("{} event arguments", raw.len())))?;
        let meta = RawEvMeta {
            ev_name: c_name.as_ptr(),
            ev_ts: timestamp.seconds(),
            ev_numargs,
            ev_args: raw.as_mut_ptr(),
            ev_start: ptr::null(),
            ev_end: ptr::null(),
        };
        // SAFETY: `meta` and everything it points to outlive the call, and
        // the route's context came from the matching registration.
        unsafe { (route.callback)(ptr::null_mut(), route.context, &meta) };
        Ok(true)
    }

    fn enqueue(&self, name: &str, args: &[WireArg<'_>]) -> MarshalResult<bool> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.queue_max_length {
            warn!(event = name, max = self.queue_max_length, "outbound queue full");
            return Ok(false);
        }
        let mut copies = Vec::with_capacity(args.len());
        for arg in args {
            // SAFETY: `arg` is valid for this call, which is when it is read.
            copies.push(unsafe { TypedValue::from_foreign(&self.api, arg.data(), arg.tag())? });
        }
        queue.push_back(Queued {
            name: name.to_owned(),
            timestamp: Time::now(),
            args: copies,
        });
        Ok(true)
    }
}

impl EventTransport for LoopbackTransport {
    fn register(
        &self,
        name: &str,
        callback: CompactCallback,
        context: *mut c_void,
    ) -> MarshalResult<()> {
        self.routes
            .lock()
            .insert(name.to_owned(), Route { callback, context });
        Ok(())
    }

    fn unregister(&self, name: &str) -> bool {
        self.routes.lock().remove(name).is_some()
    }

    fn request_events(&self) -> MarshalResult<()> {
        let mut names: Vec<String> = self.routes.lock().keys().cloned().collect();
        names.sort();
        debug!(count = names.len(), "loopback events requested");
        *self.requested.lock() = names;
        Ok(())
    }

    fn send_event(&self, name: &str, args: &[WireArg<'_>]) -> MarshalResult<bool> {
        if self.flags().contains(ConnectionFlags::ALWAYS_QUEUE) {
            return self.enqueue(name, args);
        }
        self.deliver(name, Time::now(), args)
    }

    fn send_serialized(&self, bytes: &[u8]) -> MarshalResult<bool> {
        if bytes.is_empty() {
            return Err(MarshalError::invalid("empty serialized event"));
        }
        self.serialized.lock().push(bytes.to_vec());
        Ok(true)
    }

    fn queue_length(&self) -> usize {
        self.queue.lock().len()
    }

    fn queue_max_length(&self) -> usize {
        self.queue_max_length
    }

    fn flush_queue(&self) -> usize {
        loop {
            let Some(queued) = self.queue.lock().pop_front() else {
                break;
            };
            if let Err(error) = lend_all(&queued.args, &mut |args| {
                self.deliver(&queued.name, queued.timestamp, args)
            }) {
                warn!(event = %queued.name, %error, "dropping queued event");
            }
        }
        self.queue_length()
    }

    fn apply_flags(&self, flags: ConnectionFlags) {
        *self.flags.lock() = flags;
    }
}

/// Lends every value's native pointer at once for the duration of `f`.
pub(crate) fn lend_all<R>(
    values: &[TypedValue],
    f: &mut dyn FnMut(&[WireArg<'_>]) -> MarshalResult<R>,
) -> MarshalResult<R> {
    let names = values
        .iter()
        .map(|value| value.type_name().map(CString::new).transpose())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| MarshalError::invalid("type name contains a NUL byte"))?;
    lend_from(values, &names, &mut Vec::with_capacity(values.len()), f)
}

fn lend_from<'n, R>(
    values: &[TypedValue],
    names: &'n [Option<CString>],
    lent: &mut Vec<WireArg<'n>>,
    f: &mut dyn FnMut(&[WireArg<'_>]) -> MarshalResult<R>,
) -> MarshalResult<R> {
    let index = lent.len();
    let Some(value) = values.get(index) else {
        return f(lent);
    };
    value.with_native(|arg| {
        let type_name = names.get(index).and_then(|name| name.as_deref());
        // SAFETY: `arg.data()` stays lent until `with_native` returns, and
        // the re-tagged copy is popped before that.
        let arg = unsafe { WireArg::new(arg.tag(), type_name, arg.data()) };
        lent.push(arg);
        let result = lend_from(values, names, lent, f);
        lent.pop();
        result
    })?
}
