//! Listener registry and inbound dispatch.
//!
//! Registrations are connection-scoped and may change on any thread while
//! a callback is in flight. The registries are guarded by `parking_lot`
//! mutexes that are never held while user code runs: dispatch clones the
//! listener `Arc`s under the lock and invokes them after releasing it.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use brolink_native::SharedNative;
use brolink_protocol::RawEvMeta;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::event::{Event, UserData, decode_event};

/// Callback invoked for dispatched events.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Default)]
struct Registration {
    handler: Option<Listener>,
    user_data: Option<UserData>,
}

pub struct EventDispatcher {
    api: SharedNative,
    config: DispatcherConfig,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl EventDispatcher {
    pub fn new(api: SharedNative, config: DispatcherConfig) -> Self {
        Self {
            api,
            config,
            listeners: Mutex::new(Vec::new()),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &SharedNative {
        &self.api
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Adds a broadcast listener that sees every dispatched event.
    pub fn add_listener(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.lock().push((id, Arc::new(listener)));
        debug!(listener = %id, "broadcast listener added");
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Registers interest in `name`, replacing any user data stored for it.
    /// A direct handler registered earlier is kept.
    #[instrument(skip(self, user_data))]
    pub fn register(&self, name: &str, user_data: Option<UserData>) {
        let mut registrations = self.registrations.lock();
        registrations.entry(name.to_owned()).or_default().user_data = user_data;
    }

    /// Registers interest in `name` with a direct handler that runs after
    /// the broadcast listeners.
    #[instrument(skip(self, handler, user_data))]
    pub fn register_handler(
        &self,
        name: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        user_data: Option<UserData>,
    ) {
        let mut registrations = self.registrations.lock();
        let registration = registrations.entry(name.to_owned()).or_default();
        registration.handler = Some(Arc::new(handler));
        registration.user_data = user_data;
    }

    /// Drops the handler and user data for `name`. Unregistering an unknown
    /// name is a no-op. Callbacks already in flight finish normally.
    #[instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> bool {
        self.registrations.lock().remove(name).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registrations.lock().contains_key(name)
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.registrations
            .lock()
            .get(name)
            .is_some_and(|registration| registration.handler.is_some())
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registrations.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Decodes callback metadata and dispatches the event. Returns whether
    /// an event was dispatched; malformed metadata is dropped.
    ///
    /// # Safety
    ///
    /// Same contract as [`decode_event`] for `meta`.
    pub unsafe fn handle_callback(&self, meta: *const RawEvMeta) -> bool {
        // SAFETY: forwarded caller contract.
        let Some(event) = (unsafe { decode_event(&self.api, meta, self.config.max_event_args) })
        else {
            return false;
        };
        self.dispatch(event);
        true
    }

    /// Attaches the user data registered for the event's name, then runs
    /// the broadcast listeners in registration order followed by the
    /// direct handler. All of them see the same event.
    #[instrument(skip_all, fields(event = %event.name()))]
    pub fn dispatch(&self, mut event: Event) {
        let (handler, user_data) = match self.registrations.lock().get(event.name()) {
            Some(registration) => (registration.handler.clone(), registration.user_data.clone()),
            None => (None, None),
        };
        event.attach(user_data);
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(listeners = listeners.len(), direct = handler.is_some(), "dispatching event");
        for listener in &listeners {
            listener(&event);
        }
        if let Some(handler) = handler {
            handler(&event);
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("config", &self.config)
            .field("listeners", &self.listener_count())
            .field("registered", &self.registered_names())
            .finish()
    }
}

/// Compact-callback trampoline handed to the transport. `context` is the
/// address of the [`EventDispatcher`] given at registration. Panics raised
/// by listeners stop here instead of unwinding into foreign frames.
///
/// # Safety
///
/// `context` must be null or point to an `EventDispatcher` that outlives
/// the registration; `meta` follows the contract of [`decode_event`].
pub unsafe extern "C" fn compact_callback(
    _connection: *mut c_void,
    context: *mut c_void,
    meta: *const RawEvMeta,
) {
    if context.is_null() {
        return;
    }
    // SAFETY: non-null and points to a live dispatcher per the contract.
    let dispatcher = unsafe { &*context.cast::<EventDispatcher>() };
    // SAFETY: forwarded caller contract for `meta`.
    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe { dispatcher.handle_callback(meta) }));
    if outcome.is_err() {
        error!("event listener panicked inside a transport callback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_native::HeapNative;
    use brolink_protocol::{RawEvArg, Scalar, Time, TypeTag};
    use brolink_values::TypedValue;
    use std::ffi::CString;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(Arc::new(HeapNative::new()), DispatcherConfig::default())
    }

    fn ping() -> Event {
        Event::new("ping", Time::from_seconds(1.0), vec![TypedValue::count(0)])
    }

    #[test]
    fn listeners_run_in_order_then_handler() {
        let dispatcher = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second"] {
            let order = order.clone();
            dispatcher.add_listener(move |_| order.lock().push(label));
        }
        let seen = order.clone();
        dispatcher.register_handler(
            "ping",
            move |event| {
                assert_eq!(event.user_data_as::<&str>(), Some(&"ctx"));
                seen.lock().push("handler");
            },
            Some(Arc::new("ctx")),
        );
        dispatcher.dispatch(ping());
        assert_eq!(*order.lock(), vec!["first", "second", "handler"]);
    }

    #[test]
    fn registration_lifecycle() {
        let dispatcher = dispatcher();
        assert!(!dispatcher.unregister("absent"));
        dispatcher.register("pong", None);
        assert!(dispatcher.is_registered("pong"));
        assert!(!dispatcher.has_handler("pong"));
        dispatcher.register_handler("ping", |_| {}, None);
        assert_eq!(dispatcher.registered_names(), vec!["ping", "pong"]);
        assert!(dispatcher.unregister("ping"));
        assert!(!dispatcher.is_registered("ping"));

        let id = dispatcher.add_listener(|_| {});
        assert!(dispatcher.remove_listener(id));
        assert!(!dispatcher.remove_listener(id));
    }

    #[test]
    fn null_metadata_invokes_nobody() {
        let dispatcher = dispatcher();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // SAFETY: null metadata is allowed.
        assert!(!unsafe { dispatcher.handle_callback(ptr::null()) });
        // SAFETY: a null context is allowed.
        unsafe { compact_callback(ptr::null_mut(), ptr::null_mut(), ptr::null()) };
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trampoline_contains_listener_panics() -> anyhow::Result<()> {
        let dispatcher = dispatcher();
        dispatcher.add_listener(|_| panic!("listener failure"));
        let name = CString::new("boom")?;
        let meta = RawEvMeta {
            ev_name: name.as_ptr(),
            ev_ts: 0.0,
            ev_numargs: 0,
            ev_args: ptr::null_mut(),
            ev_start: ptr::null(),
            ev_end: ptr::null(),
        };
        let context = ptr::from_ref(&dispatcher).cast_mut().cast::<c_void>();
        // SAFETY: `dispatcher` and `meta` are live for the call.
        unsafe { compact_callback(ptr::null_mut(), context, &meta) };
        Ok(())
    }

    #[test]
    fn concurrent_registration_during_dispatch() -> anyhow::Result<()> {
        let dispatcher = Arc::new(dispatcher());
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        dispatcher.register_handler(
            "x",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            None,
        );

        let churn = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for round in 0..500 {
                    if round % 2 == 0 {
                        dispatcher.unregister("x");
                    } else {
                        dispatcher.register_handler("x", |_| {}, None);
                    }
                }
            })
        };

        let name = CString::new("x")?;
        let wire = Scalar::Unsigned(7).to_wire();
        let mut args = [RawEvArg {
            arg_data: wire.as_ptr().cast_mut(),
            arg_type: TypeTag::Count.as_raw(),
        }];
        let meta = RawEvMeta {
            ev_name: name.as_ptr(),
            ev_ts: 0.0,
            ev_numargs: 1,
            ev_args: args.as_mut_ptr(),
            ev_start: ptr::null(),
            ev_end: ptr::null(),
        };
        for _ in 0..500 {
            // SAFETY: every pointer in `meta` is live for the call.
            assert!(unsafe { dispatcher.handle_callback(&meta) });
        }
        churn
            .join()
            .map_err(|_| anyhow::anyhow!("registration thread panicked"))?;

        let names = dispatcher.registered_names();
        assert!(names.is_empty() || names == vec!["x".to_owned()]);
        assert!(delivered.load(Ordering::SeqCst) <= 500);
        Ok(())
    }
}
