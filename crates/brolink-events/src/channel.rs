//! Connection-scoped event channel.
//!
//! An [`EventChannel`] ties one [`EventTransport`] to one
//! [`EventDispatcher`]: registrations go to both, inbound callbacks land in
//! the dispatcher, and outbound events are lent to the transport one call
//! at a time.

use std::ffi::c_void;
use std::sync::Arc;

use brolink_native::SharedNative;
use brolink_protocol::{ConfigLookup, MarshalResult};
use brolink_values::TypedValue;
use tracing::{debug, instrument};

use crate::config::DispatcherConfig;
use crate::dispatch::{EventDispatcher, ListenerId, compact_callback};
use crate::event::{Event, UserData};
use crate::flags::ConnectionFlags;
use crate::outbound::OutboundEvent;
use crate::transport::{EventTransport, LoopbackTransport, lend_all};

pub struct EventChannelBuilder {
    api: SharedNative,
    transport: Option<Arc<dyn EventTransport>>,
    config: DispatcherConfig,
    flags: ConnectionFlags,
}

impl EventChannelBuilder {
    pub fn new(api: SharedNative) -> Self {
        Self {
            api,
            transport: None,
            config: DispatcherConfig::default(),
            flags: ConnectionFlags::NONE,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config_from(mut self, lookup: &dyn ConfigLookup) -> Self {
        self.config = DispatcherConfig::from_lookup(lookup);
        self
    }

    pub fn flags(mut self, flags: ConnectionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builds the channel; without an explicit transport it uses a
    /// [`LoopbackTransport`].
    pub fn build(self) -> EventChannel {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LoopbackTransport::new(self.api.clone())));
        transport.apply_flags(self.flags);
        let dispatcher = Arc::new(EventDispatcher::new(self.api, self.config));
        debug!(flags = %self.flags, "event channel ready");
        EventChannel {
            transport,
            dispatcher,
            flags: self.flags,
        }
    }
}

pub struct EventChannel {
    transport: Arc<dyn EventTransport>,
    dispatcher: Arc<EventDispatcher>,
    flags: ConnectionFlags,
}

impl EventChannel {
    pub fn builder(api: SharedNative) -> EventChannelBuilder {
        EventChannelBuilder::new(api)
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Arc<dyn EventTransport> {
        &self.transport
    }

    pub fn flags(&self) -> ConnectionFlags {
        self.flags
    }

    pub fn add_listener(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        self.dispatcher.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    /// Subscribes to events called `name`; they reach the broadcast
    /// listeners with `user_data` attached.
    #[instrument(skip(self, user_data))]
    pub fn register_for_event(&self, name: &str, user_data: Option<UserData>) -> MarshalResult<()> {
        self.dispatcher.register(name, user_data);
        self.route(name)
    }

    /// Subscribes to events called `name` with a direct handler.
    #[instrument(skip(self, handler, user_data))]
    pub fn register_handler(
        &self,
        name: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
        user_data: Option<UserData>,
    ) -> MarshalResult<()> {
        self.dispatcher.register_handler(name, handler, user_data);
        self.route(name)
    }

    /// Stops delivery of `name` for future callbacks. Unknown names are a
    /// no-op.
    #[instrument(skip(self))]
    pub fn unregister_for_event(&self, name: &str) -> bool {
        let routed = self.transport.unregister(name);
        self.dispatcher.unregister(name) || routed
    }

    pub fn request_events(&self) -> MarshalResult<()> {
        self.transport.request_events()
    }

    /// Sends `event`, lending each parameter for the duration of the call.
    #[instrument(skip_all, fields(event = %event.name(), args = event.parameter_count()))]
    pub fn send(&self, event: &OutboundEvent) -> MarshalResult<bool> {
        event.with_native_args(&mut |args| self.transport.send_event(event.name(), args))
    }

    pub fn send_event(&self, name: &str, parameters: &[TypedValue]) -> MarshalResult<bool> {
        lend_all(parameters, &mut |args| self.transport.send_event(name, args))
    }

    pub fn send_serialized(&self, bytes: &[u8]) -> MarshalResult<bool> {
        self.transport.send_serialized(bytes)
    }

    pub fn queue_length(&self) -> usize {
        self.transport.queue_length()
    }

    pub fn queue_max_length(&self) -> usize {
        self.transport.queue_max_length()
    }

    /// Returns the number of events still queued.
    pub fn flush_queue(&self) -> usize {
        self.transport.flush_queue()
    }

    fn route(&self, name: &str) -> MarshalResult<()> {
        let context = Arc::as_ptr(&self.dispatcher).cast_mut().cast::<c_void>();
        self.transport.register(name, compact_callback, context)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        for name in self.dispatcher.registered_names() {
            self.transport.unregister(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brolink_native::{CountingNative, HeapNative};
    use brolink_protocol::{Port, Time, TypeTag};
    use brolink_values::{Field, Record};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api() -> SharedNative {
        Arc::new(HeapNative::new())
    }

    #[test]
    fn loopback_round_trip() -> anyhow::Result<()> {
        let channel = EventChannel::builder(api()).build();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        channel.register_handler(
            "ping",
            move |event| {
                let seq = event.parameter(0).and_then(TypedValue::as_unsigned);
                let tag = event.user_data_as::<String>().cloned();
                sink.lock().push((event.name().to_owned(), seq, tag));
            },
            Some(Arc::new("sensor-1".to_owned())),
        )?;

        let t0 = Time::from_seconds(1_500_000_000.0);
        let event =
            OutboundEvent::with_parameters("ping", [TypedValue::count(0), TypedValue::time(t0)]);
        assert!(channel.send(&event)?);
        assert_eq!(
            *received.lock(),
            vec![("ping".to_owned(), Some(0), Some("sensor-1".to_owned()))]
        );
        Ok(())
    }

    #[test]
    fn records_cross_as_independent_copies() -> anyhow::Result<()> {
        let api = api();
        let channel = EventChannel::builder(api.clone()).build();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        channel.register_handler(
            "conn",
            move |event| {
                let port = event
                    .parameter(0)
                    .and_then(TypedValue::as_record)
                    .and_then(|record| record.get_named("p").ok().flatten())
                    .and_then(|value| value.as_port());
                *sink.lock() = port;
            },
            None,
        )?;
        let record = Record::from_fields(api, [Field::new("p", TypedValue::port(Port::tcp(443)))])?;
        channel.send_event("conn", &[TypedValue::record(record)])?;
        assert_eq!(*seen.lock(), Some(Port::tcp(443)));
        Ok(())
    }

    #[test]
    fn unregistered_names_are_not_delivered() -> anyhow::Result<()> {
        let channel = EventChannel::builder(api()).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        channel.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        channel.register_for_event("tick", None)?;
        channel.send_event("tick", &[])?;
        assert!(channel.unregister_for_event("tick"));
        assert!(!channel.unregister_for_event("tick"));
        channel.send_event("tick", &[])?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn always_queue_defers_delivery_until_flush() -> anyhow::Result<()> {
        let counting = Arc::new(CountingNative::new(HeapNative::new()));
        let channel = EventChannel::builder(counting.clone())
            .flags(ConnectionFlags::ALWAYS_QUEUE)
            .build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        channel.register_handler(
            "batch",
            move |event| {
                assert_eq!(event.parameter(0).map(TypedValue::tag), Some(TypeTag::Vector));
                counter.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )?;
        let vector = brolink_values::Vector::from_values(counting.clone(), [TypedValue::count(1)])?;
        let values = [TypedValue::vector(vector)];
        channel.send_event("batch", &values)?;
        channel.send_event("batch", &values)?;
        assert_eq!(channel.queue_length(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.flush_queue(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        drop(values);
        assert_eq!(counting.allocations(), counting.releases());
        Ok(())
    }

    #[test]
    fn request_and_serialized_paths() -> anyhow::Result<()> {
        let api = api();
        let loopback = Arc::new(LoopbackTransport::new(api.clone()).with_queue_max_length(4));
        let channel = EventChannel::builder(api)
            .transport(loopback.clone())
            .build();
        channel.register_for_event("b", None)?;
        channel.register_for_event("a", None)?;
        channel.request_events()?;
        assert_eq!(loopback.requested(), vec!["a", "b"]);
        assert!(channel.send_serialized(b"\x01\x02")?);
        assert!(channel.send_serialized(b"").is_err());
        assert_eq!(loopback.take_serialized(), vec![vec![1_u8, 2]]);
        assert_eq!(channel.queue_max_length(), 4);
        drop(channel);
        assert!(!loopback.unregister("a"));
        Ok(())
    }

    #[test]
    fn config_limits_inbound_arguments() -> anyhow::Result<()> {
        let mut config = brolink_protocol::ConfigContext::new();
        config.insert(
            crate::config::MAX_EVENT_ARGS_KEY,
            brolink_protocol::ConfigValue::Int(1),
        );
        let channel = EventChannel::builder(api()).config_from(&config).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        channel.register_handler(
            "wide",
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            None,
        )?;
        channel.send_event("wide", &[TypedValue::count(1), TypedValue::count(2)])?;
        channel.send_event("wide", &[TypedValue::count(1)])?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
