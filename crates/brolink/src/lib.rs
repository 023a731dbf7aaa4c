//! # brolink — typed-value marshaling for the Bro event protocol
//!
//! Facade over the brolink crates. Values cross the foreign boundary as
//! owned copies; native collections are wrapped by handles that know
//! whether they own what they point at; inbound callbacks are decoded into
//! owned events before any listener sees them.
//!
//! ## Module Overview
//!
//! - [`protocol`] — type tags, wire layouts, errors, configuration lookup
//! - [`native`] — the native collection API and ownership handles
//! - [`values`] — TypedValue and the Vector/Record/Set/Table wrappers
//! - [`events`] — event decode, dispatch, and the event channel

pub use brolink_events as events;
pub use brolink_native as native;
pub use brolink_protocol as protocol;
pub use brolink_values as values;

pub mod prelude {
    pub use brolink_events::{
        ConnectionFlags, DispatcherConfig, Event, EventChannel, EventTransport, ListenerId,
        LoopbackTransport, OutboundEvent, UserData,
    };
    pub use brolink_native::{CountingNative, HeapNative, NativeApi, SharedNative};
    pub use brolink_protocol::{
        Address, ConfigContext, ConfigLookup, ConfigValue, MarshalError, MarshalResult, Port,
        Scalar, Subnet, Time, TypeTag,
    };
    pub use brolink_values::{Field, Record, Set, Source, Table, TypedValue, ValueRef, Vector};
}
