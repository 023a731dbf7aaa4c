//! # brolink-events — inbound decode, dispatch, and the event channel
//!
//! Inbound events arrive through a compact C callback carrying a name, a
//! timestamp and an array of `(pointer, tag)` arguments. [`decode_event`]
//! copies all of it into an owned [`Event`]; [`EventDispatcher`] hands the
//! event to broadcast listeners and then to the handler registered for its
//! name. [`EventChannel`] pairs a dispatcher with an [`EventTransport`] and
//! sends [`OutboundEvent`]s by lending their values for a single call.
//!
//! ## Module Overview
//!
//! - [`event`] — Event, UserData, decode_event
//! - [`dispatch`] — EventDispatcher, ListenerId, the compact callback trampoline
//! - [`transport`] — EventTransport port, LoopbackTransport
//! - [`channel`] — EventChannel and its builder
//! - [`outbound`] — OutboundEvent
//! - [`flags`] — ConnectionFlags
//! - [`config`] — DispatcherConfig

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod flags;
pub mod outbound;
pub mod transport;

pub use channel::{EventChannel, EventChannelBuilder};
pub use config::{DEFAULT_MAX_EVENT_ARGS, DispatcherConfig, MAX_EVENT_ARGS_KEY};
pub use dispatch::{EventDispatcher, Listener, ListenerId, compact_callback};
pub use event::{Event, UserData, decode_event};
pub use flags::ConnectionFlags;
pub use outbound::OutboundEvent;
pub use transport::{CompactCallback, DEFAULT_QUEUE_MAX_LENGTH, EventTransport, LoopbackTransport};
