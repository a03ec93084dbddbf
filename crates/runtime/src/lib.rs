//! pwire runtime - driver transport, connection and object registry.
//!
//! - **Transport**: length-prefixed JSON over stdio pipes, or a websocket
//! - **Connection**: request/response correlation, lifecycle messages and event dispatch
//! - **Objects**: the [`ChannelOwner`] base shared by every proxy, with listener slots
//! - **Waiter**: one-shot event waits with timeout and cancellation
//! - **Driver**: locating and spawning the driver process
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │    pwire    │  Typed proxies (Browser, Page, Route, ...)
//! └──────┬──────┘
//!        │ implements ObjectFactory
//! ┌──────▼──────┐
//! │pwire-runtime│  This crate
//! │  ┌────────┐ │
//! │  │ Conn   │ │  Pending calls, registry, receive loop
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  Pipe/WebSocket transport
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Driver │ │  Process management
//! │  └────────┘ │
//! └─────────────┘
//! ```
//!
//! The connection builds proxies through the [`ObjectFactory`] trait so this
//! crate never depends on the concrete object types.

pub mod channel;
pub mod channel_owner;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod server;
pub mod transport;
pub mod waiter;

pub use channel::Channel;
pub use channel_owner::{ChannelOwner, ChannelOwnerImpl, DisposeReason, ParentOrConnection, adopt};
pub use config::{DEFAULT_TIMEOUT, RuntimeConfig};
pub use connection::{Connection, ConnectionLike, ObjectFactory, ObjectStore, RootObject};
pub use driver::locate_driver;
pub use error::{Error, ErrorKind, Result};
pub use events::{EventEmitter, EventName, EventPayload, Listener, ListenerId, Subscription};
pub use server::DriverProcess;
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts, TransportReceiver, WebSocketTransport,
	WebSocketTransportReceiver, WebSocketTransportSender,
};
pub use waiter::{Predicate, Waiter, expect_event};
