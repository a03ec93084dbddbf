//! Wire types for the pwire driver protocol.
//!
//! This crate has no I/O. It describes the frames exchanged with the driver
//! and the option payloads that several crates share.

pub mod message;
pub mod options;

pub use message::{
	AdoptParams, CreateParams, DisposeParams, ErrorPayload, ErrorWrapper, Event, Lifecycle, Location, Message, Metadata, Request,
	Response, guid_ref,
};
pub use options::{
	ContinueOverrides, FulfillOptions, HeaderEntry, InterceptionPattern, LaunchOptions, LocatorHandlerOptions, RouteOptions, UnrouteBehavior,
	WebSocketMessage, decode_binary,
};
