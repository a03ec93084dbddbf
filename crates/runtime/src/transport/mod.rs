//! Byte-stream transports to the driver.
//!
//! A transport is split into a writer half ([`Transport`]) and a reader half
//! ([`TransportReceiver`]). The reader decodes frames into JSON values and
//! pushes them into an unbounded channel consumed by the connection's single
//! receive loop. The connection owns the only writer, so frames are never
//! interleaved.

mod pipe;
mod websocket;


use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

pub use pipe::{MAX_FRAME_LEN, PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use websocket::{WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender};

use crate::error::Result;

/// Writer half of a transport.
pub trait Transport: Send {
	/// Writes one complete frame.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

	/// Flushes and closes the write side.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Reader half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the stream ends.
	///
	/// Returns `Ok(())` only when the consumer went away. Every other way the
	/// stream can end is a terminal error, reported exactly once.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both halves plus the channel the reader feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}
