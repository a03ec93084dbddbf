//! [`WebSocket`]: observer for a websocket opened by a page.
//!
//! Read-only. Interception goes through [`WebSocketRoute`](crate::WebSocketRoute).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, EventName, EventPayload, ParentOrConnection};
use serde_json::{Value, json};

const WEB_SOCKET_EVENTS: &[EventName] = &[EventName::Close, EventName::FrameReceived, EventName::FrameSent, EventName::SocketError];

/// See <https://playwright.dev/docs/api/class-websocket>
#[derive(Clone)]
pub struct WebSocket {
	base: ChannelOwnerImpl,
	closed: Arc<AtomicBool>,
}

impl WebSocket {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(WEB_SOCKET_EVENTS),
			closed: Arc::default(),
		}
	}

	pub fn url(&self) -> &str {
		self.base.initializer()["url"].as_str().unwrap_or_default()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn on_close(&self) {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.base.emit(EventPayload::new(EventName::Close, json!({})));
		}
	}
}

impl private::Sealed for WebSocket {}

impl ChannelOwner for WebSocket {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		let event = match method {
			"close" => return self.on_close(),
			"frameSent" => EventName::FrameSent,
			"frameReceived" => EventName::FrameReceived,
			"socketError" => EventName::SocketError,
			_ => return self.base.emit_raw(method, params),
		};
		self.base.emit(EventPayload::new(event, params));
	}

	fn on_dispose(&self, _reason: DisposeReason) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

impl std::fmt::Debug for WebSocket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WebSocket").field("guid", &self.guid()).field("url", &self.url()).finish()
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;
	use crate::object_factory::tests::{create, offline_connection};

	#[tokio::test]
	async fn test_frames_map_to_events() {
		let (connection, _in, _out) = offline_connection();
		let root = connection.root_object();
		let object = create(&connection, &root, "WebSocket", "ws@1", json!({"url": "wss://example.com/feed"}));
		let socket = object.downcast_ref::<WebSocket>().unwrap().clone();

		let seen = Arc::new(Mutex::new(Vec::new()));
		for event in [EventName::FrameSent, EventName::FrameReceived, EventName::Close] {
			let sink = Arc::clone(&seen);
			socket
				.events()
				.on(event, move |p: &EventPayload| sink.lock().push(p.event))
				.unwrap();
		}

		object.on_event("frameSent", json!({"opcode": 1, "data": "ping"}));
		object.on_event("frameReceived", json!({"opcode": 1, "data": "pong"}));
		object.on_event("close", json!({}));
		object.on_event("close", json!({}));
		assert!(socket.is_closed());
		assert_eq!(*seen.lock(), vec![EventName::FrameSent, EventName::FrameReceived, EventName::Close]);
	}
}
