//! Driver events addressed to a [`Page`], and the console message view.

use std::sync::atomic::Ordering;

use pwire_runtime::{ChannelOwner, EventName, EventPayload};
use serde_json::{Value, json};

use super::Page;
use crate::object_factory::{event_object, event_owner, registered};
use crate::{Frame, Route, WebSocketRoute, Worker};

impl Page {
	pub(super) fn dispatch_event(&self, method: &str, params: Value) {
		match method {
			"close" => self.on_close(),
			"route" => {
				let Some(route) = event_object::<Route>(&self.base, &params, "route") else {
					tracing::warn!(target: "pwire", page = self.guid(), "route event for unknown Route");
					return;
				};
				let page = self.clone();
				tokio::spawn(async move { page.on_route(route).await });
			}
			"webSocketRoute" => {
				let Some(route) = event_object::<WebSocketRoute>(&self.base, &params, "webSocketRoute") else {
					tracing::warn!(target: "pwire", page = self.guid(), "webSocketRoute event for unknown WebSocketRoute");
					return;
				};
				let page = self.clone();
				tokio::spawn(async move { page.on_web_socket_route(route).await });
			}
			"bindingCall" => self.on_binding_call(&params),
			"locatorHandlerTriggered" => match params["uid"].as_u64() {
				Some(uid) => self.on_locator_handler_triggered(uid),
				None => tracing::warn!(target: "pwire", page = self.guid(), "locatorHandlerTriggered without uid"),
			},
			"frameAttached" => {
				if let Some(frame) = event_object::<Frame>(&self.base, &params, "frame") {
					frame.set_page(std::sync::Arc::from(self.guid()));
				}
				self.emit_with_object(EventName::FrameAttached, &params, "frame");
			}
			"frameDetached" => self.emit_with_object(EventName::FrameDetached, &params, "frame"),
			"worker" => {
				if let Some(worker) = event_object::<Worker>(&self.base, &params, "worker") {
					worker.set_page(std::sync::Arc::from(self.guid()));
				}
				self.emit_with_object(EventName::Worker, &params, "worker");
			}
			"webSocket" => self.emit_with_object(EventName::WebSocket, &params, "webSocket"),
			"download" => self.emit_with_object(EventName::Download, &params, "artifact"),
			"fileChooser" => self.emit_with_object(EventName::FileChooser, &params, "element"),
			"crash" => {
				self.base.emit(EventPayload::new(EventName::Crash, params));
			}
			"pageError" => {
				self.base.emit(EventPayload::new(EventName::PageError, params));
			}
			_ => self.base.emit_raw(method, params),
		}
	}

	fn emit_with_object(&self, event: EventName, params: &Value, key: &str) {
		let mut payload = EventPayload::new(event, params.clone());
		if let Some(object) = event_owner(&self.base, params, key) {
			payload = payload.with_object(object);
		}
		self.base.emit(payload);
	}

	/// Marks the page closed and detaches its route handlers. Idempotent.
	///
	/// In-flight handler invocations keep running; their failures are swallowed.
	pub(super) fn on_close(&self) {
		if self.state.is_closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.state.routes.close();
		self.state.web_socket_routes.close();
		self.state.locator_handlers.lock().clear();
		self.state.closed.send_replace(true);
		if let Some(context) = self.context() {
			context.remove_page(self.guid());
		}
		tracing::debug!(target: "pwire", page = self.guid(), "Page closed");

		let mut payload = EventPayload::new(EventName::Close, json!({}));
		if let Some(this) = registered(&self.base) {
			payload = payload.with_object(this);
		}
		self.base.emit(payload);
	}

	/// Re-emits a context-level event on this page (`console`, `request`, ...).
	pub(crate) fn emit_from_context(&self, payload: EventPayload) {
		if !self.is_closed() {
			self.base.emit(payload);
		}
	}
}

/// Console message from JavaScript `console.*` calls.
///
/// See <https://playwright.dev/docs/api/class-consolemessage>
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
	kind: ConsoleMessageKind,
	text: String,
	location: Option<ConsoleLocation>,
}

impl ConsoleMessage {
	/// Reads a message from `console` event params.
	///
	/// Accepts both the flat shape and the older `{message: {...}}` wrapper.
	pub fn from_params(params: &Value) -> Self {
		let message = params.get("message").filter(|m| m.is_object()).unwrap_or(params);
		let kind = message["type"].as_str().map(ConsoleMessageKind::from_str).unwrap_or(ConsoleMessageKind::Log);
		let text = message["text"].as_str().unwrap_or_default().to_string();
		let location = message.get("location").and_then(|loc| {
			Some(ConsoleLocation {
				url: loc.get("url")?.as_str()?.to_string(),
				line_number: loc.get("lineNumber")?.as_u64()? as u32,
				column_number: loc.get("columnNumber")?.as_u64()? as u32,
			})
		});
		Self { kind, text, location }
	}

	pub fn kind(&self) -> ConsoleMessageKind {
		self.kind
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	pub fn location(&self) -> Option<&ConsoleLocation> {
		self.location.as_ref()
	}
}

/// The `console` method that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMessageKind {
	Log,
	Debug,
	Info,
	Warning,
	Error,
	Dir,
	Table,
	Trace,
	Clear,
	Assert,
	Other,
}

impl ConsoleMessageKind {
	fn from_str(s: &str) -> Self {
		match s {
			"log" => Self::Log,
			"debug" => Self::Debug,
			"info" => Self::Info,
			"warning" => Self::Warning,
			"error" => Self::Error,
			"dir" => Self::Dir,
			"table" => Self::Table,
			"trace" => Self::Trace,
			"clear" => Self::Clear,
			"assert" => Self::Assert,
			_ => Self::Other,
		}
	}
}

impl std::fmt::Display for ConsoleMessageKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Log => "log",
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warning => "warning",
			Self::Error => "error",
			Self::Dir => "dir",
			Self::Table => "table",
			Self::Trace => "trace",
			Self::Clear => "clear",
			Self::Assert => "assert",
			Self::Other => "other",
		};
		f.write_str(name)
	}
}

/// Source location for a console message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLocation {
	pub url: String,
	/// 0-indexed
	pub line_number: u32,
	/// 0-indexed
	pub column_number: u32,
}
