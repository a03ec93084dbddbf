//! [`CdpSession`]: raw Chrome DevTools Protocol pass-through.
//!
//! Payloads are opaque: params go out and results come back as plain JSON.

use std::sync::Arc;

use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, EventName, EventPayload, ListenerId, ParentOrConnection, Result};
use serde_json::{Value, json};

const CDP_EVENTS: &[EventName] = &[EventName::CdpEvent];

/// A devtools-protocol session for a page or the whole browser.
///
/// See <https://playwright.dev/docs/api/class-cdpsession>
#[derive(Clone)]
pub struct CdpSession {
	base: ChannelOwnerImpl,
}

impl CdpSession {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(CDP_EVENTS),
		}
	}

	/// Sends a devtools-protocol command and returns its result.
	///
	/// # Example
	///
	/// ```ignore
	/// let metrics = session.send("Performance.getMetrics", None).await?;
	/// ```
	pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
		let reply = self
			.base
			.channel()
			.send_raw("send", json!({ "method": method, "params": params.unwrap_or_else(|| json!({})) }))
			.await?;
		Ok(reply.get("result").cloned().unwrap_or(Value::Null))
	}

	/// Detaches the session. Further `send` calls fail.
	pub async fn detach(&self) -> Result<()> {
		self.base.channel().send_no_result("detach", json!({})).await
	}

	/// Calls `listener` with the params of every devtools event named `method`.
	pub fn on_cdp_event<F>(&self, method: &str, listener: F) -> Result<ListenerId>
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		let method = method.to_string();
		self.base.events().on(EventName::CdpEvent, move |payload: &EventPayload| {
			if payload.params["method"].as_str() == Some(method.as_str()) {
				listener(&payload.params["params"]);
			}
		})
	}
}

impl private::Sealed for CdpSession {}

impl ChannelOwner for CdpSession {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		match method {
			"event" => {
				self.base.emit(EventPayload::new(EventName::CdpEvent, params));
			}
			_ => self.base.emit_raw(method, params),
		}
	}
}

impl std::fmt::Debug for CdpSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CdpSession").field("guid", &self.guid()).finish()
	}
}
