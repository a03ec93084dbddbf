//! [`Worker`]: a dedicated or service worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, EventName, EventPayload, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::Page;
use crate::object_factory::registered;
use crate::serialization::{parse_value, serialize_argument};

const WORKER_EVENTS: &[EventName] = &[EventName::Close, EventName::Console];

/// See <https://playwright.dev/docs/api/class-worker>
#[derive(Clone)]
pub struct Worker {
	base: ChannelOwnerImpl,
	page: Arc<RwLock<Option<Arc<str>>>>,
	closed: Arc<AtomicBool>,
}

impl Worker {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(WORKER_EVENTS),
			page: Arc::default(),
			closed: Arc::default(),
		}
	}

	pub fn url(&self) -> &str {
		self.base.initializer()["url"].as_str().unwrap_or_default()
	}

	/// The page that spawned this worker. `None` for service workers.
	pub fn page(&self) -> Option<Page> {
		let guid = self.page.read().clone()?;
		self.base.resolve::<Page>(&guid, "Page").ok()
	}

	pub(crate) fn set_page(&self, page: Arc<str>) {
		*self.page.write() = Some(page);
	}

	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		let params = json!({
			"expression": expression,
			"arg": serialize_argument(arg.as_ref(), &[])?,
		});
		let reply = self.base.channel().send_raw("evaluateExpression", params).await?;
		parse_value(&reply["value"])
	}

	fn on_close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let mut payload = EventPayload::new(EventName::Close, json!({}));
		if let Some(this) = registered(&self.base) {
			payload = payload.with_object(this);
		}
		self.base.emit(payload);
	}
}

impl private::Sealed for Worker {}

impl ChannelOwner for Worker {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		match method {
			"close" => self.on_close(),
			_ => self.base.emit_raw(method, params),
		}
	}

	fn on_dispose(&self, _reason: DisposeReason) {
		self.on_close();
	}
}

impl std::fmt::Debug for Worker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Worker").field("guid", &self.guid()).field("url", &self.url()).finish()
	}
}
