//! [`Browser`]: a launched or connected browser instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, EventName, EventPayload, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::object_factory::{registered, reply_object};
use crate::{BrowserContext, CdpSession, Page};

const BROWSER_EVENTS: &[EventName] = &[EventName::Disconnected];

/// See <https://playwright.dev/docs/api/class-browser>
#[derive(Clone)]
pub struct Browser {
	base: ChannelOwnerImpl,
	state: Arc<BrowserState>,
}

struct BrowserState {
	contexts: Mutex<Vec<BrowserContext>>,
	is_connected: AtomicBool,
}

impl Browser {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(BROWSER_EVENTS),
			state: Arc::new(BrowserState {
				contexts: Mutex::new(Vec::new()),
				is_connected: AtomicBool::new(true),
			}),
		}
	}

	pub fn name(&self) -> &str {
		self.base.initializer()["name"].as_str().unwrap_or_default()
	}

	pub fn version(&self) -> &str {
		self.base.initializer()["version"].as_str().unwrap_or_default()
	}

	pub fn is_connected(&self) -> bool {
		self.state.is_connected.load(Ordering::SeqCst)
	}

	/// Open contexts, oldest first.
	pub fn contexts(&self) -> Vec<BrowserContext> {
		self.state.contexts.lock().clone()
	}

	pub(crate) fn add_context(&self, context: &BrowserContext) {
		let mut contexts = self.state.contexts.lock();
		if !contexts.iter().any(|c| c.guid() == context.guid()) {
			contexts.push(context.clone());
		}
	}

	pub(crate) fn remove_context(&self, guid: &str) {
		self.state.contexts.lock().retain(|context| context.guid() != guid);
	}

	/// Creates a context with default options.
	///
	/// See <https://playwright.dev/docs/api/class-browser#browser-new-context>
	pub async fn new_context(&self) -> Result<BrowserContext> {
		self.new_context_with(json!({})).await
	}

	/// Creates a context from raw `newContext` options (viewport, locale, ...).
	pub async fn new_context_with(&self, options: Value) -> Result<BrowserContext> {
		let reply = self.base.channel().send_raw("newContext", options).await?;
		reply_object(&self.base, &reply, "context", "BrowserContext").await
	}

	/// Opens a page in a fresh context that closes together with the page.
	///
	/// See <https://playwright.dev/docs/api/class-browser#browser-new-page>
	pub async fn new_page(&self) -> Result<Page> {
		let context = self.new_context().await?;
		let page = context.new_page().await?;
		page.set_owned_context(context);
		Ok(page)
	}

	/// Opens a devtools-protocol session for the whole browser. Chromium only.
	pub async fn new_browser_cdp_session(&self) -> Result<CdpSession> {
		let reply = self.base.channel().send_raw("newBrowserCDPSession", json!({})).await?;
		reply_object(&self.base, &reply, "session", "CDPSession").await
	}

	/// Closes the browser and all of its contexts.
	///
	/// Closing a browser that is already gone succeeds.
	pub async fn close(&self) -> Result<()> {
		match self.base.channel().send_no_result("close", json!({})).await {
			Ok(()) => {}
			Err(err) if err.is_target_closed() => {}
			Err(err) => return Err(err),
		}
		self.on_close();
		Ok(())
	}

	fn on_close(&self) {
		if !self.state.is_connected.swap(false, Ordering::SeqCst) {
			return;
		}
		tracing::debug!(target: "pwire", browser = self.guid(), "Browser disconnected");
		let mut payload = EventPayload::new(EventName::Disconnected, json!({}));
		if let Some(this) = registered(&self.base) {
			payload = payload.with_object(this);
		}
		self.base.emit(payload);
	}
}

impl private::Sealed for Browser {}

impl ChannelOwner for Browser {
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

impl std::fmt::Debug for Browser {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Browser")
			.field("guid", &self.guid())
			.field("name", &self.name())
			.field("version", &self.version())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;
	use crate::object_factory::tests::{create, offline_connection};

	#[tokio::test]
	async fn test_contexts_follow_lifecycle() {
		let (connection, _in, _out) = offline_connection();
		let root = connection.root_object();
		let object = create(&connection, &root, "Browser", "browser@1", json!({"name": "chromium", "version": "131.0"}));
		let browser = object.downcast_ref::<Browser>().unwrap().clone();
		assert_eq!(browser.version(), "131.0");

		let first = create(&connection, &object, "BrowserContext", "context@1", json!({}));
		create(&connection, &object, "BrowserContext", "context@2", json!({}));
		let guids: Vec<String> = browser.contexts().iter().map(|c| c.guid().to_string()).collect();
		assert_eq!(guids, ["context@1", "context@2"]);

		first.on_event("close", json!({}));
		let guids: Vec<String> = browser.contexts().iter().map(|c| c.guid().to_string()).collect();
		assert_eq!(guids, ["context@2"]);
	}

	#[tokio::test]
	async fn test_disconnected_once() {
		let (connection, _in, _out) = offline_connection();
		let root = connection.root_object();
		let object = create(&connection, &root, "Browser", "browser@1", json!({"name": "chromium", "version": "131.0"}));
		let browser = object.downcast_ref::<Browser>().unwrap().clone();

		let count = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&count);
		browser
			.events()
			.on(EventName::Disconnected, move |_: &EventPayload| {
				counter.fetch_add(1, Ordering::SeqCst);
			})
			.unwrap();

		object.on_event("close", json!({}));
		object.dispose(DisposeReason::Closed);
		assert!(!browser.is_connected());
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}
}
