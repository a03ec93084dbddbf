//! [`BrowserContext`]: an isolated browser session.
//!
//! A context owns pages, the context-level route handlers that see requests
//! no page handler resolved, and the timeout defaults its pages inherit.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pwire_protocol::{RouteOptions, UnrouteBehavior};
use pwire_runtime::channel_owner::private;
use pwire_runtime::{
	ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, EventName, EventPayload, ParentOrConnection, Predicate, Result,
};
use serde_json::{Value, json};

use crate::binding_call::{BindingCall, BindingFn, BindingSource, binding_fn};
use crate::handlers::{HandlerId, handler_fn};
use crate::object_factory::{event_object, event_owner, registered, reply_object};
use crate::routing::{self, RouteRegistry, Routable};
use crate::timeout_settings::TimeoutSettings;
use crate::url_matcher::UrlMatcher;
use crate::websocket_route::web_socket_route_handler;
use crate::{Browser, CdpSession, Dialog, Page, Route, WebSocketRoute};

const CONTEXT_EVENTS: &[EventName] = &[
	EventName::BackgroundPage,
	EventName::Close,
	EventName::Console,
	EventName::Dialog,
	EventName::Page,
	EventName::Request,
	EventName::RequestFailed,
	EventName::RequestFinished,
	EventName::Response,
	EventName::ServiceWorker,
];

/// An isolated browser session with its own cookies, cache and storage.
///
/// See <https://playwright.dev/docs/api/class-browsercontext>
#[derive(Clone)]
pub struct BrowserContext {
	base: ChannelOwnerImpl,
	state: Arc<ContextState>,
}

struct ContextState {
	pages: Mutex<Vec<Page>>,
	timeouts: TimeoutSettings,
	close_was_called: AtomicBool,
	is_closed: AtomicBool,
	routes: RouteRegistry<Route>,
	web_socket_routes: RouteRegistry<WebSocketRoute>,
	bindings: Mutex<HashMap<String, BindingFn>>,
}

impl BrowserContext {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		let state = ContextState {
			pages: Mutex::new(Vec::new()),
			timeouts: TimeoutSettings::new(parent.connection().config()),
			close_was_called: AtomicBool::new(false),
			is_closed: AtomicBool::new(false),
			routes: RouteRegistry::new(),
			web_socket_routes: RouteRegistry::new(),
			bindings: Mutex::new(HashMap::new()),
		};
		let browser = parent.downcast_ref::<Browser>().cloned();
		let context = Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(CONTEXT_EVENTS),
			state: Arc::new(state),
		};
		if let Some(browser) = browser {
			browser.add_context(&context);
		}
		context
	}

	/// The browser this context belongs to. `None` for persistent contexts.
	pub fn browser(&self) -> Option<Browser> {
		self.base.parent()?.downcast_ref::<Browser>().cloned()
	}

	/// Open pages of this context, oldest first.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-pages>
	pub fn pages(&self) -> Vec<Page> {
		self.state.pages.lock().clone()
	}

	pub(crate) fn add_page(&self, page: &Page) {
		let mut pages = self.state.pages.lock();
		if !pages.iter().any(|p| p.guid() == page.guid()) {
			pages.push(page.clone());
		}
	}

	pub(crate) fn remove_page(&self, guid: &str) {
		self.state.pages.lock().retain(|page| page.guid() != guid);
	}

	/// Opens a new page in this context.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-new-page>
	pub async fn new_page(&self) -> Result<Page> {
		let reply = self.base.channel().send_raw("newPage", json!({})).await?;
		reply_object(&self.base, &reply, "page", "Page").await
	}

	/// Opens a devtools-protocol session attached to `page`.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-new-cdp-session>
	pub async fn new_cdp_session(&self, page: &Page) -> Result<CdpSession> {
		let reply = self
			.base
			.channel()
			.send_raw("newCDPSession", json!({ "page": { "guid": page.guid() } }))
			.await?;
		reply_object(&self.base, &reply, "session", "CDPSession").await
	}

	pub fn timeout_settings(&self) -> &TimeoutSettings {
		&self.state.timeouts
	}

	/// Default timeout for actions and waits in every page of this context.
	pub fn set_default_timeout(&self, timeout: Duration) -> Result<()> {
		self.state.timeouts.set_default_timeout(Some(timeout));
		self.base
			.channel()
			.send_no_reply("setDefaultTimeoutNoReply", json!({ "timeout": timeout.as_millis() as u64 }))
	}

	pub fn set_default_navigation_timeout(&self, timeout: Duration) -> Result<()> {
		self.state.timeouts.set_default_navigation_timeout(Some(timeout));
		self.base
			.channel()
			.send_no_reply("setDefaultNavigationTimeoutNoReply", json!({ "timeout": timeout.as_millis() as u64 }))
	}

	pub fn is_closed(&self) -> bool {
		self.state.is_closed.load(Ordering::SeqCst)
	}

	/// Closes the context and all of its pages.
	///
	/// Only the first call talks to the driver; later calls return at once.
	/// Running route handlers are not waited for.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-close>
	pub async fn close(&self) -> Result<()> {
		if self.state.close_was_called.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		match self.base.channel().send_no_result("close", json!({})).await {
			Ok(()) => {}
			Err(err) if err.is_target_closed() => {}
			Err(err) => return Err(err),
		}
		self.on_close();
		Ok(())
	}

	/// Exposes `binding` as `window[name]` in every page of this context.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-expose-binding>
	pub async fn expose_binding<F, Fut>(&self, name: &str, needs_handle: bool, binding: F) -> Result<()>
	where
		F: Fn(BindingSource, Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		if self.pages().iter().any(|page| page.binding(name).is_some()) {
			return Err(Error::InvalidArgument(format!("Function \"{name}\" has been already registered in one of the pages")));
		}
		{
			let mut bindings = self.state.bindings.lock();
			if bindings.contains_key(name) {
				return Err(Error::InvalidArgument(format!("Function \"{name}\" has been already registered")));
			}
			bindings.insert(name.to_string(), binding_fn(binding));
		}

		let params = json!({ "name": name, "needsHandle": needs_handle });
		let result = self.base.channel().send_no_result("exposeBinding", params).await;
		if result.is_err() {
			self.state.bindings.lock().remove(name);
		}
		result
	}

	/// Exposes `function` as `window[name]` in every page; it sees only the call arguments.
	pub async fn expose_function<F, Fut>(&self, name: &str, function: F) -> Result<()>
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self.expose_binding(name, false, move |_: BindingSource, args: Vec<Value>| function(args)).await
	}

	pub(crate) fn binding(&self, name: &str) -> Option<BindingFn> {
		self.state.bindings.lock().get(name).cloned()
	}

	fn on_binding_call(&self, params: &Value) {
		let Some(call) = event_object::<BindingCall>(&self.base, params, "binding") else {
			tracing::warn!(target: "pwire", context = self.guid(), "bindingCall event for unknown BindingCall");
			return;
		};
		match self.binding(call.name()) {
			Some(binding) => {
				tokio::spawn(async move { call.call(binding).await });
			}
			None => tracing::debug!(target: "pwire", context = self.guid(), binding = call.name(), "No binding registered"),
		}
	}

	/// Registers a route handler for every page of this context.
	///
	/// Page handlers run first; the context sees requests they fell back on.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-route>
	pub async fn route<F, Fut>(&self, matcher: UrlMatcher, handler: F) -> Result<HandlerId>
	where
		F: Fn(Route) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.route_with_options(matcher, RouteOptions::default(), handler).await
	}

	pub async fn route_with_options<F, Fut>(&self, matcher: UrlMatcher, options: RouteOptions, handler: F) -> Result<HandlerId>
	where
		F: Fn(Route) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let id = self.state.routes.add(matcher, handler_fn(handler), options);
		self.update_interception_patterns().await?;
		Ok(id)
	}

	/// Removes route handlers registered for `matcher` (only `handler` when given).
	pub async fn unroute(&self, matcher: &UrlMatcher, handler: Option<HandlerId>) -> Result<()> {
		let removed = self.state.routes.remove(matcher, handler);
		self.update_interception_patterns().await?;
		routing::stop(removed, UnrouteBehavior::Default).await
	}

	/// Removes every route handler, then applies `behavior` to running invocations.
	///
	/// See <https://playwright.dev/docs/api/class-browsercontext#browser-context-unroute-all>
	pub async fn unroute_all(&self, behavior: UnrouteBehavior) -> Result<()> {
		let removed = self.state.routes.take_all();
		self.update_interception_patterns().await?;
		routing::stop(removed, behavior).await
	}

	/// Registers a websocket route handler for every page of this context.
	pub async fn route_web_socket<F, Fut>(&self, matcher: UrlMatcher, handler: F) -> Result<HandlerId>
	where
		F: Fn(WebSocketRoute) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let id = self
			.state
			.web_socket_routes
			.add(matcher, web_socket_route_handler(handler), RouteOptions::default());
		self.send_patterns("setWebSocketInterceptionPatterns", &self.state.web_socket_routes)
			.await?;
		Ok(id)
	}

	/// Waits for `event` on this context while `trigger` runs.
	pub async fn expect_event<F, T>(
		&self,
		event: EventName,
		predicate: Option<Predicate>,
		timeout: Option<Duration>,
		trigger: F,
	) -> Result<EventPayload>
	where
		F: Future<Output = Result<T>>,
	{
		let timeout = self.state.timeouts.timeout(timeout);
		pwire_runtime::expect_event(self, event, predicate, timeout, trigger).await
	}

	/// Waits for a page opened while `trigger` runs.
	pub async fn expect_page<F, T>(&self, timeout: Option<Duration>, trigger: F) -> Result<Page>
	where
		F: Future<Output = Result<T>>,
	{
		let payload = self.expect_event(EventName::Page, None, timeout, trigger).await?;
		payload
			.object_as::<Page>()
			.cloned()
			.ok_or_else(|| Error::ProtocolError("page event without a page".to_string()))
	}

	/// Offers a route no page handler resolved to the context handlers.
	pub(crate) async fn on_route(&self, route: Route) {
		let dispatch = self.state.routes.handle(route.clone()).await;
		if dispatch.expired {
			if let Err(err) = self.update_interception_patterns().await {
				tracing::warn!(target: "pwire", context = self.guid(), error = %err, "Failed to refresh interception patterns");
			}
		}
		if dispatch.handled {
			return;
		}
		if let Err(err) = route.continue_default().await {
			tracing::debug!(target: "pwire", url = %Routable::url(&route), error = %err, "Default continue failed");
		}
	}

	pub(crate) async fn on_web_socket_route(&self, route: WebSocketRoute) {
		if !self.state.web_socket_routes.handle(route.clone()).await.handled {
			route.connect_default();
		}
	}

	async fn update_interception_patterns(&self) -> Result<()> {
		self.send_patterns("setNetworkInterceptionPatterns", &self.state.routes).await
	}

	async fn send_patterns<R: Routable>(&self, method: &str, registry: &RouteRegistry<R>) -> Result<()> {
		if self.is_closed() {
			return Ok(());
		}
		let patterns = registry.patterns();
		match self.base.channel().send_no_result(method, json!({ "patterns": patterns })).await {
			Err(err) if err.is_target_closed() => Ok(()),
			result => result,
		}
	}

	fn on_close(&self) {
		if self.state.is_closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.state.routes.close();
		self.state.web_socket_routes.close();
		if let Some(browser) = self.browser() {
			browser.remove_context(self.guid());
		}
		tracing::debug!(target: "pwire", context = self.guid(), "Context closed");

		let mut payload = EventPayload::new(EventName::Close, json!({}));
		if let Some(this) = registered(&self.base) {
			payload = payload.with_object(this);
		}
		self.base.emit(payload);
	}

	fn on_page(&self, params: Value) {
		let Some(object) = event_owner(&self.base, &params, "page") else {
			tracing::warn!(target: "pwire", context = self.guid(), "page event for unknown Page");
			return;
		};
		let page = object.downcast_ref::<Page>().cloned();
		if let Some(page) = &page {
			self.add_page(page);
		}
		self.base.emit(EventPayload::new(EventName::Page, params).with_object(Arc::clone(&object)));

		let opener = page.as_ref().and_then(Page::opener);
		if let Some(opener) = opener.filter(|opener| !opener.is_closed()) {
			opener.emit_from_context(EventPayload::new(EventName::Popup, json!({})).with_object(object));
		}
	}

	/// Emits a network or console event on the context and on its page.
	fn emit_on_both(&self, event: EventName, params: Value, key: Option<&str>) {
		let page = event_object::<Page>(&self.base, &params, "page");
		let mut payload = EventPayload::new(event, params);
		if let Some(object) = key.and_then(|key| event_owner(&self.base, &payload.params, key)) {
			payload = payload.with_object(object);
		}
		self.base.emit(payload.clone());
		if let Some(page) = page {
			page.emit_from_context(payload);
		}
	}

	fn on_dialog(&self, params: Value) {
		let Some(dialog) = event_object::<Dialog>(&self.base, &params, "dialog") else {
			tracing::warn!(target: "pwire", context = self.guid(), "dialog event for unknown Dialog");
			return;
		};
		let mut payload = EventPayload::new(EventName::Dialog, params);
		if let Some(object) = registered(dialog.base()) {
			payload = payload.with_object(object);
		}
		let mut delivered = self.base.emit(payload.clone());
		if let Some(page) = dialog.page() {
			delivered += page.base().emit(payload);
		}
		if delivered > 0 {
			return;
		}
		// Nobody listens: a pending dialog would block the page forever.
		tokio::spawn(async move {
			let result = match dialog.kind() {
				"beforeunload" => dialog.accept(None).await,
				_ => dialog.dismiss().await,
			};
			if let Err(err) = result {
				tracing::debug!(target: "pwire", error = %err, "Failed to auto-resolve dialog");
			}
		});
	}

	fn dispatch_event(&self, method: &str, params: Value) {
		match method {
			"close" => self.on_close(),
			"page" => self.on_page(params),
			"bindingCall" => self.on_binding_call(&params),
			"route" => {
				let Some(route) = event_object::<Route>(&self.base, &params, "route") else {
					tracing::warn!(target: "pwire", context = self.guid(), "route event for unknown Route");
					return;
				};
				let context = self.clone();
				tokio::spawn(async move { context.on_route(route).await });
			}
			"webSocketRoute" => {
				let Some(route) = event_object::<WebSocketRoute>(&self.base, &params, "webSocketRoute") else {
					tracing::warn!(target: "pwire", context = self.guid(), "webSocketRoute event for unknown WebSocketRoute");
					return;
				};
				let context = self.clone();
				tokio::spawn(async move { context.on_web_socket_route(route).await });
			}
			"console" => self.emit_on_both(EventName::Console, params, None),
			"dialog" => self.on_dialog(params),
			"request" => self.emit_on_both(EventName::Request, params, Some("request")),
			"response" => self.emit_on_both(EventName::Response, params, Some("response")),
			"requestFinished" => self.emit_on_both(EventName::RequestFinished, params, Some("request")),
			"requestFailed" => self.emit_on_both(EventName::RequestFailed, params, Some("request")),
			"serviceWorker" => self.emit_with_object(EventName::ServiceWorker, params, "worker"),
			"backgroundPage" => self.emit_with_object(EventName::BackgroundPage, params, "page"),
			_ => self.base.emit_raw(method, params),
		}
	}

	fn emit_with_object(&self, event: EventName, params: Value, key: &str) {
		let object = event_owner(&self.base, &params, key);
		let mut payload = EventPayload::new(event, params);
		if let Some(object) = object {
			payload = payload.with_object(object);
		}
		self.base.emit(payload);
	}
}

impl private::Sealed for BrowserContext {}

impl ChannelOwner for BrowserContext {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		self.dispatch_event(method, params);
	}

	fn on_dispose(&self, _reason: DisposeReason) {
		self.on_close();
	}
}

impl std::fmt::Debug for BrowserContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BrowserContext")
			.field("guid", &self.guid())
			.field("closed", &self.is_closed())
			.finish()
	}
}
