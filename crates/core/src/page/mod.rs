//! [`Page`] protocol object representing a browser tab.

mod bindings;
mod eval;
mod locator_handlers;
mod page_events;
mod routing;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use pwire_protocol::guid_ref;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, DisposeReason, Error, EventName, ParentOrConnection, Predicate, Result};
use serde_json::{Value, json};
use tokio::sync::watch;

pub use self::locator_handlers::LocatorHandlerMeta;
pub use self::page_events::{ConsoleLocation, ConsoleMessage, ConsoleMessageKind};
use crate::binding_call::BindingFn;
use crate::handlers::HandlerMap;
use crate::routing::RouteRegistry;
use crate::timeout_settings::TimeoutSettings;
use crate::{BrowserContext, ClickOptions, Frame, GotoOptions, Locator, Response, Route, WebSocketRoute};

const PAGE_EVENTS: &[EventName] = &[
	EventName::Close,
	EventName::Console,
	EventName::Crash,
	EventName::Dialog,
	EventName::DomContentLoaded,
	EventName::Download,
	EventName::FileChooser,
	EventName::FrameAttached,
	EventName::FrameDetached,
	EventName::FrameNavigated,
	EventName::Load,
	EventName::PageError,
	EventName::Popup,
	EventName::Request,
	EventName::RequestFailed,
	EventName::RequestFinished,
	EventName::Response,
	EventName::WebSocket,
	EventName::Worker,
];

/// A browser tab or window within a [`BrowserContext`].
///
/// See <https://playwright.dev/docs/api/class-page>
#[derive(Clone)]
pub struct Page {
	base: ChannelOwnerImpl,
	state: Arc<PageState>,
}

struct PageState {
	main_frame: Arc<str>,
	context: Option<Arc<str>>,
	opener: Option<String>,
	/// Set when the page was created by `Browser::new_page`; closing the page closes it.
	owned_context: RwLock<Option<BrowserContext>>,
	is_closed: AtomicBool,
	closed: watch::Sender<bool>,
	timeouts: TimeoutSettings,
	routes: RouteRegistry<Route>,
	web_socket_routes: RouteRegistry<WebSocketRoute>,
	/// Keyed by the driver-assigned uid.
	locator_handlers: HandlerMap<Locator, LocatorHandlerMeta>,
	bindings: Mutex<HashMap<String, BindingFn>>,
}

impl Page {
	/// Creates a new Page from protocol initialization and links its main frame.
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let main_frame: Arc<str> = Arc::from(
			guid_ref(&initializer, "mainFrame")
				.ok_or_else(|| Error::ProtocolError("Page initializer missing 'mainFrame.guid' field".to_string()))?,
		);
		match parent.connection().try_get_object(&main_frame) {
			Some(frame) => match frame.downcast_ref::<Frame>() {
				Some(frame) => frame.set_page(Arc::clone(&guid)),
				None => tracing::warn!(target: "pwire", page = %guid, frame = %main_frame, "Main frame is not a Frame"),
			},
			None => tracing::warn!(target: "pwire", page = %guid, frame = %main_frame, "Main frame not registered"),
		}

		let context = parent.downcast_ref::<BrowserContext>().cloned();
		let timeouts = match &context {
			Some(context) => TimeoutSettings::with_parent(context.timeout_settings()),
			None => TimeoutSettings::new(parent.connection().config()),
		};
		let (closed, _) = watch::channel(false);
		let state = PageState {
			main_frame,
			context: context.as_ref().map(|c| Arc::from(c.guid())),
			opener: guid_ref(&initializer, "opener").map(str::to_string),
			owned_context: RwLock::new(None),
			is_closed: AtomicBool::new(initializer["isClosed"].as_bool().unwrap_or(false)),
			closed,
			timeouts,
			routes: RouteRegistry::new(),
			web_socket_routes: RouteRegistry::new(),
			locator_handlers: Arc::new(Mutex::new(IndexMap::new())),
			bindings: Mutex::new(HashMap::new()),
		};

		let page = Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(PAGE_EVENTS),
			state: Arc::new(state),
		};
		if let Some(context) = &context {
			context.add_page(&page);
		}
		Ok(page)
	}

	/// The page's main frame.
	pub fn main_frame(&self) -> Result<Frame> {
		self.base
			.resolve::<Frame>(&self.state.main_frame, "Frame")
			.map_err(|_| Error::target_closed("Page", "The main frame is gone."))
	}

	/// The main frame's current URL.
	pub fn url(&self) -> String {
		self.main_frame().map(|frame| frame.url()).unwrap_or_else(|_| "about:blank".to_string())
	}

	pub fn context(&self) -> Option<BrowserContext> {
		let guid = self.state.context.as_deref()?;
		self.base.resolve::<BrowserContext>(guid, "BrowserContext").ok()
	}

	/// The page that opened this one as a popup.
	pub fn opener(&self) -> Option<Page> {
		let guid = self.state.opener.as_deref()?;
		self.base.resolve::<Page>(guid, "Page").ok()
	}

	pub fn is_closed(&self) -> bool {
		self.state.is_closed.load(Ordering::SeqCst)
	}

	/// Resolves once the page has closed.
	pub(crate) fn closed_signal(&self) -> BoxFuture<'static, ()> {
		let mut rx = self.state.closed.subscribe();
		async move {
			let _ = rx.wait_for(|closed| *closed).await;
		}
		.boxed()
	}

	pub(crate) fn set_owned_context(&self, context: BrowserContext) {
		*self.state.owned_context.write() = Some(context);
	}

	pub fn timeout_settings(&self) -> &TimeoutSettings {
		&self.state.timeouts
	}

	/// Default timeout for actions and waits on this page.
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

	/// Closes the page.
	///
	/// Never waits for route handlers that are still running; they observe the
	/// closed page on their next call.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-close>
	pub async fn close(&self) -> Result<()> {
		let owned = self.state.owned_context.read().clone();
		let result = match owned {
			Some(context) => context.close().await,
			None => self.base.channel().send_no_result("close", json!({})).await,
		};
		match result {
			Ok(()) => {
				self.on_close();
				Ok(())
			}
			Err(err) if err.is_target_closed() => {
				self.on_close();
				Ok(())
			}
			Err(err) => Err(err),
		}
	}

	/// Navigates the main frame.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-goto>
	pub async fn goto(&self, url: &str, options: GotoOptions) -> Result<Option<Response>> {
		self.main_frame()?.goto(url, options).await
	}

	/// Clicks the element matching `selector` in the main frame.
	pub async fn click(&self, selector: &str, options: ClickOptions) -> Result<()> {
		self.main_frame()?.click(selector, options).await
	}

	pub async fn title(&self) -> Result<String> {
		self.main_frame()?.title().await
	}

	/// Creates a locator for `selector` in the main frame.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-locator>
	pub fn locator(&self, selector: &str) -> Locator {
		Locator::new(self.clone(), selector.to_string())
	}

	/// Waits for `event` while `trigger` runs.
	///
	/// Fails if the page closes first or `timeout` (default: the page's
	/// timeout) passes.
	pub async fn expect_event<F, T>(
		&self,
		event: EventName,
		predicate: Option<Predicate>,
		timeout: Option<Duration>,
		trigger: F,
	) -> Result<pwire_runtime::EventPayload>
	where
		F: std::future::Future<Output = Result<T>>,
	{
		let timeout = self.state.timeouts.timeout(timeout);
		pwire_runtime::expect_event(self, event, predicate, timeout, trigger).await
	}

	/// Waits for a popup opened while `trigger` runs.
	pub async fn expect_popup<F, T>(&self, timeout: Option<Duration>, trigger: F) -> Result<Page>
	where
		F: std::future::Future<Output = Result<T>>,
	{
		let payload = self.expect_event(EventName::Popup, None, timeout, trigger).await?;
		payload
			.object_as::<Page>()
			.cloned()
			.ok_or_else(|| Error::ProtocolError("popup event without a page".to_string()))
	}
}

impl private::Sealed for Page {}

impl ChannelOwner for Page {
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

impl std::fmt::Debug for Page {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Page").field("guid", &self.guid()).field("url", &self.url()).finish()
	}
}
