//! [`WebSocketRoute`]: an intercepted websocket, seen from both ends.
//!
//! Without handlers, frames and closes pass straight through once the route
//! is connected to the server. Installing a handler on either side stops the
//! forwarding for that direction.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use pwire_protocol::WebSocketMessage;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ParentOrConnection, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::handlers::{HandlerFn, handler_fn};
use crate::routing::Routable;

/// Callback for frames arriving at one side of the route.
pub type MessageHandler = Arc<dyn Fn(WebSocketMessage) + Send + Sync>;

/// Callback for a close initiated by one side: `(code, reason)`.
pub type CloseHandler = Arc<dyn Fn(Option<u16>, Option<String>) + Send + Sync>;

#[derive(Default)]
struct SideHandlers {
	on_message: RwLock<Option<MessageHandler>>,
	on_close: RwLock<Option<CloseHandler>>,
}

/// A websocket intercepted by `route_web_socket`.
///
/// See <https://playwright.dev/docs/api/class-websocketroute>
#[derive(Clone)]
pub struct WebSocketRoute {
	base: ChannelOwnerImpl,
	state: Arc<RouteState>,
}

struct RouteState {
	url: String,
	connected: AtomicBool,
	page: SideHandlers,
	server: SideHandlers,
	handling: Mutex<Option<oneshot::Sender<bool>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseParams {
	code: Option<u16>,
	reason: Option<String>,
}

impl WebSocketRoute {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		let state = RouteState {
			url: initializer["url"].as_str().unwrap_or_default().to_string(),
			connected: AtomicBool::new(false),
			page: SideHandlers::default(),
			server: SideHandlers::default(),
			handling: Mutex::new(None),
		};
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			state: Arc::new(state),
		}
	}

	pub fn url(&self) -> &str {
		&self.state.url
	}

	pub fn is_connected(&self) -> bool {
		self.state.connected.load(Ordering::SeqCst)
	}

	/// Connects the route to the real server and returns the server side.
	///
	/// # Errors
	///
	/// Fails when the route is already connected.
	pub fn connect_to_server(&self) -> Result<WebSocketRouteServer> {
		if self.state.connected.swap(true, Ordering::SeqCst) {
			return Err(Error::InvalidArgument("Already connected to the server".to_string()));
		}
		self.base.channel().send_no_reply("connect", json!({}))?;
		Ok(self.server())
	}

	/// Handle for the server side. Frames sent through it only arrive once connected.
	pub fn server(&self) -> WebSocketRouteServer {
		WebSocketRouteServer { route: self.clone() }
	}

	/// Sends a frame to the page.
	pub fn send(&self, message: WebSocketMessage) -> Result<()> {
		self.base.channel().send_no_reply("sendToPage", message)
	}

	/// Closes the page side of the socket.
	pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
		self.base.channel().send_no_reply("closePage", close_params(code, reason))
	}

	/// Handles frames sent by the page instead of forwarding them to the server.
	pub fn on_message<F>(&self, handler: F)
	where
		F: Fn(WebSocketMessage) + Send + Sync + 'static,
	{
		*self.state.page.on_message.write() = Some(Arc::new(handler));
	}

	/// Handles a close initiated by the page instead of closing the server side.
	pub fn on_close<F>(&self, handler: F)
	where
		F: Fn(Option<u16>, Option<String>) + Send + Sync + 'static,
	{
		*self.state.page.on_close.write() = Some(Arc::new(handler));
	}

	/// Falls back to the real server when no handler took the route.
	pub(crate) fn connect_default(&self) {
		if let Err(err) = self.connect_to_server() {
			tracing::debug!(target: "pwire", url = %self.state.url, error = %err, "Default websocket connect failed");
		}
	}

	/// Opens the page side when the handler neither connected nor closed it.
	async fn ensure_opened(&self) -> Result<()> {
		if self.is_connected() {
			return Ok(());
		}
		match self.base.channel().send_no_result("ensureOpened", json!({})).await {
			Err(err) if err.is_target_closed() => Ok(()),
			result => result,
		}
	}

	fn message_from_page(&self, params: Value) {
		let handler = self.state.page.on_message.read().clone();
		match handler {
			Some(handler) => match serde_json::from_value::<WebSocketMessage>(params) {
				Ok(message) => handler(message),
				Err(err) => tracing::warn!(target: "pwire", route = self.guid(), error = %err, "Malformed messageFromPage"),
			},
			None if self.is_connected() => self.forward("sendToServer", params),
			None => {}
		}
	}

	fn message_from_server(&self, params: Value) {
		let handler = self.state.server.on_message.read().clone();
		match handler {
			Some(handler) => match serde_json::from_value::<WebSocketMessage>(params) {
				Ok(message) => handler(message),
				Err(err) => tracing::warn!(target: "pwire", route = self.guid(), error = %err, "Malformed messageFromServer"),
			},
			None => self.forward("sendToPage", params),
		}
	}

	fn close_from(&self, side: &SideHandlers, forward_to: &str, params: Value) {
		let handler = side.on_close.read().clone();
		match handler {
			Some(handler) => {
				let close: CloseParams = serde_json::from_value(params).unwrap_or_default();
				handler(close.code, close.reason);
			}
			None => self.forward(forward_to, params),
		}
	}

	fn forward(&self, method: &str, params: Value) {
		if let Err(err) = self.base.channel().send_no_reply(method, params) {
			tracing::debug!(target: "pwire", route = self.guid(), method, error = %err, "Websocket forward failed");
		}
	}
}

impl Routable for WebSocketRoute {
	fn url(&self) -> String {
		self.state.url.clone()
	}

	fn start_handling(&self) -> oneshot::Receiver<bool> {
		let (tx, rx) = oneshot::channel();
		*self.state.handling.lock() = Some(tx);
		rx
	}

	fn report_handled(&self, handled: bool) {
		if let Some(tx) = self.state.handling.lock().take() {
			let _ = tx.send(handled);
		}
	}

	fn closed(&self) -> BoxFuture<'static, ()> {
		let base = self.base.clone();
		async move {
			base.wait_for_dispose().await;
		}
		.boxed()
	}
}

fn close_params(code: Option<u16>, reason: Option<&str>) -> Value {
	let mut params = json!({ "wasClean": true });
	if let Some(code) = code {
		params["code"] = json!(code);
	}
	if let Some(reason) = reason {
		params["reason"] = json!(reason);
	}
	params
}

/// Wraps a user handler: the first matching handler always takes the route.
pub(crate) fn web_socket_route_handler<F, Fut>(handler: F) -> HandlerFn<WebSocketRoute>
where
	F: Fn(WebSocketRoute) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	let handler = Arc::new(handler);
	handler_fn(move |route: WebSocketRoute| {
		let handler = Arc::clone(&handler);
		async move {
			handler(route.clone()).await?;
			route.ensure_opened().await?;
			route.report_handled(true);
			Ok(())
		}
	})
}

impl private::Sealed for WebSocketRoute {}

impl ChannelOwner for WebSocketRoute {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		match method {
			"messageFromPage" => self.message_from_page(params),
			"messageFromServer" => self.message_from_server(params),
			"closePage" => self.close_from(&self.state.page, "closeServer", params),
			"closeServer" => self.close_from(&self.state.server, "closePage", params),
			_ => self.base.emit_raw(method, params),
		}
	}
}

impl std::fmt::Debug for WebSocketRoute {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WebSocketRoute")
			.field("guid", &self.guid())
			.field("url", &self.state.url)
			.field("connected", &self.is_connected())
			.finish()
	}
}

/// The server side of a [`WebSocketRoute`].
#[derive(Clone, Debug)]
pub struct WebSocketRouteServer {
	route: WebSocketRoute,
}

impl WebSocketRouteServer {
	pub fn url(&self) -> &str {
		self.route.url()
	}

	/// Sends a frame to the server.
	pub fn send(&self, message: WebSocketMessage) -> Result<()> {
		self.route.base.channel().send_no_reply("sendToServer", message)
	}

	/// Closes the server side of the socket.
	pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
		self.route.base.channel().send_no_reply("closeServer", close_params(code, reason))
	}

	/// Handles frames from the server instead of forwarding them to the page.
	pub fn on_message<F>(&self, handler: F)
	where
		F: Fn(WebSocketMessage) + Send + Sync + 'static,
	{
		*self.route.state.server.on_message.write() = Some(Arc::new(handler));
	}

	/// Handles a close initiated by the server instead of closing the page side.
	pub fn on_close<F>(&self, handler: F)
	where
		F: Fn(Option<u16>, Option<String>) + Send + Sync + 'static,
	{
		*self.route.state.server.on_close.write() = Some(Arc::new(handler));
	}
}
