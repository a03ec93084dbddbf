//! Route and websocket-route registration for [`Page`].

use std::future::Future;

use pwire_protocol::{RouteOptions, UnrouteBehavior};
use pwire_runtime::{ChannelOwner, Result};
use serde_json::json;

use super::Page;
use crate::handlers::{HandlerId, handler_fn};
use crate::routing::{self, RouteRegistry, Routable};
use crate::url_matcher::UrlMatcher;
use crate::websocket_route::web_socket_route_handler;
use crate::{Route, WebSocketRoute};

impl Page {
	/// Registers a route handler for requests matching `matcher`.
	///
	/// The newest registration runs first; a handler that calls
	/// [`Route::fallback`] passes the request to the next one, and requests no
	/// page handler resolves go on to the context's handlers.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-route>
	///
	/// # Example
	///
	/// ```ignore
	/// let id = page.route(UrlMatcher::glob("**/*.png")?, |route: Route| async move {
	///     route.abort(None).await
	/// }).await?;
	/// ```
	pub async fn route<F, Fut>(&self, matcher: UrlMatcher, handler: F) -> Result<HandlerId>
	where
		F: Fn(Route) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		self.route_with_options(matcher, RouteOptions::default(), handler).await
	}

	/// Like [`route`](Self::route), limited to `options.times` invocations.
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
	///
	/// Invocations already running finish on their own; their route calls keep working.
	pub async fn unroute(&self, matcher: &UrlMatcher, handler: Option<HandlerId>) -> Result<()> {
		let removed = self.state.routes.remove(matcher, handler);
		self.update_interception_patterns().await?;
		routing::stop(removed, UnrouteBehavior::Default).await
	}

	/// Removes every route handler, then applies `behavior` to running invocations.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-unroute-all>
	pub async fn unroute_all(&self, behavior: UnrouteBehavior) -> Result<()> {
		let removed = self.state.routes.take_all();
		self.update_interception_patterns().await?;
		routing::stop(removed, behavior).await
	}

	/// Registers a handler for websockets opened by the page.
	///
	/// Only the newest matching handler runs. Unless the handler calls
	/// [`WebSocketRoute::connect_to_server`], the socket is answered by the handler alone.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-route-web-socket>
	pub async fn route_web_socket<F, Fut>(&self, matcher: UrlMatcher, handler: F) -> Result<HandlerId>
	where
		F: Fn(WebSocketRoute) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		let id = self
			.state
			.web_socket_routes
			.add(matcher, web_socket_route_handler(handler), RouteOptions::default());
		self.update_web_socket_interception_patterns().await?;
		Ok(id)
	}

	/// Number of registered route handlers.
	pub fn route_count(&self) -> usize {
		self.state.routes.len()
	}

	pub(super) async fn on_route(&self, route: Route) {
		let dispatch = self.state.routes.handle(route.clone()).await;
		if dispatch.expired {
			if let Err(err) = self.update_interception_patterns().await {
				tracing::warn!(target: "pwire", page = self.guid(), error = %err, "Failed to refresh interception patterns");
			}
		}
		if dispatch.handled {
			return;
		}
		match self.context() {
			Some(context) => context.on_route(route).await,
			None => {
				if let Err(err) = route.continue_default().await {
					tracing::debug!(target: "pwire", url = %Routable::url(&route), error = %err, "Default continue failed");
				}
			}
		}
	}

	pub(super) async fn on_web_socket_route(&self, route: WebSocketRoute) {
		let dispatch = self.state.web_socket_routes.handle(route.clone()).await;
		if dispatch.handled {
			return;
		}
		match self.context() {
			Some(context) => context.on_web_socket_route(route).await,
			None => route.connect_default(),
		}
	}

	async fn update_interception_patterns(&self) -> Result<()> {
		self.send_patterns("setNetworkInterceptionPatterns", &self.state.routes).await
	}

	async fn update_web_socket_interception_patterns(&self) -> Result<()> {
		self.send_patterns("setWebSocketInterceptionPatterns", &self.state.web_socket_routes)
			.await
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
}
