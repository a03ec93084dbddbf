//! pwire: typed proxies and handler dispatch over the Playwright driver protocol.
//!
//! The driver owns every browser-side object; this crate mirrors each one as a
//! proxy that forwards calls and turns driver events into listener calls,
//! route handler runs and locator handler runs.
//!
//! # Example
//!
//! ```ignore
//! use pwire::{GotoOptions, Playwright, RuntimeConfig, UrlMatcher};
//!
//! #[tokio::main]
//! async fn main() -> pwire::Result<()> {
//!     let playwright = Playwright::launch(RuntimeConfig::from_env()).await?;
//!     let browser = playwright.chromium().launch().await?;
//!     let page = browser.new_page().await?;
//!
//!     page.route(UrlMatcher::glob("**/*.png")?, |route| async move { route.abort(None).await }).await?;
//!     page.goto("https://example.com", GotoOptions::default()).await?;
//!
//!     browser.close().await?;
//!     playwright.shutdown().await
//! }
//! ```
//!
//! # Handlers
//!
//! - **Route handlers** ([`Page::route`], [`BrowserContext::route`]) see paused
//!   requests newest first and may fall back to older handlers, then to the
//!   context, then to the network.
//! - **Locator handlers** ([`Page::add_locator_handler`]) run when the driver
//!   finds an overlay blocking an action.
//! - **Bindings** ([`Page::expose_binding`], [`BrowserContext::expose_function`])
//!   answer calls from page JavaScript on their own task.
//! - **Event waits** ([`Page::expect_event`]) resolve on the first matching event
//!   while a trigger runs, and fail when the page closes or time runs out.

pub mod handlers;
pub mod object_factory;
pub mod routing;
pub mod serialization;
pub mod timeout_settings;
pub mod url_matcher;

mod binding_call;
mod browser;
mod browser_context;
mod browser_type;
mod cdp_session;
mod dialog;
mod frame;
mod generic;
mod js_handle;
mod locator;
mod network;
mod page;
mod playwright;
mod route;
mod websocket;
mod websocket_route;
mod worker;

pub use binding_call::{BindingCall, BindingFn, BindingFuture, BindingSource};
pub use browser::Browser;
pub use browser_context::BrowserContext;
pub use browser_type::BrowserType;
pub use cdp_session::CdpSession;
pub use dialog::Dialog;
pub use frame::{ClickOptions, Frame, GotoOptions, WaitUntil};
pub use generic::GenericObject;
pub use handlers::HandlerId;
pub use js_handle::JsHandle;
pub use locator::Locator;
pub use network::{Request, Response};
pub use object_factory::{ObjectType, TypedObjectFactory};
pub use page::{ConsoleLocation, ConsoleMessage, ConsoleMessageKind, LocatorHandlerMeta, Page};
pub use playwright::Playwright;
pub use route::Route;
pub use timeout_settings::TimeoutSettings;
pub use url_matcher::UrlMatcher;
pub use websocket::WebSocket;
pub use websocket_route::{CloseHandler, MessageHandler, WebSocketRoute, WebSocketRouteServer};
pub use worker::Worker;

pub use pwire_protocol::{
	ContinueOverrides, FulfillOptions, HeaderEntry, LaunchOptions, LocatorHandlerOptions, RouteOptions, UnrouteBehavior, WebSocketMessage,
};
pub use pwire_runtime::{
	ChannelOwner, Connection, DisposeReason, Error, ErrorKind, EventName, EventPayload, ListenerId, Predicate, Result, RuntimeConfig,
	TransportParts,
};
