//! [`Frame`] proxy: navigation, input and evaluation happen here.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pwire_protocol::guid_ref;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, EventName, EventPayload, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::object_factory::{optional_reply_object, registered};
use crate::serialization::{parse_value, serialize_argument};
use crate::timeout_settings::TimeoutSettings;
use crate::{Page, Response};

const FRAME_EVENTS: &[EventName] = &[EventName::LoadState, EventName::Navigated];

/// A frame within a [`Page`]. Every page has a main frame.
///
/// See <https://playwright.dev/docs/api/class-frame>
#[derive(Clone)]
pub struct Frame {
	base: ChannelOwnerImpl,
	state: Arc<FrameState>,
}

struct FrameState {
	url: RwLock<String>,
	name: RwLock<String>,
	parent_frame: Option<String>,
	page: RwLock<Option<Arc<str>>>,
	load_states: Mutex<Vec<String>>,
}

impl Frame {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		let load_states = initializer["loadStates"]
			.as_array()
			.map(|states| states.iter().filter_map(Value::as_str).map(str::to_string).collect())
			.unwrap_or_default();
		let state = FrameState {
			url: RwLock::new(initializer["url"].as_str().unwrap_or("about:blank").to_string()),
			name: RwLock::new(initializer["name"].as_str().unwrap_or_default().to_string()),
			parent_frame: guid_ref(&initializer, "parentFrame").map(str::to_string),
			page: RwLock::new(None),
			load_states: Mutex::new(load_states),
		};
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer).with_events(FRAME_EVENTS),
			state: Arc::new(state),
		}
	}

	pub fn url(&self) -> String {
		self.state.url.read().clone()
	}

	pub fn name(&self) -> String {
		self.state.name.read().clone()
	}

	pub fn parent_frame(&self) -> Option<Frame> {
		let guid = self.state.parent_frame.as_deref()?;
		self.base.resolve::<Frame>(guid, "Frame").ok()
	}

	pub fn is_main_frame(&self) -> bool {
		self.state.parent_frame.is_none()
	}

	/// Load states reached so far (`"load"`, `"domcontentloaded"`, ...).
	pub fn load_states(&self) -> Vec<String> {
		self.state.load_states.lock().clone()
	}

	/// The page this frame belongs to, once known.
	pub fn page(&self) -> Option<Page> {
		let guid = self.state.page.read().clone()?;
		self.base.resolve::<Page>(&guid, "Page").ok()
	}

	pub(crate) fn set_page(&self, page: Arc<str>) {
		*self.state.page.write() = Some(page);
	}

	fn timeouts(&self) -> TimeoutSettings {
		match self.page() {
			Some(page) => page.timeout_settings().clone(),
			None => TimeoutSettings::new(self.base.connection().config()),
		}
	}

	/// Navigates to `url`. Returns `None` for navigations without a response
	/// (`about:blank`, same-document navigations).
	pub async fn goto(&self, url: &str, options: GotoOptions) -> Result<Option<Response>> {
		let timeout = self.timeouts().navigation_timeout(options.timeout);
		let mut params = json!({ "url": url, "timeout": timeout.as_millis() as u64 });
		if let Some(wait_until) = options.wait_until {
			params["waitUntil"] = json!(wait_until.as_str());
		}
		let reply = self.base.channel().send_raw("goto", params).await?;
		optional_reply_object(&self.base, &reply, "response", "Response").await
	}

	/// Clicks the element matching `selector`.
	///
	/// The local deadline equals the action timeout, so a click blocked by a
	/// slow locator handler fails with a timeout even if the driver never answers.
	pub async fn click(&self, selector: &str, options: ClickOptions) -> Result<()> {
		let timeout = self.timeouts().timeout(options.timeout);
		let mut params = json!({
			"selector": selector,
			"strict": true,
			"timeout": timeout.as_millis() as u64,
		});
		if options.force {
			params["force"] = json!(true);
		}
		if options.no_wait_after {
			params["noWaitAfter"] = json!(true);
		}
		self.base.channel().send_with_timeout::<_, Value>("click", params, timeout).await.map(|_| ())
	}

	/// Evaluates `expression` (an expression or a function body) with `arg`
	/// and returns the result as JSON.
	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		let params = json!({
			"expression": expression,
			"arg": serialize_argument(arg.as_ref(), &[])?,
		});
		let reply = self.base.channel().send_raw("evaluateExpression", params).await?;
		parse_value(&reply["value"])
	}

	/// Evaluates and deserializes the result into `T`.
	pub async fn evaluate_typed<T: serde::de::DeserializeOwned>(&self, expression: &str, arg: Option<Value>) -> Result<T> {
		serde_json::from_value(self.evaluate(expression, arg).await?).map_err(Into::into)
	}

	pub async fn title(&self) -> Result<String> {
		let reply = self.base.channel().send_raw("title", json!({})).await?;
		Ok(reply["value"].as_str().unwrap_or_default().to_string())
	}

	fn on_navigated(&self, params: Value) {
		let failed = params.get("error").is_some();
		if !failed {
			if let Some(url) = params["url"].as_str() {
				*self.state.url.write() = url.to_string();
			}
			if let Some(name) = params["name"].as_str() {
				*self.state.name.write() = name.to_string();
			}
		}
		self.base.emit(EventPayload::new(EventName::Navigated, params.clone()));

		if failed {
			return;
		}
		if let (Some(page), Some(this)) = (self.page(), registered(&self.base)) {
			if !page.is_closed() {
				page.base().emit(EventPayload::new(EventName::FrameNavigated, params).with_object(this));
			}
		}
	}

	fn on_load_state(&self, params: Value) {
		if let Some(added) = params["add"].as_str() {
			self.state.load_states.lock().push(added.to_string());
			if self.is_main_frame() {
				let event = match added {
					"load" => Some(EventName::Load),
					"domcontentloaded" => Some(EventName::DomContentLoaded),
					_ => None,
				};
				if let (Some(event), Some(page)) = (event, self.page()) {
					page.base().emit(EventPayload::new(event, json!({})));
				}
			}
		}
		if let Some(removed) = params["remove"].as_str() {
			self.state.load_states.lock().retain(|state| state != removed);
		}
		self.base.emit(EventPayload::new(EventName::LoadState, params));
	}
}

impl private::Sealed for Frame {}

impl ChannelOwner for Frame {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		match method {
			"navigated" => self.on_navigated(params),
			"loadstate" => self.on_load_state(params),
			_ => self.base.emit_raw(method, params),
		}
	}
}

impl std::fmt::Debug for Frame {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Frame").field("guid", &self.guid()).field("url", &self.url()).finish()
	}
}

/// Options for [`Frame::goto`] and [`Page::goto`].
#[derive(Debug, Clone, Default)]
pub struct GotoOptions {
	pub timeout: Option<Duration>,
	pub wait_until: Option<WaitUntil>,
}

impl GotoOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn wait_until(mut self, wait_until: WaitUntil) -> Self {
		self.wait_until = Some(wait_until);
		self
	}
}

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
	Load,
	DomContentLoaded,
	NetworkIdle,
	Commit,
}

impl WaitUntil {
	pub(crate) fn as_str(&self) -> &'static str {
		match self {
			Self::Load => "load",
			Self::DomContentLoaded => "domcontentloaded",
			Self::NetworkIdle => "networkidle",
			Self::Commit => "commit",
		}
	}
}

/// Options for [`Frame::click`].
#[derive(Debug, Clone, Default)]
pub struct ClickOptions {
	pub timeout: Option<Duration>,
	/// Skip actionability checks.
	pub force: bool,
	pub no_wait_after: bool,
}

impl ClickOptions {
	pub fn timeout(timeout: Duration) -> Self {
		Self {
			timeout: Some(timeout),
			..Default::default()
		}
	}
}
