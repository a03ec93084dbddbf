//! [`Request`] and [`Response`] proxies.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use pwire_protocol::{ContinueOverrides, HeaderEntry, decode_binary, guid_ref};
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ParentOrConnection, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::object_factory::optional_reply_object;
use crate::{Frame, Page};

/// A network request issued by a page or worker.
///
/// See <https://playwright.dev/docs/api/class-request>
#[derive(Clone)]
pub struct Request {
	base: ChannelOwnerImpl,
	state: Arc<RequestState>,
}

struct RequestState {
	url: String,
	method: String,
	headers: Vec<HeaderEntry>,
	/// Base64 body as sent by the driver
	post_data: Option<String>,
	frame: Option<String>,
	redirected_from: Option<String>,
	is_navigation_request: bool,
	/// Accumulated by `Route::fallback` and `Route::continue_`
	fallback: Mutex<ContinueOverrides>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInit {
	url: String,
	method: String,
	#[serde(default)]
	headers: Vec<HeaderEntry>,
	post_data: Option<String>,
	#[serde(default)]
	is_navigation_request: bool,
}

impl Request {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let init: RequestInit =
			serde_json::from_value(initializer.clone()).map_err(|e| Error::ProtocolError(format!("Invalid Request initializer: {e}")))?;
		let state = RequestState {
			url: init.url,
			method: init.method,
			headers: init.headers,
			post_data: init.post_data,
			frame: guid_ref(&initializer, "frame").map(str::to_string),
			redirected_from: guid_ref(&initializer, "redirectedFrom").map(str::to_string),
			is_navigation_request: init.is_navigation_request,
			fallback: Mutex::new(ContinueOverrides::default()),
		};
		Ok(Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			state: Arc::new(state),
		})
	}

	/// The URL, as overridden by earlier fallbacks.
	pub fn url(&self) -> String {
		self.state.fallback.lock().url.clone().unwrap_or_else(|| self.state.url.clone())
	}

	pub fn method(&self) -> String {
		self.state.fallback.lock().method.clone().unwrap_or_else(|| self.state.method.clone())
	}

	pub fn headers(&self) -> Vec<HeaderEntry> {
		self.state.fallback.lock().headers.clone().unwrap_or_else(|| self.state.headers.clone())
	}

	/// Request body, decoded.
	pub fn post_data(&self) -> Result<Option<Vec<u8>>> {
		let encoded = self.state.fallback.lock().post_data.clone().or_else(|| self.state.post_data.clone());
		encoded
			.map(|data| decode_binary(&data).map_err(|e| Error::ProtocolError(format!("Invalid postData: {e}"))))
			.transpose()
	}

	pub fn is_navigation_request(&self) -> bool {
		self.state.is_navigation_request
	}

	pub fn frame(&self) -> Option<Frame> {
		let guid = self.state.frame.as_deref()?;
		self.base.resolve::<Frame>(guid, "Frame").ok()
	}

	pub fn redirected_from(&self) -> Option<Request> {
		let guid = self.state.redirected_from.as_deref()?;
		self.base.resolve::<Request>(guid, "Request").ok()
	}

	/// The page that issued the request, if it came from a frame.
	pub fn page(&self) -> Option<Page> {
		self.frame()?.page()
	}

	/// Waits for the response. `None` when the request failed.
	pub async fn response(&self) -> Result<Option<Response>> {
		let reply = self.base.channel().send_raw("response", serde_json::json!({})).await?;
		optional_reply_object(&self.base, &reply, "response", "Response").await
	}

	pub(crate) fn apply_fallback_overrides(&self, overrides: ContinueOverrides) {
		self.state.fallback.lock().merge(overrides);
	}

	pub(crate) fn fallback_overrides(&self) -> ContinueOverrides {
		self.state.fallback.lock().clone()
	}

	/// Resolves when nobody can act on this request any more: its page closed
	/// or the request object was disposed.
	pub(crate) fn target_closed(&self) -> BoxFuture<'static, ()> {
		let disposed = {
			let base = self.base.clone();
			async move {
				base.wait_for_dispose().await;
			}
			.boxed()
		};
		let page_closed = match self.frame() {
			Some(frame) => match frame.page() {
				Some(page) => page.closed_signal(),
				None => future::ready(()).boxed(),
			},
			None => future::pending().boxed(),
		};
		future::select(disposed, page_closed).map(|_| ()).boxed()
	}

	/// Synchronous form of [`target_closed`](Self::target_closed).
	pub(crate) fn is_target_closed(&self) -> bool {
		if self.base.is_disposed() {
			return true;
		}
		match self.frame() {
			Some(frame) => frame.page().is_none_or(|page| page.is_closed()),
			None => false,
		}
	}
}

impl private::Sealed for Request {}

impl ChannelOwner for Request {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("guid", &self.guid())
			.field("method", &self.state.method)
			.field("url", &self.state.url)
			.finish()
	}
}

/// Response to a [`Request`].
///
/// See <https://playwright.dev/docs/api/class-response>
#[derive(Clone)]
pub struct Response {
	base: ChannelOwnerImpl,
	state: Arc<ResponseState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseState {
	url: String,
	status: u16,
	#[serde(default)]
	status_text: String,
	#[serde(default)]
	headers: Vec<HeaderEntry>,
}

impl Response {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let state: ResponseState =
			serde_json::from_value(initializer.clone()).map_err(|e| Error::ProtocolError(format!("Invalid Response initializer: {e}")))?;
		Ok(Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			state: Arc::new(state),
		})
	}

	pub fn url(&self) -> &str {
		&self.state.url
	}

	pub fn status(&self) -> u16 {
		self.state.status
	}

	pub fn status_text(&self) -> &str {
		&self.state.status_text
	}

	/// True for 2xx statuses and for status 0 (served from cache or a file).
	pub fn ok(&self) -> bool {
		self.state.status == 0 || (200..300).contains(&self.state.status)
	}

	pub fn headers(&self) -> &[HeaderEntry] {
		&self.state.headers
	}

	/// First header value for `name`, case-insensitive.
	pub fn header_value(&self, name: &str) -> Option<&str> {
		self.state
			.headers
			.iter()
			.find(|h| h.name.eq_ignore_ascii_case(name))
			.map(|h| h.value.as_str())
	}

	pub fn request(&self) -> Option<Request> {
		let guid = guid_ref(self.base.initializer(), "request")?;
		self.base.resolve::<Request>(guid, "Request").ok()
	}

	/// Response body bytes.
	pub async fn body(&self) -> Result<Vec<u8>> {
		let reply = self.base.channel().send_raw("body", serde_json::json!({})).await?;
		let encoded = reply
			.get("binary")
			.and_then(Value::as_str)
			.ok_or_else(|| Error::ProtocolError("body reply is missing binary".to_string()))?;
		decode_binary(encoded).map_err(|e| Error::ProtocolError(format!("Invalid response body: {e}")))
	}

	pub async fn text(&self) -> Result<String> {
		String::from_utf8(self.body().await?).map_err(|e| Error::InvalidArgument(format!("Response body is not UTF-8: {e}")))
	}

	pub async fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
		serde_json::from_slice(&self.body().await?).map_err(Into::into)
	}
}

impl private::Sealed for Response {}

impl ChannelOwner for Response {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for Response {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Response")
			.field("guid", &self.guid())
			.field("status", &self.state.status)
			.field("url", &self.state.url)
			.finish()
	}
}
