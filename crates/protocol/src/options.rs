//! Option and payload types shared by the runtime and the typed objects.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// What `unroute_all` does about handler invocations that are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnrouteBehavior {
	/// Remove the handlers and return immediately.
	#[default]
	Default,
	/// Wait for in-flight invocations and report their failures.
	Wait,
	/// Wait for in-flight invocations and swallow their failures.
	IgnoreErrors,
}

/// Options for registering a route handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOptions {
	/// Number of times the handler may run before it is removed.
	pub times: Option<u32>,
}

impl RouteOptions {
	pub fn times(times: u32) -> Self {
		Self { times: Some(times) }
	}
}

/// Options for registering a locator handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocatorHandlerOptions {
	pub times: Option<u32>,
	/// Skip waiting for the overlay to disappear once the handler returns.
	pub no_wait_after: bool,
}

/// Options for launching a browser.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub headless: Option<bool>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<String>,
	/// Browser distribution channel, e.g. `"chrome"` or `"msedge"`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel: Option<String>,
	/// Launch timeout in milliseconds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout: Option<f64>,
}

impl LaunchOptions {
	pub fn headless(mut self, headless: bool) -> Self {
		self.headless = Some(headless);
		self
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn channel(mut self, channel: impl Into<String>) -> Self {
		self.channel = Some(channel.into());
		self
	}
}

/// URL pattern the driver uses to decide which requests to pause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterceptionPattern {
	Glob {
		glob: String,
	},
	Regex {
		#[serde(rename = "regexSource")]
		regex_source: String,
		#[serde(rename = "regexFlags")]
		regex_flags: String,
	},
}

/// A single HTTP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
	pub name: String,
	pub value: String,
}

impl HeaderEntry {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}
}

/// Request overrides applied by `continue` and accumulated by `fallback`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueOverrides {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub headers: Option<Vec<HeaderEntry>>,
	/// Base64-encoded request body
	#[serde(skip_serializing_if = "Option::is_none")]
	pub post_data: Option<String>,
}

impl ContinueOverrides {
	pub fn with_post_data(mut self, body: &[u8]) -> Self {
		self.post_data = Some(STANDARD.encode(body));
		self
	}

	/// Layers `other` on top of `self`; fields set in `other` win.
	pub fn merge(&mut self, other: ContinueOverrides) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.method.is_some() {
			self.method = other.method;
		}
		if other.headers.is_some() {
			self.headers = other.headers;
		}
		if other.post_data.is_some() {
			self.post_data = other.post_data;
		}
	}
}

/// Synthetic response served by `fulfill`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillOptions {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub headers: Option<Vec<HeaderEntry>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub body: Option<String>,
	#[serde(default)]
	pub is_base64: bool,
}

impl FulfillOptions {
	pub fn text(status: u16, body: impl Into<String>) -> Self {
		Self {
			status: Some(status),
			body: Some(body.into()),
			..Default::default()
		}
	}

	pub fn binary(status: u16, body: &[u8]) -> Self {
		Self {
			status: Some(status),
			body: Some(STANDARD.encode(body)),
			is_base64: true,
			..Default::default()
		}
	}
}

/// A websocket frame as carried by `WebSocketRoute` calls and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketMessage {
	pub message: String,
	#[serde(default)]
	pub is_base64: bool,
}

impl WebSocketMessage {
	pub fn text(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			is_base64: false,
		}
	}

	pub fn binary(data: &[u8]) -> Self {
		Self {
			message: STANDARD.encode(data),
			is_base64: true,
		}
	}

	/// Raw frame bytes, decoding base64 payloads.
	pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
		if self.is_base64 {
			STANDARD.decode(&self.message)
		} else {
			Ok(self.message.as_bytes().to_vec())
		}
	}
}

/// Decodes a base64 `binary` field returned by the driver.
pub fn decode_binary(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
	STANDARD.decode(encoded)
}
