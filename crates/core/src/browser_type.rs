//! [`BrowserType`]: entry point for one browser engine.

use std::sync::Arc;
use std::time::Duration;

use pwire_protocol::LaunchOptions;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ParentOrConnection, Result};
use serde_json::Value;

use crate::Browser;
use crate::object_factory::reply_object;

/// A browser engine: Chromium, Firefox or WebKit.
///
/// Reached through [`Playwright::chromium`](crate::Playwright::chromium) and
/// its siblings.
///
/// See <https://playwright.dev/docs/api/class-browsertype>
#[derive(Clone)]
pub struct BrowserType {
	base: ChannelOwnerImpl,
	name: String,
}

impl BrowserType {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let name = initializer["name"]
			.as_str()
			.ok_or_else(|| Error::ProtocolError("BrowserType initializer missing 'name'".to_string()))?
			.to_string();
		Ok(Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			name,
		})
	}

	/// `"chromium"`, `"firefox"` or `"webkit"`.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn executable_path(&self) -> &str {
		self.base.initializer()["executablePath"].as_str().unwrap_or_default()
	}

	/// Launches a browser with default options.
	pub async fn launch(&self) -> Result<Browser> {
		self.launch_with_options(LaunchOptions::default()).await
	}

	/// Launches a browser.
	///
	/// An explicit `timeout` also bounds the local wait for the reply.
	///
	/// See <https://playwright.dev/docs/api/class-browsertype#browser-type-launch>
	pub async fn launch_with_options(&self, options: LaunchOptions) -> Result<Browser> {
		let deadline = options.timeout.map(|ms| Duration::from_millis(ms as u64));
		let params = serde_json::to_value(&options)?;
		tracing::debug!(target: "pwire", browser_type = %self.name, "Launching browser");
		let reply = self.base.channel().send_raw_with_timeout("launch", params, deadline).await?;
		reply_object(&self.base, &reply, "browser", "Browser").await
	}
}

impl private::Sealed for BrowserType {}

impl ChannelOwner for BrowserType {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for BrowserType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BrowserType").field("guid", &self.guid()).field("name", &self.name).finish()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::object_factory::tests::{create, offline_connection};

	#[tokio::test]
	async fn test_name_from_initializer() {
		let (connection, _in, _out) = offline_connection();
		let root = connection.root_object();
		let object = create(
			&connection,
			&root,
			"BrowserType",
			"browser-type@chromium",
			json!({"name": "chromium", "executablePath": "/opt/chromium/chrome"}),
		);
		let browser_type = object.downcast_ref::<BrowserType>().unwrap();
		assert_eq!(browser_type.name(), "chromium");
		assert_eq!(browser_type.executable_path(), "/opt/chromium/chrome");
	}
}
