//! [`JsHandle`]: a reference to an in-page JavaScript object.

use std::sync::Arc;

use parking_lot::RwLock;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::serialization::{parse_value, serialize_argument};

/// Handle to a JavaScript object. `ElementHandle`s are handles to DOM nodes
/// and share this proxy.
///
/// See <https://playwright.dev/docs/api/class-jshandle>
#[derive(Clone)]
pub struct JsHandle {
	base: ChannelOwnerImpl,
	preview: Arc<RwLock<String>>,
}

impl JsHandle {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		let preview = initializer["preview"].as_str().unwrap_or_default().to_string();
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			preview: Arc::new(RwLock::new(preview)),
		}
	}

	/// Short description of the object, kept current by the driver.
	pub fn preview(&self) -> String {
		self.preview.read().clone()
	}

	pub fn is_element(&self) -> bool {
		self.base.type_name() == "ElementHandle"
	}

	/// Evaluates `expression` with this handle as its first argument.
	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		let params = json!({
			"expression": expression,
			"arg": serialize_argument(arg.as_ref(), &[])?,
		});
		let reply = self.base.channel().send_raw("evaluateExpression", params).await?;
		parse_value(&reply["value"])
	}

	/// JSON rendering of the referenced object.
	pub async fn json_value(&self) -> Result<Value> {
		let reply = self.base.channel().send_raw("jsonValue", json!({})).await?;
		parse_value(&reply["value"])
	}

	/// Releases the in-page object. Disposing twice is harmless.
	pub async fn dispose(&self) -> Result<()> {
		match self.base.channel().send_no_result("dispose", json!({})).await {
			Err(err) if err.is_target_closed() => Ok(()),
			result => result,
		}
	}
}

impl private::Sealed for JsHandle {}

impl ChannelOwner for JsHandle {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_event(&self, method: &str, params: Value) {
		match method {
			"previewUpdated" => {
				if let Some(preview) = params["preview"].as_str() {
					*self.preview.write() = preview.to_string();
				}
			}
			_ => self.base.emit_raw(method, params),
		}
	}
}

impl std::fmt::Debug for JsHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("JsHandle")
			.field("guid", &self.guid())
			.field("preview", &self.preview())
			.finish()
	}
}
