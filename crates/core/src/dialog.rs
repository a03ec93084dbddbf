//! [`Dialog`]: a JavaScript `alert`, `confirm`, `prompt` or `beforeunload` dialog.

use std::sync::Arc;

use pwire_protocol::guid_ref;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::Page;

/// A dialog opened by a page. Unless a listener handles it, the page stays
/// blocked, so contexts without `dialog` listeners dismiss dialogs on their own.
///
/// See <https://playwright.dev/docs/api/class-dialog>
#[derive(Clone)]
pub struct Dialog {
	base: ChannelOwnerImpl,
}

impl Dialog {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
		}
	}

	/// `"alert"`, `"beforeunload"`, `"confirm"` or `"prompt"`.
	pub fn kind(&self) -> &str {
		self.base.initializer()["type"].as_str().unwrap_or_default()
	}

	pub fn message(&self) -> &str {
		self.base.initializer()["message"].as_str().unwrap_or_default()
	}

	/// Prefilled value of a `prompt`.
	pub fn default_value(&self) -> &str {
		self.base.initializer()["defaultValue"].as_str().unwrap_or_default()
	}

	pub fn page(&self) -> Option<Page> {
		let guid = guid_ref(self.base.initializer(), "page")?;
		self.base.resolve::<Page>(guid, "Page").ok()
	}

	/// Accepts the dialog, answering a `prompt` with `prompt_text`.
	pub async fn accept(&self, prompt_text: Option<&str>) -> Result<()> {
		let params = match prompt_text {
			Some(text) => json!({ "promptText": text }),
			None => json!({}),
		};
		self.base.channel().send_no_result("accept", params).await
	}

	pub async fn dismiss(&self) -> Result<()> {
		self.base.channel().send_no_result("dismiss", json!({})).await
	}
}

impl private::Sealed for Dialog {}

impl ChannelOwner for Dialog {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for Dialog {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dialog")
			.field("guid", &self.guid())
			.field("type", &self.kind())
			.field("message", &self.message())
			.finish()
	}
}
