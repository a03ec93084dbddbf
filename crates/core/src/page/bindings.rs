//! Functions exposed to page JavaScript.

use std::future::Future;

use pwire_runtime::{ChannelOwner, Error, Result};
use serde_json::{Value, json};

use super::Page;
use crate::binding_call::{BindingCall, BindingFn, BindingSource, binding_fn};
use crate::object_factory::event_object;

impl Page {
	/// Exposes `binding` as `window[name]` in every frame of this page.
	///
	/// Calls from the page resolve with the binding's return value. With
	/// `needs_handle`, the page passes a single object by handle, available as
	/// [`BindingSource::handle`].
	///
	/// See <https://playwright.dev/docs/api/class-page#page-expose-binding>
	pub async fn expose_binding<F, Fut>(&self, name: &str, needs_handle: bool, binding: F) -> Result<()>
	where
		F: Fn(BindingSource, Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		if self.context().is_some_and(|context| context.binding(name).is_some()) {
			return Err(Error::InvalidArgument(format!("Function \"{name}\" has been already registered in the browser context")));
		}
		{
			let mut bindings = self.state.bindings.lock();
			if bindings.contains_key(name) {
				return Err(Error::InvalidArgument(format!("Function \"{name}\" has been already registered")));
			}
			bindings.insert(name.to_string(), binding_fn(binding));
		}

		let params = json!({ "name": name, "needsHandle": needs_handle });
		let result = self.base.channel().send_no_result("exposeBinding", params).await;
		if result.is_err() {
			self.state.bindings.lock().remove(name);
		}
		result
	}

	/// Exposes `function` as `window[name]`; it sees only the call arguments.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-expose-function>
	pub async fn expose_function<F, Fut>(&self, name: &str, function: F) -> Result<()>
	where
		F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self.expose_binding(name, false, move |_: BindingSource, args: Vec<Value>| function(args)).await
	}

	pub(crate) fn binding(&self, name: &str) -> Option<BindingFn> {
		self.state.bindings.lock().get(name).cloned()
	}

	/// Page bindings shadow context bindings of the same name.
	pub(super) fn on_binding_call(&self, params: &Value) {
		let Some(call) = event_object::<BindingCall>(&self.base, params, "binding") else {
			tracing::warn!(target: "pwire", page = self.guid(), "bindingCall event for unknown BindingCall");
			return;
		};
		let binding = self
			.binding(call.name())
			.or_else(|| self.context().and_then(|context| context.binding(call.name())));
		match binding {
			Some(binding) => {
				tokio::spawn(async move { call.call(binding).await });
			}
			None => tracing::debug!(target: "pwire", page = self.guid(), binding = call.name(), "No binding registered"),
		}
	}
}
