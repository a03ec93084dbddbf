//! [`BindingCall`]: one call from page JavaScript into a function exposed with
//! [`Page::expose_binding`] or [`BrowserContext::expose_binding`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use pwire_protocol::guid_ref;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ParentOrConnection, Result};
use serde_json::{Value, json};

use crate::serialization::{parse_value, serialize_argument};
use crate::{BrowserContext, Frame, JsHandle, Page};

/// Boxed future returned by a binding.
pub type BindingFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// A binding: receives where the call came from and its decoded arguments.
pub type BindingFn = Arc<dyn Fn(BindingSource, Vec<Value>) -> BindingFuture + Send + Sync>;

pub(crate) fn binding_fn<F, Fut>(binding: F) -> BindingFn
where
	F: Fn(BindingSource, Vec<Value>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	Arc::new(move |source: BindingSource, args: Vec<Value>| -> BindingFuture { Box::pin(binding(source, args)) })
}

/// Where a binding call originated.
#[derive(Debug, Clone)]
pub struct BindingSource {
	pub context: Option<BrowserContext>,
	pub page: Option<Page>,
	pub frame: Option<Frame>,
	/// The handle passed by the page when the binding was exposed with `needs_handle`.
	pub handle: Option<JsHandle>,
}

/// A pending call into an exposed binding. The driver keeps the page's
/// promise open until the call is resolved or rejected.
#[derive(Clone)]
pub struct BindingCall {
	base: ChannelOwnerImpl,
}

impl BindingCall {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
		}
	}

	/// Name the binding was exposed under.
	pub fn name(&self) -> &str {
		self.base.initializer()["name"].as_str().unwrap_or_default()
	}

	pub fn frame(&self) -> Option<Frame> {
		let guid = guid_ref(self.base.initializer(), "frame")?;
		self.base.resolve::<Frame>(guid, "Frame").ok()
	}

	pub fn handle(&self) -> Option<JsHandle> {
		let guid = guid_ref(self.base.initializer(), "handle")?;
		self.base.resolve::<JsHandle>(guid, "JSHandle").ok()
	}

	/// Decoded call arguments. Empty when the binding takes a handle.
	pub fn args(&self) -> Result<Vec<Value>> {
		match self.base.initializer().get("args").and_then(Value::as_array) {
			Some(args) => args.iter().map(parse_value).collect(),
			None => Ok(Vec::new()),
		}
	}

	fn source(&self) -> BindingSource {
		let frame = self.frame();
		let page = frame.as_ref().and_then(Frame::page);
		let context = page.as_ref().and_then(Page::context);
		BindingSource {
			context,
			page,
			frame,
			handle: self.handle(),
		}
	}

	/// Runs `binding` and answers the driver with `resolve` or `reject`.
	///
	/// Runs on its own task, never on the receive loop.
	pub(crate) async fn call(&self, binding: BindingFn) {
		let outcome = match self.args() {
			Ok(args) => {
				let source = self.source();
				AssertUnwindSafe(async move { binding(source, args).await })
					.catch_unwind()
					.await
					.unwrap_or_else(|panic| Err(Error::from_panic(panic)))
			}
			Err(err) => Err(err),
		};
		let outcome = outcome.and_then(|value| serialize_argument(Some(&value), &[]));

		let sent = match outcome {
			Ok(result) => self.base.channel().send_no_result("resolve", json!({ "result": result })).await,
			Err(err) => {
				tracing::error!(target: "pwire", binding = self.name(), error = %err, "Binding failed");
				self.reject(&err).await
			}
		};
		if let Err(err) = sent {
			if !err.is_target_closed() {
				tracing::warn!(target: "pwire", binding = self.name(), error = %err, "Could not answer binding call");
			}
		}
	}

	async fn reject(&self, err: &Error) -> Result<()> {
		let error = json!({
			"error": {
				"name": err.error_name().unwrap_or("Error"),
				"message": err.to_string(),
				"stack": err.stack_trace().unwrap_or_default(),
			}
		});
		self.base.channel().send_no_result("reject", json!({ "error": error })).await
	}
}

impl private::Sealed for BindingCall {}

impl ChannelOwner for BindingCall {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for BindingCall {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BindingCall").field("guid", &self.guid()).field("name", &self.name()).finish()
	}
}
