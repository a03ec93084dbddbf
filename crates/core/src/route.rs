//! [`Route`]: a paused network request handed to route handlers.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use pwire_protocol::{ContinueOverrides, FulfillOptions, guid_ref};
use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ParentOrConnection, Result};
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::Request;
use crate::routing::Routable;

/// A request intercepted by `page.route()` or `context.route()`.
///
/// Exactly one of [`continue_`](Self::continue_), [`fulfill`](Self::fulfill),
/// [`abort`](Self::abort) or [`fallback`](Self::fallback) resolves it per
/// handler invocation.
///
/// See <https://playwright.dev/docs/api/class-route>
#[derive(Clone)]
pub struct Route {
	base: ChannelOwnerImpl,
	request: Request,
	handling: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl Route {
	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let request_guid =
			guid_ref(&initializer, "request").ok_or_else(|| Error::ProtocolError("Route initializer is missing request.guid".to_string()))?;
		let request = parent
			.connection()
			.try_get_object(request_guid)
			.and_then(|object| object.downcast_ref::<Request>().cloned())
			.ok_or_else(|| Error::ProtocolError(format!("Route refers to unknown request {request_guid}")))?;

		Ok(Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer),
			request,
			handling: Arc::new(Mutex::new(None)),
		})
	}

	pub fn request(&self) -> &Request {
		&self.request
	}

	/// Sends the request on, optionally changed by `overrides`.
	///
	/// Overrides layer on top of those collected by earlier fallbacks.
	pub async fn continue_(&self, overrides: Option<ContinueOverrides>) -> Result<()> {
		self.check_not_handled()?;
		if let Some(overrides) = overrides {
			self.request.apply_fallback_overrides(overrides);
		}
		let result = self.inner_continue(false).await;
		self.report_handled(true);
		result
	}

	/// Continues with the accumulated fallback overrides once no handler resolved the route.
	pub(crate) async fn continue_default(&self) -> Result<()> {
		self.inner_continue(true).await
	}

	async fn inner_continue(&self, is_fallback: bool) -> Result<()> {
		let overrides = self.request.fallback_overrides();
		let mut params = serde_json::to_value(&overrides)?;
		params["isFallback"] = json!(is_fallback);
		self.race_with_target_close(self.base.channel().send_raw("continue", params)).await
	}

	/// Answers the request without contacting the server.
	pub async fn fulfill(&self, options: FulfillOptions) -> Result<()> {
		self.check_not_handled()?;
		let mut params = serde_json::to_value(&options)?;
		if options.status.is_none() {
			params["status"] = json!(200);
		}
		let result = self.race_with_target_close(self.base.channel().send_raw("fulfill", params)).await;
		self.report_handled(true);
		result
	}

	/// Fails the request with `error_code` (`"failed"` when `None`).
	pub async fn abort(&self, error_code: Option<&str>) -> Result<()> {
		self.check_not_handled()?;
		let params = json!({ "errorCode": error_code.unwrap_or("failed") });
		let result = self.race_with_target_close(self.base.channel().send_raw("abort", params)).await;
		self.report_handled(true);
		result
	}

	/// Passes the request to the next matching handler, optionally changed by `overrides`.
	pub async fn fallback(&self, overrides: Option<ContinueOverrides>) -> Result<()> {
		self.check_not_handled()?;
		if let Some(overrides) = overrides {
			self.request.apply_fallback_overrides(overrides);
		}
		self.report_handled(false);
		Ok(())
	}

	fn check_not_handled(&self) -> Result<()> {
		match self.handling.lock().is_some() {
			true => Ok(()),
			false => Err(Error::InvalidArgument("Route is already handled!".to_string())),
		}
	}

	/// Runs `call`, treating a closed page as success.
	async fn race_with_target_close<F>(&self, call: F) -> Result<()>
	where
		F: Future<Output = Result<Value>>,
	{
		let closed = self.request.target_closed();
		tokio::select! {
			result = call => match result {
				Ok(_) => Ok(()),
				Err(err) if err.is_target_closed() || self.request.is_target_closed() => {
					tracing::debug!(target: "pwire", route = self.guid(), error = %err, "Route resolved after its target closed");
					Ok(())
				}
				Err(err) => Err(err),
			},
			_ = closed => {
				tracing::debug!(target: "pwire", route = self.guid(), "Target closed while resolving route");
				Ok(())
			}
		}
	}
}

impl Routable for Route {
	fn url(&self) -> String {
		self.request.url()
	}

	fn start_handling(&self) -> oneshot::Receiver<bool> {
		let (tx, rx) = oneshot::channel();
		*self.handling.lock() = Some(tx);
		rx
	}

	fn report_handled(&self, handled: bool) {
		if let Some(tx) = self.handling.lock().take() {
			let _ = tx.send(handled);
		}
	}

	fn closed(&self) -> BoxFuture<'static, ()> {
		self.request.target_closed().boxed()
	}
}

impl private::Sealed for Route {}

impl ChannelOwner for Route {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for Route {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Route").field("guid", &self.guid()).field("request", &self.request).finish()
	}
}
