//! Locator handlers: callbacks the driver runs when an overlay blocks an action.

use std::future::Future;

use pwire_protocol::LocatorHandlerOptions;
use pwire_runtime::{ChannelOwner, Error, Result};
use serde_json::json;

use super::Page;
use crate::Locator;
use crate::handlers::{HandlerEntry, HandlerFn, handler_fn, invoke};

/// Registration state of one locator handler.
#[derive(Debug, Clone)]
pub struct LocatorHandlerMeta {
	pub selector: String,
	/// Remaining invocations; `None` is unlimited.
	pub times: Option<u32>,
	running: bool,
}

impl Page {
	/// Registers `handler` to run whenever `locator` matches an element that
	/// blocks an action (a cookie banner, a dialog overlay).
	///
	/// The blocked action waits for the handler, bounded by its own timeout.
	/// A trigger that arrives while the handler is still running is ignored.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-add-locator-handler>
	pub async fn add_locator_handler<F, Fut>(&self, locator: &Locator, handler: F, options: LocatorHandlerOptions) -> Result<()>
	where
		F: Fn(Locator) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		if options.times == Some(0) {
			return Ok(());
		}
		let mut params = json!({ "selector": locator.selector() });
		if options.no_wait_after {
			params["noWaitAfter"] = json!(true);
		}
		let reply = self.base.channel().send_raw("registerLocatorHandler", params).await?;
		let uid = reply["uid"]
			.as_u64()
			.ok_or_else(|| Error::ProtocolError("registerLocatorHandler reply is missing uid".to_string()))?;
		self.insert_locator_handler(uid, locator.selector(), options.times, handler_fn(handler));
		Ok(())
	}

	/// Removes every locator handler registered for `locator`'s selector.
	pub async fn remove_locator_handler(&self, locator: &Locator) -> Result<()> {
		let removed: Vec<u64> = {
			let mut handlers = self.state.locator_handlers.lock();
			let uids: Vec<u64> = handlers
				.values()
				.filter(|entry| entry.meta.selector == locator.selector())
				.map(|entry| entry.id)
				.collect();
			uids.into_iter().filter(|uid| handlers.shift_remove(uid).is_some()).collect()
		};
		for uid in removed {
			match self.base.channel().send_no_result("unregisterLocatorHandler", json!({ "uid": uid })).await {
				Err(err) if err.is_target_closed() => {}
				result => result?,
			}
		}
		Ok(())
	}

	fn insert_locator_handler(&self, uid: u64, selector: &str, times: Option<u32>, handler: HandlerFn<Locator>) {
		let meta = LocatorHandlerMeta {
			selector: selector.to_string(),
			times,
			running: false,
		};
		self.state.locator_handlers.lock().insert(uid, HandlerEntry { id: uid, meta, handler });
	}

	/// Handles `locatorHandlerTriggered` on the receive loop; the handler itself runs on its own task.
	pub(super) fn on_locator_handler_triggered(&self, uid: u64) {
		let claimed = {
			let mut handlers = self.state.locator_handlers.lock();
			match handlers.get_mut(&uid) {
				None => None,
				Some(entry) if entry.meta.running => {
					tracing::debug!(target: "pwire", page = self.guid(), uid, "Locator handler still running; ignoring trigger");
					return;
				}
				Some(entry) => {
					entry.meta.running = true;
					if let Some(times) = entry.meta.times.as_mut() {
						*times = times.saturating_sub(1);
					}
					Some((entry.handler.clone(), entry.meta.selector.clone()))
				}
			}
		};
		let Some((handler, selector)) = claimed else {
			self.resolve_locator_handler(uid, false);
			return;
		};

		let page = self.clone();
		tokio::spawn(async move {
			if let Err(err) = invoke(&handler, page.locator(&selector)).await {
				tracing::error!(target: "pwire", page = page.guid(), uid, error = %err, "Locator handler failed");
			}
			let remove = {
				let mut handlers = page.state.locator_handlers.lock();
				match handlers.get(&uid).map(|entry| entry.meta.times == Some(0)) {
					Some(true) => {
						handlers.shift_remove(&uid);
						true
					}
					Some(false) => {
						if let Some(entry) = handlers.get_mut(&uid) {
							entry.meta.running = false;
						}
						false
					}
					None => false,
				}
			};
			page.resolve_locator_handler(uid, remove);
		});
	}

	fn resolve_locator_handler(&self, uid: u64, remove: bool) {
		let result = self
			.base
			.channel()
			.send_no_reply("resolveLocatorHandlerNoReply", json!({ "uid": uid, "remove": remove }));
		if let Err(err) = result {
			tracing::debug!(target: "pwire", page = self.guid(), uid, error = %err, "Failed to resolve locator handler");
		}
	}

	/// Number of locator handlers still registered.
	pub fn locator_handler_count(&self) -> usize {
		self.state.locator_handlers.lock().len()
	}
}
