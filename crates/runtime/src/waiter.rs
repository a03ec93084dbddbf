//! Waiter - one-shot wait for an event with timeout and cancellation.
//!
//! A [`Waiter`] settles exactly once: with the first matching event, with an
//! error from a rejecting event, when a watched owner is disposed, or when its
//! deadline passes. Listeners are registered when the waiter is built, so an
//! event fired by the trigger of [`Waiter::run_and_wait`] is never missed.
//! Dropping the waiter removes all of its listeners.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::channel_owner::{ChannelOwner, DisposeReason};
use crate::error::{Error, Result};
use crate::events::{EventName, EventPayload, Subscription};

/// Event filter. Returning `false` keeps the waiter waiting.
pub type Predicate = Arc<dyn Fn(&EventPayload) -> bool + Send + Sync>;

type Settle = Arc<Mutex<Option<oneshot::Sender<Result<EventPayload>>>>>;

pub struct Waiter {
	timeout: Option<Duration>,
	settle: Settle,
	rx: oneshot::Receiver<Result<EventPayload>>,
	subscriptions: Vec<Subscription>,
	owners: Vec<(String, watch::Receiver<Option<DisposeReason>>)>,
	waiting_for: Option<String>,
}

impl Default for Waiter {
	fn default() -> Self {
		Self::new()
	}
}

impl Waiter {
	pub fn new() -> Self {
		let (tx, rx) = oneshot::channel();
		Self {
			timeout: None,
			settle: Arc::new(Mutex::new(Some(tx))),
			rx,
			subscriptions: Vec::new(),
			owners: Vec::new(),
			waiting_for: None,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Resolves with the first `event` on `owner` accepted by `predicate`.
	///
	/// A predicate that panics rejects the waiter.
	pub fn wait_for_event(mut self, owner: &dyn ChannelOwner, event: EventName, predicate: Option<Predicate>) -> Result<Self> {
		let settle = Arc::clone(&self.settle);
		let subscription = owner.events().subscribe(event, move |payload| match accepts(predicate.as_ref(), payload) {
			Ok(false) => {}
			Ok(true) => settle_with(&settle, Ok(payload.clone())),
			Err(err) => settle_with(&settle, Err(err)),
		})?;
		self.subscriptions.push(subscription);
		self.watch_owner(owner);
		self.waiting_for = Some(event.as_str().to_string());
		tracing::debug!(target: "pwire", guid = owner.guid(), %event, "Waiting for event");
		Ok(self)
	}

	/// Rejects with `error(payload)` on the first `event` on `owner` accepted by `predicate`.
	pub fn reject_on_event<F>(mut self, owner: &dyn ChannelOwner, event: EventName, error: F, predicate: Option<Predicate>) -> Result<Self>
	where
		F: Fn(&EventPayload) -> Error + Send + Sync + 'static,
	{
		let settle = Arc::clone(&self.settle);
		let subscription = owner.events().subscribe(event, move |payload| match accepts(predicate.as_ref(), payload) {
			Ok(false) => {}
			Ok(true) => settle_with(&settle, Err(error(payload))),
			Err(err) => settle_with(&settle, Err(err)),
		})?;
		self.subscriptions.push(subscription);
		self.watch_owner(owner);
		Ok(self)
	}

	fn watch_owner(&mut self, owner: &dyn ChannelOwner) {
		if self.owners.iter().any(|(_, rx)| rx.same_channel(&owner.base().disposal())) {
			return;
		}
		self.owners.push((owner.type_name().to_string(), owner.base().disposal()));
	}

	/// Waits for the waiter to settle.
	pub async fn wait(mut self) -> Result<EventPayload> {
		let waiting_for = self.waiting_for.take().unwrap_or_else(|| "event".to_string());
		let timeout = self.timeout;
		let owners = std::mem::take(&mut self.owners);

		let disposed = async move {
			if owners.is_empty() {
				return future::pending::<String>().await;
			}
			let watches = owners.into_iter().map(|(type_name, mut rx)| {
				async move {
					let _ = rx.wait_for(Option::is_some).await;
					type_name
				}
				.boxed()
			});
			future::select_all(watches).await.0
		};
		let deadline = async move {
			match timeout {
				Some(limit) => {
					tokio::time::sleep(limit).await;
					limit
				}
				None => future::pending().await,
			}
		};

		let outcome = tokio::select! {
			biased;
			settled = &mut self.rx => settled.unwrap_or_else(|_| Err(Error::HandlerFailed("waiter abandoned".to_string()))),
			type_name = disposed => Err(Error::target_closed(type_name, format!("Target closed while waiting for event \"{waiting_for}\""))),
			limit = deadline => Err(Error::Timeout(format!(
				"Timeout {}ms exceeded while waiting for event \"{waiting_for}\"",
				limit.as_millis()
			))),
		};
		if let Err(err) = &outcome {
			tracing::debug!(target: "pwire", event = %waiting_for, error = %err, "Wait failed");
		}
		outcome
	}

	/// Runs `trigger` with the waiter already listening and returns both results.
	///
	/// Fails as soon as either side fails.
	pub async fn run_and_wait<F, T>(self, trigger: F) -> Result<(EventPayload, T)>
	where
		F: Future<Output = Result<T>>,
	{
		future::try_join(self.wait(), trigger).await
	}
}

fn accepts(predicate: Option<&Predicate>, payload: &EventPayload) -> Result<bool> {
	match predicate {
		None => Ok(true),
		Some(predicate) => catch_unwind(AssertUnwindSafe(|| predicate(payload))).map_err(Error::from_panic),
	}
}

fn settle_with(settle: &Settle, result: Result<EventPayload>) {
	if let Some(tx) = settle.lock().take() {
		let _ = tx.send(result);
	}
}

/// Waits for `event` on `owner` while `trigger` runs.
///
/// Also fails if the owner emits `close` first (for owners that have one) or
/// is disposed.
pub async fn expect_event<F, T>(
	owner: &dyn ChannelOwner,
	event: EventName,
	predicate: Option<Predicate>,
	timeout: Duration,
	trigger: F,
) -> Result<EventPayload>
where
	F: Future<Output = Result<T>>,
{
	let mut waiter = Waiter::new().with_timeout(timeout).wait_for_event(owner, event, predicate)?;
	if event != EventName::Close && owner.events().supports(EventName::Close) {
		let type_name = owner.type_name().to_string();
		waiter = waiter.reject_on_event(
			owner,
			EventName::Close,
			move |_| Error::target_closed(type_name.clone(), format!("Closed while waiting for event \"{event}\"")),
			None,
		)?;
	}
	waiter.run_and_wait(trigger).await.map(|(payload, _)| payload)
}
