//! Route handler registry and the unroute lifecycle.
//!
//! A [`RouteRegistry`] holds the route handlers of one owner (a page or a
//! context). Dispatch tries the newest registration first and walks towards
//! older ones until a handler resolves the route. Every invocation runs on the
//! caller's task, which is always a task spawned off the receive loop, and is
//! tracked so that [`RouteRegistry::unroute_all`] can wait for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures_util::future::{BoxFuture, join_all};
use indexmap::IndexMap;
use parking_lot::Mutex;
use pwire_protocol::{InterceptionPattern, RouteOptions, UnrouteBehavior};
use pwire_runtime::{Error, Result};
use tokio::sync::{oneshot, watch};

use crate::handlers::{HandlerEntry, HandlerFn, HandlerId, invoke, next_handler_id};
use crate::url_matcher::{UrlMatcher, interception_patterns};

/// Something a route handler can be invoked with.
pub trait Routable: Clone + Send + Sync + 'static {
	/// URL the registrations are matched against.
	fn url(&self) -> String;

	/// Arms the route for one handler invocation.
	///
	/// The receiver yields `true` once the handler resolved the route and
	/// `false` when it fell back to the next handler.
	fn start_handling(&self) -> oneshot::Receiver<bool>;

	/// Settles the receiver returned by [`start_handling`](Self::start_handling).
	fn report_handled(&self, handled: bool);

	/// Resolves once the route can no longer be resolved by anyone.
	fn closed(&self) -> BoxFuture<'static, ()>;
}

/// Outcome of one invocation, published when the handler returns.
type Completion = watch::Receiver<Option<Option<String>>>;

/// Per-registration state.
pub struct RouteMeta {
	pub matcher: UrlMatcher,
	times: Option<u32>,
	count: AtomicU32,
	ignore_errors: AtomicBool,
	active: Mutex<HashMap<u64, Completion>>,
}

impl RouteMeta {
	fn new(matcher: UrlMatcher, options: RouteOptions) -> Self {
		Self {
			matcher,
			times: options.times,
			count: AtomicU32::new(0),
			ignore_errors: AtomicBool::new(false),
			active: Mutex::new(HashMap::new()),
		}
	}

	/// True when the next invocation uses up the last allowed run.
	fn will_exceed(&self) -> bool {
		match self.times {
			Some(times) if times != 0 => self.count.load(Ordering::SeqCst) + 1 >= times,
			_ => false,
		}
	}

	/// Number of completed or running invocations.
	pub fn invocations(&self) -> u32 {
		self.count.load(Ordering::SeqCst)
	}

	pub fn in_flight(&self) -> usize {
		self.active.lock().len()
	}
}

pub type RouteEntry<R> = Arc<HandlerEntry<R, RouteMeta>>;

/// Result of dispatching one route through a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dispatch {
	/// A handler resolved the route.
	pub handled: bool,
	/// A registration ran out of `times` and was removed; patterns need a refresh.
	pub expired: bool,
}

/// Ordered route registrations of one owner.
pub struct RouteRegistry<R> {
	entries: Mutex<IndexMap<HandlerId, RouteEntry<R>>>,
}

impl<R: Routable> Default for RouteRegistry<R> {
	fn default() -> Self {
		Self::new()
	}
}

impl<R: Routable> RouteRegistry<R> {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(IndexMap::new()),
		}
	}

	/// Registers `handler` for URLs matching `matcher`.
	pub fn add(&self, matcher: UrlMatcher, handler: HandlerFn<R>, options: RouteOptions) -> HandlerId {
		let id = next_handler_id();
		let entry = Arc::new(HandlerEntry {
			id,
			meta: RouteMeta::new(matcher, options),
			handler,
		});
		self.entries.lock().insert(id, entry);
		id
	}

	/// Removes registrations whose matcher is the same as `matcher`, and whose id
	/// is `handler` when one is given. Returns the removed entries.
	pub fn remove(&self, matcher: &UrlMatcher, handler: Option<HandlerId>) -> Vec<RouteEntry<R>> {
		let mut entries = self.entries.lock();
		let doomed: Vec<HandlerId> = entries
			.values()
			.filter(|entry| entry.meta.matcher.same_as(matcher) && handler.is_none_or(|id| id == entry.id))
			.map(|entry| entry.id)
			.collect();
		doomed.iter().filter_map(|id| entries.shift_remove(id)).collect()
	}

	/// Removes every registration.
	pub fn take_all(&self) -> Vec<RouteEntry<R>> {
		self.entries.lock().drain(..).map(|(_, entry)| entry).collect()
	}

	/// Removes every registration and applies `behavior` to their in-flight invocations.
	///
	/// # Errors
	///
	/// With [`UnrouteBehavior::Wait`], returns [`Error::HandlerFailed`] if an
	/// invocation that was waited for failed.
	pub async fn unroute_all(&self, behavior: UnrouteBehavior) -> Result<()> {
		stop(self.take_all(), behavior).await
	}

	/// Detaches every registration without waiting. Later failures of
	/// in-flight invocations are swallowed.
	pub fn close(&self) {
		for entry in self.take_all() {
			entry.meta.ignore_errors.store(true, Ordering::SeqCst);
		}
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Patterns for `setNetworkInterceptionPatterns`/`setWebSocketInterceptionPatterns`.
	pub fn patterns(&self) -> Vec<InterceptionPattern> {
		let entries = self.entries.lock();
		interception_patterns(entries.values().map(|entry| &entry.meta.matcher))
	}

	/// Offers `route` to matching registrations, newest first.
	pub async fn handle(&self, route: R) -> Dispatch {
		let url = route.url();
		let snapshot: Vec<RouteEntry<R>> = self.entries.lock().values().rev().cloned().collect();
		let mut dispatch = Dispatch::default();

		for entry in snapshot {
			if !entry.meta.matcher.is_match(&url) {
				continue;
			}
			if entry.meta.will_exceed() {
				// Removed before it runs so a concurrent route cannot pick it up again.
				if self.entries.lock().shift_remove(&entry.id).is_none() {
					continue;
				}
				dispatch.expired = true;
			} else if !self.entries.lock().contains_key(&entry.id) {
				continue;
			}
			if run_invocation(&entry, route.clone()).await {
				dispatch.handled = true;
				break;
			}
		}
		dispatch
	}
}

/// Applies `behavior` to removed registrations.
pub async fn stop<R: Routable>(entries: Vec<RouteEntry<R>>, behavior: UnrouteBehavior) -> Result<()> {
	let completions: Vec<Completion> = match behavior {
		UnrouteBehavior::Default => return Ok(()),
		UnrouteBehavior::IgnoreErrors => {
			for entry in &entries {
				entry.meta.ignore_errors.store(true, Ordering::SeqCst);
			}
			return {
				wait_all(in_flight(&entries)).await;
				Ok(())
			};
		}
		UnrouteBehavior::Wait => in_flight(&entries),
	};

	let failures: Vec<String> = wait_all(completions).await.into_iter().flatten().collect();
	match failures.is_empty() {
		true => Ok(()),
		false => Err(Error::HandlerFailed(failures.join("; "))),
	}
}

fn in_flight<R>(entries: &[RouteEntry<R>]) -> Vec<Completion> {
	entries
		.iter()
		.flat_map(|entry| entry.meta.active.lock().values().cloned().collect::<Vec<_>>())
		.collect()
}

async fn wait_all(completions: Vec<Completion>) -> Vec<Option<String>> {
	join_all(completions.into_iter().map(|mut rx| async move {
		match rx.wait_for(Option::is_some).await {
			Ok(outcome) => outcome.clone().flatten(),
			Err(_) => None,
		}
	}))
	.await
}

/// Runs one invocation and reports whether the route ended up handled.
async fn run_invocation<R: Routable>(entry: &RouteEntry<R>, route: R) -> bool {
	let handled = route.start_handling();
	entry.meta.count.fetch_add(1, Ordering::SeqCst);

	let invocation = next_handler_id();
	let (done_tx, done_rx) = watch::channel(None);
	entry.meta.active.lock().insert(invocation, done_rx);

	let failure = match invoke(&entry.handler, route.clone()).await {
		Ok(()) => None,
		Err(err) if entry.meta.ignore_errors.load(Ordering::SeqCst) => {
			tracing::debug!(target: "pwire", handler = entry.id, error = %err, "Ignoring route handler failure after unroute");
			route.report_handled(false);
			None
		}
		Err(err) => {
			tracing::error!(target: "pwire", handler = entry.id, url = %route.url(), error = %err, "Route handler failed");
			route.report_handled(false);
			Some(err.to_string())
		}
	};
	done_tx.send_replace(Some(failure));
	entry.meta.active.lock().remove(&invocation);

	tokio::select! {
		outcome = handled => outcome.unwrap_or(false),
		_ = route.closed() => true,
	}
}
