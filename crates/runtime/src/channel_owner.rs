//! ChannelOwner - base capability of every remote-backed proxy.
//!
//! A proxy embeds a [`ChannelOwnerImpl`] and implements [`ChannelOwner`] by
//! returning it from [`ChannelOwner::base`]. Everything else (event routing,
//! disposal, listener registration, raw calls) comes from default methods.
//!
//! Parents own their children; children only hold a weak back-reference.
//! Disposal is post-order: children first, then the object leaves its parent
//! and the registry, then its type-specific `on_dispose` hook runs (which
//! emits the terminal `close`/`disconnected` event), and finally waiters
//! blocked on the object are released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;

use crate::channel::Channel;
use crate::connection::ConnectionLike;
use crate::error::{Error, Result};
use crate::events::{EventEmitter, EventName, EventPayload, Listener, ListenerId};

/// Private module for the sealed trait pattern.
pub mod private {
	/// Marker trait that seals `ChannelOwner`.
	pub trait Sealed {}
}

type ChildrenRegistry = HashMap<Arc<str>, Arc<dyn ChannelOwner>>;

/// Why an object was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
	/// The driver disposed the object (`__dispose__`).
	Closed,
	/// The driver collected the object to bound its heap (`__dispose__` with `reason: "gc"`).
	GarbageCollected,
	/// The connection terminated.
	ConnectionClosed,
}

/// Parent can be either another ChannelOwner or, for the root, the Connection.
pub enum ParentOrConnection {
	Parent(Arc<dyn ChannelOwner>),
	Connection(Arc<dyn ConnectionLike>),
}

/// Base trait for all proxy objects.
///
/// Sealed: only this workspace's crates implement it.
pub trait ChannelOwner: private::Sealed + DowncastSync {
	/// The embedded base state.
	fn base(&self) -> &ChannelOwnerImpl;

	fn guid(&self) -> &str {
		self.base().guid()
	}

	/// Driver type tag (e.g. "Browser", "Page").
	fn type_name(&self) -> &str {
		self.base().type_name()
	}

	fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.base().parent()
	}

	fn connection(&self) -> Arc<dyn ConnectionLike> {
		self.base().connection()
	}

	/// Raw initializer sent with `__create__`.
	fn initializer(&self) -> &Value {
		self.base().initializer()
	}

	fn channel(&self) -> &Channel {
		self.base().channel()
	}

	fn events(&self) -> &Arc<EventEmitter> {
		self.base().events()
	}

	fn is_disposed(&self) -> bool {
		self.base().is_disposed()
	}

	/// True when the driver collected the object.
	fn was_collected(&self) -> bool {
		self.base().was_collected()
	}

	/// Handles a driver event addressed to this object.
	///
	/// Runs on the receive loop. The default emits events whose wire name is a
	/// known [`EventName`] this type supports, with the raw params.
	fn on_event(&self, method: &str, params: Value) {
		self.base().emit_raw(method, params);
	}

	/// Type-specific teardown, run once during [`dispose`](Self::dispose).
	fn on_dispose(&self, _reason: DisposeReason) {}

	/// Disposes this object and all descendants. Idempotent.
	fn dispose(&self, reason: DisposeReason) {
		let base = self.base();
		if !base.begin_dispose(reason) {
			return;
		}
		for child in base.take_children() {
			child.dispose(reason);
		}
		if let Some(parent) = base.parent() {
			parent.base().remove_child(base.guid());
		}
		base.connection().unregister_object(base.guid());
		self.on_dispose(reason);
		base.finish_dispose(reason);
		tracing::debug!(target: "pwire", guid = base.guid(), type_name = base.type_name(), ?reason, "Disposed");
	}

	/// Registers `listener` for the event called `event`.
	fn on(&self, event: &str, listener: Listener) -> Result<ListenerId> {
		self.events().add(event.parse()?, listener, false)
	}

	/// Registers `listener` for a single delivery of `event`.
	fn once(&self, event: &str, listener: Listener) -> Result<ListenerId> {
		self.events().add(event.parse()?, listener, true)
	}

	/// Removes a listener; returns whether it was registered.
	fn remove_listener(&self, event: &str, id: ListenerId) -> Result<bool> {
		Ok(self.events().remove_listener(event.parse()?, id))
	}

	/// Issues `method` against this object and returns the raw result.
	fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Value>> {
		Box::pin(self.channel().send_raw(method, params))
	}
}

impl_downcast!(sync ChannelOwner);

/// Re-links `child` under `parent` (`__adopt__`).
pub fn adopt(parent: &Arc<dyn ChannelOwner>, child: Arc<dyn ChannelOwner>) {
	if let Some(old_parent) = child.parent() {
		old_parent.base().remove_child(child.guid());
	}
	child.base().set_parent(Arc::downgrade(parent));
	parent.base().add_child(Arc::from(child.guid()), child);
}

/// Lifecycle state shared by every clone of one proxy.
pub(crate) struct OwnerState {
	parent: RwLock<Option<Weak<dyn ChannelOwner>>>,
	children: Mutex<ChildrenRegistry>,
	disposing: AtomicBool,
	collected: AtomicBool,
	disposed: watch::Sender<Option<DisposeReason>>,
}

impl OwnerState {
	pub(crate) fn closed_error(&self, type_name: &str) -> Option<Error> {
		if !self.disposing.load(Ordering::SeqCst) {
			return None;
		}
		let context = if self.collected.load(Ordering::SeqCst) {
			"The object has been collected to prevent unbounded heap growth."
		} else {
			"The object has been disposed."
		};
		Some(Error::target_closed(type_name, context))
	}
}

/// Base state embedded in every proxy object.
#[derive(Clone)]
pub struct ChannelOwnerImpl {
	guid: Arc<str>,
	type_name: String,
	connection: Arc<dyn ConnectionLike>,
	channel: Channel,
	initializer: Value,
	events: Arc<EventEmitter>,
	state: Arc<OwnerState>,
}

impl ChannelOwnerImpl {
	/// Creates base state that accepts no listeners; see [`with_events`](Self::with_events).
	pub fn new(parent: ParentOrConnection, type_name: impl Into<String>, guid: Arc<str>, initializer: Value) -> Self {
		let (connection, parent) = match parent {
			ParentOrConnection::Parent(p) => (p.connection(), Some(Arc::downgrade(&p))),
			ParentOrConnection::Connection(c) => (c, None),
		};
		let type_name = type_name.into();
		let (disposed, _) = watch::channel(None);
		let state = Arc::new(OwnerState {
			parent: RwLock::new(parent),
			children: Mutex::new(HashMap::new()),
			disposing: AtomicBool::new(false),
			collected: AtomicBool::new(false),
			disposed,
		});
		let channel = Channel::new(Arc::clone(&guid), type_name.clone(), Arc::clone(&connection), Arc::clone(&state));

		Self {
			guid,
			type_name,
			connection,
			channel,
			initializer,
			events: Arc::new(EventEmitter::new(&[])),
			state,
		}
	}

	/// Declares the events this type emits.
	pub fn with_events(mut self, supported: &'static [EventName]) -> Self {
		self.events = Arc::new(EventEmitter::new(supported));
		self
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.state.parent.read().as_ref().and_then(Weak::upgrade)
	}

	pub fn connection(&self) -> Arc<dyn ConnectionLike> {
		Arc::clone(&self.connection)
	}

	pub fn initializer(&self) -> &Value {
		&self.initializer
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub fn events(&self) -> &Arc<EventEmitter> {
		&self.events
	}

	pub fn is_disposed(&self) -> bool {
		self.state.disposing.load(Ordering::SeqCst)
	}

	pub fn was_collected(&self) -> bool {
		self.state.collected.load(Ordering::SeqCst)
	}

	pub fn children(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.state.children.lock().values().cloned().collect()
	}

	pub fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>) {
		self.state.children.lock().insert(guid, child);
	}

	pub fn remove_child(&self, guid: &str) {
		self.state.children.lock().remove(guid);
	}

	fn set_parent(&self, parent: Weak<dyn ChannelOwner>) {
		*self.state.parent.write() = Some(parent);
	}

	fn take_children(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.state.children.lock().drain().map(|(_, child)| child).collect()
	}

	fn begin_dispose(&self, reason: DisposeReason) -> bool {
		if reason == DisposeReason::GarbageCollected {
			self.state.collected.store(true, Ordering::SeqCst);
		}
		!self.state.disposing.swap(true, Ordering::SeqCst)
	}

	fn finish_dispose(&self, reason: DisposeReason) {
		self.state.disposed.send_replace(Some(reason));
	}

	/// Watch that flips to `Some(reason)` once disposal has completed.
	pub fn disposal(&self) -> watch::Receiver<Option<DisposeReason>> {
		self.state.disposed.subscribe()
	}

	/// Resolves once this object has been disposed.
	pub async fn wait_for_dispose(&self) -> DisposeReason {
		let mut rx = self.disposal();
		let reason = match rx.wait_for(Option::is_some).await {
			Ok(current) => *current,
			Err(_) => None,
		};
		reason.unwrap_or(DisposeReason::Closed)
	}

	/// Emits `payload` to this object's listeners.
	pub fn emit(&self, payload: EventPayload) -> usize {
		self.events.emit(payload)
	}

	/// Emits a driver event by wire name if it maps to a supported [`EventName`].
	pub fn emit_raw(&self, method: &str, params: Value) {
		match EventName::from_name(method).filter(|event| self.events.supports(*event)) {
			Some(event) => {
				self.events.emit(EventPayload::new(event, params));
			}
			None => tracing::debug!(target: "pwire", guid = %self.guid, type_name = %self.type_name, method, "Unhandled event"),
		}
	}

	/// Looks up another registered object by guid.
	pub fn resolve_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>> {
		self.connection.try_get_object(guid).ok_or_else(|| Error::ObjectNotFound {
			guid: guid.to_string(),
			expected: None,
		})
	}

	/// Looks up a registered object and downcasts it to `T`.
	pub fn resolve<T: ChannelOwner + Clone>(&self, guid: &str, expected: &'static str) -> Result<T> {
		self.resolve_object(guid)?
			.downcast_ref::<T>()
			.cloned()
			.ok_or_else(|| Error::ObjectNotFound {
				guid: guid.to_string(),
				expected: Some(expected),
			})
	}
}
