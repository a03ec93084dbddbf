//! Per-object listener registry.
//!
//! Event names form a closed [`EventName`] enumeration; each owner keeps one
//! ordered listener slot per name. String names are only parsed at the API
//! boundary ([`ChannelOwner::on`](crate::ChannelOwner::on)).
//!
//! Emission snapshots a slot before invoking anything, so listeners added or
//! removed by a listener take effect from the next emission on. Listeners run
//! inline on the connection's receive loop and must not wait on further calls.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

macro_rules! event_names {
	($($variant:ident => $name:literal,)*) => {
		/// Every event name a proxy object can emit.
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
		pub enum EventName {
			$($variant,)*
		}

		impl EventName {
			pub const ALL: &'static [EventName] = &[$(EventName::$variant,)*];

			/// The client-facing name, e.g. `"framenavigated"`.
			pub fn as_str(self) -> &'static str {
				match self {
					$(EventName::$variant => $name,)*
				}
			}

			pub fn from_name(name: &str) -> Option<Self> {
				match name {
					$($name => Some(EventName::$variant),)*
					_ => None,
				}
			}
		}
	};
}

event_names! {
	BackgroundPage => "backgroundpage",
	CdpEvent => "event",
	Close => "close",
	Console => "console",
	Crash => "crash",
	Dialog => "dialog",
	Disconnected => "disconnected",
	DomContentLoaded => "domcontentloaded",
	Download => "download",
	FileChooser => "filechooser",
	FrameAttached => "frameattached",
	FrameDetached => "framedetached",
	FrameNavigated => "framenavigated",
	FrameReceived => "framereceived",
	FrameSent => "framesent",
	Load => "load",
	LoadState => "loadstate",
	Navigated => "navigated",
	Page => "page",
	PageError => "pageerror",
	Popup => "popup",
	Request => "request",
	RequestFailed => "requestfailed",
	RequestFinished => "requestfinished",
	Response => "response",
	ServiceWorker => "serviceworker",
	SocketError => "socketerror",
	WebSocket => "websocket",
	Worker => "worker",
}

impl EventName {
	fn slot(self) -> usize {
		self as usize
	}
}

impl fmt::Display for EventName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventName {
	type Err = Error;

	fn from_str(name: &str) -> Result<Self> {
		Self::from_name(name).ok_or_else(|| Error::InvalidArgument(format!("Unknown event \"{name}\"")))
	}
}

/// What a listener receives.
#[derive(Clone)]
pub struct EventPayload {
	pub event: EventName,
	/// Event params as sent by the driver (or synthesised for local events)
	pub params: Value,
	/// Proxy object the event refers to, e.g. the new `Page` of a `popup`
	pub object: Option<Arc<dyn ChannelOwner>>,
}

impl EventPayload {
	pub fn new(event: EventName, params: Value) -> Self {
		Self { event, params, object: None }
	}

	pub fn with_object(mut self, object: Arc<dyn ChannelOwner>) -> Self {
		self.object = Some(object);
		self
	}

	/// Downcasts the attached object.
	pub fn object_as<T: ChannelOwner>(&self) -> Option<&T> {
		self.object.as_deref()?.downcast_ref::<T>()
	}
}

impl fmt::Debug for EventPayload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventPayload")
			.field("event", &self.event)
			.field("params", &self.params)
			.field("object", &self.object.as_ref().map(|o| o.guid().to_string()))
			.finish()
	}
}

pub type ListenerId = u64;

/// Listener callback.
pub type Listener = Arc<dyn Fn(&EventPayload) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_listener_id() -> ListenerId {
	NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

struct ListenerEntry {
	id: ListenerId,
	once: bool,
	listener: Listener,
}

/// Listener slots for one object.
pub struct EventEmitter {
	supported: &'static [EventName],
	slots: Vec<Mutex<Vec<ListenerEntry>>>,
}

impl EventEmitter {
	/// Creates an emitter accepting listeners for `supported` only.
	pub fn new(supported: &'static [EventName]) -> Self {
		Self {
			supported,
			slots: EventName::ALL.iter().map(|_| Mutex::new(Vec::new())).collect(),
		}
	}

	pub fn supports(&self, event: EventName) -> bool {
		self.supported.contains(&event)
	}

	pub fn supported(&self) -> &'static [EventName] {
		self.supported
	}

	pub fn on<F>(&self, event: EventName, listener: F) -> Result<ListenerId>
	where
		F: Fn(&EventPayload) + Send + Sync + 'static,
	{
		self.add(event, Arc::new(listener), false)
	}

	pub fn once<F>(&self, event: EventName, listener: F) -> Result<ListenerId>
	where
		F: Fn(&EventPayload) + Send + Sync + 'static,
	{
		self.add(event, Arc::new(listener), true)
	}

	/// Registers an already boxed listener.
	pub fn add(&self, event: EventName, listener: Listener, once: bool) -> Result<ListenerId> {
		if !self.supports(event) {
			return Err(Error::InvalidArgument(format!("Event \"{event}\" is not emitted by this object")));
		}
		let id = next_listener_id();
		self.slots[event.slot()].lock().push(ListenerEntry { id, once, listener });
		Ok(id)
	}

	/// Registers a listener that is removed when the returned handle drops.
	pub fn subscribe<F>(self: &Arc<Self>, event: EventName, listener: F) -> Result<Subscription>
	where
		F: Fn(&EventPayload) + Send + Sync + 'static,
	{
		let id = self.on(event, listener)?;
		Ok(Subscription {
			emitter: Arc::downgrade(self),
			event,
			id: Some(id),
		})
	}

	pub fn remove_listener(&self, event: EventName, id: ListenerId) -> bool {
		let mut slot = self.slots[event.slot()].lock();
		let before = slot.len();
		slot.retain(|entry| entry.id != id);
		slot.len() != before
	}

	/// Removes every listener for `event`, or for all events when `None`.
	pub fn remove_all_listeners(&self, event: Option<EventName>) {
		match event {
			Some(event) => self.slots[event.slot()].lock().clear(),
			None => self.slots.iter().for_each(|slot| slot.lock().clear()),
		}
	}

	pub fn listener_count(&self, event: EventName) -> usize {
		self.slots[event.slot()].lock().len()
	}

	/// Delivers `payload` to a snapshot of the slot's listeners, in registration order.
	///
	/// Returns how many listeners were invoked. A panicking listener is logged
	/// and does not prevent the remaining listeners from running.
	pub fn emit(&self, payload: EventPayload) -> usize {
		let snapshot: Vec<Listener> = {
			let mut slot = self.slots[payload.event.slot()].lock();
			let snapshot = slot.iter().map(|entry| Arc::clone(&entry.listener)).collect();
			slot.retain(|entry| !entry.once);
			snapshot
		};

		for listener in &snapshot {
			if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&payload))) {
				tracing::error!(target: "pwire", event = %payload.event, panic = %Error::from_panic(panic), "Event listener panicked");
			}
		}
		snapshot.len()
	}
}

/// RAII handle that removes its listener on drop.
///
/// Holds the emitter weakly, so dropping it after the owner is gone is a no-op.
pub struct Subscription {
	emitter: Weak<EventEmitter>,
	event: EventName,
	id: Option<ListenerId>,
}

impl Subscription {
	pub fn id(&self) -> Option<ListenerId> {
		self.id
	}

	/// Removes the listener now. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let (Some(id), Some(emitter)) = (self.id.take(), self.emitter.upgrade()) {
			emitter.remove_listener(self.event, id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("event", &self.event)
			.field("id", &self.id)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use serde_json::json;

	use super::*;

	const PAGE_LIKE: &[EventName] = &[EventName::Close, EventName::Console, EventName::Popup];

	fn counter() -> (Arc<AtomicUsize>, impl Fn(&EventPayload) + Send + Sync + 'static) {
		let count = Arc::new(AtomicUsize::new(0));
		let inner = count.clone();
		(count, move |_: &EventPayload| {
			inner.fetch_add(1, Ordering::SeqCst);
		})
	}

	#[test]
	fn names_round_trip() {
		for event in EventName::ALL {
			assert_eq!(EventName::from_name(event.as_str()), Some(*event));
		}
		assert_eq!("framenavigated".parse::<EventName>().unwrap(), EventName::FrameNavigated);
		assert!("frameNavigated".parse::<EventName>().is_err());
	}

	#[test]
	fn unsupported_event_is_rejected() {
		let emitter = EventEmitter::new(PAGE_LIKE);
		let err = emitter.on(EventName::Disconnected, |_| {}).unwrap_err();
		assert!(matches!(err, Error::InvalidArgument(_)));
	}

	#[test]
	fn listeners_run_in_registration_order() {
		let emitter = EventEmitter::new(PAGE_LIKE);
		let seen = Arc::new(Mutex::new(Vec::new()));
		for tag in ["a", "b", "c"] {
			let seen = seen.clone();
			emitter.on(EventName::Console, move |_| seen.lock().push(tag)).unwrap();
		}
		assert_eq!(emitter.emit(EventPayload::new(EventName::Console, json!({}))), 3);
		assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
	}

	#[test]
	fn once_listener_fires_once() {
		let emitter = EventEmitter::new(PAGE_LIKE);
		let (count, listener) = counter();
		emitter.once(EventName::Close, listener).unwrap();
		emitter.emit(EventPayload::new(EventName::Close, Value::Null));
		emitter.emit(EventPayload::new(EventName::Close, Value::Null));
		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert_eq!(emitter.listener_count(EventName::Close), 0);
	}

	#[test]
	fn remove_listener_by_id() {
		let emitter = EventEmitter::new(PAGE_LIKE);
		let (count, listener) = counter();
		let id = emitter.on(EventName::Console, listener).unwrap();
		assert!(emitter.remove_listener(EventName::Console, id));
		assert!(!emitter.remove_listener(EventName::Console, id));
		emitter.emit(EventPayload::new(EventName::Console, Value::Null));
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn registration_during_emission_applies_next_pass() {
		let emitter = Arc::new(EventEmitter::new(PAGE_LIKE));
		let (late_count, late) = counter();
		let late = Arc::new(late);
		let added = Arc::new(AtomicUsize::new(0));

		let weak = Arc::downgrade(&emitter);
		let added_inner = added.clone();
		emitter
			.on(EventName::Console, move |_| {
				if added_inner.fetch_add(1, Ordering::SeqCst) == 0 {
					let late = late.clone();
					weak.upgrade().unwrap().on(EventName::Console, move |p| (*late)(p)).unwrap();
				}
			})
			.unwrap();

		assert_eq!(emitter.emit(EventPayload::new(EventName::Console, Value::Null)), 1);
		assert_eq!(late_count.load(Ordering::SeqCst), 0);
		assert_eq!(emitter.emit(EventPayload::new(EventName::Console, Value::Null)), 2);
		assert_eq!(late_count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn removal_during_emission_keeps_current_pass() {
		let emitter = Arc::new(EventEmitter::new(PAGE_LIKE));
		let (second_count, second) = counter();
		let second_id = Arc::new(Mutex::new(None::<ListenerId>));

		let weak = Arc::downgrade(&emitter);
		let id_slot = second_id.clone();
		emitter
			.on(EventName::Console, move |_| {
				if let Some(id) = *id_slot.lock() {
					weak.upgrade().unwrap().remove_listener(EventName::Console, id);
				}
			})
			.unwrap();
		*second_id.lock() = Some(emitter.on(EventName::Console, second).unwrap());

		emitter.emit(EventPayload::new(EventName::Console, Value::Null));
		assert_eq!(second_count.load(Ordering::SeqCst), 1);
		emitter.emit(EventPayload::new(EventName::Console, Value::Null));
		assert_eq!(second_count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn panicking_listener_does_not_stop_others() {
		let emitter = EventEmitter::new(PAGE_LIKE);
		emitter.on(EventName::Console, |_| panic!("listener bug")).unwrap();
		let (count, listener) = counter();
		emitter.on(EventName::Console, listener).unwrap();
		emitter.emit(EventPayload::new(EventName::Console, Value::Null));
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn subscription_removes_on_drop() {
		let emitter = Arc::new(EventEmitter::new(PAGE_LIKE));
		let (count, listener) = counter();
		let subscription = emitter.subscribe(EventName::Popup, listener).unwrap();
		assert_eq!(emitter.listener_count(EventName::Popup), 1);
		drop(subscription);
		assert_eq!(emitter.listener_count(EventName::Popup), 0);
		emitter.emit(EventPayload::new(EventName::Popup, Value::Null));
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}
}
