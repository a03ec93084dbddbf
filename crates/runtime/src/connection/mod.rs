//! Connection - request/response correlation and object dispatch.
//!
//! One [`Connection`] owns the transport. Outbound requests go through a
//! single writer task; inbound frames are handled one at a time, in arrival
//! order, by the receive loop in [`Connection::run`]. The loop:
//!
//! 1. Resolves responses against the pending-call table.
//! 2. Applies lifecycle messages (`__create__`, `__dispose__`, `__adopt__`)
//!    to the object registry.
//! 3. Routes every other event to the proxy addressed by its guid.
//!
//! When the transport fails or [`Connection::close`] is called, every
//! pending call fails with the close cause, every object is disposed, and
//! later calls fail fast.

mod object_store;
mod pending;
mod root;

#[cfg(test)]
pub(crate) mod tests;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use pwire_protocol::{
	AdoptParams, CreateParams, DisposeParams, ErrorPayload, Event, Lifecycle, Message, Metadata, Request, Response, guid_ref,
};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, watch};

pub use object_store::ObjectStore;
use pending::{PendingCalls, Resolution};
pub use root::RootObject;

use crate::channel_owner::{ChannelOwner, DisposeReason, ParentOrConnection, adopt};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// What a [`ChannelOwner`] needs from the connection it lives on.
pub trait ConnectionLike: Send + Sync {
	/// Sends a call and awaits its reply, failing with a timeout error after `timeout`.
	fn send_message<'a>(&'a self, guid: &'a str, method: &'a str, params: Value, timeout: Option<Duration>) -> BoxFuture<'a, Result<Value>>;

	/// Queues a call whose reply is ignored.
	fn send_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()>;

	fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) -> Result<()>;

	/// Removes an object from the registry. Synchronous so `dispose` can call it.
	fn unregister_object(&self, guid: &str);

	fn try_get_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>>;

	/// Waits for an object announced in a reply whose `__create__` may not have been processed yet.
	fn wait_for_object<'a>(&'a self, guid: &'a str, timeout: Duration) -> BoxFuture<'a, Result<Arc<dyn ChannelOwner>>>;

	fn config(&self) -> &RuntimeConfig;

	fn is_closed(&self) -> bool;
}

/// Builds typed proxies for `__create__`.
///
/// Keeps the connection independent of the concrete object types, which
/// live in the `pwire` crate.
pub trait ObjectFactory: Send + Sync {
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> Result<Arc<dyn ChannelOwner>>;
}

struct ConnectionIo {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Value>,
}

/// Protocol connection to one driver.
pub struct Connection {
	last_id: AtomicU32,
	pending: PendingCalls,
	objects: ObjectStore,
	factory: RwLock<Option<Arc<dyn ObjectFactory>>>,
	config: RuntimeConfig,
	outbound_tx: mpsc::UnboundedSender<Value>,
	/// Taken by the first `run()`.
	io: Mutex<Option<ConnectionIo>>,
	cause: OnceLock<String>,
	shutdown: Notify,
	closed_tx: watch::Sender<Option<String>>,
	root: OnceLock<Arc<dyn ChannelOwner>>,
}

/// Drops a waiting caller's interest in its reply unless disarmed.
struct AbandonGuard<'a> {
	pending: &'a PendingCalls,
	id: u32,
	armed: bool,
}

impl Drop for AbandonGuard<'_> {
	fn drop(&mut self) {
		if self.armed {
			self.pending.abandon(self.id);
		}
	}
}

impl Connection {
	pub fn new(parts: TransportParts, config: RuntimeConfig) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (closed_tx, _) = watch::channel(None);

		Self {
			last_id: AtomicU32::new(0),
			pending: PendingCalls::new(),
			objects: ObjectStore::new(),
			factory: RwLock::new(None),
			config,
			outbound_tx,
			io: Mutex::new(Some(ConnectionIo {
				sender,
				receiver,
				message_rx,
				outbound_rx,
			})),
			cause: OnceLock::new(),
			shutdown: Notify::new(),
			closed_tx,
			root: OnceLock::new(),
		}
	}

	/// Installs the factory used for `__create__`. Must happen before `run()`.
	pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
		*self.factory.write() = Some(factory);
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	/// The root object at guid `""`, parent of `Playwright`.
	pub fn root_object(self: &Arc<Self>) -> Arc<dyn ChannelOwner> {
		Arc::clone(self.root.get_or_init(|| {
			let root: Arc<dyn ChannelOwner> = Arc::new(RootObject::new(Arc::clone(self) as Arc<dyn ConnectionLike>));
			if let Err(err) = self.objects.try_insert(Arc::from(""), Arc::clone(&root)) {
				tracing::warn!(target: "pwire", error = %err, "Root guid already registered");
			}
			root
		}))
	}

	fn next_id(&self) -> u32 {
		self.last_id.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Sends `method` to the object at `guid` and awaits the reply.
	///
	/// Fails fast if the connection is closed or the guid is not registered.
	/// After `timeout` the caller gets [`Error::Timeout`]; the driver keeps
	/// running the operation and its reply is discarded when it arrives.
	pub async fn call(&self, guid: &str, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
		if let Some(cause) = self.cause.get() {
			return Err(Error::ConnectionClosed(cause.clone()));
		}
		if !guid.is_empty() && !self.objects.contains(guid) {
			return Err(Error::target_closed(type_from_guid(guid), format!("Object {guid} is not registered.")));
		}

		let id = self.next_id();
		let rx = self.pending.register(id, method)?;
		let mut guard = AbandonGuard {
			pending: &self.pending,
			id,
			armed: true,
		};
		if let Err(err) = self.enqueue(id, guid, method, params) {
			self.pending.forget(id);
			guard.armed = false;
			return Err(err);
		}

		let outcome = match timeout {
			Some(limit) => match tokio::time::timeout(limit, rx).await {
				Ok(outcome) => outcome,
				Err(_) => {
					tracing::debug!(target: "pwire", id, guid, method, "Call timed out");
					return Err(Error::Timeout(format!("{method}: Timeout {}ms exceeded.", limit.as_millis())));
				}
			},
			None => rx.await,
		};
		guard.armed = false;
		outcome.unwrap_or_else(|_| Err(Error::ConnectionClosed(self.close_cause())))
	}

	/// Queues a call and does not wait for its reply.
	pub fn call_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()> {
		if let Some(cause) = self.cause.get() {
			return Err(Error::ConnectionClosed(cause.clone()));
		}
		let id = self.next_id();
		self.pending.register_no_reply(id, method)?;
		self.enqueue(id, guid, method, params).inspect_err(|_| self.pending.forget(id))
	}

	fn enqueue(&self, id: u32, guid: &str, method: &str, params: Value) -> Result<()> {
		let request = Request {
			id,
			guid: Arc::from(guid),
			method: method.to_string(),
			params: if params.is_null() { Value::Object(Default::default()) } else { params },
			metadata: Metadata::now(),
		};
		tracing::debug!(target: "pwire", id, guid, method, "Sending request");
		let value = serde_json::to_value(&request)?;
		self.outbound_tx
			.send(value)
			.map_err(|_| Error::ConnectionClosed("Outbound queue closed".to_string()))
	}

	/// Performs the `initialize` handshake and returns the `Playwright` object.
	pub async fn initialize(self: &Arc<Self>) -> Result<Arc<dyn ChannelOwner>> {
		self.root_object();
		let params = serde_json::json!({ "sdkLanguage": self.config.sdk_language });
		let result = self.call("", "initialize", params, Some(self.config.init_timeout)).await?;
		let guid = guid_ref(&result, "playwright")
			.ok_or_else(|| Error::ProtocolError("initialize reply is missing playwright.guid".to_string()))?;
		self.objects.wait_for(guid, self.config.init_timeout).await
	}

	/// Runs the receive loop until the transport ends or [`close`](Self::close) is called.
	///
	/// Calling it a second time returns immediately.
	pub async fn run(self: &Arc<Self>) {
		self.root_object();
		let Some(io) = self.io.lock().take() else {
			tracing::warn!(target: "pwire", "Connection::run called more than once");
			return;
		};
		let ConnectionIo {
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		} = io;

		let mut reader = tokio::spawn(receiver.run());
		let mut writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				sender.send(message).await?;
			}
			sender.close().await
		});

		let cause = loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => {
						if let Err(err) = self.dispatch_value(value) {
							tracing::error!(target: "pwire", error = %err, "Fatal protocol error");
							break err.to_string();
						}
					}
					None => {
						break match (&mut reader).await {
							Ok(Ok(())) => "Transport closed".to_string(),
							Ok(Err(err)) => err.to_string(),
							Err(err) => format!("Transport reader failed: {err}"),
						};
					}
				},
				result = &mut writer => {
					break match result {
						Ok(Ok(())) => "Transport writer closed".to_string(),
						Ok(Err(err)) => err.to_string(),
						Err(err) => format!("Transport writer failed: {err}"),
					};
				}
				_ = self.shutdown.notified() => break self.close_cause(),
			}
		};

		reader.abort();
		writer.abort();
		self.terminate(&cause);
	}

	/// Closes the connection locally.
	pub fn close(&self) {
		self.terminate("Connection closed by client");
		self.shutdown.notify_one();
	}

	/// Resolves with the close cause once the connection has terminated.
	pub async fn closed(&self) -> String {
		let mut rx = self.closed_tx.subscribe();
		match rx.wait_for(Option::is_some).await {
			Ok(cause) => cause.clone().unwrap_or_default(),
			Err(_) => self.close_cause(),
		}
	}

	fn close_cause(&self) -> String {
		self.cause.get().cloned().unwrap_or_else(|| "Connection closed".to_string())
	}

	fn terminate(&self, cause: &str) {
		if self.cause.set(cause.to_string()).is_err() {
			return;
		}
		let failed = self.pending.close(cause);
		tracing::debug!(target: "pwire", cause, failed, "Connection terminated");

		if let Some(root) = self.root.get() {
			root.dispose(DisposeReason::ConnectionClosed);
		}
		for orphan in self.objects.values() {
			orphan.dispose(DisposeReason::ConnectionClosed);
		}
		self.closed_tx.send_replace(Some(cause.to_string()));
	}

	/// Number of calls still waiting for a reply.
	pub fn pending_calls(&self) -> usize {
		self.pending.len()
	}

	pub fn objects(&self) -> &ObjectStore {
		&self.objects
	}

	/// Handles one inbound frame.
	///
	/// Errors are fatal: they leave the registry or the pending table inconsistent.
	pub(crate) fn dispatch_value(self: &Arc<Self>, value: Value) -> Result<()> {
		let message = serde_json::from_value::<Message>(value).map_err(|err| Error::ProtocolError(format!("Undecodable frame: {err}")))?;
		match message {
			Message::Response(response) => {
				self.dispatch_response(response);
				Ok(())
			}
			Message::Event(event) => self.dispatch_event(event),
			// A reply its call can never be matched against.
			Message::Unknown(value) if value.get("id").is_some_and(Value::is_u64) => {
				Err(Error::ProtocolError(format!("Malformed reply frame: {value}")))
			}
			Message::Unknown(value) => {
				tracing::warn!(target: "pwire", frame = %value, "Ignoring frame of unknown shape");
				Ok(())
			}
		}
	}

	fn dispatch_response(&self, response: Response) {
		let id = response.id;
		let result = match response.error {
			Some(wrapper) => Err(parse_protocol_error(wrapper.error)),
			None => Ok(response.result.unwrap_or(Value::Null)),
		};
		if self.pending.resolve(id, result) == Resolution::Unknown {
			tracing::warn!(target: "pwire", id, "Reply for unknown call id");
		}
	}

	fn dispatch_event(self: &Arc<Self>, event: Event) -> Result<()> {
		match Lifecycle::from_method(&event.method) {
			Some(Lifecycle::Create) => self.handle_create(event),
			Some(Lifecycle::Dispose) => {
				self.handle_dispose(event);
				Ok(())
			}
			Some(Lifecycle::Adopt) => {
				self.handle_adopt(event);
				Ok(())
			}
			None => {
				match self.objects.try_get(&event.guid) {
					Some(object) => object.on_event(&event.method, event.params),
					None => tracing::debug!(target: "pwire", guid = %event.guid, method = %event.method, "Event for unknown object"),
				}
				Ok(())
			}
		}
	}

	fn handle_create(self: &Arc<Self>, event: Event) -> Result<()> {
		let params: CreateParams =
			serde_json::from_value(event.params).map_err(|err| Error::ProtocolError(format!("Malformed __create__: {err}")))?;
		let parent = self
			.objects
			.try_get(&event.guid)
			.ok_or_else(|| Error::ProtocolError(format!("__create__ of {} under unknown parent {:?}", params.guid, &*event.guid)))?;
		if self.objects.contains(&params.guid) {
			return Err(Error::ProtocolError(format!("Duplicate guid: {}", params.guid)));
		}
		let factory = self
			.factory
			.read()
			.clone()
			.ok_or_else(|| Error::ProtocolError("No object factory installed".to_string()))?;

		let guid: Arc<str> = Arc::from(params.guid.as_str());
		let object = factory.create_object(
			ParentOrConnection::Parent(Arc::clone(&parent)),
			params.type_name.clone(),
			Arc::clone(&guid),
			params.initializer,
		)?;
		self.objects.try_insert(Arc::clone(&guid), Arc::clone(&object))?;
		parent.base().add_child(Arc::clone(&guid), object);

		tracing::debug!(target: "pwire", type_name = %params.type_name, guid = %guid, parent = %event.guid, "Created object");
		Ok(())
	}

	fn handle_dispose(&self, event: Event) {
		let reason = match serde_json::from_value::<DisposeParams>(event.params) {
			Ok(params) if params.is_gc() => DisposeReason::GarbageCollected,
			_ => DisposeReason::Closed,
		};
		match self.objects.try_get(&event.guid) {
			Some(object) => object.dispose(reason),
			None => tracing::debug!(target: "pwire", guid = %event.guid, "Dispose for unknown object"),
		}
	}

	fn handle_adopt(&self, event: Event) {
		let params = match serde_json::from_value::<AdoptParams>(event.params) {
			Ok(params) => params,
			Err(err) => {
				tracing::warn!(target: "pwire", error = %err, "Malformed __adopt__");
				return;
			}
		};
		match (self.objects.try_get(&event.guid), self.objects.try_get(&params.guid)) {
			(Some(parent), Some(child)) => {
				adopt(&parent, child);
				tracing::debug!(target: "pwire", child = %params.guid, parent = %event.guid, "Adopted object");
			}
			_ => tracing::warn!(target: "pwire", child = %params.guid, parent = %event.guid, "__adopt__ for unknown object"),
		}
	}
}

/// Converts a driver error payload into [`Error::Remote`].
fn parse_protocol_error(error: ErrorPayload) -> Error {
	Error::Remote {
		name: error.name.unwrap_or_else(|| "Error".to_string()),
		message: error.message,
		stack: error.stack,
	}
}

/// Best-effort type name from a guid of the form `type@hash`.
fn type_from_guid(guid: &str) -> &str {
	guid.split_once('@').map(|(prefix, _)| prefix).unwrap_or("object")
}

impl ConnectionLike for Connection {
	fn send_message<'a>(&'a self, guid: &'a str, method: &'a str, params: Value, timeout: Option<Duration>) -> BoxFuture<'a, Result<Value>> {
		Box::pin(self.call(guid, method, params, timeout))
	}

	fn send_no_reply(&self, guid: &str, method: &str, params: Value) -> Result<()> {
		self.call_no_reply(guid, method, params)
	}

	fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) -> Result<()> {
		self.objects.try_insert(guid, object)
	}

	fn unregister_object(&self, guid: &str) {
		self.objects.remove(guid);
	}

	fn try_get_object(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.try_get(guid)
	}

	fn wait_for_object<'a>(&'a self, guid: &'a str, timeout: Duration) -> BoxFuture<'a, Result<Arc<dyn ChannelOwner>>> {
		Box::pin(self.objects.wait_for(guid, timeout))
	}

	fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	fn is_closed(&self) -> bool {
		self.cause.get().is_some()
	}
}
