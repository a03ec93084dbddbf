use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::mpsc;

use super::*;
use crate::channel_owner::{ChannelOwnerImpl, private};
use crate::events::{EventName, EventPayload};
use crate::transport::PipeTransport;

pub(crate) type DisposeLog = Arc<Mutex<Vec<String>>>;

/// Driver side of an in-memory pipe pair.
pub(crate) struct DriverIo {
	requests: DuplexStream,
	replies: DuplexStream,
}

impl DriverIo {
	pub(crate) async fn next_request(&mut self) -> Value {
		let mut len_buf = [0u8; 4];
		self.requests.read_exact(&mut len_buf).await.unwrap();
		let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
		self.requests.read_exact(&mut payload).await.unwrap();
		serde_json::from_slice(&payload).unwrap()
	}

	pub(crate) async fn send(&mut self, message: Value) {
		let payload = serde_json::to_vec(&message).unwrap();
		self.replies.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
		self.replies.write_all(&payload).await.unwrap();
		self.replies.flush().await.unwrap();
	}

	pub(crate) async fn reply(&mut self, id: &Value, result: Value) {
		self.send(json!({ "id": id, "result": result })).await;
	}

	pub(crate) async fn create(&mut self, parent: &str, type_name: &str, guid: &str) {
		self.send(json!({
			"guid": parent,
			"method": "__create__",
			"params": { "type": type_name, "guid": guid, "initializer": {} }
		}))
		.await;
	}
}

pub(crate) struct TestObject {
	base: ChannelOwnerImpl,
	log: DisposeLog,
}

impl private::Sealed for TestObject {}

impl ChannelOwner for TestObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}

	fn on_dispose(&self, _reason: DisposeReason) {
		self.log.lock().push(self.guid().to_string());
		self.base.emit(EventPayload::new(EventName::Close, Value::Null));
	}
}

fn test_object(parent: ParentOrConnection, type_name: &str, guid: &str, log: DisposeLog) -> Arc<dyn ChannelOwner> {
	Arc::new(TestObject {
		base: ChannelOwnerImpl::new(parent, type_name, Arc::from(guid), json!({}))
			.with_events(&[EventName::Close, EventName::Console]),
		log,
	})
}

#[derive(Default)]
struct TestFactory {
	log: DisposeLog,
}

impl ObjectFactory for TestFactory {
	fn create_object(&self, parent: ParentOrConnection, type_name: String, guid: Arc<str>, _initializer: Value) -> Result<Arc<dyn ChannelOwner>> {
		if type_name == "Broken" {
			return Err(Error::InvalidArgument("cannot build Broken".to_string()));
		}
		Ok(test_object(parent, &type_name, &guid, Arc::clone(&self.log)))
	}
}

/// Object bound to `connection` but not registered anywhere.
pub(crate) fn detached_object(connection: &Arc<Connection>, type_name: &str, guid: &str) -> Arc<dyn ChannelOwner> {
	let connection = Arc::clone(connection) as Arc<dyn ConnectionLike>;
	test_object(ParentOrConnection::Connection(connection), type_name, guid, DisposeLog::default())
}

/// Routes `tracing` output through the test harness; set `RUST_LOG=pwire=debug` to see it.
pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub(crate) fn test_connection_with_log() -> (Arc<Connection>, DriverIo, DisposeLog) {
	init_tracing();
	let (requests, stdin_write) = duplex(64 * 1024);
	let (stdout_read, replies) = duplex(64 * 1024);
	let (transport, message_rx) = PipeTransport::new(stdin_write, stdout_read);
	let connection = Arc::new(Connection::new(transport.into_transport_parts(message_rx), RuntimeConfig::default()));
	let factory = TestFactory::default();
	let log = Arc::clone(&factory.log);
	connection.set_factory(Arc::new(factory));
	(connection, DriverIo { requests, replies }, log)
}

pub(crate) fn test_connection() -> (Arc<Connection>, DriverIo) {
	let (connection, io, _) = test_connection_with_log();
	(connection, io)
}

fn spawn_run(connection: &Arc<Connection>) -> tokio::task::JoinHandle<()> {
	let connection = Arc::clone(connection);
	tokio::spawn(async move { connection.run().await })
}

fn spawn_call(connection: &Arc<Connection>, guid: &str, method: &str, timeout: Option<Duration>) -> tokio::task::JoinHandle<Result<Value>> {
	let connection = Arc::clone(connection);
	let guid = guid.to_string();
	let method = method.to_string();
	tokio::spawn(async move { connection.call(&guid, &method, Value::Null, timeout).await })
}

async fn registered(connection: &Arc<Connection>, guid: &str) -> Arc<dyn ChannelOwner> {
	match connection.objects().wait_for(guid, Duration::from_secs(2)).await {
		Ok(object) => object,
		Err(err) => panic!("{guid} never registered: {err}"),
	}
}

#[tokio::test]
async fn test_request_ids_start_at_one() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let first = spawn_call(&connection, "", "first", None);
	let request = io.next_request().await;
	assert_eq!(request["id"], 1);
	assert_eq!(request["guid"], "");
	assert_eq!(request["method"], "first");
	assert_eq!(request["params"], json!({}));
	assert!(request["metadata"]["wallTime"].is_number());
	io.reply(&request["id"], json!({"value": 1})).await;
	assert_eq!(first.await.unwrap().unwrap()["value"], 1);

	let second = spawn_call(&connection, "", "second", None);
	let request = io.next_request().await;
	assert_eq!(request["id"], 2);
	io.reply(&request["id"], json!({})).await;
	second.await.unwrap().unwrap();
	assert_eq!(connection.pending_calls(), 0);
}

#[tokio::test]
async fn test_remote_error_keeps_name_and_stack() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let call = spawn_call(&connection, "", "goto", None);
	let request = io.next_request().await;
	io.send(json!({
		"id": request["id"],
		"error": { "error": { "message": "Navigation timeout", "name": "TimeoutError", "stack": "at goto" } }
	}))
	.await;

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
	assert_eq!(err.error_name(), Some("TimeoutError"));
	assert_eq!(err.stack_trace(), Some("at goto"));
}

#[tokio::test]
async fn test_unknown_reply_id_is_not_fatal() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.send(json!({"id": 999, "result": {}})).await;
	io.send(json!({"something": "else"})).await;

	let call = spawn_call(&connection, "", "ping", None);
	let request = io.next_request().await;
	io.reply(&request["id"], json!({"pong": true})).await;
	assert_eq!(call.await.unwrap().unwrap()["pong"], true);
	assert!(!ConnectionLike::is_closed(&*connection));
}

#[tokio::test]
async fn test_error_without_message_still_resolves_call() -> anyhow::Result<()> {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let call = spawn_call(&connection, "", "goto", None);
	let request = io.next_request().await;
	io.send(json!({ "id": request["id"], "error": { "error": { "name": "Error" } } })).await;

	let err = tokio::time::timeout(Duration::from_secs(2), call).await??.unwrap_err();
	assert_eq!(err.error_name(), Some("Error"));
	assert_eq!(connection.pending_calls(), 0);
	assert!(!ConnectionLike::is_closed(&*connection));
	Ok(())
}

#[tokio::test]
async fn test_malformed_reply_terminates_connection() -> anyhow::Result<()> {
	let (connection, mut io) = test_connection();
	let run = spawn_run(&connection);

	let call = spawn_call(&connection, "", "goto", None);
	let request = io.next_request().await;
	io.send(json!({ "id": request["id"], "error": "not an error object" })).await;

	let err = tokio::time::timeout(Duration::from_secs(2), call).await??.unwrap_err();
	assert!(matches!(err, Error::ConnectionClosed(_)), "{err:?}");
	let cause = tokio::time::timeout(Duration::from_secs(2), connection.closed()).await?;
	assert!(cause.contains("Malformed reply frame"), "{cause}");
	assert_eq!(connection.pending_calls(), 0);
	run.await?;
	Ok(())
}

#[tokio::test]
async fn test_dispose_is_post_order() {
	let (connection, mut io, log) = test_connection_with_log();
	let _run = spawn_run(&connection);

	io.create("", "Browser", "browser@1").await;
	io.create("browser@1", "BrowserContext", "context@1").await;
	io.create("context@1", "Page", "page@1").await;
	let browser = registered(&connection, "browser@1").await;
	let page = registered(&connection, "page@1").await;
	assert_eq!(page.parent().unwrap().guid(), "context@1");
	assert_eq!(browser.base().children().len(), 1);

	io.send(json!({"guid": "browser@1", "method": "__dispose__", "params": {}})).await;
	tokio::time::timeout(Duration::from_secs(2), browser.base().wait_for_dispose()).await.unwrap();

	assert_eq!(*log.lock(), vec!["page@1", "context@1", "browser@1"]);
	assert!(page.is_disposed());
	assert!(connection.try_get_object("page@1").is_none());
	assert!(connection.try_get_object("browser@1").is_none());
	assert_eq!(connection.root_object().base().children().len(), 0);
}

#[tokio::test]
async fn test_collected_object_rejects_calls() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.create("", "Response", "response@1").await;
	let response = registered(&connection, "response@1").await;

	io.send(json!({"guid": "response@1", "method": "__dispose__", "params": {"reason": "gc"}})).await;
	let reason = tokio::time::timeout(Duration::from_secs(2), response.base().wait_for_dispose()).await.unwrap();
	assert_eq!(reason, DisposeReason::GarbageCollected);
	assert!(response.was_collected());

	let err = response.call("body", Value::Null).await.unwrap_err();
	assert!(err.is_target_closed());
	assert!(err.to_string().contains("collected"), "{err}");
}

#[tokio::test]
async fn test_adopt_moves_child() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.create("", "Browser", "browser@1").await;
	io.create("browser@1", "BrowserContext", "context@1").await;
	io.create("", "Browser", "browser@2").await;
	let context = registered(&connection, "context@1").await;
	let second = registered(&connection, "browser@2").await;

	io.send(json!({"guid": "browser@2", "method": "__adopt__", "params": {"guid": "context@1"}})).await;
	io.send(json!({"guid": "nobody@1", "method": "__adopt__", "params": {"guid": "context@1"}})).await;

	let call = spawn_call(&connection, "", "sync", None);
	let request = io.next_request().await;
	io.reply(&request["id"], json!({})).await;
	call.await.unwrap().unwrap();

	assert_eq!(context.parent().unwrap().guid(), "browser@2");
	assert_eq!(second.base().children().len(), 1);
	let first = connection.try_get_object("browser@1").unwrap();
	assert!(first.base().children().is_empty());
}

#[tokio::test]
async fn test_events_reach_listeners() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.create("", "Page", "page@1").await;
	let page = registered(&connection, "page@1").await;

	let (tx, mut rx) = mpsc::unbounded_channel();
	page.on(
		"console",
		Arc::new(move |payload: &EventPayload| {
			let _ = tx.send(payload.params["text"].clone());
		}),
	)
	.unwrap();

	io.send(json!({"guid": "page@1", "method": "console", "params": {"text": "hello"}})).await;
	io.send(json!({"guid": "page@1", "method": "somethingNew", "params": {}})).await;
	io.send(json!({"guid": "ghost@1", "method": "console", "params": {"text": "lost"}})).await;
	io.send(json!({"guid": "page@1", "method": "console", "params": {"text": "again"}})).await;

	assert_eq!(rx.recv().await.unwrap(), "hello");
	assert_eq!(rx.recv().await.unwrap(), "again");
}

#[tokio::test]
async fn test_transport_close_fails_pending_calls() {
	let (connection, mut io) = test_connection();
	let run = spawn_run(&connection);

	io.create("", "Page", "page@1").await;
	let page = registered(&connection, "page@1").await;
	let call = spawn_call(&connection, "page@1", "waitForever", None);
	io.next_request().await;

	drop(io);

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_target_closed(), "{err:?}");
	assert!(matches!(err, Error::ConnectionClosed(_)));

	let cause = tokio::time::timeout(Duration::from_secs(2), connection.closed()).await.unwrap();
	assert!(!cause.is_empty());
	run.await.unwrap();

	assert!(page.is_disposed());
	assert!(connection.objects().is_empty());
	assert_eq!(connection.pending_calls(), 0);

	let err = connection.call("", "late", Value::Null, None).await.unwrap_err();
	assert!(matches!(err, Error::ConnectionClosed(_)));
}

#[tokio::test]
async fn test_timeout_discards_late_reply() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let slow = spawn_call(&connection, "", "slow", Some(Duration::from_millis(50)));
	let request = io.next_request().await;

	let err = slow.await.unwrap().unwrap_err();
	assert!(err.is_timeout());
	assert!(err.to_string().contains("slow: Timeout 50ms exceeded."), "{err}");

	io.reply(&request["id"], json!({"late": true})).await;

	let next = spawn_call(&connection, "", "next", None);
	let request = io.next_request().await;
	io.reply(&request["id"], json!({"late": false})).await;
	assert_eq!(next.await.unwrap().unwrap()["late"], false);
	assert_eq!(connection.pending_calls(), 0);
}

#[tokio::test]
async fn test_call_to_unregistered_guid_fails_fast() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let err = connection.call("page@404", "click", Value::Null, None).await.unwrap_err();
	assert!(err.is_target_closed());

	let call = spawn_call(&connection, "", "ping", None);
	let request = io.next_request().await;
	assert_eq!(request["id"], 1, "nothing was written for the rejected call");
	io.reply(&request["id"], json!({})).await;
	call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_initialize_handshake() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	let init = {
		let connection = Arc::clone(&connection);
		tokio::spawn(async move { connection.initialize().await.map(|object| object.guid().to_string()) })
	};
	let request = io.next_request().await;
	assert_eq!(request["method"], "initialize");
	assert_eq!(request["guid"], "");
	assert_eq!(request["params"]["sdkLanguage"], "rust");

	io.create("", "Playwright", "playwright").await;
	io.reply(&request["id"], json!({"playwright": {"guid": "playwright"}})).await;

	assert_eq!(init.await.unwrap().unwrap(), "playwright");
}

#[tokio::test]
async fn test_create_under_unknown_parent_is_fatal() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.create("nope@1", "Page", "page@1").await;

	let cause = tokio::time::timeout(Duration::from_secs(2), connection.closed()).await.unwrap();
	assert!(cause.contains("unknown parent"), "{cause}");
}

#[tokio::test]
async fn test_factory_error_is_fatal() {
	let (connection, mut io) = test_connection();
	let _run = spawn_run(&connection);

	io.create("", "Broken", "broken@1").await;

	let cause = tokio::time::timeout(Duration::from_secs(2), connection.closed()).await.unwrap();
	assert!(cause.contains("cannot build Broken"), "{cause}");
}

#[tokio::test]
async fn test_local_close() {
	let (connection, mut io) = test_connection();
	let run = spawn_run(&connection);

	let call = spawn_call(&connection, "", "hang", None);
	io.next_request().await;

	connection.close();
	let err = call.await.unwrap().unwrap_err();
	assert!(err.to_string().contains("Connection closed by client"), "{err}");
	assert_eq!(connection.closed().await, "Connection closed by client");
	tokio::time::timeout(Duration::from_secs(2), run).await.unwrap().unwrap();
	assert!(connection.root_object().is_disposed());
}

#[test]
fn test_error_type_parsing() {
	let error = parse_protocol_error(ErrorPayload {
		message: "timeout".to_string(),
		name: Some("TimeoutError".to_string()),
		stack: Some("stack trace".to_string()),
	});
	assert!(error.is_timeout());
	match &error {
		Error::Remote { name, message, stack } => {
			assert_eq!(name, "TimeoutError");
			assert_eq!(message, "timeout");
			assert_eq!(stack.as_deref(), Some("stack trace"));
		}
		_ => panic!("Expected Remote error"),
	}

	let unnamed = parse_protocol_error(ErrorPayload {
		message: "nope".to_string(),
		name: None,
		stack: None,
	});
	assert_eq!(unnamed.error_name(), Some("Error"));
}

#[test]
fn test_type_from_guid() {
	assert_eq!(type_from_guid("page@abc"), "page");
	assert_eq!(type_from_guid("weird"), "object");
}
