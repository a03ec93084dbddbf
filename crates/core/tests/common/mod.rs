//! Scripted in-memory driver for end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pwire::{ChannelOwner, Page, Playwright, RuntimeConfig};
use pwire_runtime::PipeTransport;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// Upper bound for any single step of a scenario.
pub const STEP: Duration = Duration::from_secs(5);

/// The driver end of the pipes: reads requests, writes replies and events.
pub struct FakeDriver {
	requests: DuplexStream,
	replies: DuplexStream,
}

impl FakeDriver {
	pub async fn next_request(&mut self) -> Value {
		let read = async {
			let mut len_buf = [0u8; 4];
			self.requests.read_exact(&mut len_buf).await.unwrap();
			let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
			self.requests.read_exact(&mut payload).await.unwrap();
			serde_json::from_slice::<Value>(&payload).unwrap()
		};
		tokio::time::timeout(STEP, read).await.expect("no request from the client")
	}

	/// Reads the next request and checks it is `method`.
	pub async fn expect(&mut self, method: &str) -> Value {
		let request = self.next_request().await;
		assert_eq!(request["method"], method, "unexpected request {request}");
		request
	}

	/// Reads the next request, checks it is `method` and replies with `{}`.
	pub async fn respond(&mut self, method: &str) -> Value {
		let request = self.expect(method).await;
		self.reply(&request, json!({})).await;
		request
	}

	pub async fn send(&mut self, message: Value) {
		let payload = serde_json::to_vec(&message).unwrap();
		self.replies.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
		self.replies.write_all(&payload).await.unwrap();
		self.replies.flush().await.unwrap();
	}

	pub async fn reply(&mut self, request: &Value, result: Value) {
		self.send(json!({ "id": request["id"], "result": result })).await;
	}

	pub async fn reply_error(&mut self, request: &Value, name: &str, message: &str) {
		self.send(json!({ "id": request["id"], "error": { "error": { "name": name, "message": message } } }))
			.await;
	}

	pub async fn create(&mut self, parent: &str, type_name: &str, guid: &str, initializer: Value) {
		self.send(json!({
			"guid": parent,
			"method": "__create__",
			"params": { "type": type_name, "guid": guid, "initializer": initializer }
		}))
		.await;
	}

	pub async fn event(&mut self, guid: &str, method: &str, params: Value) {
		self.send(json!({ "guid": guid, "method": method, "params": params })).await;
	}

	pub async fn dispose(&mut self, guid: &str) {
		self.send(json!({ "guid": guid, "method": "__dispose__", "params": {} })).await;
	}

	/// Creates a request and its paused route, then reports the route on `owner`.
	pub async fn pause_request(&mut self, owner: &str, id: u32, url: &str) {
		let request = format!("request@{id}");
		let route = format!("route@{id}");
		self.create(owner, "Request", &request, json!({ "url": url, "method": "GET", "frame": { "guid": "frame@1" } }))
			.await;
		self.create(owner, "Route", &route, json!({ "request": { "guid": request } })).await;
		self.event(owner, "route", json!({ "route": { "guid": route } })).await;
	}
}

/// Routes `tracing` output through the test harness; set `RUST_LOG=pwire=debug` to see it.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Connects a [`Playwright`] to a fresh fake driver and completes the handshake.
pub async fn connect() -> (Playwright, FakeDriver) {
	init_tracing();
	let (requests, client_out) = duplex(1 << 16);
	let (client_in, replies) = duplex(1 << 16);
	let (transport, message_rx) = PipeTransport::new(client_out, client_in);
	let mut driver = FakeDriver { requests, replies };

	let config = RuntimeConfig::default().with_default_timeout(STEP);
	let connecting = tokio::spawn(Playwright::connect_transport(transport.into_transport_parts(message_rx), config));

	let initialize = driver.expect("initialize").await;
	assert_eq!(initialize["guid"], "");
	for name in ["chromium", "firefox", "webkit"] {
		driver
			.create("", "BrowserType", &format!("browser-type@{name}"), json!({ "name": name, "executablePath": "" }))
			.await;
	}
	driver
		.create(
			"",
			"Playwright",
			"Playwright",
			json!({
				"chromium": { "guid": "browser-type@chromium" },
				"firefox": { "guid": "browser-type@firefox" },
				"webkit": { "guid": "browser-type@webkit" },
			}),
		)
		.await;
	driver.reply(&initialize, json!({ "playwright": { "guid": "Playwright" } })).await;

	let playwright = connecting.await.unwrap().unwrap();
	(playwright, driver)
}

/// Creates `browser@1` > `context@1` > `page@1` (main frame `frame@1`).
pub async fn setup_page() -> (Playwright, FakeDriver, Page) {
	let (playwright, mut driver) = connect().await;
	driver
		.create("browser-type@chromium", "Browser", "browser@1", json!({ "name": "chromium", "version": "131.0" }))
		.await;
	driver.create("browser@1", "BrowserContext", "context@1", json!({})).await;
	driver.create("context@1", "Frame", "frame@1", json!({ "url": "about:blank" })).await;
	driver.create("context@1", "Page", "page@1", json!({ "mainFrame": { "guid": "frame@1" } })).await;

	let page = object::<Page>(&playwright, "page@1").await;
	(playwright, driver, page)
}

/// Waits until `guid` is registered and downcasts it.
pub async fn object<T: ChannelOwner + Clone>(playwright: &Playwright, guid: &str) -> T {
	let object: Arc<dyn ChannelOwner> = playwright.connection().wait_for_object(guid, STEP).await.unwrap();
	object.downcast_ref::<T>().cloned().unwrap()
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
	let wait = async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	};
	tokio::time::timeout(STEP, wait).await.expect("condition never held");
}
