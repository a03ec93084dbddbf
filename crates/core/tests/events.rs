mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{eventually, object, setup_page};
use parking_lot::Mutex;
use pwire::{ChannelOwner, EventName, EventPayload, Locator, LocatorHandlerOptions, Page, Predicate};
use serde_json::json;

#[tokio::test]
async fn expect_event_resolves_with_first_match() {
	let (_playwright, mut driver, page) = setup_page().await;

	let predicate: Predicate = Arc::new(|p: &EventPayload| p.params["text"] == "second");
	let trigger = async {
		for text in ["first", "second", "third"] {
			driver
				.event("context@1", "console", json!({ "page": { "guid": "page@1" }, "type": "log", "text": text }))
				.await;
		}
		Ok::<_, pwire::Error>(())
	};
	let payload = page.expect_event(EventName::Console, Some(predicate), None, trigger).await.unwrap();
	assert_eq!(payload.params["text"], "second");
}

#[tokio::test]
async fn expect_event_fails_when_page_closes() {
	let (_playwright, mut driver, page) = setup_page().await;

	let trigger = async {
		driver.event("page@1", "close", json!({})).await;
		Ok::<_, pwire::Error>(())
	};
	let err = page.expect_event(EventName::Console, None, None, trigger).await.unwrap_err();
	assert!(err.is_target_closed(), "{err:?}");
}

#[tokio::test]
async fn expect_event_times_out() {
	let (_playwright, _driver, page) = setup_page().await;

	let err = page
		.expect_event(EventName::Console, None, Some(Duration::from_millis(50)), async { Ok::<_, pwire::Error>(()) })
		.await
		.unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn popup_reaches_opener() {
	let (_playwright, mut driver, page) = setup_page().await;

	let trigger = async {
		driver.create("context@1", "Frame", "frame@2", json!({ "url": "about:blank" })).await;
		driver
			.create(
				"context@1",
				"Page",
				"page@2",
				json!({ "mainFrame": { "guid": "frame@2" }, "opener": { "guid": "page@1" } }),
			)
			.await;
		driver.event("context@1", "page", json!({ "page": { "guid": "page@2" } })).await;
		Ok::<_, pwire::Error>(())
	};
	let popup = page.expect_popup(None, trigger).await.unwrap();
	assert_eq!(popup.guid(), "page@2");
	assert_eq!(popup.opener().map(|opener| opener.guid().to_string()).as_deref(), Some("page@1"));

	let context = page.context().unwrap();
	let pages: Vec<String> = context.pages().iter().map(|p| p.guid().to_string()).collect();
	assert_eq!(pages, ["page@1", "page@2"]);
}

#[tokio::test]
async fn network_events_reach_context_and_page() {
	let (_playwright, mut driver, page) = setup_page().await;
	let context = page.context().unwrap();

	let seen = Arc::new(Mutex::new(Vec::new()));
	let on_context = Arc::clone(&seen);
	context
		.events()
		.on(EventName::Request, move |p: &EventPayload| {
			on_context.lock().push(format!("context:{}", p.object.as_ref().map(|o| o.guid().to_string()).unwrap_or_default()))
		})
		.unwrap();
	let on_page = Arc::clone(&seen);
	page.events()
		.on(EventName::Request, move |_: &EventPayload| on_page.lock().push("page".to_string()))
		.unwrap();

	driver
		.create("page@1", "Request", "request@1", json!({ "url": "https://example.com/", "method": "GET", "frame": { "guid": "frame@1" } }))
		.await;
	driver
		.event("context@1", "request", json!({ "request": { "guid": "request@1" }, "page": { "guid": "page@1" } }))
		.await;

	eventually(|| seen.lock().len() == 2).await;
	assert_eq!(*seen.lock(), vec!["context:request@1".to_string(), "page".to_string()]);
}

#[tokio::test]
async fn locator_handler_runs_times_then_unregisters() {
	let (_playwright, mut driver, page) = setup_page().await;
	let calls = Arc::new(AtomicUsize::new(0));
	let selectors = Arc::new(Mutex::new(Vec::new()));

	let counter = Arc::clone(&calls);
	let sink = Arc::clone(&selectors);
	let overlay = page.locator("#cookie-banner");
	let options = LocatorHandlerOptions {
		times: Some(2),
		no_wait_after: false,
	};
	let register = page.add_locator_handler(
		&overlay,
		move |locator: Locator| {
			counter.fetch_add(1, Ordering::SeqCst);
			sink.lock().push(locator.selector().to_string());
			async { Ok(()) }
		},
		options,
	);
	let answer = async {
		let request = driver.expect("registerLocatorHandler").await;
		assert_eq!(request["params"]["selector"], "#cookie-banner");
		assert!(request["params"].get("noWaitAfter").is_none());
		driver.reply(&request, json!({ "uid": 7 })).await;
	};
	let (registered, _) = tokio::join!(register, answer);
	registered.unwrap();
	assert_eq!(page.locator_handler_count(), 1);

	let mut removals = Vec::new();
	for _ in 0..4 {
		driver.event("page@1", "locatorHandlerTriggered", json!({ "uid": 7 })).await;
		let resolved = driver.expect("resolveLocatorHandlerNoReply").await;
		assert_eq!(resolved["params"]["uid"], 7);
		removals.push(resolved["params"]["remove"].as_bool().unwrap());
	}

	assert_eq!(removals, [false, true, false, false]);
	assert_eq!(calls.load(Ordering::SeqCst), 2);
	assert_eq!(*selectors.lock(), ["#cookie-banner", "#cookie-banner"]);
	assert_eq!(page.locator_handler_count(), 0);
}

#[tokio::test]
async fn locator_handler_with_zero_times_is_not_registered() {
	let (_playwright, _driver, page) = setup_page().await;
	let options = LocatorHandlerOptions {
		times: Some(0),
		no_wait_after: true,
	};
	page.add_locator_handler(&page.locator("#overlay"), |_: Locator| async { Ok(()) }, options)
		.await
		.unwrap();
	assert_eq!(page.locator_handler_count(), 0);
}

#[tokio::test]
async fn dialogs_without_listeners_are_dismissed() {
	let (playwright, mut driver, _page) = setup_page().await;

	driver
		.create("page@1", "Dialog", "dialog@1", json!({ "type": "confirm", "message": "Leave?", "page": { "guid": "page@1" } }))
		.await;
	driver.event("context@1", "dialog", json!({ "dialog": { "guid": "dialog@1" } })).await;
	let dismissed = driver.expect("dismiss").await;
	assert_eq!(dismissed["guid"], "dialog@1");
	driver.reply(&dismissed, json!({})).await;

	let dialog = object::<pwire::Dialog>(&playwright, "dialog@1").await;
	assert_eq!(dialog.message(), "Leave?");
}

#[tokio::test]
async fn page_close_event_closes_once() {
	let (_playwright, mut driver, page) = setup_page().await;
	let closes = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&closes);
	page.events()
		.on(EventName::Close, move |p: &EventPayload| {
			assert!(p.object_as::<Page>().is_some());
			counter.fetch_add(1, Ordering::SeqCst);
		})
		.unwrap();

	let context = page.context().unwrap();
	driver.event("page@1", "close", json!({})).await;
	driver.dispose("page@1").await;
	eventually(|| page.is_closed() && context.pages().is_empty()).await;
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(closes.load(Ordering::SeqCst), 1);
}
