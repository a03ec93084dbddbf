mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{STEP, setup_page};
use parking_lot::Mutex;
use pwire::{ContinueOverrides, Error, Route, RouteOptions, UnrouteBehavior, UrlMatcher};
use serde_json::json;
use tokio::sync::{Notify, mpsc};

#[tokio::test]
async fn page_route_aborts_matching_request() {
	let (_playwright, mut driver, page) = setup_page().await;

	let (registered, patterns) = tokio::join!(
		page.route(UrlMatcher::glob("**/*.png").unwrap(), |route: Route| async move { route.abort(None).await }),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();
	assert_eq!(patterns["guid"], "page@1");
	assert_eq!(patterns["params"]["patterns"], json!([{ "glob": "**/*.png" }]));

	driver.pause_request("page@1", 1, "https://example.com/logo.png").await;
	let abort = driver.expect("abort").await;
	assert_eq!(abort["guid"], "route@1");
	assert_eq!(abort["params"]["errorCode"], "failed");
	driver.reply(&abort, json!({})).await;
}

#[tokio::test]
async fn fallback_walks_newest_to_oldest_then_reaches_network() {
	let (_playwright, mut driver, page) = setup_page().await;
	let order = Arc::new(Mutex::new(Vec::new()));

	let older = Arc::clone(&order);
	let (registered, _) = tokio::join!(
		page.route(UrlMatcher::glob("**/*").unwrap(), move |route: Route| {
			let order = Arc::clone(&older);
			async move {
				order.lock().push("older");
				route.fallback(None).await
			}
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();

	let newer = Arc::clone(&order);
	let (registered, _) = tokio::join!(
		page.route(UrlMatcher::glob("**/*").unwrap(), move |route: Route| {
			let order = Arc::clone(&newer);
			async move {
				order.lock().push("newer");
				let overrides = ContinueOverrides {
					url: Some("https://example.com/rewritten".to_string()),
					..Default::default()
				};
				route.fallback(Some(overrides)).await
			}
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();

	driver.pause_request("page@1", 1, "https://example.com/original").await;
	let resumed = driver.expect("continue").await;
	assert_eq!(resumed["guid"], "route@1");
	assert_eq!(resumed["params"]["isFallback"], true);
	assert_eq!(resumed["params"]["url"], "https://example.com/rewritten");
	driver.reply(&resumed, json!({})).await;

	assert_eq!(*order.lock(), vec!["newer", "older"]);
}

#[tokio::test]
async fn handler_with_times_expires_and_refreshes_patterns() {
	let (_playwright, mut driver, page) = setup_page().await;

	let (registered, _) = tokio::join!(
		page.route_with_options(UrlMatcher::glob("**/api/**").unwrap(), RouteOptions::times(1), |route: Route| async move {
			route.abort(None).await
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();

	driver.pause_request("page@1", 1, "https://example.com/api/users").await;
	let abort = driver.expect("abort").await;
	driver.reply(&abort, json!({})).await;
	let refreshed = driver.respond("setNetworkInterceptionPatterns").await;
	assert_eq!(refreshed["params"]["patterns"], json!([]));
	assert_eq!(page.route_count(), 0);

	driver.pause_request("page@1", 2, "https://example.com/api/users").await;
	let resumed = driver.expect("continue").await;
	assert_eq!(resumed["guid"], "route@2");
	driver.reply(&resumed, json!({})).await;
}

#[tokio::test]
async fn context_handler_sees_requests_pages_fell_back_on() {
	let (_playwright, mut driver, page) = setup_page().await;
	let context = page.context().unwrap();

	let (registered, patterns) = tokio::join!(
		context.route(UrlMatcher::glob("**/*").unwrap(), |route: Route| async move {
			route.abort(Some("blockedbyclient")).await
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();
	assert_eq!(patterns["guid"], "context@1");

	driver.pause_request("page@1", 1, "https://example.com/").await;
	let abort = driver.expect("abort").await;
	assert_eq!(abort["params"]["errorCode"], "blockedbyclient");
	driver.reply(&abort, json!({})).await;
}

/// Registers a handler that signals `started`, waits for `release`, then runs `finish`.
async fn blocking_handler<F>(
	page: &pwire::Page,
	driver: &mut common::FakeDriver,
	started: Arc<Notify>,
	release: Arc<Notify>,
	finish: F,
) where
	F: Fn(Route) -> futures_util::future::BoxFuture<'static, pwire::Result<()>> + Send + Sync + 'static,
{
	let finish = Arc::new(finish);
	let (registered, _) = tokio::join!(
		page.route(UrlMatcher::glob("**/*").unwrap(), move |route: Route| {
			let started = Arc::clone(&started);
			let release = Arc::clone(&release);
			let finish = Arc::clone(&finish);
			async move {
				started.notify_one();
				release.notified().await;
				finish(route).await
			}
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();
}

#[tokio::test]
async fn unroute_all_wait_waits_for_running_handler() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |route: Route| {
		Box::pin(async move { route.abort(None).await })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let unroute = tokio::spawn({
		let page = page.clone();
		async move { page.unroute_all(UnrouteBehavior::Wait).await }
	});
	let patterns = driver.respond("setNetworkInterceptionPatterns").await;
	assert_eq!(patterns["params"]["patterns"], json!([]));
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!unroute.is_finished());

	release.notify_one();
	let abort = driver.expect("abort").await;
	driver.reply(&abort, json!({})).await;
	tokio::time::timeout(STEP, unroute).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unroute_all_wait_reports_handler_failure() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |_: Route| {
		Box::pin(async move { Err(Error::InvalidArgument("boom".to_string())) })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let unroute = tokio::spawn({
		let page = page.clone();
		async move { page.unroute_all(UnrouteBehavior::Wait).await }
	});
	driver.respond("setNetworkInterceptionPatterns").await;
	release.notify_one();

	let err = tokio::time::timeout(STEP, unroute).await.unwrap().unwrap().unwrap_err();
	assert!(matches!(err, Error::HandlerFailed(ref message) if message.contains("boom")), "{err:?}");
}

#[tokio::test]
async fn unroute_all_ignore_errors_swallows_handler_failure() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |_: Route| {
		Box::pin(async move { Err(Error::InvalidArgument("boom".to_string())) })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let unroute = tokio::spawn({
		let page = page.clone();
		async move { page.unroute_all(UnrouteBehavior::IgnoreErrors).await }
	});
	driver.respond("setNetworkInterceptionPatterns").await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!unroute.is_finished());

	release.notify_one();
	tokio::time::timeout(STEP, unroute).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unroute_all_default_returns_without_waiting() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |route: Route| {
		Box::pin(async move { route.abort(None).await })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let (unrouted, _) = tokio::join!(page.unroute_all(UnrouteBehavior::Default), driver.respond("setNetworkInterceptionPatterns"));
	unrouted.unwrap();
	assert_eq!(page.route_count(), 0);
	release.notify_one();
}

#[tokio::test]
async fn route_resolved_after_page_close_succeeds() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), move |route: Route| {
		let outcome_tx = outcome_tx.clone();
		Box::pin(async move {
			let result = route.fulfill(Default::default()).await;
			let _ = outcome_tx.send(result.is_ok());
			result
		})
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	driver.event("page@1", "close", json!({})).await;
	common::eventually(|| page.is_closed()).await;
	release.notify_one();

	let resolved = tokio::time::timeout(STEP, outcome_rx.recv()).await.unwrap().unwrap();
	assert!(resolved);
}

#[tokio::test]
async fn unrouted_handler_blocked_mid_invocation_still_falls_back_once() {
	let (_playwright, mut driver, page) = setup_page().await;
	let first_calls = Arc::new(AtomicUsize::new(0));

	let counter = Arc::clone(&first_calls);
	let (registered, _) = tokio::join!(
		page.route(UrlMatcher::glob("**/*").unwrap(), move |route: Route| {
			counter.fetch_add(1, Ordering::SeqCst);
			async move { route.continue_(None).await }
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	registered.unwrap();

	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	let (second, _) = tokio::join!(
		page.route(UrlMatcher::glob("**/*").unwrap(), {
			let started = Arc::clone(&started);
			let release = Arc::clone(&release);
			move |route: Route| {
				let started = Arc::clone(&started);
				let release = Arc::clone(&release);
				async move {
					started.notify_one();
					release.notified().await;
					route.fallback(None).await
				}
			}
		}),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	let second = second.unwrap();

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let all = UrlMatcher::glob("**/*").unwrap();
	let (unrouted, patterns) = tokio::join!(
		page.unroute(&all, Some(second)),
		driver.respond("setNetworkInterceptionPatterns"),
	);
	unrouted.unwrap();
	assert_eq!(patterns["params"]["patterns"], json!([{ "glob": "**/*" }]));
	assert_eq!(page.route_count(), 1);

	release.notify_one();
	let resumed = driver.expect("continue").await;
	assert_eq!(resumed["guid"], "route@1");
	driver.reply(&resumed, json!({})).await;
	assert_eq!(first_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn context_close_returns_while_route_handler_sleeps() {
	let (_playwright, mut driver, page) = setup_page().await;
	let context = page.context().unwrap();
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |route: Route| {
		Box::pin(async move { route.abort(None).await })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let (closed, request) = tokio::time::timeout(STEP, async { tokio::join!(context.close(), driver.respond("close")) })
		.await
		.unwrap();
	closed.unwrap();
	assert_eq!(request["guid"], "context@1");
	assert!(context.is_closed());
}

#[tokio::test]
async fn page_close_returns_while_route_handler_sleeps() {
	let (_playwright, mut driver, page) = setup_page().await;
	let started = Arc::new(Notify::new());
	let release = Arc::new(Notify::new());
	blocking_handler(&page, &mut driver, Arc::clone(&started), Arc::clone(&release), |route: Route| {
		Box::pin(async move { route.abort(None).await })
	})
	.await;

	driver.pause_request("page@1", 1, "https://example.com/").await;
	tokio::time::timeout(STEP, started.notified()).await.unwrap();

	let (closed, request) = tokio::time::timeout(STEP, async { tokio::join!(page.close(), driver.respond("close")) })
		.await
		.unwrap();
	closed.unwrap();
	assert_eq!(request["guid"], "page@1");
	assert!(page.is_closed());
}
