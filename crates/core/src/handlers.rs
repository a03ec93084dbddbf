//! Generic handler infrastructure.
//!
//! Route, websocket-route and locator handlers are stored as
//! [`HandlerEntry<E, M>`] values keyed by [`HandlerId`] in an [`IndexMap`],
//! which keeps registration order and gives O(1) removal.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use pwire_runtime::{Error, Result};

/// Unique identifier for handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Boxed async handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Handler function: `E` -> async `Result<()>`.
pub type HandlerFn<E> = Arc<dyn Fn(E) -> HandlerFuture + Send + Sync>;

/// Boxes a user closure into a [`HandlerFn`].
pub fn handler_fn<E, F, Fut>(handler: F) -> HandlerFn<E>
where
	F: Fn(E) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	Arc::new(move |event: E| -> HandlerFuture { Box::pin(handler(event)) })
}

/// Handler entry with metadata `M`.
///
/// - `E`: argument type ([`Route`], [`WebSocketRoute`], [`Locator`])
/// - `M`: metadata (matcher, counters, in-flight invocations)
///
/// [`Route`]: crate::Route
/// [`WebSocketRoute`]: crate::WebSocketRoute
/// [`Locator`]: crate::Locator
pub struct HandlerEntry<E, M = ()> {
	pub id: HandlerId,
	pub meta: M,
	pub handler: HandlerFn<E>,
}

impl<E, M: Clone> Clone for HandlerEntry<E, M> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			meta: self.meta.clone(),
			handler: Arc::clone(&self.handler),
		}
	}
}

/// Handler storage: [`IndexMap`] for O(1) removal with stable insertion order.
pub type HandlerMap<E, M = ()> = Arc<Mutex<IndexMap<HandlerId, HandlerEntry<E, M>>>>;

/// Runs one handler invocation, turning a panic into [`Error::HandlerFailed`].
///
/// The handler is called inside the guarded future, so a panic while
/// building the future is caught as well.
pub async fn invoke<E: Send + 'static>(handler: &HandlerFn<E>, arg: E) -> Result<()> {
	let handler = Arc::clone(handler);
	AssertUnwindSafe(async move { handler(arg).await })
		.catch_unwind()
		.await
		.unwrap_or_else(|panic| Err(Error::from_panic(panic)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_handler_id_increments() {
		let id1 = next_handler_id();
		let id2 = next_handler_id();
		let id3 = next_handler_id();
		assert!(id2 > id1);
		assert!(id3 > id2);
	}

	#[test]
	fn test_handler_map_keeps_insertion_order() {
		let map: HandlerMap<String> = Arc::new(Mutex::new(IndexMap::new()));
		let ids: Vec<HandlerId> = (0..3).map(|_| next_handler_id()).collect();
		for id in &ids {
			map.lock().insert(
				*id,
				HandlerEntry {
					id: *id,
					meta: (),
					handler: handler_fn(|_: String| async { Ok(()) }),
				},
			);
		}
		map.lock().shift_remove(&ids[1]);
		let remaining: Vec<HandlerId> = map.lock().keys().copied().collect();
		assert_eq!(remaining, vec![ids[0], ids[2]]);
	}

	#[tokio::test]
	async fn test_invoke_passes_result_through() {
		let ok: HandlerFn<u32> = handler_fn(|_: u32| async { Ok(()) });
		assert!(invoke(&ok, 1).await.is_ok());

		let failing: HandlerFn<u32> = handler_fn(|n: u32| async move { Err(Error::InvalidArgument(format!("bad {n}"))) });
		let err = invoke(&failing, 7).await.unwrap_err();
		assert!(err.to_string().contains("bad 7"));
	}

	#[tokio::test]
	async fn test_invoke_catches_panics() {
		let panicking: HandlerFn<u32> = handler_fn(|n: u32| async move {
			if n == 0 {
				panic!("handler bug");
			}
			Ok(())
		});
		let err = invoke(&panicking, 0).await.unwrap_err();
		assert!(matches!(err, Error::HandlerFailed(_)));
		assert!(err.to_string().contains("handler bug"));

		let eager: HandlerFn<u32> = Arc::new(|_: u32| -> HandlerFuture { panic!("before the future") });
		assert!(invoke(&eager, 0).await.unwrap_err().to_string().contains("before the future"));
	}
}
