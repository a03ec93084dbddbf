//! Pending-call table.
//!
//! Every outstanding call has exactly one entry from the moment its request
//! is queued until its reply arrives, its caller gives up, or the connection
//! closes. Closing the table fails every remaining caller with the cause and
//! rejects later registrations.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

pub(crate) type ReplySender = oneshot::Sender<Result<Value>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Value>>;

struct PendingCall {
	method: String,
	/// `None` once the caller stopped waiting (timeout, drop, or no-reply call).
	reply: Option<ReplySender>,
}

#[derive(Default)]
struct Inner {
	calls: HashMap<u32, PendingCall>,
	closed: Option<String>,
}

/// What happened to a reply handed to [`PendingCalls::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
	/// Delivered to a waiting caller.
	Delivered,
	/// The call existed but nobody waits for it any more.
	Discarded,
	/// No call with that id.
	Unknown,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
	inner: Mutex<Inner>,
}

impl PendingCalls {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Adds an entry for `id` and returns the receiver its reply lands on.
	pub(crate) fn register(&self, id: u32, method: &str) -> Result<ReplyReceiver> {
		let (tx, rx) = oneshot::channel();
		self.insert(id, method, Some(tx))?;
		Ok(rx)
	}

	/// Adds an entry whose reply is dropped on arrival.
	pub(crate) fn register_no_reply(&self, id: u32, method: &str) -> Result<()> {
		self.insert(id, method, None)
	}

	fn insert(&self, id: u32, method: &str, reply: Option<ReplySender>) -> Result<()> {
		let mut inner = self.inner.lock();
		if let Some(cause) = &inner.closed {
			return Err(Error::ConnectionClosed(cause.clone()));
		}
		inner.calls.insert(
			id,
			PendingCall {
				method: method.to_string(),
				reply,
			},
		);
		Ok(())
	}

	/// Removes the entry for `id` and delivers `result` to its caller.
	pub(crate) fn resolve(&self, id: u32, result: Result<Value>) -> Resolution {
		let Some(call) = self.inner.lock().calls.remove(&id) else {
			return Resolution::Unknown;
		};
		match call.reply {
			Some(reply) => match reply.send(result) {
				Ok(()) => Resolution::Delivered,
				Err(_) => Resolution::Discarded,
			},
			None => {
				tracing::debug!(target: "pwire", id, method = %call.method, "Discarding reply for abandoned call");
				Resolution::Discarded
			}
		}
	}

	/// Keeps the entry so a late reply is recognised, but stops delivering it.
	pub(crate) fn abandon(&self, id: u32) {
		if let Some(call) = self.inner.lock().calls.get_mut(&id) {
			call.reply = None;
		}
	}

	/// Drops the entry entirely (the request never made it onto the wire).
	pub(crate) fn forget(&self, id: u32) {
		self.inner.lock().calls.remove(&id);
	}

	/// Fails every waiting caller with `cause` and refuses new entries.
	///
	/// Returns how many callers were failed. Idempotent: only the first
	/// cause is kept.
	pub(crate) fn close(&self, cause: &str) -> usize {
		let drained: Vec<PendingCall> = {
			let mut inner = self.inner.lock();
			if inner.closed.is_none() {
				inner.closed = Some(cause.to_string());
			}
			inner.calls.drain().map(|(_, call)| call).collect()
		};
		let mut failed = 0;
		for call in drained {
			if let Some(reply) = call.reply {
				let _ = reply.send(Err(Error::ConnectionClosed(cause.to_string())));
				failed += 1;
			}
		}
		failed
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.inner.lock().closed.is_some()
	}

	pub(crate) fn len(&self) -> usize {
		self.inner.lock().calls.len()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn reply_is_delivered_once() {
		let pending = PendingCalls::new();
		let rx = pending.register(1, "goto").unwrap();

		assert_eq!(pending.resolve(1, Ok(json!({"ok": true}))), Resolution::Delivered);
		assert_eq!(rx.await.unwrap().unwrap()["ok"], true);
		assert_eq!(pending.resolve(1, Ok(json!({}))), Resolution::Unknown);
		assert_eq!(pending.len(), 0);
	}

	#[test]
	fn abandoned_reply_is_discarded() {
		let pending = PendingCalls::new();
		let _rx = pending.register(7, "click").unwrap();
		pending.abandon(7);

		assert_eq!(pending.resolve(7, Ok(json!({}))), Resolution::Discarded);
		assert_eq!(pending.len(), 0);
	}

	#[test]
	fn dropped_caller_counts_as_discarded() {
		let pending = PendingCalls::new();
		drop(pending.register(2, "click").unwrap());
		assert_eq!(pending.resolve(2, Ok(json!({}))), Resolution::Discarded);
	}

	#[tokio::test]
	async fn close_fails_waiters_and_rejects_new_calls() {
		let pending = PendingCalls::new();
		let first = pending.register(1, "a").unwrap();
		let second = pending.register(2, "b").unwrap();
		pending.register_no_reply(3, "c").unwrap();

		assert_eq!(pending.close("driver exited"), 2);
		assert_eq!(pending.len(), 0);
		assert!(pending.is_closed());

		for rx in [first, second] {
			let err = rx.await.unwrap().unwrap_err();
			assert!(err.is_target_closed());
			assert!(err.to_string().contains("driver exited"));
		}

		let err = pending.register(4, "d").unwrap_err();
		assert!(err.to_string().contains("driver exited"));

		assert_eq!(pending.close("second cause"), 0);
		let err = pending.register(5, "e").unwrap_err();
		assert!(err.to_string().contains("driver exited"));
	}

	#[test]
	fn forget_removes_entry() {
		let pending = PendingCalls::new();
		let _rx = pending.register(1, "a").unwrap();
		pending.forget(1);
		assert_eq!(pending.resolve(1, Ok(json!({}))), Resolution::Unknown);
	}
}
