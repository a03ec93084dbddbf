//! Guid-keyed object registry with per-guid notification.
//!
//! Uses [`DashMap`] so the receive loop and callers can look objects up
//! concurrently. [`ObjectStore::wait_for`] registers its waiter before
//! checking the map, so an insert between the check and the await is never
//! missed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

/// Registry of live proxies by guid.
pub struct ObjectStore {
	objects: DashMap<Arc<str>, Arc<dyn ChannelOwner>>,
	waiters: DashMap<Arc<str>, Arc<Notify>>,
}

impl Default for ObjectStore {
	fn default() -> Self {
		Self::new()
	}
}

impl ObjectStore {
	pub fn new() -> Self {
		Self {
			objects: DashMap::new(),
			waiters: DashMap::new(),
		}
	}

	/// Inserts `obj` unless the guid is taken; wakes waiters on success.
	pub fn try_insert(&self, guid: Arc<str>, obj: Arc<dyn ChannelOwner>) -> Result<()> {
		match self.objects.entry(Arc::clone(&guid)) {
			dashmap::mapref::entry::Entry::Occupied(_) => {
				return Err(Error::ProtocolError(format!("Duplicate guid: {guid}")));
			}
			dashmap::mapref::entry::Entry::Vacant(slot) => {
				slot.insert(obj);
			}
		}
		if let Some((_, notify)) = self.waiters.remove(&guid) {
			notify.notify_waiters();
		}
		Ok(())
	}

	pub fn remove(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.remove(guid).map(|(_, obj)| obj)
	}

	pub fn contains(&self, guid: &str) -> bool {
		self.objects.contains_key(guid)
	}

	pub fn try_get(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.objects.get(guid).map(|r| r.value().clone())
	}

	/// Snapshot of every registered object.
	pub fn values(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.objects.iter().map(|r| r.value().clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	/// Waits until `guid` is registered or `timeout` elapses.
	pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn ChannelOwner>> {
		let g: Arc<str> = Arc::from(guid);
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			let notify = self.waiters.entry(g.clone()).or_insert_with(|| Arc::new(Notify::new())).clone();
			let notified = notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(obj) = self.try_get(&g) {
				return Ok(obj);
			}

			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return Err(Self::timeout_error(&g, timeout));
			}

			tokio::select! {
				biased;
				_ = &mut notified => {}
				_ = tokio::time::sleep(remaining) => {
					return Err(Self::timeout_error(&g, timeout));
				}
			}
		}
	}

	fn timeout_error(guid: &str, timeout: Duration) -> Error {
		let type_hint = guid.split_once('@').map(|(prefix, _)| prefix).unwrap_or("object");
		Error::Timeout(format!("Timeout {}ms exceeded while waiting for {type_hint} {guid}", timeout.as_millis()))
	}
}
