//! Channel - call proxy bound to one object's guid.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::channel_owner::OwnerState;
use crate::connection::ConnectionLike;
use crate::error::Result;

/// Sends calls on behalf of a [`ChannelOwner`](crate::ChannelOwner).
///
/// Calls against an object that has already been disposed fail before
/// anything is written to the driver.
#[derive(Clone)]
pub struct Channel {
	guid: Arc<str>,
	type_name: String,
	connection: Arc<dyn ConnectionLike>,
	state: Arc<OwnerState>,
}

impl Channel {
	pub(crate) fn new(guid: Arc<str>, type_name: String, connection: Arc<dyn ConnectionLike>, state: Arc<OwnerState>) -> Self {
		Self {
			guid,
			type_name,
			connection,
			state,
		}
	}

	/// Sends `method` with untyped params and returns the untyped result.
	pub async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
		self.send_raw_with_timeout(method, params, None).await
	}

	/// Like [`send_raw`](Self::send_raw) with a local deadline.
	///
	/// On timeout the driver-side operation keeps running; its eventual reply is discarded.
	pub async fn send_raw_with_timeout(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
		if let Some(err) = self.state.closed_error(&self.type_name) {
			return Err(err);
		}
		self.connection.send_message(&self.guid, method, params, timeout).await
	}

	/// Sends a call and deserializes its result.
	pub async fn send<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		let response = self.send_raw(method, serde_json::to_value(params)?).await?;
		serde_json::from_value(response).map_err(Into::into)
	}

	pub async fn send_with_timeout<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P, timeout: Duration) -> Result<R> {
		let response = self.send_raw_with_timeout(method, serde_json::to_value(params)?, Some(timeout)).await?;
		serde_json::from_value(response).map_err(Into::into)
	}

	pub async fn send_no_params<R: DeserializeOwned>(&self, method: &str) -> Result<R> {
		self.send(method, serde_json::json!({})).await
	}

	/// Sends a call whose result is ignored.
	pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		self.send_raw(method, serde_json::to_value(params)?).await.map(|_| ())
	}

	/// Fire-and-forget call: written to the driver without waiting for a reply.
	pub fn send_no_reply<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		if let Some(err) = self.state.closed_error(&self.type_name) {
			return Err(err);
		}
		self.connection.send_no_reply(&self.guid, method, serde_json::to_value(params)?)
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}
}
