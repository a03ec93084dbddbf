use std::sync::Arc;

use serde_json::Value;

use crate::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, private};
use crate::connection::ConnectionLike;

/// Implicit object at guid `""`; the driver creates `Playwright` under it.
pub struct RootObject {
	base: ChannelOwnerImpl,
}

impl RootObject {
	pub fn new(connection: Arc<dyn ConnectionLike>) -> Self {
		Self {
			base: ChannelOwnerImpl::new(ParentOrConnection::Connection(connection), "Root", Arc::from(""), Value::Null),
		}
	}
}

impl private::Sealed for RootObject {}

impl ChannelOwner for RootObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}
