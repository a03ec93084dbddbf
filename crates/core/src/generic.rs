//! Stand-in for driver types without a typed proxy (Artifact, Tracing, LocalUtils, ...).

use std::sync::Arc;

use pwire_runtime::channel_owner::private;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use serde_json::Value;

/// Untyped proxy: lifecycle and raw calls through [`ChannelOwner::call`] only.
#[derive(Clone)]
pub struct GenericObject {
	base: ChannelOwnerImpl,
}

impl GenericObject {
	pub fn new(parent: ParentOrConnection, type_name: String, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(parent, type_name, guid, initializer),
		}
	}
}

impl private::Sealed for GenericObject {}

impl ChannelOwner for GenericObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for GenericObject {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GenericObject")
			.field("type_name", &self.type_name())
			.field("guid", &self.guid())
			.finish()
	}
}
