//! Per-owner default timeouts with a parent chain (page → context → config).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pwire_runtime::RuntimeConfig;

#[derive(Debug, Default)]
struct Overrides {
	timeout: Option<Duration>,
	navigation: Option<Duration>,
}

/// Shared handle; clones observe the same overrides.
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
	overrides: Arc<RwLock<Overrides>>,
	parent: Option<Box<TimeoutSettings>>,
	default_timeout: Duration,
	default_navigation_timeout: Duration,
}

impl TimeoutSettings {
	/// Root of a chain, falling back to `config`.
	pub fn new(config: &RuntimeConfig) -> Self {
		Self {
			overrides: Arc::default(),
			parent: None,
			default_timeout: config.default_timeout,
			default_navigation_timeout: config.navigation_timeout,
		}
	}

	/// Settings that fall back to `parent` where no override is set.
	pub fn with_parent(parent: &TimeoutSettings) -> Self {
		Self {
			overrides: Arc::default(),
			parent: Some(Box::new(parent.clone())),
			default_timeout: parent.default_timeout,
			default_navigation_timeout: parent.default_navigation_timeout,
		}
	}

	pub fn set_default_timeout(&self, timeout: Option<Duration>) {
		self.overrides.write().timeout = timeout;
	}

	pub fn set_default_navigation_timeout(&self, timeout: Option<Duration>) {
		self.overrides.write().navigation = timeout;
	}

	/// Timeout for an action; an explicit value wins.
	pub fn timeout(&self, explicit: Option<Duration>) -> Duration {
		if let Some(timeout) = explicit.or(self.overrides.read().timeout) {
			return timeout;
		}
		match &self.parent {
			Some(parent) => parent.timeout(None),
			None => self.default_timeout,
		}
	}

	pub fn navigation_timeout(&self, explicit: Option<Duration>) -> Duration {
		if let Some(timeout) = explicit.or(self.overrides.read().navigation) {
			return timeout;
		}
		match &self.parent {
			Some(parent) => parent.navigation_timeout(None),
			None => self.default_navigation_timeout,
		}
	}
}
