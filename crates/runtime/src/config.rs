//! Runtime configuration.
//!
//! Defaults match the driver's own defaults. [`RuntimeConfig::from_env`]
//! layers environment overrides on top.

use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for calls and waits, matching the driver.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Language tag reported to the driver during the handshake.
pub const SDK_LANGUAGE: &str = "rust";

/// Settings shared by a [`Connection`](crate::Connection) and everything it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
	/// Fallback for waits and actions without an explicit timeout.
	pub default_timeout: Duration,
	/// Fallback for navigations without an explicit timeout.
	pub navigation_timeout: Duration,
	/// Deadline for the `initialize` handshake.
	pub init_timeout: Duration,
	pub sdk_language: String,
	/// Explicit `(node, cli.js)` pair; skips driver discovery when set.
	pub driver: Option<(PathBuf, PathBuf)>,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			default_timeout: DEFAULT_TIMEOUT,
			navigation_timeout: DEFAULT_TIMEOUT,
			init_timeout: DEFAULT_TIMEOUT,
			sdk_language: SDK_LANGUAGE.to_string(),
			driver: None,
		}
	}
}

impl RuntimeConfig {
	/// Reads overrides from the environment.
	///
	/// - `PWIRE_DEFAULT_TIMEOUT_MS`, `PWIRE_NAVIGATION_TIMEOUT_MS`, `PWIRE_INIT_TIMEOUT_MS`
	/// - `PLAYWRIGHT_NODE_EXE` together with `PLAYWRIGHT_CLI_JS`
	///
	/// Unparseable values are ignored with a warning.
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let mut config = Self::default();
		if let Some(timeout) = millis(&lookup, "PWIRE_DEFAULT_TIMEOUT_MS") {
			config.default_timeout = timeout;
			config.navigation_timeout = timeout;
		}
		if let Some(timeout) = millis(&lookup, "PWIRE_NAVIGATION_TIMEOUT_MS") {
			config.navigation_timeout = timeout;
		}
		if let Some(timeout) = millis(&lookup, "PWIRE_INIT_TIMEOUT_MS") {
			config.init_timeout = timeout;
		}
		if let (Some(node), Some(cli)) = (lookup("PLAYWRIGHT_NODE_EXE"), lookup("PLAYWRIGHT_CLI_JS")) {
			config.driver = Some((PathBuf::from(node), PathBuf::from(cli)));
		}
		config
	}

	pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	pub fn with_driver(mut self, node: impl Into<PathBuf>, cli_js: impl Into<PathBuf>) -> Self {
		self.driver = Some((node.into(), cli_js.into()));
		self
	}
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
	let raw = lookup(key)?;
	match raw.trim().parse::<u64>() {
		Ok(ms) => Some(Duration::from_millis(ms)),
		Err(_) => {
			tracing::warn!(target: "pwire", key, value = %raw, "Ignoring invalid timeout override");
			None
		}
	}
}
