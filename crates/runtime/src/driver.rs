//! Driver discovery.
//!
//! The driver is a Node.js program (`cli.js run-driver`). Locating it means
//! finding a runnable `node` plus the Playwright package's `cli.js`. Candidates
//! are tried in order:
//!
//! 1. an explicit pair from [`RuntimeConfig::driver`] (`PLAYWRIGHT_NODE_EXE` + `PLAYWRIGHT_CLI_JS`)
//! 2. `PLAYWRIGHT_DRIVER_PATH`, a directory laid out as `node` + `package/cli.js`
//! 3. the global npm root (`npm root -g`)
//! 4. the local npm root (`npm root`)
//!
//! Downloading a driver is not handled here.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};

/// Resolved `(node, cli.js)` pair.
pub type DriverPaths = (PathBuf, PathBuf);

/// Locates the driver using `config` and the process environment.
///
/// # Errors
///
/// Returns [`Error::ServerNotFound`] if no candidate has both a runnable node
/// and an existing `cli.js`.
pub fn locate_driver(config: &RuntimeConfig) -> Result<DriverPaths> {
	if let Some((node, cli)) = config.driver.clone().filter(|(_, cli)| cli.exists()) {
		if let Some(paths) = usable_or_fallback("config", node, cli, find_node_executable) {
			return Ok(paths);
		}
	}

	if let Some((node, cli)) = std::env::var_os("PLAYWRIGHT_DRIVER_PATH").and_then(|dir| driver_dir_layout(Path::new(&dir))) {
		if let Some(paths) = usable_or_fallback("PLAYWRIGHT_DRIVER_PATH", node, cli, find_node_executable) {
			return Ok(paths);
		}
	}

	for (label, args) in [("npm global", &["root", "-g"][..]), ("npm local", &["root"][..])] {
		let Some(cli) = npm_root(args).and_then(|node_modules| find_cli_in_node_modules(&node_modules)) else {
			continue;
		};
		let Ok(node) = find_node_executable() else {
			continue;
		};
		if let Some(paths) = usable_or_fallback(label, node, cli, find_node_executable) {
			return Ok(paths);
		}
	}

	Err(Error::ServerNotFound)
}

/// Expected files inside an unpacked driver directory.
pub fn driver_dir_layout(dir: &Path) -> Option<DriverPaths> {
	let node = if cfg!(windows) { dir.join("node.exe") } else { dir.join("node") };
	let cli = dir.join("package").join("cli.js");
	(node.exists() && cli.exists()).then_some((node, cli))
}

fn usable_or_fallback<F>(label: &str, node: PathBuf, cli: PathBuf, find_node: F) -> Option<DriverPaths>
where
	F: Fn() -> Result<PathBuf>,
{
	let usable = node_is_usable(&node);
	debug!(target: "pwire", source = label, node = %node.display(), cli = %cli.display(), usable, "Driver candidate");
	if usable {
		return Some((node, cli));
	}

	warn!(
		target: "pwire",
		source = label,
		node = %node.display(),
		"Driver candidate node is not runnable; trying fallback node"
	);

	let fallback = find_node().ok()?;
	if fallback == node || !node_is_usable(&fallback) {
		return None;
	}
	warn!(target: "pwire", source = label, node = %fallback.display(), "Using fallback node executable");
	Some((fallback, cli))
}

fn npm_root(args: &[&str]) -> Option<PathBuf> {
	let output = Command::new("npm").args(args).stderr(Stdio::null()).output().ok()?;
	if !output.status.success() {
		return None;
	}
	let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
	root.exists().then_some(root)
}

/// Finds `cli.js` of an installed Playwright package.
pub fn find_cli_in_node_modules(node_modules: &Path) -> Option<PathBuf> {
	[node_modules.join("playwright"), node_modules.join("playwright-core"), node_modules.join("@playwright").join("test")]
		.into_iter()
		.map(|dir| dir.join("cli.js"))
		.find(|cli| cli.exists())
}

fn node_is_usable(node: &Path) -> bool {
	Command::new(node)
		.arg("--version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.map(|status| status.success())
		.unwrap_or(false)
}

/// Finds `node` on `PATH` or in common install locations.
fn find_node_executable() -> Result<PathBuf> {
	#[cfg(not(windows))]
	let which_cmd = "which";
	#[cfg(windows)]
	let which_cmd = "where";

	if let Ok(output) = Command::new(which_cmd).arg("node").output() {
		let stdout = String::from_utf8_lossy(&output.stdout);
		if let Some(first) = stdout.lines().next().map(str::trim).filter(|line| output.status.success() && !line.is_empty()) {
			let path = PathBuf::from(first);
			if path.exists() {
				return Ok(path);
			}
		}
	}

	#[cfg(not(windows))]
	let common_locations = ["/usr/local/bin/node", "/usr/bin/node", "/opt/homebrew/bin/node"];
	#[cfg(windows)]
	let common_locations = ["C:\\Program Files\\nodejs\\node.exe"];

	common_locations
		.iter()
		.map(PathBuf::from)
		.find(|path| path.exists())
		.ok_or_else(|| Error::LaunchFailed("Node.js executable not found. Install Node.js or set PLAYWRIGHT_NODE_EXE.".to_string()))
}
