//! Driver process management.
//!
//! Spawns `node <cli.js> run-driver` with piped stdio. The pipes become a
//! [`PipeTransport`]; stderr is forwarded line by line to `tracing`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::{RuntimeConfig, SDK_LANGUAGE};
use crate::driver::locate_driver;
use crate::error::{Error, Result};
use crate::transport::{PipeTransport, TransportParts};

/// Environment variables forwarded to the driver unchanged.
const PASSTHROUGH_ENV: &[&str] = &["PLAYWRIGHT_BROWSERS_PATH", "PLAYWRIGHT_SKIP_BROWSER_DOWNLOAD"];

/// A running driver child process.
#[derive(Debug)]
pub struct DriverProcess {
	process: Child,
}

impl DriverProcess {
	/// Locates and spawns the driver.
	///
	/// # Errors
	///
	/// Returns `Error::ServerNotFound` if no driver can be located and
	/// `Error::LaunchFailed` if the process cannot be spawned or exits at once.
	pub async fn launch(config: &RuntimeConfig) -> Result<Self> {
		let (node_exe, cli_js) = locate_driver(config)?;
		tracing::debug!(target: "pwire::driver", node = %node_exe.display(), cli = %cli_js.display(), "Launching driver");

		let mut cmd = Command::new(&node_exe);
		cmd.arg(&cli_js)
			.arg("run-driver")
			.env("PW_LANG_NAME", SDK_LANGUAGE)
			.env("PW_LANG_NAME_VERSION", env!("CARGO_PKG_RUST_VERSION"))
			.env("PW_CLI_DISPLAY_VERSION", env!("CARGO_PKG_VERSION"))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		for key in PASSTHROUGH_ENV {
			if let Ok(value) = std::env::var(key) {
				cmd.env(key, value);
			}
		}

		let mut child = cmd.spawn().map_err(|e| Error::LaunchFailed(format!("Failed to spawn process: {e}")))?;

		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(async move {
				let mut lines = BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					tracing::debug!(target: "pwire::driver", "{line}");
				}
			});
		}

		tokio::time::sleep(Duration::from_millis(100)).await;
		match child.try_wait() {
			Ok(Some(status)) => Err(Error::LaunchFailed(format!("Driver exited immediately with status: {status}"))),
			Ok(None) => Ok(Self { process: child }),
			Err(e) => Err(Error::LaunchFailed(format!("Failed to check process status: {e}"))),
		}
	}

	/// Takes the child's stdio and wraps it as a transport.
	pub fn take_transport(&mut self) -> Result<TransportParts> {
		let stdin = self.process.stdin.take().ok_or_else(|| Error::TransportError("driver stdin already taken".to_string()))?;
		let stdout = self
			.process
			.stdout
			.take()
			.ok_or_else(|| Error::TransportError("driver stdout already taken".to_string()))?;
		let (transport, message_rx) = PipeTransport::new(stdin, stdout);
		Ok(transport.into_transport_parts(message_rx))
	}

	pub fn id(&self) -> Option<u32> {
		self.process.id()
	}

	/// Closes stdin, giving the driver a chance to exit, then kills it.
	pub async fn shutdown(mut self) -> Result<()> {
		drop(self.process.stdin.take());
		drop(self.process.stdout.take());

		let waited = tokio::time::timeout(Duration::from_secs(5), self.process.wait()).await;
		match waited {
			Ok(Ok(_)) => Ok(()),
			Ok(Err(e)) => Err(Error::LaunchFailed(format!("Failed to wait for process: {e}"))),
			Err(_) => self.kill().await,
		}
	}

	/// Kills the driver without waiting for it to exit on its own.
	pub async fn kill(mut self) -> Result<()> {
		self.process
			.kill()
			.await
			.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {e}")))?;
		let _ = tokio::time::timeout(Duration::from_millis(500), self.process.wait()).await;
		Ok(())
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::os::unix::fs::PermissionsExt;

	use super::*;

	/// A fake `node` that ignores its arguments and echoes stdin to stdout.
	fn fake_node(dir: &std::path::Path) -> std::path::PathBuf {
		let path = dir.join("node");
		std::fs::write(&path, "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo v20.0.0; exit 0; fi\necho started >&2\nexec cat\n").unwrap();
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	#[tokio::test]
	async fn test_launch_and_echo() {
		let dir = tempfile::tempdir().unwrap();
		let node = fake_node(dir.path());
		let cli = dir.path().join("cli.js");
		std::fs::write(&cli, "").unwrap();

		let config = RuntimeConfig::default().with_driver(&node, &cli);
		let mut driver = DriverProcess::launch(&config).await.unwrap();
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = driver.take_transport().unwrap();
		let reader = tokio::spawn(receiver.run());

		sender.send(serde_json::json!({"id": 1, "result": {}})).await.unwrap();
		let echoed = message_rx.recv().await.unwrap();
		assert_eq!(echoed["id"], 1);

		assert!(driver.take_transport().is_err());
		drop(sender);
		driver.shutdown().await.unwrap();
		let _ = reader.await;
	}
}
