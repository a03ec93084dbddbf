//! [`Playwright`]: the root proxy and the crate's entry point.
//!
//! [`Playwright::launch`] spawns a local driver, [`Playwright::connect`]
//! attaches to a remote one over websocket. Both spawn the connection's
//! receive loop and keep it alive until [`Playwright::shutdown`].

use std::sync::Arc;

use parking_lot::Mutex;
use pwire_protocol::guid_ref;
use pwire_runtime::channel_owner::private;
use pwire_runtime::{
	ChannelOwner, ChannelOwnerImpl, Connection, DriverProcess, Error, ParentOrConnection, Result, RuntimeConfig, TransportParts,
	WebSocketTransport,
};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::BrowserType;
use crate::object_factory::TypedObjectFactory;

/// Gives access to the browser engines.
///
/// # Example
///
/// ```ignore
/// let playwright = Playwright::launch(RuntimeConfig::from_env()).await?;
/// let browser = playwright.chromium().launch().await?;
/// let page = browser.new_page().await?;
/// page.goto("https://example.com", GotoOptions::default()).await?;
/// browser.close().await?;
/// playwright.shutdown().await?;
/// ```
///
/// See <https://playwright.dev/docs/api/class-playwright>
#[derive(Clone)]
pub struct Playwright {
	base: ChannelOwnerImpl,
	chromium: BrowserType,
	firefox: BrowserType,
	webkit: BrowserType,
	session: Arc<Mutex<Option<Session>>>,
}

/// What keeps a connection alive.
struct Session {
	connection: Arc<Connection>,
	driver: Option<DriverProcess>,
	run_loop: JoinHandle<()>,
}

impl Playwright {
	/// Spawns a local driver and connects to it over its stdio pipes.
	///
	/// # Errors
	///
	/// Fails if the driver cannot be located or started, or if it does not
	/// announce the root object within `config.init_timeout`.
	pub async fn launch(config: RuntimeConfig) -> Result<Self> {
		let mut driver = DriverProcess::launch(&config).await?;
		let parts = match driver.take_transport() {
			Ok(parts) => parts,
			Err(err) => {
				let _ = driver.kill().await;
				return Err(err);
			}
		};
		Self::start(parts, config, Some(driver)).await
	}

	/// Connects to a driver listening on `ws_endpoint`.
	pub async fn connect(ws_endpoint: &str, headers: &[(String, String)], config: RuntimeConfig) -> Result<Self> {
		tracing::debug!(target: "pwire", %ws_endpoint, "Connecting to driver");
		let parts = WebSocketTransport::connect(ws_endpoint, headers).await?;
		Self::start(parts, config, None).await
	}

	/// Runs the protocol over an already established transport.
	pub async fn connect_transport(parts: TransportParts, config: RuntimeConfig) -> Result<Self> {
		Self::start(parts, config, None).await
	}

	async fn start(parts: TransportParts, config: RuntimeConfig, driver: Option<DriverProcess>) -> Result<Self> {
		let connection = Arc::new(Connection::new(parts, config));
		connection.set_factory(Arc::new(TypedObjectFactory));

		let run_loop = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});

		let playwright = match Self::initialize(&connection).await {
			Ok(playwright) => playwright,
			Err(err) => {
				connection.close();
				let _ = run_loop.await;
				if let Some(driver) = driver {
					let _ = driver.kill().await;
				}
				return Err(err);
			}
		};

		*playwright.session.lock() = Some(Session {
			connection,
			driver,
			run_loop,
		});
		Ok(playwright)
	}

	async fn initialize(connection: &Arc<Connection>) -> Result<Self> {
		let object = connection.initialize().await?;
		object
			.downcast_ref::<Playwright>()
			.cloned()
			.ok_or_else(|| Error::ProtocolError(format!("initialize returned a {}, not Playwright", object.type_name())))
	}

	pub fn new(parent: Arc<dyn ChannelOwner>, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Self> {
		let base = ChannelOwnerImpl::new(ParentOrConnection::Parent(parent), type_name, guid, initializer);
		let chromium = Self::browser_type(&base, "chromium")?;
		let firefox = Self::browser_type(&base, "firefox")?;
		let webkit = Self::browser_type(&base, "webkit")?;
		Ok(Self {
			base,
			chromium,
			firefox,
			webkit,
			session: Arc::default(),
		})
	}

	/// Browser types are created before the root object that references them.
	fn browser_type(base: &ChannelOwnerImpl, key: &str) -> Result<BrowserType> {
		let guid = guid_ref(base.initializer(), key)
			.ok_or_else(|| Error::ProtocolError(format!("Playwright initializer missing '{key}'")))?;
		base.resolve::<BrowserType>(guid, "BrowserType")
	}

	pub fn chromium(&self) -> &BrowserType {
		&self.chromium
	}

	pub fn firefox(&self) -> &BrowserType {
		&self.firefox
	}

	pub fn webkit(&self) -> &BrowserType {
		&self.webkit
	}

	/// Closes the connection and stops the driver this instance spawned.
	///
	/// Pending calls fail with a connection-closed error. Safe to call twice.
	pub async fn shutdown(&self) -> Result<()> {
		let Some(session) = self.session.lock().take() else {
			return Ok(());
		};
		tracing::debug!(target: "pwire", "Shutting down");
		session.connection.close();
		if let Err(err) = session.run_loop.await {
			tracing::warn!(target: "pwire", error = %err, "Receive loop ended abnormally");
		}
		match session.driver {
			Some(driver) => driver.shutdown().await,
			None => Ok(()),
		}
	}
}

impl private::Sealed for Playwright {}

impl ChannelOwner for Playwright {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

impl std::fmt::Debug for Playwright {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Playwright").field("guid", &self.guid()).finish()
	}
}
