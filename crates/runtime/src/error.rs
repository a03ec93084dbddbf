//! Error types for the pwire runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], independent of its message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// The driver rejected a call and reported `{name, message, stack}`.
	Protocol,
	/// A call or wait exceeded its deadline.
	Timeout,
	/// The target object (or the whole connection) is gone.
	TargetClosed,
	/// The pipe failed or carried a frame we could not decode.
	Transport,
	/// Local misuse, launch failures and everything else.
	Other,
}

/// Errors that can occur in the pwire runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Driver executable was not found.
	#[error("Playwright driver not found. Install with: npm install playwright, or set PLAYWRIGHT_DRIVER_PATH")]
	ServerNotFound,

	/// Failed to launch the driver process.
	#[error("Failed to launch Playwright driver: {0}. Check that Node.js is installed.")]
	LaunchFailed(String),

	/// Failed to establish a connection with a remote driver.
	#[error("Failed to connect to Playwright driver: {0}")]
	ConnectionFailed(String),

	/// Transport-level failure (pipe or websocket).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// The driver sent something the runtime cannot accept.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error reported by the driver for a call.
	#[error("{name}: {message}")]
	Remote {
		/// Error class name (e.g. "TimeoutError", "Error", "TargetClosedError")
		name: String,
		message: String,
		/// JavaScript stack trace from the driver, if any
		stack: Option<String>,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Local deadline elapsed.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Target was closed or disposed.
	#[error("Target closed: Cannot perform operation on closed {target_type}. {context}")]
	TargetClosed { target_type: String, context: String },

	/// The connection terminated while the call was outstanding, or before it was issued.
	#[error("Connection closed: {0}")]
	ConnectionClosed(String),

	/// Object not found in the connection registry.
	#[error("Object not found: {guid}{}", expected.map(|t| format!(" (expected {t})")).unwrap_or_default())]
	ObjectNotFound { guid: String, expected: Option<&'static str> },

	/// Invalid argument provided to a method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// A user-supplied handler returned an error or panicked.
	#[error("Handler failed: {0}")]
	HandlerFailed(String),
}

impl Error {
	/// Returns the error class if this is a driver-reported error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the driver stack trace, if any.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::Timeout(_) => ErrorKind::Timeout,
			Error::TargetClosed { .. } | Error::ConnectionClosed(_) => ErrorKind::TargetClosed,
			Error::Remote { name, .. } => match name.as_str() {
				"TimeoutError" => ErrorKind::Timeout,
				"TargetClosedError" => ErrorKind::TargetClosed,
				_ => ErrorKind::Protocol,
			},
			Error::TransportError(_) | Error::ProtocolError(_) | Error::Io(_) => ErrorKind::Transport,
			_ => ErrorKind::Other,
		}
	}

	/// Returns true if this is a timeout error, local or driver-reported.
	pub fn is_timeout(&self) -> bool {
		self.kind() == ErrorKind::Timeout
	}

	/// Returns true if the target or the connection is gone.
	pub fn is_target_closed(&self) -> bool {
		self.kind() == ErrorKind::TargetClosed
	}

	/// Converts a caught panic payload into [`Error::HandlerFailed`].
	pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
		let message = payload
			.downcast_ref::<&str>()
			.map(|s| s.to_string())
			.or_else(|| payload.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| "non-string panic payload".to_string());
		Error::HandlerFailed(format!("panicked: {message}"))
	}

	pub fn target_closed(target_type: impl Into<String>, context: impl Into<String>) -> Self {
		Error::TargetClosed {
			target_type: target_type.into(),
			context: context.into(),
		}
	}
}
