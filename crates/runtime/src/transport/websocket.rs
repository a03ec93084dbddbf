//! JSON records over a websocket, one record per text frame.
//!
//! Used to attach to a driver that is already running elsewhere
//! (`playwright run-server`).

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Entry point for websocket connections.
pub struct WebSocketTransport;

/// Writer half of a websocket transport.
pub struct WebSocketTransportSender {
	sink: SplitSink<WsStream, WsMessage>,
}

/// Reader half of a websocket transport.
pub struct WebSocketTransportReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl WebSocketTransport {
	/// Connects to `url`, sending `headers` with the upgrade request.
	pub async fn connect(url: &str, headers: &[(String, String)]) -> Result<TransportParts> {
		let mut request = url
			.into_client_request()
			.map_err(|e| Error::ConnectionFailed(format!("Invalid websocket endpoint {url}: {e}")))?;
		for (name, value) in headers {
			let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidArgument(format!("Header name {name:?}: {e}")))?;
			let value = HeaderValue::from_str(value).map_err(|e| Error::InvalidArgument(format!("Header value for {name}: {e}")))?;
			request.headers_mut().insert(name, value);
		}

		let (ws, _) = connect_async(request)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
		tracing::debug!(target: "pwire", url, "Websocket transport connected");

		let (sink, stream) = ws.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		Ok(TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { stream, message_tx }),
			message_rx,
		})
	}
}

impl Transport for WebSocketTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text))
				.await
				.map_err(|e| Error::TransportError(format!("Failed to write frame: {e}")))
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::TransportError(format!("Failed to close websocket: {e}")))
		})
	}
}

impl TransportReceiver for WebSocketTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let payload = match frame.map_err(|e| Error::TransportError(format!("Failed to read frame: {e}")))? {
					WsMessage::Text(text) => text.into_bytes(),
					WsMessage::Binary(bytes) => bytes,
					WsMessage::Close(frame) => {
						let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
						return Err(Error::TransportError(format!("Websocket closed by peer {reason}").trim_end().to_string()));
					}
					_ => continue,
				};
				let message: Value = serde_json::from_slice(&payload).map_err(|e| Error::ProtocolError(format!("Malformed frame: {e}")))?;
				if self.message_tx.send(message).is_err() {
					return Ok(());
				}
			}
			Err(Error::TransportError("Websocket stream ended".to_string()))
		})
	}
}
