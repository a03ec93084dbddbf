//! Length-prefixed JSON over a pair of pipes (the driver's stdin/stdout).
//!
//! Frame layout: `[u32 little-endian payload length][UTF-8 JSON payload]`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Frames above this size are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Pipe transport before it is split into halves.
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

/// Writer half of [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

/// Reader half of [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `stdin` and reading from `stdout`.
	///
	/// Decoded frames arrive on the returned receiver once [`run`](Self::run) is driven.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender { stdin },
			receiver: PipeTransportReceiver { stdout, message_tx },
		};
		(transport, message_rx)
	}

	/// Writes one frame.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		self.sender.write_frame(&message).await
	}

	/// Runs the read loop in place.
	pub async fn run(&mut self) -> Result<()> {
		self.receiver.read_loop().await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(self.sender, self.receiver)
	}

	/// Boxes both halves for a [`Connection`](crate::Connection).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: Box::new(self.sender),
			receiver: Box::new(self.receiver),
			message_rx,
		}
	}
}

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
	async fn write_frame(&mut self, message: &Value) -> Result<()> {
		let payload = serde_json::to_vec(message)?;
		let len = u32::try_from(payload.len())
			.map_err(|_| Error::TransportError(format!("Frame of {} bytes exceeds u32 length prefix", payload.len())))?;

		let mut frame = Vec::with_capacity(4 + payload.len());
		frame.extend_from_slice(&len.to_le_bytes());
		frame.extend_from_slice(&payload);

		self.stdin
			.write_all(&frame)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write frame: {e}")))?;
		self.stdin
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to flush frame: {e}")))
	}
}

impl<R: AsyncRead + Unpin + Send> PipeTransportReceiver<R> {
	async fn read_loop(&mut self) -> Result<()> {
		loop {
			let mut len_buf = [0u8; 4];
			self.stdout
				.read_exact(&mut len_buf)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;

			let len = u32::from_le_bytes(len_buf) as usize;
			if len > MAX_FRAME_LEN {
				return Err(Error::ProtocolError(format!("Frame length {len} exceeds limit of {MAX_FRAME_LEN} bytes")));
			}

			let mut payload = vec![0u8; len];
			self.stdout
				.read_exact(&mut payload)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read message: {e}")))?;

			let message: Value =
				serde_json::from_slice(&payload).map_err(|e| Error::ProtocolError(format!("Malformed frame ({len} bytes): {e}")))?;

			if self.message_tx.send(message).is_err() {
				tracing::debug!(target: "pwire", "Frame consumer dropped; stopping pipe reader");
				return Ok(());
			}
		}
	}
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { self.write_frame(&message).await })
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { self.stdin.shutdown().await.map_err(Error::from) })
	}
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move { self.read_loop().await })
	}
}
