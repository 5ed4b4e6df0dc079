//! Control-channel transports.
//!
//! A transport is split into two halves so the writer can be shared by every
//! caller while the reader runs on its own task:
//!
//! * [`Transport`]: the write half. Sends one text frame at a time.
//! * [`TransportReceiver`]: the read half. Runs until the connection ends and
//!   forwards every inbound text frame to the paired `message_rx`.
//!
//! [`TransportParts`] bundles both halves with that receiver so the
//! [`ControlChannel`](crate::channel::ControlChannel) can be built over a real
//! WebSocket or over the in-memory [`fake`] transport used by tests.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;

pub mod fake;
mod websocket;

pub use websocket::WebSocketTransport;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Write half of a control-channel connection.
pub trait Transport: Send {
	/// Sends one text frame.
	fn send(&mut self, text: String) -> TransportFuture<'_>;

	/// Closes the connection from our side.
	fn close(&mut self) -> TransportFuture<'_>;
}

/// Read half of a control-channel connection.
pub trait TransportReceiver: Send {
	/// Reads until the connection ends, forwarding inbound frames.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// Both halves of a connection plus the stream of inbound text.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<String>,
}
