//! WebSocket transport over `tokio-tungstenite`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connected WebSocket, not yet split into its halves.
pub struct WebSocketTransport {
	url: String,
	stream: WsStream,
	message_tx: mpsc::UnboundedSender<String>,
}

impl WebSocketTransport {
	/// Opens a WebSocket to `url` and completes the handshake.
	///
	/// Returns the transport together with the receiver that yields inbound
	/// text once the read half is running.
	pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
		info!(target = "beacon.channel", url, "connecting control channel");
		let (stream, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| Error::connection(url, e))?;
		info!(target = "beacon.channel", url, "control channel open");

		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			url: url.to_string(),
			stream,
			message_tx,
		};
		Ok((transport, message_rx))
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Splits the socket into the halves a [`ControlChannel`] runs on.
	///
	/// [`ControlChannel`]: crate::channel::ControlChannel
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<String>) -> TransportParts {
		let (sink, stream) = self.stream.split();
		TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver {
				url: self.url,
				stream,
				message_tx: self.message_tx,
			}),
			message_rx,
		}
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, text: String) -> TransportFuture<'_> {
		Box::pin(async move {
			self.sink
				.send(Message::Text(text.into()))
				.await
				.map_err(|e| Error::Transport(format!("failed to send WebSocket frame: {e}")))
		})
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::Transport(format!("failed to close WebSocket: {e}")))
		})
	}
}

struct WebSocketReceiver {
	url: String,
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<String>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let text = match frame {
					Ok(Message::Text(text)) => text.to_string(),
					Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
						Ok(text) => text,
						Err(_) => {
							warn!(target = "beacon.channel", len = bytes.len(), "ignoring non-UTF-8 binary frame");
							continue;
						}
					},
					Ok(Message::Close(frame)) => {
						debug!(target = "beacon.channel", url = %self.url, ?frame, "peer closed control channel");
						break;
					}
					Ok(_) => continue,
					Err(e) => return Err(Error::Transport(format!("WebSocket read failed: {e}"))),
				};

				if self.message_tx.send(text).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
