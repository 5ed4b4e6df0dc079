//! Correlated request/response channel over one persistent connection.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`ControlChannel::send`] with a method, params and timeout
//! 2. The channel allocates the next id and registers it with the
//!    [`CorrelationRegistry`]
//! 3. `{id, method, params}` is serialized and written to the transport
//! 4. The caller parks in [`CorrelationRegistry::take`]
//! 5. The listener task parses inbound text; anything carrying an `id` is
//!    recorded, everything else is logged as an event
//! 6. The caller wakes with the payload, or with `Timeout`/`Closed`
//!
//! Responses are matched by id only, so replies may arrive in any order.
//! One deadline covers waiting for the writer, the write itself and the wait
//! for the reply, and [`ControlChannel::close`] cuts all three short.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use beacon_protocol::{Command, Inbound, Request, response_outcome};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::correlation::CorrelationRegistry;
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, WebSocketTransport};

/// How long `close` waits for an in-progress write before giving up on a clean close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// A request that has been issued and is awaiting its response.
#[derive(Debug, Clone)]
struct PendingRequest {
	id: u64,
	method: String,
	params: Value,
	issued_at: Instant,
}

/// Control channel bound to a single connection.
///
/// One channel owns one registry and one transport. The channel is safe to
/// share across tasks behind an `Arc`; concurrent `send` calls interleave
/// freely and are told apart by id.
pub struct ControlChannel {
	endpoint: String,
	/// Last id handed out; ids start at 1.
	last_id: AtomicU64,
	registry: Arc<CorrelationRegistry>,
	sender: Mutex<Box<dyn Transport>>,
	closed: AtomicBool,
	/// Flips to `true` on close; in-flight sends race against it.
	shutdown: watch::Sender<bool>,
	tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ControlChannel {
	/// Connects to a `ws://` or `wss://` endpoint and starts the listener.
	///
	/// Returns once the WebSocket handshake has completed, so the channel is
	/// immediately usable for [`send`](Self::send).
	pub async fn open(endpoint: &str) -> Result<Self> {
		let url = url::Url::parse(endpoint).map_err(|e| Error::connection(endpoint, e))?;
		if !matches!(url.scheme(), "ws" | "wss") {
			return Err(Error::connection(endpoint, format!("unsupported scheme `{}`", url.scheme())));
		}

		let (transport, message_rx) = WebSocketTransport::connect(endpoint).await?;
		Ok(Self::from_parts(endpoint, transport.into_transport_parts(message_rx)))
	}

	/// Builds a channel over already-connected transport halves.
	///
	/// Spawns the reader and listener tasks, so it must run inside a Tokio runtime.
	pub fn from_parts(endpoint: impl Into<String>, parts: TransportParts) -> Self {
		let endpoint = endpoint.into();
		let registry = Arc::new(CorrelationRegistry::new());
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let reader = tokio::spawn({
			let endpoint = endpoint.clone();
			async move {
				if let Err(e) = receiver.run().await {
					error!(target = "beacon.channel", endpoint = %endpoint, error = %e, "control transport failed");
				}
			}
		});
		let listener = tokio::spawn(listen(message_rx, Arc::clone(&registry)));

		Self {
			endpoint,
			last_id: AtomicU64::new(0),
			registry,
			sender: Mutex::new(sender),
			closed: AtomicBool::new(false),
			shutdown: watch::channel(false).0,
			tasks: parking_lot::Mutex::new(vec![reader, listener]),
		}
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst) || self.registry.is_closed()
	}

	/// Requests still waiting for a response.
	pub fn pending(&self) -> usize {
		self.registry.pending()
	}

	fn next_id(&self) -> u64 {
		self.last_id.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Sends `method` with `params` and waits up to `timeout` for the reply.
	///
	/// Returns the response payload without its `id` field, for example
	/// `{"result": {...}}` or `{"error": {...}}`. Use [`call`](Self::call) to
	/// unwrap `result` and turn `error` into [`Error::Remote`].
	///
	/// `timeout` bounds the whole exchange, including a write that never
	/// completes. A concurrent [`close`](Self::close) ends it with
	/// [`Error::Closed`].
	pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
		if self.is_closed() {
			return Err(self.not_connected());
		}

		let pending = PendingRequest {
			id: self.next_id(),
			method: method.to_string(),
			params,
			issued_at: Instant::now(),
		};
		let deadline = pending.issued_at + timeout;

		// Register before writing so a fast reply is never discarded.
		if !self.registry.expect(pending.id) {
			return Err(self.not_connected());
		}

		let mut shutdown = self.shutdown.subscribe();
		let outcome = tokio::select! {
			result = self.exchange(&pending, deadline) => result,
			_ = shutdown.wait_for(|closed| *closed) => Err(Error::Closed),
		};

		match outcome {
			Ok(payload) => {
				debug!(
					target = "beacon.channel",
					id = pending.id,
					method,
					elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
					"control response received"
				);
				Ok(payload)
			}
			Err(Error::Timeout { .. }) => {
				self.registry.forget(pending.id);
				warn!(target = "beacon.channel", id = pending.id, method, params = %pending.params, ?timeout, "control request timed out");
				Err(Error::timeout(format!("`{}` (request {})", pending.method, pending.id), timeout))
			}
			Err(e) => {
				self.registry.forget(pending.id);
				Err(e)
			}
		}
	}

	/// Writes the request and waits for its reply, all before `deadline`.
	async fn exchange(&self, pending: &PendingRequest, deadline: Instant) -> Result<Value> {
		let text = serde_json::to_string(&Request {
			id: pending.id,
			method: pending.method.clone(),
			params: pending.params.clone(),
		})?;

		debug!(target = "beacon.channel", id = pending.id, method = %pending.method, "sending control request");
		let write = async {
			let mut sender = self.sender.lock().await;
			sender.send(text).await
		};
		match tokio::time::timeout_at(deadline, write).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				warn!(target = "beacon.channel", id = pending.id, method = %pending.method, error = %e, "control request not sent");
				return Err(e);
			}
			Err(_) => {
				warn!(target = "beacon.channel", id = pending.id, method = %pending.method, "control request write stalled");
				return Err(Error::timeout("write", deadline.saturating_duration_since(pending.issued_at)));
			}
		}

		self.registry.take(pending.id, deadline.saturating_duration_since(Instant::now())).await
	}

	fn not_connected(&self) -> Error {
		Error::NotConnected(format!("control channel to {} is closed", self.endpoint))
	}

	/// Sends `command` and returns its `result`, mapping an `error` reply to [`Error::Remote`].
	pub async fn call(&self, command: &Command, timeout: Duration) -> Result<Value> {
		let payload = self.send(&command.method, command.params.clone(), timeout).await?;
		response_outcome(payload).map_err(Error::from)
	}

	/// Tears down the connection. Idempotent.
	///
	/// Callers parked in [`send`](Self::send) wake with [`Error::Closed`].
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		debug!(target = "beacon.channel", endpoint = %self.endpoint, "closing control channel");
		self.shutdown.send_replace(true);
		self.registry.close();

		match tokio::time::timeout(CLOSE_GRACE, self.sender.lock()).await {
			Ok(mut sender) => {
				if let Err(e) = sender.close().await {
					debug!(target = "beacon.channel", error = %e, "close frame not delivered");
				}
			}
			Err(_) => debug!(target = "beacon.channel", "writer busy; skipping close frame"),
		}

		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

impl Drop for ControlChannel {
	fn drop(&mut self) {
		self.shutdown.send_replace(true);
		self.registry.close();
		for task in self.tasks.get_mut().drain(..) {
			task.abort();
		}
	}
}

/// Routes inbound text to the registry until the transport ends.
async fn listen(mut message_rx: mpsc::UnboundedReceiver<String>, registry: Arc<CorrelationRegistry>) {
	while let Some(text) = message_rx.recv().await {
		match Inbound::parse(&text) {
			Ok(Inbound::Response { id, payload }) => {
				registry.record(id, payload);
			}
			Ok(Inbound::Event(event)) => {
				debug!(target = "beacon.channel", method = %event["method"], "ignoring control event");
			}
			Err(e) => {
				let err = Error::MalformedMessage(e.to_string());
				warn!(target = "beacon.channel", error = %err, "discarding inbound message");
			}
		}
	}

	debug!(target = "beacon.channel", "control transport ended");
	registry.close();
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::fake::FakeTransportBuilder;
	use serde_json::json;

	const FIVE_SECS: Duration = Duration::from_secs(5);

	#[tokio::test]
	async fn ids_start_at_one_and_increase() {
		let (parts, _controller) = FakeTransportBuilder::new().build();
		let channel = ControlChannel::from_parts("fake://peer", parts);

		assert_eq!(channel.next_id(), 1);
		assert_eq!(channel.next_id(), 2);
		assert_eq!(channel.next_id(), 3);
	}

	#[tokio::test]
	async fn send_writes_envelope_and_returns_payload() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let channel = ControlChannel::from_parts("fake://peer", parts);

		let send = channel.send("Page.navigate", json!({"url": "http://10.0.0.5"}), FIVE_SECS);
		let respond = async {
			controller.wait_sent(1).await;
			controller.inject_json(json!({"id": 1, "result": {}}));
		};
		let (payload, ()) = tokio::join!(send, respond);

		assert_eq!(payload.unwrap(), json!({"result": {}}));
		let sent = controller.take_sent();
		assert_eq!(sent, vec![json!({"id": 1, "method": "Page.navigate", "params": {"url": "http://10.0.0.5"}})]);
		assert_eq!(channel.pending(), 0);
	}

	#[tokio::test]
	async fn call_maps_remote_error() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let channel = ControlChannel::from_parts("fake://peer", parts);

		let command = Command::new("Foo.bar", json!({}));
		let call = channel.call(&command, FIVE_SECS);
		let respond = async {
			controller.wait_sent(1).await;
			controller.inject_error(1, -32601, "'Foo.bar' wasn't found");
		};
		let (result, ()) = tokio::join!(call, respond);

		match result.unwrap_err() {
			Error::Remote { code, message } => {
				assert_eq!(code, -32601);
				assert!(message.contains("Foo.bar"));
			}
			other => panic!("expected remote error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn malformed_and_event_frames_do_not_stop_listener() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let channel = ControlChannel::from_parts("fake://peer", parts);

		let send = channel.send("Runtime.evaluate", json!({"expression": "1"}), FIVE_SECS);
		let respond = async {
			controller.wait_sent(1).await;
			controller.inject("this is not json");
			controller.inject(r#"{"id":"one"}"#);
			controller.inject_event("Page.loadEventFired", json!({}));
			controller.inject_response(1, json!({"value": 1}));
		};
		let (payload, ()) = tokio::join!(send, respond);
		assert_eq!(payload.unwrap()["result"]["value"], 1);
	}

	#[tokio::test]
	async fn send_failure_is_transport_error() {
		let (parts, controller) = FakeTransportBuilder::new().fail_sends().build();
		let channel = ControlChannel::from_parts("fake://peer", parts);

		let err = channel.send("Page.navigate", json!({}), FIVE_SECS).await.unwrap_err();
		assert!(matches!(err, Error::Transport(_)), "unexpected error: {err:?}");
		assert_eq!(channel.pending(), 0);

		controller.set_fail_sends(false);
		let send = channel.send("Page.navigate", json!({}), FIVE_SECS);
		let respond = async {
			controller.wait_sent(1).await;
			controller.inject_response(2, json!({}));
		};
		let (payload, ()) = tokio::join!(send, respond);
		assert!(payload.is_ok());
	}

	#[tokio::test]
	async fn close_unblocks_in_flight_send() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let channel = Arc::new(ControlChannel::from_parts("fake://peer", parts));

		let in_flight = {
			let channel = Arc::clone(&channel);
			tokio::spawn(async move { channel.send("Page.navigate", json!({}), Duration::from_secs(60)).await })
		};
		controller.wait_sent(1).await;

		channel.close().await;
		channel.close().await;

		let err = in_flight.await.unwrap().unwrap_err();
		assert!(err.is_closed(), "unexpected error: {err:?}");
		assert!(controller.is_closed());

		let err = channel.send("Page.navigate", json!({}), FIVE_SECS).await.unwrap_err();
		assert!(matches!(err, Error::NotConnected(_)));
	}

	#[tokio::test]
	async fn peer_hang_up_unblocks_in_flight_send() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let channel = Arc::new(ControlChannel::from_parts("fake://peer", parts));

		let in_flight = {
			let channel = Arc::clone(&channel);
			tokio::spawn(async move { channel.send("Page.navigate", json!({}), Duration::from_secs(60)).await })
		};
		controller.wait_sent(1).await;
		controller.hang_up();

		let err = in_flight.await.unwrap().unwrap_err();
		assert!(err.is_closed());
		assert!(channel.is_closed());
	}

	#[tokio::test]
	async fn open_rejects_non_websocket_endpoint() {
		let err = ControlChannel::open("http://127.0.0.1:9222/json/version").await.err().unwrap();
		assert!(matches!(err, Error::Connection { .. }));
	}
}
