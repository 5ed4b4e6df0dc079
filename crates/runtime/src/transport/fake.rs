//! In-memory transport for exercising correlation without a socket.
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let channel = ControlChannel::from_parts("fake://peer", parts);
//!
//! let send = channel.send("Page.navigate", json!({"url": "http://10.0.0.5"}), Duration::from_secs(5));
//! controller.inject_response(1, json!({}));
//! let payload = send.await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::Error;

/// Builder for a fake transport and its controller.
#[derive(Default)]
pub struct FakeTransportBuilder {
	fail_sends: bool,
	stall_sends: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every send fail with [`Error::Transport`] from the start.
	pub fn fail_sends(mut self) -> Self {
		self.fail_sends = true;
		self
	}

	/// Makes every send hang forever, like a peer that stopped reading.
	pub fn stall_sends(mut self) -> Self {
		self.stall_sends = true;
		self
	}

	/// Returns the parts for a channel plus a controller for the test side.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			sent: Mutex::new(Vec::new()),
			sent_notify: Notify::new(),
			fail_sends: AtomicBool::new(self.fail_sends),
			stall_sends: AtomicBool::new(self.stall_sends),
			closed: AtomicBool::new(false),
		});

		let parts = TransportParts {
			sender: Box::new(FakeTransportSender {
				shared: Arc::clone(&shared),
			}),
			receiver: Box::new(FakeTransportReceiver { inbound_rx, message_tx }),
			message_rx,
		};

		let controller = FakeTransportController {
			inbound_tx: Mutex::new(Some(inbound_tx)),
			shared,
		};

		(parts, controller)
	}
}

struct Shared {
	sent: Mutex<Vec<String>>,
	sent_notify: Notify,
	fail_sends: AtomicBool,
	stall_sends: AtomicBool,
	closed: AtomicBool,
}

/// Test-side handle: injects inbound frames and inspects outbound ones.
pub struct FakeTransportController {
	inbound_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
	shared: Arc<Shared>,
}

impl FakeTransportController {
	/// Delivers raw text as if the peer had sent it.
	pub fn inject(&self, text: impl Into<String>) {
		if let Some(tx) = self.inbound_tx.lock().as_ref() {
			let _ = tx.send(text.into());
		}
	}

	pub fn inject_json(&self, message: Value) {
		self.inject(message.to_string());
	}

	/// Delivers `{"id": id, "result": result}`.
	pub fn inject_response(&self, id: u64, result: Value) {
		self.inject_json(serde_json::json!({ "id": id, "result": result }));
	}

	/// Delivers `{"id": id, "error": {"code": code, "message": message}}`.
	pub fn inject_error(&self, id: u64, code: i64, message: &str) {
		self.inject_json(serde_json::json!({
			"id": id,
			"error": { "code": code, "message": message }
		}));
	}

	/// Delivers an id-less event notification.
	pub fn inject_event(&self, method: &str, params: Value) {
		self.inject_json(serde_json::json!({ "method": method, "params": params }));
	}

	/// Simulates the peer dropping the connection.
	pub fn hang_up(&self) {
		self.inbound_tx.lock().take();
	}

	/// Toggles send failure for subsequent sends.
	pub fn set_fail_sends(&self, fail: bool) {
		self.shared.fail_sends.store(fail, Ordering::SeqCst);
	}

	/// Toggles hanging for subsequent sends.
	pub fn set_stall_sends(&self, stall: bool) {
		self.shared.stall_sends.store(stall, Ordering::SeqCst);
	}

	/// Whether the channel closed its side.
	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::SeqCst)
	}

	/// Takes every frame sent so far, parsed as JSON.
	pub fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.shared.sent.lock())
			.into_iter()
			.filter_map(|text| serde_json::from_str(&text).ok())
			.collect()
	}

	/// Waits until at least `count` frames are buffered.
	pub async fn wait_sent(&self, count: usize) {
		loop {
			let notified = self.shared.sent_notify.notified();
			if self.shared.sent.lock().len() >= count {
				return;
			}
			notified.await;
		}
	}
}

struct FakeTransportSender {
	shared: Arc<Shared>,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, text: String) -> TransportFuture<'_> {
		Box::pin(async move {
			if self.shared.fail_sends.load(Ordering::SeqCst) {
				return Err(Error::Transport("fake transport send failure".into()));
			}
			if self.shared.stall_sends.load(Ordering::SeqCst) {
				std::future::pending::<()>().await;
			}
			self.shared.sent.lock().push(text);
			self.shared.sent_notify.notify_waiters();
			Ok(())
		})
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.shared.closed.store(true, Ordering::SeqCst);
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<String>,
	message_tx: mpsc::UnboundedSender<String>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
