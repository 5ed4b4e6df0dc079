//! Correlation registry for in-flight control requests.
//!
//! Maps request ids to their eventual response payloads. The channel's
//! listener task calls [`CorrelationRegistry::record`] as replies arrive; the
//! caller that issued the request parks in [`CorrelationRegistry::take`] on a
//! oneshot until its id shows up, the timeout fires, or the registry closes.
//!
//! Each id moves through at most these states:
//!
//! ```text
//! (absent) --expect--> Expected --record--> Ready --take--> (absent)
//!                         |
//!                         +--take--> Waiting --record--> (absent, delivered)
//!                                       |
//!                                       +--timeout/drop--> (absent)
//! ```
//!
//! Records for absent ids are discarded, which covers both ids that were never
//! issued and ids whose caller already gave up.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};

enum Slot {
	Expected,
	Waiting(oneshot::Sender<Value>),
	Ready(Value),
}

#[derive(Default)]
struct Inner {
	slots: HashMap<u64, Slot>,
	closed: bool,
}

/// Thread-safe id -> response map with blocking, timeout-bounded retrieval.
#[derive(Default)]
pub struct CorrelationRegistry {
	inner: Mutex<Inner>,
}

impl CorrelationRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `id` as outstanding so a response arriving before [`take`]
	/// is kept rather than discarded.
	///
	/// Returns `false` once the registry is closed.
	///
	/// [`take`]: CorrelationRegistry::take
	pub fn expect(&self, id: u64) -> bool {
		let mut inner = self.inner.lock();
		if inner.closed {
			return false;
		}
		inner.slots.entry(id).or_insert(Slot::Expected);
		true
	}

	/// Stores `payload` under `id`, waking the caller parked on it.
	///
	/// Returns `false` when the payload was discarded: unknown id, id already
	/// consumed or timed out, or registry closed.
	pub fn record(&self, id: u64, payload: Value) -> bool {
		let mut inner = self.inner.lock();
		if inner.closed {
			debug!(target = "beacon.channel", id, "registry closed; discarding response");
			return false;
		}

		match inner.slots.remove(&id) {
			None => {
				debug!(target = "beacon.channel", id, "discarding response for unknown or expired id");
				false
			}
			Some(Slot::Waiting(tx)) => {
				trace!(target = "beacon.channel", id, "delivering response to waiter");
				tx.send(payload).is_ok()
			}
			Some(Slot::Expected | Slot::Ready(_)) => {
				inner.slots.insert(id, Slot::Ready(payload));
				true
			}
		}
	}

	/// Waits up to `timeout` for the response to `id` and removes it.
	///
	/// A zero timeout still returns a response that is already present. On
	/// [`Error::Timeout`] the slot is dropped so a late response is discarded.
	/// Closing the registry wakes the caller with [`Error::Closed`]. Only one
	/// caller may wait on an id; a second `take` fails with
	/// [`Error::AlreadyWaiting`] and leaves the first waiter in place.
	pub async fn take(&self, id: u64, timeout: Duration) -> Result<Value> {
		let mut rx = {
			let mut inner = self.inner.lock();
			if inner.closed {
				return Err(Error::Closed);
			}
			match inner.slots.remove(&id) {
				Some(Slot::Ready(payload)) => return Ok(payload),
				Some(waiting @ Slot::Waiting(_)) => {
					inner.slots.insert(id, waiting);
					return Err(Error::AlreadyWaiting(id));
				}
				Some(Slot::Expected) | None => {}
			}
			let (tx, rx) = oneshot::channel();
			inner.slots.insert(id, Slot::Waiting(tx));
			rx
		};

		let _guard = AbandonGuard { registry: self, id };
		match tokio::time::timeout(timeout, &mut rx).await {
			Ok(Ok(payload)) => Ok(payload),
			Ok(Err(_)) => Err(Error::Closed),
			Err(_) => {
				self.forget(id);
				// A response may have landed between the deadline and the removal above.
				match rx.try_recv() {
					Ok(payload) => Ok(payload),
					Err(_) => Err(Error::timeout(format!("response to request {id}"), timeout)),
				}
			}
		}
	}

	/// Drops whatever is stored for `id`.
	pub fn forget(&self, id: u64) {
		self.inner.lock().slots.remove(&id);
	}

	/// Number of ids currently expected, waited on, or holding an unclaimed response.
	pub fn pending(&self) -> usize {
		self.inner.lock().slots.len()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.lock().closed
	}

	/// Wakes every waiter with [`Error::Closed`] and rejects later records. Idempotent.
	pub fn close(&self) {
		let drained = {
			let mut inner = self.inner.lock();
			inner.closed = true;
			std::mem::take(&mut inner.slots)
		};
		if !drained.is_empty() {
			debug!(target = "beacon.channel", outstanding = drained.len(), "closing registry with outstanding requests");
		}
		// Dropping the senders outside the lock wakes the waiters.
		drop(drained);
	}
}

/// Removes a `Waiting` slot when the waiting future is dropped mid-flight.
struct AbandonGuard<'a> {
	registry: &'a CorrelationRegistry,
	id: u64,
}

impl Drop for AbandonGuard<'_> {
	fn drop(&mut self) {
		let mut inner = self.registry.inner.lock();
		if matches!(inner.slots.get(&self.id), Some(Slot::Waiting(_))) {
			inner.slots.remove(&self.id);
		}
	}
}
