//! In-process broadcast bus.

use async_trait::async_trait;
use futures_util::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use super::{Bus, BusMessage, BusSubscription};
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 256;

/// Bus whose subscribers all live in this process.
///
/// Topic filters follow MQTT conventions: `+` matches one `/`-separated level
/// and a trailing `#` matches any remainder.
#[derive(Clone)]
pub struct LocalBus {
	tx: broadcast::Sender<BusMessage>,
}

impl LocalBus {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	/// Subscribers that fall more than `capacity` messages behind skip ahead.
	pub fn with_capacity(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self { tx }
	}
}

impl Default for LocalBus {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Bus for LocalBus {
	async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
		let filter = topic.to_string();
		let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| {
			let message = match item {
				Ok(message) if topic_matches(&filter, &message.topic) => Some(message),
				Ok(_) => None,
				Err(BroadcastStreamRecvError::Lagged(skipped)) => {
					warn!(target = "beacon.bus", filter = %filter, skipped, "local subscriber lagged");
					None
				}
			};
			future::ready(message)
		});
		Ok(Box::pin(stream))
	}

	async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
		let message = BusMessage {
			topic: topic.to_string(),
			payload,
		};
		// No subscribers is not an error on a broadcast bus.
		let receivers = self.tx.send(message).unwrap_or(0);
		trace!(target = "beacon.bus", topic, receivers, "published");
		Ok(())
	}
}

pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
	let mut filter_levels = filter.split('/');
	let mut topic_levels = topic.split('/');
	loop {
		match (filter_levels.next(), topic_levels.next()) {
			(Some("#"), _) => return filter_levels.next().is_none(),
			(Some("+"), Some(_)) => continue,
			(Some(f), Some(t)) if f == t => continue,
			(None, None) => return true,
			_ => return false,
		}
	}
}
