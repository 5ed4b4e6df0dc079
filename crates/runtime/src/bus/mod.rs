//! Publish/subscribe bus used for rendezvous.
//!
//! The agent only needs two capabilities from a bus: subscribe to a topic and
//! receive `(topic, payload)` pairs, and publish a payload to a topic.
//! [`LocalBus`] implements them in-process; [`NatsBus`] over a NATS broker.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::Result;

mod local;
mod nats;

pub use local::LocalBus;
pub use nats::NatsBus;

/// One message delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
	pub topic: String,
	pub payload: Vec<u8>,
}

/// Stream of messages for one subscription, in delivery order.
pub type BusSubscription = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// Topic-addressed publish/subscribe.
///
/// Topics are `/`-separated levels. Subscription filters use MQTT wildcards
/// on every implementation: `+` matches exactly one level and a trailing `#`
/// matches the rest. Implementations over brokers with another syntax
/// translate, and report topics in this form on delivered messages.
#[async_trait]
pub trait Bus: Send + Sync {
	/// Subscribes to every topic matching `filter`.
	async fn subscribe(&self, filter: &str) -> Result<BusSubscription>;

	/// Publishes to a concrete topic; wildcards are not allowed here.
	async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
