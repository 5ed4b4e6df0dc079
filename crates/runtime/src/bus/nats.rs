//! NATS-backed bus.
//!
//! Bus topics use `/` between levels with MQTT wildcards. NATS separates
//! tokens with `.` and spells the wildcards `*` and `>`, so topics are
//! translated on the way in and subjects on the way out:
//!
//! | bus topic | NATS subject |
//! |---|---|
//! | `beacon/announce` | `beacon.announce` |
//! | `beacon/+/reply` | `beacon.*.reply` |
//! | `beacon/#` | `beacon.>` |

use async_nats::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::{Bus, BusMessage, BusSubscription};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// Bus over a NATS server; topics map one-to-one onto subjects.
pub struct NatsBus {
	client: Client,
	url: String,
}

impl NatsBus {
	/// Connects with the credentials and TLS requirement from `config`.
	pub async fn connect(config: &BrokerConfig) -> Result<Self> {
		info!(target = "beacon.bus", url = %config.url, tls = config.tls, "connecting to NATS");

		let mut options = async_nats::ConnectOptions::new();
		if let Some(user) = &config.user {
			options = options.user_and_password(user.clone(), config.password.clone().unwrap_or_default());
		}
		if config.tls {
			options = options.require_tls(true);
		}

		let client = options
			.connect(config.url.as_str())
			.await
			.map_err(|e| Error::connection(&config.url, e))?;

		info!(target = "beacon.bus", url = %config.url, "connected to NATS");
		Ok(Self {
			client,
			url: config.url.clone(),
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}
}

#[async_trait]
impl Bus for NatsBus {
	async fn subscribe(&self, topic: &str) -> Result<BusSubscription> {
		let subject = subject_for(topic, true)?;
		debug!(target = "beacon.bus", topic, %subject, "subscribing");
		let subscriber = self
			.client
			.subscribe(subject)
			.await
			.map_err(|e| Error::connection(&self.url, format!("subscribe to `{topic}` failed: {e}")))?;

		let stream = subscriber.map(|message| BusMessage {
			topic: topic_for(&message.subject),
			payload: message.payload.to_vec(),
		});
		Ok(Box::pin(stream))
	}

	async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
		let subject = subject_for(topic, false)?;
		debug!(target = "beacon.bus", topic, %subject, len = payload.len(), "publishing");
		self.client
			.publish(subject, payload.into())
			.await
			.map_err(|e| Error::Transport(format!("publish to `{topic}` failed: {e}")))
	}
}

/// Translates a bus topic into a NATS subject.
///
/// Wildcards are only accepted when `filter` is set. Characters NATS reserves
/// and empty levels have no translation and are rejected.
fn subject_for(topic: &str, filter: bool) -> Result<String> {
	let levels: Vec<&str> = topic.split('/').collect();
	let mut tokens = Vec::with_capacity(levels.len());
	for (i, level) in levels.iter().enumerate() {
		let token = match *level {
			"+" if filter => "*",
			"#" if filter && i + 1 == levels.len() => ">",
			"" => return Err(Error::Config(format!("topic `{topic}` has an empty level"))),
			level if level.contains(['.', '*', '>', '+', '#', ' ']) => {
				return Err(Error::Config(format!("topic `{topic}` cannot be mapped to a NATS subject")));
			}
			level => level,
		};
		tokens.push(token);
	}
	Ok(tokens.join("."))
}

/// Translates a received NATS subject back into a bus topic.
fn topic_for(subject: &str) -> String {
	subject.replace('.', "/")
}
