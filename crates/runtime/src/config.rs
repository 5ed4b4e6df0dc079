//! Explicit configuration passed to the agent and driver.
//!
//! Loaded from JSON; every field has a default so a file only needs to name
//! what differs:
//!
//! ```json
//! {
//!   "broker": { "url": "tls://broker.example:4222", "user": "beacon", "password": "secret", "tls": true },
//!   "topics": { "subscribe": "beacon/replies", "publish": "beacon/requests" },
//!   "identity": { "local": "ctrl1", "peer": "peer1" },
//!   "control": { "host": "localhost", "port": 9222 },
//!   "timeouts": { "operation_ms": 5000, "session_ms": 30000, "rebroadcast_ms": 3000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_BROKER_URL: &str = "nats://127.0.0.1:4222";
pub const DEFAULT_TOPIC: &str = "beacon/announce";
pub const DEFAULT_CONTROL_PORT: u16 = 9222;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
	pub broker: BrokerConfig,
	pub topics: TopicConfig,
	pub identity: IdentityConfig,
	pub control: ControlConfig,
	pub timeouts: TimeoutConfig,
}

/// Where the bus lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
	pub url: String,
	pub user: Option<String>,
	pub password: Option<String>,
	pub tls: bool,
}

impl Default for BrokerConfig {
	fn default() -> Self {
		Self {
			url: DEFAULT_BROKER_URL.to_string(),
			user: None,
			password: None,
			tls: false,
		}
	}
}

/// Topic this process listens on and topic it publishes to.
///
/// Both roles may share a single topic; an agent ignores its own messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
	pub subscribe: String,
	pub publish: String,
}

impl Default for TopicConfig {
	fn default() -> Self {
		Self {
			subscribe: DEFAULT_TOPIC.to_string(),
			publish: DEFAULT_TOPIC.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
	/// Token this process answers to.
	pub local: String,
	/// Token of the peer to discover; unset for a pure responder.
	pub peer: Option<String>,
	/// Address to advertise instead of probing the routing table.
	pub advertise_address: Option<String>,
}

/// How to reach the control endpoint once the peer address is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
	/// Host to connect to; unset means the resolved peer address.
	pub host: Option<String>,
	pub port: u16,
	/// WebSocket path; unset means ask `/json/version` for the debugger URL.
	pub path: Option<String>,
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self {
			host: None,
			port: DEFAULT_CONTROL_PORT,
			path: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
	/// Bound on each control command.
	pub operation_ms: u64,
	/// Bound on the whole rendezvous wait.
	pub session_ms: u64,
	/// Re-announce interval while waiting; unset announces once.
	pub rebroadcast_ms: Option<u64>,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		Self {
			operation_ms: DEFAULT_OPERATION_TIMEOUT_MS,
			session_ms: DEFAULT_SESSION_TIMEOUT_MS,
			rebroadcast_ms: None,
		}
	}
}

impl TimeoutConfig {
	pub fn operation(&self) -> Duration {
		Duration::from_millis(self.operation_ms)
	}

	pub fn discovery_policy(&self) -> DiscoveryPolicy {
		DiscoveryPolicy {
			deadline: Duration::from_millis(self.session_ms),
			rebroadcast: self.rebroadcast_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
		}
	}
}

/// What to do while a peer has not answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
	/// Give up with a timeout after this long.
	pub deadline: Duration,
	/// Publish the announce-request again at this interval until the deadline.
	pub rebroadcast: Option<Duration>,
}

impl BeaconConfig {
	/// Reads and validates a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
		let config: Self = serde_json::from_str(&text).map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
		config.validate()?;
		Ok(config)
	}

	/// Checks cross-field constraints that serde cannot express.
	pub fn validate(&self) -> Result<()> {
		if self.identity.local.trim().is_empty() {
			return Err(Error::Config("identity.local must not be empty".into()));
		}
		if self.identity.peer.as_deref() == Some(self.identity.local.as_str()) {
			return Err(Error::Config("identity.peer must differ from identity.local".into()));
		}
		if self.topics.subscribe.is_empty() || self.topics.publish.is_empty() {
			return Err(Error::Config("topics.subscribe and topics.publish must not be empty".into()));
		}
		if self.broker.password.is_some() && self.broker.user.is_none() {
			return Err(Error::Config("broker.password requires broker.user".into()));
		}
		Ok(())
	}

	/// Peer identity, required by the controller role.
	pub fn peer(&self) -> Result<&str> {
		self.identity
			.peer
			.as_deref()
			.filter(|peer| !peer.trim().is_empty())
			.ok_or_else(|| Error::Config("identity.peer is required to discover a peer".into()))
	}
}
