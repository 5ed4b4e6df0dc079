//! Rendezvous handshake messages.
//!
//! ```json
//! {"kind": "announce-request", "sender": "ctrl1", "target": "peer1"}
//! {"kind": "announce-reply", "sender": "peer1", "target": "ctrl1", "ip": "10.0.0.5"}
//! ```

use serde::{Deserialize, Serialize};

/// The two message kinds of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnounceKind {
	/// "Whoever owns `target`, tell me where you are."
	AnnounceRequest,
	/// "I am `sender`, reachable at `ip`."
	AnnounceReply,
}

/// A single rendezvous message as it appears on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
	pub kind: AnnounceKind,
	/// Identity token of the publisher.
	pub sender: String,
	/// Identity token the message is addressed to.
	pub target: String,
	/// Advertised address; only meaningful on replies.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
}

impl AnnounceMessage {
	/// Builds an announce-request from `sender` asking `target` to identify itself.
	pub fn request(sender: impl Into<String>, target: impl Into<String>) -> Self {
		Self {
			kind: AnnounceKind::AnnounceRequest,
			sender: sender.into(),
			target: target.into(),
			ip: None,
		}
	}

	/// Builds an announce-reply from `sender` to `target` advertising `ip`.
	pub fn reply(sender: impl Into<String>, target: impl Into<String>, ip: impl Into<String>) -> Self {
		Self {
			kind: AnnounceKind::AnnounceReply,
			sender: sender.into(),
			target: target.into(),
			ip: Some(ip.into()),
		}
	}

	/// Returns the advertised address when present and non-blank.
	pub fn address(&self) -> Option<&str> {
		self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty())
	}

	pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
		serde_json::from_slice(payload)
	}

	pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
		serde_json::to_vec(self)
	}
}
