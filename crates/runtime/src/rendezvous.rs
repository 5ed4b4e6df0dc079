//! Rendezvous agent: discovers a peer's address over the bus.
//!
//! Every process runs the same agent. It subscribes to its topic and, for each
//! [`AnnounceMessage`] that arrives:
//!
//! * ignores anything it sent itself,
//! * answers an announce-request whose `target` is its own identity with an
//!   announce-reply carrying its advertised address,
//! * resolves on an announce-reply from the configured peer addressed to it.
//!
//! ```text
//! Idle --start--> Subscribed --matching reply--> Resolved
//! ```
//!
//! Resolution is terminal: the first address wins for the agent's lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_protocol::{AnnounceKind, AnnounceMessage};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::address::{AddressLookup, FixedAddress, UdpProbe};
use crate::bus::{Bus, BusMessage, BusSubscription};
use crate::config::{BeaconConfig, DiscoveryPolicy};
use crate::error::{Error, Result};

/// Observable phase of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousPhase {
	Idle,
	Subscribed,
	Resolved,
}

/// Identity and topics an agent operates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousConfig {
	pub local: String,
	pub peer: Option<String>,
	pub subscribe_topic: String,
	pub publish_topic: String,
}

impl From<&BeaconConfig> for RendezvousConfig {
	fn from(config: &BeaconConfig) -> Self {
		Self {
			local: config.identity.local.clone(),
			peer: config.identity.peer.clone(),
			subscribe_topic: config.topics.subscribe.clone(),
			publish_topic: config.topics.publish.clone(),
		}
	}
}

/// Shared rendezvous state: written by the listener, read by the driver.
pub struct RendezvousState {
	local: String,
	subscribed: AtomicBool,
	resolved: watch::Sender<Option<String>>,
}

impl RendezvousState {
	fn new(local: String) -> Self {
		let (resolved, _) = watch::channel(None);
		Self {
			local,
			subscribed: AtomicBool::new(false),
			resolved,
		}
	}

	pub fn local(&self) -> &str {
		&self.local
	}

	pub fn resolved(&self) -> Option<String> {
		self.resolved.borrow().clone()
	}

	pub fn phase(&self) -> RendezvousPhase {
		if self.resolved.borrow().is_some() {
			RendezvousPhase::Resolved
		} else if self.subscribed.load(Ordering::SeqCst) {
			RendezvousPhase::Subscribed
		} else {
			RendezvousPhase::Idle
		}
	}

	/// Sets the address unless one is already set. Returns whether it was set.
	fn resolve(&self, address: &str) -> bool {
		self.resolved.send_if_modified(|current| {
			if current.is_some() {
				return false;
			}
			*current = Some(address.to_string());
			true
		})
	}
}

/// Decides what to do with each inbound bus message.
struct AnnounceHandler {
	peer: Option<String>,
	lookup: Arc<dyn AddressLookup>,
	state: Arc<RendezvousState>,
}

impl AnnounceHandler {
	/// Applies `message` to the state and returns the reply to publish, if any.
	fn handle(&self, message: &BusMessage) -> Option<AnnounceMessage> {
		let announce = match AnnounceMessage::decode(&message.payload) {
			Ok(announce) => announce,
			Err(e) => {
				let err = Error::MalformedMessage(e.to_string());
				debug!(target = "beacon.rendezvous", topic = %message.topic, error = %err, "ignoring bus message");
				return None;
			}
		};

		let local = self.state.local();
		if announce.sender == local {
			trace!(target = "beacon.rendezvous", kind = ?announce.kind, "ignoring own message");
			return None;
		}
		if announce.target != local {
			trace!(target = "beacon.rendezvous", target_id = %announce.target, "message addressed elsewhere");
			return None;
		}

		match announce.kind {
			AnnounceKind::AnnounceRequest => {
				let address = self.lookup.local_address();
				info!(target = "beacon.rendezvous", requester = %announce.sender, %address, "answering announce-request");
				Some(AnnounceMessage::reply(local, announce.sender, address))
			}
			AnnounceKind::AnnounceReply => {
				if self.peer.as_deref() != Some(announce.sender.as_str()) {
					debug!(target = "beacon.rendezvous", sender = %announce.sender, "reply from unexpected peer");
					return None;
				}
				let Some(address) = announce.address() else {
					warn!(target = "beacon.rendezvous", sender = %announce.sender, "reply without address");
					return None;
				};
				if self.state.resolve(address) {
					info!(target = "beacon.rendezvous", peer = %announce.sender, %address, "peer resolved");
				} else {
					debug!(target = "beacon.rendezvous", peer = %announce.sender, %address, "already resolved; ignoring reply");
				}
				None
			}
		}
	}
}

/// One participant in the rendezvous handshake.
pub struct RendezvousAgent {
	bus: Arc<dyn Bus>,
	config: RendezvousConfig,
	handler: Arc<AnnounceHandler>,
	listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RendezvousAgent {
	/// Creates an idle agent that advertises the address found by [`UdpProbe`].
	pub fn new(bus: Arc<dyn Bus>, config: RendezvousConfig) -> Self {
		Self::with_address_lookup(bus, config, Arc::new(UdpProbe::default()))
	}

	pub fn with_address_lookup(bus: Arc<dyn Bus>, config: RendezvousConfig, lookup: Arc<dyn AddressLookup>) -> Self {
		let state = Arc::new(RendezvousState::new(config.local.clone()));
		let handler = Arc::new(AnnounceHandler {
			peer: config.peer.clone(),
			lookup,
			state,
		});
		Self {
			bus,
			config,
			handler,
			listener: parking_lot::Mutex::new(None),
		}
	}

	/// Builds an agent from the full config, honoring `identity.advertise_address`.
	pub fn from_config(bus: Arc<dyn Bus>, config: &BeaconConfig) -> Self {
		let lookup: Arc<dyn AddressLookup> = match &config.identity.advertise_address {
			Some(address) => Arc::new(FixedAddress(address.clone())),
			None => Arc::new(UdpProbe::default()),
		};
		Self::with_address_lookup(bus, RendezvousConfig::from(config), lookup)
	}

	pub fn state(&self) -> &RendezvousState {
		&self.handler.state
	}

	pub fn phase(&self) -> RendezvousPhase {
		self.state().phase()
	}

	pub fn resolved(&self) -> Option<String> {
		self.state().resolved()
	}

	/// Subscribes and starts the listener task. A second call is a no-op.
	pub async fn start(&self) -> Result<()> {
		if self.state().subscribed.load(Ordering::SeqCst) {
			return Ok(());
		}

		let subscription = self.bus.subscribe(&self.config.subscribe_topic).await?;
		info!(
			target = "beacon.rendezvous",
			local = %self.config.local,
			topic = %self.config.subscribe_topic,
			"subscribed"
		);

		let task = tokio::spawn(listen(
			subscription,
			Arc::clone(&self.handler),
			Arc::clone(&self.bus),
			self.config.publish_topic.clone(),
		));
		if let Some(previous) = self.listener.lock().replace(task) {
			previous.abort();
		}
		self.state().subscribed.store(true, Ordering::SeqCst);
		Ok(())
	}

	/// Publishes an announce-request naming `peer` as target. Does not wait.
	pub async fn announce(&self, peer: &str) -> Result<()> {
		if self.phase() == RendezvousPhase::Idle {
			return Err(Error::NotConnected("rendezvous agent is not subscribed".into()));
		}
		let payload = AnnounceMessage::request(self.config.local.as_str(), peer).encode()?;
		debug!(target = "beacon.rendezvous", local = %self.config.local, peer, "announcing");
		self.bus.publish(&self.config.publish_topic, payload).await
	}

	/// Waits until the peer address is known.
	///
	/// A zero timeout checks the current state without waiting.
	pub async fn wait_resolved(&self, timeout: Duration) -> Result<String> {
		let mut rx = self.handler.state.resolved.subscribe();
		match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
			Ok(Ok(address)) => Ok((*address).clone().unwrap_or_default()),
			Ok(Err(_)) => Err(Error::Closed),
			Err(_) => Err(Error::timeout("peer resolution", timeout)),
		}
	}

	/// Announces to `peer` and waits for its reply according to `policy`.
	///
	/// Without a rebroadcast interval the request is published once and the
	/// whole deadline is spent waiting. With one, the request is repeated each
	/// interval until the deadline.
	pub async fn discover(&self, peer: &str, policy: DiscoveryPolicy) -> Result<String> {
		let started = Instant::now();
		let mut attempt = 0u32;
		loop {
			attempt += 1;
			self.announce(peer).await?;

			let remaining = policy.deadline.saturating_sub(started.elapsed());
			let wait = policy.rebroadcast.map_or(remaining, |interval| interval.min(remaining));
			match self.wait_resolved(wait).await {
				Ok(address) => return Ok(address),
				Err(e) if e.is_timeout() => {
					if policy.rebroadcast.is_none() || started.elapsed() >= policy.deadline {
						warn!(target = "beacon.rendezvous", peer, attempts = attempt, "peer did not answer");
						return Err(Error::timeout(format!("rendezvous with `{peer}`"), policy.deadline));
					}
					debug!(target = "beacon.rendezvous", peer, attempt, "no reply yet; re-announcing");
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Stops the listener. The resolved address stays readable.
	pub fn stop(&self) {
		if let Some(task) = self.listener.lock().take() {
			task.abort();
		}
		self.state().subscribed.store(false, Ordering::SeqCst);
	}
}

impl Drop for RendezvousAgent {
	fn drop(&mut self) {
		if let Some(task) = self.listener.get_mut().take() {
			task.abort();
		}
	}
}

async fn listen(mut subscription: BusSubscription, handler: Arc<AnnounceHandler>, bus: Arc<dyn Bus>, publish_topic: String) {
	while let Some(message) = subscription.next().await {
		let Some(reply) = handler.handle(&message) else {
			continue;
		};
		match reply.encode() {
			Ok(payload) => {
				if let Err(e) = bus.publish(&publish_topic, payload).await {
					warn!(target = "beacon.rendezvous", error = %e, "failed to publish announce-reply");
				}
			}
			Err(e) => warn!(target = "beacon.rendezvous", error = %e, "failed to encode announce-reply"),
		}
	}
	debug!(target = "beacon.rendezvous", "bus subscription ended");
}
