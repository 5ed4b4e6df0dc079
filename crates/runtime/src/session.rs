//! Session driver: rendezvous, then drive the peer over a control channel.

use std::sync::Arc;
use std::time::Duration;

use beacon_protocol::Command;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::address::AddressLookup;
use crate::bus::Bus;
use crate::channel::ControlChannel;
use crate::config::BeaconConfig;
use crate::devtools::{self, url_host};
use crate::error::{Error, Result};
use crate::rendezvous::{RendezvousAgent, RendezvousConfig};

/// Outcome of [`SessionDriver::run`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
	pub peer: String,
	pub peer_address: String,
	pub endpoint: String,
	/// One payload per command, in issue order.
	pub responses: Vec<Value>,
}

/// What [`SessionDriver::run`] records for each command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyMode {
	/// The whole payload, `{"result": ...}` or `{"error": ...}`.
	#[default]
	Payload,
	/// Only `result`; an `error` reply fails the session with [`Error::Remote`].
	Result,
}

/// Orchestrates one controller session against one peer.
///
/// Errors from the agent or the channel are returned unchanged; the driver
/// is the only place that decides to abandon a session.
pub struct SessionDriver {
	config: BeaconConfig,
	bus: Arc<dyn Bus>,
	lookup: Option<Arc<dyn AddressLookup>>,
	reply_mode: ReplyMode,
	hold: Duration,
}

impl SessionDriver {
	/// Validates `config` for the controller role.
	pub fn new(config: BeaconConfig, bus: Arc<dyn Bus>) -> Result<Self> {
		config.validate()?;
		config.peer()?;
		Ok(Self {
			config,
			bus,
			lookup: None,
			reply_mode: ReplyMode::default(),
			hold: Duration::ZERO,
		})
	}

	/// Overrides the address the driver's own agent advertises.
	pub fn with_address_lookup(mut self, lookup: Arc<dyn AddressLookup>) -> Self {
		self.lookup = Some(lookup);
		self
	}

	pub fn with_reply_mode(mut self, mode: ReplyMode) -> Self {
		self.reply_mode = mode;
		self
	}

	/// Keeps the channel open this long after the last command succeeds.
	pub fn with_hold(mut self, hold: Duration) -> Self {
		self.hold = hold;
		self
	}

	pub fn config(&self) -> &BeaconConfig {
		&self.config
	}

	fn agent(&self) -> RendezvousAgent {
		match &self.lookup {
			Some(lookup) => RendezvousAgent::with_address_lookup(Arc::clone(&self.bus), RendezvousConfig::from(&self.config), Arc::clone(lookup)),
			None => RendezvousAgent::from_config(Arc::clone(&self.bus), &self.config),
		}
	}

	/// Subscribes, announces and waits for the peer's address within the session timeout.
	pub async fn rendezvous(&self) -> Result<String> {
		let peer = self.config.peer()?;
		let agent = self.agent();
		agent.start().await?;
		let result = agent.discover(peer, self.config.timeouts.discovery_policy()).await;
		agent.stop();

		let address = result?;
		info!(target = "beacon.session", peer, %address, "rendezvous complete");
		Ok(address)
	}

	/// Works out the control WebSocket URL for a peer at `peer_address`.
	pub async fn control_endpoint(&self, peer_address: &str) -> Result<String> {
		let control = &self.config.control;
		let host = control.host.as_deref().unwrap_or(peer_address);
		match &control.path {
			Some(path) => Ok(format!("ws://{}:{}/{}", url_host(host), control.port, path.trim_start_matches('/'))),
			None => Ok(devtools::fetch_version(host, control.port).await?.web_socket_debugger_url),
		}
	}

	/// Opens the control channel for a peer at `peer_address`.
	pub async fn connect(&self, peer_address: &str) -> Result<ControlChannel> {
		let endpoint = self.control_endpoint(peer_address).await?;
		ControlChannel::open(&endpoint).await
	}

	/// Runs a full session and records raw response payloads.
	///
	/// `plan` receives the resolved peer address and returns the commands to
	/// issue. Commands run in order; the first failure closes the channel and
	/// is returned as is.
	pub async fn run<F>(&self, plan: F) -> Result<SessionReport>
	where
		F: FnOnce(&str) -> Vec<Command>,
	{
		self.run_with(plan, |_, _| Ok::<(), Error>(())).await
	}

	/// Like [`run`](Self::run), handing each recorded response to `on_response`.
	///
	/// What is recorded depends on the [`ReplyMode`]. An error from
	/// `on_response` ends the session the same way a failed command does.
	pub async fn run_with<F, H, E>(&self, plan: F, mut on_response: H) -> std::result::Result<SessionReport, E>
	where
		F: FnOnce(&str) -> Vec<Command>,
		H: FnMut(&Command, &Value) -> std::result::Result<(), E>,
		E: From<Error>,
	{
		let peer = self.config.peer()?.to_string();
		let peer_address = self.rendezvous().await?;
		let channel = self.connect(&peer_address).await?;

		let outcome = self.issue(&channel, plan(&peer_address), &mut on_response).await;
		if outcome.is_ok() && !self.hold.is_zero() {
			info!(target = "beacon.session", hold_ms = self.hold.as_millis() as u64, "holding control channel open");
			tokio::time::sleep(self.hold).await;
		}
		channel.close().await;

		Ok(SessionReport {
			peer,
			peer_address,
			endpoint: channel.endpoint().to_string(),
			responses: outcome?,
		})
	}

	async fn issue<H, E>(&self, channel: &ControlChannel, commands: Vec<Command>, on_response: &mut H) -> std::result::Result<Vec<Value>, E>
	where
		H: FnMut(&Command, &Value) -> std::result::Result<(), E>,
		E: From<Error>,
	{
		let timeout = self.config.timeouts.operation();
		let mut responses = Vec::with_capacity(commands.len());
		for command in commands {
			let response = match self.reply_mode {
				ReplyMode::Payload => channel.send(&command.method, command.params.clone(), timeout).await,
				ReplyMode::Result => channel.call(&command, timeout).await,
			};
			let response = match response {
				Ok(response) => response,
				Err(e) => {
					warn!(target = "beacon.session", method = %command.method, error = %e, "command failed; ending session");
					return Err(e.into());
				}
			};
			if let Err(e) = on_response(&command, &response) {
				warn!(target = "beacon.session", method = %command.method, "response handler failed; ending session");
				return Err(e);
			}
			responses.push(response);
		}
		Ok(responses)
	}
}
