use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use beacon_runtime::BeaconConfig;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Find a peer over a pub/sub broker, then drive it over a control channel")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Broker URL (overrides broker.url)
	#[arg(long, global = true, value_name = "URL")]
	pub broker: Option<String>,

	/// Identity this process answers to (overrides identity.local)
	#[arg(long = "as", global = true, value_name = "ID")]
	pub local: Option<String>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Answer announce-requests until interrupted
	Respond {
		/// Address to advertise instead of probing the routing table
		#[arg(long, value_name = "IP")]
		advertise: Option<String>,
	},

	/// Rendezvous with a peer, then drive its DevTools endpoint
	Drive {
		/// Identity of the peer to discover (overrides identity.peer)
		#[arg(long, value_name = "ID")]
		peer: Option<String>,

		/// Control host (overrides control.host; defaults to the peer address)
		#[arg(long, value_name = "HOST")]
		control_host: Option<String>,

		/// Control port (overrides control.port)
		#[arg(long, value_name = "PORT")]
		control_port: Option<u16>,

		/// URL to open; `{peer}` expands to the resolved peer address
		#[arg(long, default_value = "http://{peer}")]
		url: String,

		/// JavaScript expression to evaluate after navigation
		#[arg(long, value_name = "EXPR")]
		eval: Option<String>,

		/// Save a PNG screenshot to this path
		#[arg(long, value_name = "FILE")]
		screenshot: Option<PathBuf>,

		/// Keep the session open this long before closing (ms)
		#[arg(long, default_value = "0")]
		hold_ms: u64,
	},
}

impl Cli {
	/// Loads the config file (or defaults) and applies command line overrides.
	pub fn resolve_config(&self) -> Result<BeaconConfig> {
		let mut config = match &self.config {
			Some(path) => load(path)?,
			None => BeaconConfig::default(),
		};

		if let Some(url) = &self.broker {
			config.broker.url = url.clone();
		}
		if let Some(local) = &self.local {
			config.identity.local = local.clone();
		}
		match &self.command {
			Commands::Respond { advertise } => {
				if let Some(address) = advertise {
					config.identity.advertise_address = Some(address.clone());
				}
			}
			Commands::Drive {
				peer,
				control_host,
				control_port,
				..
			} => {
				if let Some(peer) = peer {
					config.identity.peer = Some(peer.clone());
				}
				if let Some(host) = control_host {
					config.control.host = Some(host.clone());
				}
				if let Some(port) = control_port {
					config.control.port = *port;
				}
			}
		}

		config.validate().context("invalid configuration")?;
		Ok(config)
	}
}

fn load(path: &Path) -> Result<BeaconConfig> {
	BeaconConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Expands `{peer}` in a URL template.
pub fn expand_url(template: &str, peer_address: &str) -> String {
	template.replace("{peer}", peer_address)
}
