use anyhow::{Context, Result};
use beacon_runtime::{BeaconConfig, RendezvousAgent};
use tracing::info;

use super::connect_bus;

/// Answers announce-requests addressed to this identity until ctrl-c.
pub async fn execute(config: BeaconConfig) -> Result<()> {
	let bus = connect_bus(&config).await?;
	let agent = RendezvousAgent::from_config(bus, &config);
	agent.start().await?;
	info!(
		target = "beacon",
		local = %config.identity.local,
		topic = %config.topics.subscribe,
		"responding to announce-requests; press ctrl-c to stop"
	);

	tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
	agent.stop();
	info!(target = "beacon", "responder stopped");
	Ok(())
}
