mod drive;
mod respond;

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_runtime::{BeaconConfig, Bus, NatsBus};

use crate::cli::{Cli, Commands};

pub use drive::{DriveOptions, write_screenshot};

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = cli.resolve_config()?;
	match cli.command {
		Commands::Respond { .. } => respond::execute(config).await,
		Commands::Drive {
			url,
			eval,
			screenshot,
			hold_ms,
			..
		} => {
			let options = DriveOptions {
				url,
				eval,
				screenshot,
				hold_ms,
			};
			drive::execute(config, options).await
		}
	}
}

async fn connect_bus(config: &BeaconConfig) -> Result<Arc<dyn Bus>> {
	let bus = NatsBus::connect(&config.broker)
		.await
		.with_context(|| format!("connecting to broker {}", config.broker.url))?;
	Ok(Arc::new(bus))
}
