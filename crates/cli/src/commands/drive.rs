use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use beacon_protocol::Command;
use beacon_runtime::{BeaconConfig, ReplyMode, SessionDriver};
use serde_json::Value;
use tracing::info;

use super::connect_bus;
use crate::cli::expand_url;

#[derive(Debug, Clone)]
pub struct DriveOptions {
	pub url: String,
	pub eval: Option<String>,
	pub screenshot: Option<PathBuf>,
	pub hold_ms: u64,
}

impl DriveOptions {
	fn plan(&self, peer_address: &str) -> Vec<Command> {
		let mut commands = vec![Command::navigate(expand_url(&self.url, peer_address))];
		if let Some(expression) = &self.eval {
			commands.push(Command::evaluate(expression.clone()));
		}
		if self.screenshot.is_some() {
			commands.push(Command::capture_screenshot());
		}
		commands
	}

	/// Saves the screenshot, if one was asked for, as soon as its result arrives.
	fn handle_result(&self, command: &Command, result: &Value) -> Result<()> {
		if command.method != "Page.captureScreenshot" {
			return Ok(());
		}
		if let Some(path) = &self.screenshot {
			let bytes = write_screenshot(result, path)?;
			info!(target = "beacon", path = %path.display(), bytes, "screenshot saved");
		}
		Ok(())
	}
}

/// Rendezvous, then navigate the peer's browser and print a JSON report.
pub async fn execute(config: BeaconConfig, options: DriveOptions) -> Result<()> {
	let bus = connect_bus(&config).await?;
	let driver = SessionDriver::new(config, bus)?
		.with_reply_mode(ReplyMode::Result)
		.with_hold(Duration::from_millis(options.hold_ms));

	let report = driver
		.run_with(|peer_address| options.plan(peer_address), |command, result| options.handle_result(command, result))
		.await?;
	info!(target = "beacon", peer = %report.peer, peer_address = %report.peer_address, endpoint = %report.endpoint, "session complete");

	println!("{}", serde_json::to_string_pretty(&report)?);
	Ok(())
}

/// Decodes the base64 `data` of a `Page.captureScreenshot` result into `path`.
pub fn write_screenshot(result: &Value, path: &Path) -> Result<usize> {
	let data = result["data"]
		.as_str()
		.ok_or_else(|| anyhow!("screenshot result has no `data` field"))?;
	let bytes = STANDARD.decode(data).context("screenshot data is not valid base64")?;

	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() && !parent.exists() {
			std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
		}
	}
	std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
	Ok(bytes.len())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn options() -> DriveOptions {
		DriveOptions {
			url: "http://{peer}".into(),
			eval: None,
			screenshot: None,
			hold_ms: 0,
		}
	}

	#[test]
	fn plan_navigates_to_peer() {
		let plan = options().plan("10.0.0.5");
		assert_eq!(plan, vec![Command::navigate("http://10.0.0.5")]);
	}

	#[test]
	fn plan_appends_eval_then_screenshot() {
		let mut options = options();
		options.eval = Some("document.title".into());
		options.screenshot = Some(PathBuf::from("shot.png"));

		let methods: Vec<String> = options.plan("10.0.0.5").into_iter().map(|c| c.method).collect();
		assert_eq!(methods, ["Page.navigate", "Runtime.evaluate", "Page.captureScreenshot"]);
	}

	#[test]
	fn only_screenshot_results_are_written() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("peer.png");
		let mut options = options();
		options.screenshot = Some(path.clone());

		options.handle_result(&Command::navigate("http://10.0.0.5"), &json!({ "frameId": "F1" })).unwrap();
		assert!(!path.exists());

		options.handle_result(&Command::capture_screenshot(), &json!({ "data": "iVBORw0KGgo=" })).unwrap();
		assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG\r\n\x1a\n");
	}

	#[test]
	fn screenshot_without_data_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		assert!(write_screenshot(&json!({}), &dir.path().join("shot.png")).is_err());
	}
}
