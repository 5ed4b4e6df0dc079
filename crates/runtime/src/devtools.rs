//! DevTools endpoint discovery.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `/json/version` response subset.
#[derive(Debug, Clone, Deserialize)]
pub struct DevToolsVersion {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser")]
	pub browser: Option<String>,
}

/// Formats `host` for use inside a URL authority.
pub(crate) fn url_host(host: &str) -> String {
	if host.contains(':') && !host.starts_with('[') {
		format!("[{host}]")
	} else {
		host.to_string()
	}
}

/// Asks the DevTools HTTP endpoint on `host:port` for its browser WebSocket URL.
pub async fn fetch_version(host: &str, port: u16) -> Result<DevToolsVersion> {
	let url = format!("http://{}:{}/json/version", url_host(host), port);
	let client = reqwest::Client::builder()
		.timeout(PROBE_TIMEOUT)
		.build()
		.map_err(|e| Error::connection(&url, format!("failed to create HTTP client: {e}")))?;

	let response = client.get(&url).send().await.map_err(|e| Error::connection(&url, e))?;
	if !response.status().is_success() {
		return Err(Error::connection(&url, format!("unexpected status {}", response.status())));
	}

	let version: DevToolsVersion = response
		.json()
		.await
		.map_err(|e| Error::connection(&url, format!("failed to parse DevTools response: {e}")))?;
	debug!(target = "beacon.session", %url, browser = ?version.browser, endpoint = %version.web_socket_debugger_url, "found DevTools endpoint");
	Ok(version)
}
