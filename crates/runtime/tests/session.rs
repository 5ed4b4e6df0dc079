//! End-to-end sessions: rendezvous over a local bus, then a real control server.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_protocol::Command;
use beacon_runtime::{BeaconConfig, Bus, Error, FixedAddress, LocalBus, RendezvousAgent, RendezvousConfig, ReplyMode, SessionDriver};
use serde_json::{Value, json};

fn controller_config(port: u16, path: Option<&str>) -> BeaconConfig {
	let mut config = BeaconConfig::default();
	config.identity.local = "ctrl1".into();
	config.identity.peer = Some("peer1".into());
	config.control.port = port;
	config.control.path = path.map(str::to_string);
	config.timeouts.operation_ms = 2_000;
	config.timeouts.session_ms = 5_000;
	config
}

async fn start_peer(bus: &Arc<LocalBus>) -> RendezvousAgent {
	let config = RendezvousConfig {
		local: "peer1".into(),
		peer: None,
		subscribe_topic: "beacon/announce".into(),
		publish_topic: "beacon/announce".into(),
	};
	let peer = RendezvousAgent::with_address_lookup(Arc::clone(bus) as Arc<dyn Bus>, config, Arc::new(FixedAddress("127.0.0.1".into())));
	peer.start().await.unwrap();
	peer
}

fn driver(bus: &Arc<LocalBus>, config: BeaconConfig) -> SessionDriver {
	SessionDriver::new(config, Arc::clone(bus) as Arc<dyn Bus>)
		.unwrap()
		.with_address_lookup(Arc::new(FixedAddress("127.0.0.1".into())))
}

#[tokio::test]
async fn drives_peer_through_explicit_path() {
	let server = common::spawn_control_server(Arc::new(|request: &Value| {
		let result = match request["method"].as_str() {
			Some("Page.navigate") => json!({ "frameId": "F1" }),
			Some("Runtime.evaluate") => json!({ "result": { "type": "string", "value": "Example" } }),
			_ => json!({}),
		};
		vec![
			json!({ "method": "Page.frameStartedLoading", "params": {} }),
			json!({ "id": request["id"], "result": result }),
		]
	}))
	.await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let driver = driver(&bus, controller_config(server.addr.port(), Some("devtools/page/1")));
	let report = driver
		.run(|address| {
			vec![
				Command::navigate(format!("http://{address}")),
				Command::evaluate("document.title"),
			]
		})
		.await
		.unwrap();

	assert_eq!(report.peer, "peer1");
	assert_eq!(report.peer_address, "127.0.0.1");
	assert_eq!(report.endpoint, server.url("devtools/page/1"));
	assert_eq!(report.responses.len(), 2);
	assert_eq!(report.responses[0]["result"]["frameId"], "F1");
	assert_eq!(report.responses[1]["result"]["result"]["value"], "Example");

	let received = server.received();
	assert_eq!(received[0]["id"], 1);
	assert_eq!(received[0]["params"]["url"], "http://127.0.0.1");
	assert_eq!(received[1]["id"], 2);
}

#[tokio::test]
async fn discovers_endpoint_through_devtools_probe() {
	let server = common::spawn_control_server(common::empty_result()).await;
	let probe = common::spawn_devtools_stub(server.url("devtools/browser/abc")).await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let driver = driver(&bus, controller_config(probe.port(), None));
	assert_eq!(driver.control_endpoint("127.0.0.1").await.unwrap(), server.url("devtools/browser/abc"));

	let report = driver.run(|_| vec![Command::new("Browser.getVersion", json!({}))]).await.unwrap();
	assert_eq!(report.endpoint, server.url("devtools/browser/abc"));
	assert_eq!(report.responses, vec![json!({ "result": {} })]);
}

#[tokio::test]
async fn command_timeout_ends_session() {
	// Never answers navigation.
	let server = common::spawn_control_server(Arc::new(|request: &Value| {
		if request["method"] == "Page.navigate" {
			Vec::new()
		} else {
			vec![json!({ "id": request["id"], "result": {} })]
		}
	}))
	.await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let mut config = controller_config(server.addr.port(), Some("control"));
	config.timeouts.operation_ms = 200;
	let driver = driver(&bus, config);

	let err = driver
		.run(|_| vec![Command::new("Page.enable", json!({})), Command::navigate("http://127.0.0.1"), Command::capture_screenshot()])
		.await
		.unwrap_err();
	assert!(err.is_timeout(), "unexpected error: {err}");

	// The screenshot after the failed command was never issued.
	let methods: Vec<Value> = server.received().iter().map(|r| r["method"].clone()).collect();
	assert_eq!(methods, vec![json!("Page.enable"), json!("Page.navigate")]);
}

#[tokio::test]
async fn unreachable_control_endpoint_is_a_connection_error() {
	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let port = listener.local_addr().unwrap().port();
	drop(listener);

	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;
	let driver = driver(&bus, controller_config(port, None));

	let err = driver.run(|_| Vec::new()).await.unwrap_err();
	assert!(matches!(err, Error::Connection { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn result_mode_hands_each_result_to_the_handler() {
	let server = common::spawn_control_server(Arc::new(|request: &Value| {
		vec![json!({ "id": request["id"], "result": { "method": request["method"] } })]
	}))
	.await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let driver = driver(&bus, controller_config(server.addr.port(), Some("control"))).with_reply_mode(ReplyMode::Result);
	let mut seen = Vec::new();
	let report = driver
		.run_with(
			|_| vec![Command::new("Page.enable", json!({})), Command::capture_screenshot()],
			|command, result| {
				seen.push((command.method.clone(), result.clone()));
				Ok::<(), Error>(())
			},
		)
		.await
		.unwrap();

	assert_eq!(report.responses, vec![json!({ "method": "Page.enable" }), json!({ "method": "Page.captureScreenshot" })]);
	assert_eq!(seen.len(), 2);
	assert_eq!(seen[1].0, "Page.captureScreenshot");
	assert_eq!(seen[1].1, json!({ "method": "Page.captureScreenshot" }));
}

#[tokio::test]
async fn result_mode_fails_on_error_reply() {
	let server = common::spawn_control_server(Arc::new(|request: &Value| {
		vec![json!({ "id": request["id"], "error": { "code": -32000, "message": "Cannot navigate to invalid URL" } })]
	}))
	.await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let driver = driver(&bus, controller_config(server.addr.port(), Some("control"))).with_reply_mode(ReplyMode::Result);
	let err = driver.run(|_| vec![Command::navigate("notaurl"), Command::capture_screenshot()]).await.unwrap_err();

	assert!(matches!(err, Error::Remote { code: -32000, .. }), "unexpected error: {err}");
	assert_eq!(server.received().len(), 1);
}

#[derive(Debug)]
enum Abort {
	Session(Error),
	Rejected(String),
}

impl From<Error> for Abort {
	fn from(err: Error) -> Self {
		Abort::Session(err)
	}
}

#[tokio::test]
async fn handler_error_ends_session() {
	let server = common::spawn_control_server(common::empty_result()).await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let driver = driver(&bus, controller_config(server.addr.port(), Some("control")));
	let err = driver
		.run_with(
			|_| vec![Command::new("Page.enable", json!({})), Command::new("Page.reload", json!({}))],
			|command, _| Err(Abort::Rejected(command.method.clone())),
		)
		.await
		.unwrap_err();

	match err {
		Abort::Rejected(method) => assert_eq!(method, "Page.enable"),
		Abort::Session(err) => panic!("unexpected session error: {err}"),
	}
	assert_eq!(server.received().len(), 1);
}

#[tokio::test]
async fn hold_keeps_channel_open_after_last_command() {
	let server = common::spawn_control_server(common::empty_result()).await;
	let bus = Arc::new(LocalBus::new());
	let _peer = start_peer(&bus).await;

	let hold = Duration::from_millis(300);
	let driver = driver(&bus, controller_config(server.addr.port(), Some("control"))).with_hold(hold);
	let started = Instant::now();
	let report = driver.run(|_| vec![Command::new("Page.enable", json!({}))]).await.unwrap();

	assert!(started.elapsed() >= hold);
	assert_eq!(report.responses.len(), 1);
}
