//! Shared fixtures: a scripted control server and a DevTools `/json/version` stub.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// WebSocket server that answers each request frame with whatever `respond` returns.
pub struct ControlServer {
	pub addr: SocketAddr,
	pub received: Arc<Mutex<Vec<Value>>>,
}

impl ControlServer {
	pub fn url(&self, path: &str) -> String {
		format!("ws://{}/{}", self.addr, path.trim_start_matches('/'))
	}

	pub fn received(&self) -> Vec<Value> {
		self.received.lock().clone()
	}
}

/// Replies `{"id": <id>, "result": {}}` to every request.
pub fn empty_result() -> Responder {
	Arc::new(|request: &Value| vec![json!({ "id": request["id"], "result": {} })])
}

pub async fn spawn_control_server(respond: Responder) -> ControlServer {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let received = Arc::new(Mutex::new(Vec::new()));

	let log = Arc::clone(&received);
	tokio::spawn(async move {
		while let Ok((stream, _)) = listener.accept().await {
			let respond = Arc::clone(&respond);
			let log = Arc::clone(&log);
			tokio::spawn(async move {
				let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
					return;
				};
				let (mut tx, mut rx) = ws.split();
				while let Some(Ok(frame)) = rx.next().await {
					let Message::Text(text) = frame else {
						continue;
					};
					let Ok(request) = serde_json::from_str::<Value>(&text) else {
						continue;
					};
					log.lock().push(request.clone());
					for reply in respond(&request) {
						if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
							return;
						}
					}
				}
			});
		}
	});

	ControlServer { addr, received }
}

/// Minimal HTTP server answering every request with a `/json/version` body.
pub async fn spawn_devtools_stub(debugger_url: String) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let body = json!({
		"Browser": "HeadlessChrome/126.0.0.0",
		"Protocol-Version": "1.3",
		"webSocketDebuggerUrl": debugger_url,
	})
	.to_string();

	tokio::spawn(async move {
		while let Ok((mut stream, _)) = listener.accept().await {
			let body = body.clone();
			tokio::spawn(async move {
				let mut request = Vec::new();
				let mut buf = [0u8; 1024];
				loop {
					match stream.read(&mut buf).await {
						Ok(0) | Err(_) => return,
						Ok(n) => request.extend_from_slice(&buf[..n]),
					}
					if request.windows(4).any(|w| w == b"\r\n\r\n") {
						break;
					}
				}
				let response = format!(
					"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
					body.len(),
					body
				);
				let _ = stream.write_all(response.as_bytes()).await;
				let _ = stream.shutdown().await;
			});
		}
	});

	addr
}
