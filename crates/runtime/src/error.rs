//! Error types for beacon-runtime.

use std::time::Duration;

use beacon_protocol::RemoteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the rendezvous agent, control channel and session driver.
#[derive(Debug, Error)]
pub enum Error {
	/// A transport (bus or control channel) could not be established.
	#[error("failed to connect to {endpoint}: {reason}")]
	Connection { endpoint: String, reason: String },

	/// Nothing arrived within the bound.
	#[error("{operation} timed out after {duration:?}")]
	Timeout { operation: String, duration: Duration },

	/// Sending on an already-open connection failed; the connection is suspect.
	#[error("transport error: {0}")]
	Transport(String),

	/// An operation ran before its connection was set up.
	#[error("not connected: {0}")]
	NotConnected(String),

	/// The channel was closed while the caller was waiting.
	#[error("channel closed")]
	Closed,

	/// A second caller tried to wait on a request id that already has one.
	#[error("request {0} already has a waiter")]
	AlreadyWaiting(u64),

	/// An inbound payload did not match the expected envelope.
	#[error("malformed message: {0}")]
	MalformedMessage(String),

	/// The peer answered a command with an error object.
	#[error("remote error {code}: {message}")]
	Remote { code: i64, message: String },

	/// Configuration could not be loaded or is inconsistent.
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	pub(crate) fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
		Error::Timeout {
			operation: operation.into(),
			duration,
		}
	}

	pub(crate) fn connection(endpoint: impl Into<String>, reason: impl ToString) -> Self {
		Error::Connection {
			endpoint: endpoint.into(),
			reason: reason.to_string(),
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, Error::Closed)
	}
}

impl From<RemoteError> for Error {
	fn from(err: RemoteError) -> Self {
		Error::Remote {
			code: err.code,
			message: err.message,
		}
	}
}
