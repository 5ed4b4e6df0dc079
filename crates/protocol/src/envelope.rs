//! Control-channel envelopes.
//!
//! Requests carry a connection-unique integer id:
//!
//! ```json
//! {"id": 1, "method": "Page.navigate", "params": {"url": "http://10.0.0.5"}}
//! ```
//!
//! Responses echo the id next to method-specific fields. Anything without an
//! `id` is an out-of-band event:
//!
//! ```json
//! {"id": 1, "result": {"frameId": "A1"}}
//! {"id": 2, "error": {"code": -32601, "message": "'Foo.bar' wasn't found"}}
//! {"method": "Page.loadEventFired", "params": {"timestamp": 1.5}}
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	pub params: Value,
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Inbound message, split on the presence of `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	/// A reply to request `id`; `payload` is every field except `id`.
	Response { id: u64, payload: Value },
	/// An event notification, passed through untouched.
	Event(Value),
}

impl Inbound {
	/// Parses raw transport text.
	///
	/// Fails when the text is not a JSON object or when `id` is present but not
	/// an unsigned integer.
	pub fn parse(text: &str) -> serde_json::Result<Self> {
		let value: Value = serde_json::from_str(text)?;
		let Value::Object(mut fields) = value else {
			return Err(serde_json::Error::custom("expected a JSON object"));
		};

		match fields.remove("id") {
			None => Ok(Inbound::Event(Value::Object(fields))),
			Some(id) => {
				let id = id
					.as_u64()
					.ok_or_else(|| serde_json::Error::custom(format!("`id` must be an unsigned integer, got {id}")))?;
				Ok(Inbound::Response {
					id,
					payload: Value::Object(fields),
				})
			}
		}
	}
}

/// Splits a response payload into its `result` or its `error`.
///
/// A payload with neither is treated as an empty successful result.
pub fn response_outcome(payload: Value) -> Result<Value, RemoteError> {
	let mut fields = match payload {
		Value::Object(fields) => fields,
		other => return Ok(other),
	};

	if let Some(error) = fields.remove("error") {
		return Err(remote_error(error));
	}
	Ok(fields.remove("result").unwrap_or_else(|| Value::Object(Map::new())))
}

fn remote_error(error: Value) -> RemoteError {
	match serde_json::from_value::<RemoteError>(error.clone()) {
		Ok(parsed) => parsed,
		Err(_) => RemoteError {
			code: 0,
			message: error.as_str().map(str::to_owned).unwrap_or_else(|| error.to_string()),
			data: None,
		},
	}
}
