//! Control commands and a handful of DevTools helpers.
//!
//! The control protocol treats methods and parameters as opaque. The helpers
//! below only save callers from spelling out the common DevTools calls.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A method/params pair waiting to be assigned an id and sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
	pub method: String,
	#[serde(default = "empty_params")]
	pub params: Value,
}

fn empty_params() -> Value {
	json!({})
}

impl Command {
	pub fn new(method: impl Into<String>, params: Value) -> Self {
		Self {
			method: method.into(),
			params,
		}
	}

	/// `Page.navigate` to `url`.
	pub fn navigate(url: impl Into<String>) -> Self {
		Self::new("Page.navigate", json!({ "url": url.into() }))
	}

	/// `Runtime.evaluate` of a JavaScript expression in the page.
	pub fn evaluate(expression: impl Into<String>) -> Self {
		Self::new("Runtime.evaluate", json!({ "expression": expression.into(), "returnByValue": true }))
	}

	/// `Page.captureScreenshot`; the response carries base64 PNG in `result.data`.
	pub fn capture_screenshot() -> Self {
		Self::new("Page.captureScreenshot", empty_params())
	}
}
