//! Runtime configuration.
//!
//! ```ignore
//! use reinhardt_bridge::BridgeOptions;
//!
//! let options = BridgeOptions::new()
//!     .handle_prefix("app-h")
//!     .leak_warning_threshold(50_000);
//!
//! // Or from a JSON settings fragment
//! let options = BridgeOptions::from_json(r#"{"renderer_name": "edge-ssr"}"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Version of the hydration payload format written by this crate.
pub const PAYLOAD_VERSION: u32 = 1;

/// Default number of live handles or callbacks above which a leak warning is logged.
const DEFAULT_LEAK_WARNING_THRESHOLD: usize = 10_000;

/// Options shared by the client runtime and the server renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
	/// Prefix for minted handles (`{prefix}-{n}`).
	pub handle_prefix: String,
	/// Prefix for generated callback ids (`{prefix}-{n}`).
	pub callback_prefix: String,
	/// Live handle / callback count above which a leak warning is emitted once.
	pub leak_warning_threshold: usize,
	/// Payload version written into (and expected from) the hydration payload.
	pub payload_version: u32,
	/// Renderer name written into the hydration payload.
	pub renderer_name: String,
}

impl Default for BridgeOptions {
	fn default() -> Self {
		Self {
			handle_prefix: "rh-h".to_string(),
			callback_prefix: "cb".to_string(),
			leak_warning_threshold: DEFAULT_LEAK_WARNING_THRESHOLD,
			payload_version: PAYLOAD_VERSION,
			renderer_name: "reinhardt-bridge".to_string(),
		}
	}
}

impl BridgeOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Parses options from a JSON object. Missing fields take their defaults.
	pub fn from_json(json: &str) -> BridgeResult<Self> {
		let options: Self =
			serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
		options.validate()?;
		Ok(options)
	}

	/// Checks that the options can produce well-formed identifiers.
	pub fn validate(&self) -> BridgeResult<()> {
		for (name, prefix) in [
			("handle_prefix", &self.handle_prefix),
			("callback_prefix", &self.callback_prefix),
		] {
			if prefix.is_empty() {
				return Err(BridgeError::Config(format!("{} must not be empty", name)));
			}
			if prefix
				.chars()
				.any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '<' || c == '>')
			{
				return Err(BridgeError::Config(format!(
					"{} contains characters that cannot appear in an attribute value",
					name
				)));
			}
		}
		if self.leak_warning_threshold == 0 {
			return Err(BridgeError::Config(
				"leak_warning_threshold must be greater than zero".to_string(),
			));
		}
		Ok(())
	}

	/// Sets the handle prefix.
	pub fn handle_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.handle_prefix = prefix.into();
		self
	}

	/// Sets the callback id prefix.
	pub fn callback_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.callback_prefix = prefix.into();
		self
	}

	/// Sets the leak warning threshold.
	pub fn leak_warning_threshold(mut self, threshold: usize) -> Self {
		self.leak_warning_threshold = threshold;
		self
	}

	/// Sets the renderer name recorded in hydration payloads.
	pub fn renderer_name(mut self, name: impl Into<String>) -> Self {
		self.renderer_name = name.into();
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_bridge_options_default() {
		let options = BridgeOptions::default();
		assert_eq!(options.handle_prefix, "rh-h");
		assert_eq!(options.callback_prefix, "cb");
		assert_eq!(options.payload_version, PAYLOAD_VERSION);
		assert!(options.validate().is_ok());
	}

	#[rstest]
	fn test_bridge_options_from_partial_json() {
		// Arrange
		let json = r#"{"renderer_name": "edge-ssr", "leak_warning_threshold": 5}"#;

		// Act
		let options = BridgeOptions::from_json(json).unwrap();

		// Assert
		assert_eq!(options.renderer_name, "edge-ssr");
		assert_eq!(options.leak_warning_threshold, 5);
		assert_eq!(options.callback_prefix, "cb");
	}

	#[rstest]
	#[case(r#"{"handle_prefix": ""}"#)]
	#[case(r#"{"callback_prefix": "cb x"}"#)]
	#[case(r#"{"leak_warning_threshold": 0}"#)]
	#[case(r#"{"handle_prefix": 3}"#)]
	fn test_bridge_options_rejects_invalid(#[case] json: &str) {
		let result = BridgeOptions::from_json(json);
		assert!(matches!(result, Err(BridgeError::Config(_))));
	}

	#[rstest]
	fn test_bridge_options_builder() {
		let options = BridgeOptions::new()
			.handle_prefix("app-h")
			.callback_prefix("app-cb")
			.leak_warning_threshold(42)
			.renderer_name("test");

		assert_eq!(options.handle_prefix, "app-h");
		assert_eq!(options.callback_prefix, "app-cb");
		assert_eq!(options.leak_warning_threshold, 42);
		assert_eq!(options.renderer_name, "test");
	}
}
