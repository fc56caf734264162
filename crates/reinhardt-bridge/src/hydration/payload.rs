//! Hydration payload.
//!
//! Embedded next to the server markup:
//!
//! ```html
//! <script id="rh-hydration" type="application/json">
//!   {"version":1,"callbacks":["cb-0","cb-1"],"timestamp":1700000000,"renderer":"reinhardt-bridge"}
//! </script>
//! ```
//!
//! The client reads `callbacks` to know which ids must resolve to live
//! closures before the page counts as fully interactive.

use serde::{Deserialize, Serialize};

use super::markers::{PAYLOAD_SCRIPT_ID, escape_json_for_script};
use crate::callback::CallbackId;
use crate::error::BridgeResult;

/// Payload describing one server render pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrationPayload {
	/// Payload format version.
	pub version: u32,
	/// Callback ids embedded in the markup, in render order.
	pub callbacks: Vec<CallbackId>,
	/// Render time, seconds since the Unix epoch.
	pub timestamp: u64,
	/// Name of the renderer that produced the markup.
	pub renderer: String,
}

impl HydrationPayload {
	/// Serializes the payload. Field order is fixed, so equal payloads
	/// serialize identically.
	pub fn to_json(&self) -> BridgeResult<String> {
		Ok(serde_json::to_string(self)?)
	}

	/// Parses a payload.
	pub fn from_json(json: &str) -> BridgeResult<Self> {
		Ok(serde_json::from_str(json)?)
	}

	/// Renders the payload script block.
	pub fn to_script_tag(&self) -> BridgeResult<String> {
		Ok(format!(
			r#"<script id="{}" type="application/json">{}</script>"#,
			PAYLOAD_SCRIPT_ID,
			escape_json_for_script(&self.to_json()?)
		))
	}
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_timestamp() -> u64 {
	#[cfg(target_arch = "wasm32")]
	{
		(js_sys::Date::now() / 1000.0) as u64
	}
	#[cfg(not(target_arch = "wasm32"))]
	{
		std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or_default()
	}
}
