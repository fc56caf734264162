//! Hydration markers.
//!
//! Attributes and script blocks the server renderer writes so the client can
//! find each component instance again:
//!
//! ```html
//! <div data-rh-id="counter-0" data-rh-component="counter">
//!   <button data-rh-on-click="cb-0">+</button>
//! </div>
//! <script id="rh-state" type="application/json">
//!   [{"elementId":"counter-0","componentType":"counter","initialState":{"count":5}}]
//! </script>
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Attribute carrying the marker id of a component root.
pub const MARKER_ATTR: &str = "data-rh-id";

/// Attribute carrying the component kind of a component root.
pub const COMPONENT_ATTR: &str = "data-rh-component";

/// Optional attribute carrying a component's serialized state inline.
pub const STATE_ATTR: &str = "data-rh-state";

/// Attribute set on component roots once hydrated.
pub const HYDRATED_ATTR: &str = "data-rh-hydrated";

/// Prefix of event-wiring attributes (`data-rh-on-click="cb-3"`).
pub const EVENT_ATTR_PREFIX: &str = "data-rh-on-";

/// Id of the script block holding every [`MarkerState`].
pub const STATE_SCRIPT_ID: &str = "rh-state";

/// Id of the script block holding the hydration payload.
pub const PAYLOAD_SCRIPT_ID: &str = "rh-hydration";

/// Name of the event-wiring attribute for `event_type`.
pub fn event_attr(event_type: &str) -> String {
	format!("{}{}", EVENT_ATTR_PREFIX, event_type)
}

/// Serialized initial state of one component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerState {
	/// Marker id of the component root.
	pub element_id: String,
	/// Component kind.
	pub component_type: String,
	/// State object written by the server.
	pub initial_state: Value,
}

impl MarkerState {
	/// Creates a marker state entry.
	pub fn new(
		element_id: impl Into<String>,
		component_type: impl Into<String>,
		initial_state: Value,
	) -> Self {
		Self {
			element_id: element_id.into(),
			component_type: component_type.into(),
			initial_state,
		}
	}
}

/// Renders the state script block.
pub fn state_script_tag(states: &[MarkerState]) -> String {
	let json = serde_json::to_string(states).unwrap_or_else(|_| "[]".to_string());
	format!(
		r#"<script id="{}" type="application/json">{}</script>"#,
		STATE_SCRIPT_ID,
		escape_json_for_script(&json)
	)
}

/// Per-kind component id counter: `counter-0`, `counter-1`, `dialog-0`, ...
///
/// Unique within one generator; no global randomness involved.
#[derive(Debug, Default, Clone)]
pub struct ComponentIdGenerator {
	counters: HashMap<String, u64>,
}

impl ComponentIdGenerator {
	/// Creates a generator with all counters at zero.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next id for `kind`.
	pub fn next_id(&mut self, kind: &str) -> String {
		let counter = self.counters.entry(kind.to_string()).or_insert(0);
		let id = format!("{}-{}", kind, counter);
		*counter += 1;
		id
	}

	/// Resets every counter.
	pub fn reset(&mut self) {
		self.counters.clear();
	}
}

/// Escapes a string for use in an HTML attribute value.
pub(crate) fn escape_attr(s: &str) -> String {
	s.replace('&', "&amp;")
		.replace('"', "&quot;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
}

/// Escapes text content.
pub(crate) fn escape_text(s: &str) -> String {
	s.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
		.replace('"', "&quot;")
		.replace('\'', "&#x27;")
}

/// Escapes JSON for embedding in a `<script>` element: `</` becomes `<\/`
/// so the data cannot close the element.
pub(crate) fn escape_json_for_script(json: &str) -> String {
	json.replace("</", "<\\/")
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	fn test_component_ids_count_per_kind() {
		let mut ids = ComponentIdGenerator::new();

		assert_eq!(ids.next_id("counter"), "counter-0");
		assert_eq!(ids.next_id("counter"), "counter-1");
		assert_eq!(ids.next_id("dialog"), "dialog-0");

		ids.reset();
		assert_eq!(ids.next_id("counter"), "counter-0");
	}

	#[rstest]
	fn test_marker_state_wire_format() {
		// Arrange
		let state = MarkerState::new("m2", "counter", json!({"count": 5}));

		// Act
		let value = serde_json::to_value(&state).unwrap();

		// Assert
		assert_eq!(
			value,
			json!({"elementId": "m2", "componentType": "counter", "initialState": {"count": 5}})
		);
	}

	#[rstest]
	fn test_state_script_escapes_closing_tags() {
		let states = vec![MarkerState::new("m", "k", json!({"html": "</script><b>"}))];

		let tag = state_script_tag(&states);

		assert!(tag.starts_with(r#"<script id="rh-state" type="application/json">"#));
		assert!(!tag.contains("</script><b>"));
		assert!(tag.contains(r#"<\/script><b>"#));
	}

	#[rstest]
	#[case("a&b", "a&amp;b")]
	#[case("\"x\"", "&quot;x&quot;")]
	#[case("<i>", "&lt;i&gt;")]
	fn test_escape_attr(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(escape_attr(input), expected);
	}

	#[rstest]
	fn test_event_attr() {
		assert_eq!(event_attr("click"), "data-rh-on-click");
	}
}
