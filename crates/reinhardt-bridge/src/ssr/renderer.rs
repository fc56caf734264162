//! Server renderer.
//!
//! One renderer per request. Each pass runs inside a callback render scope:
//! every handler met in the view is registered, written into the markup as
//! `data-rh-on-<event>="<id>"` and collected for the hydration payload. A
//! failed pass abandons its scope so no id leaks into later passes.

use serde_json::{Map, Value};
use std::rc::Rc;

use crate::callback::{CallbackId, CallbackRegistry};
use crate::config::BridgeOptions;
use crate::error::{BridgeError, BridgeResult};
use crate::hydration::markers::{
	COMPONENT_ATTR, ComponentIdGenerator, MARKER_ATTR, MarkerState, escape_attr, escape_text,
	event_attr, state_script_tag,
};
use crate::hydration::payload::{HydrationPayload, unix_timestamp};
use crate::state::ComponentScope;
use crate::view::{ElementView, IntoView, View, handler_callback};

/// Options for server rendering.
#[derive(Debug, Clone)]
pub struct SsrOptions {
	/// Language attribute for the HTML element.
	pub lang: String,
	/// Whether to include the marker state script.
	pub include_state_script: bool,
	/// Whether to include the hydration payload script.
	pub include_payload_script: bool,
	/// Whether to minify the output.
	pub minify: bool,
	/// Fixed payload timestamp. `None` uses the current time.
	pub timestamp: Option<u64>,
}

impl Default for SsrOptions {
	fn default() -> Self {
		Self {
			lang: "en".to_string(),
			include_state_script: true,
			include_payload_script: true,
			minify: false,
			timestamp: None,
		}
	}
}

impl SsrOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the language.
	pub fn lang(mut self, lang: impl Into<String>) -> Self {
		self.lang = lang.into();
		self
	}

	/// Omits the marker state script.
	pub fn no_state_script(mut self) -> Self {
		self.include_state_script = false;
		self
	}

	/// Omits the hydration payload script.
	pub fn no_payload_script(mut self) -> Self {
		self.include_payload_script = false;
		self
	}

	/// Enables minification.
	pub fn minify(mut self) -> Self {
		self.minify = true;
		self
	}

	/// Pins the payload timestamp.
	pub fn timestamp(mut self, timestamp: u64) -> Self {
		self.timestamp = Some(timestamp);
		self
	}
}

/// Result of one render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
	/// Body markup.
	pub markup: String,
	/// Markup hoisted out of the view for the document head.
	pub head_elements: Vec<String>,
	/// Callback ids written into the markup, in render order.
	pub callback_ids: Vec<CallbackId>,
}

/// Renders views to markup with hydration markers.
pub struct ServerRenderer {
	options: SsrOptions,
	bridge: BridgeOptions,
	callbacks: CallbackRegistry,
	ids: ComponentIdGenerator,
	states: Vec<MarkerState>,
}

impl Default for ServerRenderer {
	fn default() -> Self {
		Self::new()
	}
}

impl ServerRenderer {
	/// Creates a renderer with default options.
	pub fn new() -> Self {
		Self::with_options(SsrOptions::default(), BridgeOptions::default())
	}

	/// Creates a renderer with custom options.
	pub fn with_options(options: SsrOptions, bridge: BridgeOptions) -> Self {
		let callbacks = CallbackRegistry::new(
			bridge.callback_prefix.clone(),
			bridge.leak_warning_threshold,
		);
		Self {
			options,
			bridge,
			callbacks,
			ids: ComponentIdGenerator::new(),
			states: Vec::new(),
		}
	}

	/// Returns the rendering options.
	pub fn options(&self) -> &SsrOptions {
		&self.options
	}

	/// Returns the callback registry of this request.
	pub fn callbacks(&self) -> &CallbackRegistry {
		&self.callbacks
	}

	/// Marker states collected so far.
	pub fn states(&self) -> &[MarkerState] {
		&self.states
	}

	/// Renders a component under a freshly generated marker id (`{kind}-{n}`).
	pub fn render_component<F>(&mut self, kind: &str, initial_state: Value, producer: F) -> View
	where
		F: FnOnce(&ComponentScope) -> View,
	{
		let marker_id = self.ids.next_id(kind);
		self.render_component_as(marker_id, kind, initial_state, producer)
	}

	/// Renders a component under `marker_id`.
	///
	/// The root element receives the marker attributes and the component's
	/// state snapshot is recorded for the state script.
	pub fn render_component_as<F>(
		&mut self,
		marker_id: impl Into<String>,
		kind: impl Into<String>,
		initial_state: Value,
		producer: F,
	) -> View
	where
		F: FnOnce(&ComponentScope) -> View,
	{
		let marker_id = marker_id.into();
		let kind = kind.into();
		let declared = match initial_state {
			Value::Object(map) => map,
			_ => Map::new(),
		};
		let scope = ComponentScope::server(marker_id.clone(), kind.clone(), declared);
		let root = producer(&scope)
			.into_root_element()
			.attr(MARKER_ATTR, marker_id.clone())
			.attr(COMPONENT_ATTR, kind.clone());

		let state = MarkerState::new(marker_id.clone(), kind, scope.snapshot());
		match self.states.iter_mut().find(|s| s.element_id == marker_id) {
			Some(existing) => {
				tracing::warn!(marker = %marker_id, "marker rendered twice; keeping the latest state");
				*existing = state;
			}
			None => self.states.push(state),
		}
		root.into_view()
	}

	/// Renders `view` to markup.
	pub fn render_to_markup(&mut self, view: &View) -> BridgeResult<RenderOutput> {
		if !self.callbacks.begin_render() {
			return Err(BridgeError::Render("a render pass is already open".to_string()));
		}
		let mut markup = String::new();
		let mut head_elements = Vec::new();
		match self.write_view(view, &mut markup, &mut head_elements) {
			Ok(()) => {
				let callback_ids = self.callbacks.finish_render_and_collect_callback_ids();
				tracing::debug!(
					bytes = markup.len(),
					callbacks = callback_ids.len(),
					"render pass finished"
				);
				Ok(RenderOutput {
					markup,
					head_elements,
					callback_ids,
				})
			}
			Err(e) => {
				let released = self.callbacks.abandon_render_context();
				tracing::warn!(error = %e, released, "render pass abandoned");
				Err(e)
			}
		}
	}

	fn write_view(
		&mut self,
		view: &View,
		out: &mut String,
		head: &mut Vec<String>,
	) -> BridgeResult<()> {
		match view {
			View::Element(element) => self.write_element(element, out, head)?,
			View::Text(text) => out.push_str(&escape_text(text)),
			View::Fragment(children) => {
				for child in children {
					self.write_view(child, out, head)?;
				}
			}
			View::Head(markup) => head.push(markup.to_string()),
			View::Empty => {}
		}
		Ok(())
	}

	fn write_element(
		&mut self,
		element: &ElementView,
		out: &mut String,
		head: &mut Vec<String>,
	) -> BridgeResult<()> {
		let tag = element.tag_name();
		if !is_valid_name(tag) {
			return Err(BridgeError::Render(format!("invalid tag name '{}'", tag)));
		}
		out.push('<');
		out.push_str(tag);
		for (name, value) in element.attrs() {
			if !is_valid_name(name) {
				return Err(BridgeError::Render(format!(
					"invalid attribute name '{}' on <{}>",
					name, tag
				)));
			}
			out.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
		}
		for (event_type, handler) in element.event_handlers() {
			let id = self
				.callbacks
				.register(handler_callback(Rc::clone(handler)));
			out.push_str(&format!(
				" {}=\"{}\"",
				event_attr(event_type),
				escape_attr(id.as_str())
			));
		}
		out.push('>');

		if element.is_void() {
			return Ok(());
		}
		for child in element.child_views() {
			self.write_view(child, out, head)?;
		}
		out.push_str("</");
		out.push_str(tag);
		out.push('>');
		Ok(())
	}

	/// Builds the hydration payload for a finished pass.
	pub fn payload(&self, output: &RenderOutput) -> HydrationPayload {
		HydrationPayload {
			version: self.bridge.payload_version,
			callbacks: output.callback_ids.clone(),
			timestamp: self.options.timestamp.unwrap_or_else(unix_timestamp),
			renderer: self.bridge.renderer_name.clone(),
		}
	}

	/// Serializes the collected marker states.
	pub fn state_json(&self) -> BridgeResult<String> {
		Ok(serde_json::to_string(&self.states)?)
	}

	/// Renders `view` to a full HTML document.
	pub fn render_document(&mut self, view: &View) -> BridgeResult<String> {
		let output = self.render_to_markup(view)?;
		self.wrap_in_html(&output)
	}

	/// Wraps a finished pass in a full HTML document.
	pub fn wrap_in_html(&self, output: &RenderOutput) -> BridgeResult<String> {
		let mut html = String::with_capacity(output.markup.len() + 1024);

		html.push_str("<!DOCTYPE html>\n");
		html.push_str(&format!("<html lang=\"{}\">\n", escape_attr(&self.options.lang)));

		html.push_str("<head>\n");
		html.push_str("<meta charset=\"UTF-8\">\n");
		html.push_str(
			"<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
		);
		for element in &output.head_elements {
			html.push_str(element);
			html.push('\n');
		}
		html.push_str("</head>\n");

		html.push_str("<body>\n");
		html.push_str("<div id=\"app\">");
		html.push_str(&output.markup);
		html.push_str("</div>\n");

		if self.options.include_state_script && !self.states.is_empty() {
			html.push_str(&state_script_tag(&self.states));
			html.push('\n');
		}
		if self.options.include_payload_script {
			html.push_str(&self.payload(output).to_script_tag()?);
			html.push('\n');
		}

		html.push_str("</body>\n");
		html.push_str("</html>");

		if self.options.minify {
			Ok(minify_html(&html))
		} else {
			Ok(html)
		}
	}
}

fn is_valid_name(name: &str) -> bool {
	name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

/// Maximum input size for HTML minification (1 MiB).
///
/// Larger inputs are returned unmodified.
const MINIFY_HTML_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// Elements whose content is copied verbatim.
const PRESERVED_ELEMENTS: [&str; 4] = ["pre", "script", "style", "textarea"];

/// Collapses whitespace runs in markup.
///
/// The content of [`PRESERVED_ELEMENTS`] and quoted attribute values are
/// left untouched, so embedded state and payload JSON survive byte for byte.
fn minify_html(html: &str) -> String {
	if html.len() > MINIFY_HTML_MAX_INPUT_SIZE {
		return html.to_string();
	}

	let mut result = String::with_capacity(html.len());
	let mut prev_was_whitespace = false;
	let mut in_tag = false;
	let mut quote: Option<char> = None;
	let mut opening: Option<&'static str> = None;
	let mut preserved: Option<&'static str> = None;
	let mut pos = 0;

	while pos < html.len() {
		let remaining = &html[pos..];

		if let Some(name) = preserved.take() {
			let end = remaining
				.find(&format!("</{}", name))
				.unwrap_or(remaining.len());
			result.push_str(&remaining[..end]);
			pos += end;
			prev_was_whitespace = false;
			continue;
		}

		let Some(c) = remaining.chars().next() else {
			break;
		};
		pos += c.len_utf8();

		if let Some(open) = quote {
			if c == open {
				quote = None;
			}
			result.push(c);
			continue;
		}

		if in_tag {
			match c {
				'"' | '\'' => quote = Some(c),
				'>' => {
					in_tag = false;
					preserved = opening.take();
				}
				_ => {}
			}
		} else if c == '<' {
			in_tag = true;
			opening = preserved_element(&remaining[1..]);
		}

		if c.is_whitespace() {
			if !prev_was_whitespace {
				result.push(' ');
				prev_was_whitespace = true;
			}
		} else {
			result.push(c);
			prev_was_whitespace = false;
		}
	}

	result
}

/// Returns the preserved element a tag (without its `<`) opens, if any.
fn preserved_element(tag: &str) -> Option<&'static str> {
	PRESERVED_ELEMENTS.into_iter().find(|name| {
		tag.strip_prefix(name).is_some_and(|after| {
			after.is_empty()
				|| after.starts_with(|ch: char| ch == '>' || ch == '/' || ch.is_ascii_whitespace())
		})
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	fn counter(scope: &ComponentScope) -> View {
		let count = scope.use_state("count", 0i64);
		View::element("div")
			.child(View::element("span").child(format!("{}", count.get())))
			.child(View::element("button").child("+").on("click", move |_| {
				count.update(|n| *n += 1);
			}))
			.into_view()
	}

	#[rstest]
	fn test_render_component_writes_markers_and_state() {
		// Arrange
		let mut renderer = ServerRenderer::new();

		// Act
		let view = renderer.render_component("counter", json!({"count": 5}), counter);
		let output = renderer.render_to_markup(&view).unwrap();

		// Assert
		assert_eq!(
			output.markup,
			r#"<div data-rh-id="counter-0" data-rh-component="counter"><span>5</span><button data-rh-on-click="cb-0">+</button></div>"#
		);
		assert_eq!(output.callback_ids, vec![CallbackId::from("cb-0")]);
		assert_eq!(
			renderer.state_json().unwrap(),
			r#"[{"elementId":"counter-0","componentType":"counter","initialState":{"count":5}}]"#
		);
	}

	#[rstest]
	fn test_void_elements_and_escaping() {
		let mut renderer = ServerRenderer::new();
		let view = View::element("p")
			.attr("title", "a \"b\"")
			.child("<x> & y")
			.child(View::element("br"))
			.child(View::element("input").attr("value", "1"))
			.into_view();

		let output = renderer.render_to_markup(&view).unwrap();

		assert_eq!(
			output.markup,
			r#"<p title="a &quot;b&quot;">&lt;x&gt; &amp; y<br><input value="1"></p>"#
		);
	}

	#[rstest]
	fn test_head_entries_are_hoisted() {
		let mut renderer = ServerRenderer::new();
		let view = View::fragment(vec![
			View::head("<title>Counter</title>"),
			View::element("main").into_view(),
		]);

		let output = renderer.render_to_markup(&view).unwrap();

		assert_eq!(output.markup, "<main></main>");
		assert_eq!(output.head_elements, vec!["<title>Counter</title>".to_string()]);
	}

	#[rstest]
	fn test_failed_pass_abandons_registered_callbacks() {
		// Arrange
		let mut renderer = ServerRenderer::new();
		let view = View::element("div")
			.child(View::element("button").on("click", |_| {}))
			.child(View::element("bad tag"))
			.into_view();

		// Act
		let result = renderer.render_to_markup(&view);

		// Assert
		assert!(matches!(result, Err(BridgeError::Render(_))));
		assert!(renderer.callbacks().is_empty());
		assert!(!renderer.callbacks().is_rendering());
	}

	#[rstest]
	fn test_second_pass_never_reuses_live_ids() {
		let mut renderer = ServerRenderer::new();
		let view = View::element("button").on("click", |_| {}).into_view();

		let first = renderer.render_to_markup(&view).unwrap();
		let second = renderer.render_to_markup(&view).unwrap();

		assert_eq!(first.callback_ids.len(), 1);
		assert_eq!(second.callback_ids.len(), 1);
		assert_ne!(first.callback_ids, second.callback_ids);
	}

	#[rstest]
	fn test_render_document_embeds_state_and_payload() {
		// Arrange
		let mut renderer =
			ServerRenderer::with_options(SsrOptions::new().lang("ja").timestamp(42), BridgeOptions::default());
		let view = renderer.render_component_as("m2", "counter", json!({"count": 5}), counter);

		// Act
		let html = renderer.render_document(&view).unwrap();

		// Assert
		assert!(html.starts_with("<!DOCTYPE html>\n<html lang=\"ja\">"));
		assert!(html.contains(r#"<div id="app"><div data-rh-id="m2""#));
		assert!(html.contains(r#"<script id="rh-state" type="application/json">[{"elementId":"m2""#));
		assert!(html.contains(
			r#"{"version":1,"callbacks":["cb-0"],"timestamp":42,"renderer":"reinhardt-bridge"}"#
		));
	}

	#[rstest]
	fn test_document_without_scripts() {
		let mut renderer = ServerRenderer::with_options(
			SsrOptions::new().no_state_script().no_payload_script(),
			BridgeOptions::default(),
		);
		let view = renderer.render_component("counter", json!({}), counter);

		let html = renderer.render_document(&view).unwrap();

		assert!(!html.contains("<script"));
	}

	#[rstest]
	fn test_minify_preserves_pre() {
		let html = "<div>\n   <p>a   b</p>\n<pre>  keep\n  this </pre>  </div>";
		assert_eq!(
			minify_html(html),
			"<div> <p>a b</p> <pre>  keep\n  this </pre> </div>"
		);
	}

	#[rstest]
	#[case(
		r#"<script id="rh-state" type="application/json">{"name":"a    b"}</script>"#,
		r#"<script id="rh-state" type="application/json">{"name":"a    b"}</script>"#
	)]
	#[case("<textarea>  two\n lines </textarea>   x", "<textarea>  two\n lines </textarea> x")]
	#[case(r#"<p   title="a   b"   data-x='c  d'>  y  </p>"#, r#"<p title="a   b" data-x='c  d'> y </p>"#)]
	#[case("<preview>  a  </preview>", "<preview> a </preview>")]
	fn test_minify_keeps_raw_text_and_attribute_values(#[case] html: &str, #[case] expected: &str) {
		assert_eq!(minify_html(html), expected);
	}

	#[rstest]
	fn test_minified_document_keeps_state_json() {
		// Arrange
		let mut renderer =
			ServerRenderer::with_options(SsrOptions::new().minify().timestamp(1), BridgeOptions::default());
		let view = View::element("p").attr("title", "x  y").into_view();
		let view = renderer.render_component_as("m1", "note", json!({"name": "a    b"}), move |_| view);

		// Act
		let html = renderer.render_document(&view).unwrap();

		// Assert
		assert!(html.contains(r#"{"name":"a    b"}"#));
		assert!(html.contains(r#"title="x  y""#));
	}

	#[rstest]
	fn test_payload_uses_bridge_options() {
		let mut renderer = ServerRenderer::with_options(
			SsrOptions::new().timestamp(7),
			BridgeOptions::new().renderer_name("edge"),
		);
		let output = renderer.render_to_markup(&View::empty()).unwrap();

		let payload = renderer.payload(&output);

		assert_eq!(payload.renderer, "edge");
		assert_eq!(payload.timestamp, 7);
		assert!(payload.callbacks.is_empty());
	}
}
