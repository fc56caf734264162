//! Browser host backed by `web-sys`.
//!
//! Listeners are real `addEventListener` registrations holding a
//! `Closure<dyn FnMut(Event)>`; the closure lives inside the returned
//! [`BrowserListener`] and is dropped after `removeEventListener`, so nothing
//! is forgotten. Paint callbacks use `Closure::once_into_js`, which frees
//! itself when the browser invokes it.

use std::fmt;

use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
	Document, Element, HtmlInputElement, HtmlSelectElement, HtmlTextAreaElement, Node, Window,
};

use super::{FrameCallback, HANDLE_ATTR, Host, HostEvent, NativeListener};
use crate::error::HostError;
use crate::handle::{Handle, Identity};

fn js_reason(value: JsValue) -> String {
	value
		.as_string()
		.unwrap_or_else(|| format!("{:?}", value))
}

/// Wrapper giving `web_sys::Node` handle identity.
#[derive(Clone, PartialEq)]
pub struct BrowserNode(pub Node);

impl BrowserNode {
	fn element(&self) -> Option<&Element> {
		self.0.dyn_ref::<Element>()
	}
}

impl fmt::Debug for BrowserNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("BrowserNode").field(&self.0.node_name()).finish()
	}
}

impl Identity for BrowserNode {
	fn identity(&self) -> Option<String> {
		self.element()?.get_attribute(HANDLE_ATTR)
	}

	fn stamp(&self, handle: &Handle) -> bool {
		match self.element() {
			Some(element) => element.set_attribute(HANDLE_ATTR, handle.as_str()).is_ok(),
			None => false,
		}
	}
}

/// A DOM event as seen by the runtime.
#[derive(Clone)]
pub struct BrowserEvent(pub web_sys::Event);

impl fmt::Debug for BrowserEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("BrowserEvent").field(&self.0.type_()).finish()
	}
}

impl HostEvent for BrowserEvent {
	fn event_type(&self) -> String {
		self.0.type_()
	}

	fn value(&self) -> Option<String> {
		let target = self.0.target()?;
		if let Some(input) = target.dyn_ref::<HtmlInputElement>() {
			return Some(input.value());
		}
		if let Some(area) = target.dyn_ref::<HtmlTextAreaElement>() {
			return Some(area.value());
		}
		target
			.dyn_ref::<HtmlSelectElement>()
			.map(|select| select.value())
	}

	fn checked(&self) -> Option<bool> {
		let target = self.0.target()?;
		let input = target.dyn_ref::<HtmlInputElement>()?;
		matches!(input.type_().as_str(), "checkbox" | "radio").then(|| input.checked())
	}

	fn prevent_default(&self) {
		self.0.prevent_default();
	}

	fn stop_propagation(&self) {
		self.0.stop_propagation();
	}
}

/// An installed DOM listener. Dropping it without removal leaves a dead
/// function registered on the element.
pub struct BrowserListener {
	closure: Closure<dyn FnMut(web_sys::Event)>,
}

impl fmt::Debug for BrowserListener {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BrowserListener").finish_non_exhaustive()
	}
}

/// An outstanding `requestAnimationFrame` id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserFrame(i32);

/// Host backed by the page's `window` and `document`.
#[derive(Clone)]
pub struct BrowserHost {
	window: Window,
	document: Document,
}

impl fmt::Debug for BrowserHost {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BrowserHost").finish_non_exhaustive()
	}
}

impl BrowserHost {
	/// Binds to the global `window`.
	pub fn new() -> Result<Self, HostError> {
		let window =
			web_sys::window().ok_or_else(|| HostError::Unavailable("window".to_string()))?;
		let document = window
			.document()
			.ok_or_else(|| HostError::Unavailable("document".to_string()))?;
		Ok(Self { window, document })
	}

	/// The bound document.
	pub fn document(&self) -> &Document {
		&self.document
	}

	/// Milliseconds since the epoch, from the JS clock.
	pub fn now() -> f64 {
		js_sys::Date::now()
	}
}

fn attribute_selector(name: &str, value: Option<&str>) -> String {
	match value {
		Some(value) => {
			let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
			format!("[{}=\"{}\"]", name, escaped)
		}
		None => format!("[{}]", name),
	}
}

impl Host for BrowserHost {
	type Node = BrowserNode;
	type Event = BrowserEvent;
	type Listener = BrowserListener;
	type Frame = BrowserFrame;

	fn root(&self) -> BrowserNode {
		match self.document.body() {
			Some(body) => BrowserNode(body.into()),
			None => BrowserNode(self.document.clone().into()),
		}
	}

	fn create_element(&self, tag: &str) -> Result<BrowserNode, HostError> {
		self.document
			.create_element(tag)
			.map(|element| BrowserNode(element.into()))
			.map_err(|e| HostError::operation("create_element", js_reason(e)))
	}

	fn create_text(&self, text: &str) -> BrowserNode {
		BrowserNode(self.document.create_text_node(text).into())
	}

	fn append_child(&self, parent: &BrowserNode, child: &BrowserNode) -> Result<(), HostError> {
		parent
			.0
			.append_child(&child.0)
			.map(|_| ())
			.map_err(|e| HostError::operation("append_child", js_reason(e)))
	}

	fn replace_child(
		&self,
		parent: &BrowserNode,
		new: &BrowserNode,
		old: &BrowserNode,
	) -> Result<(), HostError> {
		parent
			.0
			.replace_child(&new.0, &old.0)
			.map(|_| ())
			.map_err(|e| HostError::operation("replace_child", js_reason(e)))
	}

	fn remove_node(&self, node: &BrowserNode) {
		if let Some(parent) = node.0.parent_node() {
			let _ = parent.remove_child(&node.0);
		}
	}

	fn child_nodes(&self, node: &BrowserNode) -> Vec<BrowserNode> {
		let list = node.0.child_nodes();
		(0..list.length())
			.filter_map(|i| list.item(i))
			.map(BrowserNode)
			.collect()
	}

	fn parent(&self, node: &BrowserNode) -> Option<BrowserNode> {
		node.0.parent_node().map(BrowserNode)
	}

	fn is_element(&self, node: &BrowserNode) -> bool {
		node.0.node_type() == Node::ELEMENT_NODE
	}

	fn tag_name(&self, node: &BrowserNode) -> Option<String> {
		node.element().map(|e| e.tag_name().to_ascii_lowercase())
	}

	fn get_attribute(&self, node: &BrowserNode, name: &str) -> Option<String> {
		node.element()?.get_attribute(name)
	}

	fn attribute_names(&self, node: &BrowserNode) -> Vec<String> {
		node.element()
			.map(|element| {
				element
					.get_attribute_names()
					.iter()
					.filter_map(|name| name.as_string())
					.collect()
			})
			.unwrap_or_default()
	}

	fn set_attribute(&self, node: &BrowserNode, name: &str, value: &str) -> Result<(), HostError> {
		let element = node
			.element()
			.ok_or_else(|| HostError::operation("set_attribute", "node is not an element"))?;
		element
			.set_attribute(name, value)
			.map_err(|e| HostError::operation("set_attribute", js_reason(e)))
	}

	fn text_content(&self, node: &BrowserNode) -> String {
		node.0.text_content().unwrap_or_default()
	}

	fn find_by_attribute(&self, name: &str, value: &str) -> Option<BrowserNode> {
		self.document
			.query_selector(&attribute_selector(name, Some(value)))
			.ok()
			.flatten()
			.map(|element| BrowserNode(element.into()))
	}

	fn find_all_with_attribute(&self, name: &str) -> Vec<BrowserNode> {
		let Ok(list) = self.document.query_selector_all(&attribute_selector(name, None)) else {
			return Vec::new();
		};
		(0..list.length())
			.filter_map(|i| list.item(i))
			.map(BrowserNode)
			.collect()
	}

	fn add_event_listener(
		&self,
		node: &BrowserNode,
		event_type: &str,
		listener: NativeListener<BrowserEvent>,
	) -> Result<BrowserListener, HostError> {
		let mut listener = listener;
		let closure = Closure::wrap(Box::new(move |event: web_sys::Event| {
			listener(BrowserEvent(event));
		}) as Box<dyn FnMut(web_sys::Event)>);
		node.0
			.add_event_listener_with_callback(event_type, closure.as_ref().unchecked_ref())
			.map_err(|e| HostError::operation("add_event_listener", js_reason(e)))?;
		Ok(BrowserListener { closure })
	}

	fn remove_event_listener(&self, node: &BrowserNode, event_type: &str, listener: BrowserListener) {
		let _ = node.0.remove_event_listener_with_callback(
			event_type,
			listener.closure.as_ref().unchecked_ref(),
		);
	}

	fn request_animation_frame(&self, callback: FrameCallback) -> Result<BrowserFrame, HostError> {
		let closure = Closure::once_into_js(move |timestamp: f64| callback(timestamp));
		self.window
			.request_animation_frame(closure.unchecked_ref())
			.map(BrowserFrame)
			.map_err(|e| HostError::operation("request_animation_frame", js_reason(e)))
	}

	fn cancel_animation_frame(&self, frame: BrowserFrame) {
		// A cancelled once_into_js closure is never freed by the browser.
		let _ = self.window.cancel_animation_frame(frame.0);
	}
}
