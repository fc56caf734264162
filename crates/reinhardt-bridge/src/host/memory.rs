//! In-memory host document.
//!
//! A small DOM that lives entirely inside the process. Server-rendered markup
//! is parsed with `scraper` into [`MemoryNode`]s, event listeners are stored on
//! the nodes, events bubble to ancestors until stopped, and paint callbacks
//! queue up until [`MemoryHost::tick`] runs them.
//!
//! ```ignore
//! let host = MemoryHost::from_markup(r#"<div data-rh-id="counter-0"><button>+</button></div>"#);
//! let root = host.find_by_attribute("data-rh-id", "counter-0").unwrap();
//! host.click(&host.element_children(&root)[0]);
//! host.tick(16.0);
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use scraper::Html;

use super::{FrameCallback, HANDLE_ATTR, Host, HostEvent, NativeListener};
use crate::error::HostError;
use crate::handle::{Handle, Identity};
use crate::hydration::markers::{escape_attr, escape_text};

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
	"wbr",
];

/// Elements whose text content is serialized verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

enum NodeKind {
	Element {
		tag: String,
		attrs: Vec<(String, String)>,
	},
	Text(String),
}

struct ListenerSlot {
	id: u64,
	event_type: String,
	listener: Rc<RefCell<NativeListener<MemoryEvent>>>,
}

struct NodeData {
	kind: NodeKind,
	children: Vec<MemoryNode>,
	parent: Weak<RefCell<NodeData>>,
	listeners: Vec<ListenerSlot>,
}

/// A node of the in-memory document. Cloning shares the node.
#[derive(Clone)]
pub struct MemoryNode(Rc<RefCell<NodeData>>);

impl MemoryNode {
	/// Creates a detached element.
	pub fn element(tag: &str) -> Self {
		Self::with_kind(NodeKind::Element {
			tag: tag.to_ascii_lowercase(),
			attrs: Vec::new(),
		})
	}

	/// Creates a detached text node.
	pub fn text(text: &str) -> Self {
		Self::with_kind(NodeKind::Text(text.to_string()))
	}

	fn with_kind(kind: NodeKind) -> Self {
		Self(Rc::new(RefCell::new(NodeData {
			kind,
			children: Vec::new(),
			parent: Weak::new(),
			listeners: Vec::new(),
		})))
	}

	/// Returns the tag name for elements.
	pub fn tag(&self) -> Option<String> {
		match &self.0.borrow().kind {
			NodeKind::Element { tag, .. } => Some(tag.clone()),
			NodeKind::Text(_) => None,
		}
	}

	/// Returns true for element nodes.
	pub fn is_element(&self) -> bool {
		matches!(self.0.borrow().kind, NodeKind::Element { .. })
	}

	/// Reads an attribute.
	pub fn attribute(&self, name: &str) -> Option<String> {
		match &self.0.borrow().kind {
			NodeKind::Element { attrs, .. } => attrs
				.iter()
				.find(|(key, _)| key == name)
				.map(|(_, value)| value.clone()),
			NodeKind::Text(_) => None,
		}
	}

	/// Returns the attribute names in insertion order.
	pub fn attribute_names(&self) -> Vec<String> {
		match &self.0.borrow().kind {
			NodeKind::Element { attrs, .. } => attrs.iter().map(|(key, _)| key.clone()).collect(),
			NodeKind::Text(_) => Vec::new(),
		}
	}

	/// Writes an attribute, keeping the position of an existing one.
	/// Returns `false` for text nodes.
	pub fn set_attribute(&self, name: &str, value: &str) -> bool {
		match &mut self.0.borrow_mut().kind {
			NodeKind::Element { attrs, .. } => {
				match attrs.iter_mut().find(|(key, _)| key == name) {
					Some(slot) => slot.1 = value.to_string(),
					None => attrs.push((name.to_string(), value.to_string())),
				}
				true
			}
			NodeKind::Text(_) => false,
		}
	}

	/// Returns the child nodes in document order.
	pub fn children(&self) -> Vec<MemoryNode> {
		self.0.borrow().children.clone()
	}

	/// Returns the parent node, if attached.
	pub fn parent(&self) -> Option<MemoryNode> {
		self.0.borrow().parent.upgrade().map(MemoryNode)
	}

	/// Returns the concatenated text of this node and its descendants.
	pub fn text_content(&self) -> String {
		let data = self.0.borrow();
		match &data.kind {
			NodeKind::Text(text) => text.clone(),
			NodeKind::Element { .. } => data.children.iter().map(|c| c.text_content()).collect(),
		}
	}

	/// Returns the number of native listeners installed on this node.
	pub fn listener_count(&self) -> usize {
		self.0.borrow().listeners.len()
	}

	/// Serializes this node and its descendants.
	pub fn outer_html(&self) -> String {
		let mut out = String::new();
		self.write_html(&mut out, false);
		out
	}

	/// Serializes the descendants of this node.
	pub fn inner_html(&self) -> String {
		let raw = self
			.tag()
			.is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag.as_str()));
		let mut out = String::new();
		for child in self.children() {
			child.write_html(&mut out, raw);
		}
		out
	}

	fn write_html(&self, out: &mut String, raw_text: bool) {
		let data = self.0.borrow();
		match &data.kind {
			NodeKind::Text(text) if raw_text => out.push_str(text),
			NodeKind::Text(text) => out.push_str(&escape_text(text)),
			NodeKind::Element { tag, attrs } => {
				out.push('<');
				out.push_str(tag);
				for (key, value) in attrs {
					out.push_str(&format!(" {}=\"{}\"", key, escape_attr(value)));
				}
				out.push('>');
				if VOID_ELEMENTS.contains(&tag.as_str()) {
					return;
				}
				let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());
				for child in &data.children {
					child.write_html(out, raw);
				}
				out.push_str(&format!("</{}>", tag));
			}
		}
	}

	fn is_ancestor_of(&self, other: &MemoryNode) -> bool {
		let mut current = Some(other.clone());
		while let Some(node) = current {
			if &node == self {
				return true;
			}
			current = node.parent();
		}
		false
	}

	fn detach(&self) {
		if let Some(parent) = self.parent() {
			parent.0.borrow_mut().children.retain(|c| c != self);
		}
		self.0.borrow_mut().parent = Weak::new();
	}

	fn append(&self, child: &MemoryNode) {
		child.detach();
		child.0.borrow_mut().parent = Rc::downgrade(&self.0);
		self.0.borrow_mut().children.push(child.clone());
	}

	fn walk(&self, visit: &mut dyn FnMut(&MemoryNode) -> bool) -> bool {
		if !visit(self) {
			return false;
		}
		for child in self.children() {
			if !child.walk(visit) {
				return false;
			}
		}
		true
	}
}

impl PartialEq for MemoryNode {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}

impl Eq for MemoryNode {}

impl fmt::Debug for MemoryNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.0.borrow().kind {
			NodeKind::Element { tag, attrs } => f
				.debug_struct("MemoryNode")
				.field("tag", tag)
				.field("attrs", attrs)
				.finish(),
			NodeKind::Text(text) => f.debug_tuple("MemoryText").field(text).finish(),
		}
	}
}

impl Identity for MemoryNode {
	fn identity(&self) -> Option<String> {
		self.attribute(HANDLE_ATTR)
	}

	fn stamp(&self, handle: &Handle) -> bool {
		self.set_attribute(HANDLE_ATTR, handle.as_str())
	}
}

struct EventState {
	event_type: String,
	value: RefCell<Option<String>>,
	checked: Cell<Option<bool>>,
	default_prevented: Cell<bool>,
	propagation_stopped: Cell<bool>,
}

/// A simulated host event. Clones share prevent/stop flags.
#[derive(Clone)]
pub struct MemoryEvent(Rc<EventState>);

impl MemoryEvent {
	/// Creates an event of the given type.
	pub fn new(event_type: impl Into<String>) -> Self {
		Self(Rc::new(EventState {
			event_type: event_type.into(),
			value: RefCell::new(None),
			checked: Cell::new(None),
			default_prevented: Cell::new(false),
			propagation_stopped: Cell::new(false),
		}))
	}

	/// Sets the target value carried by the event.
	pub fn with_value(self, value: impl Into<String>) -> Self {
		*self.0.value.borrow_mut() = Some(value.into());
		self
	}

	/// Sets the target checked state carried by the event.
	pub fn with_checked(self, checked: bool) -> Self {
		self.0.checked.set(Some(checked));
		self
	}

	/// Returns true once a listener called `prevent_default`.
	pub fn default_prevented(&self) -> bool {
		self.0.default_prevented.get()
	}

	/// Returns true once a listener called `stop_propagation`.
	pub fn propagation_stopped(&self) -> bool {
		self.0.propagation_stopped.get()
	}
}

impl fmt::Debug for MemoryEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryEvent")
			.field("type", &self.0.event_type)
			.field("value", &self.0.value.borrow())
			.field("checked", &self.0.checked.get())
			.finish()
	}
}

impl HostEvent for MemoryEvent {
	fn event_type(&self) -> String {
		self.0.event_type.clone()
	}

	fn value(&self) -> Option<String> {
		self.0.value.borrow().clone()
	}

	fn checked(&self) -> Option<bool> {
		self.0.checked.get()
	}

	fn prevent_default(&self) {
		self.0.default_prevented.set(true);
	}

	fn stop_propagation(&self) {
		self.0.propagation_stopped.set(true);
	}
}

/// Token for an installed listener.
#[derive(Debug)]
pub struct MemoryListener(u64);

/// Token for an outstanding paint callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFrame(u64);

struct MemoryHostInner {
	document: MemoryNode,
	body: MemoryNode,
	frames: RefCell<Vec<(u64, FrameCallback)>>,
	next_frame: Cell<u64>,
	next_listener: Cell<u64>,
}

/// In-process host. Cloning shares the document.
#[derive(Clone)]
pub struct MemoryHost {
	inner: Rc<MemoryHostInner>,
}

impl Default for MemoryHost {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryHost {
	/// Creates an empty `<html><head></head><body></body></html>` document.
	pub fn new() -> Self {
		let document = MemoryNode::element("html");
		let head = MemoryNode::element("head");
		let body = MemoryNode::element("body");
		document.append(&head);
		document.append(&body);
		Self::from_parts(document, body)
	}

	/// Parses markup into a document.
	///
	/// Full documents (containing `<html`) keep their head and body; fragments
	/// are placed inside the body of an empty document.
	pub fn from_markup(markup: &str) -> Self {
		if markup.to_ascii_lowercase().contains("<html") {
			let parsed = Html::parse_document(markup);
			let document = MemoryNode::element("html");
			import_children(parsed.root_element(), &document);
			let body = document
				.children()
				.into_iter()
				.find(|child| child.tag().as_deref() == Some("body"))
				.unwrap_or_else(|| {
					let body = MemoryNode::element("body");
					document.append(&body);
					body
				});
			Self::from_parts(document, body)
		} else {
			let host = Self::new();
			let parsed = Html::parse_fragment(markup);
			import_children(parsed.root_element(), &host.inner.body);
			host
		}
	}

	fn from_parts(document: MemoryNode, body: MemoryNode) -> Self {
		Self {
			inner: Rc::new(MemoryHostInner {
				document,
				body,
				frames: RefCell::new(Vec::new()),
				next_frame: Cell::new(0),
				next_listener: Cell::new(0),
			}),
		}
	}

	/// The `<html>` element.
	pub fn document(&self) -> MemoryNode {
		self.inner.document.clone()
	}

	/// The `<body>` element.
	pub fn body(&self) -> MemoryNode {
		self.inner.body.clone()
	}

	/// Serializes the body content.
	pub fn body_html(&self) -> String {
		self.inner.body.inner_html()
	}

	/// Fires `event` at `target` and bubbles it to the document root.
	///
	/// Returns `false` if a listener prevented the default action.
	pub fn dispatch(&self, target: &MemoryNode, event: MemoryEvent) -> bool {
		let has_value = event.0.value.borrow().is_some();
		if !has_value && let Some(value) = target.attribute("value") {
			*event.0.value.borrow_mut() = Some(value);
		}
		if event.0.checked.get().is_none() && target.attribute("checked").is_some() {
			event.0.checked.set(Some(true));
		}

		let mut current = Some(target.clone());
		while let Some(node) = current {
			let listeners: Vec<_> = node
				.0
				.borrow()
				.listeners
				.iter()
				.filter(|slot| slot.event_type == event.0.event_type)
				.map(|slot| Rc::clone(&slot.listener))
				.collect();
			for listener in listeners {
				match listener.try_borrow_mut() {
					Ok(mut listener) => listener(event.clone()),
					Err(_) => tracing::warn!(
						event_type = %event.0.event_type,
						"re-entrant dispatch to a running listener skipped"
					),
				}
			}
			if event.propagation_stopped() {
				break;
			}
			current = node.parent();
		}
		!event.default_prevented()
	}

	/// Fires a `click` at `target`.
	pub fn click(&self, target: &MemoryNode) -> bool {
		self.dispatch(target, MemoryEvent::new("click"))
	}

	/// Runs every paint callback queued before this call.
	///
	/// Callbacks requested while ticking wait for the next tick. Returns the
	/// number of callbacks run.
	pub fn tick(&self, timestamp: f64) -> usize {
		let frames = std::mem::take(&mut *self.inner.frames.borrow_mut());
		let count = frames.len();
		for (_, callback) in frames {
			callback(timestamp);
		}
		count
	}

	/// Returns the number of outstanding paint callbacks.
	pub fn pending_frames(&self) -> usize {
		self.inner.frames.borrow().len()
	}

	fn search(&self, mut matches: impl FnMut(&MemoryNode) -> bool, first_only: bool) -> Vec<MemoryNode> {
		let mut found = Vec::new();
		self.inner.document.walk(&mut |node| {
			if matches(node) {
				found.push(node.clone());
				return !first_only;
			}
			true
		});
		found
	}
}

impl fmt::Debug for MemoryHost {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryHost")
			.field("pending_frames", &self.pending_frames())
			.finish()
	}
}

/// Copies the children of a parsed scraper node under `target`.
fn import_children(source: scraper::ElementRef<'_>, target: &MemoryNode) {
	let mut stack = vec![(source.children(), target.clone())];
	loop {
		let Some((iter, parent)) = stack.last_mut() else {
			break;
		};
		let Some(child) = iter.next() else {
			stack.pop();
			continue;
		};
		let parent = parent.clone();
		match child.value() {
			scraper::Node::Element(element) => {
				let node = MemoryNode::element(element.name());
				for (name, value) in element.attrs() {
					node.set_attribute(name, value);
				}
				parent.append(&node);
				stack.push((child.children(), node));
			}
			scraper::Node::Text(text) => parent.append(&MemoryNode::text(text)),
			_ => {}
		}
	}
}

fn is_valid_tag(tag: &str) -> bool {
	tag.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
		&& tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl Host for MemoryHost {
	type Node = MemoryNode;
	type Event = MemoryEvent;
	type Listener = MemoryListener;
	type Frame = MemoryFrame;

	fn root(&self) -> MemoryNode {
		self.body()
	}

	fn create_element(&self, tag: &str) -> Result<MemoryNode, HostError> {
		if !is_valid_tag(tag) {
			return Err(HostError::operation(
				"create_element",
				format!("invalid tag name '{}'", tag),
			));
		}
		Ok(MemoryNode::element(tag))
	}

	fn create_text(&self, text: &str) -> MemoryNode {
		MemoryNode::text(text)
	}

	fn append_child(&self, parent: &MemoryNode, child: &MemoryNode) -> Result<(), HostError> {
		if !parent.is_element() {
			return Err(HostError::operation(
				"append_child",
				"parent is not an element",
			));
		}
		if child.is_ancestor_of(parent) {
			return Err(HostError::operation(
				"append_child",
				"child is an ancestor of parent",
			));
		}
		parent.append(child);
		Ok(())
	}

	fn replace_child(
		&self,
		parent: &MemoryNode,
		new: &MemoryNode,
		old: &MemoryNode,
	) -> Result<(), HostError> {
		if old.parent().as_ref() != Some(parent) {
			return Err(HostError::operation(
				"replace_child",
				"node to replace is not a child of parent",
			));
		}
		if new.is_ancestor_of(parent) {
			return Err(HostError::operation(
				"replace_child",
				"replacement is an ancestor of parent",
			));
		}
		new.detach();
		{
			let mut data = parent.0.borrow_mut();
			if let Some(slot) = data.children.iter_mut().find(|c| *c == old) {
				*slot = new.clone();
			}
		}
		new.0.borrow_mut().parent = Rc::downgrade(&parent.0);
		old.0.borrow_mut().parent = Weak::new();
		Ok(())
	}

	fn remove_node(&self, node: &MemoryNode) {
		node.detach();
	}

	fn child_nodes(&self, node: &MemoryNode) -> Vec<MemoryNode> {
		node.children()
	}

	fn parent(&self, node: &MemoryNode) -> Option<MemoryNode> {
		node.parent()
	}

	fn is_element(&self, node: &MemoryNode) -> bool {
		node.is_element()
	}

	fn tag_name(&self, node: &MemoryNode) -> Option<String> {
		node.tag()
	}

	fn get_attribute(&self, node: &MemoryNode, name: &str) -> Option<String> {
		node.attribute(name)
	}

	fn set_attribute(&self, node: &MemoryNode, name: &str, value: &str) -> Result<(), HostError> {
		if node.set_attribute(name, value) {
			Ok(())
		} else {
			Err(HostError::operation(
				"set_attribute",
				"text nodes have no attributes",
			))
		}
	}

	fn attribute_names(&self, node: &MemoryNode) -> Vec<String> {
		node.attribute_names()
	}

	fn text_content(&self, node: &MemoryNode) -> String {
		node.text_content()
	}

	fn find_by_attribute(&self, name: &str, value: &str) -> Option<MemoryNode> {
		self.search(|node| node.attribute(name).as_deref() == Some(value), true)
			.into_iter()
			.next()
	}

	fn find_all_with_attribute(&self, name: &str) -> Vec<MemoryNode> {
		self.search(|node| node.attribute(name).is_some(), false)
	}

	fn add_event_listener(
		&self,
		node: &MemoryNode,
		event_type: &str,
		listener: NativeListener<MemoryEvent>,
	) -> Result<MemoryListener, HostError> {
		let id = self.inner.next_listener.get();
		self.inner.next_listener.set(id + 1);
		node.0.borrow_mut().listeners.push(ListenerSlot {
			id,
			event_type: event_type.to_string(),
			listener: Rc::new(RefCell::new(listener)),
		});
		Ok(MemoryListener(id))
	}

	fn remove_event_listener(&self, node: &MemoryNode, event_type: &str, listener: MemoryListener) {
		node.0
			.borrow_mut()
			.listeners
			.retain(|slot| !(slot.id == listener.0 && slot.event_type == event_type));
	}

	fn request_animation_frame(&self, callback: FrameCallback) -> Result<MemoryFrame, HostError> {
		let id = self.inner.next_frame.get();
		self.inner.next_frame.set(id + 1);
		self.inner.frames.borrow_mut().push((id, callback));
		Ok(MemoryFrame(id))
	}

	fn cancel_animation_frame(&self, frame: MemoryFrame) {
		self.inner
			.frames
			.borrow_mut()
			.retain(|(id, _)| *id != frame.0);
	}
}
