//! View tree consumed by the server renderer and by hydration.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use crate::callback::CallbackContext;
use crate::error::BridgeResult;
use crate::events::EventRecord;
use crate::host::Host;
use crate::runtime::BridgeRuntime;

/// Event handler attached to an element view.
pub type ViewEventHandler = Rc<dyn Fn(&EventRecord) + 'static>;

/// Renderable content.
#[derive(Debug, Clone)]
pub enum View {
	/// An element.
	Element(ElementView),
	/// A text node.
	Text(Cow<'static, str>),
	/// Several views without a wrapper element.
	Fragment(Vec<View>),
	/// Markup hoisted into the document head during server rendering.
	Head(Cow<'static, str>),
	/// Renders nothing.
	Empty,
}

/// An element in the view tree.
#[derive(Clone)]
pub struct ElementView {
	tag: Cow<'static, str>,
	attrs: Vec<(Cow<'static, str>, Cow<'static, str>)>,
	children: Vec<View>,
	is_void: bool,
	event_handlers: Vec<(Cow<'static, str>, ViewEventHandler)>,
}

impl fmt::Debug for ElementView {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ElementView")
			.field("tag", &self.tag)
			.field("attrs", &self.attrs)
			.field("children", &self.children)
			.field("event_handlers_count", &self.event_handlers.len())
			.finish()
	}
}

impl ElementView {
	/// Creates a new element view.
	pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
		let tag = tag.into();
		let is_void = matches!(
			tag.as_ref(),
			"area"
				| "base" | "br"
				| "col" | "embed"
				| "hr" | "img"
				| "input" | "link"
				| "meta" | "source"
				| "track" | "wbr"
		);
		Self {
			tag,
			attrs: Vec::new(),
			children: Vec::new(),
			is_void,
			event_handlers: Vec::new(),
		}
	}

	/// Adds an attribute, replacing an existing one of the same name.
	pub fn attr(
		mut self,
		name: impl Into<Cow<'static, str>>,
		value: impl Into<Cow<'static, str>>,
	) -> Self {
		let name = name.into();
		let value = value.into();
		match self.attrs.iter_mut().find(|(n, _)| *n == name) {
			Some(slot) => slot.1 = value,
			None => self.attrs.push((name, value)),
		}
		self
	}

	/// Adds a child view.
	pub fn child(mut self, child: impl IntoView) -> Self {
		self.children.push(child.into_view());
		self
	}

	/// Adds multiple child views.
	pub fn children(mut self, children: impl IntoIterator<Item = impl IntoView>) -> Self {
		self.children
			.extend(children.into_iter().map(|c| c.into_view()));
		self
	}

	/// Adds an event handler.
	pub fn on<F>(mut self, event_type: impl Into<Cow<'static, str>>, handler: F) -> Self
	where
		F: Fn(&EventRecord) + 'static,
	{
		self.event_handlers
			.push((event_type.into(), Rc::new(handler)));
		self
	}

	/// Returns the tag name.
	pub fn tag_name(&self) -> &str {
		&self.tag
	}

	/// Returns the attributes.
	pub fn attrs(&self) -> &[(Cow<'static, str>, Cow<'static, str>)] {
		&self.attrs
	}

	/// Returns an attribute value.
	pub fn get_attr(&self, name: &str) -> Option<&str> {
		self.attrs
			.iter()
			.find(|(n, _)| n == name)
			.map(|(_, v)| v.as_ref())
	}

	/// Returns the child views.
	pub fn child_views(&self) -> &[View] {
		&self.children
	}

	/// Returns whether this is a void element.
	pub fn is_void(&self) -> bool {
		self.is_void
	}

	/// Returns the event handlers.
	pub fn event_handlers(&self) -> &[(Cow<'static, str>, ViewEventHandler)] {
		&self.event_handlers
	}
}

impl View {
	/// Creates an element view.
	pub fn element(tag: impl Into<Cow<'static, str>>) -> ElementView {
		ElementView::new(tag)
	}

	/// Creates a text view.
	pub fn text(content: impl Into<Cow<'static, str>>) -> Self {
		Self::Text(content.into())
	}

	/// Creates a fragment view.
	pub fn fragment(children: impl IntoIterator<Item = impl IntoView>) -> Self {
		Self::Fragment(children.into_iter().map(|c| c.into_view()).collect())
	}

	/// Creates a head entry.
	pub fn head(markup: impl Into<Cow<'static, str>>) -> Self {
		Self::Head(markup.into())
	}

	/// Creates an empty view.
	pub fn empty() -> Self {
		Self::Empty
	}

	/// Returns the views that produce body nodes, with fragments expanded and
	/// head/empty entries dropped.
	pub fn flatten(&self) -> Vec<&View> {
		let mut out = Vec::new();
		self.flatten_into(&mut out);
		out
	}

	fn flatten_into<'a>(&'a self, out: &mut Vec<&'a View>) {
		match self {
			View::Fragment(children) => {
				for child in children {
					child.flatten_into(out);
				}
			}
			View::Head(_) | View::Empty => {}
			other => out.push(other),
		}
	}

	/// Wraps the view so that it has exactly one root element: element views
	/// are returned as is, anything else is placed inside a `<div>`.
	pub fn into_root_element(self) -> ElementView {
		match self {
			View::Element(element) => element,
			other => ElementView::new("div").child(other),
		}
	}
}

/// Conversion into a [`View`].
pub trait IntoView {
	/// Converts self into a View.
	fn into_view(self) -> View;
}

impl IntoView for View {
	fn into_view(self) -> View {
		self
	}
}

impl IntoView for ElementView {
	fn into_view(self) -> View {
		View::Element(self)
	}
}

impl IntoView for String {
	fn into_view(self) -> View {
		View::Text(Cow::Owned(self))
	}
}

impl IntoView for &'static str {
	fn into_view(self) -> View {
		View::Text(Cow::Borrowed(self))
	}
}

impl<T: IntoView> IntoView for Option<T> {
	fn into_view(self) -> View {
		match self {
			Some(v) => v.into_view(),
			None => View::Empty,
		}
	}
}

impl<T: IntoView> IntoView for Vec<T> {
	fn into_view(self) -> View {
		View::Fragment(self.into_iter().map(|v| v.into_view()).collect())
	}
}

impl IntoView for () {
	fn into_view(self) -> View {
		View::Empty
	}
}

impl<A: IntoView, B: IntoView> IntoView for (A, B) {
	fn into_view(self) -> View {
		View::Fragment(vec![self.0.into_view(), self.1.into_view()])
	}
}

impl<A: IntoView, B: IntoView, C: IntoView> IntoView for (A, B, C) {
	fn into_view(self) -> View {
		View::Fragment(vec![
			self.0.into_view(),
			self.1.into_view(),
			self.2.into_view(),
		])
	}
}

/// Adapts a view handler to the callback registry signature.
pub(crate) fn handler_callback(handler: ViewEventHandler) -> impl Fn(&CallbackContext) + 'static {
	move |context: &CallbackContext| {
		if let Some(record) = context.event() {
			handler(record);
		}
	}
}

impl<H: Host> BridgeRuntime<H> {
	/// Creates host nodes for `view` under `parent`, registers their handles
	/// and wires their event handlers with fresh callback ids.
	///
	/// Returns the top-level nodes created.
	pub fn mount_view(&self, parent: &H::Node, view: &View) -> BridgeResult<Vec<H::Node>> {
		let mut mounted = Vec::new();
		for part in view.flatten() {
			let node = match part {
				View::Element(element) => self.build_element(element)?,
				View::Text(text) => {
					let node = self.host().create_text(text);
					self.register_node(&node);
					node
				}
				_ => continue,
			};
			self.host().append_child(parent, &node)?;
			mounted.push(node);
		}
		Ok(mounted)
	}

	pub(crate) fn build_element(&self, element: &ElementView) -> BridgeResult<H::Node> {
		let node = self.host().create_element(element.tag_name())?;
		for (name, value) in element.attrs() {
			self.host().set_attribute(&node, name, value)?;
		}
		let handle = self.register_node(&node);
		if !element.is_void() {
			for child in element.child_views() {
				self.mount_view(&node, child)?;
			}
		}
		for (event_type, handler) in element.event_handlers() {
			let id = self.register_callback(handler_callback(Rc::clone(handler)));
			self.attach(&handle, event_type, &id)?;
		}
		Ok(node)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;
	use rstest::rstest;
	use std::cell::Cell;

	#[rstest]
	fn test_flatten_expands_fragments_and_drops_head() {
		let view = View::fragment(vec![
			View::text("a"),
			View::fragment(vec![View::element("b").into_view(), View::empty()]),
			View::head("<title>x</title>"),
		]);

		let flat = view.flatten();

		assert_eq!(flat.len(), 2);
		assert!(matches!(flat[0], View::Text(t) if t == "a"));
		assert!(matches!(flat[1], View::Element(e) if e.tag_name() == "b"));
	}

	#[rstest]
	fn test_attr_replaces_existing() {
		let element = ElementView::new("div").attr("class", "a").attr("class", "b");
		assert_eq!(element.get_attr("class"), Some("b"));
		assert_eq!(element.attrs().len(), 1);
	}

	#[rstest]
	fn test_into_root_element_wraps_non_elements() {
		let root = View::text("hi").into_root_element();
		assert_eq!(root.tag_name(), "div");
		assert_eq!(root.child_views().len(), 1);
	}

	#[rstest]
	fn test_mount_view_creates_and_wires_nodes() {
		// Arrange
		let runtime = BridgeRuntime::with_host(MemoryHost::new());
		let clicks = Rc::new(Cell::new(0));
		let counter = Rc::clone(&clicks);
		let view = View::element("div")
			.attr("class", "card")
			.child(View::element("button").child("+").on("click", move |_| {
				counter.set(counter.get() + 1);
			}))
			.child("text")
			.into_view();

		// Act
		let body = runtime.host().root();
		let mounted = runtime.mount_view(&body, &view).unwrap();
		let button = runtime.host().element_children(&mounted[0])[0].clone();
		runtime.host().click(&button);

		// Assert
		assert_eq!(mounted.len(), 1);
		assert_eq!(clicks.get(), 1);
		assert_eq!(runtime.listener_count(), 1);
		assert_eq!(runtime.host().text_content(&mounted[0]), "+text");
		assert!(runtime.handle_of(&button).is_some());
	}
}
