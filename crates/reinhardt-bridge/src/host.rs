//! Host boundary.
//!
//! Everything the runtime needs from the environment that owns the real
//! document: node creation and traversal, attributes, native event
//! listeners, and the paint-callback scheduler. Values returned across this
//! boundary are either primitives or opaque host objects that the runtime
//! immediately files into its [`HandleTable`](crate::handle::HandleTable).
//!
//! Two hosts ship with the crate:
//!
//! - [`memory::MemoryHost`]: an in-process document used for server-side
//!   tests and native tooling. It parses markup, fires simulated events with
//!   bubbling, and runs paint callbacks on [`memory::MemoryHost::tick`].
//! - `browser::BrowserHost` (`wasm32` only): the real DOM via `web-sys`.

use std::fmt;

use crate::error::HostError;
use crate::handle::Identity;

pub mod memory;

#[cfg(target_arch = "wasm32")]
pub mod browser;

/// The attribute used to stamp handles onto elements.
pub const HANDLE_ATTR: &str = "data-rh-handle";

/// Narrow view of a host event.
///
/// Only the fields components actually need are extracted eagerly; the
/// original event stays on the host side and is reachable solely through
/// [`prevent_default`](HostEvent::prevent_default) and
/// [`stop_propagation`](HostEvent::stop_propagation).
pub trait HostEvent {
	/// The event type tag (`"click"`, `"input"`, ...).
	fn event_type(&self) -> String;

	/// Current value of the event target, for form controls.
	fn value(&self) -> Option<String>;

	/// Checked state of the event target, for checkboxes and radios.
	fn checked(&self) -> Option<bool>;

	/// Calls `preventDefault` on the original host event.
	fn prevent_default(&self);

	/// Calls `stopPropagation` on the original host event.
	fn stop_propagation(&self);
}

/// Native listener installed by the runtime.
pub type NativeListener<E> = Box<dyn FnMut(E) + 'static>;

/// Paint callback handed to the host scheduler.
pub type FrameCallback = Box<dyn FnOnce(f64) + 'static>;

/// The environment owning the real document.
pub trait Host: 'static {
	/// A live node. Equality is host identity.
	type Node: Identity + fmt::Debug + 'static;
	/// A host event object.
	type Event: HostEvent + 'static;
	/// Token needed to remove an installed native listener.
	type Listener: 'static;
	/// Token for an outstanding paint callback.
	type Frame: Clone + fmt::Debug + 'static;

	/// The node under which client-only components are mounted by default.
	fn root(&self) -> Self::Node;

	/// Creates a detached element.
	fn create_element(&self, tag: &str) -> Result<Self::Node, HostError>;

	/// Creates a detached text node.
	fn create_text(&self, text: &str) -> Self::Node;

	/// Appends `child` as the last child of `parent`.
	fn append_child(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;

	/// Replaces `old` (a child of `parent`) with `new`.
	fn replace_child(
		&self,
		parent: &Self::Node,
		new: &Self::Node,
		old: &Self::Node,
	) -> Result<(), HostError>;

	/// Detaches a node from its parent. Detached nodes are left untouched.
	fn remove_node(&self, node: &Self::Node);

	/// Returns all child nodes, text included, in document order.
	fn child_nodes(&self, node: &Self::Node) -> Vec<Self::Node>;

	/// Returns the parent node, if attached.
	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

	/// Returns true for element nodes.
	fn is_element(&self, node: &Self::Node) -> bool;

	/// Returns the lower-case tag name of an element.
	fn tag_name(&self, node: &Self::Node) -> Option<String>;

	/// Reads an attribute of an element.
	fn get_attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

	/// Returns the attribute names of an element in document order. Empty for
	/// text nodes.
	fn attribute_names(&self, node: &Self::Node) -> Vec<String>;

	/// Writes an attribute of an element.
	fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), HostError>;

	/// Returns the concatenated text content of a node.
	fn text_content(&self, node: &Self::Node) -> String;

	/// Finds the first element whose attribute `name` equals `value`.
	fn find_by_attribute(&self, name: &str, value: &str) -> Option<Self::Node>;

	/// Finds all elements carrying attribute `name`, in document order.
	fn find_all_with_attribute(&self, name: &str) -> Vec<Self::Node>;

	/// Installs a native listener.
	fn add_event_listener(
		&self,
		node: &Self::Node,
		event_type: &str,
		listener: NativeListener<Self::Event>,
	) -> Result<Self::Listener, HostError>;

	/// Removes a previously installed native listener.
	fn remove_event_listener(&self, node: &Self::Node, event_type: &str, listener: Self::Listener);

	/// Requests a callback before the next paint.
	fn request_animation_frame(&self, callback: FrameCallback) -> Result<Self::Frame, HostError>;

	/// Cancels an outstanding paint callback.
	fn cancel_animation_frame(&self, frame: Self::Frame);

	/// Removes all children of `node`.
	fn clear_children(&self, node: &Self::Node) {
		for child in self.child_nodes(node) {
			self.remove_node(&child);
		}
	}

	/// Returns only the element children of `node`.
	fn element_children(&self, node: &Self::Node) -> Vec<Self::Node> {
		self.child_nodes(node)
			.into_iter()
			.filter(|child| self.is_element(child))
			.collect()
	}
}
