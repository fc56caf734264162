//! Bridge runtime.
//!
//! [`BridgeRuntime`] is the single context object a document (client) owns.
//! It ties the [`HandleTable`], the [`CallbackRegistry`], the event table and
//! the recomposition frame slot to one [`Host`].
//!
//! All state sits behind `RefCell`s on a single thread. No borrow is ever held
//! while a user closure runs: closures are cloned out of the registry first,
//! so handlers are free to call back into the runtime.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::callback::{CallbackContext, CallbackId, CallbackRegistry};
use crate::config::BridgeOptions;
use crate::error::{BridgeError, BridgeResult};
use crate::events::EventTable;
use crate::handle::{Handle, HandleTable, Identity};
use crate::host::Host;
use crate::scheduler::FrameState;

/// Observability collaborator for errors that must not cross the host boundary.
pub type ErrorReporter = Rc<dyn Fn(&BridgeError) + 'static>;

pub(crate) struct RuntimeInner<H: Host> {
	pub(crate) host: H,
	pub(crate) options: BridgeOptions,
	pub(crate) handles: RefCell<HandleTable<H::Node>>,
	pub(crate) callbacks: RefCell<CallbackRegistry>,
	pub(crate) events: RefCell<EventTable<H::Listener>>,
	pub(crate) frame: RefCell<FrameState<H::Frame>>,
	pub(crate) frame_generation: Cell<u64>,
	pub(crate) frames_executed: Cell<u64>,
	reporter: RefCell<Option<ErrorReporter>>,
}

/// The handle-indexed bridge between component code and one host document.
///
/// Cloning is cheap and shares state.
pub struct BridgeRuntime<H: Host> {
	pub(crate) inner: Rc<RuntimeInner<H>>,
}

impl<H: Host> Clone for BridgeRuntime<H> {
	fn clone(&self) -> Self {
		Self {
			inner: Rc::clone(&self.inner),
		}
	}
}

impl<H: Host> fmt::Debug for BridgeRuntime<H> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BridgeRuntime")
			.field("handles", &self.inner.handles.borrow().len())
			.field("callbacks", &self.inner.callbacks.borrow().len())
			.field("listeners", &self.inner.events.borrow().len())
			.field("recomposition_scheduled", &self.is_recomposition_scheduled())
			.finish()
	}
}

impl<H: Host> BridgeRuntime<H> {
	/// Creates a runtime after validating `options`.
	pub fn new(host: H, options: BridgeOptions) -> BridgeResult<Self> {
		options.validate()?;
		Ok(Self::build(host, options))
	}

	/// Creates a runtime with default options.
	pub fn with_host(host: H) -> Self {
		Self::build(host, BridgeOptions::default())
	}

	fn build(host: H, options: BridgeOptions) -> Self {
		let handles = HandleTable::new(options.handle_prefix.clone(), options.leak_warning_threshold);
		let callbacks =
			CallbackRegistry::new(options.callback_prefix.clone(), options.leak_warning_threshold);
		Self {
			inner: Rc::new(RuntimeInner {
				host,
				options,
				handles: RefCell::new(handles),
				callbacks: RefCell::new(callbacks),
				events: RefCell::new(EventTable::new()),
				frame: RefCell::new(FrameState::Idle),
				frame_generation: Cell::new(0),
				frames_executed: Cell::new(0),
				reporter: RefCell::new(None),
			}),
		}
	}

	pub(crate) fn from_inner(inner: Rc<RuntimeInner<H>>) -> Self {
		Self { inner }
	}

	/// The host this runtime drives.
	pub fn host(&self) -> &H {
		&self.inner.host
	}

	/// The options this runtime was built with.
	pub fn options(&self) -> &BridgeOptions {
		&self.inner.options
	}

	// Handles

	/// Registers a host node and returns its handle. Idempotent.
	pub fn register_node(&self, node: &H::Node) -> Handle {
		self.inner.handles.borrow_mut().register(node)
	}

	/// Resolves a handle to its node.
	pub fn resolve(&self, handle: &Handle) -> BridgeResult<H::Node> {
		self.inner.handles.borrow().resolve(handle).cloned()
	}

	/// Returns the handle of an already-registered node.
	pub fn handle_of(&self, node: &H::Node) -> Option<Handle> {
		let handles = self.inner.handles.borrow();
		if let Some(stamped) = node.identity() {
			let stamped = Handle::from(stamped);
			if handles.resolve(&stamped).is_ok_and(|known| known == node) {
				return Some(stamped);
			}
		}
		handles.handle_of(node)
	}

	/// Returns the number of live handles.
	pub fn handle_count(&self) -> usize {
		self.inner.handles.borrow().len()
	}

	/// Drops the mapping for `handle`. Returns whether it was live.
	///
	/// Listeners must be detached first; leftovers are logged.
	pub fn release_handle(&self, handle: &Handle) -> bool {
		let remaining = self.inner.events.borrow().listeners_on(handle);
		if remaining > 0 {
			tracing::warn!(
				handle = %handle,
				listeners = remaining,
				"releasing a handle that still has attached listeners"
			);
		}
		self.inner.handles.borrow_mut().release(handle).is_some()
	}

	/// Moves `old` to `new`, re-keying listeners and pending event records.
	pub fn rebind_handle(&self, old: &Handle, new: Handle) -> BridgeResult<()> {
		self.inner.handles.borrow_mut().rebind(old, new.clone())?;
		self.inner.events.borrow_mut().rekey(old, &new);
		tracing::debug!(old = %old, new = %new, "handle rebound");
		Ok(())
	}

	// Nodes

	/// Creates an element and returns its handle.
	pub fn create_element(&self, tag: &str) -> BridgeResult<Handle> {
		let node = self.inner.host.create_element(tag)?;
		Ok(self.register_node(&node))
	}

	/// Creates a text node and returns its handle.
	pub fn create_text(&self, text: &str) -> Handle {
		let node = self.inner.host.create_text(text);
		self.register_node(&node)
	}

	/// Appends `child` to `parent`.
	pub fn append_child(&self, parent: &Handle, child: &Handle) -> BridgeResult<()> {
		let parent = self.resolve(parent)?;
		let child = self.resolve(child)?;
		self.inner.host.append_child(&parent, &child)?;
		Ok(())
	}

	/// Sets an attribute on the node behind `handle`.
	pub fn set_attribute(&self, handle: &Handle, name: &str, value: &str) -> BridgeResult<()> {
		let node = self.resolve(handle)?;
		self.inner.host.set_attribute(&node, name, value)?;
		Ok(())
	}

	/// Reads an attribute of the node behind `handle`.
	pub fn get_attribute(&self, handle: &Handle, name: &str) -> BridgeResult<Option<String>> {
		let node = self.resolve(handle)?;
		Ok(self.inner.host.get_attribute(&node, name))
	}

	/// Returns the handles of all child nodes, registering them as needed.
	pub fn children(&self, handle: &Handle) -> BridgeResult<Vec<Handle>> {
		let node = self.resolve(handle)?;
		Ok(self
			.inner
			.host
			.child_nodes(&node)
			.iter()
			.map(|child| self.register_node(child))
			.collect())
	}

	/// Removes a node from the document and tears down its subtree: listeners
	/// are detached, their callbacks released and every registered handle in
	/// the subtree dropped.
	pub fn remove_node(&self, handle: &Handle) -> BridgeResult<()> {
		let node = self.resolve(handle)?;
		self.teardown(&node);
		self.inner.host.remove_node(&node);
		Ok(())
	}

	/// Removes every child of the node behind `handle`, tearing each down.
	pub fn clear_children(&self, handle: &Handle) -> BridgeResult<()> {
		let node = self.resolve(handle)?;
		self.clear_node_children(&node);
		Ok(())
	}

	pub(crate) fn clear_node_children(&self, node: &H::Node) {
		for child in self.inner.host.child_nodes(node) {
			self.teardown(&child);
			self.inner.host.remove_node(&child);
		}
	}

	pub(crate) fn teardown(&self, node: &H::Node) {
		for child in self.inner.host.child_nodes(node) {
			self.teardown(&child);
		}
		if let Some(handle) = self.handle_of(node) {
			self.detach_all(&handle, Some(node));
			self.inner.handles.borrow_mut().release(&handle);
		}
	}

	// Callbacks

	/// Registers a closure and returns its id.
	pub fn register_callback<F>(&self, callback: F) -> CallbackId
	where
		F: Fn(&CallbackContext) + 'static,
	{
		self.inner.callbacks.borrow_mut().register(callback)
	}

	/// Registers a closure under a caller-chosen id.
	pub fn register_callback_with_id<F>(&self, id: CallbackId, callback: F) -> BridgeResult<()>
	where
		F: Fn(&CallbackContext) + 'static,
	{
		self.inner.callbacks.borrow_mut().register_with_id(id, callback)
	}

	/// Replaces the closure behind a live id. Returns whether the id was live.
	pub fn replace_callback<F>(&self, id: &CallbackId, callback: F) -> bool
	where
		F: Fn(&CallbackContext) + 'static,
	{
		self.inner
			.callbacks
			.borrow_mut()
			.replace(id, callback)
			.is_some()
	}

	/// Resolves and invokes a callback, failing with
	/// [`BridgeError::CallbackNotFound`] for an unknown id.
	pub fn try_execute_callback(&self, id: &CallbackId, context: &CallbackContext) -> BridgeResult<()> {
		// The borrow ends here so the closure may register or release callbacks.
		let callback = self
			.inner
			.callbacks
			.borrow()
			.get(id)
			.ok_or_else(|| BridgeError::CallbackNotFound(id.clone()))?;
		callback(context);
		Ok(())
	}

	/// Resolves and invokes a callback. Unknown ids are a logged no-op.
	pub fn execute_callback(&self, id: &CallbackId, context: &CallbackContext) -> bool {
		match self.try_execute_callback(id, context) {
			Ok(()) => true,
			Err(e) => {
				tracing::warn!(error = %e, "execute on unknown callback id ignored");
				false
			}
		}
	}

	/// Keeps a server-issued id out of client id generation until it is
	/// registered. Returns `false` if it is already live or reserved.
	pub fn reserve_callback_id(&self, id: CallbackId) -> bool {
		self.inner.callbacks.borrow_mut().reserve(id)
	}

	/// Releases a callback. Returns whether it was live.
	pub fn release_callback(&self, id: &CallbackId) -> bool {
		self.inner.callbacks.borrow_mut().release(id)
	}

	/// Returns true if the callback id is live.
	pub fn has_callback(&self, id: &CallbackId) -> bool {
		self.inner.callbacks.borrow().contains(id)
	}

	/// Returns the number of live callbacks.
	pub fn callback_count(&self) -> usize {
		self.inner.callbacks.borrow().len()
	}

	// Errors

	/// Installs the collaborator that receives errors caught at the host
	/// boundary. Without one, errors are logged.
	pub fn set_error_reporter<F>(&self, reporter: F)
	where
		F: Fn(&BridgeError) + 'static,
	{
		*self.inner.reporter.borrow_mut() = Some(Rc::new(reporter));
	}

	/// Hands an error to the reporter.
	pub fn report_error(&self, error: &BridgeError) {
		let reporter = self.inner.reporter.borrow().clone();
		match reporter {
			Some(reporter) => reporter(error),
			None => tracing::error!(error = %error, "bridge error"),
		}
	}

	/// Tears down all runtime state: the pending frame is cancelled, native
	/// listeners are removed and both tables are emptied. The document itself
	/// is left as is.
	pub fn clear(&self) {
		self.cancel_recomposition();
		let listeners = self.inner.events.borrow_mut().drain();
		for (handle, event_type, native) in listeners {
			let node = self.inner.handles.borrow().resolve(&handle).cloned();
			if let Ok(node) = node {
				self.inner.host.remove_event_listener(&node, &event_type, native);
			}
		}
		self.inner.handles.borrow_mut().clear();
		self.inner.callbacks.borrow_mut().clear();
		tracing::debug!("bridge runtime cleared");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::MemoryHost;
	use rstest::rstest;

	fn runtime(markup: &str) -> BridgeRuntime<MemoryHost> {
		BridgeRuntime::with_host(MemoryHost::from_markup(markup))
	}

	#[rstest]
	fn test_new_rejects_invalid_options() {
		let result = BridgeRuntime::new(
			MemoryHost::new(),
			BridgeOptions::new().handle_prefix(""),
		);
		assert!(matches!(result, Err(BridgeError::Config(_))));
	}

	#[rstest]
	fn test_existing_node_lookup_yields_same_handle() {
		// Arrange
		let runtime = runtime(r#"<div id="app"><p>hi</p></div>"#);
		let first_lookup = runtime.host().find_by_attribute("id", "app").unwrap();
		let handle = runtime.register_node(&first_lookup);

		// Act
		let second_lookup = runtime.host().find_by_attribute("id", "app").unwrap();

		// Assert
		assert_eq!(runtime.register_node(&second_lookup), handle);
		assert_eq!(runtime.handle_of(&second_lookup), Some(handle));
	}

	#[rstest]
	fn test_create_and_append_through_handles() {
		// Arrange
		let runtime = runtime("");
		let root = runtime.register_node(&runtime.host().root());

		// Act
		let div = runtime.create_element("div").unwrap();
		let text = runtime.create_text("hello");
		runtime.append_child(&div, &text).unwrap();
		runtime.append_child(&root, &div).unwrap();
		runtime.set_attribute(&div, "class", "greeting").unwrap();

		// Assert
		assert_eq!(
			runtime.host().body_html(),
			format!(r#"<div data-rh-handle="{}" class="greeting">hello</div>"#, div)
		);
		assert_eq!(runtime.children(&div).unwrap(), vec![text]);
		assert_eq!(
			runtime.get_attribute(&div, "class").unwrap().as_deref(),
			Some("greeting")
		);
	}

	#[rstest]
	fn test_remove_node_releases_subtree() {
		// Arrange
		let runtime = runtime(r#"<ul id="list"><li>a</li><li>b</li></ul>"#);
		let list = runtime.register_node(&runtime.host().find_by_attribute("id", "list").unwrap());
		let items = runtime.children(&list).unwrap();
		let id = runtime.register_callback(|_| {});
		runtime.attach(&items[0], "click", &id).unwrap();

		// Act
		runtime.remove_node(&list).unwrap();

		// Assert
		assert_eq!(runtime.handle_count(), 0);
		assert!(!runtime.has_callback(&id));
		assert_eq!(runtime.listener_count(), 0);
		assert!(matches!(runtime.resolve(&items[1]), Err(BridgeError::HandleNotFound(_))));
		assert_eq!(runtime.host().body_html(), "");
	}

	#[rstest]
	fn test_rebind_keeps_event_wiring() {
		// Arrange
		let runtime = runtime(r#"<button id="go">go</button>"#);
		let button = runtime.host().find_by_attribute("id", "go").unwrap();
		let old = runtime.register_node(&button);
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let id = runtime.register_callback(move |_| counter.set(counter.get() + 1));
		runtime.attach(&old, "click", &id).unwrap();

		// Act
		runtime.rebind_handle(&old, Handle::from("go-button")).unwrap();
		runtime.host().click(&button);

		// Assert
		assert_eq!(hits.get(), 1);
		assert_eq!(runtime.listener_count(), 1);
		assert!(runtime.pending_event(&Handle::from("go-button"), "click").is_some());
		assert!(runtime.pending_event(&old, "click").is_none());
		assert_eq!(button.listener_count(), 1);
	}

	#[rstest]
	fn test_execute_unknown_callback_is_noop() {
		let runtime = runtime("");
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let id = runtime.register_callback(move |_| counter.set(counter.get() + 1));

		assert!(!runtime.execute_callback(&CallbackId::from("does-not-exist"), &CallbackContext::Invoke));
		assert_eq!(hits.get(), 0);
		assert!(runtime.has_callback(&id));
	}

	#[rstest]
	fn test_callbacks_may_reenter_runtime() {
		// Arrange
		let runtime = runtime("");
		let inner = runtime.clone();
		let id = runtime.register_callback(move |_| {
			inner.register_callback(|_| {});
		});

		// Act
		let ran = runtime.execute_callback(&id, &CallbackContext::Invoke);

		// Assert
		assert!(ran);
		assert_eq!(runtime.callback_count(), 2);
	}

	#[rstest]
	fn test_error_reporter_receives_errors() {
		let runtime = runtime("");
		let seen = Rc::new(RefCell::new(Vec::new()));
		let sink = Rc::clone(&seen);
		runtime.set_error_reporter(move |e| sink.borrow_mut().push(e.to_string()));

		runtime.report_error(&BridgeError::Recomposition("boom".to_string()));

		assert_eq!(*seen.borrow(), vec!["recomposition failed: boom".to_string()]);
	}

	#[rstest]
	fn test_clear_removes_native_listeners() {
		// Arrange
		let runtime = runtime(r#"<button id="go">go</button>"#);
		let button = runtime.host().find_by_attribute("id", "go").unwrap();
		let handle = runtime.register_node(&button);
		let id = runtime.register_callback(|_| panic!("cleared listener must not run"));
		runtime.attach(&handle, "click", &id).unwrap();

		// Act
		runtime.clear();
		runtime.host().click(&button);

		// Assert
		assert_eq!(runtime.handle_count(), 0);
		assert_eq!(runtime.callback_count(), 0);
		assert_eq!(button.listener_count(), 0);
	}
}
