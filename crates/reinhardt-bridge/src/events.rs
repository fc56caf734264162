//! Event Dispatch Bridge
//!
//! Wires host native listeners to `(handle, event type)` pairs. Exactly one
//! native listener exists per pair; re-attaching replaces it.
//!
//! When a listener fires, the bridge captures an [`EventRecord`] holding the
//! few fields components need (type, target, value, checked) plus narrow
//! prevent/stop controls on the original host event, overwrites the pending
//! slot for the pair, then executes the callback id bound to the pair.
//!
//! Native listeners capture a serial number, not the handle, so
//! [`BridgeRuntime::rebind_handle`] re-keys the table without touching the
//! host.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::callback::{CallbackContext, CallbackId};
use crate::error::BridgeResult;
use crate::handle::Handle;
use crate::host::{Host, HostEvent};
use crate::runtime::BridgeRuntime;

/// The last event fired on one `(handle, event type)` pair.
#[derive(Clone)]
pub struct EventRecord {
	/// Event type tag.
	pub event_type: String,
	/// Handle of the element the listener is attached to.
	pub target: Handle,
	/// Value of the event target, for form controls.
	pub value: Option<String>,
	/// Checked state of the event target, for checkboxes and radios.
	pub checked: Option<bool>,
	control: Rc<dyn HostEvent>,
}

impl EventRecord {
	/// Calls `preventDefault` on the original host event.
	pub fn prevent_default(&self) {
		self.control.prevent_default();
	}

	/// Calls `stopPropagation` on the original host event.
	pub fn stop_propagation(&self) {
		self.control.stop_propagation();
	}
}

impl fmt::Debug for EventRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventRecord")
			.field("event_type", &self.event_type)
			.field("target", &self.target)
			.field("value", &self.value)
			.field("checked", &self.checked)
			.finish_non_exhaustive()
	}
}

type EventKey = (Handle, String);

pub(crate) struct ListenerEntry<L> {
	pub(crate) callback_id: CallbackId,
	serial: u64,
	pub(crate) native: L,
}

/// Listener and pending-record tables, keyed by `(handle, event type)`.
pub(crate) struct EventTable<L> {
	listeners: HashMap<EventKey, ListenerEntry<L>>,
	serials: HashMap<u64, EventKey>,
	pending: HashMap<EventKey, EventRecord>,
	next_serial: u64,
}

impl<L> EventTable<L> {
	pub(crate) fn new() -> Self {
		Self {
			listeners: HashMap::new(),
			serials: HashMap::new(),
			pending: HashMap::new(),
			next_serial: 0,
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.listeners.len()
	}

	pub(crate) fn listeners_on(&self, handle: &Handle) -> usize {
		self.listeners.keys().filter(|(h, _)| h == handle).count()
	}

	fn next_serial(&mut self) -> u64 {
		let serial = self.next_serial;
		self.next_serial += 1;
		serial
	}

	fn insert(&mut self, key: EventKey, entry: ListenerEntry<L>) {
		self.serials.insert(entry.serial, key.clone());
		self.listeners.insert(key, entry);
	}

	fn remove(&mut self, key: &EventKey) -> Option<ListenerEntry<L>> {
		let entry = self.listeners.remove(key)?;
		self.serials.remove(&entry.serial);
		Some(entry)
	}

	fn lookup(&self, serial: u64) -> Option<(EventKey, CallbackId)> {
		let key = self.serials.get(&serial)?;
		let entry = self.listeners.get(key)?;
		Some((key.clone(), entry.callback_id.clone()))
	}

	pub(crate) fn rekey(&mut self, old: &Handle, new: &Handle) {
		let keys: Vec<EventKey> = self
			.listeners
			.keys()
			.filter(|(h, _)| h == old)
			.cloned()
			.collect();
		for key in keys {
			if let Some(entry) = self.listeners.remove(&key) {
				let moved = (new.clone(), key.1);
				self.serials.insert(entry.serial, moved.clone());
				self.listeners.insert(moved, entry);
			}
		}

		let keys: Vec<EventKey> = self
			.pending
			.keys()
			.filter(|(h, _)| h == old)
			.cloned()
			.collect();
		for key in keys {
			if let Some(mut record) = self.pending.remove(&key) {
				record.target = new.clone();
				self.pending.insert((new.clone(), key.1), record);
			}
		}
	}

	fn remove_all_on(&mut self, handle: &Handle) -> Vec<(String, ListenerEntry<L>)> {
		self.pending.retain(|(h, _), _| h != handle);
		let keys: Vec<EventKey> = self
			.listeners
			.keys()
			.filter(|(h, _)| h == handle)
			.cloned()
			.collect();
		keys.into_iter()
			.filter_map(|key| {
				let entry = self.remove(&key)?;
				Some((key.1, entry))
			})
			.collect()
	}

	pub(crate) fn drain(&mut self) -> Vec<(Handle, String, L)> {
		self.serials.clear();
		self.pending.clear();
		self.listeners
			.drain()
			.map(|((handle, event_type), entry)| (handle, event_type, entry.native))
			.collect()
	}
}

impl<H: Host> BridgeRuntime<H> {
	/// Installs the native listener for `(handle, event_type)` and binds it to
	/// `callback_id`.
	///
	/// Re-attaching a pair removes the previous native listener first; if the
	/// pair was bound to a different callback id, that id is released.
	pub fn attach(&self, handle: &Handle, event_type: &str, callback_id: &CallbackId) -> BridgeResult<()> {
		let node = self.resolve(handle)?;
		let key = (handle.clone(), event_type.to_string());

		let previous = self.inner.events.borrow_mut().remove(&key);
		if let Some(previous) = previous {
			self.inner
				.host
				.remove_event_listener(&node, event_type, previous.native);
			if &previous.callback_id != callback_id {
				self.release_callback(&previous.callback_id);
			}
			tracing::debug!(handle = %handle, event_type, "re-attaching listener");
		}
		if !self.has_callback(callback_id) {
			tracing::warn!(
				handle = %handle,
				event_type,
				callback = %callback_id,
				"attaching a callback id that is not registered"
			);
		}

		let serial = self.inner.events.borrow_mut().next_serial();
		let weak = Rc::downgrade(&self.inner);
		let native = self.inner.host.add_event_listener(
			&node,
			event_type,
			Box::new(move |event: H::Event| {
				if let Some(inner) = weak.upgrade() {
					BridgeRuntime::from_inner(inner).dispatch_native(serial, event);
				}
			}),
		)?;
		self.inner.events.borrow_mut().insert(
			key,
			ListenerEntry {
				callback_id: callback_id.clone(),
				serial,
				native,
			},
		);
		tracing::debug!(handle = %handle, event_type, callback = %callback_id, "listener attached");
		Ok(())
	}

	/// Removes the native listener and pending record for the pair and
	/// releases `callback_id`.
	///
	/// A pair that is unbound, or bound to another id, is left alone.
	/// Returns whether a listener was removed.
	pub fn detach(&self, handle: &Handle, event_type: &str, callback_id: &CallbackId) -> bool {
		let key = (handle.clone(), event_type.to_string());
		let entry = {
			let mut events = self.inner.events.borrow_mut();
			let bound = events
				.listeners
				.get(&key)
				.map(|entry| entry.callback_id.clone());
			match bound {
				Some(bound) if &bound == callback_id => {
					events.pending.remove(&key);
					events.remove(&key)
				}
				Some(bound) => {
					tracing::warn!(
						handle = %handle,
						event_type,
						bound = %bound,
						requested = %callback_id,
						"detach with mismatched callback id ignored"
					);
					None
				}
				None => {
					tracing::debug!(handle = %handle, event_type, "detach on unbound pair ignored");
					None
				}
			}
		};
		let Some(entry) = entry else {
			return false;
		};

		match self.resolve(handle) {
			Ok(node) => self
				.inner
				.host
				.remove_event_listener(&node, event_type, entry.native),
			Err(_) => tracing::warn!(handle = %handle, "detach on released handle; dropping native listener"),
		}
		self.release_callback(callback_id);
		true
	}

	/// Detaches every listener on `handle` and releases their callbacks.
	pub(crate) fn detach_all(&self, handle: &Handle, node: Option<&H::Node>) {
		let entries = self.inner.events.borrow_mut().remove_all_on(handle);
		if entries.is_empty() {
			return;
		}
		let resolved = match node {
			Some(node) => Some(node.clone()),
			None => self.resolve(handle).ok(),
		};
		for (event_type, entry) in entries {
			if let Some(node) = resolved.as_ref() {
				self.inner
					.host
					.remove_event_listener(node, &event_type, entry.native);
			}
			self.release_callback(&entry.callback_id);
		}
	}

	fn dispatch_native(&self, serial: u64, event: H::Event) {
		let Some((key, callback_id)) = self.inner.events.borrow().lookup(serial) else {
			tracing::debug!(serial, "event for a detached listener ignored");
			return;
		};

		let record = EventRecord {
			event_type: event.event_type(),
			target: key.0.clone(),
			value: event.value(),
			checked: event.checked(),
			control: Rc::new(event),
		};
		self.inner
			.events
			.borrow_mut()
			.pending
			.insert(key, record.clone());

		self.execute_callback(&callback_id, &CallbackContext::Event(record));
	}

	/// Returns the last event fired on the pair.
	pub fn pending_event(&self, handle: &Handle, event_type: &str) -> Option<EventRecord> {
		self.inner
			.events
			.borrow()
			.pending
			.get(&(handle.clone(), event_type.to_string()))
			.cloned()
	}

	/// Value captured by the last event on the pair.
	pub fn event_value(&self, handle: &Handle, event_type: &str) -> Option<String> {
		self.pending_event(handle, event_type)?.value
	}

	/// Checked state captured by the last event on the pair.
	pub fn event_checked(&self, handle: &Handle, event_type: &str) -> Option<bool> {
		self.pending_event(handle, event_type)?.checked
	}

	/// Prevents the default action of the last event on the pair.
	/// Returns `false` if no event is pending.
	pub fn prevent_default(&self, handle: &Handle, event_type: &str) -> bool {
		match self.pending_event(handle, event_type) {
			Some(record) => {
				record.prevent_default();
				true
			}
			None => false,
		}
	}

	/// Stops propagation of the last event on the pair.
	/// Returns `false` if no event is pending.
	pub fn stop_propagation(&self, handle: &Handle, event_type: &str) -> bool {
		match self.pending_event(handle, event_type) {
			Some(record) => {
				record.stop_propagation();
				true
			}
			None => false,
		}
	}

	/// Returns the callback id bound to the pair.
	pub fn listener_callback(&self, handle: &Handle, event_type: &str) -> Option<CallbackId> {
		self.inner
			.events
			.borrow()
			.listeners
			.get(&(handle.clone(), event_type.to_string()))
			.map(|entry| entry.callback_id.clone())
	}

	/// Returns the number of installed native listeners.
	pub fn listener_count(&self) -> usize {
		self.inner.events.borrow().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::memory::{MemoryEvent, MemoryHost};
	use rstest::rstest;
	use std::cell::{Cell, RefCell};

	fn setup(markup: &str, id: &str) -> (BridgeRuntime<MemoryHost>, Handle) {
		let runtime = BridgeRuntime::with_host(MemoryHost::from_markup(markup));
		let node = runtime.host().find_by_attribute("id", id).unwrap();
		let handle = runtime.register_node(&node);
		(runtime, handle)
	}

	#[rstest]
	fn test_fire_executes_bound_callback_with_record() {
		// Arrange
		let (runtime, input) = setup(r#"<input id="name">"#, "name");
		let seen = Rc::new(RefCell::new(None));
		let sink = Rc::clone(&seen);
		let id = runtime.register_callback(move |ctx| {
			*sink.borrow_mut() = ctx.event().map(|r| (r.event_type.clone(), r.value.clone()));
		});
		runtime.attach(&input, "input", &id).unwrap();
		let node = runtime.resolve(&input).unwrap();

		// Act
		runtime
			.host()
			.dispatch(&node, MemoryEvent::new("input").with_value("ada"));

		// Assert
		assert_eq!(
			*seen.borrow(),
			Some(("input".to_string(), Some("ada".to_string())))
		);
		assert_eq!(runtime.event_value(&input, "input").as_deref(), Some("ada"));
	}

	#[rstest]
	fn test_reattach_replaces_native_listener() {
		// Arrange
		let (runtime, button) = setup(r#"<button id="b">b</button>"#, "b");
		let node = runtime.resolve(&button).unwrap();
		let log = Rc::new(RefCell::new(Vec::new()));
		let first_log = Rc::clone(&log);
		let first = runtime.register_callback(move |_| first_log.borrow_mut().push("first"));
		let second_log = Rc::clone(&log);
		let second = runtime.register_callback(move |_| second_log.borrow_mut().push("second"));

		// Act
		runtime.attach(&button, "click", &first).unwrap();
		runtime.attach(&button, "click", &first).unwrap();
		runtime.attach(&button, "click", &second).unwrap();
		runtime.host().click(&node);

		// Assert
		assert_eq!(*log.borrow(), vec!["second"]);
		assert_eq!(node.listener_count(), 1);
		assert_eq!(runtime.listener_count(), 1);
		assert!(!runtime.has_callback(&first));
		assert_eq!(runtime.listener_callback(&button, "click"), Some(second));
	}

	#[rstest]
	fn test_detach_removes_listener_pending_and_callback() {
		// Arrange
		let (runtime, button) = setup(r#"<button id="b">b</button>"#, "b");
		let node = runtime.resolve(&button).unwrap();
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let id = runtime.register_callback(move |_| counter.set(counter.get() + 1));
		runtime.attach(&button, "click", &id).unwrap();
		runtime.host().click(&node);

		// Act
		let wrong = runtime.detach(&button, "click", &CallbackId::from("other"));
		let detached = runtime.detach(&button, "click", &id);
		runtime.host().click(&node);

		// Assert
		assert!(!wrong);
		assert!(detached);
		assert_eq!(hits.get(), 1);
		assert!(runtime.pending_event(&button, "click").is_none());
		assert!(!runtime.has_callback(&id));
		assert_eq!(node.listener_count(), 0);
	}

	#[rstest]
	fn test_prevent_and_stop_reach_the_host_event() {
		// Arrange
		let runtime = BridgeRuntime::with_host(MemoryHost::from_markup(
			r#"<form id="f"><a id="link" href="/x">x</a></form>"#,
		));
		let form_node = runtime.host().find_by_attribute("id", "f").unwrap();
		let link_node = runtime.host().find_by_attribute("id", "link").unwrap();
		let form = runtime.register_node(&form_node);
		let link = runtime.register_node(&link_node);

		let outer_hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&outer_hits);
		let outer = runtime.register_callback(move |_| counter.set(counter.get() + 1));
		runtime.attach(&form, "click", &outer).unwrap();

		let bridge = runtime.clone();
		let target = link.clone();
		let inner = runtime.register_callback(move |_| {
			bridge.prevent_default(&target, "click");
			bridge.stop_propagation(&target, "click");
		});
		runtime.attach(&link, "click", &inner).unwrap();

		// Act
		let event = MemoryEvent::new("click");
		let proceed = runtime.host().dispatch(&link_node, event.clone());

		// Assert
		assert!(!proceed);
		assert!(event.default_prevented());
		assert!(event.propagation_stopped());
		assert_eq!(outer_hits.get(), 0);
	}

	#[rstest]
	fn test_pending_record_is_overwritten_not_queued() {
		let (runtime, input) = setup(r#"<input id="i" type="checkbox">"#, "i");
		let node = runtime.resolve(&input).unwrap();
		let id = runtime.register_callback(|_| {});
		runtime.attach(&input, "change", &id).unwrap();

		runtime
			.host()
			.dispatch(&node, MemoryEvent::new("change").with_checked(true));
		runtime
			.host()
			.dispatch(&node, MemoryEvent::new("change").with_checked(false));

		assert_eq!(runtime.event_checked(&input, "change"), Some(false));
	}

	#[rstest]
	fn test_attach_unknown_handle_is_typed_error() {
		let runtime = BridgeRuntime::with_host(MemoryHost::new());
		let id = runtime.register_callback(|_| {});

		let result = runtime.attach(&Handle::from("nope"), "click", &id);

		assert!(matches!(
			result,
			Err(crate::error::BridgeError::HandleNotFound(_))
		));
	}

	#[rstest]
	fn test_handler_can_detach_itself() {
		// Arrange
		let (runtime, button) = setup(r#"<button id="b">b</button>"#, "b");
		let node = runtime.resolve(&button).unwrap();
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let bridge = runtime.clone();
		let target = button.clone();
		let own_id = Rc::new(RefCell::new(None::<CallbackId>));
		let own = Rc::clone(&own_id);
		let id = runtime.register_callback(move |_| {
			counter.set(counter.get() + 1);
			if let Some(id) = own.borrow().clone() {
				bridge.detach(&target, "click", &id);
			}
		});
		*own_id.borrow_mut() = Some(id.clone());
		runtime.attach(&button, "click", &id).unwrap();

		// Act
		runtime.host().click(&node);
		runtime.host().click(&node);

		// Assert
		assert_eq!(hits.get(), 1);
		assert_eq!(runtime.listener_count(), 0);
	}
}
