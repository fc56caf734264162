//! Callback Registry
//!
//! Closures cannot be serialized into markup, so only their [`CallbackId`]
//! crosses the boundary while the closure stays resident here until it is
//! explicitly released.
//!
//! ## Render scope
//!
//! A server render pass is bracketed by [`CallbackRegistry::begin_render`] and
//! [`CallbackRegistry::finish_render_and_collect_callback_ids`], which yields the
//! exact, ordered set of ids registered during the pass (these are the ids
//! embedded in the markup). A failed pass calls
//! [`CallbackRegistry::abandon_render_context`] to release everything it
//! registered, so a page that was never served leaks no handlers.
//!
//! ```ignore
//! let mut registry = CallbackRegistry::new("cb", 10_000);
//! registry.begin_render();
//! let id = registry.register(|_ctx| println!("clicked"));
//! let ids = registry.finish_render_and_collect_callback_ids();
//! assert_eq!(ids, vec![id]);
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::error::{BridgeError, BridgeResult};
use crate::events::EventRecord;

/// Opaque identity of one runtime-side closure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
	/// Returns the id as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CallbackId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for CallbackId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl From<String> for CallbackId {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl Borrow<str> for CallbackId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// What caused a callback to run.
#[derive(Debug, Clone)]
pub enum CallbackContext {
	/// A host event fired on a wired element.
	Event(EventRecord),
	/// The host paint callback fired.
	Frame {
		/// Host-provided frame timestamp in milliseconds.
		timestamp: f64,
	},
	/// A dismissable surface was dismissed.
	Dismiss,
	/// Direct invocation from runtime code.
	Invoke,
}

impl CallbackContext {
	/// Returns the event record when the callback was triggered by an event.
	pub fn event(&self) -> Option<&EventRecord> {
		match self {
			Self::Event(record) => Some(record),
			_ => None,
		}
	}
}

/// A registered closure.
pub type CallbackFn = Rc<dyn Fn(&CallbackContext) + 'static>;

/// Maps callback ids to closures.
pub struct CallbackRegistry {
	callbacks: HashMap<CallbackId, CallbackFn>,
	/// Ids named by server markup that generated ids must not take.
	reserved: HashSet<CallbackId>,
	prefix: String,
	next_id: u64,
	/// Ids registered since `begin_render`, in registration order.
	render_scope: Option<Vec<CallbackId>>,
	leak_warning_threshold: usize,
	leak_warned: bool,
}

impl CallbackRegistry {
	/// Creates an empty registry generating ids as `{prefix}-{n}`.
	pub fn new(prefix: impl Into<String>, leak_warning_threshold: usize) -> Self {
		Self {
			callbacks: HashMap::new(),
			reserved: HashSet::new(),
			prefix: prefix.into(),
			next_id: 0,
			render_scope: None,
			leak_warning_threshold,
			leak_warned: false,
		}
	}

	/// Registers a closure under a freshly generated id.
	pub fn register<F>(&mut self, callback: F) -> CallbackId
	where
		F: Fn(&CallbackContext) + 'static,
	{
		let id = loop {
			let candidate = CallbackId(format!("{}-{}", self.prefix, self.next_id));
			self.next_id += 1;
			if !self.callbacks.contains_key(&candidate) && !self.reserved.contains(&candidate) {
				break candidate;
			}
		};
		self.insert(id.clone(), Rc::new(callback));
		id
	}

	/// Registers a closure under an id chosen by the caller, typically an id
	/// read back from server-rendered markup.
	///
	/// Fails with [`BridgeError::CallbackConflict`] while the id is still live;
	/// release it first.
	pub fn register_with_id<F>(&mut self, id: CallbackId, callback: F) -> BridgeResult<()>
	where
		F: Fn(&CallbackContext) + 'static,
	{
		if self.callbacks.contains_key(&id) {
			return Err(BridgeError::CallbackConflict(id));
		}
		self.reserved.remove(&id);
		self.insert(id, Rc::new(callback));
		Ok(())
	}

	/// Keeps an id out of generation until it is registered with
	/// [`register_with_id`](Self::register_with_id). Returns `false` if the id
	/// is already live or reserved.
	pub fn reserve(&mut self, id: CallbackId) -> bool {
		if self.callbacks.contains_key(&id) {
			return false;
		}
		self.reserved.insert(id)
	}

	/// Returns true if the id is reserved and not yet registered.
	pub fn is_reserved(&self, id: &CallbackId) -> bool {
		self.reserved.contains(id)
	}

	/// Replaces the closure behind a live id. Returns the previous closure,
	/// or `None` (and registers nothing) if the id is unknown.
	pub fn replace<F>(&mut self, id: &CallbackId, callback: F) -> Option<CallbackFn>
	where
		F: Fn(&CallbackContext) + 'static,
	{
		let slot = self.callbacks.get_mut(id)?;
		Some(std::mem::replace(slot, Rc::new(callback)))
	}

	/// Returns the closure for an id.
	pub fn get(&self, id: &CallbackId) -> Option<CallbackFn> {
		self.callbacks.get(id).cloned()
	}

	/// Resolves and invokes a callback, failing with
	/// [`BridgeError::CallbackNotFound`] for an unknown id.
	pub fn try_execute(&self, id: &CallbackId, context: &CallbackContext) -> BridgeResult<()> {
		let callback = self
			.get(id)
			.ok_or_else(|| BridgeError::CallbackNotFound(id.clone()))?;
		callback(context);
		Ok(())
	}

	/// Resolves and invokes a callback. Unknown ids are a logged no-op.
	///
	/// Returns whether a closure ran.
	pub fn execute(&self, id: &CallbackId, context: &CallbackContext) -> bool {
		match self.try_execute(id, context) {
			Ok(()) => true,
			Err(e) => {
				tracing::warn!(error = %e, "execute on unknown callback id ignored");
				false
			}
		}
	}

	/// Releases a callback. Returns whether it was live.
	pub fn release(&mut self, id: &CallbackId) -> bool {
		let removed = self.callbacks.remove(id).is_some();
		if removed && let Some(scope) = self.render_scope.as_mut() {
			scope.retain(|scoped| scoped != id);
		}
		removed
	}

	/// Returns true if the id is live.
	pub fn contains(&self, id: &CallbackId) -> bool {
		self.callbacks.contains_key(id)
	}

	/// Returns the number of live callbacks.
	pub fn len(&self) -> usize {
		self.callbacks.len()
	}

	/// Returns true if no callbacks are live.
	pub fn is_empty(&self) -> bool {
		self.callbacks.is_empty()
	}

	/// Drops every callback and any open render scope.
	pub fn clear(&mut self) {
		self.callbacks.clear();
		self.reserved.clear();
		self.render_scope = None;
		self.next_id = 0;
		self.leak_warned = false;
	}

	/// Opens a render scope. Id generation restarts for the pass; live ids are
	/// never re-issued.
	///
	/// Returns `false` (and leaves the open scope untouched) if a scope is
	/// already open.
	pub fn begin_render(&mut self) -> bool {
		if self.render_scope.is_some() {
			tracing::warn!("begin_render called while a render scope is open");
			return false;
		}
		self.next_id = 0;
		self.render_scope = Some(Vec::new());
		true
	}

	/// Returns true while a render scope is open.
	pub fn is_rendering(&self) -> bool {
		self.render_scope.is_some()
	}

	/// Closes the render scope and returns the ids registered during it that
	/// are still live, in registration order.
	pub fn finish_render_and_collect_callback_ids(&mut self) -> Vec<CallbackId> {
		let Some(scope) = self.render_scope.take() else {
			tracing::warn!("finish_render called without an open render scope");
			return Vec::new();
		};
		let mut ids = Vec::with_capacity(scope.len());
		for id in scope {
			if self.callbacks.contains_key(&id) && !ids.contains(&id) {
				ids.push(id);
			}
		}
		ids
	}

	/// Closes the render scope and releases every id registered during it.
	///
	/// Returns the number of released callbacks.
	pub fn abandon_render_context(&mut self) -> usize {
		let Some(scope) = self.render_scope.take() else {
			return 0;
		};
		scope
			.iter()
			.filter(|id| self.callbacks.remove(*id).is_some())
			.count()
	}

	fn insert(&mut self, id: CallbackId, callback: CallbackFn) {
		if let Some(scope) = self.render_scope.as_mut() {
			scope.push(id.clone());
		}
		self.callbacks.insert(id, callback);
		if !self.leak_warned && self.callbacks.len() > self.leak_warning_threshold {
			self.leak_warned = true;
			tracing::warn!(
				live = self.callbacks.len(),
				threshold = self.leak_warning_threshold,
				"callback registry exceeds leak warning threshold; are callbacks being released?"
			);
		}
	}
}

impl fmt::Debug for CallbackRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallbackRegistry")
			.field("live", &self.callbacks.len())
			.field("prefix", &self.prefix)
			.field("rendering", &self.render_scope.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::cell::Cell;

	fn registry() -> CallbackRegistry {
		CallbackRegistry::new("cb", 10_000)
	}

	#[rstest]
	fn test_register_and_execute() {
		// Arrange
		let mut registry = registry();
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let id = registry.register(move |_| counter.set(counter.get() + 1));

		// Act
		let ran = registry.execute(&id, &CallbackContext::Invoke);

		// Assert
		assert!(ran);
		assert_eq!(hits.get(), 1);
	}

	#[rstest]
	fn test_execute_unknown_id_is_noop() {
		// Arrange
		let mut registry = registry();
		let hits = Rc::new(Cell::new(0));
		let counter = Rc::clone(&hits);
		let id = registry.register(move |_| counter.set(counter.get() + 1));

		// Act
		let ran = registry.execute(&CallbackId::from("does-not-exist"), &CallbackContext::Invoke);

		// Assert
		assert!(!ran);
		assert_eq!(hits.get(), 0);
		assert!(registry.contains(&id));
	}

	#[rstest]
	fn test_release_then_execute_is_noop() {
		let mut registry = registry();
		let id = registry.register(|_| panic!("released callback must not run"));

		assert!(registry.release(&id));
		assert!(!registry.release(&id));
		assert!(!registry.execute(&id, &CallbackContext::Invoke));
	}

	#[rstest]
	fn test_register_with_id_requires_release_first() {
		// Arrange
		let mut registry = registry();
		let id = CallbackId::from("cb-7");
		registry.register_with_id(id.clone(), |_| {}).unwrap();

		// Act
		let conflict = registry.register_with_id(id.clone(), |_| {});
		registry.release(&id);
		let reissued = registry.register_with_id(id.clone(), |_| {});

		// Assert
		assert!(matches!(conflict, Err(BridgeError::CallbackConflict(_))));
		assert!(reissued.is_ok());
	}

	#[rstest]
	fn test_generated_ids_skip_live_ids() {
		let mut registry = registry();
		registry.register_with_id(CallbackId::from("cb-0"), |_| {}).unwrap();

		let id = registry.register(|_| {});

		assert_eq!(id.as_str(), "cb-1");
	}

	#[rstest]
	fn test_generated_ids_skip_reserved_ids() {
		// Arrange
		let mut registry = registry();
		let server_id = CallbackId::from("cb-0");
		assert!(registry.reserve(server_id.clone()));

		// Act
		let generated = registry.register(|_| {});
		let claimed = registry.register_with_id(server_id.clone(), |_| {});

		// Assert
		assert_eq!(generated.as_str(), "cb-1");
		assert!(claimed.is_ok());
		assert!(!registry.is_reserved(&server_id));
		assert!(!registry.reserve(server_id));
	}

	#[rstest]
	fn test_try_execute_reports_unknown_id() {
		let registry = registry();

		let result = registry.try_execute(&CallbackId::from("cb-9"), &CallbackContext::Invoke);

		assert!(matches!(result, Err(BridgeError::CallbackNotFound(id)) if id.as_str() == "cb-9"));
	}

	#[rstest]
	fn test_replace_swaps_closure() {
		// Arrange
		let mut registry = registry();
		let seen = Rc::new(Cell::new(0));
		let first = Rc::clone(&seen);
		let id = registry.register(move |_| first.set(1));

		// Act
		let second = Rc::clone(&seen);
		let previous = registry.replace(&id, move |_| second.set(2));
		registry.execute(&id, &CallbackContext::Invoke);

		// Assert
		assert!(previous.is_some());
		assert_eq!(seen.get(), 2);
		assert!(registry.replace(&CallbackId::from("missing"), |_| {}).is_none());
		assert!(!registry.contains(&CallbackId::from("missing")));
	}

	#[rstest]
	fn test_render_scope_collects_ids_in_order() {
		// Arrange
		let mut registry = registry();
		let outside = registry.register(|_| {});

		// Act
		assert!(registry.begin_render());
		let a = registry.register(|_| {});
		let b = registry.register(|_| {});
		let c = registry.register(|_| {});
		registry.release(&b);
		let ids = registry.finish_render_and_collect_callback_ids();

		// Assert
		assert_eq!(ids, vec![a, c]);
		assert!(!ids.contains(&outside));
		assert!(!registry.is_rendering());
	}

	#[rstest]
	fn test_render_ids_restart_per_pass() {
		let mut registry = registry();

		registry.begin_render();
		let first_pass = registry.register(|_| {});
		let ids = registry.finish_render_and_collect_callback_ids();
		for id in &ids {
			registry.release(id);
		}

		registry.begin_render();
		let second_pass = registry.register(|_| {});
		registry.finish_render_and_collect_callback_ids();

		assert_eq!(first_pass, second_pass);
	}

	#[rstest]
	fn test_abandon_render_context_releases_scoped_ids() {
		// Arrange
		let mut registry = registry();
		let survivor = registry.register(|_| {});
		registry.begin_render();
		registry.register(|_| {});
		registry.register(|_| {});

		// Act
		let released = registry.abandon_render_context();

		// Assert
		assert_eq!(released, 2);
		assert_eq!(registry.len(), 1);
		assert!(registry.contains(&survivor));
		assert!(!registry.is_rendering());
	}

	#[rstest]
	fn test_nested_begin_render_is_rejected() {
		let mut registry = registry();
		assert!(registry.begin_render());
		let a = registry.register(|_| {});

		assert!(!registry.begin_render());
		let ids = registry.finish_render_and_collect_callback_ids();

		assert_eq!(ids, vec![a]);
	}

	#[rstest]
	fn test_finish_without_scope_is_empty() {
		let mut registry = registry();
		assert!(registry.finish_render_and_collect_callback_ids().is_empty());
		assert_eq!(registry.abandon_render_context(), 0);
	}

	#[rstest]
	fn test_clear_resets_registry() {
		let mut registry = registry();
		registry.register(|_| {});
		registry.begin_render();

		registry.clear();

		assert!(registry.is_empty());
		assert!(!registry.is_rendering());
	}
}
