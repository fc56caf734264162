//! Component state cells.
//!
//! A [`ComponentScope`] owns the state of one component instance. On the
//! client it is seeded with the state restored from server markup; after the
//! hydration pass it is the sole owner of that state. Writes through a
//! [`StateCell`] notify the scope, which asks for a recomposition.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

type Notifier = RefCell<Option<Rc<dyn Fn() + 'static>>>;

/// A piece of component state.
///
/// Cloning shares the value.
pub struct StateCell<T> {
	value: Rc<RefCell<T>>,
	notifier: Rc<Notifier>,
}

impl<T> Clone for StateCell<T> {
	fn clone(&self) -> Self {
		Self {
			value: Rc::clone(&self.value),
			notifier: Rc::clone(&self.notifier),
		}
	}
}

impl<T: fmt::Debug> fmt::Debug for StateCell<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("StateCell").field(&self.value.borrow()).finish()
	}
}

impl<T: 'static> StateCell<T> {
	/// Creates a cell that belongs to no component.
	pub fn new(value: T) -> Self {
		Self {
			value: Rc::new(RefCell::new(value)),
			notifier: Rc::new(RefCell::new(None)),
		}
	}

	fn attached(value: T, notifier: Rc<Notifier>) -> Self {
		Self {
			value: Rc::new(RefCell::new(value)),
			notifier,
		}
	}

	/// Returns a copy of the value.
	pub fn get(&self) -> T
	where
		T: Clone,
	{
		self.value.borrow().clone()
	}

	/// Reads the value through a closure.
	pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
		f(&self.value.borrow())
	}

	/// Replaces the value and notifies the owning component.
	pub fn set(&self, value: T) {
		*self.value.borrow_mut() = value;
		self.notify();
	}

	/// Mutates the value in place and notifies the owning component.
	pub fn update(&self, f: impl FnOnce(&mut T)) {
		f(&mut self.value.borrow_mut());
		self.notify();
	}

	fn notify(&self) {
		let notifier = self.notifier.borrow().clone();
		if let Some(notifier) = notifier {
			notifier();
		}
	}
}

trait ErasedCell {
	fn snapshot(&self) -> Option<Value>;
	fn as_any(&self) -> &dyn Any;
}

impl<T: Serialize + 'static> ErasedCell for StateCell<T> {
	fn snapshot(&self) -> Option<Value> {
		serde_json::to_value(&*self.value.borrow()).ok()
	}

	fn as_any(&self) -> &dyn Any {
		self
	}
}

struct ScopeInner {
	marker_id: String,
	kind: String,
	server: bool,
	restored: Map<String, Value>,
	declared: Map<String, Value>,
	cells: RefCell<BTreeMap<String, Rc<dyn ErasedCell>>>,
	notifier: Rc<Notifier>,
}

/// State owner for one component instance.
///
/// Cloning shares the scope.
#[derive(Clone)]
pub struct ComponentScope {
	inner: Rc<ScopeInner>,
}

impl fmt::Debug for ComponentScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComponentScope")
			.field("marker_id", &self.inner.marker_id)
			.field("kind", &self.inner.kind)
			.field("server", &self.inner.server)
			.field("cells", &self.inner.cells.borrow().len())
			.finish()
	}
}

impl ComponentScope {
	/// Scope for a server render pass: every cell starts at its initial value.
	pub fn server(
		marker_id: impl Into<String>,
		kind: impl Into<String>,
		declared: Map<String, Value>,
	) -> Self {
		Self::build(marker_id.into(), kind.into(), true, Map::new(), declared)
	}

	/// Scope for a client component. `restored` holds state read back from
	/// markup and wins over `declared`.
	pub fn client(
		marker_id: impl Into<String>,
		kind: impl Into<String>,
		restored: Map<String, Value>,
		declared: Map<String, Value>,
	) -> Self {
		Self::build(marker_id.into(), kind.into(), false, restored, declared)
	}

	fn build(
		marker_id: String,
		kind: String,
		server: bool,
		restored: Map<String, Value>,
		declared: Map<String, Value>,
	) -> Self {
		Self {
			inner: Rc::new(ScopeInner {
				marker_id,
				kind,
				server,
				restored,
				declared,
				cells: RefCell::new(BTreeMap::new()),
				notifier: Rc::new(RefCell::new(None)),
			}),
		}
	}

	/// The marker id of the component.
	pub fn marker_id(&self) -> &str {
		&self.inner.marker_id
	}

	/// The component kind.
	pub fn kind(&self) -> &str {
		&self.inner.kind
	}

	/// Returns true for server render scopes.
	pub fn is_server(&self) -> bool {
		self.inner.server
	}

	/// Returns the cell stored under `key`, creating it on first use.
	///
	/// A new client cell takes the restored value, then the declared value,
	/// then `initial`. Values that fail to deserialize into `T` are skipped.
	pub fn use_state<T>(&self, key: &str, initial: T) -> StateCell<T>
	where
		T: Serialize + DeserializeOwned + 'static,
	{
		if let Some(existing) = self.inner.cells.borrow().get(key) {
			if let Some(cell) = existing.as_any().downcast_ref::<StateCell<T>>() {
				return cell.clone();
			}
			tracing::warn!(
				marker = %self.inner.marker_id,
				key,
				"state key reused with a different type; returning a detached cell"
			);
			return StateCell::new(initial);
		}

		let value = self.seed(key).unwrap_or(initial);
		let cell = StateCell::attached(value, Rc::clone(&self.inner.notifier));
		self.inner
			.cells
			.borrow_mut()
			.insert(key.to_string(), Rc::new(cell.clone()));
		cell
	}

	fn seed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		let sources = if self.inner.server {
			vec![&self.inner.declared]
		} else {
			vec![&self.inner.restored, &self.inner.declared]
		};
		for source in sources {
			if let Some(raw) = source.get(key) {
				match serde_json::from_value(raw.clone()) {
					Ok(value) => return Some(value),
					Err(e) => tracing::warn!(
						marker = %self.inner.marker_id,
						key,
						error = %e,
						"state value does not match the cell type"
					),
				}
			}
		}
		None
	}

	/// Asks the owner to re-render this component.
	pub fn request_recomposition(&self) {
		let notifier = self.inner.notifier.borrow().clone();
		if let Some(notifier) = notifier {
			notifier();
		}
	}

	pub(crate) fn set_notifier(&self, notifier: Rc<dyn Fn() + 'static>) {
		*self.inner.notifier.borrow_mut() = Some(notifier);
	}

	/// Current state as a JSON object: declared values overlaid with the
	/// current value of every cell.
	pub fn snapshot(&self) -> Value {
		let mut state = self.inner.declared.clone();
		for (key, cell) in self.inner.cells.borrow().iter() {
			if let Some(value) = cell.snapshot() {
				state.insert(key.clone(), value);
			}
		}
		Value::Object(state)
	}
}
