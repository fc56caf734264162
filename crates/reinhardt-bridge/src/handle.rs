//! Handle Table
//!
//! The client side of the bridge cannot hold live references to host
//! resources across the sandbox boundary, so every node it touches is
//! represented by an opaque string [`Handle`]. This module keeps the
//! mapping in both directions.
//!
//! ## Invariants
//!
//! - A handle is never reused while its resource is live. Handles are minted
//!   from a process-wide monotonic counter and never recycled.
//! - Registering the same live resource twice yields the same handle.
//! - An unknown handle resolves to [`BridgeError::HandleNotFound`], never to a
//!   stale resource.
//!
//! Resources that can carry their own identity (elements) are stamped with
//! their handle so a later lookup of the same node from the host side, for
//! example after a fresh `querySelector`, yields the same handle.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BridgeError, BridgeResult};

/// Global counter for minting handles.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque, process-unique identity of one host resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
	/// Mints a fresh handle with the given prefix.
	fn mint(prefix: &str) -> Self {
		let n = HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed);
		Self(format!("{}-{}", prefix, n))
	}

	/// Returns the handle as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Handle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Handle {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl From<String> for Handle {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl Borrow<str> for Handle {
	fn borrow(&self) -> &str {
		&self.0
	}
}

/// A host resource that may carry its own identity.
///
/// Equality must be identity equality (same live host object), not
/// structural equality.
pub trait Identity: Clone + PartialEq {
	/// Returns the handle previously stamped on this resource, if any.
	fn identity(&self) -> Option<String>;

	/// Stamps `handle` onto the resource. Returns `false` when the resource
	/// cannot carry an identity (text nodes).
	fn stamp(&self, handle: &Handle) -> bool;
}

/// Bidirectional map between handles and live host resources.
#[derive(Debug)]
pub struct HandleTable<R> {
	entries: HashMap<Handle, R>,
	prefix: String,
	leak_warning_threshold: usize,
	leak_warned: bool,
}

impl<R: Identity> HandleTable<R> {
	/// Creates an empty table minting handles as `{prefix}-{n}`.
	pub fn new(prefix: impl Into<String>, leak_warning_threshold: usize) -> Self {
		Self {
			entries: HashMap::new(),
			prefix: prefix.into(),
			leak_warning_threshold,
			leak_warned: false,
		}
	}

	/// Registers a resource and returns its handle.
	///
	/// Idempotent: a resource that is already registered, or that carries a
	/// stamped handle not yet known to this table, keeps that handle.
	pub fn register(&mut self, resource: &R) -> Handle {
		if let Some(stamped) = resource.identity() {
			let stamped = Handle::from(stamped);
			match self.entries.get(&stamped) {
				Some(existing) if existing == resource => return stamped,
				Some(_) => {
					tracing::warn!(
						handle = %stamped,
						"stamped handle is bound to a different resource, minting a new one"
					);
				}
				None => {
					if let Some(known) = self.handle_of(resource) {
						return known;
					}
					tracing::debug!(handle = %stamped, "adopting pre-existing handle");
					self.insert(stamped.clone(), resource.clone());
					return stamped;
				}
			}
		} else if let Some(known) = self.handle_of(resource) {
			return known;
		}

		let handle = loop {
			let candidate = Handle::mint(&self.prefix);
			if !self.entries.contains_key(&candidate) {
				break candidate;
			}
		};
		resource.stamp(&handle);
		self.insert(handle.clone(), resource.clone());
		handle
	}

	/// Resolves a handle to its resource.
	pub fn resolve(&self, handle: &Handle) -> BridgeResult<&R> {
		self.entries
			.get(handle)
			.ok_or_else(|| BridgeError::HandleNotFound(handle.clone()))
	}

	/// Looks up the handle of an already-registered resource.
	pub fn handle_of(&self, resource: &R) -> Option<Handle> {
		self.entries
			.iter()
			.find(|(_, r)| *r == resource)
			.map(|(h, _)| h.clone())
	}

	/// Moves the entry for `old` to `new` and re-stamps the resource.
	///
	/// Dependent wiring (listeners, pending events) is re-keyed by the runtime.
	pub fn rebind(&mut self, old: &Handle, new: Handle) -> BridgeResult<()> {
		if old == &new {
			return if self.entries.contains_key(old) {
				Ok(())
			} else {
				Err(BridgeError::HandleNotFound(old.clone()))
			};
		}
		if self.entries.contains_key(&new) {
			return Err(BridgeError::HandleConflict(new));
		}
		let resource = self
			.entries
			.remove(old)
			.ok_or_else(|| BridgeError::HandleNotFound(old.clone()))?;
		resource.stamp(&new);
		self.entries.insert(new, resource);
		Ok(())
	}

	/// Removes the mapping. Returns the resource if the handle was live.
	pub fn release(&mut self, handle: &Handle) -> Option<R> {
		self.entries.remove(handle)
	}

	/// Returns true if the handle is live.
	pub fn contains(&self, handle: &Handle) -> bool {
		self.entries.contains_key(handle)
	}

	/// Returns the number of live handles.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true if no handles are live.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Drops every mapping (document teardown).
	pub fn clear(&mut self) {
		self.entries.clear();
		self.leak_warned = false;
	}

	fn insert(&mut self, handle: Handle, resource: R) {
		self.entries.insert(handle, resource);
		if !self.leak_warned && self.entries.len() > self.leak_warning_threshold {
			self.leak_warned = true;
			tracing::warn!(
				live = self.entries.len(),
				threshold = self.leak_warning_threshold,
				"handle table exceeds leak warning threshold; are handles being released?"
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use rstest::rstest;
	use std::cell::RefCell;
	use std::rc::Rc;

	/// Minimal resource with pointer identity and an optional stamp slot.
	#[derive(Debug, Clone)]
	struct Res {
		stamp: Rc<RefCell<Option<String>>>,
		stampable: bool,
	}

	impl Res {
		fn element() -> Self {
			Self {
				stamp: Rc::new(RefCell::new(None)),
				stampable: true,
			}
		}

		fn text() -> Self {
			Self {
				stamp: Rc::new(RefCell::new(None)),
				stampable: false,
			}
		}

		fn stamped(handle: &str) -> Self {
			let res = Self::element();
			*res.stamp.borrow_mut() = Some(handle.to_string());
			res
		}
	}

	impl PartialEq for Res {
		fn eq(&self, other: &Self) -> bool {
			Rc::ptr_eq(&self.stamp, &other.stamp)
		}
	}

	impl Identity for Res {
		fn identity(&self) -> Option<String> {
			RefCell::borrow(&self.stamp).clone()
		}

		fn stamp(&self, handle: &Handle) -> bool {
			if self.stampable {
				*self.stamp.borrow_mut() = Some(handle.to_string());
			}
			self.stampable
		}
	}

	fn table() -> HandleTable<Res> {
		HandleTable::new("t", 10_000)
	}

	#[rstest]
	fn test_register_is_idempotent() {
		// Arrange
		let mut table = table();
		let res = Res::element();

		// Act
		let first = table.register(&res);
		let second = table.register(&res);

		// Assert
		assert_eq!(first, second);
		assert_eq!(table.len(), 1);
		assert_eq!(res.identity().as_deref(), Some(first.as_str()));
	}

	#[rstest]
	fn test_register_text_node_without_stamp_is_idempotent() {
		let mut table = table();
		let text = Res::text();

		let first = table.register(&text);
		let second = table.register(&text);

		assert_eq!(first, second);
		assert!(text.identity().is_none());
	}

	#[rstest]
	fn test_register_distinct_resources_yields_distinct_handles() {
		let mut table = table();
		let a = Res::element();
		let b = Res::element();

		assert_ne!(table.register(&a), table.register(&b));
	}

	#[rstest]
	fn test_register_adopts_pre_existing_stamp() {
		// Arrange
		let mut table = table();
		let res = Res::stamped("server-7");

		// Act
		let handle = table.register(&res);

		// Assert
		assert_eq!(handle.as_str(), "server-7");
		assert!(table.resolve(&handle).unwrap() == &res);
	}

	#[rstest]
	fn test_register_mints_when_stamp_is_taken_by_another_resource() {
		// Arrange
		let mut table = table();
		let original = Res::stamped("dup");
		let clone_of_markup = Res::stamped("dup");
		table.register(&original);

		// Act
		let handle = table.register(&clone_of_markup);

		// Assert
		assert_ne!(handle.as_str(), "dup");
		assert_eq!(clone_of_markup.identity().as_deref(), Some(handle.as_str()));
	}

	#[rstest]
	fn test_resolve_unknown_is_typed_not_found() {
		let table = table();
		let result = table.resolve(&Handle::from("never-registered"));
		assert!(matches!(result, Err(BridgeError::HandleNotFound(h)) if h.as_str() == "never-registered"));
	}

	#[rstest]
	fn test_release_then_resolve_is_not_found() {
		// Arrange
		let mut table = table();
		let res = Res::element();
		let handle = table.register(&res);

		// Act
		let released = table.release(&handle);
		let second_release = table.release(&handle);

		// Assert
		assert!(released.is_some());
		assert!(second_release.is_none());
		assert!(table.resolve(&handle).is_err());
	}

	#[rstest]
	fn test_release_twice_does_not_affect_other_handles() {
		let mut table = table();
		let a = Res::element();
		let b = Res::element();
		let ha = table.register(&a);
		let hb = table.register(&b);

		table.release(&ha);
		table.release(&ha);

		assert!(table.resolve(&hb).unwrap() == &b);
	}

	#[rstest]
	fn test_released_handle_is_not_reissued_to_new_resource() {
		let mut table = table();
		let a = Res::element();
		let ha = table.register(&a);
		table.release(&ha);

		let b = Res::element();
		let hb = table.register(&b);

		assert_ne!(ha, hb);
	}

	#[rstest]
	fn test_rebind_moves_entry_and_restamps() {
		// Arrange
		let mut table = table();
		let res = Res::element();
		let old = table.register(&res);

		// Act
		table.rebind(&old, Handle::from("explicit-id")).unwrap();

		// Assert
		assert!(table.resolve(&old).is_err());
		assert!(table.resolve(&Handle::from("explicit-id")).unwrap() == &res);
		assert_eq!(res.identity().as_deref(), Some("explicit-id"));
		assert_eq!(table.len(), 1);
	}

	#[rstest]
	fn test_rebind_conflict_and_missing() {
		let mut table = table();
		let a = Res::element();
		let b = Res::element();
		let ha = table.register(&a);
		let hb = table.register(&b);

		assert!(matches!(
			table.rebind(&ha, hb.clone()),
			Err(BridgeError::HandleConflict(_))
		));
		assert!(matches!(
			table.rebind(&Handle::from("missing"), Handle::from("x")),
			Err(BridgeError::HandleNotFound(_))
		));
	}

	#[rstest]
	fn test_clear_empties_table() {
		let mut table = table();
		table.register(&Res::element());
		table.register(&Res::text());

		table.clear();

		assert!(table.is_empty());
	}

	proptest! {
		#[test]
		fn prop_handles_are_unique_and_stable(count in 1usize..64) {
			let mut table = table();
			let resources: Vec<Res> = (0..count)
				.map(|i| if i % 3 == 0 { Res::text() } else { Res::element() })
				.collect();

			let handles: Vec<Handle> = resources.iter().map(|r| table.register(r)).collect();
			let again: Vec<Handle> = resources.iter().map(|r| table.register(r)).collect();

			let unique: std::collections::HashSet<_> = handles.iter().collect();
			prop_assert_eq!(unique.len(), count);
			prop_assert_eq!(handles, again);
		}
	}
}
