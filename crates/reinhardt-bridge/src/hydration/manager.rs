//! Hydration Manager
//!
//! Reconciles client component registrations with server-rendered markup.
//!
//! ## Pass structure
//!
//! For every registration, in registration order:
//!
//! 1. Locate the component root by its marker id. Missing roots are mounted
//!    fresh under the mount parent (client-only render).
//! 2. Take the serialized state for the marker. Unusable state (corrupt entry,
//!    corrupt state block, kind mismatch) clears that subtree and mounts it
//!    fresh with declared initial values. Other markers are unaffected.
//! 3. Otherwise re-run the producer and walk its view against the existing
//!    nodes without creating any: nodes get handles, handlers are collected.
//! 4. Wire the collected handlers, reusing callback ids from the
//!    `data-rh-on-*` attributes, only after the walk finished.
//! 5. Mark the marker hydrated so a later pass skips it.
//!
//! Markers without a registration are reported as ignored and their markup is
//! left exactly as rendered. Serialized state is discarded after the pass;
//! from then on each component's [`ComponentScope`] owns its state.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use super::markers::{
	COMPONENT_ATTR, ComponentIdGenerator, EVENT_ATTR_PREFIX, HYDRATED_ATTR, MARKER_ATTR, MarkerState,
	PAYLOAD_SCRIPT_ID, STATE_ATTR, STATE_SCRIPT_ID, event_attr,
};
use super::payload::HydrationPayload;
use crate::callback::CallbackId;
use crate::error::{BridgeError, BridgeResult, HydrationError};
use crate::handle::Handle;
use crate::host::Host;
use crate::runtime::BridgeRuntime;
use crate::state::{ComponentScope, StateCell};
use crate::view::{ElementView, View, ViewEventHandler, handler_callback};

/// Produces a component's view from its scope.
pub type ComponentProducer = Rc<dyn Fn(&ComponentScope) -> View + 'static>;

type HydrationListener = Rc<dyn Fn(&HydrationReport) + 'static>;

/// Outcome of one hydration pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrationReport {
	/// Markers attached to existing markup.
	pub hydrated: Vec<String>,
	/// Markers mounted fresh: root missing or state unusable.
	pub client_mounted: Vec<String>,
	/// Markers present in markup with no client registration.
	pub ignored: Vec<String>,
	/// Payload callback ids that do not resolve to a live closure.
	pub unresolved_callbacks: Vec<CallbackId>,
	/// Recovered problems, in the order they were met.
	pub errors: Vec<HydrationError>,
}

impl HydrationReport {
	/// Returns true if every registration hydrated without recovery.
	pub fn is_clean(&self) -> bool {
		self.client_mounted.is_empty() && self.errors.is_empty()
	}
}

#[derive(Clone)]
struct Registration {
	marker_id: String,
	kind: String,
	declared: Map<String, Value>,
	producer: ComponentProducer,
}

enum RestoredState {
	Valid { kind: String, state: Map<String, Value> },
	Corrupt(String),
}

struct MountedComponent {
	marker_id: String,
	kind: String,
	root: Handle,
	scope: ComponentScope,
	producer: ComponentProducer,
}

struct Wiring {
	handle: Handle,
	event_type: String,
	handler: ViewEventHandler,
	server_id: Option<CallbackId>,
}

enum Outcome {
	Hydrated,
	ClientMounted,
}

enum Mode<H: Host> {
	Server,
	Client(BridgeRuntime<H>),
}

struct ManagerInner<H: Host> {
	mode: Mode<H>,
	ids: RefCell<ComponentIdGenerator>,
	registrations: RefCell<Vec<Registration>>,
	restored: RefCell<HashMap<String, RestoredState>>,
	state_block_error: RefCell<Option<String>>,
	payload: RefCell<Option<HydrationPayload>>,
	load_errors: RefCell<Vec<HydrationError>>,
	components: RefCell<HashMap<String, Rc<MountedComponent>>>,
	hydrated: RefCell<HashSet<String>>,
	dirty: RefCell<BTreeSet<String>>,
	mount_parent: RefCell<Option<H::Node>>,
	complete: Cell<bool>,
	last_report: RefCell<Option<HydrationReport>>,
	listeners: RefCell<Vec<HydrationListener>>,
}

/// Client (or server) hydration context for one document.
pub struct HydrationManager<H: Host> {
	inner: Rc<ManagerInner<H>>,
}

impl<H: Host> Clone for HydrationManager<H> {
	fn clone(&self) -> Self {
		Self {
			inner: Rc::clone(&self.inner),
		}
	}
}

impl<H: Host> fmt::Debug for HydrationManager<H> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HydrationManager")
			.field("server", &matches!(self.inner.mode, Mode::Server))
			.field("registrations", &self.inner.registrations.borrow().len())
			.field("hydrated", &self.inner.hydrated.borrow().len())
			.field("complete", &self.inner.complete.get())
			.finish()
	}
}

impl<H: Host> HydrationManager<H> {
	/// Manager bound to a client runtime.
	pub fn client(runtime: BridgeRuntime<H>) -> Self {
		Self::build(Mode::Client(runtime))
	}

	/// Manager for a server render pass. It never touches a document and
	/// every restored state cell starts at its initial value.
	pub fn server() -> Self {
		Self::build(Mode::Server)
	}

	fn build(mode: Mode<H>) -> Self {
		Self {
			inner: Rc::new(ManagerInner {
				mode,
				ids: RefCell::new(ComponentIdGenerator::new()),
				registrations: RefCell::new(Vec::new()),
				restored: RefCell::new(HashMap::new()),
				state_block_error: RefCell::new(None),
				payload: RefCell::new(None),
				load_errors: RefCell::new(Vec::new()),
				components: RefCell::new(HashMap::new()),
				hydrated: RefCell::new(HashSet::new()),
				dirty: RefCell::new(BTreeSet::new()),
				mount_parent: RefCell::new(None),
				complete: Cell::new(false),
				last_report: RefCell::new(None),
				listeners: RefCell::new(Vec::new()),
			}),
		}
	}

	/// The client runtime, if any.
	pub fn runtime(&self) -> Option<&BridgeRuntime<H>> {
		match &self.inner.mode {
			Mode::Client(runtime) => Some(runtime),
			Mode::Server => None,
		}
	}

	/// Sets the node under which components without markup are mounted.
	/// Defaults to the host root.
	pub fn set_mount_parent(&self, node: H::Node) {
		*self.inner.mount_parent.borrow_mut() = Some(node);
	}

	/// Uses the element with id `element_id` as the mount parent.
	pub fn mount_into(&self, element_id: &str) -> Result<(), HydrationError> {
		let node = self
			.runtime()
			.and_then(|runtime| runtime.host().find_by_attribute("id", element_id))
			.ok_or_else(|| HydrationError::RootNotFound(element_id.to_string()))?;
		self.set_mount_parent(node);
		Ok(())
	}

	// Loading

	/// Reads the state and payload script blocks from the document.
	///
	/// Returns the number of usable marker states. Unreadable blocks are
	/// logged and reported by the next [`hydrate_all`](Self::hydrate_all).
	pub fn load_from_document(&self) -> usize {
		let Some(runtime) = self.runtime() else {
			return 0;
		};
		let host = runtime.host();
		let mut loaded = 0;
		if let Some(script) = host.find_by_attribute("id", STATE_SCRIPT_ID) {
			match self.load_state_json(&host.text_content(&script)) {
				Ok(count) => loaded = count,
				Err(e) => tracing::warn!(error = %e, "state block unreadable; markers mount fresh"),
			}
		}
		if let Some(script) = host.find_by_attribute("id", PAYLOAD_SCRIPT_ID)
			&& let Err(e) = self.load_payload_json(&host.text_content(&script))
		{
			tracing::warn!(error = %e, "hydration payload unreadable");
			self.inner
				.load_errors
				.borrow_mut()
				.push(HydrationError::StateParseError(e.to_string()));
		}
		loaded
	}

	/// Loads `[MarkerState, ...]` JSON.
	///
	/// Entries are parsed one by one: a corrupt entry only marks its own
	/// marker. If the block itself is not a JSON array, every marker of the
	/// pass is treated as corrupt and [`BridgeError::StateParse`] is returned.
	pub fn load_state_json(&self, json: &str) -> BridgeResult<usize> {
		let entries: Vec<Value> = match serde_json::from_str(json) {
			Ok(entries) => entries,
			Err(e) => {
				let reason = e.to_string();
				*self.inner.state_block_error.borrow_mut() = Some(reason.clone());
				self.inner
					.load_errors
					.borrow_mut()
					.push(HydrationError::StateParseError(reason.clone()));
				return Err(BridgeError::StateParse(reason));
			}
		};

		let mut restored = self.inner.restored.borrow_mut();
		let mut loaded = 0;
		for entry in entries {
			let element_id = entry
				.get("elementId")
				.and_then(Value::as_str)
				.map(str::to_string);
			match serde_json::from_value::<MarkerState>(entry) {
				Ok(MarkerState {
					element_id,
					component_type,
					initial_state: Value::Object(state),
				}) => {
					restored.insert(
						element_id,
						RestoredState::Valid {
							kind: component_type,
							state,
						},
					);
					loaded += 1;
				}
				Ok(MarkerState { element_id, .. }) => {
					restored.insert(
						element_id,
						RestoredState::Corrupt("initialState is not an object".to_string()),
					);
				}
				Err(e) => match element_id {
					Some(id) => {
						restored.insert(id, RestoredState::Corrupt(e.to_string()));
					}
					None => tracing::warn!(error = %e, "state entry without elementId skipped"),
				},
			}
		}
		tracing::debug!(loaded, "serialized component state loaded");
		Ok(loaded)
	}

	/// Loads the hydration payload.
	pub fn load_payload_json(&self, json: &str) -> BridgeResult<HydrationPayload> {
		let payload = HydrationPayload::from_json(json)?;
		if let Some(runtime) = self.runtime()
			&& payload.version != runtime.options().payload_version
		{
			tracing::warn!(
				found = payload.version,
				expected = runtime.options().payload_version,
				"hydration payload version differs"
			);
		}
		*self.inner.payload.borrow_mut() = Some(payload.clone());
		Ok(payload)
	}

	/// The loaded hydration payload.
	pub fn payload(&self) -> Option<HydrationPayload> {
		self.inner.payload.borrow().clone()
	}

	// Registration

	/// Records a component the client intends to mount. The document is not
	/// touched until [`hydrate_all`](Self::hydrate_all).
	///
	/// `initial_state` is the declared state object used whenever nothing
	/// was restored.
	pub fn register_component<F>(
		&self,
		marker_id: impl Into<String>,
		kind: impl Into<String>,
		initial_state: Value,
		producer: F,
	) where
		F: Fn(&ComponentScope) -> View + 'static,
	{
		let marker_id = marker_id.into();
		let declared = match initial_state {
			Value::Object(map) => map,
			Value::Null => Map::new(),
			other => {
				tracing::warn!(marker = %marker_id, state = %other, "declared state is not an object; ignored");
				Map::new()
			}
		};
		let registration = Registration {
			marker_id: marker_id.clone(),
			kind: kind.into(),
			declared,
			producer: Rc::new(producer),
		};
		let mut registrations = self.inner.registrations.borrow_mut();
		match registrations.iter_mut().find(|r| r.marker_id == marker_id) {
			Some(existing) => {
				tracing::warn!(marker = %marker_id, "component registered twice; keeping the latest");
				*existing = registration;
			}
			None => registrations.push(registration),
		}
	}

	/// Returns the next component id for `kind` (`{kind}-{n}`).
	pub fn generate_component_id(&self, kind: &str) -> String {
		self.inner.ids.borrow_mut().next_id(kind)
	}

	// Hydration

	/// Runs one hydration pass over every registration.
	///
	/// Never fails: problems are recovered per marker and listed in the
	/// returned report.
	pub fn hydrate_all(&self) -> HydrationReport {
		let mut report = HydrationReport::default();
		let Some(runtime) = self.runtime().cloned() else {
			tracing::warn!("hydrate_all called on a server manager");
			return report;
		};
		report
			.errors
			.extend(self.inner.load_errors.borrow_mut().drain(..));
		self.reserve_server_ids(&runtime);

		let registrations = self.inner.registrations.borrow().clone();
		for registration in &registrations {
			if self.inner.hydrated.borrow().contains(&registration.marker_id) {
				continue;
			}
			match self.hydrate_one(&runtime, registration, &mut report) {
				Ok(Outcome::Hydrated) => report.hydrated.push(registration.marker_id.clone()),
				Ok(Outcome::ClientMounted) => {
					report.client_mounted.push(registration.marker_id.clone())
				}
				Err(e) => {
					tracing::warn!(marker = %registration.marker_id, error = %e, "hydration of marker failed");
					report.errors.push(HydrationError::EventAttachmentFailed(format!(
						"{}: {}",
						registration.marker_id, e
					)));
					runtime.report_error(&e);
				}
			}
		}

		let host = runtime.host();
		let registered: HashSet<&str> = registrations
			.iter()
			.map(|r| r.marker_id.as_str())
			.collect();
		for node in host.find_all_with_attribute(MARKER_ATTR) {
			if let Some(id) = host.get_attribute(&node, MARKER_ATTR)
				&& !registered.contains(id.as_str())
				&& !report.ignored.contains(&id)
			{
				tracing::debug!(marker = %id, "marker has no client registration; left static");
				report.ignored.push(id);
			}
		}

		self.inner.restored.borrow_mut().clear();
		*self.inner.state_block_error.borrow_mut() = None;

		if let Some(payload) = self.inner.payload.borrow().as_ref() {
			report.unresolved_callbacks = payload
				.callbacks
				.iter()
				.filter(|id| !runtime.has_callback(id))
				.cloned()
				.collect();
		}

		self.inner.complete.set(true);
		*self.inner.last_report.borrow_mut() = Some(report.clone());
		tracing::debug!(
			hydrated = report.hydrated.len(),
			client_mounted = report.client_mounted.len(),
			ignored = report.ignored.len(),
			errors = report.errors.len(),
			"hydration pass complete"
		);

		let listeners = self.inner.listeners.borrow().clone();
		for listener in listeners {
			listener(&report);
		}
		report
	}

	/// Reserves every callback id the server issued (payload and
	/// `data-rh-on-*` attributes) so that components mounted earlier in the
	/// pass cannot be handed an id a later marker's markup still names.
	fn reserve_server_ids(&self, runtime: &BridgeRuntime<H>) {
		let host = runtime.host();
		let mut ids: Vec<CallbackId> = self
			.inner
			.payload
			.borrow()
			.as_ref()
			.map(|payload| payload.callbacks.clone())
			.unwrap_or_default();

		let mut stack = vec![host.root()];
		while let Some(node) = stack.pop() {
			for name in host.attribute_names(&node) {
				if name.starts_with(EVENT_ATTR_PREFIX)
					&& let Some(id) = host.get_attribute(&node, &name)
				{
					ids.push(CallbackId::from(id));
				}
			}
			stack.extend(host.element_children(&node));
		}

		let reserved = ids
			.into_iter()
			.filter(|id| runtime.reserve_callback_id(id.clone()))
			.count();
		tracing::trace!(reserved, "server callback ids reserved");
	}

	fn hydrate_one(
		&self,
		runtime: &BridgeRuntime<H>,
		registration: &Registration,
		report: &mut HydrationReport,
	) -> BridgeResult<Outcome> {
		let host = runtime.host();
		let marker = &registration.marker_id;

		let Some(root) = host.find_by_attribute(MARKER_ATTR, marker) else {
			tracing::warn!(marker = %marker, "marker not found in markup; mounting on the client");
			report
				.errors
				.push(HydrationError::MarkerNotFound(marker.clone()));
			self.inner.restored.borrow_mut().remove(marker);
			let scope = ComponentScope::client(
				marker.clone(),
				registration.kind.clone(),
				Map::new(),
				registration.declared.clone(),
			);
			let view = root_view(registration, &scope);
			let parent = self
				.inner
				.mount_parent
				.borrow()
				.clone()
				.unwrap_or_else(|| host.root());
			let node = runtime.build_element(&view)?;
			host.append_child(&parent, &node)?;
			let handle = runtime.register_node(&node);
			self.finish(runtime, registration, handle, scope)?;
			return Ok(Outcome::ClientMounted);
		};

		let root_handle = runtime.register_node(&root);
		match self.take_restored(runtime, registration, &root) {
			Ok(state) => {
				let scope = ComponentScope::client(
					marker.clone(),
					registration.kind.clone(),
					state,
					registration.declared.clone(),
				);
				let view = root_view(registration, &scope);
				let actual_tag = host.tag_name(&root).unwrap_or_default();
				if actual_tag != view.tag_name() {
					report.errors.push(HydrationError::StructureMismatch {
						id: marker.clone(),
						expected: view.tag_name().to_string(),
						actual: actual_tag,
					});
					remount_children(runtime, &root, &view)?;
				} else {
					let mut wiring = Vec::new();
					adopt(runtime, &root, &view, marker, &mut wiring, report)?;
					wire(runtime, wiring, report);
				}
				self.finish(runtime, registration, root_handle, scope)?;
				Ok(Outcome::Hydrated)
			}
			Err(reason) => {
				tracing::warn!(marker = %marker, reason = %reason, "serialized state unusable; mounting subtree fresh");
				report
					.errors
					.push(HydrationError::StateParseError(format!("{}: {}", marker, reason)));
				let scope = ComponentScope::client(
					marker.clone(),
					registration.kind.clone(),
					Map::new(),
					registration.declared.clone(),
				);
				let view = root_view(registration, &scope);
				remount_children(runtime, &root, &view)?;
				self.finish(runtime, registration, root_handle, scope)?;
				Ok(Outcome::ClientMounted)
			}
		}
	}

	fn take_restored(
		&self,
		runtime: &BridgeRuntime<H>,
		registration: &Registration,
		root: &H::Node,
	) -> Result<Map<String, Value>, String> {
		let host = runtime.host();
		let entry = self.inner.restored.borrow_mut().remove(&registration.marker_id);

		if let Some(markup_kind) = host.get_attribute(root, COMPONENT_ATTR)
			&& markup_kind != registration.kind
		{
			return Err(format!(
				"component kind mismatch: markup has '{}', client registered '{}'",
				markup_kind, registration.kind
			));
		}

		let entry = entry.or_else(|| {
			host.get_attribute(root, STATE_ATTR)
				.map(|raw| match serde_json::from_str::<Value>(&raw) {
					Ok(Value::Object(state)) => RestoredState::Valid {
						kind: registration.kind.clone(),
						state,
					},
					Ok(_) => RestoredState::Corrupt("inline state is not an object".to_string()),
					Err(e) => RestoredState::Corrupt(e.to_string()),
				})
		});

		match entry {
			Some(RestoredState::Valid { kind, state }) if kind == registration.kind => Ok(state),
			Some(RestoredState::Valid { kind, .. }) => Err(format!(
				"component kind mismatch: state has '{}', client registered '{}'",
				kind, registration.kind
			)),
			Some(RestoredState::Corrupt(reason)) => Err(reason),
			None => match self.inner.state_block_error.borrow().clone() {
				Some(reason) => Err(format!("state block unreadable: {}", reason)),
				None => Ok(Map::new()),
			},
		}
	}

	fn finish(
		&self,
		runtime: &BridgeRuntime<H>,
		registration: &Registration,
		root: Handle,
		scope: ComponentScope,
	) -> BridgeResult<()> {
		let weak = Rc::downgrade(&self.inner);
		let marker = registration.marker_id.clone();
		scope.set_notifier(Rc::new(move || {
			if let Some(inner) = weak.upgrade() {
				HydrationManager { inner }.mark_dirty(&marker);
			}
		}));
		runtime.set_attribute(&root, HYDRATED_ATTR, "true")?;

		self.inner.components.borrow_mut().insert(
			registration.marker_id.clone(),
			Rc::new(MountedComponent {
				marker_id: registration.marker_id.clone(),
				kind: registration.kind.clone(),
				root,
				scope,
				producer: Rc::clone(&registration.producer),
			}),
		);
		self.inner
			.hydrated
			.borrow_mut()
			.insert(registration.marker_id.clone());
		Ok(())
	}

	// State

	/// Returns the state cell `key` of component `component_id`.
	///
	/// On the server this is always a fresh cell seeded with `initial`. On
	/// the client it is the component's cell, seeded with the restored value
	/// when the marker matched and with `initial` otherwise.
	pub fn restore_state<T>(&self, component_id: &str, key: &str, initial: T) -> StateCell<T>
	where
		T: Serialize + DeserializeOwned + 'static,
	{
		if self.runtime().is_none() {
			return StateCell::new(initial);
		}
		if let Some(scope) = self.component_scope(component_id) {
			return scope.use_state(key, initial);
		}
		let restored = match self.inner.restored.borrow().get(component_id) {
			Some(RestoredState::Valid { state, .. }) => state.get(key).cloned(),
			_ => None,
		};
		let value = restored
			.and_then(|raw| serde_json::from_value(raw).ok())
			.unwrap_or(initial);
		StateCell::new(value)
	}

	/// The state owner of a hydrated component.
	pub fn component_scope(&self, marker_id: &str) -> Option<ComponentScope> {
		self.inner
			.components
			.borrow()
			.get(marker_id)
			.map(|c| c.scope.clone())
	}

	/// Handle of a hydrated component's root node.
	pub fn component_root(&self, marker_id: &str) -> Option<Handle> {
		self.inner
			.components
			.borrow()
			.get(marker_id)
			.map(|c| c.root.clone())
	}

	/// Returns true once `marker_id` has been hydrated (or client-mounted).
	pub fn is_hydrated(&self, marker_id: &str) -> bool {
		self.inner.hydrated.borrow().contains(marker_id)
	}

	/// Returns true once a hydration pass has completed.
	pub fn is_hydration_complete(&self) -> bool {
		self.inner.complete.get()
	}

	/// Subscribes to pass completion. If a pass already completed, the
	/// listener runs immediately with its report.
	pub fn on_hydration_complete<F>(&self, listener: F)
	where
		F: Fn(&HydrationReport) + 'static,
	{
		let listener: HydrationListener = Rc::new(listener);
		self.inner.listeners.borrow_mut().push(Rc::clone(&listener));
		let last = self.inner.last_report.borrow().clone();
		if let Some(report) = last {
			listener(&report);
		}
	}

	// Recomposition

	fn mark_dirty(&self, marker: &str) {
		self.inner.dirty.borrow_mut().insert(marker.to_string());
		let Some(runtime) = self.runtime() else {
			return;
		};
		let weak = Rc::downgrade(&self.inner);
		let scheduled = runtime.schedule_recomposition(move || match weak.upgrade() {
			Some(inner) => HydrationManager { inner }.flush(),
			None => Ok(()),
		});
		if let Err(e) = scheduled {
			runtime.report_error(&e);
		}
	}

	fn flush(&self) -> anyhow::Result<()> {
		let Some(runtime) = self.runtime() else {
			return Ok(());
		};
		let dirty = std::mem::take(&mut *self.inner.dirty.borrow_mut());
		let mut failures = Vec::new();
		for marker in dirty {
			let component = self.inner.components.borrow().get(&marker).cloned();
			let Some(component) = component else {
				continue;
			};
			if let Err(e) = recompose(runtime, &component) {
				failures.push(format!("{}: {}", marker, e));
			}
		}
		if failures.is_empty() {
			Ok(())
		} else {
			Err(anyhow::anyhow!(failures.join("; ")))
		}
	}
}

fn root_view(registration: &Registration, scope: &ComponentScope) -> ElementView {
	(registration.producer)(scope)
		.into_root_element()
		.attr(MARKER_ATTR, registration.marker_id.clone())
		.attr(COMPONENT_ATTR, registration.kind.clone())
}

/// Walks `element` against existing nodes, registering handles and
/// collecting handlers. Only mismatched children are created.
fn adopt<H: Host>(
	runtime: &BridgeRuntime<H>,
	node: &H::Node,
	element: &ElementView,
	marker: &str,
	wiring: &mut Vec<Wiring>,
	report: &mut HydrationReport,
) -> BridgeResult<()> {
	let host = runtime.host();
	let handle = runtime.register_node(node);
	for (event_type, handler) in element.event_handlers() {
		wiring.push(Wiring {
			handle: handle.clone(),
			event_type: event_type.to_string(),
			handler: Rc::clone(handler),
			server_id: host
				.get_attribute(node, &event_attr(event_type))
				.map(CallbackId::from),
		});
	}
	if element.is_void() {
		return Ok(());
	}

	let expected: Vec<&ElementView> = element
		.child_views()
		.iter()
		.flat_map(|child| child.flatten())
		.filter_map(|view| match view {
			View::Element(element) => Some(element),
			_ => None,
		})
		.collect();
	let actual = host.element_children(node);

	for (index, child_view) in expected.iter().enumerate() {
		match actual.get(index) {
			Some(child) if host.tag_name(child).as_deref() == Some(child_view.tag_name()) => {
				adopt(runtime, child, child_view, marker, wiring, report)?;
			}
			Some(child) => {
				let actual_tag = host.tag_name(child).unwrap_or_default();
				tracing::warn!(
					marker,
					expected = child_view.tag_name(),
					actual = %actual_tag,
					"markup differs from view; replacing child"
				);
				report.errors.push(HydrationError::StructureMismatch {
					id: marker.to_string(),
					expected: child_view.tag_name().to_string(),
					actual: actual_tag,
				});
				let fresh = runtime.build_element(child_view)?;
				runtime.teardown(child);
				host.replace_child(node, &fresh, child)?;
			}
			None => {
				tracing::warn!(marker, expected = child_view.tag_name(), "markup is missing a child; creating it");
				report.errors.push(HydrationError::StructureMismatch {
					id: marker.to_string(),
					expected: child_view.tag_name().to_string(),
					actual: "nothing".to_string(),
				});
				let fresh = runtime.build_element(child_view)?;
				host.append_child(node, &fresh)?;
			}
		}
	}
	if actual.len() > expected.len() {
		tracing::debug!(
			marker,
			extra = actual.len() - expected.len(),
			"markup has extra elements; left untouched"
		);
	}
	Ok(())
}

/// Binds collected handlers, reusing the callback id the server wrote into
/// the markup when it is free. When another id has to be used the wiring
/// attribute is rewritten so the markup never names a foreign closure.
fn wire<H: Host>(runtime: &BridgeRuntime<H>, wiring: Vec<Wiring>, report: &mut HydrationReport) {
	for Wiring {
		handle,
		event_type,
		handler,
		server_id,
	} in wiring
	{
		let callback = handler_callback(handler);
		let id = match server_id {
			Some(id) if !runtime.has_callback(&id) => {
				match runtime.register_callback_with_id(id.clone(), callback) {
					Ok(()) => id,
					Err(e) => {
						report
							.errors
							.push(HydrationError::EventAttachmentFailed(e.to_string()));
						continue;
					}
				}
			}
			Some(id) => {
				tracing::debug!(callback = %id, "server callback id already live; using a fresh id");
				let fresh = runtime.register_callback(callback);
				if let Err(e) = runtime.set_attribute(&handle, &event_attr(&event_type), fresh.as_str()) {
					report
						.errors
						.push(HydrationError::EventAttachmentFailed(e.to_string()));
				}
				fresh
			}
			None => runtime.register_callback(callback),
		};
		if let Err(e) = runtime.attach(&handle, &event_type, &id) {
			report.errors.push(HydrationError::EventAttachmentFailed(format!(
				"{} on {}: {}",
				event_type, handle, e
			)));
			runtime.release_callback(&id);
		}
	}
}

/// Replaces the children of an existing root with a fresh rendering of
/// `view`, keeping the root node and its handle.
fn remount_children<H: Host>(
	runtime: &BridgeRuntime<H>,
	root: &H::Node,
	view: &ElementView,
) -> BridgeResult<()> {
	let host = runtime.host();
	let root_handle = runtime.register_node(root);
	runtime.detach_all(&root_handle, Some(root));
	runtime.clear_node_children(root);
	for (name, value) in view.attrs() {
		host.set_attribute(root, name, value)?;
	}
	for child in view.child_views() {
		runtime.mount_view(root, child)?;
	}
	for (event_type, handler) in view.event_handlers() {
		let id = runtime.register_callback(handler_callback(Rc::clone(handler)));
		runtime.attach(&root_handle, event_type, &id)?;
	}
	Ok(())
}

fn recompose<H: Host>(runtime: &BridgeRuntime<H>, component: &MountedComponent) -> BridgeResult<()> {
	let root = runtime.resolve(&component.root)?;
	let view = (component.producer)(&component.scope)
		.into_root_element()
		.attr(MARKER_ATTR, component.marker_id.clone())
		.attr(COMPONENT_ATTR, component.kind.clone())
		.attr(HYDRATED_ATTR, "true");
	remount_children(runtime, &root, &view)?;
	tracing::debug!(marker = %component.marker_id, "component recomposed");
	Ok(())
}
