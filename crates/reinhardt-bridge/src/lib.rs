//! Reinhardt Bridge - Handle-indexed host bridge and hydration runtime
//!
//! The runtime side of Reinhardt pages: it keeps host-owned objects (DOM
//! nodes, paint tokens) behind stable string handles, dispatches native
//! events to registered closures, coalesces recomposition into one paint
//! callback, and attaches client components to server-rendered markup
//! without recreating it.
//!
//! ## Architecture
//!
//! - [`handle`]: handle table mapping handles to host resources
//! - [`callback`]: callback registry with server render scopes
//! - [`events`]: native listener wiring and event records
//! - [`scheduler`]: recomposition scheduler (one outstanding frame)
//! - [`host`]: host boundary, with an in-memory host and a browser host
//! - [`view`] and [`state`]: the view tree and component state cells
//! - [`hydration`]: markers, payload and the hydration manager
//! - [`ssr`]: the server renderer producing hydratable markup
//!
//! ## Example
//!
//! ```ignore
//! use reinhardt_bridge::prelude::*;
//! use serde_json::json;
//!
//! fn counter(scope: &ComponentScope) -> View {
//!     let count = scope.use_state("count", 0i64);
//!     View::element("div")
//!         .child(View::element("span").child(count.get().to_string()))
//!         .child(View::element("button").child("+").on("click", move |_| {
//!             count.update(|n| *n += 1);
//!         }))
//!         .into_view()
//! }
//!
//! // Server
//! let mut renderer = ServerRenderer::new();
//! let view = renderer.render_component("counter", json!({"count": 5}), counter);
//! let html = renderer.render_document(&view)?;
//!
//! // Client
//! let runtime = BridgeRuntime::with_host(BrowserHost::new()?);
//! let manager = HydrationManager::client(runtime);
//! manager.load_from_document();
//! manager.register_component("counter-0", "counter", json!({"count": 0}), counter);
//! let report = manager.hydrate_all();
//! ```

#![warn(missing_docs)]

pub mod callback;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod host;
pub mod hydration;
pub mod runtime;
pub mod scheduler;
pub mod ssr;
pub mod state;
pub mod view;

pub use callback::{CallbackContext, CallbackFn, CallbackId, CallbackRegistry};
pub use config::{BridgeOptions, PAYLOAD_VERSION};
pub use error::{BridgeError, BridgeResult, HostError, HydrationError};
pub use events::EventRecord;
pub use handle::{Handle, HandleTable, Identity};
pub use host::memory::{MemoryEvent, MemoryHost, MemoryNode};
pub use host::{HANDLE_ATTR, Host, HostEvent};
pub use hydration::{HydrationManager, HydrationPayload, HydrationReport, MarkerState};
pub use runtime::{BridgeRuntime, ErrorReporter};
pub use scheduler::RecompositionWork;
pub use ssr::{RenderOutput, ServerRenderer, SsrOptions};
pub use state::{ComponentScope, StateCell};
pub use view::{ElementView, IntoView, View, ViewEventHandler};

#[cfg(target_arch = "wasm32")]
pub use host::browser::BrowserHost;

/// Commonly used items.
pub mod prelude {
	pub use crate::callback::{CallbackContext, CallbackId};
	pub use crate::config::BridgeOptions;
	pub use crate::error::{BridgeError, BridgeResult, HydrationError};
	pub use crate::events::EventRecord;
	pub use crate::handle::Handle;
	pub use crate::host::Host;
	pub use crate::host::memory::MemoryHost;
	pub use crate::hydration::{HydrationManager, HydrationReport};
	pub use crate::runtime::BridgeRuntime;
	pub use crate::ssr::{ServerRenderer, SsrOptions};
	pub use crate::state::{ComponentScope, StateCell};
	pub use crate::view::{ElementView, IntoView, View};

	#[cfg(target_arch = "wasm32")]
	pub use crate::host::browser::BrowserHost;
}
