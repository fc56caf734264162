//! Client-side hydration of server-rendered markup.
//!
//! The server writes marker attributes, a state block and a payload block
//! (see [`markers`] and [`payload`]). On the client, [`HydrationManager`]
//! attaches registered components to that markup without recreating it.

pub mod manager;
pub mod markers;
pub mod payload;

pub use manager::{ComponentProducer, HydrationManager, HydrationReport};
pub use markers::{
	COMPONENT_ATTR, ComponentIdGenerator, EVENT_ATTR_PREFIX, HYDRATED_ATTR, MARKER_ATTR,
	MarkerState, PAYLOAD_SCRIPT_ID, STATE_ATTR, STATE_SCRIPT_ID, event_attr, state_script_tag,
};
pub use payload::HydrationPayload;
