//! Server-side rendering.
//!
//! The renderer produces the markup, marker states and hydration payload
//! that [`crate::hydration::HydrationManager`] consumes on the client.

pub mod renderer;

pub use renderer::{RenderOutput, ServerRenderer, SsrOptions};
