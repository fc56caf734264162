//! Error types for the bridge runtime.
//!
//! Identity errors ([`BridgeError::HandleNotFound`], [`BridgeError::CallbackNotFound`])
//! are expected at the host boundary: the host may reference a resource the runtime
//! already forgot. They are returned as typed values so callers can log and no-op.

use thiserror::Error;

use crate::callback::CallbackId;
use crate::handle::Handle;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the host boundary itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
	/// A host operation failed.
	#[error("host operation '{operation}' failed: {reason}")]
	Operation {
		/// The operation that was attempted.
		operation: &'static str,
		/// The host-provided reason.
		reason: String,
	},

	/// A required host facility is not available (no window, no document).
	#[error("host facility unavailable: {0}")]
	Unavailable(String),
}

impl HostError {
	/// Creates an operation error.
	pub fn operation(operation: &'static str, reason: impl Into<String>) -> Self {
		Self::Operation {
			operation,
			reason: reason.into(),
		}
	}
}

/// Bridge runtime errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
	/// The handle is not (or no longer) registered.
	#[error("handle not found: {0}")]
	HandleNotFound(Handle),

	/// The handle is already bound to a different resource.
	#[error("handle already in use: {0}")]
	HandleConflict(Handle),

	/// The callback id is not (or no longer) registered.
	#[error("callback not found: {0}")]
	CallbackNotFound(CallbackId),

	/// The callback id is still live and must be released before re-use.
	#[error("callback id still registered: {0}")]
	CallbackConflict(CallbackId),

	/// The host boundary reported a failure.
	#[error(transparent)]
	Host(#[from] HostError),

	/// Serialized component state could not be decoded.
	#[error("failed to parse serialized state: {0}")]
	StateParse(String),

	/// The hydration payload could not be encoded or decoded.
	#[error("hydration payload error: {0}")]
	Payload(#[from] serde_json::Error),

	/// A recomposition pass failed.
	#[error("recomposition failed: {0}")]
	Recomposition(String),

	/// A server render pass failed.
	#[error("render failed: {0}")]
	Render(String),

	/// Invalid configuration.
	#[error("invalid configuration: {0}")]
	Config(String),
}

/// Errors that can occur during hydration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
	/// The hydration root element was not found.
	#[error("hydration root element not found: {0}")]
	RootNotFound(String),

	/// SSR state could not be parsed.
	#[error("failed to parse SSR state: {0}")]
	StateParseError(String),

	/// A hydration marker was not found.
	#[error("hydration marker not found: {0}")]
	MarkerNotFound(String),

	/// DOM structure doesn't match the expected structure.
	#[error("DOM structure mismatch at {id}: expected {expected}, found {actual}")]
	StructureMismatch {
		/// The hydration ID.
		id: String,
		/// Expected element.
		expected: String,
		/// Actual element.
		actual: String,
	},

	/// Event attachment failed.
	#[error("event attachment failed: {0}")]
	EventAttachmentFailed(String),
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_hydration_error_display() {
		let err = HydrationError::RootNotFound("#app".to_string());
		assert_eq!(err.to_string(), "hydration root element not found: #app");

		let err = HydrationError::StructureMismatch {
			id: "counter-0".to_string(),
			expected: "div".to_string(),
			actual: "span".to_string(),
		};
		assert!(err.to_string().contains("DOM structure mismatch"));
	}

	#[rstest]
	fn test_host_error_is_transparent_in_bridge_error() {
		// Arrange
		let err: BridgeError = HostError::operation("append_child", "detached parent").into();

		// Act
		let message = err.to_string();

		// Assert
		assert_eq!(
			message,
			"host operation 'append_child' failed: detached parent"
		);
	}

	#[rstest]
	fn test_identity_errors_name_the_id() {
		let err = BridgeError::HandleNotFound(Handle::from("rh-h-9"));
		assert!(err.to_string().contains("rh-h-9"));

		let err = BridgeError::CallbackNotFound(CallbackId::from("cb-3"));
		assert!(err.to_string().contains("cb-3"));
	}
}
