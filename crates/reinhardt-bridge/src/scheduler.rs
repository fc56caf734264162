//! Recomposition Scheduler
//!
//! One outstanding paint-callback token at a time:
//!
//! ```text
//! Idle --schedule--> Scheduled --paint callback--> Idle
//!                      |    ^
//!                      +----+ schedule again: cancel old frame, release its
//!                             callback, request a new frame (last writer wins)
//! ```
//!
//! The token is consumed before the work runs, so a failing (or, on native
//! targets, panicking) work item never wedges the scheduler. Failures go to
//! the runtime's error reporter and are never re-thrown into the host.

use std::cell::RefCell;
use std::rc::Rc;

use crate::callback::{CallbackContext, CallbackId};
use crate::error::{BridgeError, BridgeResult};
use crate::host::Host;
use crate::runtime::BridgeRuntime;

/// A unit of recomposition work.
pub type RecompositionWork = Box<dyn FnOnce() -> anyhow::Result<()> + 'static>;

pub(crate) enum FrameState<F> {
	Idle,
	Scheduled {
		frame: F,
		callback: CallbackId,
		generation: u64,
	},
}

impl<H: Host> BridgeRuntime<H> {
	/// Requests `work` to run once on the next host paint callback.
	///
	/// Any previously scheduled work that has not run yet is discarded.
	pub fn schedule_recomposition<W>(&self, work: W) -> BridgeResult<()>
	where
		W: FnOnce() -> anyhow::Result<()> + 'static,
	{
		if self.cancel_recomposition() {
			tracing::debug!("recomposition coalesced into a new frame");
		}

		let generation = self.inner.frame_generation.get() + 1;
		self.inner.frame_generation.set(generation);

		let slot: RefCell<Option<RecompositionWork>> = RefCell::new(Some(Box::new(work)));
		let weak = Rc::downgrade(&self.inner);
		let callback = self.register_callback(move |_context| {
			let Some(work) = slot.borrow_mut().take() else {
				return;
			};
			if let Some(inner) = weak.upgrade() {
				BridgeRuntime::from_inner(inner).run_work(work);
			}
		});

		let weak = Rc::downgrade(&self.inner);
		let requested = self.inner.host.request_animation_frame(Box::new(move |timestamp: f64| {
			if let Some(inner) = weak.upgrade() {
				BridgeRuntime::from_inner(inner).on_frame(generation, timestamp);
			}
		}));
		let frame = match requested {
			Ok(frame) => frame,
			Err(e) => {
				self.release_callback(&callback);
				return Err(e.into());
			}
		};

		*self.inner.frame.borrow_mut() = FrameState::Scheduled {
			frame,
			callback,
			generation,
		};
		tracing::debug!(generation, "recomposition scheduled");
		Ok(())
	}

	/// Cancels scheduled work. Returns whether anything was pending.
	pub fn cancel_recomposition(&self) -> bool {
		let previous = std::mem::replace(&mut *self.inner.frame.borrow_mut(), FrameState::Idle);
		match previous {
			FrameState::Idle => false,
			FrameState::Scheduled {
				frame, callback, ..
			} => {
				self.inner.host.cancel_animation_frame(frame);
				self.release_callback(&callback);
				true
			}
		}
	}

	/// Returns true while a frame token is outstanding.
	pub fn is_recomposition_scheduled(&self) -> bool {
		matches!(*self.inner.frame.borrow(), FrameState::Scheduled { .. })
	}

	/// Number of paint callbacks that ran scheduled work.
	pub fn frames_executed(&self) -> u64 {
		self.inner.frames_executed.get()
	}

	fn on_frame(&self, generation: u64, timestamp: f64) {
		let callback = {
			let mut state = self.inner.frame.borrow_mut();
			match std::mem::replace(&mut *state, FrameState::Idle) {
				FrameState::Scheduled {
					callback,
					generation: current,
					..
				} if current == generation => callback,
				other => {
					*state = other;
					tracing::debug!(generation, "stale paint callback ignored");
					return;
				}
			}
		};

		self.inner
			.frames_executed
			.set(self.inner.frames_executed.get() + 1);
		self.execute_callback(&callback, &CallbackContext::Frame { timestamp });
		self.release_callback(&callback);
	}

	fn run_work(&self, work: RecompositionWork) {
		#[cfg(not(target_arch = "wasm32"))]
		let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work))
			.unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))));
		#[cfg(target_arch = "wasm32")]
		let outcome = work();

		if let Err(err) = outcome {
			tracing::error!(error = %err, "recomposition work failed");
			self.report_error(&BridgeError::Recomposition(format!("{:#}", err)));
		}
	}
}

#[cfg(not(target_arch = "wasm32"))]
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		format!("panicked: {}", message)
	} else if let Some(message) = panic.downcast_ref::<String>() {
		format!("panicked: {}", message)
	} else {
		"panicked".to_string()
	}
}
