//! Synchronization primitives with loom support.
//!
//! Under normal compilation, re-exports from std. Under `cfg(loom)`, uses
//! loom's equivalents so the latch protocol can be model checked.
//!
//! # Usage
//!
//! Instead of importing directly from `std::sync::atomic`, import from this
//! module:
//!
//! ```ignore
//! use crate::sync::{AtomicU64, Ordering, UnsafeCell};
//! ```

// Some items are only used under loom cfg
#![allow(unused)]

// ===========================================================================
// Atomic Primitives
// ===========================================================================

#[cfg(not(loom))]
pub use std::sync::atomic::{fence, AtomicU64, Ordering};

#[cfg(loom)]
pub use loom::sync::atomic::{fence, AtomicU64, Ordering};

// ===========================================================================
// Thread Hints
// ===========================================================================

#[cfg(not(loom))]
pub use std::hint::spin_loop;
#[cfg(not(loom))]
pub use std::thread::yield_now;

/// Under loom a busy spin never lets the model make progress, so every
/// spin is turned into a scheduler yield.
#[cfg(loom)]
pub fn spin_loop() {
	loom::thread::yield_now();
}

#[cfg(loom)]
pub use loom::thread::yield_now;

// ===========================================================================
// UnsafeCell
// ===========================================================================

// loom's UnsafeCell::get() returns a tracked ConstPtr<T> instead of *const T,
// so it is wrapped to expose std's API.

#[cfg(not(loom))]
pub use std::cell::UnsafeCell;

#[cfg(loom)]
mod loom_unsafe_cell {
	use loom::cell::UnsafeCell as LoomUnsafeCell;

	/// A wrapper around loom's UnsafeCell that provides std's API.
	pub struct UnsafeCell<T>(LoomUnsafeCell<T>);

	impl<T> UnsafeCell<T> {
		pub fn new(value: T) -> Self {
			UnsafeCell(LoomUnsafeCell::new(value))
		}

		/// Gets a raw pointer to the underlying data.
		///
		/// The caller must ensure proper synchronization.
		pub fn get(&self) -> *mut T {
			// SAFETY: the tracked pointer is only converted, never dereferenced here.
			unsafe { self.0.get().deref() as *const T as *mut T }
		}

		pub fn into_inner(self) -> T {
			self.0.into_inner()
		}
	}
}

#[cfg(loom)]
pub use loom_unsafe_cell::UnsafeCell;
