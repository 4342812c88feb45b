//! Logging macros that cost nothing unless the `tracing` feature is on.
//!
//! With the feature enabled each macro forwards to the matching `tracing`
//! event macro; without it the invocation expands to nothing.
//!
//! ```bash
//! RUST_LOG=blinkhash=debug cargo test --features tracing --test concurrency
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level logging.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
	($($arg:tt)*) => {
		tracing::trace!($($arg)*)
	};
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
	($($arg:tt)*) => {};
}

/// Debug-level logging.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
	($($arg:tt)*) => {
		tracing::debug!($($arg)*)
	};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
	($($arg:tt)*) => {};
}

/// Warn-level logging.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
	($($arg:tt)*) => {
		tracing::warn!($($arg)*)
	};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
	($($arg:tt)*) => {};
}
