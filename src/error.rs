//! # Error Types
//!
//! Two kinds of error live here.
//!
//! [`Error`] is internal flow control for optimistic concurrency: reads run
//! without locks and validate at the end, and a failed validation or a lost
//! lock race unwinds the current attempt with [`Error::Unwind`] instead of
//! panicking. It never reaches callers of the public API.
//!
//! ```text
//! Operation starts
//!      │
//!      ▼
//! Take optimistic snapshot
//!      │
//!      ▼
//! Read data (may be inconsistent)
//!      │
//!      ▼
//! Validate reads ──────────► Err(Unwind) ───► back off, retry
//!      │
//!      ▼ (Ok)
//! Perform side effects
//! ```
//!
//! [`ConfigError`] is public and is returned when a [`crate::Config`] is
//! rejected at construction time.

use thiserror::Error;

/// Errors that occur during tree operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	/// Optimistic validation failed, or a lock could not be taken without
	/// waiting.
	///
	/// Everything read during the attempt must be discarded and the
	/// operation restarted with fresh snapshots.
	#[error("optimistic validation failed")]
	Unwind,
}

/// A Result type alias using the internal [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// A configuration value outside the supported range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
	#[error("bucket capacity must be between 1 and 64 entries, got {0}")]
	BucketCapacity(usize),

	#[error("a leaf needs at least one bucket, got {0}")]
	LeafBucketCount(usize),

	#[error("inner fanout must be at least 3, got {0}")]
	InnerFanout(usize),

	#[error("one or two hash functions are supported, got {0}")]
	HashFunctionCount(usize),

	/// Probing must visit at least one slot and no more slots than a leaf has
	/// buckets.
	#[error("probe slots must be between 1 and the leaf bucket count ({buckets}), got {slots}")]
	ProbeSlots {
		slots: usize,
		buckets: usize,
	},

	#[error("sampling policy must draw at least one sample, got {0}")]
	SampleSize(usize),
}
