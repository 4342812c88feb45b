//! Tree configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

/// A seeded 64-bit hash over a key's bytes.
///
/// Must be deterministic and approximately uniform. The tree derives every
/// bucket index and fingerprint from it, so tests can substitute a
/// predictable function to force specific bucket layouts.
pub type HashFn = fn(&[u8], u64) -> u64;

/// The default hash: 64-bit xxh3.
pub fn default_hash(bytes: &[u8], seed: u64) -> u64 {
	twox_hash::xxh3::hash64_with_seed(bytes, seed)
}

/// Widest bucket supported; occupancy is tracked in a 64-bit mask.
pub const MAX_BUCKET_CAPACITY: usize = 64;

/// How the split key of a full leaf is chosen.
///
/// The split key is the median of the chosen keys, found by a quickselect
/// with random pivots. Sampling trades split balance for a shorter time
/// holding the whole leaf locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SamplingPolicy {
	/// Every live key in the leaf.
	#[default]
	Full,
	/// A uniform random sample of this many live keys.
	EntrySampled {
		samples: usize,
	},
	/// Every live key from this many randomly chosen buckets.
	BucketSampled {
		buckets: usize,
	},
}

/// Shape and behaviour of a [`crate::BlinkHashTree`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
	/// Entries per bucket (`E`), at most [`MAX_BUCKET_CAPACITY`].
	pub bucket_capacity: usize,
	/// Buckets per leaf (`B`).
	pub leaf_bucket_count: usize,
	/// Maximum separators per inner node (`C`).
	pub inner_fanout: usize,
	/// Independent hash functions used to pick candidate buckets (1 or 2).
	pub hash_function_count: usize,
	/// Consecutive buckets probed per hash function.
	pub probe_slots: usize,
	/// How split keys are chosen.
	pub sampling_policy: SamplingPolicy,
	/// Seed of the first hash function; the second derives its own.
	pub hash_seed: u64,
	/// Retry behaviour under contention.
	pub backoff: BackoffPolicy,
	/// Hash function over key bytes. Not serialized.
	#[cfg_attr(feature = "serde", serde(skip, default = "default_hash_fn"))]
	pub hash: HashFn,
}

#[cfg(feature = "serde")]
fn default_hash_fn() -> HashFn {
	default_hash
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bucket_capacity: 32,
			leaf_bucket_count: 64,
			inner_fanout: 128,
			hash_function_count: 2,
			probe_slots: 4,
			sampling_policy: SamplingPolicy::Full,
			hash_seed: 0xc70f_6907,
			backoff: BackoffPolicy::default(),
			hash: default_hash,
		}
	}
}

impl Config {
	pub fn with_bucket_capacity(mut self, entries: usize) -> Self {
		self.bucket_capacity = entries;
		self
	}

	pub fn with_leaf_bucket_count(mut self, buckets: usize) -> Self {
		self.leaf_bucket_count = buckets;
		self
	}

	pub fn with_inner_fanout(mut self, fanout: usize) -> Self {
		self.inner_fanout = fanout;
		self
	}

	pub fn with_hash_function_count(mut self, count: usize) -> Self {
		self.hash_function_count = count;
		self
	}

	pub fn with_probe_slots(mut self, slots: usize) -> Self {
		self.probe_slots = slots;
		self
	}

	pub fn with_sampling_policy(mut self, policy: SamplingPolicy) -> Self {
		self.sampling_policy = policy;
		self
	}

	pub fn with_hash(mut self, hash: HashFn, seed: u64) -> Self {
		self.hash = hash;
		self.hash_seed = seed;
		self
	}

	pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
		self.backoff = backoff;
		self
	}

	/// Total entry slots in one leaf.
	pub fn leaf_capacity(&self) -> usize {
		self.bucket_capacity * self.leaf_bucket_count
	}

	/// Checks every field against the range the tree supports.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.bucket_capacity == 0 || self.bucket_capacity > MAX_BUCKET_CAPACITY {
			return Err(ConfigError::BucketCapacity(self.bucket_capacity));
		}
		if self.leaf_bucket_count == 0 {
			return Err(ConfigError::LeafBucketCount(self.leaf_bucket_count));
		}
		if self.inner_fanout < 3 {
			return Err(ConfigError::InnerFanout(self.inner_fanout));
		}
		if !(1..=2).contains(&self.hash_function_count) {
			return Err(ConfigError::HashFunctionCount(self.hash_function_count));
		}
		if self.probe_slots == 0 || self.probe_slots > self.leaf_bucket_count {
			return Err(ConfigError::ProbeSlots {
				slots: self.probe_slots,
				buckets: self.leaf_bucket_count,
			});
		}
		match self.sampling_policy {
			SamplingPolicy::EntrySampled {
				samples: 0,
			} => Err(ConfigError::SampleSize(0)),
			SamplingPolicy::BucketSampled {
				buckets: 0,
			} => Err(ConfigError::SampleSize(0)),
			_ => Ok(()),
		}
	}
}
