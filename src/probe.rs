//! Candidate buckets of a key.
//!
//! A key may live in any of `probe_slots` consecutive buckets starting at the
//! home index of each hash function. The sequence is computed once per
//! operation and reused across retries, and it is identical for every leaf,
//! so a bucket index keeps its meaning when entries migrate between siblings.

use smallvec::SmallVec;

use crate::config::Config;
use crate::fingerprint::fingerprint;
use crate::key::IndexKey;

/// Seed offset between the hash functions.
const FAMILY_SEED_STEP: u64 = 0x9e37_79b9_7f4a_7c15;

pub(crate) struct Probe {
	fingerprint: u8,
	/// Distinct bucket indices in probe order.
	slots: SmallVec<[usize; 8]>,
}

impl Probe {
	pub(crate) fn new<K: IndexKey>(key: &K, config: &Config) -> Self {
		let buckets = config.leaf_bucket_count;
		let mut fp = 0;
		let mut slots = SmallVec::new();
		for family in 0..config.hash_function_count as u64 {
			let seed = config.hash_seed.wrapping_add(family.wrapping_mul(FAMILY_SEED_STEP));
			let hash = key.hash_with(config.hash, seed);
			if family == 0 {
				fp = fingerprint(hash);
			}
			let home = (hash % buckets as u64) as usize;
			for offset in 0..config.probe_slots {
				let slot = (home + offset) % buckets;
				if !slots.contains(&slot) {
					slots.push(slot);
				}
			}
		}
		Probe {
			fingerprint: fp,
			slots,
		}
	}

	#[inline]
	pub(crate) fn fingerprint(&self) -> u8 {
		self.fingerprint
	}

	#[inline]
	pub(crate) fn slots(&self) -> &[usize] {
		&self.slots
	}

	#[cfg(any(test, feature = "test-utils"))]
	pub(crate) fn contains(&self, slot: usize) -> bool {
		self.slots.contains(&slot)
	}

	/// The candidate indices in ascending order, the order in which their
	/// locks are taken.
	pub(crate) fn lock_order(&self) -> SmallVec<[usize; 8]> {
		let mut order = self.slots.clone();
		order.sort_unstable();
		order
	}
}
