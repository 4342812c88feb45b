//! The operations every concurrent index engine offers.
//!
//! Tests and benchmarks drive [`crate::BlinkHashTree`] and reference engines
//! through this trait, so one workload can run against each of them.

use crate::key::{IndexKey, IndexValue};
use crate::BlinkHashTree;

/// A thread-safe ordered map from fixed-width keys to small values.
pub trait ConcurrentIndex<K, V>: Send + Sync {
	/// Inserts or overwrites `key`. Returns `true` if the key was new.
	fn insert(&self, key: K, value: V) -> bool;

	/// Alias of [`insert`](Self::insert); duplicates always overwrite.
	fn upsert(&self, key: K, value: V) -> bool {
		self.insert(key, value)
	}

	fn find(&self, key: &K) -> Option<V>;

	/// Overwrites an existing key. Returns `false` if the key is absent.
	fn update(&self, key: K, value: V) -> bool;

	/// Values of up to `max` keys `>= start`, in key order.
	fn range_lookup(&self, start: &K, max: usize) -> Vec<V>;

	/// Number of levels, leaves included.
	fn height(&self) -> u32;

	/// Fraction of allocated entry slots in use.
	fn utilization(&self) -> f64;
}

impl<K: IndexKey, V: IndexValue> ConcurrentIndex<K, V> for BlinkHashTree<K, V> {
	fn insert(&self, key: K, value: V) -> bool {
		BlinkHashTree::insert(self, key, value)
	}

	fn find(&self, key: &K) -> Option<V> {
		BlinkHashTree::find(self, key)
	}

	fn update(&self, key: K, value: V) -> bool {
		BlinkHashTree::update(self, key, value)
	}

	fn range_lookup(&self, start: &K, max: usize) -> Vec<V> {
		BlinkHashTree::range_lookup(self, start, max)
	}

	fn height(&self) -> u32 {
		BlinkHashTree::height(self)
	}

	fn utilization(&self) -> f64 {
		BlinkHashTree::utilization(self)
	}
}
