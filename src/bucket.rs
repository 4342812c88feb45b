//! Leaf buckets.
//!
//! A bucket is a fixed array of `E` slots, each holding a key, its value and a
//! one-byte fingerprint, plus an occupancy mask and a migration state. Slot
//! storage is allocated once at construction and never resized, so optimistic
//! readers can never observe a reallocation.
//!
//! The migration state records whether part of the bucket's logical content
//! still lives in the bucket at the same index of a neighbouring leaf:
//!
//! ```text
//!   leaf X (high = s)            leaf X' (split off X)
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ bucket i: LinkedRight│ ──► │ bucket i: LinkedLeft │
//! │  keys ≤ s  (ours)    │     │  (empty)             │
//! │  keys > s  (X''s)    │     │                      │
//! └──────────────────────┘     └──────────────────────┘
//! ```
//!
//! A `LinkedLeft` bucket is always physically empty; a `LinkedRight` bucket
//! holds entries above its leaf's high key, waiting to be pushed to the right.

use smallvec::{smallvec, SmallVec};

use crate::fingerprint::match_mask;
use crate::key::{IndexKey, IndexValue};

/// Migration state of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
	/// Holds exactly the entries that hash here and fall in the leaf's range.
	Stable,
	/// Content still sits in the left sibling's bucket at the same index.
	LinkedLeft,
	/// Holds entries that belong to the right sibling's bucket at the same
	/// index.
	LinkedRight,
}

pub(crate) struct Bucket<K, V> {
	state: BucketState,
	occupied: u64,
	/// Never spills: a bucket has at most 64 slots.
	fingerprints: SmallVec<[u8; 64]>,
	keys: Box<[K]>,
	values: Box<[V]>,
}

impl<K: IndexKey, V: IndexValue> Bucket<K, V> {
	pub(crate) fn new(capacity: usize, state: BucketState) -> Self {
		debug_assert!(capacity > 0 && capacity <= 64);
		Bucket {
			state,
			occupied: 0,
			fingerprints: smallvec![0; capacity],
			keys: vec![K::ZERO; capacity].into_boxed_slice(),
			values: vec![V::default(); capacity].into_boxed_slice(),
		}
	}

	#[inline]
	pub(crate) fn state(&self) -> BucketState {
		self.state
	}

	#[inline]
	pub(crate) fn set_state(&mut self, state: BucketState) {
		self.state = state;
	}

	#[inline]
	pub(crate) fn capacity(&self) -> usize {
		self.keys.len()
	}

	#[inline]
	pub(crate) fn len(&self) -> usize {
		self.occupied.count_ones() as usize
	}

	#[cfg(any(test, feature = "test-utils"))]
	pub(crate) fn is_empty(&self) -> bool {
		self.occupied == 0
	}

	#[inline]
	fn slot_mask(&self) -> u64 {
		match self.capacity() {
			64 => u64::MAX,
			n => (1u64 << n) - 1,
		}
	}

	#[cfg(test)]
	pub(crate) fn has_room(&self) -> bool {
		self.occupied != self.slot_mask()
	}

	/// Slots in use, lowest first.
	#[inline]
	fn slots(&self) -> impl Iterator<Item = usize> {
		let mut mask = self.occupied;
		std::iter::from_fn(move || {
			if mask == 0 {
				return None;
			}
			let slot = mask.trailing_zeros() as usize;
			mask &= mask - 1;
			Some(slot)
		})
	}

	/// Finds the slot holding `key`, checking only slots whose fingerprint
	/// matches.
	pub(crate) fn position(&self, key: &K, fp: u8) -> Option<usize> {
		let mut mask = match_mask(&self.fingerprints, fp) & self.occupied;
		while mask != 0 {
			let slot = mask.trailing_zeros() as usize;
			if self.keys.get(slot) == Some(key) {
				return Some(slot);
			}
			mask &= mask - 1;
		}
		None
	}

	pub(crate) fn find(&self, key: &K, fp: u8) -> Option<V> {
		self.position(key, fp).and_then(|slot| self.values.get(slot).copied())
	}

	/// Stores an entry in the first free slot. Returns `false` if the bucket
	/// is full. The caller guarantees `key` is not already present.
	pub(crate) fn insert(&mut self, key: K, value: V, fp: u8) -> bool {
		let free = !self.occupied & self.slot_mask();
		if free == 0 {
			return false;
		}
		let slot = free.trailing_zeros() as usize;
		self.fingerprints[slot] = fp;
		self.keys[slot] = key;
		self.values[slot] = value;
		self.occupied |= 1 << slot;
		true
	}

	/// Replaces the value of `key` in place. Returns `false` if absent.
	pub(crate) fn update(&mut self, key: &K, value: V, fp: u8) -> bool {
		match self.position(key, fp) {
			Some(slot) => {
				self.values[slot] = value;
				true
			}
			None => false,
		}
	}

	/// Appends every entry with a key `>= key`.
	pub(crate) fn collect_at_or_above(&self, key: &K, out: &mut Vec<(K, V)>) {
		out.extend(
			self.slots().map(|slot| (self.keys[slot], self.values[slot])).filter(|(k, _)| k >= key),
		);
	}

	pub(crate) fn collect_all(&self, out: &mut Vec<(K, V)>) {
		out.extend(self.slots().map(|slot| (self.keys[slot], self.values[slot])));
	}

	/// Appends every key `<= bound`, or every key when unbounded.
	pub(crate) fn collect_keys_up_to(&self, bound: Option<&K>, out: &mut Vec<K>) {
		out.extend(
			self.slots().map(|slot| self.keys[slot]).filter(|k| bound.map_or(true, |b| k <= b)),
		);
	}

	/// Returns `true` if some key is above `bound`. Nothing is above an
	/// unbounded range.
	pub(crate) fn any_above(&self, bound: Option<&K>) -> bool {
		match bound {
			Some(bound) => self.slots().any(|slot| self.keys[slot] > *bound),
			None => false,
		}
	}

	/// Removes and returns every entry with a key above `bound`, fingerprints
	/// included.
	pub(crate) fn drain_above(&mut self, bound: &K) -> SmallVec<[(K, V, u8); 16]> {
		let moving: SmallVec<[usize; 16]> =
			self.slots().filter(|slot| self.keys[*slot] > *bound).collect();
		let mut drained = SmallVec::new();
		for slot in moving {
			drained.push((self.keys[slot], self.values[slot], self.fingerprints[slot]));
			self.occupied &= !(1 << slot);
		}
		drained
	}

	/// Completes the migration of one bucket pair.
	///
	/// `self` belongs to the left leaf, whose high key is `left_high`, and
	/// `right` to its right sibling. Every entry above `left_high` moves right,
	/// after which the left bucket is stable and the right bucket is stable
	/// unless it now holds entries above its own high key.
	///
	/// # Panics
	///
	/// If the right bucket cannot hold the moved entries. It is empty whenever
	/// it is `LinkedLeft`, so this indicates a corrupted bucket.
	pub(crate) fn migrate_into(
		&mut self,
		left_high: Option<&K>,
		right: &mut Bucket<K, V>,
		right_high: Option<&K>,
	) {
		if let Some(bound) = left_high {
			for (key, value, fp) in self.drain_above(bound) {
				assert!(right.insert(key, value, fp), "bucket overflow while migrating {key:?}");
			}
		}
		self.state = BucketState::Stable;
		right.state = if right.any_above(right_high) {
			BucketState::LinkedRight
		} else {
			BucketState::Stable
		};
	}
}
