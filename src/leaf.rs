//! Hashed leaf nodes.
//!
//! A leaf is a fixed array of buckets plus the B-link metadata: a high key,
//! the right sibling and a back reference to the left sibling. Entries are
//! placed by hashing rather than by key order, so point operations touch only
//! the key's candidate buckets and never the leaf latch itself. The leaf latch
//! is write-locked only by a split; every other operation reads it
//! optimistically and validates its snapshot once it holds what it needs.
//!
//! # Splits
//!
//! Splitting a hashed leaf would normally mean rehashing every entry. Here a
//! split only picks a separator and tags buckets:
//!
//! ```text
//! before:  X [ b0 b1 b2 b3 ]  high = h
//!
//! after:   X [ b0 b1 b2 b3 ]  high = s      X' [ b0 b1 b2 b3 ]  high = h
//!               R  S  R  R                       L  S  L  L
//!
//!   R = LinkedRight, L = LinkedLeft, S = Stable (nothing above s)
//! ```
//!
//! Entries above `s` stay where they are until a bucket pair is touched, at
//! which point [`crate::stabilize`] moves them across.

use std::ops::{Bound, RangeBounds};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use rand::prelude::*;
use std::sync::atomic::Ordering;

use crate::bucket::{Bucket, BucketState};
use crate::config::{Config, SamplingPolicy};
use crate::error;
use crate::key::{IndexKey, IndexValue};
use crate::latch::{ExclusiveGuard, OptimisticGuard, VersionLatch};
use crate::probe::Probe;
use crate::stabilize::stabilize;
use crate::{Node, NodeLatch, Swip};

/// Result of an insert attempt on a single leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
	/// The key was added.
	Inserted,
	/// The key existed and its value was overwritten.
	Replaced,
	/// A bucket lock was contended or the leaf changed underneath.
	Retry,
	/// Every candidate bucket is full.
	SplitNeeded,
}

/// Result of [`LeafNode::split`].
pub(crate) enum LeafSplit<'e, K, V> {
	/// The leaf changed after the caller's snapshot.
	Stale,
	/// With the whole leaf locked the entry fit after all.
	Absorbed {
		replaced: bool,
	},
	Split {
		/// New high key of the split leaf, and separator for the parent.
		split_key: K,
		right: Shared<'e, NodeLatch<K, V>>,
		/// Whether the triggering entry was stored during the split.
		placed: bool,
	},
}

pub(crate) struct LeafNode<K, V> {
	pub(crate) high_key: Option<K>,
	pub(crate) sibling: Swip<K, V>,
	pub(crate) left_sibling: Swip<K, V>,
	pub(crate) buckets: Box<[VersionLatch<Bucket<K, V>>]>,
}

impl<K: IndexKey, V: IndexValue> LeafNode<K, V> {
	/// An empty, unlinked leaf covering the whole key space.
	pub(crate) fn new(config: &Config) -> Self {
		Self::with_states(config, std::iter::repeat(BucketState::Stable))
	}

	fn with_states(config: &Config, states: impl Iterator<Item = BucketState>) -> Self {
		LeafNode {
			high_key: None,
			sibling: Atomic::null(),
			left_sibling: Atomic::null(),
			buckets: states
				.take(config.leaf_bucket_count)
				.map(|state| VersionLatch::new(Bucket::new(config.bucket_capacity, state)))
				.collect(),
		}
	}

	/// Returns `true` if `key` belongs to a leaf further right.
	#[inline]
	pub(crate) fn is_left_of(&self, key: &K) -> bool {
		self.high_key.as_ref().is_some_and(|high| high < key)
	}

	/// Takes an optimistic snapshot of bucket `idx`, stabilizing it first if
	/// part of its content still sits in a sibling.
	fn read_stable<'n>(
		&'n self,
		me: &NodeLatch<K, V>,
		idx: usize,
		eg: &epoch::Guard,
	) -> error::Result<OptimisticGuard<'n, Bucket<K, V>>> {
		let latch = self.buckets.get(idx).ok_or(error::Error::Unwind)?;
		let bucket = latch.optimistic()?;
		if bucket.state() == BucketState::Stable {
			return Ok(bucket);
		}
		bucket.recheck()?;
		stabilize(me, idx, eg)?;
		let bucket = latch.optimistic()?;
		if bucket.state() != BucketState::Stable {
			return Err(error::Error::Unwind);
		}
		Ok(bucket)
	}

	// -----------------------------------------------------------------------
	// Point Operations
	// -----------------------------------------------------------------------

	/// Looks `key` up in its candidate buckets.
	pub(crate) fn find(
		node: &OptimisticGuard<'_, Node<K, V>>,
		key: &K,
		probe: &Probe,
		eg: &epoch::Guard,
	) -> error::Result<Option<V>> {
		let me = node.latch();
		let leaf = node.as_leaf();
		for &idx in probe.slots() {
			let bucket = leaf.read_stable(me, idx, eg)?;
			let found = bucket.find(key, probe.fingerprint());
			bucket.recheck()?;
			if found.is_some() {
				node.recheck()?;
				return Ok(found);
			}
		}
		node.recheck()?;
		Ok(None)
	}

	/// Overwrites the value of an existing key. Returns `false` if absent.
	pub(crate) fn update(
		node: &OptimisticGuard<'_, Node<K, V>>,
		key: &K,
		value: V,
		probe: &Probe,
		eg: &epoch::Guard,
	) -> error::Result<bool> {
		let me = node.latch();
		let leaf = node.as_leaf();
		let fp = probe.fingerprint();
		for &idx in probe.slots() {
			let bucket = leaf.read_stable(me, idx, eg)?;
			match bucket.position(key, fp) {
				Some(_) => {
					// the upgrade fails if the bucket changed since the lookup
					let mut bucket = bucket.to_exclusive()?;
					node.recheck()?;
					return Ok(bucket.update(key, value, fp));
				}
				None => bucket.recheck()?,
			}
		}
		node.recheck()?;
		Ok(false)
	}

	/// Inserts or overwrites `key`, locking only its candidate buckets.
	///
	/// All candidates are locked before anything is written so that two
	/// concurrent inserts of one key can never store it twice.
	pub(crate) fn insert(
		node: &OptimisticGuard<'_, Node<K, V>>,
		key: K,
		value: V,
		probe: &Probe,
		eg: &epoch::Guard,
	) -> InsertOutcome {
		let me = node.latch();
		let leaf = node.as_leaf();
		for &idx in probe.slots() {
			if leaf.read_stable(me, idx, eg).is_err() {
				return InsertOutcome::Retry;
			}
		}

		let mut locked: smallvec::SmallVec<[(usize, ExclusiveGuard<'_, Bucket<K, V>>); 8]> =
			smallvec::SmallVec::new();
		for idx in probe.lock_order() {
			match leaf.buckets[idx].try_exclusive() {
				Some(guard) => locked.push((idx, guard)),
				None => return InsertOutcome::Retry,
			}
		}
		if node.recheck().is_err() || locked.iter().any(|(_, b)| b.state() != BucketState::Stable)
		{
			return InsertOutcome::Retry;
		}

		let fp = probe.fingerprint();
		if locked.iter_mut().any(|(_, bucket)| bucket.update(&key, value, fp)) {
			return InsertOutcome::Replaced;
		}
		for &idx in probe.slots() {
			if let Some((_, bucket)) = locked.iter_mut().find(|(i, _)| *i == idx) {
				if bucket.insert(key, value, fp) {
					return InsertOutcome::Inserted;
				}
			}
		}
		InsertOutcome::SplitNeeded
	}

	// -----------------------------------------------------------------------
	// Range Scan
	// -----------------------------------------------------------------------

	/// Appends this leaf's entries that lie above `lower`, in key order, until
	/// `out` holds `limit` entries. Returns the new length of `out`.
	///
	/// Every bucket is stabilized first, so the scan sees exactly the leaf's
	/// logical content. Nothing is appended unless the whole leaf validated.
	pub(crate) fn range_lookup(
		node: &OptimisticGuard<'_, Node<K, V>>,
		lower: Bound<K>,
		limit: usize,
		out: &mut Vec<(K, V)>,
		eg: &epoch::Guard,
	) -> error::Result<usize> {
		let me = node.latch();
		let leaf = node.as_leaf();
		let mut batch = Vec::new();
		for idx in 0..leaf.buckets.len() {
			let bucket = leaf.read_stable(me, idx, eg)?;
			match lower {
				Bound::Included(ref start) => bucket.collect_at_or_above(start, &mut batch),
				_ => bucket.collect_all(&mut batch),
			}
			bucket.recheck()?;
		}
		let high = leaf.high_key;
		node.recheck()?;

		batch.retain(|(k, _)| {
			(lower, Bound::Unbounded).contains(k) && high.as_ref().map_or(true, |h| k <= h)
		});
		batch.sort_unstable_by(|a, b| a.0.cmp(&b.0));
		let room = limit.saturating_sub(out.len());
		out.extend(batch.into_iter().take(room));
		Ok(out.len())
	}

	// -----------------------------------------------------------------------
	// Split
	// -----------------------------------------------------------------------

	/// Splits a full leaf, placing the triggering entry if possible.
	///
	/// `node` must be the snapshot under which the insert found the key's
	/// candidate buckets full. The leaf latch and then every bucket latch are
	/// locked; no entry is moved except in the triggering key's candidate
	/// buckets, which are settled eagerly so the entry has somewhere to go.
	pub(crate) fn split<'e>(
		node: OptimisticGuard<'e, Node<K, V>>,
		key: K,
		value: V,
		probe: &Probe,
		config: &Config,
		eg: &'e epoch::Guard,
	) -> LeafSplit<'e, K, V> {
		let me: &'e NodeLatch<K, V> = node.latch();
		let mut guard = match node.to_exclusive() {
			Ok(guard) => guard,
			Err(_) => return LeafSplit::Stale,
		};
		// SAFETY: the leaf latch is held; the bucket array itself never changes
		let leaf = unsafe { me.peek() }.as_leaf();
		let mut buckets: Vec<ExclusiveGuard<'e, Bucket<K, V>>> =
			leaf.buckets.iter().map(|bucket| bucket.exclusive_with(config.backoff)).collect();

		let fp = probe.fingerprint();
		if probe.slots().iter().any(|&idx| buckets[idx].state() != BucketState::Stable) {
			return LeafSplit::Stale;
		}
		if probe.slots().iter().any(|&idx| buckets[idx].update(&key, value, fp)) {
			return LeafSplit::Absorbed {
				replaced: true,
			};
		}
		if probe.slots().iter().any(|&idx| buckets[idx].insert(key, value, fp)) {
			return LeafSplit::Absorbed {
				replaced: false,
			};
		}

		let old_high = leaf.high_key;
		let split_key = choose_split_key(&buckets, old_high.as_ref(), key, config.sampling_policy);

		let states: Vec<BucketState> = buckets
			.iter_mut()
			.map(|bucket| match bucket.state() {
				BucketState::Stable if bucket.any_above(Some(&split_key)) => {
					bucket.set_state(BucketState::LinkedRight);
					BucketState::LinkedLeft
				}
				BucketState::Stable => BucketState::Stable,
				BucketState::LinkedLeft | BucketState::LinkedRight => BucketState::LinkedLeft,
			})
			.collect();
		let mut right = LeafNode::with_states(config, states.into_iter());
		right.high_key = old_high;
		right.sibling = Atomic::from(leaf.sibling.load(Ordering::Acquire, eg));
		right.left_sibling = Atomic::from(me as *const NodeLatch<K, V>);

		let mut placed = false;
		for &idx in probe.slots() {
			let left_bucket = &mut *buckets[idx];
			let right_bucket = right.buckets[idx].as_mut();
			if left_bucket.state() == BucketState::LinkedRight
				&& right_bucket.state() == BucketState::LinkedLeft
			{
				left_bucket.migrate_into(Some(&split_key), right_bucket, old_high.as_ref());
			}
			let target = if key > split_key {
				right_bucket
			} else {
				left_bucket
			};
			if target.state() == BucketState::Stable && target.insert(key, value, fp) {
				placed = true;
				break;
			}
		}

		let right = Owned::new(VersionLatch::new(Node::Leaf(right))).into_shared(eg);
		let old_sibling = leaf.sibling.load(Ordering::Acquire, eg);
		if !old_sibling.is_null() {
			// SAFETY: leaves are never freed while the tree is alive
			let old_sibling = unsafe { old_sibling.deref().peek() }.as_leaf();
			old_sibling.left_sibling.store(right, Ordering::Release);
		}
		leaf.sibling.store(right, Ordering::Release);
		guard.as_leaf_mut().high_key = Some(split_key);

		debug_log!(split_key = ?split_key, placed, "leaf split");
		drop(buckets);
		drop(guard);
		LeafSplit::Split {
			split_key,
			right,
			placed,
		}
	}

	/// Number of entries physically stored, whatever their bucket state.
	#[cfg(test)]
	fn stored_entries(&self) -> usize {
		// SAFETY: only called on a leaf no other thread can reach
		self.buckets.iter().map(|b| unsafe { b.peek() }.len()).sum()
	}
}

// ---------------------------------------------------------------------------
// Split Key Selection
// ---------------------------------------------------------------------------

/// Picks the separator for a full leaf: the median of the live keys (or of a
/// sample of them) together with the key that triggered the split.
///
/// The median sits at index `(n - 1) / 2`, so at least one chosen key lies
/// above it and both halves of the split are non-empty.
fn choose_split_key<K: IndexKey, V: IndexValue>(
	buckets: &[ExclusiveGuard<'_, Bucket<K, V>>],
	high: Option<&K>,
	trigger: K,
	policy: SamplingPolicy,
) -> K {
	let mut rng = rand::rng();
	let mut keys = Vec::new();
	match policy {
		SamplingPolicy::Full => {
			for bucket in buckets {
				bucket.collect_keys_up_to(high, &mut keys);
			}
		}
		SamplingPolicy::EntrySampled {
			samples,
		} => {
			for bucket in buckets {
				bucket.collect_keys_up_to(high, &mut keys);
			}
			if keys.len() > samples {
				let (picked, _) = keys.partial_shuffle(&mut rng, samples);
				keys = picked.to_vec();
			}
		}
		SamplingPolicy::BucketSampled {
			buckets: count,
		} => {
			let count = count.min(buckets.len());
			for idx in rand::seq::index::sample(&mut rng, buckets.len(), count) {
				buckets[idx].collect_keys_up_to(high, &mut keys);
			}
		}
	}
	// the trigger alone could equal the high key and leave the new leaf
	// with an empty range
	if keys.is_empty() {
		for bucket in buckets {
			bucket.collect_keys_up_to(high, &mut keys);
		}
	}
	keys.push(trigger);
	let nth = (keys.len() - 1) / 2;
	select_nth(&mut keys, nth, &mut rng)
}

/// Quickselect with random pivots: returns the element that would sit at
/// `nth` if `keys` were sorted.
pub(crate) fn select_nth<K: Ord + Copy, R: Rng + ?Sized>(keys: &mut [K], nth: usize, rng: &mut R) -> K {
	debug_assert!(nth < keys.len());
	let (mut lo, mut hi) = (0, keys.len());
	loop {
		if hi - lo <= 1 {
			return keys[lo];
		}
		keys.swap(rng.random_range(lo..hi), hi - 1);
		let pivot = keys[hi - 1];
		let mut store = lo;
		for i in lo..hi - 1 {
			if keys[i] < pivot {
				keys.swap(i, store);
				store += 1;
			}
		}
		keys.swap(store, hi - 1);
		match nth.cmp(&store) {
			std::cmp::Ordering::Equal => return keys[store],
			std::cmp::Ordering::Less => hi = store,
			std::cmp::Ordering::Greater => lo = store + 1,
		}
	}
}
