//! Lazy bucket migration.
//!
//! After a leaf split, a bucket pair at index `i` may still be linked: the
//! left leaf's bucket holds entries that belong to the right leaf. The pair is
//! settled the first time any operation touches either side, by moving the
//! entries above the left leaf's high key across.
//!
//! Migration needs both bucket locks and no node lock. It never blocks: both
//! locks are taken with a single attempt each, left before right, and any
//! failure unwinds the calling operation.

use crossbeam_epoch as epoch;
use std::sync::atomic::Ordering;

use crate::bucket::BucketState;
use crate::error;
use crate::key::{IndexKey, IndexValue};
use crate::NodeLatch;

/// Settles bucket `idx` of `leaf` so that it reads as `Stable`.
///
/// A `LinkedLeft` bucket pulls its entries from the left sibling. When that
/// sibling's bucket is itself waiting on a leaf further left, the whole run
/// of linked leaves is collected first and the pairs are settled from the
/// leftmost one rightwards. A `LinkedRight` bucket pushes its surplus to the
/// right sibling.
pub(crate) fn stabilize<K: IndexKey, V: IndexValue>(
	leaf: &NodeLatch<K, V>,
	idx: usize,
	eg: &epoch::Guard,
) -> error::Result<()> {
	// SAFETY: the bucket array and sibling links are read only through
	// their own latches and atomics
	let node = unsafe { leaf.peek() }.as_leaf();
	let state = bucket_state(leaf, idx)?;

	match state {
		BucketState::Stable => Ok(()),
		BucketState::LinkedLeft => {
			let chain = linked_run(leaf, idx, eg)?;
			for pair in chain.windows(2).rev() {
				migrate(pair[1], pair[0], idx, eg)?;
			}
			Ok(())
		}
		BucketState::LinkedRight => {
			let right = node.sibling.load(Ordering::Acquire, eg);
			assert!(!right.is_null(), "linked-right bucket {idx} in the rightmost leaf");
			// SAFETY: leaves are never freed while the tree is alive
			migrate(leaf, unsafe { right.deref() }, idx, eg)
		}
	}
}

/// Validated state of bucket `idx` of `leaf`.
fn bucket_state<K: IndexKey, V: IndexValue>(leaf: &NodeLatch<K, V>, idx: usize) -> error::Result<BucketState> {
	// SAFETY: the bucket array never changes after construction
	let bucket = unsafe { leaf.peek() }.as_leaf().buckets.get(idx).ok_or(error::Error::Unwind)?.optimistic()?;
	let state = bucket.state();
	bucket.recheck()?;
	Ok(state)
}

/// Walks left from `leaf` while bucket `idx` is `LinkedLeft`.
///
/// Returns the leaves right to left, ending with the first one whose bucket
/// holds its content. No lock is taken.
fn linked_run<'a, K: IndexKey, V: IndexValue>(
	leaf: &'a NodeLatch<K, V>,
	idx: usize,
	eg: &'a epoch::Guard,
) -> error::Result<Vec<&'a NodeLatch<K, V>>> {
	let mut chain = vec![leaf];
	let mut current = leaf;
	loop {
		// SAFETY: sibling links are atomics
		let left = unsafe { current.peek() }.as_leaf().left_sibling.load(Ordering::Acquire, eg);
		assert!(!left.is_null(), "linked-left bucket {idx} in a leaf without a left sibling");
		// SAFETY: leaves are never freed while the tree is alive
		current = unsafe { left.deref() };
		chain.push(current);
		if bucket_state(current, idx)? != BucketState::LinkedLeft {
			return Ok(chain);
		}
	}
}

/// Moves the entries of bucket `idx` that lie above `left`'s high key into
/// the same bucket of `right`.
///
/// Succeeds without moving anything if another thread settled the pair
/// first.
fn migrate<K: IndexKey, V: IndexValue>(
	left: &NodeLatch<K, V>,
	right: &NodeLatch<K, V>,
	idx: usize,
	eg: &epoch::Guard,
) -> error::Result<()> {
	// SAFETY: high keys and sibling links of a leaf change only while its
	// splitter holds every one of its bucket locks
	let (left_leaf, right_leaf) = unsafe { (left.peek().as_leaf(), right.peek().as_leaf()) };
	let mut left_bucket = left_leaf.buckets[idx].try_exclusive().ok_or(error::Error::Unwind)?;
	let mut right_bucket = right_leaf.buckets[idx].try_exclusive().ok_or(error::Error::Unwind)?;

	if !std::ptr::eq(left_leaf.sibling.load(Ordering::Acquire, eg).as_raw(), right) {
		return Err(error::Error::Unwind);
	}
	if right_bucket.state() != BucketState::LinkedLeft {
		return Ok(());
	}
	if left_bucket.state() == BucketState::LinkedLeft {
		return Err(error::Error::Unwind);
	}

	left_bucket.migrate_into(left_leaf.high_key.as_ref(), &mut right_bucket, right_leaf.high_key.as_ref());
	trace_log!(bucket = idx, "migrated bucket pair");
	Ok(())
}
