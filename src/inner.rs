//! Inner (routing) nodes.
//!
//! An inner node at level `l` routes to children at level `l - 1`. Entry
//! `(s_i, c_i)` sends keys in `(s_i, s_{i+1}]` to `c_i`; keys up to and
//! including `s_0` go to the leftmost child:
//!
//! ```text
//!            s_0        s_1        s_2          high
//!   leftmost │   c_0    │   c_1    │   c_2      │ ──► sibling
//!   (.., s_0]  (s_0,s_1]  (s_1,s_2]  (s_2,high]
//! ```
//!
//! Keys above `high` are not routed at all: they belong to the right sibling
//! (the B-link move-right rule).

use crossbeam_epoch::{self as epoch, Atomic, Shared};
use std::sync::atomic::Ordering;

use crate::error;
use crate::key::IndexKey;
use crate::Swip;

/// Where a lookup continues from an inner node.
pub(crate) enum Route<'n, K, V> {
	/// The key is above this node's high key.
	Sibling(&'n Swip<K, V>),
	Child(&'n Swip<K, V>),
}

pub(crate) struct InnerNode<K, V> {
	pub(crate) level: u16,
	pub(crate) high_key: Option<K>,
	pub(crate) sibling: Swip<K, V>,
	pub(crate) leftmost: Swip<K, V>,
	/// Sorted separators. Capacity is the fanout and is never exceeded.
	pub(crate) keys: Vec<K>,
	pub(crate) children: Vec<Swip<K, V>>,
}

impl<K: IndexKey, V> InnerNode<K, V> {
	/// The node that replaces `left` as root after `left` split at
	/// `split_key` into `left` and `right`.
	pub(crate) fn new_root<'g>(
		level: u16,
		left: Shared<'g, crate::NodeLatch<K, V>>,
		split_key: K,
		right: Shared<'g, crate::NodeLatch<K, V>>,
		fanout: usize,
	) -> Self {
		let mut keys = Vec::with_capacity(fanout);
		let mut children = Vec::with_capacity(fanout);
		keys.push(split_key);
		children.push(Atomic::from(right));
		InnerNode {
			level,
			high_key: None,
			sibling: Atomic::null(),
			leftmost: Atomic::from(left),
			keys,
			children,
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.keys.len()
	}

	#[inline]
	pub(crate) fn is_full(&self, fanout: usize) -> bool {
		self.keys.len() >= fanout
	}

	/// Returns `true` if `key` lies beyond this node's range.
	#[inline]
	pub(crate) fn is_left_of(&self, key: &K) -> bool {
		self.high_key.as_ref().is_some_and(|high| high < key)
	}

	/// Picks the edge to follow for `key`.
	///
	/// Reads are optimistic, so a torn node can yield an out-of-range
	/// position; that unwinds instead of panicking.
	pub(crate) fn find_child(&self, key: &K) -> error::Result<Route<'_, K, V>> {
		if self.is_left_of(key) {
			return Ok(Route::Sibling(&self.sibling));
		}
		let pos = self.keys.partition_point(|sep| sep < key);
		if pos == 0 {
			return Ok(Route::Child(&self.leftmost));
		}
		self.children.get(pos - 1).map(Route::Child).ok_or(error::Error::Unwind)
	}

	/// Adds the edge to a node split off at `split_key`.
	///
	/// The caller holds the node exclusively and has checked it is not full.
	pub(crate) fn insert_separator(&mut self, split_key: K, child: Shared<'_, crate::NodeLatch<K, V>>) {
		debug_assert!(self.keys.len() < self.keys.capacity());
		let pos = self.keys.partition_point(|sep| *sep < split_key);
		self.keys.insert(pos, split_key);
		self.children.insert(pos, Atomic::from(child));
	}

	/// Moves the upper half into a new node and returns it with the key that
	/// separates the halves. The separator itself moves up a level.
	///
	/// The new node takes over this node's high key and sibling; linking it
	/// in as this node's sibling is left to the caller.
	pub(crate) fn split(&mut self, fanout: usize, eg: &epoch::Guard) -> (K, InnerNode<K, V>) {
		let mid = self.keys.len() / 2;
		let split_key = self.keys[mid];

		let mut keys = Vec::with_capacity(fanout);
		keys.extend(self.keys.drain(mid + 1..));
		let mut children = Vec::with_capacity(fanout);
		children.extend(self.children.drain(mid + 1..));
		self.keys.truncate(mid);
		let leftmost = self.children.pop().unwrap_or_else(Atomic::null);

		let sibling = self.sibling.load(Ordering::Acquire, eg);
		let right = InnerNode {
			level: self.level,
			high_key: self.high_key,
			sibling: Atomic::from(sibling),
			leftmost,
			keys,
			children,
		};
		self.high_key = Some(split_key);
		(split_key, right)
	}
}
