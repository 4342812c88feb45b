//! # Blinkhash: A Concurrent B-link Tree with Hashed Leaves
//!
//! This crate provides an in-memory ordered index for fixed-width keys and
//! values that many threads can read and write at once. Inner levels form a
//! classic B-link tree under **optimistic lock coupling**; the leaf level is
//! made of small hash tables, so point operations cost a fingerprint compare
//! in a couple of buckets instead of a binary search.
//!
//! ## Design Overview
//!
//! **Optimistic Lock Coupling**: every node and every leaf bucket carries a
//! [`latch::VersionLatch`]. Readers take no locks: they snapshot the version,
//! read, and validate afterwards. A failed validation unwinds the operation,
//! which restarts from the root after a short backoff.
//!
//! **B-link Links**: every node stores a high key and a pointer to its right
//! sibling. A reader that lands on a node which split after it was routed
//! there simply moves right, so splits never have to lock the parent while
//! they move data.
//!
//! **Hashed Leaves**: a leaf holds `B` buckets of `E` slots each. A key may
//! live in a handful of candidate buckets chosen by its hash. Each slot keeps
//! a one-byte fingerprint so most non-matching slots are rejected in a single
//! wide compare.
//!
//! **Lazy Migration**: splitting a leaf only picks a split key and tags the
//! affected buckets. Entries move to the new leaf one bucket pair at a time,
//! the first time an operation touches the pair.
//!
//! ### Tree Structure
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │     root ptr     │  <- replaced by CAS on growth
//!                       └────────┬─────────┘
//!                                ▼
//!                       ┌──────────────────┐
//!                       │    Inner Node    │ ──► sibling
//!                       │  seps | children │
//!                       └────────┬─────────┘
//!               ┌────────────────┼────────────────┐
//!               ▼                ▼                ▼
//!        ┌────────────┐   ┌────────────┐   ┌────────────┐
//!        │    Leaf    │ ─►│    Leaf    │ ─►│    Leaf    │
//!        │ [b0 .. bB] │ ◄─│ [b0 .. bB] │ ◄─│ [b0 .. bB] │
//!        └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Basic Usage
//!
//! ```
//! use blinkhash::BlinkHashTree;
//!
//! let tree: BlinkHashTree<u64, u64> = BlinkHashTree::new();
//!
//! assert!(tree.insert(1, 10));
//! assert!(tree.insert(2, 20));
//! assert!(!tree.insert(1, 11)); // overwrites
//!
//! assert_eq!(tree.find(&1), Some(11));
//! assert_eq!(tree.range_lookup(&0, 10), vec![11, 20]);
//! ```
//!
//! ## Thread Safety
//!
//! The tree is `Send + Sync` and is meant to be shared via `Arc`. No operation
//! blocks while holding a lock: contended locks are retried with
//! spin-then-yield backoff. Nodes are never freed while the tree is alive, so
//! no reader can observe reclaimed memory.

// Complex types are intentional in this crate for expressing traversal results
#![allow(clippy::type_complexity)]

#[macro_use]
mod tracing_helpers;

mod backoff;
mod bucket;
pub mod config;
pub mod error;
pub mod fingerprint;
mod index;
mod inner;
pub mod key;
pub mod latch;
mod leaf;
mod probe;
mod stabilize;
mod sync;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use smallvec::SmallVec;

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use config::{BackoffPolicy, Config, HashFn, SamplingPolicy};
pub use error::ConfigError;
pub use index::ConcurrentIndex;
pub use key::{IndexKey, IndexValue};

use inner::{InnerNode, Route};
use latch::{OptimisticGuard, VersionLatch};
use leaf::{InsertOutcome, LeafNode, LeafSplit};
use probe::Probe;

// ---------------------------------------------------------------------------
// Internal Type Aliases
// ---------------------------------------------------------------------------

pub(crate) type NodeLatch<K, V> = VersionLatch<Node<K, V>>;

/// A link to a node: a child edge, a sibling pointer or the root.
pub(crate) type Swip<K, V> = Atomic<NodeLatch<K, V>>;

/// Inner nodes a descent went down through, root first.
type Ancestors<'e, K, V> = SmallVec<[&'e NodeLatch<K, V>; 8]>;

// ---------------------------------------------------------------------------
// Core Tree Structure
// ---------------------------------------------------------------------------

/// A concurrent ordered index over fixed-width keys.
///
/// # Type Parameters
///
/// - `K`: Key type, see [`IndexKey`]
/// - `V`: Value type, any small `Copy` payload
///
/// # Example
///
/// ```
/// use blinkhash::{BlinkHashTree, Config};
///
/// let config = Config::default().with_leaf_bucket_count(16);
/// let tree: BlinkHashTree<u32, u32> = BlinkHashTree::with_config(config).unwrap();
/// for k in 0..1000 {
///     tree.insert(k, k * 2);
/// }
/// assert_eq!(tree.len(), 1000);
/// assert!(tree.height() > 1);
/// ```
pub struct BlinkHashTree<K: IndexKey, V: IndexValue> {
	/// The current root. Only ever replaced by a node one level higher.
	root: Atomic<NodeLatch<K, V>>,
	config: Config,
	/// Number of distinct keys stored.
	len: AtomicUsize,
	/// Number of leaves, for utilization.
	leaves: AtomicUsize,
}

impl<K: IndexKey, V: IndexValue> Default for BlinkHashTree<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: IndexKey, V: IndexValue> std::fmt::Debug for BlinkHashTree<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BlinkHashTree")
			.field("len", &self.len())
			.field("height", &self.height())
			.field("leaves", &self.leaf_count())
			.finish()
	}
}

// ---------------------------------------------------------------------------
// BlinkHashTree Implementation
// ---------------------------------------------------------------------------

impl<K: IndexKey, V: IndexValue> BlinkHashTree<K, V> {
	/// Creates an empty tree with the default [`Config`].
	pub fn new() -> Self {
		Self::build(Config::default())
	}

	/// Creates an empty tree, rejecting configurations the tree cannot run
	/// with.
	///
	/// # Example
	///
	/// ```
	/// use blinkhash::{BlinkHashTree, Config, ConfigError};
	///
	/// let err = BlinkHashTree::<u64, u64>::with_config(Config::default().with_bucket_capacity(0));
	/// assert!(matches!(err, Err(ConfigError::BucketCapacity(0))));
	/// ```
	pub fn with_config(config: Config) -> Result<Self, ConfigError> {
		config.validate()?;
		Ok(Self::build(config))
	}

	fn build(config: Config) -> Self {
		let root = Owned::new(VersionLatch::new(Node::Leaf(LeafNode::new(&config))));
		BlinkHashTree {
			root: Atomic::from(root),
			config,
			len: AtomicUsize::new(0),
			leaves: AtomicUsize::new(1),
		}
	}

	/// The configuration this tree was built with.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the number of levels, counting the leaf level.
	///
	/// A new tree has height 1. Height never decreases.
	pub fn height(&self) -> u32 {
		let eg = &epoch::pin();
		let root = self.root.load(Ordering::Acquire, eg);
		// SAFETY: the root is never null and a node's level never changes
		let level = unsafe { root.deref().peek() }.level();
		u32::from(level) + 1
	}

	/// Returns the number of keys in the tree.
	///
	/// Under concurrent inserts the count may briefly lag behind.
	pub fn len(&self) -> usize {
		self.len.load(Ordering::Relaxed)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the number of leaf nodes.
	pub fn leaf_count(&self) -> usize {
		self.leaves.load(Ordering::Relaxed)
	}

	/// Fraction of leaf slots in use, between 0 and 1.
	pub fn utilization(&self) -> f64 {
		let slots = self.leaf_count() * self.config.leaf_capacity();
		if slots == 0 {
			return 0.0;
		}
		self.len() as f64 / slots as f64
	}

	// -----------------------------------------------------------------------
	// Lock Coupling
	// -----------------------------------------------------------------------

	/// Acquires optimistic access to the node behind `swip`, then validates
	/// the node the link was read from.
	fn lock_coupling<'e>(
		&self,
		p_guard: &OptimisticGuard<'e, Node<K, V>>,
		swip: &Swip<K, V>,
		eg: &'e epoch::Guard,
	) -> error::Result<OptimisticGuard<'e, Node<K, V>>> {
		let child = swip.load(Ordering::Acquire, eg);
		if child.is_null() {
			// only a torn read can yield a null edge
			return Err(error::Error::Unwind);
		}
		// SAFETY: nodes are never freed while the tree is alive
		let c_guard = unsafe { child.deref() }.optimistic_or_spin_with(self.config.backoff)?;
		p_guard.recheck()?;
		Ok(c_guard)
	}

	fn root_guard<'e>(&self, eg: &'e epoch::Guard) -> error::Result<OptimisticGuard<'e, Node<K, V>>> {
		let root = self.root.load(Ordering::Acquire, eg);
		// SAFETY: the root is never null and never freed while the tree is alive
		unsafe { root.deref() }.optimistic_or_spin_with(self.config.backoff)
	}

	// -----------------------------------------------------------------------
	// Traversal
	// -----------------------------------------------------------------------

	/// Descends to the leaf responsible for `key`.
	///
	/// When `stack` is given, every inner node the descent went down from is
	/// pushed onto it. Sibling moves are not recorded: the node reached by
	/// moving right replaces the one the parent pointed to.
	fn find_leaf<'e>(
		&self,
		key: &K,
		mut stack: Option<&mut Ancestors<'e, K, V>>,
		eg: &'e epoch::Guard,
	) -> error::Result<OptimisticGuard<'e, Node<K, V>>> {
		let mut node = self.root_guard(eg)?;
		loop {
			let next = match *node {
				Node::Inner(ref inner) => match inner.find_child(key)? {
					Route::Sibling(swip) => Some(swip),
					Route::Child(swip) => {
						if let Some(stack) = stack.as_deref_mut() {
							stack.push(node.latch());
						}
						Some(swip)
					}
				},
				Node::Leaf(ref leaf) if leaf.is_left_of(key) => Some(&leaf.sibling),
				Node::Leaf(_) => None,
			};
			let Some(next) = next else {
				return Ok(node);
			};
			node = self.lock_coupling(&node, next, eg)?;
		}
	}

	/// Re-descends from the root to the inner node at `level` responsible for
	/// `key`.
	///
	/// Unwinds if the tree is not yet that tall, which happens while the
	/// thread that split the old root has not installed the new one.
	fn find_node_at_level<'e>(
		&self,
		key: &K,
		level: u16,
		eg: &'e epoch::Guard,
	) -> error::Result<OptimisticGuard<'e, Node<K, V>>> {
		let mut node = self.root_guard(eg)?;
		if node.level() < level {
			return Err(error::Error::Unwind);
		}
		loop {
			let next = match *node {
				Node::Inner(ref inner) if inner.is_left_of(key) => Some(&inner.sibling),
				Node::Inner(ref inner) if inner.level > level => match inner.find_child(key)? {
					Route::Sibling(swip) | Route::Child(swip) => Some(swip),
				},
				_ => None,
			};
			let Some(next) = next else {
				return Ok(node);
			};
			node = self.lock_coupling(&node, next, eg)?;
		}
	}

	// -----------------------------------------------------------------------
	// Point Operations
	// -----------------------------------------------------------------------

	/// Returns the value stored for `key`.
	pub fn find(&self, key: &K) -> Option<V> {
		let eg = &epoch::pin();
		let probe = Probe::new(key, &self.config);
		backoff::retry(self.config.backoff, || {
			let node = self.find_leaf(key, None, eg)?;
			LeafNode::find(&node, key, &probe, eg)
		})
	}

	/// Returns `true` if `key` is present.
	pub fn contains_key(&self, key: &K) -> bool {
		self.find(key).is_some()
	}

	/// Overwrites the value of an existing key.
	///
	/// Returns `false`, changing nothing, if the key is absent.
	pub fn update(&self, key: K, value: V) -> bool {
		let eg = &epoch::pin();
		let probe = Probe::new(&key, &self.config);
		backoff::retry(self.config.backoff, || {
			let node = self.find_leaf(&key, None, eg)?;
			LeafNode::update(&node, &key, value, &probe, eg)
		})
	}

	/// Inserts `key`, overwriting the value if the key is already present.
	///
	/// Returns `true` if the key was not present before. When two threads
	/// insert the same key concurrently, exactly one entry survives and it
	/// holds one of the two values.
	pub fn insert(&self, key: K, value: V) -> bool {
		let eg = &epoch::pin();
		let probe = Probe::new(&key, &self.config);
		backoff::retry(self.config.backoff, || self.try_insert(key, value, &probe, eg))
	}

	/// Same as [`insert`](Self::insert).
	pub fn upsert(&self, key: K, value: V) -> bool {
		self.insert(key, value)
	}

	fn try_insert<'e>(&self, key: K, value: V, probe: &Probe, eg: &'e epoch::Guard) -> error::Result<bool> {
		let mut stack = Ancestors::new();
		let node = self.find_leaf(&key, Some(&mut stack), eg)?;

		match LeafNode::insert(&node, key, value, probe, eg) {
			InsertOutcome::Inserted => {
				self.len.fetch_add(1, Ordering::Relaxed);
				return Ok(true);
			}
			InsertOutcome::Replaced => return Ok(false),
			InsertOutcome::Retry => return Err(error::Error::Unwind),
			InsertOutcome::SplitNeeded => {}
		}

		let left = Shared::from(node.latch() as *const NodeLatch<K, V>);
		match LeafNode::split(node, key, value, probe, &self.config, eg) {
			LeafSplit::Stale => Err(error::Error::Unwind),
			LeafSplit::Absorbed {
				replaced,
			} => {
				if !replaced {
					self.len.fetch_add(1, Ordering::Relaxed);
				}
				Ok(!replaced)
			}
			LeafSplit::Split {
				split_key,
				right,
				placed,
			} => {
				self.leaves.fetch_add(1, Ordering::Relaxed);
				self.install_separator(stack, left, split_key, right, eg);
				if !placed {
					trace_log!(key = ?key, "entry not placed during split, retrying");
					return Err(error::Error::Unwind);
				}
				self.len.fetch_add(1, Ordering::Relaxed);
				Ok(true)
			}
		}
	}

	// -----------------------------------------------------------------------
	// Separator Propagation
	// -----------------------------------------------------------------------

	/// Links `right`, split off `left` at `split_key`, into the level above,
	/// splitting ancestors and growing the root as needed.
	///
	/// `stack` holds the ancestors recorded by the descent; each one is only
	/// a hint, since it may have split or been replaced as root since.
	fn install_separator<'e>(
		&self,
		mut stack: Ancestors<'e, K, V>,
		left: Shared<'e, NodeLatch<K, V>>,
		split_key: K,
		right: Shared<'e, NodeLatch<K, V>>,
		eg: &'e epoch::Guard,
	) {
		let (mut left, mut split_key, mut right) = (left, split_key, right);
		let mut level = 1;
		loop {
			let hint = stack.pop();
			let propagated = backoff::retry(self.config.backoff, || {
				self.install_at(hint, left, split_key, right, level, eg)
			});
			match propagated {
				None => return,
				Some((up, parent, sibling)) => {
					left = parent;
					split_key = up;
					right = sibling;
					level += 1;
				}
			}
		}
	}

	/// One attempt at inserting the separator at `level`.
	///
	/// Returns the separator to push one level further up if the parent had
	/// to split.
	fn install_at<'e>(
		&self,
		hint: Option<&'e NodeLatch<K, V>>,
		left: Shared<'e, NodeLatch<K, V>>,
		split_key: K,
		right: Shared<'e, NodeLatch<K, V>>,
		level: u16,
		eg: &'e epoch::Guard,
	) -> error::Result<Option<(K, Shared<'e, NodeLatch<K, V>>, Shared<'e, NodeLatch<K, V>>)>> {
		let fanout = self.config.inner_fanout;
		let mut node = match hint {
			Some(latch) => latch.optimistic_or_spin_with(self.config.backoff)?,
			None => {
				if self.root.load(Ordering::Acquire, eg) == left {
					let root = InnerNode::new_root(level, left, split_key, right, fanout);
					let root = Owned::new(VersionLatch::new(Node::Inner(root)));
					return match self.root.compare_exchange(
						left,
						root,
						Ordering::AcqRel,
						Ordering::Acquire,
						eg,
					) {
						Ok(_) => {
							debug_log!(height = level + 1, "grew new root");
							Ok(None)
						}
						Err(_) => {
							trace_log!(level, "lost root replacement race");
							Err(error::Error::Unwind)
						}
					};
				}
				self.find_node_at_level(&split_key, level, eg)?
			}
		};
		if node.level() != level {
			node = self.find_node_at_level(&split_key, level, eg)?;
		}
		while node.is_left_of(&split_key) {
			node = self.lock_coupling(&node, node.sibling(), eg)?;
		}
		if node.level() != level {
			return Err(error::Error::Unwind);
		}

		let mut guard = node.to_exclusive()?;
		let me = guard.latch();
		let inner = guard.as_inner_mut();
		if !inner.is_full(fanout) {
			inner.insert_separator(split_key, right);
			return Ok(None);
		}

		let (up, mut new_node) = inner.split(fanout, eg);
		if split_key <= up {
			inner.insert_separator(split_key, right);
		} else {
			new_node.insert_separator(split_key, right);
		}
		let new_node = Owned::new(VersionLatch::new(Node::Inner(new_node))).into_shared(eg);
		inner.sibling.store(new_node, Ordering::Release);
		debug_log!(level, split_key = ?up, "inner split");
		drop(guard);

		Ok(Some((up, Shared::from(me as *const NodeLatch<K, V>), new_node)))
	}

	// -----------------------------------------------------------------------
	// Range Scan
	// -----------------------------------------------------------------------

	/// Returns the values of up to `max` keys `>= start`, in ascending key
	/// order.
	pub fn range_lookup(&self, start: &K, max: usize) -> Vec<V> {
		self.range_entries(start, max).into_iter().map(|(_, v)| v).collect()
	}

	/// Returns up to `max` entries with keys `>= start`, in ascending key
	/// order.
	///
	/// Each leaf is read as one validated snapshot; the scan as a whole is
	/// not atomic with respect to concurrent writers.
	pub fn range_entries(&self, start: &K, max: usize) -> Vec<(K, V)> {
		let mut out = Vec::new();
		if max == 0 {
			return out;
		}
		let eg = &epoch::pin();
		let mut lower = Bound::Included(*start);
		let mut cursor: Option<&NodeLatch<K, V>> = None;
		loop {
			let (high, next) = backoff::retry(self.config.backoff, || {
				let node = match cursor {
					Some(latch) => latch.optimistic_or_spin_with(self.config.backoff)?,
					None => self.find_leaf(start, None, eg)?,
				};
				let high = node.high_key().copied();
				let next = node.sibling().load(Ordering::Acquire, eg);
				// validates `high` and `next` along with the entries
				LeafNode::range_lookup(&node, lower, max, &mut out, eg)?;
				Ok((high, next))
			});
			match high {
				Some(high) if out.len() < max && !next.is_null() => {
					lower = Bound::Excluded(high);
					// SAFETY: leaves are never freed while the tree is alive
					cursor = Some(unsafe { next.deref() });
				}
				_ => return out,
			}
		}
	}
}

impl<K: IndexKey, V: IndexValue> Drop for BlinkHashTree<K, V> {
	fn drop(&mut self) {
		// SAFETY: `&mut self` rules out every concurrent accessor
		let eg = unsafe { epoch::unprotected() };
		// Every node is on its level's sibling chain, and the root's leftmost
		// path reaches the first node of each level.
		let mut first = self.root.load(Ordering::Relaxed, eg);
		while !first.is_null() {
			// SAFETY: nodes are owned by the tree and freed exactly once here
			let below = match unsafe { first.deref().peek() } {
				Node::Inner(inner) => inner.leftmost.load(Ordering::Relaxed, eg),
				Node::Leaf(_) => Shared::null(),
			};
			let mut node = first;
			while !node.is_null() {
				let next = unsafe { node.deref().peek() }.sibling().load(Ordering::Relaxed, eg);
				drop(unsafe { node.into_owned() });
				node = next;
			}
			first = below;
		}
	}
}

// ===========================================================================
// Node Types
// ===========================================================================

pub(crate) enum Node<K, V> {
	Inner(InnerNode<K, V>),
	Leaf(LeafNode<K, V>),
}

impl<K: IndexKey, V: IndexValue> Node<K, V> {
	/// Leaves are at level 0.
	#[inline]
	pub(crate) fn level(&self) -> u16 {
		match self {
			Node::Inner(inner) => inner.level,
			Node::Leaf(_) => 0,
		}
	}

	#[inline]
	pub(crate) fn high_key(&self) -> Option<&K> {
		match self {
			Node::Inner(inner) => inner.high_key.as_ref(),
			Node::Leaf(leaf) => leaf.high_key.as_ref(),
		}
	}

	#[inline]
	pub(crate) fn sibling(&self) -> &Swip<K, V> {
		match self {
			Node::Inner(inner) => &inner.sibling,
			Node::Leaf(leaf) => &leaf.sibling,
		}
	}

	/// Returns `true` if `key` belongs to a node further right.
	#[inline]
	pub(crate) fn is_left_of(&self, key: &K) -> bool {
		self.high_key().is_some_and(|high| high < key)
	}

	#[inline]
	pub(crate) fn as_leaf(&self) -> &LeafNode<K, V> {
		match self {
			Node::Leaf(leaf) => leaf,
			Node::Inner(_) => unreachable!("expected a leaf node"),
		}
	}

	#[inline]
	pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode<K, V> {
		match self {
			Node::Leaf(leaf) => leaf,
			Node::Inner(_) => unreachable!("expected a leaf node"),
		}
	}

	#[cfg(any(test, feature = "test-utils"))]
	pub(crate) fn as_inner(&self) -> &InnerNode<K, V> {
		match self {
			Node::Inner(inner) => inner,
			Node::Leaf(_) => unreachable!("expected an inner node"),
		}
	}

	#[inline]
	pub(crate) fn as_inner_mut(&mut self) -> &mut InnerNode<K, V> {
		match self {
			Node::Inner(inner) => inner,
			Node::Leaf(_) => unreachable!("expected an inner node"),
		}
	}
}

// ===========================================================================
// Test-Only Validation Module
// ===========================================================================

/// Structural checks for tests. All of them assume no concurrent writers.
#[cfg(any(test, feature = "test-utils"))]
impl<K: IndexKey, V: IndexValue> BlinkHashTree<K, V> {
	/// The nodes of every level in sibling order, root level first.
	fn levels<'e>(&self, eg: &'e epoch::Guard) -> Vec<Vec<&'e NodeLatch<K, V>>> {
		let mut levels = Vec::new();
		let mut first = self.root.load(Ordering::Acquire, eg);
		while !first.is_null() {
			let mut chain = Vec::new();
			let mut node = first;
			while !node.is_null() {
				// SAFETY: nodes live as long as the tree
				let latch = unsafe { node.deref() };
				chain.push(latch);
				node = unsafe { latch.peek() }.sibling().load(Ordering::Acquire, eg);
			}
			first = match unsafe { chain[0].peek() } {
				Node::Inner(inner) => inner.leftmost.load(Ordering::Acquire, eg),
				Node::Leaf(_) => Shared::null(),
			};
			levels.push(chain);
		}
		levels
	}

	/// Validates the whole structure. Panics with a diagnostic message if any
	/// invariant is violated.
	///
	/// # Invariants Checked
	///
	/// 1. Levels: each level's chain holds nodes of one level, ending at 0
	/// 2. High keys strictly increase along a chain; only the last is unbounded
	/// 3. Separators are sorted and within the node's range
	/// 4. Children of a level, concatenated, are exactly the level below, and
	///    each child's high key is the separator above it
	/// 5. Leaf back links point at the previous leaf
	/// 6. Bucket states: stable buckets hold only keys of their leaf,
	///    linked-left buckets are empty, linked-right buckets face a
	///    linked-left bucket
	/// 7. Every key sits in one of its candidate buckets, at most once
	/// 8. The key count matches `len()`
	pub fn assert_invariants(&self) {
		let eg = &epoch::pin();
		let levels = self.levels(eg);
		let height = levels.len();
		assert_eq!(height as u32, self.height(), "level chains disagree with root level");

		for (depth, chain) in levels.iter().enumerate() {
			let level = (height - 1 - depth) as u16;
			let nodes: Vec<&Node<K, V>> = chain.iter().map(|l| unsafe { l.peek() }).collect();

			let mut low: Option<K> = None;
			for (i, node) in nodes.iter().enumerate() {
				assert_eq!(node.level(), level, "node {i} of level {level} has the wrong level");
				let last = i + 1 == nodes.len();
				assert_eq!(node.high_key().is_none(), last, "only the last node of level {level} is unbounded");
				assert_eq!(
					node.sibling().load(Ordering::Acquire, eg).is_null(),
					last,
					"sibling link of node {i} at level {level}"
				);
				if let (Some(low), Some(high)) = (low.as_ref(), node.high_key()) {
					assert!(low < high, "high keys not increasing at level {level}: {low:?} >= {high:?}");
				}
				if let Node::Inner(inner) = node {
					assert!(inner.keys.windows(2).all(|w| w[0] < w[1]), "separators unsorted");
					assert_eq!(inner.keys.len(), inner.children.len());
					assert!(inner.keys.len() <= self.config.inner_fanout, "inner node over capacity");
					for sep in &inner.keys {
						assert!(low.as_ref().map_or(true, |l| sep > l), "separator {sep:?} below node range");
						assert!(node.high_key().map_or(true, |h| sep <= h), "separator {sep:?} above node range");
					}
				}
				low = node.high_key().copied();
			}

			if level > 0 {
				self.check_children(&nodes, &levels[depth + 1], eg);
			} else {
				self.check_leaves(chain, eg);
			}
		}
	}

	fn check_children(&self, parents: &[&Node<K, V>], below: &[&NodeLatch<K, V>], eg: &epoch::Guard) {
		let mut expected = below.iter();
		for parent in parents {
			let inner = parent.as_inner();
			let bounds = inner.keys.iter().copied().map(Some).chain(std::iter::once(inner.high_key));
			let edges = std::iter::once(&inner.leftmost).chain(inner.children.iter());
			for (edge, bound) in edges.zip(bounds) {
				let child = edge.load(Ordering::Acquire, eg);
				let next = expected.next().expect("more child edges than nodes on the level below");
				assert!(std::ptr::eq(child.as_raw(), *next), "child edges out of sibling order");
				let child = unsafe { child.deref().peek() };
				assert_eq!(child.high_key().copied(), bound, "child high key differs from its separator");
			}
		}
		assert!(expected.next().is_none(), "node on the level below has no parent edge");
	}

	fn check_leaves(&self, chain: &[&NodeLatch<K, V>], eg: &epoch::Guard) {
		let mut seen = std::collections::BTreeSet::new();
		let mut low: Option<K> = None;
		for (i, latch) in chain.iter().enumerate() {
			let leaf = unsafe { latch.peek() }.as_leaf();
			let back = leaf.left_sibling.load(Ordering::Acquire, eg);
			match i {
				0 => assert!(back.is_null(), "first leaf has a left sibling"),
				_ => assert!(std::ptr::eq(back.as_raw(), chain[i - 1]), "left sibling of leaf {i}"),
			}
			let next = chain.get(i + 1).map(|l| unsafe { l.peek() }.as_leaf());

			for (idx, bucket) in leaf.buckets.iter().enumerate() {
				let bucket = unsafe { bucket.peek() };
				let mut keys = Vec::new();
				bucket.collect_keys_up_to(None, &mut keys);
				for key in &keys {
					assert!(low.as_ref().map_or(true, |l| key > l), "key {key:?} below leaf {i}");
					assert!(Probe::new(key, &self.config).contains(idx), "key {key:?} outside its probe");
					assert!(seen.insert(*key), "duplicate key {key:?}");
				}
				match bucket.state() {
					bucket::BucketState::Stable => {
						assert!(!bucket.any_above(leaf.high_key.as_ref()), "stable bucket {idx} of leaf {i} holds foreign keys");
					}
					bucket::BucketState::LinkedLeft => {
						assert!(i > 0, "linked-left bucket in the first leaf");
						assert!(bucket.is_empty(), "linked-left bucket {idx} of leaf {i} is not empty");
					}
					bucket::BucketState::LinkedRight => {
						let next = next.expect("linked-right bucket in the last leaf");
						let mirror = unsafe { next.buckets[idx].peek() }.state();
						assert_eq!(mirror, bucket::BucketState::LinkedLeft, "bucket {idx} of leaf {i} links to a settled bucket");
						assert!(bucket.any_above(leaf.high_key.as_ref()), "linked-right bucket {idx} has nothing to move");
					}
				}
			}
			low = leaf.high_key;
		}
		assert_eq!(seen.len(), self.len(), "stored keys disagree with len()");
		assert_eq!(chain.len(), self.leaf_count(), "leaf chain disagrees with leaf_count()");
	}

	/// Longest run of consecutive leaves whose bucket at the same index is
	/// not yet settled.
	pub fn max_linked_chain(&self) -> usize {
		let eg = &epoch::pin();
		let levels = self.levels(eg);
		let Some(leaves) = levels.last() else {
			return 0;
		};
		let leaves: Vec<&LeafNode<K, V>> = leaves.iter().map(|l| unsafe { l.peek() }.as_leaf()).collect();
		let mut longest = 0;
		for idx in 0..self.config.leaf_bucket_count {
			let mut run = 0;
			for leaf in &leaves {
				if unsafe { leaf.buckets[idx].peek() }.state() == bucket::BucketState::Stable {
					run = 0;
				} else {
					run += 1;
					longest = longest.max(run);
				}
			}
		}
		longest
	}
}
