//! Memory leak detection tests for blinkhash.
//!
//! The tree never retires nodes while it is alive: splits only add nodes,
//! and every node is freed by `Drop` walking each level's sibling chain.
//! These tests check that dropping a tree returns every byte it took.
//!
//! # Test Design
//!
//! The test binary installs a counting allocator that tracks live bytes per
//! thread. Each single-threaded test:
//! 1. Warms up the thread so one-time allocations (epoch registration, the
//!    split RNG) are not attributed to the tree
//! 2. Builds a tree, runs operations, drops it
//! 3. Asserts that the thread holds no more bytes than before
//!
//! For more thorough leak detection, run under LeakSanitizer:
//!
//! ```bash
//! RUSTFLAGS="-Zsanitizer=leak" cargo +nightly test --test memory_tests --target x86_64-unknown-linux-gnu
//! ```

mod common;

use blinkhash::{BlinkHashTree, SamplingPolicy};
use common::{identity_hash, tiny_config};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::Arc;
use std::thread;

// ===========================================================================
// Counting Allocator
// ===========================================================================

thread_local! {
	static LIVE_BYTES: Cell<isize> = const { Cell::new(0) };
}

fn track(delta: isize) {
	// the slot is gone while the thread is being torn down
	let _ = LIVE_BYTES.try_with(|live| live.set(live.get() + delta));
}

/// Wraps the system allocator and counts the bytes each thread holds.
struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		track(layout.size() as isize);
		System.alloc(layout)
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		track(-(layout.size() as isize));
		System.dealloc(ptr, layout)
	}

	unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
		track(layout.size() as isize);
		System.alloc_zeroed(layout)
	}

	unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
		track(new_size as isize - layout.size() as isize);
		System.realloc(ptr, layout, new_size)
	}
}

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

fn live_bytes() -> isize {
	LIVE_BYTES.with(Cell::get)
}

/// Runs `f` after warming the thread up and asserts it leaves no bytes
/// behind.
fn assert_no_leak<F: FnOnce()>(name: &str, f: F) {
	{
		let warmup = BlinkHashTree::<u64, u64>::with_config(tiny_config()).unwrap();
		for k in 0..64 {
			warmup.insert(k, k);
		}
	}
	let before = live_bytes();
	f();
	let after = live_bytes();
	assert!(after <= before, "'{name}' leaked {} bytes", after - before);
}

/// crossbeam_epoch defers some of its own bookkeeping; pinning a few times
/// lets it run.
fn force_epoch_advancement() {
	for _ in 0..10 {
		let _guard = crossbeam_epoch::pin();
		thread::yield_now();
	}
}

// ===========================================================================
// Single-Threaded Reclamation
// ===========================================================================

#[test]
fn no_leak_empty_tree() {
	assert_no_leak("empty tree", || {
		let tree = BlinkHashTree::<u64, u64>::new();
		assert!(tree.is_empty());
	});
}

#[test]
fn no_leak_after_splits() {
	assert_no_leak("leaf and inner splits", || {
		let tree = BlinkHashTree::<u64, u64>::with_config(tiny_config().with_inner_fanout(3)).unwrap();
		for k in 0..10_000 {
			tree.insert(k, k);
		}
		assert!(tree.height() >= 4);
		drop(tree);
	});
}

#[test]
fn no_leak_repeated_updates() {
	assert_no_leak("repeated updates", || {
		let tree = BlinkHashTree::<u64, u64>::with_config(tiny_config()).unwrap();
		for k in 0..1_000 {
			tree.insert(k, 0);
		}
		for round in 1..10 {
			for k in 0..1_000 {
				tree.update(k, round);
				tree.upsert(k, round);
			}
		}
		drop(tree);
	});
}

#[test]
fn no_leak_with_linked_buckets_left_behind() {
	// with identity hashing and one probe slot these keys leave a chain of
	// unsettled splits, so drop must not depend on buckets being migrated
	assert_no_leak("unsettled buckets", || {
		let tree = BlinkHashTree::<u64, u64>::with_config(tiny_config().with_hash(identity_hash, 0)).unwrap();
		for k in 0..32 {
			tree.insert(k, k);
		}
		for k in (32..=80).step_by(8) {
			tree.insert(k, k);
		}
		assert!(tree.max_linked_chain() >= 3);
		drop(tree);
	});
}

#[test]
fn no_leak_with_sampled_splits() {
	assert_no_leak("sampled splits", || {
		for policy in [
			SamplingPolicy::EntrySampled {
				samples: 3,
			},
			SamplingPolicy::BucketSampled {
				buckets: 2,
			},
		] {
			let tree = BlinkHashTree::<u64, u64>::with_config(tiny_config().with_sampling_policy(policy)).unwrap();
			for k in (0..3_000).rev() {
				tree.insert(k, k);
			}
			drop(tree);
		}
	});
}

#[test]
fn no_leak_from_range_lookups() {
	assert_no_leak("range lookups", || {
		let tree = BlinkHashTree::<u64, u64>::with_config(tiny_config()).unwrap();
		for k in 0..2_000 {
			tree.insert(k, k);
		}
		for start in (0..2_000).step_by(50) {
			let values = tree.range_lookup(&start, 100);
			assert!(!values.is_empty());
		}
		drop(tree);
	});
}

#[test]
fn no_leak_wide_values() {
	assert_no_leak("wide values", || {
		let tree = BlinkHashTree::<u64, [u64; 8]>::with_config(tiny_config()).unwrap();
		for k in 0..2_000 {
			tree.insert(k, [k; 8]);
		}
		drop(tree);
	});
}

// ===========================================================================
// Concurrent Reclamation
// ===========================================================================

/// Nodes allocated on worker threads are freed by whichever thread drops
/// the tree, so per-thread counters cannot balance here; the test checks
/// that drop after contention completes and frees without faulting.
#[test]
fn no_leak_concurrent_inserts() {
	let tree = Arc::new(BlinkHashTree::<u64, u64>::with_config(tiny_config()).unwrap());
	let handles: Vec<_> = (0..4u64)
		.map(|t| {
			let tree = Arc::clone(&tree);
			thread::spawn(move || {
				for i in 0..2_000u64 {
					tree.insert(i * 4 + t, i);
				}
			})
		})
		.collect();
	for h in handles {
		h.join().unwrap();
	}
	assert_eq!(tree.len(), 8_000);
	let tree = Arc::try_unwrap(tree).ok().expect("workers still hold the tree");
	drop(tree);
	force_epoch_advancement();
}

#[test]
fn no_leak_concurrent_root_races() {
	for _ in 0..20 {
		let tree = Arc::new(BlinkHashTree::<u64, u64>::with_config(tiny_config()).unwrap());
		let handles: Vec<_> = (0..4u64)
			.map(|t| {
				let tree = Arc::clone(&tree);
				thread::spawn(move || {
					for i in 0..100u64 {
						tree.insert(i * 4 + t, i);
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		tree.assert_invariants();
	}
	force_epoch_advancement();
}
