//! # Integration Tests for Blinkhash
//!
//! Single-threaded tests of the public API: point operations, range scans,
//! configuration handling and the supported key types.

mod common;

use blinkhash::{BlinkHashTree, ConcurrentIndex, Config, ConfigError, SamplingPolicy};
use common::{identity_hash, init_tracing, small_config, tiny_config};
use rand::prelude::*;

// ===========================================================================
// Point Operations
// ===========================================================================

#[test]
fn empty_tree() {
	let tree: BlinkHashTree<u64, u64> = BlinkHashTree::new();
	assert!(tree.is_empty());
	assert_eq!(tree.len(), 0);
	assert_eq!(tree.height(), 1);
	assert_eq!(tree.leaf_count(), 1);
	assert_eq!(tree.find(&0), None);
	assert!(!tree.update(0, 1));
	assert!(tree.range_lookup(&0, 100).is_empty());
	tree.assert_invariants();
}

#[test]
fn insert_returns_whether_key_was_new() {
	let tree: BlinkHashTree<u64, u64> = BlinkHashTree::new();
	assert!(tree.insert(7, 70));
	assert!(!tree.insert(7, 71));
	assert!(!tree.upsert(7, 72));
	assert_eq!(tree.find(&7), Some(72));
	assert_eq!(tree.len(), 1);
}

#[test]
fn negative_lookups() {
	let tree = BlinkHashTree::with_config(small_config()).unwrap();
	for k in (0..5000u64).map(|k| k * 2) {
		tree.insert(k, k);
	}
	for k in (0..5000u64).map(|k| k * 2 + 1) {
		assert_eq!(tree.find(&k), None, "odd key {k} was never inserted");
		assert!(!tree.contains_key(&k));
	}
	assert!(tree.contains_key(&4000));
}

#[test]
fn update_changes_value_not_count() {
	init_tracing();
	let tree = BlinkHashTree::with_config(small_config()).unwrap();
	for k in 0..3000u64 {
		tree.insert(k, k);
	}
	let leaves = tree.leaf_count();
	for k in 0..3000u64 {
		assert!(tree.update(k, k + 1_000_000));
	}
	assert!(!tree.update(3000, 0));
	assert_eq!(tree.len(), 3000);
	assert_eq!(tree.leaf_count(), leaves);
	for k in 0..3000u64 {
		assert_eq!(tree.find(&k), Some(k + 1_000_000));
	}
	tree.assert_invariants();
}

#[test]
fn last_writer_wins() {
	let tree = BlinkHashTree::with_config(tiny_config()).unwrap();
	for round in 0..5u64 {
		for k in 0..500u64 {
			tree.insert(k, k * 10 + round);
		}
	}
	assert_eq!(tree.len(), 500);
	for k in 0..500u64 {
		assert_eq!(tree.find(&k), Some(k * 10 + 4));
	}
	tree.assert_invariants();
}

// ===========================================================================
// Range Lookups
// ===========================================================================

#[test]
fn range_lookup_matches_sorted_oracle() {
	let tree = BlinkHashTree::with_config(small_config()).unwrap();
	let mut rng = StdRng::seed_from_u64(7);
	let mut keys: Vec<u64> = (0..4000).map(|_| rng.random_range(0..1_000_000)).collect();
	for &k in &keys {
		tree.insert(k, k + 1);
	}
	keys.sort_unstable();
	keys.dedup();

	for _ in 0..200 {
		let start = rng.random_range(0..1_000_000);
		let max = rng.random_range(1..300);
		let expected: Vec<u64> = keys.iter().filter(|&&k| k >= start).take(max).map(|k| k + 1).collect();
		assert_eq!(tree.range_lookup(&start, max), expected, "start {start} max {max}");
	}
}

#[test]
fn range_lookup_is_idempotent() {
	let tree = BlinkHashTree::with_config(tiny_config()).unwrap();
	for k in 0..2000u64 {
		tree.insert(k * 5, k);
	}
	let first = tree.range_entries(&123, 400);
	let second = tree.range_entries(&123, 400);
	assert_eq!(first, second);
	assert_eq!(first.len(), 400);
	assert_eq!(first[0], (125, 25));
	assert!(first.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn range_lookup_zero_and_past_the_end() {
	let tree = BlinkHashTree::with_config(tiny_config()).unwrap();
	for k in 0..100u64 {
		tree.insert(k, k);
	}
	assert!(tree.range_lookup(&0, 0).is_empty());
	assert!(tree.range_lookup(&100, 10).is_empty());
	assert_eq!(tree.range_lookup(&95, 100), vec![95, 96, 97, 98, 99]);
	assert_eq!(tree.range_lookup(&0, usize::MAX).len(), 100);
}

// ===========================================================================
// Structure
// ===========================================================================

#[test]
fn height_grows_with_inserts() {
	let tree = BlinkHashTree::with_config(tiny_config()).unwrap();
	assert_eq!(tree.height(), 1);
	for k in 0..20_000u64 {
		tree.insert(k, k);
	}
	assert!(tree.height() >= 3, "height {}", tree.height());
	assert!(tree.leaf_count() > 100);
	tree.assert_invariants();
}

#[test]
fn utilization_tracks_fill() {
	let tree = BlinkHashTree::with_config(small_config()).unwrap();
	let leaf_slots = small_config().leaf_capacity() as f64;
	tree.insert(1, 1);
	assert!((tree.utilization() - 1.0 / leaf_slots).abs() < 1e-12);
	for k in 0..10_000u64 {
		tree.insert(k, k);
	}
	let u = tree.utilization();
	assert!(u > 0.1 && u <= 1.0, "utilization {u}");
}

#[test]
fn sampled_split_policies() {
	for policy in [
		SamplingPolicy::Full,
		SamplingPolicy::EntrySampled {
			samples: 5,
		},
		SamplingPolicy::BucketSampled {
			buckets: 2,
		},
	] {
		let tree = BlinkHashTree::with_config(small_config().with_sampling_policy(policy)).unwrap();
		let mut rng = StdRng::seed_from_u64(11);
		let mut keys: Vec<u64> = (0..5000).collect();
		keys.shuffle(&mut rng);
		for &k in &keys {
			assert!(tree.insert(k, k));
		}
		assert_eq!(tree.len(), 5000, "{policy:?}");
		for k in 0..5000u64 {
			assert_eq!(tree.find(&k), Some(k), "{policy:?}");
		}
		tree.assert_invariants();
	}
}

#[test]
fn deterministic_hash_override() {
	let config = tiny_config().with_hash(identity_hash, 0);
	let tree = BlinkHashTree::with_config(config).unwrap();
	for k in 0..1000u64 {
		tree.insert(k, !k);
	}
	for k in 0..1000u64 {
		assert_eq!(tree.find(&k), Some(!k));
	}
	tree.assert_invariants();
}

// ===========================================================================
// Key Types
// ===========================================================================

#[test]
fn signed_keys_keep_numeric_order() {
	let tree: BlinkHashTree<i32, u8> = BlinkHashTree::with_config(tiny_config()).unwrap();
	for k in -500..500 {
		tree.insert(k, (k & 0x7f) as u8);
	}
	let entries: Vec<i32> = tree.range_entries(&-3, 6).into_iter().map(|(k, _)| k).collect();
	assert_eq!(entries, vec![-3, -2, -1, 0, 1, 2]);
	tree.assert_invariants();
}

#[test]
fn byte_string_keys_order_lexicographically() {
	let tree: BlinkHashTree<[u8; 8], u32> = BlinkHashTree::with_config(small_config()).unwrap();
	let words = ["delta", "alpha", "echo", "charlie", "bravo", "foxtrot"];
	for (i, w) in words.iter().enumerate() {
		let mut key = [0u8; 8];
		key[..w.len()].copy_from_slice(w.as_bytes());
		tree.insert(key, i as u32);
	}
	let mut start = [0u8; 8];
	start[..1].copy_from_slice(b"b");
	let values = tree.range_lookup(&start, 3);
	// bravo, charlie, delta
	assert_eq!(values, vec![4, 3, 0]);
}

#[test]
fn wide_values() {
	let tree: BlinkHashTree<u64, [u64; 2]> = BlinkHashTree::new();
	tree.insert(1, [1, 2]);
	assert_eq!(tree.find(&1), Some([1, 2]));
}

// ===========================================================================
// Configuration
// ===========================================================================

#[test]
fn invalid_configs_are_rejected() {
	let base = Config::default();
	assert!(matches!(
		BlinkHashTree::<u64, u64>::with_config(base.with_bucket_capacity(65)),
		Err(ConfigError::BucketCapacity(65))
	));
	assert!(matches!(
		BlinkHashTree::<u64, u64>::with_config(base.with_hash_function_count(0)),
		Err(ConfigError::HashFunctionCount(0))
	));
	assert!(matches!(
		BlinkHashTree::<u64, u64>::with_config(base.with_inner_fanout(1)),
		Err(ConfigError::InnerFanout(1))
	));
	let err = BlinkHashTree::<u64, u64>::with_config(base.with_leaf_bucket_count(0)).unwrap_err();
	assert_eq!(err.to_string(), "a leaf needs at least one bucket, got 0");
}

#[test]
fn config_is_kept() {
	let tree: BlinkHashTree<u64, u64> = BlinkHashTree::with_config(small_config()).unwrap();
	assert_eq!(tree.config().bucket_capacity, 8);
	assert_eq!(tree.config().leaf_bucket_count, 16);
}

#[test]
fn trait_object_dispatch() {
	let tree: BlinkHashTree<u64, u64> = BlinkHashTree::with_config(tiny_config()).unwrap();
	let index: &dyn ConcurrentIndex<u64, u64> = &tree;
	for k in 0..300 {
		assert!(index.insert(k, k));
	}
	assert_eq!(index.find(&299), Some(299));
	assert_eq!(index.range_lookup(&10, 2), vec![10, 11]);
	assert!(index.height() >= 2);
}

#[cfg(feature = "serde")]
#[test]
fn config_round_trips_through_json() {
	let config = small_config().with_sampling_policy(SamplingPolicy::EntrySampled {
		samples: 16,
	});
	let json = serde_json::to_string(&config).unwrap();
	let back: Config = serde_json::from_str(&json).unwrap();
	assert_eq!(back.bucket_capacity, config.bucket_capacity);
	assert_eq!(back.sampling_policy, config.sampling_policy);
	assert_eq!(back.backoff, config.backoff);
	assert!(back.validate().is_ok());

	// missing fields fall back to defaults
	let partial: Config = serde_json::from_str(r#"{"bucket_capacity": 16}"#).unwrap();
	assert_eq!(partial.bucket_capacity, 16);
	assert_eq!(partial.leaf_bucket_count, Config::default().leaf_bucket_count);
}
