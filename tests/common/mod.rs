//! Shared helpers for the integration tests.
//!
//! # Logging
//!
//! Internal events are only emitted with the `tracing` feature:
//!
//! ```bash
//! RUST_LOG=blinkhash=debug cargo test --features tracing --test concurrency -- --nocapture
//! ```

#![allow(dead_code)]

use std::sync::Once;

use blinkhash::Config;
use tracing_subscriber::EnvFilter;

/// Ensures the subscriber is only installed once per test binary.
static INIT: Once = Once::new();

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_tracing() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
	});
}

/// Hash that maps a `u64` key to itself, so a key's bucket is `key % B`.
pub fn identity_hash(bytes: &[u8], _seed: u64) -> u64 {
	let mut word = [0u8; 8];
	word.copy_from_slice(&bytes[..8]);
	u64::from_le_bytes(word)
}

/// Small nodes with one probe slot: splits and linked buckets show up after
/// a few dozen inserts.
pub fn tiny_config() -> Config {
	Config::default()
		.with_bucket_capacity(4)
		.with_leaf_bucket_count(8)
		.with_inner_fanout(4)
		.with_hash_function_count(1)
		.with_probe_slots(1)
}

/// Like [`tiny_config`] but with the default hash and two probe sequences.
pub fn small_config() -> Config {
	Config::default()
		.with_bucket_capacity(8)
		.with_leaf_bucket_count(16)
		.with_inner_fanout(8)
		.with_probe_slots(2)
}
