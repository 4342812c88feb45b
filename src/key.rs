//! Fixed-width keys.

use std::fmt::Debug;

use crate::config::HashFn;

/// A key that can be stored in a [`crate::BlinkHashTree`].
///
/// Keys are fixed width, totally ordered and cheap to copy. Each key is
/// hashed over a stable byte representation, so the same key always lands in
/// the same buckets regardless of platform endianness.
pub trait IndexKey: Copy + Ord + Send + Sync + Debug + 'static {
	/// Filler for unoccupied bucket slots. Never observed as a key.
	const ZERO: Self;

	/// Hashes the key with `hash` under `seed`.
	fn hash_with(&self, hash: HashFn, seed: u64) -> u64;
}

macro_rules! impl_index_key_for_int {
	($($t:ty),* $(,)?) => {
		$(
			impl IndexKey for $t {
				const ZERO: Self = 0;

				#[inline]
				fn hash_with(&self, hash: HashFn, seed: u64) -> u64 {
					hash(&self.to_le_bytes(), seed)
				}
			}
		)*
	};
}

impl_index_key_for_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Byte strings compare lexicographically, which is `[u8; N]`'s `Ord`.
impl<const N: usize> IndexKey for [u8; N] {
	const ZERO: Self = [0; N];

	#[inline]
	fn hash_with(&self, hash: HashFn, seed: u64) -> u64 {
		hash(self, seed)
	}
}

/// A value stored next to a key: plain data, copied in and out of buckets.
pub trait IndexValue: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> IndexValue for T {}
