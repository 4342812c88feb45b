//! One-byte key fingerprints and parallel fingerprint matching.
//!
//! Each bucket stores one fingerprint byte per slot. A lookup compares the
//! probe fingerprint against all of them at once and only confirms the
//! matching slots with a full key comparison.
//!
//! On x86_64 the comparison uses AVX2 (32 lanes) or SSE2 (16 lanes), picked
//! at runtime; elsewhere a scalar loop computes the same mask.

/// Derives a fingerprint from a key's hash.
///
/// The top byte is used because the bucket index is taken from the low bits.
#[inline]
pub fn fingerprint(hash: u64) -> u8 {
	(hash >> 56) as u8
}

/// Returns a mask with bit `i` set when `fingerprints[i] == target`.
///
/// `fingerprints` holds at most 64 bytes.
#[inline]
pub fn match_mask(fingerprints: &[u8], target: u8) -> u64 {
	debug_assert!(fingerprints.len() <= 64);

	#[cfg(target_arch = "x86_64")]
	{
		if is_x86_feature_detected!("avx2") {
			// SAFETY: AVX2 availability was just checked
			return unsafe { match_mask_avx2(fingerprints, target) };
		}
		// SSE2 is part of the x86_64 baseline
		// SAFETY: always available on x86_64
		unsafe { match_mask_sse2(fingerprints, target) }
	}

	#[cfg(not(target_arch = "x86_64"))]
	{
		match_mask_scalar(fingerprints, target)
	}
}

/// Portable fallback, also used for the tail that does not fill a vector.
#[inline]
pub fn match_mask_scalar(fingerprints: &[u8], target: u8) -> u64 {
	fingerprints
		.iter()
		.enumerate()
		.filter(|(_, fp)| **fp == target)
		.fold(0u64, |mask, (i, _)| mask | (1u64 << i))
}

/// # Safety
/// Caller must ensure SSE2 is available.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn match_mask_sse2(fingerprints: &[u8], target: u8) -> u64 {
	use std::arch::x86_64::*;

	let needle = _mm_set1_epi8(target as i8);
	let mut mask = 0u64;
	let mut offset = 0;
	while offset + 16 <= fingerprints.len() {
		let lane = _mm_loadu_si128(fingerprints.as_ptr().add(offset) as *const __m128i);
		let hits = _mm_movemask_epi8(_mm_cmpeq_epi8(lane, needle)) as u32 as u64;
		mask |= hits << offset;
		offset += 16;
	}
	if offset == fingerprints.len() {
		return mask;
	}
	mask | (match_mask_scalar(&fingerprints[offset..], target) << offset)
}

/// # Safety
/// Caller must ensure AVX2 is available (use `is_x86_feature_detected!`).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn match_mask_avx2(fingerprints: &[u8], target: u8) -> u64 {
	use std::arch::x86_64::*;

	let needle = _mm256_set1_epi8(target as i8);
	let mut mask = 0u64;
	let mut offset = 0;
	while offset + 32 <= fingerprints.len() {
		let lane = _mm256_loadu_si256(fingerprints.as_ptr().add(offset) as *const __m256i);
		let hits = _mm256_movemask_epi8(_mm256_cmpeq_epi8(lane, needle)) as u32 as u64;
		mask |= hits << offset;
		offset += 32;
	}
	if offset == fingerprints.len() {
		return mask;
	}
	mask | (match_mask_sse2(&fingerprints[offset..], target) << offset)
}

#[cfg(all(test, not(loom)))]
mod tests {
	use super::*;
	use rand::prelude::*;

	#[test]
	fn scalar_marks_every_match() {
		let fps = [3u8, 7, 3, 0, 3];
		assert_eq!(match_mask_scalar(&fps, 3), 0b10101);
		assert_eq!(match_mask_scalar(&fps, 9), 0);
		assert_eq!(match_mask_scalar(&[], 0), 0);
	}

	#[test]
	fn dispatch_agrees_with_scalar_for_every_width() {
		let mut rng = StdRng::seed_from_u64(42);
		for len in 0..=64 {
			let fps: Vec<u8> = (0..len).map(|_| rng.random_range(0..4u8)).collect();
			for target in 0..4u8 {
				assert_eq!(
					match_mask(&fps, target),
					match_mask_scalar(&fps, target),
					"len {len} target {target}"
				);
			}
		}
	}

	#[test]
	fn fingerprint_uses_top_byte() {
		assert_eq!(fingerprint(0xab00_0000_0000_00ff), 0xab);
	}
}
