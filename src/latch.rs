//! Versioned latch used for optimistic lock coupling.
//!
//! Every node and every leaf bucket is guarded by one 64-bit word:
//!
//! ```text
//!  63                                   2   1   0
//! ┌───────────────────────────────────────┬───┬───┐
//! │               version                 │ L │ O │
//! └───────────────────────────────────────┴───┴───┘
//!   L = locked, O = obsolete
//! ```
//!
//! Readers never write to the word. They take a snapshot, read the protected
//! data, and validate afterwards with [`OptimisticGuard::recheck`]; a changed
//! word means the reads may be torn and the caller must unwind with
//! [`error::Error::Unwind`]. Writers set the locked bit with a CAS and clear it
//! again on release, which moves the version forward, so a snapshot taken
//! before a write can never validate after it.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error;
use crate::sync::{fence, AtomicU64, Ordering, UnsafeCell};

/// Bit marking a latch whose data has been retired.
const OBSOLETE: u64 = 0b01;

/// Bit held while a writer owns the latch.
const LOCKED: u64 = 0b10;

/// A latch that grants lock-free optimistic reads and exclusive writes to the
/// data it owns.
pub struct VersionLatch<T> {
	version: AtomicU64,
	data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for VersionLatch<T> {}
unsafe impl<T: Send + Sync> Sync for VersionLatch<T> {}

impl<T> VersionLatch<T> {
	/// Creates a new, unlocked latch at version zero.
	#[inline]
	pub fn new(data: T) -> VersionLatch<T> {
		VersionLatch {
			version: AtomicU64::new(0),
			data: UnsafeCell::new(data),
		}
	}

	/// Returns the raw latch word.
	#[inline]
	pub fn version(&self) -> u64 {
		self.version.load(Ordering::Acquire)
	}

	/// Returns `true` while a writer holds the latch.
	#[inline]
	pub fn is_locked(&self) -> bool {
		self.version() & LOCKED != 0
	}

	/// Returns `true` once the latch has been released as obsolete.
	#[inline]
	pub fn is_obsolete(&self) -> bool {
		self.version() & OBSOLETE != 0
	}

	/// Takes an optimistic snapshot, unwinding if the latch is locked or
	/// obsolete.
	#[inline]
	pub fn optimistic(&self) -> error::Result<OptimisticGuard<'_, T>> {
		let version = self.version.load(Ordering::Acquire);
		if version & (LOCKED | OBSOLETE) != 0 {
			return Err(error::Error::Unwind);
		}
		Ok(OptimisticGuard {
			latch: self,
			data: self.data.get(),
			version,
		})
	}

	/// Takes an optimistic snapshot, spinning while a writer holds the latch.
	///
	/// Unwinds only if the latch is obsolete.
	#[inline]
	pub fn optimistic_or_spin(&self) -> error::Result<OptimisticGuard<'_, T>> {
		self.optimistic_or_spin_with(BackoffPolicy::default())
	}

	/// [`optimistic_or_spin`](Self::optimistic_or_spin) waiting under `policy`.
	#[inline(never)]
	pub fn optimistic_or_spin_with(&self, policy: BackoffPolicy) -> error::Result<OptimisticGuard<'_, T>> {
		let mut backoff = Backoff::new(policy);
		loop {
			let version = self.version.load(Ordering::Acquire);
			if version & OBSOLETE != 0 {
				return Err(error::Error::Unwind);
			}
			if version & LOCKED == 0 {
				return Ok(OptimisticGuard {
					latch: self,
					data: self.data.get(),
					version,
				});
			}
			if !backoff.spin() {
				backoff.reset();
			}
		}
	}

	/// Locks the latch for writing, spinning until it is acquired.
	///
	/// Returns an RAII guard which releases the lock and bumps the version
	/// when dropped.
	#[inline]
	pub fn exclusive(&self) -> ExclusiveGuard<'_, T> {
		self.exclusive_with(BackoffPolicy::default())
	}

	/// [`exclusive`](Self::exclusive) waiting under `policy`.
	pub fn exclusive_with(&self, policy: BackoffPolicy) -> ExclusiveGuard<'_, T> {
		let mut backoff = Backoff::new(policy);
		loop {
			if let Some(guard) = self.try_exclusive() {
				return guard;
			}
			if !backoff.spin() {
				backoff.reset();
			}
		}
	}

	/// Makes a single attempt at locking the latch for writing.
	#[inline]
	pub fn try_exclusive(&self) -> Option<ExclusiveGuard<'_, T>> {
		let version = self.version.load(Ordering::Relaxed);
		if version & LOCKED != 0 {
			return None;
		}
		self.version
			.compare_exchange(version, version | LOCKED, Ordering::Acquire, Ordering::Relaxed)
			.ok()
			.map(|_| ExclusiveGuard {
				latch: self,
				data: self.data.get(),
				version: version | LOCKED,
			})
	}

	/// Reads the protected data without a snapshot.
	///
	/// # Safety
	///
	/// The caller must rule out concurrent writes to every field it reads,
	/// either because the field never changes after construction or because
	/// it holds the locks that writers of that field must hold.
	#[inline]
	pub(crate) unsafe fn peek(&self) -> &T {
		&*self.data.get()
	}

	/// Consumes the latch and returns the protected data.
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T> std::convert::AsMut<T> for VersionLatch<T> {
	#[inline]
	fn as_mut(&mut self) -> &mut T {
		unsafe { &mut *self.data.get() }
	}
}

/// A snapshot of a latch used to perform optimistic reads and validate them.
pub struct OptimisticGuard<'a, T> {
	latch: &'a VersionLatch<T>,
	data: *const T,
	version: u64,
}

unsafe impl<'a, T: Sync> Sync for OptimisticGuard<'a, T> {}

impl<'a, T> OptimisticGuard<'a, T> {
	/// Validates every read performed through this guard since it was taken.
	///
	/// If a writer has locked the latch in the meantime, returns
	/// [`error::Error::Unwind`] so the caller can discard what it read.
	#[inline]
	pub fn recheck(&self) -> error::Result<()> {
		fence(Ordering::Acquire);
		if self.version != self.latch.version.load(Ordering::Relaxed) {
			return Err(error::Error::Unwind);
		}
		Ok(())
	}

	/// Upgrades the snapshot to a write lock, succeeding only if no write has
	/// happened since the snapshot was taken.
	#[inline]
	pub fn to_exclusive(self) -> error::Result<ExclusiveGuard<'a, T>> {
		let locked = self.version | LOCKED;
		match self.latch.version.compare_exchange(
			self.version,
			locked,
			Ordering::Acquire,
			Ordering::Relaxed,
		) {
			Ok(_) => Ok(ExclusiveGuard {
				latch: self.latch,
				data: self.data as *mut T,
				version: locked,
			}),
			Err(_) => Err(error::Error::Unwind),
		}
	}

	/// The latch word this snapshot was taken at.
	#[inline]
	pub fn version(&self) -> u64 {
		self.version
	}

	/// Returns a reference to the original latch.
	pub fn latch(&self) -> &'a VersionLatch<T> {
		self.latch
	}
}

impl<'a, T> Clone for OptimisticGuard<'a, T> {
	fn clone(&self) -> Self {
		OptimisticGuard {
			latch: self.latch,
			data: self.data,
			version: self.version,
		}
	}
}

impl<'a, T> std::ops::Deref for OptimisticGuard<'a, T> {
	type Target = T;

	fn deref(&self) -> &T {
		unsafe { &*self.data }
	}
}

/// RAII structure used to release the write lock of a latch when dropped.
pub struct ExclusiveGuard<'a, T> {
	latch: &'a VersionLatch<T>,
	data: *mut T,
	version: u64,
}

unsafe impl<'a, T: Sync> Sync for ExclusiveGuard<'a, T> {}

impl<'a, T> ExclusiveGuard<'a, T> {
	/// Releases the lock, returning an [`OptimisticGuard`] at the new version.
	#[inline]
	pub fn unlock(self) -> OptimisticGuard<'a, T> {
		let new_version = self.version + LOCKED;
		let latch = self.latch;
		let data = self.data;
		// The version is bumped in drop
		drop(self);
		OptimisticGuard {
			latch,
			data,
			version: new_version,
		}
	}

	/// Releases the lock and marks the latch obsolete, so that every later
	/// optimistic read unwinds.
	#[inline]
	pub fn unlock_obsolete(self) {
		self.latch.version.store(self.version + LOCKED + OBSOLETE, Ordering::Release);
		std::mem::forget(self);
	}

	/// Returns a reference to the original latch.
	pub fn latch(&self) -> &'a VersionLatch<T> {
		self.latch
	}
}

impl<'a, T> Drop for ExclusiveGuard<'a, T> {
	#[inline]
	fn drop(&mut self) {
		// locked + LOCKED carries into the version bits and clears the lock
		self.latch.version.store(self.version + LOCKED, Ordering::Release);
	}
}

impl<'a, T> std::ops::Deref for ExclusiveGuard<'a, T> {
	type Target = T;

	#[inline]
	fn deref(&self) -> &T {
		unsafe { &*self.data }
	}
}

impl<'a, T> std::ops::DerefMut for ExclusiveGuard<'a, T> {
	#[inline]
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.data }
	}
}
