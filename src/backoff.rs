//! Spin-then-yield backoff and the optimistic retry loop.

use crate::error;
use crate::sync::{spin_loop, yield_now};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How long a contended operation busy-spins before it starts yielding its
/// time slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BackoffPolicy {
	/// Consecutive failures answered with a CPU spin hint.
	pub spin_limit: u32,
	/// Consecutive failures, counted from zero, after which the counter wraps.
	/// Failures between `spin_limit` and `yield_limit` yield the thread.
	pub yield_limit: u32,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		BackoffPolicy {
			spin_limit: 10,
			yield_limit: 20,
		}
	}
}

/// Simple spin wait driven by a [`BackoffPolicy`].
pub(crate) struct Backoff {
	counter: u32,
	policy: BackoffPolicy,
}

impl Backoff {
	pub(crate) fn new(policy: BackoffPolicy) -> Self {
		Backoff {
			counter: 0,
			policy,
		}
	}

	/// Waits once. Returns `false` when the yield budget is used up and the
	/// caller should reset.
	pub(crate) fn spin(&mut self) -> bool {
		if self.counter < self.policy.spin_limit {
			self.counter += 1;
			spin_loop();
			true
		} else if self.counter < self.policy.yield_limit {
			self.counter += 1;
			yield_now();
			true
		} else {
			yield_now();
			false
		}
	}

	pub(crate) fn reset(&mut self) {
		self.counter = 0;
	}

	pub(crate) fn is_yielding(&self) -> bool {
		self.counter >= self.policy.spin_limit
	}
}

/// Runs `op` until it stops unwinding, backing off between attempts.
///
/// This is the single place where [`error::Error::Unwind`] is absorbed; every
/// public operation of the tree funnels its optimistic attempt through here.
pub(crate) fn retry<R>(policy: BackoffPolicy, mut op: impl FnMut() -> error::Result<R>) -> R {
	let mut backoff = Backoff::new(policy);
	loop {
		match op() {
			Ok(result) => return result,
			Err(error::Error::Unwind) => {
				let was_yielding = backoff.is_yielding();
				if !backoff.spin() {
					backoff.reset();
				} else if !was_yielding && backoff.is_yielding() {
					trace_log!(spin_limit = policy.spin_limit, "retry loop escalated to yielding");
				}
			}
		}
	}
}
