use core::time::Duration;
use std::{cmp, ops::Range};

/// Reconnection back-off.
#[derive(Clone, Debug)]
pub struct HoldOff {
	min: Duration,
	max: Duration,
	cur: Option<Duration>,
}

impl HoldOff {
	pub fn new(r: Range<Duration>) -> Self {
		Self {
			min: r.start,
			max: r.end,
			cur: None,
		}
	}

	/// Forget any previous failures. The next call to
	/// [`increase_with`](Self::increase_with) starts again from `min`.
	pub fn reset(&mut self) {
		self.cur = None;
	}

	/// Increase the hold-off period, returning the new period.
	///
	/// The first increase after a reset yields `min`. If the new hold-off
	/// period is more than `max` then `max` is used.
	pub fn increase_with(&mut self, f: impl FnOnce(Duration) -> Duration) -> Duration {
		let next = match self.cur {
			None => self.min,
			Some(cur) => cmp::min(cmp::max(cur, f(cur)), self.max),
		};
		self.cur = Some(next);
		next
	}

	#[inline]
	pub fn current(&self) -> Option<Duration> {
		self.cur
	}
}
