use std::time::Duration;

/// Exponential backoff schedule for one logical RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
	/// Delay before the second attempt.
	pub base: Duration,
	/// Growth factor applied to each subsequent delay.
	pub multiplier: u32,
	/// Upper bound on calls per logical request, first call included.
	pub max_attempts: u32,
	/// Cap on any single delay.
	pub max_delay: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(50),
			multiplier: 2,
			max_attempts: 10,
			max_delay: Duration::from_secs(5),
		}
	}
}

impl BackoffPolicy {
	/// Sleeps taken between attempts: `max_attempts - 1` values.
	pub fn delays(&self) -> Delays {
		Delays {
			next: self.base.min(self.max_delay),
			remaining: self.max_attempts.saturating_sub(1),
			multiplier: self.multiplier,
			max_delay: self.max_delay,
		}
	}
}

/// Iterator over the delays of a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Delays {
	next: Duration,
	remaining: u32,
	multiplier: u32,
	max_delay: Duration,
}

impl Iterator for Delays {
	type Item = Duration;

	fn next(&mut self) -> Option<Duration> {
		if self.remaining == 0 {
			return None;
		}
		self.remaining -= 1;
		let current = self.next;
		self.next = current.saturating_mul(self.multiplier).min(self.max_delay);
		Some(current)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(self.remaining as usize, Some(self.remaining as usize))
	}
}

impl ExactSizeIterator for Delays {}
