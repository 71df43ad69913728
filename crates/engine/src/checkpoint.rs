//! Time to durable-checkpoint interpolation.

use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_MAX_SAMPLES: usize = 4096;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Local durable checkpoint observed at a wall-clock time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointSample {
	pub timestamp: i64,
	pub checkpoint: i64,
}

/// Bounded, time-ordered history answering "which checkpoint was durable at time t".
#[derive(Debug, Clone)]
pub struct CheckpointCalc {
	samples: VecDeque<CheckpointSample>,
	max_samples: usize,
	max_age_ms: i64,
}

impl Default for CheckpointCalc {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_SAMPLES, DEFAULT_MAX_AGE)
	}
}

impl CheckpointCalc {
	pub fn new(max_samples: usize, max_age: Duration) -> Self {
		Self {
			samples: VecDeque::new(),
			max_samples: max_samples.max(1),
			max_age_ms: i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX),
		}
	}

	/// Appends a sample. Returns `false` and keeps the history unchanged when
	/// `timestamp` is older than the newest sample.
	pub fn add_checkpoint(&mut self, timestamp: i64, checkpoint: i64) -> bool {
		if let Some(newest) = self.samples.back()
			&& timestamp < newest.timestamp
		{
			tracing::warn!(timestamp, newest = newest.timestamp, checkpoint, "checkpoint.sample_out_of_order");
			return false;
		}
		self.samples.push_back(CheckpointSample { timestamp, checkpoint });
		self.trim();
		true
	}

	/// Checkpoint of the latest sample taken at or before `timestamp`, or
	/// `None` when every sample is newer.
	pub fn get_checkpoint(&self, timestamp: i64) -> Option<i64> {
		let idx = self.samples.partition_point(|s| s.timestamp <= timestamp);
		idx.checked_sub(1).map(|i| self.samples[i].checkpoint)
	}

	pub fn len(&self) -> usize {
		self.samples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.samples.is_empty()
	}

	pub fn newest(&self) -> Option<CheckpointSample> {
		self.samples.back().copied()
	}

	fn trim(&mut self) {
		while self.samples.len() > self.max_samples {
			self.samples.pop_front();
		}
		let Some(newest) = self.samples.back() else {
			return;
		};
		let boundary = newest.timestamp.saturating_sub(self.max_age_ms);
		// Keep the newest sample at or before the boundary so lookups there still resolve.
		while self.samples.len() > 1 && self.samples[1].timestamp <= boundary {
			self.samples.pop_front();
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn floor_lookup_between_samples() {
		let mut calc = CheckpointCalc::default();
		assert!(calc.add_checkpoint(1000, 5));
		assert!(calc.add_checkpoint(2000, 9));
		assert_eq!(calc.get_checkpoint(1500), Some(5));
		assert_eq!(calc.get_checkpoint(2000), Some(9));
		assert_eq!(calc.get_checkpoint(500), None);
	}

	#[test]
	fn out_of_order_sample_is_rejected() {
		let mut calc = CheckpointCalc::default();
		calc.add_checkpoint(2000, 9);
		assert!(!calc.add_checkpoint(1999, 10));
		assert_eq!(calc.len(), 1);
		assert_eq!(calc.get_checkpoint(5000), Some(9));
	}

	#[test]
	fn equal_timestamps_resolve_to_the_latest() {
		let mut calc = CheckpointCalc::default();
		calc.add_checkpoint(1000, 1);
		calc.add_checkpoint(1000, 2);
		assert_eq!(calc.get_checkpoint(1000), Some(2));
	}

	#[test]
	fn count_bound_drops_oldest() {
		let mut calc = CheckpointCalc::new(3, DEFAULT_MAX_AGE);
		for t in 1..=5 {
			calc.add_checkpoint(t * 10, t);
		}
		assert_eq!(calc.len(), 3);
		assert_eq!(calc.get_checkpoint(25), None);
		assert_eq!(calc.get_checkpoint(30), Some(3));
	}

	#[test]
	fn age_bound_keeps_boundary_sample() {
		let mut calc = CheckpointCalc::new(100, Duration::from_millis(1000));
		calc.add_checkpoint(0, 1);
		calc.add_checkpoint(500, 2);
		calc.add_checkpoint(800, 3);
		calc.add_checkpoint(2000, 4);
		// boundary = 1000: sample at 800 is the newest at or before it.
		assert_eq!(calc.len(), 2);
		assert_eq!(calc.get_checkpoint(1000), Some(3));
		assert_eq!(calc.get_checkpoint(700), None);
	}

	proptest! {
		#[test]
		fn lookup_matches_linear_scan(
			steps in proptest::collection::vec((0i64..50, 0i64..1000), 1..64),
			probe in -10i64..3000,
		) {
			let mut calc = CheckpointCalc::new(usize::MAX, Duration::MAX);
			let mut samples = Vec::new();
			let mut t = 0i64;
			for (dt, cp) in steps {
				t += dt;
				prop_assert!(calc.add_checkpoint(t, cp));
				samples.push((t, cp));
			}
			let expected = samples.iter().rev().find(|(ts, _)| *ts <= probe).map(|(_, cp)| *cp);
			prop_assert_eq!(calc.get_checkpoint(probe), expected);
		}
	}
}
