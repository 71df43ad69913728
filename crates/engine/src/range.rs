//! Hash-space partitioning across shards.

use std::fmt;

use tether_rpc::PartitionRange;

use crate::{Error, Result};

/// Size of the routing hash space; ids run from 0 to `HASH_SPACE - 1`.
pub const HASH_SPACE: u32 = 65536;

/// One shard of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId {
	pub table: String,
	pub index: u32,
}

impl ShardId {
	pub fn new(table: impl Into<String>, index: u32) -> Self {
		Self {
			table: table.into(),
			index,
		}
	}
}

impl fmt::Display for ShardId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}][{}]", self.table, self.index)
	}
}

/// Range of the hash space owned by shard `index` of `count`.
///
/// The space is split into `count` near-equal slices; the first
/// `HASH_SPACE % count` slices are one id larger.
pub fn partition_range(count: u32, index: u32) -> Result<PartitionRange> {
	if count == 0 || count > HASH_SPACE || index >= count {
		return Err(Error::InvalidShard { index, count });
	}
	let base = HASH_SPACE / count;
	let extra = HASH_SPACE % count;
	let lo = index * base + index.min(extra);
	let len = base + u32::from(index < extra);
	Ok(PartitionRange { lo, hi: lo + len - 1 })
}

/// Directory name of a partition under a generation: `partition_<lo>_<hi>`.
pub fn partition_dir_name(range: PartitionRange) -> String {
	format!("partition_{}_{}", range.lo, range.hi)
}

/// Partition id used in the target-state document: `<lo>_<hi>`.
pub fn partition_id(range: PartitionRange) -> String {
	format!("{}_{}", range.lo, range.hi)
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn single_shard_owns_everything() {
		let range = partition_range(1, 0).unwrap();
		assert_eq!(range, PartitionRange { lo: 0, hi: 65535 });
		assert_eq!(partition_dir_name(range), "partition_0_65535");
		assert_eq!(partition_id(range), "0_65535");
	}

	#[test]
	fn two_shards_split_evenly() {
		assert_eq!(partition_range(2, 0).unwrap(), PartitionRange { lo: 0, hi: 32767 });
		assert_eq!(partition_range(2, 1).unwrap(), PartitionRange { lo: 32768, hi: 65535 });
	}

	#[test]
	fn out_of_range_shard_is_rejected() {
		assert!(matches!(partition_range(3, 3), Err(Error::InvalidShard { index: 3, count: 3 })));
		assert!(partition_range(0, 0).is_err());
	}

	proptest! {
		#[test]
		fn ranges_tile_the_hash_space(count in 1u32..=512) {
			let mut next = 0u32;
			for index in 0..count {
				let range = partition_range(count, index).unwrap();
				prop_assert_eq!(range.lo, next);
				prop_assert!(range.hi >= range.lo);
				next = range.hi + 1;
			}
			prop_assert_eq!(next, HASH_SPACE);
		}
	}
}
