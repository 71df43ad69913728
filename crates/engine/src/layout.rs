//! Runtime data layout written by the search engine.
//!
//! ```text
//! <root>/<table>/generation_0/partition_<lo>_<hi>/version.<N>
//! ```
//!
//! Each `version.<N>` file is a JSON object whose `timestamp` field is the
//! engine's persist time in microseconds.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tether_rpc::PartitionRange;

use crate::range::partition_dir_name;
use crate::{Error, Result};

const GENERATION_DIR: &str = "generation_0";
const VERSION_PREFIX: &str = "version.";

/// Newest on-disk version of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMarker {
	pub version: i64,
	/// Persist time in milliseconds, if the marker carries one.
	pub timestamp_ms: Option<i64>,
}

#[derive(Deserialize)]
struct VersionFile {
	#[serde(default)]
	timestamp: Option<i64>,
}

/// Paths under the engine's runtime data root.
#[derive(Debug, Clone)]
pub struct RuntimeLayout {
	root: PathBuf,
}

impl RuntimeLayout {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn table_dir(&self, table: &str) -> PathBuf {
		self.root.join(table)
	}

	pub fn partition_dir(&self, table: &str, range: PartitionRange) -> PathBuf {
		self.table_dir(table).join(GENERATION_DIR).join(partition_dir_name(range))
	}

	/// Reads the newest version marker of a partition.
	///
	/// A missing directory or a directory without markers yields `None`.
	pub fn read_marker(&self, table: &str, range: PartitionRange) -> Result<Option<VersionMarker>> {
		read_marker(&self.partition_dir(table, range))
	}
}

/// Reads the highest-numbered `version.<N>` file in `dir`.
pub fn read_marker(dir: &Path) -> Result<Option<VersionMarker>> {
	let Some(version) = max_numbered_entry(dir, VERSION_PREFIX)? else {
		return Ok(None);
	};

	let path = dir.join(format!("{VERSION_PREFIX}{version}"));
	let raw = std::fs::read(&path).map_err(|err| Error::io(&path, err))?;
	let file: VersionFile = serde_json::from_slice(&raw).map_err(|source| Error::Json { path, source })?;
	Ok(Some(VersionMarker {
		version,
		timestamp_ms: file.timestamp.map(|us| us / 1000),
	}))
}

/// Largest `N` among entries of `dir` named `<prefix><N>` with `N` purely
/// decimal. A missing directory has none.
pub fn max_numbered_entry(dir: &Path, prefix: &str) -> Result<Option<i64>> {
	let entries = match std::fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
		Err(err) => return Err(Error::io(dir, err)),
	};
	let mut max: Option<i64> = None;
	for entry in entries {
		let entry = entry.map_err(|err| Error::io(dir, err))?;
		let name = entry.file_name();
		if let Some(n) = name.to_str().and_then(|n| n.strip_prefix(prefix)).and_then(parse_numeric) {
			max = Some(max.map_or(n, |m| m.max(n)));
		}
	}
	Ok(max)
}

fn parse_numeric(s: &str) -> Option<i64> {
	if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	s.parse().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn range() -> PartitionRange {
		PartitionRange { lo: 0, hi: 65535 }
	}

	#[test]
	fn missing_partition_has_no_marker() {
		let dir = tempfile::tempdir().unwrap();
		let layout = RuntimeLayout::new(dir.path());
		assert_eq!(layout.read_marker("orders", range()).unwrap(), None);
	}

	#[test]
	fn newest_marker_wins_and_timestamp_is_scaled() {
		let dir = tempfile::tempdir().unwrap();
		let layout = RuntimeLayout::new(dir.path());
		let part = layout.partition_dir("orders", range());
		std::fs::create_dir_all(&part).unwrap();
		std::fs::write(part.join("version.2"), r#"{"timestamp": 2000000}"#).unwrap();
		std::fs::write(part.join("version.10"), r#"{"timestamp": 9000000, "segments": []}"#).unwrap();
		std::fs::write(part.join("version.x"), "garbage").unwrap();
		std::fs::write(part.join("schema.json"), "{}").unwrap();

		let marker = layout.read_marker("orders", range()).unwrap().unwrap();
		assert_eq!(
			marker,
			VersionMarker {
				version: 10,
				timestamp_ms: Some(9000)
			}
		);
		assert!(part.ends_with("orders/generation_0/partition_0_65535"));
	}

	#[test]
	fn marker_without_timestamp() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("version.0"), "{}").unwrap();
		assert_eq!(
			read_marker(dir.path()).unwrap(),
			Some(VersionMarker {
				version: 0,
				timestamp_ms: None
			})
		);
	}

	#[test]
	fn numbered_entries_ignore_other_names() {
		let dir = tempfile::tempdir().unwrap();
		for name in ["3", "12", "7a", "-1", "config", "version.40"] {
			std::fs::create_dir(dir.path().join(name)).unwrap();
		}
		assert_eq!(max_numbered_entry(dir.path(), "").unwrap(), Some(12));
		assert_eq!(max_numbered_entry(dir.path(), VERSION_PREFIX).unwrap(), Some(40));

		let empty = tempfile::tempdir().unwrap();
		assert_eq!(max_numbered_entry(empty.path(), "").unwrap(), None);
		assert_eq!(max_numbered_entry(&empty.path().join("gone"), "").unwrap(), None);
	}
}
