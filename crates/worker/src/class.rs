/// Execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Periodic background work such as refresh ticks and health checks.
	Background,
	/// Long-lived reclamation workflows that poll and remove runtime data.
	Reclaim,
	/// Blocking filesystem or process work executed on the blocking pool.
	IoBlocking,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Background => "background",
			Self::Reclaim => "reclaim",
			Self::IoBlocking => "io_blocking",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
