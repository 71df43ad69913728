//! Write payload framing understood by the searcher.
//!
//! ```text
//! CMD=add\x1F\n
//! field=value\x1F\n
//! ...
//! \x1E\n
//! ```

use std::fmt::Write;

const FIELD_END: &str = "\u{1F}\n";
const RECORD_END: &str = "\u{1E}\n";

/// Document-level write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Index,
	Delete,
}

impl Operation {
	fn command(self) -> &'static str {
		match self {
			Self::Index => "add",
			Self::Delete => "delete",
		}
	}
}

/// Encodes one operation over flat `fields` into a write payload.
///
/// Fields are written in iteration order.
pub fn encode<'a, I>(op: Operation, fields: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let mut out = String::new();
	let _ = write!(out, "CMD={}{FIELD_END}", op.command());
	for (key, value) in fields {
		let _ = write!(out, "{key}={value}{FIELD_END}");
	}
	out.push_str(RECORD_END);
	out
}
