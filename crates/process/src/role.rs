use serde::Deserialize;

/// One supervised process role.
///
/// A process belongs to the role when its full command line contains
/// `signature`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessRole {
	pub name: String,
	/// Shell command that starts the role, run through `sh -c`.
	pub start_command: String,
	pub signature: String,
}

impl ProcessRole {
	pub fn new(name: impl Into<String>, start_command: impl Into<String>, signature: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			start_command: start_command.into(),
			signature: signature.into(),
		}
	}

	/// Returns `true` if `command_line` belongs to this role.
	pub fn matches(&self, command_line: &str) -> bool {
		!self.signature.is_empty() && command_line.contains(&self.signature)
	}

	pub(crate) fn validate(&self) -> crate::Result<()> {
		if self.start_command.trim().is_empty() || self.signature.trim().is_empty() {
			return Err(crate::Error::InvalidRole(self.name.clone()));
		}
		Ok(())
	}
}
