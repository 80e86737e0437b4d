use std::fmt;

/// §4.4 failure modes for opening or using a Circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitError {
	/// The routing graph has no path to the target.
	NoRoute,
	/// The resolved path had length ≤ 1 — opening a circuit to the local
	/// coordinator itself is not supported.
	LocalTarget,
	/// `send_data` was called outside the `Active` state.
	NotActive,
}

impl fmt::Display for CircuitError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoRoute => f.write_str("no route to circuit target"),
			Self::LocalTarget => f.write_str("cannot open a circuit to the local coordinator"),
			Self::NotActive => f.write_str("circuit is not active"),
		}
	}
}

impl std::error::Error for CircuitError {}
