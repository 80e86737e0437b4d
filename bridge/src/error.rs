use std::fmt;
use std::io;

/// Failure modes for standing up a [`crate::BridgeServer`] (§4.5, §7).
#[derive(Debug)]
pub enum BindError {
	/// The listener socket could not be bound.
	Io(io::Error),
}

impl fmt::Display for BindError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Io(e) => write!(f, "bind failed: {e}"),
		}
	}
}

impl std::error::Error for BindError {}

impl From<io::Error> for BindError {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}
