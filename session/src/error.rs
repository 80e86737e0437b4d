use std::fmt;

use wire::Record;

/// §4.3/§7: why a `send_recv`-flavored call failed to produce a usable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
	/// No reply matched before the timeout elapsed.
	Timeout,
	/// The routing graph has no usable path to the target.
	NoRoute,
	/// A reply arrived but didn't parse into anything sensible.
	Malformed(Record),
}

impl fmt::Display for SessionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Timeout => f.write_str("session timed out waiting for a reply"),
			Self::NoRoute => f.write_str("no route to target node"),
			Self::Malformed(record) => write!(f, "malformed reply: {record:?}"),
		}
	}
}

impl std::error::Error for SessionError {}
