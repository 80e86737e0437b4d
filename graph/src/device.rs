use chrono::{DateTime, Utc};

/// A mesh participant: either the local coordinator or a remote node reached
/// through it. Created on graph load, on an unknown routing presentation, or
/// on a circuit open to a previously unknown address; never destroyed except
/// by explicit removal.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
	pub tag: String,
	pub firmware: String,
	pub compile_time: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
	pub in_use: bool,
	pub deep_sleep: bool,
	pub node_type: String,
	pub discovered: bool,
}

impl Device {
	/// A freshly learned device: in use, not yet marked discovered or asleep.
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			firmware: String::new(),
			compile_time: None,
			last_seen: None,
			in_use: true,
			deep_sleep: false,
			node_type: String::new(),
			discovered: false,
		}
	}
}

impl Default for Device {
	fn default() -> Self {
		Self::new("")
	}
}
