use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::{OpenConfig, SerialTransport};

/// The 10-second cool-down §7 specifies between a failed open and the next
/// retry, wrapped as a small state machine rather than a bare sleep so the
/// gateway's main loop can poll it on its own schedule instead of blocking.
pub struct Reconnector {
	path: String,
	baud: u32,
	cooldown: Duration,
	last_attempt: Mutex<Option<Instant>>,
}

impl Reconnector {
	pub fn new(path: impl Into<String>, baud: u32) -> Self {
		Self { path: path.into(), baud, cooldown: Duration::from_secs(10), last_attempt: Mutex::new(None) }
	}

	/// `None` means the cool-down hasn't elapsed yet; the caller should try
	/// again later. `Some` carries the result of an actual open attempt,
	/// successful or not.
	pub fn try_open(&self) -> Option<Result<Arc<SerialTransport>, TransportError>> {
		let mut last_attempt = self.last_attempt.lock().expect("last_attempt poisoned");
		if let Some(at) = *last_attempt {
			if at.elapsed() < self.cooldown {
				return None;
			}
		}
		*last_attempt = Some(Instant::now());
		drop(last_attempt);

		let config = OpenConfig { baud: self.baud, ..OpenConfig::default() };
		Some(SerialTransport::open(&self.path, config))
	}
}
