use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// What a [`Session`] resolved to: the matching reply payload, or a timeout.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
	Reply(Vec<u8>),
	Timeout,
}

/// A one-shot, single-producer/single-consumer result slot with a deadline
/// (§9 design notes: "a one-shot completion primitive is sufficient, no
/// re-arm"). The producer (serial reader, or the idle-tick timeout check)
/// calls [`Completion::signal`] at most once; the consumer (the
/// `send_recv` caller) calls [`Completion::wait`].
struct Completion {
	slot: Mutex<Option<SessionOutcome>>,
	cv: Condvar,
}

impl Completion {
	fn new() -> Self {
		Self { slot: Mutex::new(None), cv: Condvar::new() }
	}

	fn signal(&self, outcome: SessionOutcome) {
		let mut slot = self.slot.lock().expect("completion slot poisoned");
		if slot.is_none() {
			*slot = Some(outcome);
			self.cv.notify_all();
		}
	}

	fn wait(&self, deadline: Instant) -> SessionOutcome {
		let mut slot = self.slot.lock().expect("completion slot poisoned");
		loop {
			if let Some(outcome) = slot.take() {
				return outcome;
			}
			let now = Instant::now();
			if now >= deadline {
				return SessionOutcome::Timeout;
			}
			let (guard, _) = self.cv.wait_timeout(slot, deadline - now).expect("completion slot poisoned");
			slot = guard;
		}
	}
}

/// A pending or active request/reply exchange (§3 "Session"). `frame` is
/// already framed (escaped, sentineled, CRC-stamped if applicable) and
/// ready to write to the device as-is. `expected` is `None` for a
/// fire-and-forget session (§4.3 `send`); `Some((type, sub_type))` marks it
/// awaitable, with `sub_type == 0` meaning "don't check the second byte".
pub struct Session {
	pub frame: Vec<u8>,
	pub expected: Option<(u8, u8)>,
	pub timeout: Duration,
	sent_at: Mutex<Option<Instant>>,
	completion: Completion,
}

impl Session {
	pub fn fire_and_forget(frame: Vec<u8>) -> Self {
		Self { frame, expected: None, timeout: Duration::ZERO, sent_at: Mutex::new(None), completion: Completion::new() }
	}

	pub fn awaitable(frame: Vec<u8>, expected: (u8, u8), timeout: Duration) -> Self {
		Self { frame, expected: Some(expected), timeout, sent_at: Mutex::new(None), completion: Completion::new() }
	}

	pub fn is_awaitable(&self) -> bool {
		self.expected.is_some()
	}

	/// Marks the session in-flight at `now`, called by the writer once the
	/// frame has been written to the device.
	pub fn mark_sent(&self, now: Instant) {
		*self.sent_at.lock().expect("sent_at poisoned") = Some(now);
	}

	/// Whether `now` is past this session's deadline. `false` if the
	/// session was never marked sent (still queued).
	pub fn is_expired(&self, now: Instant) -> bool {
		match *self.sent_at.lock().expect("sent_at poisoned") {
			Some(sent_at) => now.duration_since(sent_at) > self.timeout,
			None => false,
		}
	}

	/// Completes the session with a matched reply payload.
	pub fn complete_with_reply(&self, payload: Vec<u8>) {
		self.completion.signal(SessionOutcome::Reply(payload));
	}

	/// Completes the session with a timeout (or transport shutdown, which
	/// is surfaced identically per §7).
	pub fn complete_with_timeout(&self) {
		self.completion.signal(SessionOutcome::Timeout);
	}

	/// Blocks the caller until the session completes or `self.timeout`
	/// elapses past `mark_sent`'s `now`. Only meaningful for awaitable
	/// sessions; callers of `send` never call this.
	pub fn wait(&self, sent_at: Instant) -> SessionOutcome {
		self.completion.wait(sent_at + self.timeout)
	}
}
