use std::time::Duration;

use serial::SessionOutcome;

/// The slice of [`serial::SerialTransport`] the session engine actually
/// needs, so its tests can supply a fake rather than opening real hardware.
pub trait FrameTransport: Send + Sync {
	fn send(&self, frame: Vec<u8>);
	fn send_recv(&self, frame: Vec<u8>, expected: (u8, u8), timeout: Duration) -> SessionOutcome;
}

impl FrameTransport for serial::SerialTransport {
	fn send(&self, frame: Vec<u8>) {
		serial::SerialTransport::send(self, frame)
	}

	fn send_recv(&self, frame: Vec<u8>, expected: (u8, u8), timeout: Duration) -> SessionOutcome {
		serial::SerialTransport::send_recv(self, frame, expected, timeout)
	}
}
