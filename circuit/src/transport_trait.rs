use serial::{CallbackToken, TypedCallback};

/// The slice of [`serial::SerialTransport`] the Connected-Path layer needs,
/// so its tests can supply a fake rather than opening real hardware.
pub trait CircuitTransport: Send + Sync {
	fn send(&self, frame: Vec<u8>);
	fn next_handle(&self) -> u16;
	fn on_type(&self, ty: u8, sub: u8, cb: TypedCallback) -> CallbackToken;
}

impl CircuitTransport for serial::SerialTransport {
	fn send(&self, frame: Vec<u8>) {
		serial::SerialTransport::send(self, frame)
	}

	fn next_handle(&self) -> u16 {
		serial::SerialTransport::next_handle(self)
	}

	fn on_type(&self, ty: u8, sub: u8, cb: TypedCallback) -> CallbackToken {
		serial::SerialTransport::on_type(self, ty, sub, cb)
	}
}
