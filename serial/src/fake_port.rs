//! An in-memory stand-in for a real serial device, used only by tests in
//! this crate. `try_clone_port` shares the same queues, mirroring how
//! `RealPort::try_clone` hands the reader and writer threads two handles to
//! one underlying file descriptor.
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::port::Port;

#[derive(Clone)]
pub struct FakePort {
	inbound: Arc<Mutex<VecDeque<u8>>>,
	outbound: Arc<Mutex<Vec<u8>>>,
	read_timeout: Arc<Mutex<Duration>>,
	dtr: Arc<Mutex<bool>>,
	rts: Arc<Mutex<bool>>,
}

impl FakePort {
	pub fn new() -> Self {
		Self {
			inbound: Arc::new(Mutex::new(VecDeque::new())),
			outbound: Arc::new(Mutex::new(Vec::new())),
			read_timeout: Arc::new(Mutex::new(Duration::from_millis(20))),
			dtr: Arc::new(Mutex::new(false)),
			rts: Arc::new(Mutex::new(false)),
		}
	}

	pub fn push_inbound(&self, bytes: &[u8]) {
		self.inbound.lock().expect("inbound poisoned").extend(bytes.iter().copied());
	}

	pub fn take_outbound(&self) -> Vec<u8> {
		std::mem::take(&mut *self.outbound.lock().expect("outbound poisoned"))
	}
}

impl Default for FakePort {
	fn default() -> Self {
		Self::new()
	}
}

impl io::Read for FakePort {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let mut inbound = self.inbound.lock().expect("inbound poisoned");
		match inbound.pop_front() {
			Some(b) => {
				buf[0] = b;
				Ok(1)
			}
			None => {
				let timeout = *self.read_timeout.lock().expect("read_timeout poisoned");
				drop(inbound);
				std::thread::sleep(timeout);
				Err(io::Error::new(io::ErrorKind::TimedOut, "no data available"))
			}
		}
	}
}

impl io::Write for FakePort {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.outbound.lock().expect("outbound poisoned").extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl Port for FakePort {
	fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
		*self.read_timeout.lock().expect("read_timeout poisoned") = timeout;
		Ok(())
	}

	fn set_dtr(&mut self, on: bool) -> io::Result<()> {
		*self.dtr.lock().expect("dtr poisoned") = on;
		Ok(())
	}

	fn set_rts(&mut self, on: bool) -> io::Result<()> {
		*self.rts.lock().expect("rts poisoned") = on;
		Ok(())
	}

	fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
		Ok(Box::new(self.clone()))
	}
}
