use std::io;
use std::time::Duration;

/// The minimal capability set the transport needs from a serial device:
/// blocking read/write with a settable timeout, plus the two control lines
/// used to pulse-reset the target on open. Production code plugs in
/// [`RealPort`] over the `serialport` crate; tests plug in an in-memory
/// fake that never touches real hardware.
pub trait Port: io::Read + io::Write + Send {
	fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
	fn set_dtr(&mut self, on: bool) -> io::Result<()>;
	fn set_rts(&mut self, on: bool) -> io::Result<()>;

	/// Produces a second handle to the same underlying device, so the reader
	/// and writer threads can each own one without sharing a lock across
	/// blocking calls (§5 "a serial device is exclusively owned, for its
	/// lifetime, by its reader and writer threads").
	fn try_clone_port(&self) -> io::Result<Box<dyn Port>>;
}

/// Adapts a `Box<dyn serialport::SerialPort>` to [`Port`].
pub struct RealPort(pub Box<dyn serialport::SerialPort>);

impl io::Read for RealPort {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for RealPort {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Port for RealPort {
	fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
		self.0.set_timeout(timeout).map_err(io::Error::from)
	}

	fn set_dtr(&mut self, on: bool) -> io::Result<()> {
		self.0.write_data_terminal_ready(on).map_err(io::Error::from)
	}

	fn set_rts(&mut self, on: bool) -> io::Result<()> {
		self.0.write_request_to_send(on).map_err(io::Error::from)
	}

	fn try_clone_port(&self) -> io::Result<Box<dyn Port>> {
		let cloned = self.0.try_clone().map_err(io::Error::from)?;
		Ok(Box::new(RealPort(cloned)))
	}
}

/// Opens the named serial device at `baud`, wrapped as a [`Port`].
pub fn open_real(path: &str, baud: u32) -> io::Result<Box<dyn Port>> {
	let inner = serialport::new(path, baud).timeout(Duration::from_millis(50)).open().map_err(io::Error::from)?;
	Ok(Box::new(RealPort(inner)))
}
