use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// The slice of a connected TCP socket the Client Bridge needs: full-duplex
/// I/O, a read deadline, and a way to hand the write half to a second
/// thread. Narrowed so bridge tests can supply an in-memory fake instead of
/// a real socket.
pub trait ClientSocket: Read + Write + Send {
	fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
	fn try_clone(&self) -> io::Result<Box<dyn ClientSocket>>;
}

impl ClientSocket for TcpStream {
	fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
		TcpStream::set_read_timeout(self, Some(timeout))
	}

	fn try_clone(&self) -> io::Result<Box<dyn ClientSocket>> {
		Ok(Box::new(TcpStream::try_clone(self)?))
	}
}
