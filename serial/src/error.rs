use std::fmt;
use std::io;

/// §7 `TransportError`: serial read/write failure, port closed, or an
/// open-time handshake failure. Closing the port and failing any in-flight
/// session is the caller's responsibility; this enum only classifies why.
#[derive(Debug)]
pub enum TransportError {
	Io(io::Error),
	HandshakeFailed(&'static str),
	PortClosed,
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Io(err) => write!(f, "serial transport I/O error: {err}"),
			Self::HandshakeFailed(reason) => write!(f, "serial open-handshake failed: {reason}"),
			Self::PortClosed => f.write_str("serial port is closed"),
		}
	}
}

impl std::error::Error for TransportError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Io(err) => Some(err),
			_ => None,
		}
	}
}

impl From<io::Error> for TransportError {
	fn from(err: io::Error) -> Self {
		Self::Io(err)
	}
}
