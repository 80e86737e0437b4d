//! The Serial Transport: frame reassembly, the open-time handshake, and the
//! single-in-flight-slot session queue that everything above it (sessions,
//! Connected-Path circuits) is built on.

mod error;
#[cfg(test)]
mod fake_port;
mod handshake;
mod port;
mod reconnect;
mod session;
mod transport;

pub use error::TransportError;
pub use handshake::HandshakeInfo;
pub use port::{open_real, Port, RealPort};
pub use reconnect::Reconnector;
pub use session::{Session, SessionOutcome};
pub use transport::{CallbackToken, OpenConfig, RawCallback, SerialTransport, TypedCallback, DEFAULT_TIMEOUT};
