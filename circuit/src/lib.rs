//! The Connected-Path protocol: handle-based virtual circuits opened over
//! the serial transport with an explicit path, demultiplexed by handle
//! (§4.4).

mod circuit;
mod demux;
mod error;
mod transport_trait;

pub use circuit::{Circuit, CircuitState, HANDSHAKE_TIMEOUT};
pub use demux::ConnectedPathDemux;
pub use error::CircuitError;
pub use transport_trait::CircuitTransport;
