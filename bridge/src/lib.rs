//! Per-node TCP bridge servers: one listener per (node, remote_port) pair,
//! splicing accepted sockets onto Connected-Path circuits (§4.5).

mod client_bridge;
mod driver;
mod error;
mod link;
mod server;
mod socket;

pub use client_bridge::{ClientBridge, OpenError};
pub use driver::Driver;
pub use error::BindError;
pub use link::LinkFacts;
pub use server::{BridgeServer, API_REMOTE_PORT, OTA_REMOTE_PORT};
pub use socket::ClientSocket;
