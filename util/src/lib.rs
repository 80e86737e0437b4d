//! Shared primitives with no dependency on the rest of the workspace:
//! node-id formatting, port-assignment hashing, and firmware revision
//! parsing.

mod hash;
mod node;
mod revision;

pub use hash::{derive_port, fnv1a32};
pub use node::{NodeId, ParseNodeIdError};
pub use revision::{supports_node_info, ParseRevisionError, Revision};
