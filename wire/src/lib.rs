//! The serial wire format: byte-stuffed framing with an optional CRC,
//! little-endian typed records, and the Unicast/Multipath envelopes used to
//! route a record through intermediate hops.

mod crc;
mod envelope;
mod framing;
mod nodeinfo;
mod presentation;
mod record;
mod strbuf;

pub use crc::{crc16, crc16_update, CRC16_INIT};
pub use envelope::{resolve_selector, wrap, ProtocolSelector};
pub use framing::{encode_frame, DecodeEvent, Decoder, END, ESCAPE, LOG_START, LOG_STOP, START, START_CRC};
pub use nodeinfo::{NodeInfo, NodeKind, PresentationKind};
pub use presentation::NodePresentation;
pub use record::{cp, disc, ty, ConnectedPathBody, DiscoveryTableItem, Record, CONNECTED_PATH_PROTOCOL};

pub use record::{decode, encode, expected_reply};
