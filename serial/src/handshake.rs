use util::{NodeId, Revision};
use wire::NodeInfo;

/// What the open-time handshake (§4.2 "On open") learned about the
/// attached node. Cached for the lifetime of the transport.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
	pub local_node: NodeId,
	pub firmware: Revision,
	pub node_info: Option<NodeInfo>,
	/// `true` when the remote MCU is the slower 8266 variant (§4.4
	/// chunking), derived from the `NodeInfo` platform string when present.
	pub is_esp8266: bool,
	/// Microseconds to transmit one byte at the port's baud rate, used by
	/// the Connected-Path chunking driver's per-chunk throttle.
	pub tx_one_byte_us: u32,
}

impl HandshakeInfo {
	pub fn tx_one_byte_us_for_baud(baud: u32) -> u32 {
		// 8 bits per byte, microseconds = bits / baud * 1_000_000.
		((8_000_000u64) / u64::from(baud.max(1))) as u32
	}
}
