/// Node role, as carried by a [`NodeInfo`] blob and a routing presentation.
///
/// The pack this protocol was distilled from carries node type as an opaque
/// integer from its own firmware; the four roles below are this
/// implementation's own closed enumeration of what that integer means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Unknown,
	Sensor,
	Router,
	Gateway,
}

impl NodeKind {
	fn from_u8(v: u8) -> Self {
		match v {
			1 => Self::Sensor,
			2 => Self::Router,
			3 => Self::Gateway,
			_ => Self::Unknown,
		}
	}

	fn to_u8(self) -> u8 {
		match self {
			Self::Unknown => 0,
			Self::Sensor => 1,
			Self::Router => 2,
			Self::Gateway => 3,
		}
	}
}

/// Which half of a node's lifecycle a routing presentation announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationKind {
	Hello,
	Goodbye,
}

/// The handshake-time node description (§6.2), queried only when the firmware
/// revision reported by `FirmwareRev` is `>= 1.4.3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
	pub hostname: String,
	pub firmware_version: String,
	pub compile_time: String,
	pub lib_version: String,
	pub mac_address: [u8; 6],
	pub platform: String,
	pub board: String,
	pub node_type: NodeKind,
}

use crate::strbuf::{push_str, read_str};

impl NodeInfo {
	/// Serializes into the length-prefixed blob delivered over the wire:
	/// an outer `u16` total length, followed by length-prefixed UTF-8
	/// strings, a fixed 6-byte MAC, and a one-byte node-type tag.
	pub fn encode(&self) -> Vec<u8> {
		let mut body = Vec::new();
		push_str(&mut body, &self.hostname);
		push_str(&mut body, &self.firmware_version);
		push_str(&mut body, &self.compile_time);
		push_str(&mut body, &self.lib_version);
		body.extend_from_slice(&self.mac_address);
		push_str(&mut body, &self.platform);
		push_str(&mut body, &self.board);
		body.push(self.node_type.to_u8());

		let mut out = Vec::with_capacity(body.len() + 2);
		out.extend_from_slice(&(body.len() as u16).to_le_bytes());
		out.extend_from_slice(&body);
		out
	}

	/// Parses a blob produced by [`NodeInfo::encode`]. Returns `None` on any
	/// truncation or malformed string.
	pub fn decode(data: &[u8]) -> Option<Self> {
		let declared_len = usize::from(u16::from_le_bytes(data.get(0..2)?.try_into().ok()?));
		let body = data.get(2..2 + declared_len)?;

		let mut pos = 0;
		let hostname = read_str(body, &mut pos)?.to_string();
		let firmware_version = read_str(body, &mut pos)?.to_string();
		let compile_time = read_str(body, &mut pos)?.to_string();
		let lib_version = read_str(body, &mut pos)?.to_string();
		let mac_address: [u8; 6] = body.get(pos..pos + 6)?.try_into().ok()?;
		pos += 6;
		let platform = read_str(body, &mut pos)?.to_string();
		let board = read_str(body, &mut pos)?.to_string();
		let node_type = NodeKind::from_u8(*body.get(pos)?);

		Some(Self { hostname, firmware_version, compile_time, lib_version, mac_address, platform, board, node_type })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> NodeInfo {
		NodeInfo {
			hostname: "sensor1".to_string(),
			firmware_version: "1.5.0".to_string(),
			compile_time: "2026-01-02T03:04:05Z".to_string(),
			lib_version: "2.3.1".to_string(),
			mac_address: [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01],
			platform: "esp32".to_string(),
			board: "esp32dev".to_string(),
			node_type: NodeKind::Sensor,
		}
	}

	#[test]
	fn round_trips() {
		let info = sample();
		let encoded = info.encode();
		assert_eq!(NodeInfo::decode(&encoded), Some(info));
	}

	#[test]
	fn rejects_truncated_blob() {
		let mut encoded = sample().encode();
		encoded.truncate(encoded.len() - 1);
		assert_eq!(NodeInfo::decode(&encoded), None);
	}
}
