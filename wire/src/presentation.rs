use util::NodeId;

use crate::strbuf::{push_str, read_str};
use crate::{NodeKind, PresentationKind};

/// An asynchronous `NodePresentationRx` broadcast (§4.7): a remote node
/// announcing itself (or its departure) along with the repeater path it
/// was heard through. Parsed directly off the raw frame, like [`crate::NodeInfo`],
/// since its shape doesn't fit the flat `Record` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePresentation {
	pub source: NodeId,
	pub target: NodeId,
	/// Repeaters as heard, nearest-to-source first; up to N entries.
	pub repeaters: Vec<NodeId>,
	/// Per-hop radio quality (raw RSSI, dBm), one entry per edge of the
	/// finished `local -> ... -> source` path (`repeaters.len() + 1` values).
	pub quality: Vec<i16>,
	pub hostname: String,
	pub firmware: String,
	pub compile_time: String,
	pub lib_version: String,
	pub node_type: NodeKind,
	pub kind: PresentationKind,
}

impl NodePresentation {
	/// Serializes into a length-prefixed blob: source/target ids, a
	/// repeater count + i32 ids, a quality count + i16 values, then the
	/// same string/mac layout `NodeInfo` uses minus the MAC, plus a
	/// one-byte presentation kind.
	pub fn encode(&self) -> Vec<u8> {
		let mut body = Vec::new();
		body.extend_from_slice(&self.source.raw().to_le_bytes());
		body.extend_from_slice(&self.target.raw().to_le_bytes());
		body.push(self.repeaters.len() as u8);
		for hop in &self.repeaters {
			body.extend_from_slice(&hop.raw().to_le_bytes());
		}
		body.push(self.quality.len() as u8);
		for q in &self.quality {
			body.extend_from_slice(&q.to_le_bytes());
		}
		push_str(&mut body, &self.hostname);
		push_str(&mut body, &self.firmware);
		push_str(&mut body, &self.compile_time);
		push_str(&mut body, &self.lib_version);
		body.push(node_type_to_u8(self.node_type));
		body.push(match self.kind {
			PresentationKind::Hello => 0,
			PresentationKind::Goodbye => 1,
		});

		let mut out = Vec::with_capacity(body.len() + 2);
		out.extend_from_slice(&(body.len() as u16).to_le_bytes());
		out.extend_from_slice(&body);
		out
	}

	/// Parses a blob produced by [`NodePresentation::encode`]. Returns
	/// `None` on any truncation or malformed string.
	pub fn decode(data: &[u8]) -> Option<Self> {
		let declared_len = usize::from(u16::from_le_bytes(data.get(0..2)?.try_into().ok()?));
		let body = data.get(2..2 + declared_len)?;

		let mut pos = 0;
		let source = NodeId::new(u32::from_le_bytes(body.get(pos..pos + 4)?.try_into().ok()?));
		pos += 4;
		let target = NodeId::new(u32::from_le_bytes(body.get(pos..pos + 4)?.try_into().ok()?));
		pos += 4;

		let repeater_count = usize::from(*body.get(pos)?);
		pos += 1;
		let mut repeaters = Vec::with_capacity(repeater_count);
		for _ in 0..repeater_count {
			repeaters.push(NodeId::new(u32::from_le_bytes(body.get(pos..pos + 4)?.try_into().ok()?)));
			pos += 4;
		}

		let quality_count = usize::from(*body.get(pos)?);
		pos += 1;
		let mut quality = Vec::with_capacity(quality_count);
		for _ in 0..quality_count {
			quality.push(i16::from_le_bytes(body.get(pos..pos + 2)?.try_into().ok()?));
			pos += 2;
		}

		let hostname = read_str(body, &mut pos)?.to_string();
		let firmware = read_str(body, &mut pos)?.to_string();
		let compile_time = read_str(body, &mut pos)?.to_string();
		let lib_version = read_str(body, &mut pos)?.to_string();
		let node_type = node_type_from_u8(*body.get(pos)?);
		pos += 1;
		let kind = match *body.get(pos)? {
			1 => PresentationKind::Goodbye,
			_ => PresentationKind::Hello,
		};

		Some(Self { source, target, repeaters, quality, hostname, firmware, compile_time, lib_version, node_type, kind })
	}
}

fn node_type_to_u8(kind: NodeKind) -> u8 {
	match kind {
		NodeKind::Unknown => 0,
		NodeKind::Sensor => 1,
		NodeKind::Router => 2,
		NodeKind::Gateway => 3,
	}
}

fn node_type_from_u8(v: u8) -> NodeKind {
	match v {
		1 => NodeKind::Sensor,
		2 => NodeKind::Router,
		3 => NodeKind::Gateway,
		_ => NodeKind::Unknown,
	}
}
