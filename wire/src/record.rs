use util::NodeId;

/// Connected-Path sub-protocol discriminator inside a `ConnectedPath` record.
pub const CONNECTED_PATH_PROTOCOL: u8 = 7;

pub mod ty {
	//! One-byte record type codes (§6.1). Requests are even, replies are the
	//! adjacent odd code (`reply = request | 1`).
	pub const ECHO_REQUEST: u8 = 0;
	pub const ECHO_REPLY: u8 = 1;
	pub const FIRMWARE_REV_REQUEST: u8 = 2;
	pub const FIRMWARE_REV_REPLY: u8 = 3;
	pub const NODE_ID_REQUEST: u8 = 4;
	pub const NODE_ID_REPLY: u8 = 5;
	/// Queried only when the peer's `FirmwareRev` is `>= 1.4.3` (§4.2); the
	/// reply body is a [`crate::NodeInfo`] blob, not a `Record`-table shape,
	/// so it's parsed directly off the raw frame rather than through `decode`.
	pub const NODE_INFO_REQUEST: u8 = 6;
	pub const NODE_INFO_REPLY: u8 = 7;
	pub const DISCOVERY_REQUEST: u8 = 26;
	pub const DISCOVERY_REPLY: u8 = 27;
	pub const LOG_EVENT: u8 = 57;
	pub const UNICAST_REQUEST: u8 = 114;
	pub const MULTIPATH_REQUEST: u8 = 118;
	pub const CONNECTED_PATH_REQUEST: u8 = 122;
	pub const CONNECTED_PATH_REPLY: u8 = 123;
	/// Unsolicited, no reply expected; body is a [`crate::NodePresentation`]
	/// blob (§4.7), parsed directly rather than through [`decode`].
	pub const NODE_PRESENTATION_RX: u8 = 130;
}

pub mod disc {
	//! Discovery sub-type codes, carried as the second payload byte.
	pub const RESET_TABLE_REQUEST: u8 = 0;
	pub const RESET_TABLE_REPLY: u8 = 1;
	pub const TABLE_SIZE_REQUEST: u8 = 2;
	pub const TABLE_SIZE_REPLY: u8 = 3;
	pub const TABLE_ITEM_GET_REQUEST: u8 = 4;
	pub const TABLE_ITEM_GET_REPLY: u8 = 5;
	pub const START_DISCOVER_REQUEST: u8 = 6;
	pub const START_DISCOVER_REPLY: u8 = 7;
}

pub mod cp {
	//! Connected-Path command codes, the `Command` field of a `ConnectedPath` record.
	pub const OPEN_REQUEST: u8 = 1;
	pub const DATA_NACK: u8 = 4;
	pub const DATA_REQUEST: u8 = 5;
	pub const OPEN_ACK: u8 = 6;
	pub const OPEN_NACK: u8 = 7;
	pub const DISCONNECT_REQUEST: u8 = 8;
	pub const CLEAR_CONNECTIONS: u8 = 10;
	pub const CLEAR_INVALID_HANDLE: u8 = 11;
}

/// A discovery-table entry, as carried by `TableItemGet`'s reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryTableItem {
	pub index: u8,
	pub node_id: NodeId,
	pub rssi1: i16,
	pub rssi2: i16,
	pub flags: u16,
}

/// A decoded Connected-Path command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectedPathBody {
	/// `OpenConnectionRequest`: remote port plus the hop path beyond the local coordinator.
	Open { port: u16, path: Vec<NodeId> },
	/// Any other command: handle, sequence and raw data carried as-is.
	Generic { sequence: u16, data: Vec<u8> },
}

/// A fully decoded wire record (§6.1). Construction always goes through
/// [`encode`]; destructuring always goes through [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
	EchoRequest { text: String },
	EchoReply { text: String },
	FirmwareRevRequest,
	FirmwareRevReply { revision: String },
	NodeIdRequest,
	NodeIdReply { serial: NodeId },
	DiscoveryResetTableRequest,
	DiscoveryResetTableReply,
	DiscoveryTableSizeRequest,
	DiscoveryTableSizeReply { size: u8 },
	DiscoveryTableItemGetRequest { index: u8 },
	DiscoveryTableItemGetReply(DiscoveryTableItem),
	DiscoveryStartDiscoverRequest { mask: u8, filter: u8, slot_num: u8 },
	DiscoveryStartDiscoverReply,
	LogEvent { level: u16, from: NodeId, line: String },
	Unicast { target: NodeId, payload: Vec<u8> },
	Multipath { target: NodeId, path: Vec<NodeId>, payload: Vec<u8> },
	ConnectedPath { command: u8, handle: u16, body: ConnectedPathBody },
	/// The type code is recognized, but fields could not be parsed (truncated record).
	Truncated { ty: u8 },
	/// The type code is not in the table.
	UnknownType { ty: u8 },
}

/// Decodes a fully de-escaped frame payload into a [`Record`].
pub fn decode(data: &[u8]) -> Record {
	let Some(&t) = data.first() else {
		return Record::UnknownType { ty: 0 };
	};

	match t {
		ty::ECHO_REQUEST => Record::EchoRequest { text: utf8_tail(data) },
		ty::ECHO_REPLY => Record::EchoReply { text: utf8_tail(data) },
		ty::FIRMWARE_REV_REQUEST => Record::FirmwareRevRequest,
		ty::FIRMWARE_REV_REPLY => Record::FirmwareRevReply { revision: utf8_tail(data) },
		ty::NODE_ID_REQUEST => Record::NodeIdRequest,
		ty::NODE_ID_REPLY => decode_node_id_reply(data),
		ty::DISCOVERY_REQUEST | ty::DISCOVERY_REPLY => decode_discovery(data, t),
		ty::LOG_EVENT => decode_log_event(data),
		ty::UNICAST_REQUEST => decode_unicast(data),
		ty::MULTIPATH_REQUEST => decode_multipath(data),
		ty::CONNECTED_PATH_REQUEST | ty::CONNECTED_PATH_REPLY => decode_connected_path(data),
		other => Record::UnknownType { ty: other },
	}
}

fn utf8_tail(data: &[u8]) -> String {
	String::from_utf8_lossy(&data[1.min(data.len())..]).into_owned()
}

fn decode_node_id_reply(data: &[u8]) -> Record {
	match data.get(1..5).and_then(|b| b.try_into().ok()) {
		Some(bytes) => Record::NodeIdReply { serial: NodeId::new(u32::from_le_bytes(bytes)) },
		None => Record::Truncated { ty: ty::NODE_ID_REPLY },
	}
}

fn decode_discovery(data: &[u8], record_ty: u8) -> Record {
	let Some(&sub) = data.get(1) else {
		return Record::Truncated { ty: record_ty };
	};

	match sub {
		disc::RESET_TABLE_REQUEST if record_ty == ty::DISCOVERY_REQUEST => Record::DiscoveryResetTableRequest,
		disc::RESET_TABLE_REPLY if record_ty == ty::DISCOVERY_REPLY => Record::DiscoveryResetTableReply,
		disc::TABLE_SIZE_REQUEST if record_ty == ty::DISCOVERY_REQUEST => Record::DiscoveryTableSizeRequest,
		disc::TABLE_SIZE_REPLY if record_ty == ty::DISCOVERY_REPLY => match data.get(2) {
			Some(&size) => Record::DiscoveryTableSizeReply { size },
			None => Record::Truncated { ty: record_ty },
		},
		disc::TABLE_ITEM_GET_REQUEST if record_ty == ty::DISCOVERY_REQUEST => match data.get(2) {
			Some(&index) => Record::DiscoveryTableItemGetRequest { index },
			None => Record::Truncated { ty: record_ty },
		},
		disc::TABLE_ITEM_GET_REPLY if record_ty == ty::DISCOVERY_REPLY => decode_table_item_reply(data),
		disc::START_DISCOVER_REQUEST if record_ty == ty::DISCOVERY_REQUEST => match data.get(2..5) {
			Some(&[mask, filter, slot_num]) => Record::DiscoveryStartDiscoverRequest { mask, filter, slot_num },
			_ => Record::Truncated { ty: record_ty },
		},
		disc::START_DISCOVER_REPLY if record_ty == ty::DISCOVERY_REPLY => Record::DiscoveryStartDiscoverReply,
		_ => Record::UnknownType { ty: record_ty },
	}
}

fn decode_table_item_reply(data: &[u8]) -> Record {
	let Some(index) = data.get(2).copied() else {
		return Record::Truncated { ty: ty::DISCOVERY_REPLY };
	};
	let Some(node_id) = data.get(3..7).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes) else {
		return Record::Truncated { ty: ty::DISCOVERY_REPLY };
	};
	let Some(rssi1) = data.get(7..9).and_then(|b| b.try_into().ok()).map(i16::from_le_bytes) else {
		return Record::Truncated { ty: ty::DISCOVERY_REPLY };
	};
	let Some(rssi2) = data.get(9..11).and_then(|b| b.try_into().ok()).map(i16::from_le_bytes) else {
		return Record::Truncated { ty: ty::DISCOVERY_REPLY };
	};
	let Some(flags) = data.get(11..13).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
		return Record::Truncated { ty: ty::DISCOVERY_REPLY };
	};

	Record::DiscoveryTableItemGetReply(DiscoveryTableItem { index, node_id: NodeId::new(node_id), rssi1, rssi2, flags })
}

fn decode_log_event(data: &[u8]) -> Record {
	let Some(level) = data.get(1..3).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
		return Record::Truncated { ty: ty::LOG_EVENT };
	};
	let Some(from) = data.get(3..7).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes) else {
		return Record::Truncated { ty: ty::LOG_EVENT };
	};
	let line = String::from_utf8_lossy(&data[7.min(data.len())..]).into_owned();

	Record::LogEvent { level, from: NodeId::new(from), line }
}

fn decode_unicast(data: &[u8]) -> Record {
	// Header is six bytes: type, a reserved pad byte, then the u32 target.
	// The pad byte keeps the inner-frame inspection point (§4.3) six bytes
	// past the start of the envelope.
	let Some(target) = data.get(2..6).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes) else {
		return Record::Truncated { ty: ty::UNICAST_REQUEST };
	};
	let payload = data[6.min(data.len())..].to_vec();

	Record::Unicast { target: NodeId::new(target), payload }
}

fn decode_multipath(data: &[u8]) -> Record {
	let Some(target) = data.get(1..5).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes) else {
		return Record::Truncated { ty: ty::MULTIPATH_REQUEST };
	};
	let Some(&path_len) = data.get(5) else {
		return Record::Truncated { ty: ty::MULTIPATH_REQUEST };
	};
	let path_bytes_end = 6 + usize::from(path_len) * 4;
	let Some(path_bytes) = data.get(6..path_bytes_end) else {
		return Record::Truncated { ty: ty::MULTIPATH_REQUEST };
	};
	let path = path_bytes.chunks_exact(4).map(|c| NodeId::new(u32::from_le_bytes(c.try_into().unwrap()))).collect();
	let payload = data[path_bytes_end.min(data.len())..].to_vec();

	Record::Multipath { target: NodeId::new(target), path, payload }
}

// Header layout, both directions (§6.1): type(1) proto(1) cmd(1) handle(2)
// dummy(2) seq(2) dsize(2) = 11 bytes, then the body tail.
fn decode_connected_path(data: &[u8]) -> Record {
	let Some(&command) = data.get(2) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};
	let Some(handle) = data.get(3..5).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};

	if command == cp::OPEN_REQUEST {
		return decode_connected_path_open(data, handle);
	}

	// Dummy [5..7], sequence [7..9], data-size [9..11], then the tail.
	let Some(sequence) = data.get(7..9).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};
	let body_data = data[11.min(data.len())..].to_vec();

	Record::ConnectedPath { command, handle, body: ConnectedPathBody::Generic { sequence, data: body_data } }
}

fn decode_connected_path_open(data: &[u8], handle: u16) -> Record {
	// handle already parsed at [3..5]; dummy [5..7]; sequence [7..9]; data-size [9..11];
	// port [11..13]; path-len [13]; path entries follow, i32-encoded node ids.
	let Some(port) = data.get(11..13).and_then(|b| b.try_into().ok()).map(u16::from_le_bytes) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};
	let Some(&path_len) = data.get(13) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};
	let path_end = 14 + usize::from(path_len) * 4;
	let Some(path_bytes) = data.get(14..path_end) else {
		return Record::Truncated { ty: ty::CONNECTED_PATH_REQUEST };
	};
	let path = path_bytes.chunks_exact(4).map(|c| NodeId::new(u32::from_le_bytes(c.try_into().unwrap()))).collect();

	Record::ConnectedPath { command: cp::OPEN_REQUEST, handle, body: ConnectedPathBody::Open { port, path } }
}

/// Encodes `record` into the little-endian byte form §6.1 describes (type
/// byte stamped here; callers pass only semantic fields).
pub fn encode(record: &Record) -> Vec<u8> {
	let mut out = Vec::new();

	match record {
		Record::EchoRequest { text } => {
			out.push(ty::ECHO_REQUEST);
			out.extend_from_slice(text.as_bytes());
		}
		Record::EchoReply { text } => {
			out.push(ty::ECHO_REPLY);
			out.extend_from_slice(text.as_bytes());
		}
		Record::FirmwareRevRequest => out.push(ty::FIRMWARE_REV_REQUEST),
		Record::FirmwareRevReply { revision } => {
			out.push(ty::FIRMWARE_REV_REPLY);
			out.extend_from_slice(revision.as_bytes());
		}
		Record::NodeIdRequest => out.push(ty::NODE_ID_REQUEST),
		Record::NodeIdReply { serial } => {
			out.push(ty::NODE_ID_REPLY);
			out.extend_from_slice(&serial.raw().to_le_bytes());
		}
		Record::DiscoveryResetTableRequest => out.extend_from_slice(&[ty::DISCOVERY_REQUEST, disc::RESET_TABLE_REQUEST]),
		Record::DiscoveryResetTableReply => out.extend_from_slice(&[ty::DISCOVERY_REPLY, disc::RESET_TABLE_REPLY]),
		Record::DiscoveryTableSizeRequest => out.extend_from_slice(&[ty::DISCOVERY_REQUEST, disc::TABLE_SIZE_REQUEST]),
		Record::DiscoveryTableSizeReply { size } => out.extend_from_slice(&[ty::DISCOVERY_REPLY, disc::TABLE_SIZE_REPLY, *size]),
		Record::DiscoveryTableItemGetRequest { index } => {
			out.extend_from_slice(&[ty::DISCOVERY_REQUEST, disc::TABLE_ITEM_GET_REQUEST, *index]);
		}
		Record::DiscoveryTableItemGetReply(item) => {
			out.extend_from_slice(&[ty::DISCOVERY_REPLY, disc::TABLE_ITEM_GET_REPLY, item.index]);
			out.extend_from_slice(&item.node_id.raw().to_le_bytes());
			out.extend_from_slice(&item.rssi1.to_le_bytes());
			out.extend_from_slice(&item.rssi2.to_le_bytes());
			out.extend_from_slice(&item.flags.to_le_bytes());
		}
		Record::DiscoveryStartDiscoverRequest { mask, filter, slot_num } => {
			out.extend_from_slice(&[ty::DISCOVERY_REQUEST, disc::START_DISCOVER_REQUEST, *mask, *filter, *slot_num]);
		}
		Record::DiscoveryStartDiscoverReply => out.extend_from_slice(&[ty::DISCOVERY_REPLY, disc::START_DISCOVER_REPLY]),
		Record::LogEvent { level, from, line } => {
			out.push(ty::LOG_EVENT);
			out.extend_from_slice(&level.to_le_bytes());
			out.extend_from_slice(&from.raw().to_le_bytes());
			out.extend_from_slice(line.as_bytes());
		}
		Record::Unicast { target, payload } => {
			out.push(ty::UNICAST_REQUEST);
			out.push(0); // reserved pad, keeps the header six bytes wide
			out.extend_from_slice(&target.raw().to_le_bytes());
			out.extend_from_slice(payload);
		}
		Record::Multipath { target, path, payload } => {
			out.push(ty::MULTIPATH_REQUEST);
			out.extend_from_slice(&target.raw().to_le_bytes());
			out.push(path.len() as u8);
			for hop in path {
				out.extend_from_slice(&hop.raw().to_le_bytes());
			}
			out.extend_from_slice(payload);
		}
		Record::ConnectedPath { command, handle, body } => encode_connected_path(&mut out, *command, *handle, body),
		Record::Truncated { .. } | Record::UnknownType { .. } => {
			log::error!("attempted to encode a non-constructible record variant");
		}
	}

	out
}

fn encode_connected_path(out: &mut Vec<u8>, command: u8, handle: u16, body: &ConnectedPathBody) {
	out.push(ty::CONNECTED_PATH_REQUEST);
	out.push(CONNECTED_PATH_PROTOCOL);
	out.push(command);
	out.extend_from_slice(&handle.to_le_bytes());
	out.extend_from_slice(&0u16.to_le_bytes()); // dummy/pad

	match body {
		ConnectedPathBody::Open { port, path } => {
			out.extend_from_slice(&0u16.to_le_bytes()); // sequence, unused for Open
			let data_size = (path.len() * 4 + 3) as u16;
			out.extend_from_slice(&data_size.to_le_bytes());
			out.extend_from_slice(&port.to_le_bytes());
			out.push(path.len() as u8);
			for hop in path {
				out.extend_from_slice(&hop.raw().to_le_bytes());
			}
		}
		ConnectedPathBody::Generic { sequence, data } => {
			out.extend_from_slice(&sequence.to_le_bytes());
			out.extend_from_slice(&(data.len() as u16).to_le_bytes());
			out.extend_from_slice(data);
		}
	}
}

/// Derives the expected (type, sub-type) pair for a request record per
/// §4.3: `reply_type = request_type | 1`, and for Unicast envelopes the
/// inspection point is moved past the six-byte envelope header.
pub fn expected_reply(request: &Record) -> (u8, u8) {
	match request {
		Record::Unicast { payload, .. } => expected_reply_bytes(payload, 0),
		_ => expected_reply_bytes(&encode(request), 0),
	}
}

fn expected_reply_bytes(data: &[u8], index: usize) -> (u8, u8) {
	let Some(&t) = data.get(index) else {
		return (0, 0);
	};

	let want_type = (t & 0xFE) + 1;
	let want_sub = if want_type == ty::DISCOVERY_REPLY {
		data.get(index + 1).map_or(0, |&s| (s & 0xFE) + 1)
	} else {
		0
	};

	(want_type, want_sub)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(record: Record) {
		let encoded = encode(&record);
		assert_eq!(decode(&encoded), record);
	}

	#[test]
	fn echo_round_trips() {
		roundtrip(Record::EchoRequest { text: "CIAO".to_string() });
		roundtrip(Record::EchoReply { text: "CIAO".to_string() });
	}

	#[test]
	fn node_id_reply_round_trips() {
		roundtrip(Record::NodeIdReply { serial: NodeId::new(0x112233) });
	}

	#[test]
	fn firmware_rev_round_trips() {
		roundtrip(Record::FirmwareRevReply { revision: "1.5.0".to_string() });
	}

	#[test]
	fn discovery_table_item_round_trips() {
		roundtrip(Record::DiscoveryTableItemGetReply(DiscoveryTableItem {
			index: 3,
			node_id: NodeId::new(0xAABBCC),
			rssi1: -60,
			rssi2: -72,
			flags: 0x0001,
		}));
	}

	#[test]
	fn log_event_round_trips() {
		roundtrip(Record::LogEvent { level: 2, from: NodeId::new(0x00AB00), line: "boot".to_string() });
	}

	#[test]
	fn unicast_round_trips() {
		roundtrip(Record::Unicast { target: NodeId::new(0x0000AB), payload: vec![ty::NODE_ID_REQUEST] });
	}

	#[test]
	fn multipath_round_trips() {
		roundtrip(Record::Multipath {
			target: NodeId::new(0x000ABC),
			path: vec![NodeId::new(1), NodeId::new(2)],
			payload: vec![ty::FIRMWARE_REV_REQUEST],
		});
	}

	#[test]
	fn connected_path_generic_round_trips() {
		roundtrip(Record::ConnectedPath {
			command: cp::DATA_REQUEST,
			handle: 7,
			body: ConnectedPathBody::Generic { sequence: 42, data: vec![1, 2, 3] },
		});
	}

	#[test]
	fn connected_path_open_round_trips() {
		roundtrip(Record::ConnectedPath {
			command: cp::OPEN_REQUEST,
			handle: 9,
			body: ConnectedPathBody::Open { port: 6053, path: vec![NodeId::new(0xAB), NodeId::new(0xCD)] },
		});
	}

	#[test]
	fn unknown_type_is_reported() {
		assert_eq!(decode(&[250]), Record::UnknownType { ty: 250 });
	}

	#[test]
	fn truncated_record_is_reported() {
		assert_eq!(decode(&[ty::NODE_ID_REPLY, 0x01]), Record::Truncated { ty: ty::NODE_ID_REPLY });
	}

	#[test]
	fn expected_reply_is_request_type_or_one() {
		assert_eq!(expected_reply(&Record::FirmwareRevRequest), (ty::FIRMWARE_REV_REPLY, 0));
		assert_eq!(expected_reply(&Record::NodeIdRequest), (ty::NODE_ID_REPLY, 0));
	}

	#[test]
	fn expected_reply_for_discovery_uses_subtype_parity_too() {
		let req = Record::DiscoveryTableSizeRequest;
		assert_eq!(expected_reply(&req), (ty::DISCOVERY_REPLY, disc::TABLE_SIZE_REPLY));
	}

	#[test]
	fn expected_reply_for_unicast_skips_envelope_header() {
		let inner = Record::FirmwareRevRequest;
		let req = Record::Unicast { target: NodeId::new(1), payload: encode(&inner) };
		assert_eq!(expected_reply(&req), (ty::FIRMWARE_REV_REPLY, 0));
	}
}
