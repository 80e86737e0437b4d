//! Shared length-prefixed string helpers for the handshake-time blobs
//! (`NodeInfo`, `NodePresentation`) that don't fit the flat `Record` table.

pub(crate) fn push_str(out: &mut Vec<u8>, s: &str) {
	out.extend_from_slice(&(s.len() as u16).to_le_bytes());
	out.extend_from_slice(s.as_bytes());
}

pub(crate) fn read_str<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a str> {
	let len = usize::from(u16::from_le_bytes(data.get(*pos..*pos + 2)?.try_into().ok()?));
	*pos += 2;
	let bytes = data.get(*pos..*pos + len)?;
	*pos += len;
	std::str::from_utf8(bytes).ok()
}
