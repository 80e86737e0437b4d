//! Persistence for a [`Network`] as a small XML graph format: one `<node>`
//! element per device, one `<edge>` element per directed edge, node and
//! edge attributes as specified in §6.3. Not GraphML — a minimal schema of
//! our own, since nothing in the available stack pulls in a GraphML crate.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use util::NodeId;

use crate::{Device, Network};

fn format_time(t: Option<DateTime<Utc>>) -> String {
	t.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
	if s.is_empty() {
		return None;
	}
	DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

fn escape(s: &str) -> String {
	s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Serializes `network` to the XML graph format. Does not touch the
/// filesystem; see [`save`] for the backup-then-write entry point.
fn to_xml(network: &Network) -> String {
	let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

	let mut root = BytesStart::new("graph");
	root.push_attribute(("local", network.local_id().to_string().as_str()));
	writer.write_event(Event::Start(root)).expect("writing to an in-memory buffer cannot fail");

	for id in network.node_ids() {
		let device = network.device(id).expect("id came from node_ids");
		let mut node = BytesStart::new("node");
		node.push_attribute(("id", id.to_string().as_str()));
		node.push_attribute(("tag", escape(&device.tag).as_str()));
		node.push_attribute(("inuse", device.in_use.to_string().as_str()));
		node.push_attribute(("discovered", device.discovered.to_string().as_str()));
		node.push_attribute(("deepsleep", device.deep_sleep.to_string().as_str()));
		node.push_attribute(("firmware", escape(&device.firmware).as_str()));
		node.push_attribute(("nodetype", escape(&device.node_type).as_str()));
		node.push_attribute(("comptime", format_time(device.compile_time).as_str()));
		node.push_attribute(("lastseen", format_time(device.last_seen).as_str()));
		writer.write_event(Event::Empty(node)).expect("writing to an in-memory buffer cannot fail");
	}

	for (from, to, weight) in network.edges() {
		let truncated = (weight * 100.0).floor() / 100.0;
		let mut edge = BytesStart::new("edge");
		edge.push_attribute(("source", from.to_string().as_str()));
		edge.push_attribute(("target", to.to_string().as_str()));
		edge.push_attribute(("weight", truncated.to_string().as_str()));
		writer.write_event(Event::Empty(edge)).expect("writing to an in-memory buffer cannot fail");
	}

	writer.write_event(Event::End(BytesEnd::new("graph"))).expect("writing to an in-memory buffer cannot fail");
	String::from_utf8(writer.into_inner()).expect("writer only ever emits ASCII/UTF-8 text")
}

fn attr_str(tag: &BytesStart, key: &str) -> Option<String> {
	tag.attributes().flatten().find(|a| a.key.as_ref() == key.as_bytes()).map(|a| {
		String::from_utf8(a.value.into_owned()).unwrap_or_default()
	})
}

fn attr_bool(tag: &BytesStart, key: &str) -> bool {
	attr_str(tag, key).map(|v| v == "true").unwrap_or(false)
}

/// Parses the XML graph format produced by [`to_xml`] / [`save`]. The
/// local device id is taken from the root element's `local` attribute;
/// every other node becomes a regular vertex.
fn from_xml(xml: &str) -> io::Result<Network> {
	let mut reader = Reader::from_str(xml);
	reader.trim_text(true);

	let mut network: Option<Network> = None;
	let mut pending_edges = Vec::new();

	loop {
		match reader.read_event() {
			Ok(Event::Eof) => break,
			Ok(Event::Start(tag)) | Ok(Event::Empty(tag)) => match tag.name().as_ref() {
				b"graph" => {
					let local: NodeId = attr_str(&tag, "local")
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing graph/@local"))?
						.parse()
						.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad graph/@local"))?;
					network = Some(Network::new(local));
				}
				b"node" => {
					let net = network
						.as_mut()
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "node outside graph"))?;
					let id: NodeId = attr_str(&tag, "id")
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "node missing id"))?
						.parse()
						.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad node id"))?;
					let device = Device {
						tag: attr_str(&tag, "tag").unwrap_or_default(),
						firmware: attr_str(&tag, "firmware").unwrap_or_default(),
						compile_time: attr_str(&tag, "comptime").and_then(|s| parse_time(&s)),
						last_seen: attr_str(&tag, "lastseen").and_then(|s| parse_time(&s)),
						in_use: attr_bool(&tag, "inuse"),
						deep_sleep: attr_bool(&tag, "deepsleep"),
						node_type: attr_str(&tag, "nodetype").unwrap_or_default(),
						discovered: attr_bool(&tag, "discovered"),
					};
					net.upsert_device(id, device);
				}
				b"edge" => {
					let source: NodeId = attr_str(&tag, "source")
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "edge missing source"))?
						.parse()
						.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad edge source"))?;
					let target: NodeId = attr_str(&tag, "target")
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "edge missing target"))?
						.parse()
						.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad edge target"))?;
					let weight: f64 = attr_str(&tag, "weight")
						.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "edge missing weight"))?
						.parse()
						.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad edge weight"))?;
					pending_edges.push((source, target, weight));
				}
				_ => {}
			},
			Ok(Event::Text(_)) | Ok(Event::End(_)) => {}
			Ok(_) => {}
			Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
		}
	}

	let mut network = network.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing graph element"))?;
	for (from, to, weight) in pending_edges {
		network.set_edge(from, to, weight);
	}
	Ok(network)
}

/// Loads a [`Network`] from `path`.
pub fn load(path: impl AsRef<Path>) -> io::Result<Network> {
	let xml = fs::read_to_string(path)?;
	from_xml(&xml)
}

/// Saves `network` to `path`. If a file already exists at `path`, it is
/// moved into a sibling `backup/` directory first, suffixed with a
/// second-resolution UTC timestamp, per §6.3.
pub fn save(network: &Network, path: impl AsRef<Path>) -> io::Result<()> {
	let path = path.as_ref();

	if path.exists() {
		backup(path)?;
	}

	let xml = to_xml(network);
	fs::write(path, xml)
}

fn backup(path: &Path) -> io::Result<()> {
	let parent = path.parent().unwrap_or_else(|| Path::new("."));
	let backup_dir = parent.join("backup");
	fs::create_dir_all(&backup_dir)?;

	let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("graph");
	let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("xml");
	let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
	let backup_path = backup_dir.join(format!("{stem}-{timestamp}.{ext}"));

	fs::rename(path, &backup_path)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_network() -> Network {
		let local = NodeId::new(0);
		let target = NodeId::new(1);
		let mut network = Network::new(local);
		let mut device = Device::new("sensor1");
		device.firmware = "1.5.0".to_string();
		device.compile_time = Some("2026-01-02T03:04:05Z".parse().unwrap());
		device.last_seen = Some("2026-01-02T04:00:00Z".parse().unwrap());
		device.discovered = true;
		network.upsert_device(target, device);
		network.set_edge(local, target, 1.2345);
		network
	}

	#[test]
	fn round_trips_nodes_and_edges() {
		let network = sample_network();
		let xml = to_xml(&network);
		let parsed = from_xml(&xml).unwrap();

		assert_eq!(parsed.local_id(), network.local_id());
		let target = NodeId::new(1);
		assert_eq!(parsed.device(target).unwrap().tag, "sensor1");
		assert_eq!(parsed.device(target).unwrap().firmware, "1.5.0");
		assert!(parsed.device(target).unwrap().discovered);
		assert_eq!(parsed.shortest_path(target), Some(vec![NodeId::new(0), target]));
	}

	#[test]
	fn edge_weight_is_truncated_to_two_decimals() {
		let network = sample_network();
		let xml = to_xml(&network);
		assert!(xml.contains("weight=\"1.23\""));
	}

	#[test]
	fn save_moves_previous_file_into_backup_dir() {
		let dir = std::env::temp_dir().join(format!("graph-xml-test-{}", std::process::id()));
		fs::create_dir_all(&dir).unwrap();
		let path = dir.join("network.xml");

		let first = Network::new(NodeId::new(0));
		save(&first, &path).unwrap();
		assert!(path.exists());

		let second = sample_network();
		save(&second, &path).unwrap();

		let backup_dir = dir.join("backup");
		let entries: Vec<_> = fs::read_dir(&backup_dir).unwrap().collect();
		assert_eq!(entries.len(), 1);

		let reloaded = load(&path).unwrap();
		assert!(reloaded.contains(NodeId::new(1)));

		fs::remove_dir_all(&dir).ok();
	}
}
