//! Per-node-id traffic statistics (§4.8). Deliberately decoupled from the
//! Bridge layer: a bridge that never records a byte still works correctly,
//! it just leaves an empty entry behind.

use std::sync::Mutex;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use util::NodeId;

/// A snapshot of one node's traffic counters, as returned by
/// [`Statistics::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStats {
	pub node: NodeId,
	pub handle: u16,
	pub started_at: DateTime<Utc>,
	pub stopped_at: Option<DateTime<Utc>>,
	pub bytes_sent: u64,
	pub bytes_received: u64,
}

impl NodeStats {
	fn new(node: NodeId, handle: u16, now: DateTime<Utc>) -> Self {
		Self { node, handle, started_at: now, stopped_at: None, bytes_sent: 0, bytes_received: 0 }
	}
}

/// Live traffic counters keyed by remote node id. Allocation and lookup are
/// cheap (one short lock, O(1) map access); stats are never on the hot path
/// of a Circuit send/receive beyond incrementing a counter.
#[derive(Default)]
pub struct Statistics {
	entries: Mutex<AHashMap<NodeId, NodeStats>>,
}

impl Statistics {
	pub fn new() -> Self {
		Self { entries: Mutex::new(AHashMap::new()) }
	}

	/// Starts (or restarts) tracking `node` under `handle`, stamped `now`.
	pub fn start(&self, node: NodeId, handle: u16, now: DateTime<Utc>) {
		self.entries.lock().expect("stats poisoned").insert(node, NodeStats::new(node, handle, now));
	}

	/// Marks `node`'s entry stopped at `now`. No-op if never started.
	pub fn stop(&self, node: NodeId, now: DateTime<Utc>) {
		if let Some(entry) = self.entries.lock().expect("stats poisoned").get_mut(&node) {
			entry.stopped_at = Some(now);
		}
	}

	pub fn add_sent(&self, node: NodeId, bytes: u64) {
		if let Some(entry) = self.entries.lock().expect("stats poisoned").get_mut(&node) {
			entry.bytes_sent += bytes;
		}
	}

	pub fn add_received(&self, node: NodeId, bytes: u64) {
		if let Some(entry) = self.entries.lock().expect("stats poisoned").get_mut(&node) {
			entry.bytes_received += bytes;
		}
	}

	pub fn remove(&self, node: NodeId) {
		self.entries.lock().expect("stats poisoned").remove(&node);
	}

	/// A point-in-time copy of every tracked entry, node id ascending.
	pub fn snapshot(&self) -> Vec<NodeStats> {
		let entries = self.entries.lock().expect("stats poisoned");
		let mut out: Vec<_> = entries.values().cloned().collect();
		out.sort_by_key(|e| e.node);
		out
	}

	/// Tabulates the live set to stdout. A deliberate report, not a log
	/// line — printed directly rather than through the `log` facade.
	pub fn print(&self) {
		println!("{:<10} {:>6} {:>12} {:>12} {:<20} {:<20}", "node", "handle", "sent", "received", "started", "stopped");
		for entry in self.snapshot() {
			println!(
				"{:<10} {:>6} {:>12} {:>12} {:<20} {:<20}",
				entry.node,
				entry.handle,
				entry.bytes_sent,
				entry.bytes_received,
				entry.started_at.to_rfc3339(),
				entry.stopped_at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn start_then_add_accumulates_counters() {
		let stats = Statistics::new();
		let node = NodeId::new(0x01);
		let now = Utc::now();
		stats.start(node, 7, now);
		stats.add_sent(node, 100);
		stats.add_sent(node, 50);
		stats.add_received(node, 20);

		let snapshot = stats.snapshot();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].handle, 7);
		assert_eq!(snapshot[0].bytes_sent, 150);
		assert_eq!(snapshot[0].bytes_received, 20);
		assert!(snapshot[0].stopped_at.is_none());
	}

	#[test]
	fn stop_records_a_stop_time() {
		let stats = Statistics::new();
		let node = NodeId::new(0x01);
		let now = Utc::now();
		stats.start(node, 1, now);
		stats.stop(node, now);
		assert!(stats.snapshot()[0].stopped_at.is_some());
	}

	#[test]
	fn counters_on_unknown_node_are_silently_ignored() {
		let stats = Statistics::new();
		stats.add_sent(NodeId::new(0x99), 10);
		assert!(stats.snapshot().is_empty());
	}

	#[test]
	fn remove_drops_the_entry() {
		let stats = Statistics::new();
		let node = NodeId::new(0x01);
		stats.start(node, 1, Utc::now());
		stats.remove(node);
		assert!(stats.snapshot().is_empty());
	}

	#[test]
	fn snapshot_is_sorted_by_node_id() {
		let stats = Statistics::new();
		let now = Utc::now();
		stats.start(NodeId::new(0x05), 1, now);
		stats.start(NodeId::new(0x01), 2, now);
		let ids: Vec<_> = stats.snapshot().into_iter().map(|e| e.node).collect();
		assert_eq!(ids, vec![NodeId::new(0x01), NodeId::new(0x05)]);
	}
}
