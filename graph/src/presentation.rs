//! Learning the star-path network from unsolicited `NodePresentationRx`
//! broadcasts (§4.7): every presentation upserts the announcing device and
//! replaces the inbound edges along the path it was heard through.

use chrono::{DateTime, Utc};
use wire::{NodeKind, NodePresentation, PresentationKind};

use crate::{Device, Network};

fn node_type_tag(kind: NodeKind) -> &'static str {
	match kind {
		NodeKind::Unknown => "",
		NodeKind::Sensor => "sensor",
		NodeKind::Router => "router",
		NodeKind::Gateway => "gateway",
	}
}

/// Applies `presentation` to `network`: upserts the source device, rebuilds
/// the `local -> ... -> source` path with rssi-derived weights, and
/// replaces every inbound edge along the way. Dropped (no-op, returns
/// `false`) if `presentation.target` isn't this network's local device.
///
/// Edge weight is `200.0 - rssi`: rssi is typically in `[-100, -30]` dBm,
/// so this stays finite and strictly positive while keeping "stronger
/// signal, lower cost" (§3 "derived from the negative of a radio-quality
/// metric").
pub fn apply_presentation(network: &mut Network, presentation: &NodePresentation, now: DateTime<Utc>) -> bool {
	if presentation.target != network.local_id() {
		return false;
	}

	let mut device = network.device(presentation.source).cloned().unwrap_or_default();
	device.tag = presentation.hostname.clone();
	device.firmware = presentation.firmware.clone();
	device.compile_time = parse_compile_time(&presentation.compile_time);
	device.last_seen = Some(now);
	device.node_type = node_type_tag(presentation.node_type).to_string();
	device.deep_sleep = matches!(presentation.kind, PresentationKind::Goodbye);
	network.upsert_device(presentation.source, device);

	let mut path = vec![network.local_id()];
	let reversed: Vec<_> = presentation.repeaters.iter().rev().copied().collect();
	path.extend(reversed);
	path.push(presentation.source);

	for (hop_index, pair) in path.windows(2).enumerate() {
		let (u, v) = (pair[0], pair[1]);
		if !network.contains(v) {
			network.upsert_device(v, Device::new(v.to_string()));
		}
		clear_inbound_edges(network, v);
		let weight = presentation.quality.get(hop_index).map_or(200.0, |&rssi| 200.0 - f64::from(rssi));
		network.set_edge(u, v, weight);
	}

	true
}

fn clear_inbound_edges(network: &mut Network, target: util::NodeId) {
	let incoming: Vec<_> = network.edges().filter(|&(_, to, _)| to == target).map(|(from, _, _)| from).collect();
	for from in incoming {
		network.remove_edge(from, target);
	}
}

fn parse_compile_time(s: &str) -> Option<DateTime<Utc>> {
	if s.is_empty() {
		return None;
	}
	DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}
