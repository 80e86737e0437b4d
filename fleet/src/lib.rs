//! Fleet Manager: watches one or more routing graphs and keeps exactly the
//! right set of per-node [`bridge::BridgeServer`]s running (§4.6).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use bridge::{BridgeServer, LinkFacts, API_REMOTE_PORT, OTA_REMOTE_PORT};
use circuit::ConnectedPathDemux;
use graph::{Network, SharedNetwork};
use session::RoutingSource;
use util::NodeId;

/// Bind-address/port policy for newly started bridge servers (§6.5).
#[derive(Debug, Clone)]
pub struct FleetConfig {
	/// Lower bound of the derived local-port range for the API (6053) side.
	pub base_offset: u16,
	/// Width of the derived local-port range.
	pub span: u16,
	/// Overrides the per-node dynamic `127.B2.B1.B0` bind address with a
	/// single fixed address, e.g. for hosts that can't route `127.0.0.0/8`
	/// loopback aliases onto the network.
	pub bind_override: Option<Ipv4Addr>,
}

impl Default for FleetConfig {
	fn default() -> Self {
		Self { base_offset: 6100, span: 400, bind_override: None }
	}
}

impl FleetConfig {
	fn bind_addr_for(&self, node: NodeId) -> Ipv4Addr {
		self.bind_override.unwrap_or_else(|| node.to_dynamic_addr())
	}

	/// The API side gets a derived, stable-but-node-specific local port; the
	/// OTA side always binds its fixed remote port number locally too, since
	/// Arduino OTA tooling expects to find it at 3232 (§6.5 "port either
	/// fixed (3232 for OTA) or derived").
	fn local_port_for(&self, node: NodeId, remote_port: u16) -> u16 {
		match remote_port {
			OTA_REMOTE_PORT => OTA_REMOTE_PORT,
			_ => util::derive_port(&node.to_string(), self.base_offset, self.span),
		}
	}
}

/// Owns every live [`BridgeServer`] and reacts to routing-graph change
/// notifications by starting or tearing down the servers a given node
/// qualifies for (§4.6). A single instance can watch several
/// [`SharedNetwork`]s at once (the "main" and "star-path" graphs, §4.7);
/// a node stays served as long as it qualifies in at least one of them.
pub struct FleetManager {
	config: FleetConfig,
	demux: Arc<ConnectedPathDemux>,
	link: Arc<dyn LinkFacts>,
	stats: Arc<stats::Statistics>,
	networks: Mutex<Vec<Arc<SharedNetwork>>>,
	servers: Mutex<HashMap<(NodeId, u16), Arc<BridgeServer>>>,
}

impl FleetManager {
	pub fn new(config: FleetConfig, demux: Arc<ConnectedPathDemux>, link: Arc<dyn LinkFacts>, stats: Arc<stats::Statistics>) -> Arc<Self> {
		Arc::new(Self { config, demux, link, stats, networks: Mutex::new(Vec::new()), servers: Mutex::new(HashMap::new()) })
	}

	/// Registers `network` as one of the graphs this fleet manager watches,
	/// runs an immediate reconciliation against its current state (so a
	/// freshly-loaded graph is served without waiting for the next change),
	/// and wires a change observer for subsequent updates.
	pub fn watch(self: &Arc<Self>, network: Arc<SharedNetwork>) {
		self.networks.lock().expect("networks poisoned").push(Arc::clone(&network));

		network.read(|net| self.reconcile(&network, net));

		let fleet = Arc::clone(self);
		let triggering = Arc::clone(&network);
		network.register_observer(Box::new(move |net: &Network| fleet.reconcile(&triggering, net)));
	}

	/// Recomputes the wanted node set as the union of every watched
	/// network's qualifying nodes, starting servers for newcomers and
	/// shutting down servers for nodes no longer in the union (§4.6).
	fn reconcile(&self, triggering: &Arc<SharedNetwork>, triggering_net: &Network) {
		let mut wanted: HashMap<NodeId, Arc<dyn RoutingSource>> = HashMap::new();
		collect_wanted(triggering_net, triggering.clone() as Arc<dyn RoutingSource>, &mut wanted);

		let others: Vec<Arc<SharedNetwork>> = {
			let networks = self.networks.lock().expect("networks poisoned");
			networks.iter().filter(|n| !Arc::ptr_eq(n, triggering)).cloned().collect()
		};
		for other in &others {
			other.read(|net| collect_wanted(net, other.clone() as Arc<dyn RoutingSource>, &mut wanted));
		}

		let mut servers = self.servers.lock().expect("servers poisoned");

		for (&node, routing) in &wanted {
			for remote_port in [API_REMOTE_PORT, OTA_REMOTE_PORT] {
				let key = (node, remote_port);
				if servers.contains_key(&key) {
					continue;
				}
				match self.start_server(node, remote_port, Arc::clone(routing)) {
					Ok(server) => {
						servers.insert(key, server);
					}
					Err(err) => log::warn!("fleet: could not start bridge server for {node} (remote port {remote_port}): {err}"),
				}
			}
		}

		let stale: Vec<(NodeId, u16)> = servers.keys().filter(|(node, _)| !wanted.contains_key(node)).copied().collect();
		for key in stale {
			if let Some(server) = servers.remove(&key) {
				log::info!("fleet: {} no longer in any watched network, shutting down bridge on port {}", key.0, key.1);
				server.shutdown();
			}
		}
	}

	fn start_server(&self, node: NodeId, remote_port: u16, routing: Arc<dyn RoutingSource>) -> Result<Arc<BridgeServer>, bridge::BindError> {
		let addr = SocketAddr::new(IpAddr::V4(self.config.bind_addr_for(node)), self.config.local_port_for(node, remote_port));
		BridgeServer::start(addr, node, remote_port, Arc::clone(&self.demux), routing, Arc::clone(&self.link), Arc::clone(&self.stats))
	}

	/// Live server count, for diagnostics and tests.
	pub fn server_count(&self) -> usize {
		self.servers.lock().expect("servers poisoned").len()
	}

	pub fn is_serving(&self, node: NodeId, remote_port: u16) -> bool {
		self.servers.lock().expect("servers poisoned").contains_key(&(node, remote_port))
	}

	/// Shuts down every tracked server. Idempotent (each `BridgeServer::shutdown` is).
	pub fn shutdown_all(&self) {
		for (_, server) in self.servers.lock().expect("servers poisoned").drain() {
			server.shutdown();
		}
	}
}

fn collect_wanted(net: &Network, routing: Arc<dyn RoutingSource>, wanted: &mut HashMap<NodeId, Arc<dyn RoutingSource>>) {
	let local = net.local_id();
	for id in net.node_ids() {
		if id == local {
			continue;
		}
		if let Some(device) = net.device(id) {
			if device.in_use && !device.deep_sleep {
				wanted.entry(id).or_insert_with(|| Arc::clone(&routing));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use circuit::CircuitTransport;
	use graph::Device;
	use serial::{CallbackToken, TypedCallback};
	use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

	struct NullTransport {
		next_handle: AtomicU16,
		next_token: AtomicU64,
	}

	impl NullTransport {
		fn new() -> Arc<Self> {
			Arc::new(Self { next_handle: AtomicU16::new(1), next_token: AtomicU64::new(1) })
		}
	}

	impl CircuitTransport for NullTransport {
		fn send(&self, _frame: Vec<u8>) {}

		fn next_handle(&self) -> u16 {
			self.next_handle.fetch_add(1, Ordering::SeqCst)
		}

		fn on_type(&self, _ty: u8, _sub: u8, _cb: TypedCallback) -> CallbackToken {
			CallbackToken(self.next_token.fetch_add(1, Ordering::SeqCst))
		}
	}

	struct FixedLink;

	impl LinkFacts for FixedLink {
		fn is_esp8266(&self) -> bool {
			false
		}

		fn tx_one_byte_us(&self) -> u32 {
			0
		}
	}

	fn manager() -> Arc<FleetManager> {
		let transport = NullTransport::new();
		let demux = ConnectedPathDemux::new(transport);
		FleetManager::new(FleetConfig::default(), demux, Arc::new(FixedLink), Arc::new(stats::Statistics::new()))
	}

	#[test]
	fn qualifying_node_gets_two_servers() {
		let local = NodeId::new(0);
		let target = NodeId::new(0x01_0203);
		let network = Arc::new(SharedNetwork::new(local));
		network.mutate(false, |net| {
			net.upsert_device(target, Device::new("a"));
			net.set_edge(local, target, 1.0);
		});

		let fleet = manager();
		fleet.watch(network);

		assert!(fleet.is_serving(target, API_REMOTE_PORT));
		assert!(fleet.is_serving(target, OTA_REMOTE_PORT));
		assert_eq!(fleet.server_count(), 2);
		fleet.shutdown_all();
	}

	#[test]
	fn deep_sleep_node_is_not_served() {
		let local = NodeId::new(0);
		let target = NodeId::new(0x01_0203);
		let network = Arc::new(SharedNetwork::new(local));
		network.mutate(false, |net| {
			let mut device = Device::new("a");
			device.deep_sleep = true;
			net.upsert_device(target, device);
			net.set_edge(local, target, 1.0);
		});

		let fleet = manager();
		fleet.watch(network);

		assert_eq!(fleet.server_count(), 0);
	}

	#[test]
	fn node_dropped_from_graph_tears_servers_down() {
		let local = NodeId::new(0);
		let target = NodeId::new(0x04_0506);
		let network = Arc::new(SharedNetwork::new(local));
		network.mutate(false, |net| {
			net.upsert_device(target, Device::new("a"));
			net.set_edge(local, target, 1.0);
		});

		let fleet = manager();
		fleet.watch(Arc::clone(&network));
		assert_eq!(fleet.server_count(), 2);

		network.mutate(true, |net| {
			net.remove_device(target);
		});

		assert_eq!(fleet.server_count(), 0);
	}

	#[test]
	fn node_served_by_one_of_two_watched_networks_survives_the_others_change() {
		let local = NodeId::new(0);
		let target = NodeId::new(0x07_0809);

		let main = Arc::new(SharedNetwork::new(local));
		let star = Arc::new(SharedNetwork::new(local));
		star.mutate(false, |net| {
			net.upsert_device(target, Device::new("a"));
			net.set_edge(local, target, 1.0);
		});

		let fleet = manager();
		fleet.watch(Arc::clone(&main));
		fleet.watch(Arc::clone(&star));
		assert_eq!(fleet.server_count(), 2);

		// A change on the unrelated network that adds a not-yet-in-use device
		// must not tear the star-path-served node down.
		main.mutate(true, |net| {
			let mut unrelated = Device::new("unrelated");
			unrelated.in_use = false;
			net.upsert_device(NodeId::new(0x0A_0B0C), unrelated);
		});
		assert_eq!(fleet.server_count(), 2);

		fleet.shutdown_all();
	}

	#[test]
	fn local_port_for_ota_is_always_fixed() {
		let config = FleetConfig::default();
		let a = config.local_port_for(NodeId::new(1), OTA_REMOTE_PORT);
		let b = config.local_port_for(NodeId::new(2), OTA_REMOTE_PORT);
		assert_eq!(a, OTA_REMOTE_PORT);
		assert_eq!(b, OTA_REMOTE_PORT);
	}

	#[test]
	fn local_port_for_api_is_derived_and_stable() {
		let config = FleetConfig::default();
		let a1 = config.local_port_for(NodeId::new(0x01_0203), API_REMOTE_PORT);
		let a2 = config.local_port_for(NodeId::new(0x01_0203), API_REMOTE_PORT);
		assert_eq!(a1, a2);
		assert!(a1 >= config.base_offset && a1 < config.base_offset + config.span);
	}
}
