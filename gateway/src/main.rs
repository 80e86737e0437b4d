//! Process wiring for the mesh gateway (§4.11 ambient): installs the
//! logger, resolves configuration, opens the serial transport, loads the
//! two routing graphs, and starts the fleet manager. This binary is a thin
//! stand-in for the external CLI/INI loader and admin surface — it does
//! not itself implement any mesh-protocol behavior.

mod config;
mod logging;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use circuit::ConnectedPathDemux;
use config::GatewayConfig;
use fleet::{FleetConfig, FleetManager};
use graph::SharedNetwork;
use serial::Reconnector;
use session::SessionEngine;
use util::NodeId;
use wire::{ty, NodePresentation, ProtocolSelector, Record};

static RUNNING: AtomicBool = AtomicBool::new(true);

const RECONNECT_POLL: Duration = Duration::from_millis(200);
const STAR_PATH_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const MAIN_LOOP_TICK: Duration = Duration::from_secs(5);

fn main() {
	let config = GatewayConfig::from_env();
	logging::install(config.verbose);

	ctrlc::set_handler(|| {
		log::info!("gateway: shutdown requested");
		RUNNING.store(false, Ordering::SeqCst);
	})
	.expect("failed to install ctrl-c handler");

	let transport = match open_transport(&config) {
		Some(transport) => transport,
		None => {
			log::info!("gateway: shutdown requested before the serial port came up");
			return;
		}
	};
	log::info!("gateway: {} online ({})", transport.local_node(), transport.firmware());

	let main_network = Arc::new(load_network(transport.local_node(), &config.main_graph_path));
	let star_path_network = Arc::new(load_network(transport.local_node(), &config.star_path_graph_path));

	let star_path_save = {
		let star_path_network = Arc::clone(&star_path_network);
		let path = config.star_path_graph_path.clone();
		thread::spawn(move || {
			while RUNNING.load(Ordering::SeqCst) {
				thread::sleep(STAR_PATH_SAVE_INTERVAL);
				star_path_network.read(|network| {
					if let Err(err) = graph::save(network, &path) {
						log::warn!("gateway: could not persist star-path network: {err}");
					}
				});
			}
		})
	};

	transport.on_raw_type(
		ty::NODE_PRESENTATION_RX,
		Arc::new({
			let star_path_network = Arc::clone(&star_path_network);
			move |payload: &[u8]| match NodePresentation::decode(payload) {
				Some(presentation) => {
					star_path_network.apply_presentation(&presentation, Utc::now());
				}
				None => log::warn!("gateway: malformed NodePresentationRx, dropping"),
			}
		}),
	);

	let stats = Arc::new(stats::Statistics::new());
	let demux = ConnectedPathDemux::new(transport.clone());

	let fleet_config = FleetConfig { base_offset: config.base_offset, span: config.span, bind_override: config.bind_override };
	let fleet = FleetManager::new(fleet_config, Arc::clone(&demux), transport.clone(), Arc::clone(&stats));
	fleet.watch(Arc::clone(&main_network));
	fleet.watch(Arc::clone(&star_path_network));

	if let Some(target) = config.target {
		ping_target(&transport, &main_network, target, config.node_to_debug);
	}

	while RUNNING.load(Ordering::SeqCst) {
		thread::sleep(MAIN_LOOP_TICK);
		stats.print();
	}

	log::info!("gateway: shutting down");
	fleet.shutdown_all();
	save_network(&main_network, &config.main_graph_path);
	save_network(&star_path_network, &config.star_path_graph_path);
	transport.shutdown();
	let _ = star_path_save.join();
}

/// Opens the serial port, retrying on the [`Reconnector`]'s cool-down (§7)
/// until it succeeds or a shutdown is requested.
fn open_transport(config: &GatewayConfig) -> Option<Arc<serial::SerialTransport>> {
	let reconnector = Reconnector::new(config.port.clone(), config.baud);
	while RUNNING.load(Ordering::SeqCst) {
		match reconnector.try_open() {
			Some(Ok(transport)) => return Some(transport),
			Some(Err(err)) => log::error!("gateway: could not open {}: {err}", config.port),
			None => {}
		}
		thread::sleep(RECONNECT_POLL);
	}
	None
}

/// Loads a persisted routing graph from `path` if present, else starts an
/// empty one rooted at `local` (§6.3).
fn load_network(local: NodeId, path: &Path) -> SharedNetwork {
	if path.exists() {
		match graph::load(path) {
			Ok(network) => return SharedNetwork::from_network(network),
			Err(err) => log::warn!("gateway: could not load {}: {err}, starting empty", path.display()),
		}
	}
	SharedNetwork::new(local)
}

fn save_network(network: &SharedNetwork, path: &Path) {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			let _ = fs::create_dir_all(parent);
		}
	}
	network.read(|network| {
		if let Err(err) = graph::save(network, path) {
			log::warn!("gateway: could not persist {}: {err}", path.display());
		}
	});
}

/// Ad-hoc operation for `target`/`-t` (§6.4): a single echo over the
/// Session Engine, logged at the configured verbosity (`node_to_debug`
/// simply raises interest in this one node's traffic, there being no
/// per-target log filter in the minimal logger).
fn ping_target(transport: &Arc<serial::SerialTransport>, routing: &Arc<SharedNetwork>, target: NodeId, node_to_debug: Option<NodeId>) {
	if node_to_debug == Some(target) {
		log::debug!("gateway: tracing target {target}");
	}
	let engine = SessionEngine::new(transport.clone(), Arc::clone(routing) as Arc<dyn session::RoutingSource>);
	let request = Record::EchoRequest { text: "gateway".to_string() };
	match engine.send_recv(request, ProtocolSelector::Auto, target, engine.default_timeout()) {
		Ok(reply) => log::info!("gateway: echo to {target} replied: {reply:?}"),
		Err(err) => log::warn!("gateway: echo to {target} failed: {err}"),
	}
}
