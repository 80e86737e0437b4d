use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use circuit::ConnectedPathDemux;
use session::RoutingSource;
use util::NodeId;

use crate::client_bridge::ClientBridge;
use crate::error::BindError;
use crate::link::LinkFacts;
use crate::socket::ClientSocket;

/// Remote API port (ESPHome native API), one of the two sockets a Fleet
/// Manager stands up per in-use node (§4.5, §4.6).
pub const API_REMOTE_PORT: u16 = 6053;
/// Remote OTA port (Arduino OTA), the other of the pair.
pub const OTA_REMOTE_PORT: u16 = 3232;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A TCP listener bound for one mesh node's `remote_port`, accepting
/// connections and splicing each onto a fresh [`ClientBridge`] (§4.5
/// "Bridge Server"). One `BridgeServer` exists per (node, remote_port) pair
/// that the Fleet Manager has decided is currently reachable.
pub struct BridgeServer {
	node: NodeId,
	remote_port: u16,
	local_addr: SocketAddr,
	running: Arc<AtomicBool>,
	clients: Arc<Mutex<Vec<Arc<ClientBridge>>>>,
	accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeServer {
	/// Binds `bind_addr` and starts the accept loop. `remote_port` selects
	/// which driver (API or OTA) every accepted [`ClientBridge`] uses.
	#[allow(clippy::too_many_arguments)]
	pub fn start(
		bind_addr: SocketAddr,
		node: NodeId,
		remote_port: u16,
		demux: Arc<ConnectedPathDemux>,
		routing: Arc<dyn RoutingSource>,
		link: Arc<dyn LinkFacts>,
		stats: Arc<stats::Statistics>,
	) -> Result<Arc<Self>, BindError> {
		let listener = TcpListener::bind(bind_addr)?;
		listener.set_nonblocking(true)?;
		let local_addr = listener.local_addr()?;

		let running = Arc::new(AtomicBool::new(true));
		let clients = Arc::new(Mutex::new(Vec::new()));

		let server = Arc::new(Self { node, remote_port, local_addr, running: Arc::clone(&running), clients: Arc::clone(&clients), accept_thread: Mutex::new(None) });

		let loop_server = Arc::clone(&server);
		let handle = thread::spawn(move || loop_server.accept_loop(listener, demux, routing, link, stats));
		*server.accept_thread.lock().expect("accept_thread poisoned") = Some(handle);

		log::info!("bridge server for {node} listening on {local_addr} (remote port {remote_port})");
		Ok(server)
	}

	pub fn node(&self) -> NodeId {
		self.node
	}

	pub fn remote_port(&self) -> u16 {
		self.remote_port
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn client_count(&self) -> usize {
		self.clients.lock().expect("clients poisoned").len()
	}

	fn accept_loop(
		self: Arc<Self>,
		listener: TcpListener,
		demux: Arc<ConnectedPathDemux>,
		routing: Arc<dyn RoutingSource>,
		link: Arc<dyn LinkFacts>,
		stats: Arc<stats::Statistics>,
	) {
		while self.running.load(Ordering::Acquire) {
			match listener.accept() {
				Ok((stream, peer)) => {
					log::debug!("bridge server for {}: accepted {peer}", self.node);
					self.spawn_client(Box::new(stream), Arc::clone(&demux), Arc::clone(&routing), Arc::clone(&link), Arc::clone(&stats));
				}
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
				Err(err) => {
					log::warn!("bridge server for {}: accept failed: {err}", self.node);
					thread::sleep(ACCEPT_POLL);
				}
			}
		}
	}

	fn spawn_client(
		self: &Arc<Self>,
		socket: Box<dyn ClientSocket>,
		demux: Arc<ConnectedPathDemux>,
		routing: Arc<dyn RoutingSource>,
		link: Arc<dyn LinkFacts>,
		stats: Arc<stats::Statistics>,
	) {
		let node = self.node;
		let remote_port = self.remote_port;
		let parent = Arc::clone(self);

		let bridge = ClientBridge::open(socket, demux, routing.as_ref(), node, remote_port, link, stats, move || parent.forget(node));
		match bridge {
			Ok(bridge) => self.clients.lock().expect("clients poisoned").push(bridge),
			Err(err) => log::warn!("bridge server for {node}: could not splice accepted socket: {err}"),
		}
	}

	/// Drops every client bridge whose handle matches `node`'s closed
	/// connection. Several clients to the same node may exist concurrently,
	/// so this drops only those already marked closed rather than every
	/// entry for `node`.
	fn forget(&self, node: NodeId) {
		let mut clients = self.clients.lock().expect("clients poisoned");
		clients.retain(|c| !(c.node() == node && c.is_closed()));
	}

	/// Idempotent shutdown: stops the accept loop, joins it, then closes
	/// every remaining client (§4.5, `socketserver.go`'s `ShutDown`).
	pub fn shutdown(&self) {
		if !self.running.swap(false, Ordering::AcqRel) {
			return;
		}
		if let Some(handle) = self.accept_thread.lock().expect("accept_thread poisoned").take() {
			handle.join().ok();
		}
		for client in self.clients.lock().expect("clients poisoned").drain(..) {
			drop(client);
		}
		log::info!("bridge server for {} on {} shut down", self.node, self.local_addr);
	}
}

impl Drop for BridgeServer {
	fn drop(&mut self) {
		self.shutdown();
	}
}
