use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use session::RoutingSource;
use util::NodeId;
use wire::{cp, ConnectedPathBody, Record};

use crate::demux::ConnectedPathDemux;
use crate::error::CircuitError;

/// §4.4 Circuit state machine. `Init` never reappears once `open` starts it
/// moving; there is no re-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
	Init,
	HandshakeStarted,
	Active,
	Invalid,
}

type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
type TransitionCallback = Arc<dyn Fn() + Send + Sync>;

/// The window a Circuit may sit in `Init`/`HandshakeStarted` before a
/// timeout-watcher (owned by the Bridge layer, §4.5 step 5) should close it.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// A per-handle virtual connection over the Connected-Path protocol. Owned
/// by whichever Bridge opened it; unregisters itself from the demux when
/// dropped (§3 "A Circuit unregisters itself from the demultiplexer on disposal").
pub struct Circuit {
	handle: u16,
	target: NodeId,
	remote_port: u16,
	state: Mutex<CircuitState>,
	sequence: Mutex<u16>,
	opened_at: Instant,
	on_data: Mutex<Option<DataCallback>>,
	on_active: Mutex<Option<TransitionCallback>>,
	on_invalid: Mutex<Option<TransitionCallback>>,
	demux: Arc<ConnectedPathDemux>,
}

impl Circuit {
	/// Opens a circuit to `target`'s `remote_port`: resolves the path via
	/// `routing`, allocates a handle, and sends `OpenConnectionRequest` with
	/// the path minus the local coordinator.
	pub fn open(demux: Arc<ConnectedPathDemux>, routing: &dyn RoutingSource, target: NodeId, remote_port: u16) -> Result<Arc<Self>, CircuitError> {
		let path = routing.shortest_path(target).ok_or(CircuitError::NoRoute)?;
		if path.len() <= 1 {
			return Err(CircuitError::LocalTarget);
		}

		let handle = demux.transport().next_handle();
		let circuit = Arc::new(Self {
			handle,
			target,
			remote_port,
			state: Mutex::new(CircuitState::Init),
			sequence: Mutex::new(1),
			opened_at: Instant::now(),
			on_data: Mutex::new(None),
			on_active: Mutex::new(None),
			on_invalid: Mutex::new(None),
			demux: Arc::clone(&demux),
		});

		demux.register(handle, Arc::downgrade(&circuit));
		*circuit.state.lock().expect("circuit state poisoned") = CircuitState::HandshakeStarted;

		let hops: Vec<NodeId> = path[1..].to_vec();
		let request = Record::ConnectedPath { command: cp::OPEN_REQUEST, handle, body: ConnectedPathBody::Open { port: remote_port, path: hops } };
		demux.transport().send(wire::encode_frame(&wire::encode(&request), false));

		Ok(circuit)
	}

	pub fn handle(&self) -> u16 {
		self.handle
	}

	pub fn target(&self) -> NodeId {
		self.target
	}

	pub fn state(&self) -> CircuitState {
		*self.state.lock().expect("circuit state poisoned")
	}

	/// Whether this circuit has sat in `Init`/`HandshakeStarted` for longer
	/// than [`HANDSHAKE_TIMEOUT`] — checked by the Bridge layer's timeout
	/// watcher (§4.5 step 5), not by the circuit itself.
	pub fn handshake_expired(&self) -> bool {
		matches!(self.state(), CircuitState::Init | CircuitState::HandshakeStarted) && self.opened_at.elapsed() > HANDSHAKE_TIMEOUT
	}

	pub fn on_data(&self, cb: DataCallback) {
		*self.on_data.lock().expect("on_data poisoned") = Some(cb);
	}

	pub fn on_active(&self, cb: TransitionCallback) {
		*self.on_active.lock().expect("on_active poisoned") = Some(cb);
	}

	pub fn on_invalid(&self, cb: TransitionCallback) {
		*self.on_invalid.lock().expect("on_invalid poisoned") = Some(cb);
	}

	/// Sends one `SendDataRequest` frame carrying `data` as-is; chunking to
	/// a safe frame size is the driver's responsibility (§4.4 "Send").
	pub fn send_data(&self, data: &[u8]) -> Result<(), CircuitError> {
		if self.state() != CircuitState::Active {
			return Err(CircuitError::NotActive);
		}
		let sequence = self.next_sequence();
		let request =
			Record::ConnectedPath { command: cp::DATA_REQUEST, handle: self.handle, body: ConnectedPathBody::Generic { sequence, data: data.to_vec() } };
		self.demux.transport().send(wire::encode_frame(&wire::encode(&request), false));
		Ok(())
	}

	/// Closes the circuit: sends `DisconnectRequest` if currently `Active`,
	/// marks `Invalid`, and unregisters from the demux. Idempotent.
	pub fn close(&self) {
		let mut state = self.state.lock().expect("circuit state poisoned");
		if *state == CircuitState::Active {
			let request = Record::ConnectedPath {
				command: cp::DISCONNECT_REQUEST,
				handle: self.handle,
				body: ConnectedPathBody::Generic { sequence: 0, data: Vec::new() },
			};
			self.demux.transport().send(wire::encode_frame(&wire::encode(&request), false));
		}
		*state = CircuitState::Invalid;
		drop(state);
		self.demux.unregister(self.handle);
	}

	fn next_sequence(&self) -> u16 {
		let mut sequence = self.sequence.lock().expect("sequence poisoned");
		let current = *sequence;
		*sequence = sequence.wrapping_add(1);
		if *sequence == 0 {
			*sequence = 1;
		}
		current
	}

	pub(crate) fn handle_incoming(&self, command: u8, body: ConnectedPathBody) {
		match command {
			cp::OPEN_ACK => self.transition_active(),
			cp::OPEN_NACK => self.transition_invalid(),
			cp::DATA_REQUEST => self.deliver_data(body),
			cp::DATA_NACK | cp::DISCONNECT_REQUEST => self.transition_invalid(),
			cp::CLEAR_INVALID_HANDLE => self.transition_invalid(),
			other => log::warn!("circuit {}: unhandled connected-path command 0x{other:02X}", self.handle),
		}
	}

	fn transition_active(&self) {
		let mut state = self.state.lock().expect("circuit state poisoned");
		if *state != CircuitState::HandshakeStarted {
			return;
		}
		*state = CircuitState::Active;
		drop(state);
		if let Some(cb) = self.on_active.lock().expect("on_active poisoned").clone() {
			cb();
		}
	}

	fn transition_invalid(&self) {
		let mut state = self.state.lock().expect("circuit state poisoned");
		if *state == CircuitState::Invalid {
			return;
		}
		*state = CircuitState::Invalid;
		drop(state);
		if let Some(cb) = self.on_invalid.lock().expect("on_invalid poisoned").clone() {
			cb();
		}
	}

	fn deliver_data(&self, body: ConnectedPathBody) {
		if self.state() != CircuitState::Active {
			return;
		}
		if let ConnectedPathBody::Generic { data, .. } = body {
			if let Some(cb) = self.on_data.lock().expect("on_data poisoned").clone() {
				cb(&data);
			}
		}
	}
}

impl Drop for Circuit {
	fn drop(&mut self) {
		self.demux.unregister(self.handle);
	}
}

// A transport-down notification (§4.4 "* -> transport-down -> Invalid") is
// delivered the same way a reply would be: the owning Bridge observes the
// Serial Transport closing (e.g. via its own health check) and calls
// `close()`, which is idempotent regardless of the circuit's prior state.
