use std::sync::{Arc, Mutex, Weak};

use ahash::AHashMap;
use wire::{cp, ty, ConnectedPathBody, Record};

use crate::circuit::Circuit;
use crate::transport_trait::CircuitTransport;

/// The single typed callback the Connected-Path layer registers with the
/// Serial Transport, fanning `ConnectedPathReply` frames out to the owning
/// [`Circuit`] by handle (§4.4 "Demux"). One demux per transport; every
/// Circuit opened through it registers and unregisters itself here.
pub struct ConnectedPathDemux {
	transport: Arc<dyn CircuitTransport>,
	table: Mutex<AHashMap<u16, Weak<Circuit>>>,
}

impl ConnectedPathDemux {
	pub fn new(transport: Arc<dyn CircuitTransport>) -> Arc<Self> {
		let demux = Arc::new(Self { transport: Arc::clone(&transport), table: Mutex::new(AHashMap::new()) });
		let dispatch_target = Arc::clone(&demux);
		transport.on_type(ty::CONNECTED_PATH_REPLY, 0, Arc::new(move |record: Record| dispatch_target.dispatch(record)));
		demux
	}

	pub(crate) fn transport(&self) -> &Arc<dyn CircuitTransport> {
		&self.transport
	}

	pub(crate) fn register(&self, handle: u16, circuit: Weak<Circuit>) {
		self.table.lock().expect("demux table poisoned").insert(handle, circuit);
	}

	pub(crate) fn unregister(&self, handle: u16) {
		self.table.lock().expect("demux table poisoned").remove(&handle);
	}

	fn dispatch(&self, record: Record) {
		let Record::ConnectedPath { command, handle, body } = record else {
			log::warn!("connected-path demux: non-ConnectedPath frame reached the demux callback");
			return;
		};

		let circuit = self.table.lock().expect("demux table poisoned").get(&handle).and_then(Weak::upgrade);

		match circuit {
			Some(circuit) => circuit.handle_incoming(command, body),
			None => {
				log::warn!("connected-path demux: frame for unknown handle {handle}, clearing");
				let clear = Record::ConnectedPath {
					command: cp::CLEAR_INVALID_HANDLE,
					handle,
					body: ConnectedPathBody::Generic { sequence: 0, data: Vec::new() },
				};
				self.transport.send(wire::encode_frame(&wire::encode(&clear), false));
			}
		}
	}
}
