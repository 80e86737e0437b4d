use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use util::{NodeId, Revision};
use wire::{ty, DecodeEvent, Decoder, NodeInfo, Record};

use crate::error::TransportError;
use crate::handshake::HandshakeInfo;
use crate::port::Port;
use crate::session::{Session, SessionOutcome};

/// Default session timeout (§4.3, `MaxTimeoutMs` in the originating firmware's
/// session table).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

const WRITER_POLL: Duration = Duration::from_millis(50);
const RESET_PULSE: Duration = Duration::from_millis(100);

/// A callback invoked for unsolicited frames matching a registered
/// `(type, sub_type)` (§4.2 "typed-callback registry"). Invoked outside any
/// internal lock.
pub type TypedCallback = Arc<dyn Fn(Record) + Send + Sync>;

/// A callback invoked with the undecoded frame payload, for type codes
/// whose body doesn't fit the flat `Record` table (§4.7 `NodePresentationRx`,
/// §4.2 `NodeInfo`) and so must be parsed directly off the bytes.
pub type RawCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Handle returned by [`SerialTransport::on_type`], used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken(pub u64);

struct CallbackEntry {
	sub: u8,
	token: u64,
	cb: TypedCallback,
}

/// Owns one open serial device: a reader thread that reassembles frames and
/// dispatches them, and a writer thread that drains the session queue. Both
/// threads share the device through a per-direction clone (§5 "a serial
/// device is exclusively owned, for its lifetime, by its reader and writer
/// threads").
pub struct SerialTransport {
	reader_port: Mutex<Box<dyn Port>>,
	writer_port: Mutex<Box<dyn Port>>,
	queue: Mutex<VecDeque<Arc<Session>>>,
	queue_cv: Condvar,
	in_flight: Mutex<Option<Arc<Session>>>,
	callbacks: Mutex<AHashMap<u8, Vec<CallbackEntry>>>,
	raw_callbacks: Mutex<AHashMap<u8, RawCallback>>,
	next_callback_token: AtomicU64,
	next_handle: Mutex<u16>,
	running: AtomicBool,
	handshake: Mutex<HandshakeInfo>,
	tx_one_byte_us: u32,
	reader_thread: Mutex<Option<JoinHandle<()>>>,
	writer_thread: Mutex<Option<JoinHandle<()>>>,
}

/// How to open a [`SerialTransport`] (§6.4 `port`/`baud`, plus whether to
/// pulse-reset the target first).
pub struct OpenConfig {
	pub baud: u32,
	pub pulse_reset: bool,
	pub handshake_timeout: Duration,
}

impl Default for OpenConfig {
	fn default() -> Self {
		Self { baud: 460_800, pulse_reset: true, handshake_timeout: Duration::from_secs(5) }
	}
}

impl SerialTransport {
	/// Opens a real serial device at `path` and performs the handshake.
	pub fn open(path: &str, config: OpenConfig) -> Result<Arc<Self>, TransportError> {
		let port = crate::port::open_real(path, config.baud)?;
		Self::open_with_port(port, config)
	}

	/// Opens a transport over an already-constructed [`Port`] (production
	/// code uses this via [`Self::open`]; tests supply an in-memory fake).
	pub fn open_with_port(mut port: Box<dyn Port>, config: OpenConfig) -> Result<Arc<Self>, TransportError> {
		if config.pulse_reset {
			port.set_dtr(false)?;
			port.set_rts(true)?;
			thread::sleep(RESET_PULSE);
			port.set_dtr(true)?;
			port.set_rts(false)?;
		}

		let reader_port = port.try_clone_port()?;

		let transport = Arc::new(Self {
			reader_port: Mutex::new(reader_port),
			writer_port: Mutex::new(port),
			queue: Mutex::new(VecDeque::new()),
			queue_cv: Condvar::new(),
			in_flight: Mutex::new(None),
			callbacks: Mutex::new(AHashMap::new()),
			raw_callbacks: Mutex::new(AHashMap::new()),
			next_callback_token: AtomicU64::new(1),
			next_handle: Mutex::new(1),
			running: AtomicBool::new(true),
			handshake: Mutex::new(HandshakeInfo {
				local_node: NodeId::new(0),
				firmware: Revision::new(0, 0, 0),
				node_info: None,
				is_esp8266: false,
				tx_one_byte_us: HandshakeInfo::tx_one_byte_us_for_baud(config.baud),
			}),
			tx_one_byte_us: HandshakeInfo::tx_one_byte_us_for_baud(config.baud),
			reader_thread: Mutex::new(None),
			writer_thread: Mutex::new(None),
		});

		transport.spawn_threads();

		match transport.run_handshake(config.handshake_timeout) {
			Ok(info) => {
				*transport.handshake.lock().expect("handshake poisoned") = info;
				Ok(transport)
			}
			Err(err) => {
				transport.shutdown();
				Err(err)
			}
		}
	}

	fn spawn_threads(self: &Arc<Self>) {
		let reader = Arc::clone(self);
		let reader_handle = thread::spawn(move || reader.reader_loop());
		*self.reader_thread.lock().expect("reader_thread poisoned") = Some(reader_handle);

		let writer = Arc::clone(self);
		let writer_handle = thread::spawn(move || writer.writer_loop());
		*self.writer_thread.lock().expect("writer_thread poisoned") = Some(writer_handle);
	}

	/// The node id learned from the open-time handshake.
	pub fn local_node(&self) -> NodeId {
		self.handshake.lock().expect("handshake poisoned").local_node
	}

	pub fn firmware(&self) -> Revision {
		self.handshake.lock().expect("handshake poisoned").firmware
	}

	pub fn node_info(&self) -> Option<NodeInfo> {
		self.handshake.lock().expect("handshake poisoned").node_info.clone()
	}

	pub fn is_esp8266(&self) -> bool {
		self.handshake.lock().expect("handshake poisoned").is_esp8266
	}

	pub fn tx_one_byte_us(&self) -> u32 {
		self.tx_one_byte_us
	}

	/// Allocates the next Connected-Path handle, skipping zero (§4.4
	/// `GetNextHandle`).
	pub fn next_handle(&self) -> u16 {
		let mut next = self.next_handle.lock().expect("next_handle poisoned");
		let handle = *next;
		*next = next.wrapping_add(1);
		if *next == 0 {
			*next = 1;
		}
		handle
	}

	/// Registers a callback for unsolicited frames whose type byte is `ty`.
	/// `sub` of `0` matches any sub-type. First-registered, first-matched.
	pub fn on_type(&self, ty: u8, sub: u8, cb: TypedCallback) -> CallbackToken {
		let token = self.next_callback_token.fetch_add(1, Ordering::Relaxed);
		self.callbacks.lock().expect("callbacks poisoned").entry(ty).or_default().push(CallbackEntry { sub, token, cb });
		CallbackToken(token)
	}

	pub fn remove_callback(&self, token: CallbackToken) {
		for entries in self.callbacks.lock().expect("callbacks poisoned").values_mut() {
			entries.retain(|e| e.token != token.0);
		}
	}

	/// Registers a callback invoked with the raw frame payload for
	/// unsolicited frames whose type byte is `ty`, for bodies that don't fit
	/// the `Record` table (e.g. `NodePresentationRx`). One callback per type;
	/// a second registration replaces the first.
	pub fn on_raw_type(&self, ty: u8, cb: RawCallback) {
		self.raw_callbacks.lock().expect("raw_callbacks poisoned").insert(ty, cb);
	}

	/// Enqueues a fire-and-forget frame (§4.3 `send`); returns once queued,
	/// not once written.
	pub fn send(&self, frame: Vec<u8>) {
		self.enqueue(Arc::new(Session::fire_and_forget(frame)));
	}

	/// Enqueues `frame` and blocks until the matching `(type, sub_type)`
	/// reply arrives or `timeout` elapses (§4.3 `send_recv`).
	pub fn send_recv(&self, frame: Vec<u8>, expected: (u8, u8), timeout: Duration) -> SessionOutcome {
		let session = Arc::new(Session::awaitable(frame, expected, timeout));
		self.enqueue(Arc::clone(&session));
		session.wait(Instant::now())
	}

	fn enqueue(&self, session: Arc<Session>) {
		let mut queue = self.queue.lock().expect("queue poisoned");
		queue.push_back(session);
		self.queue_cv.notify_one();
	}

	/// Closes the device and fails every queued and in-flight session with a
	/// timeout outcome (§7: "the caller observes the same `Timeout` outcome
	/// it would on an unanswered request").
	pub fn shutdown(&self) {
		self.running.store(false, Ordering::Release);
		self.queue_cv.notify_all();
		self.fail_all_sessions();
	}

	fn fail_all_sessions(&self) {
		if let Some(session) = self.in_flight.lock().expect("in_flight poisoned").take() {
			session.complete_with_timeout();
		}
		let mut queue = self.queue.lock().expect("queue poisoned");
		for session in queue.drain(..) {
			session.complete_with_timeout();
		}
	}

	fn reader_loop(self: Arc<Self>) {
		let mut decoder = Decoder::new();
		let mut byte = [0u8; 1];

		loop {
			if !self.running.load(Ordering::Acquire) {
				return;
			}

			let read_result = {
				let mut port = self.reader_port.lock().expect("reader_port poisoned");
				port.read(&mut byte)
			};

			match read_result {
				Ok(0) => {
					log::error!("serial transport: reader saw EOF, closing");
					self.running.store(false, Ordering::Release);
					self.fail_all_sessions();
					return;
				}
				Ok(_) => {
					if let Some(event) = decoder.push(byte[0]) {
						self.handle_event(event);
					}
				}
				Err(err) if err.kind() == std::io::ErrorKind::TimedOut || err.kind() == std::io::ErrorKind::WouldBlock => {
					self.check_session_timeout();
				}
				Err(err) => {
					log::error!("serial transport: reader failed, closing: {err}");
					self.running.store(false, Ordering::Release);
					self.fail_all_sessions();
					return;
				}
			}
		}
	}

	fn handle_event(&self, event: DecodeEvent) {
		match event {
			DecodeEvent::Frame(payload) => self.on_frame(payload),
			DecodeEvent::LogLine(line) => log::info!(target: "serial::log", "{line}"),
			DecodeEvent::BadCrc { .. } | DecodeEvent::Overflow => {
				// Already logged by the decoder; nothing more to do.
			}
		}
	}

	fn on_frame(&self, payload: Vec<u8>) {
		if payload.first() == Some(&ty::LOG_EVENT) {
			if let Record::LogEvent { level, from, line } = wire::decode(&payload) {
				log::info!(target: "serial::log", "[{from}] (level {level}) {line}");
			}
			return;
		}

		let frame_ty = payload.first().copied().unwrap_or(0);

		let frame_sub = if frame_ty == ty::DISCOVERY_REQUEST || frame_ty == ty::DISCOVERY_REPLY {
			payload.get(1).copied().unwrap_or(0)
		} else {
			0
		};

		if self.try_complete_in_flight(frame_ty, frame_sub, &payload) {
			return;
		}

		let raw_cb = self.raw_callbacks.lock().expect("raw_callbacks poisoned").get(&frame_ty).cloned();
		if let Some(cb) = raw_cb {
			cb(&payload);
			return;
		}

		let matched_cb = {
			let callbacks = self.callbacks.lock().expect("callbacks poisoned");
			callbacks.get(&frame_ty).and_then(|entries| entries.iter().find(|e| e.sub == 0 || e.sub == frame_sub)).map(|e| Arc::clone(&e.cb))
		};

		match matched_cb {
			Some(cb) => cb(wire::decode(&payload)),
			None => log::warn!("serial transport: unused packet (type=0x{frame_ty:02X}, sub=0x{frame_sub:02X})"),
		}
	}

	fn try_complete_in_flight(&self, frame_ty: u8, frame_sub: u8, payload: &[u8]) -> bool {
		let mut in_flight = self.in_flight.lock().expect("in_flight poisoned");
		let matches = in_flight.as_ref().and_then(|s| s.expected).is_some_and(|(want_ty, want_sub)| {
			want_ty == frame_ty && (want_sub == 0 || want_sub == frame_sub)
		});
		if matches {
			let session = in_flight.take().expect("checked above");
			drop(in_flight);
			session.complete_with_reply(payload.to_vec());
			true
		} else {
			false
		}
	}

	fn check_session_timeout(&self) {
		let mut in_flight = self.in_flight.lock().expect("in_flight poisoned");
		if in_flight.as_ref().is_some_and(|s| s.is_expired(Instant::now())) {
			let session = in_flight.take().expect("checked above");
			drop(in_flight);
			session.complete_with_timeout();
		}
	}

	fn writer_loop(self: Arc<Self>) {
		'outer: loop {
			if !self.running.load(Ordering::Acquire) {
				return;
			}

			if self.in_flight.lock().expect("in_flight poisoned").is_some() {
				thread::sleep(WRITER_POLL);
				continue 'outer;
			}

			let session;
			{
				let mut queue = self.queue.lock().expect("queue poisoned");
				match queue.pop_front() {
					Some(s) => session = s,
					None => {
						let _ = self.queue_cv.wait_timeout(queue, WRITER_POLL);
						continue 'outer;
					}
				}
			}

			let write_result = {
				let mut port = self.writer_port.lock().expect("writer_port poisoned");
				port.write_all(&session.frame)
			};

			if let Err(err) = write_result {
				log::error!("serial transport: writer failed, closing: {err}");
				session.complete_with_timeout();
				self.running.store(false, Ordering::Release);
				self.fail_all_sessions();
				return;
			}

			if session.is_awaitable() {
				session.mark_sent(Instant::now());
				*self.in_flight.lock().expect("in_flight poisoned") = Some(session);
			} else {
				thread::sleep(WRITER_POLL);
			}
		}
	}

	fn run_handshake(&self, timeout: Duration) -> Result<HandshakeInfo, TransportError> {
		let echo = wire::encode(&Record::EchoRequest { text: "CIAO".to_string() });
		match self.send_recv(wire::encode_frame(&echo, false), (ty::ECHO_REPLY, 0), timeout) {
			SessionOutcome::Reply(payload) => match wire::decode(&payload) {
				Record::EchoReply { text } if text == "CIAO" => {}
				_ => return Err(TransportError::HandshakeFailed("echo did not match")),
			},
			SessionOutcome::Timeout => return Err(TransportError::HandshakeFailed("echo timed out")),
		}

		let node_id_req = wire::encode(&Record::NodeIdRequest);
		let local_node = match self.send_recv(wire::encode_frame(&node_id_req, false), (ty::NODE_ID_REPLY, 0), timeout) {
			SessionOutcome::Reply(payload) => match wire::decode(&payload) {
				Record::NodeIdReply { serial } => serial,
				_ => return Err(TransportError::HandshakeFailed("malformed NodeId reply")),
			},
			SessionOutcome::Timeout => return Err(TransportError::HandshakeFailed("NodeId timed out")),
		};

		let fw_req = wire::encode(&Record::FirmwareRevRequest);
		let firmware = match self.send_recv(wire::encode_frame(&fw_req, false), (ty::FIRMWARE_REV_REPLY, 0), timeout) {
			SessionOutcome::Reply(payload) => match wire::decode(&payload) {
				Record::FirmwareRevReply { revision } => {
					revision.parse::<Revision>().map_err(|_| TransportError::HandshakeFailed("unparseable firmware revision"))?
				}
				_ => return Err(TransportError::HandshakeFailed("malformed FirmwareRev reply")),
			},
			SessionOutcome::Timeout => return Err(TransportError::HandshakeFailed("FirmwareRev timed out")),
		};

		let node_info = if util::supports_node_info(firmware) {
			let request = wire::encode_frame(&[ty::NODE_INFO_REQUEST], false);
			match self.send_recv(request, (ty::NODE_INFO_REPLY, 0), timeout) {
				SessionOutcome::Reply(payload) => NodeInfo::decode(&payload[1.min(payload.len())..]),
				SessionOutcome::Timeout => None,
			}
		} else {
			None
		};

		let is_esp8266 = node_info.as_ref().is_some_and(|info| info.platform.eq_ignore_ascii_case("esp8266"));

		Ok(HandshakeInfo { local_node, firmware, node_info, is_esp8266, tx_one_byte_us: self.tx_one_byte_us })
	}
}

impl Drop for SerialTransport {
	fn drop(&mut self) {
		self.shutdown();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake_port::FakePort;
	use std::sync::atomic::AtomicUsize;
	use wire::NodeKind;

	/// Spawns a thread that plays the role of the attached node: it watches
	/// the fake device's outbound bytes for the four handshake requests, in
	/// order, and answers each with a canned reply.
	fn drive_handshake_peer(port: FakePort, node: NodeId, firmware: &'static str, info: Option<NodeInfo>) {
		thread::spawn(move || {
			let mut decoder = Decoder::new();
			let mut step = 0usize;
			let last_step = if info.is_some() { 4 } else { 3 };
			while step < last_step {
				for b in port.take_outbound() {
					if let Some(DecodeEvent::Frame(_)) = decoder.push(b) {
						let reply = match step {
							0 => wire::encode(&Record::EchoReply { text: "CIAO".to_string() }),
							1 => wire::encode(&Record::NodeIdReply { serial: node }),
							2 => wire::encode(&Record::FirmwareRevReply { revision: firmware.to_string() }),
							3 => {
								let mut body = vec![ty::NODE_INFO_REPLY];
								body.extend(info.as_ref().expect("node info requested").encode());
								body
							}
							_ => unreachable!(),
						};
						port.push_inbound(&wire::encode_frame(&reply, false));
						step += 1;
					}
				}
				thread::sleep(Duration::from_millis(2));
			}
		});
	}

	fn sample_node_info(platform: &str) -> NodeInfo {
		NodeInfo {
			hostname: "sensor1".to_string(),
			firmware_version: "1.5.0".to_string(),
			compile_time: "2026-01-02T03:04:05Z".to_string(),
			lib_version: "2.3.1".to_string(),
			mac_address: [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01],
			platform: platform.to_string(),
			board: "devboard".to_string(),
			node_type: NodeKind::Sensor,
		}
	}

	fn open_config() -> OpenConfig {
		OpenConfig { baud: 115_200, pulse_reset: false, handshake_timeout: Duration::from_millis(500) }
	}

	#[test]
	fn open_completes_handshake_and_queries_node_info_above_threshold() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x112233), "1.5.0", Some(sample_node_info("esp32")));

		let transport = SerialTransport::open_with_port(Box::new(port), open_config()).expect("handshake should succeed");

		assert_eq!(transport.local_node(), NodeId::new(0x112233));
		assert_eq!(transport.firmware(), Revision::new(1, 5, 0));
		assert_eq!(transport.node_info().map(|i| i.hostname), Some("sensor1".to_string()));
		assert!(!transport.is_esp8266());
	}

	#[test]
	fn open_skips_node_info_below_threshold() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0xAABBCC), "1.4.2", None);

		let transport = SerialTransport::open_with_port(Box::new(port), open_config()).expect("handshake should succeed");

		assert_eq!(transport.firmware(), Revision::new(1, 4, 2));
		assert!(transport.node_info().is_none());
	}

	#[test]
	fn open_detects_esp8266_from_node_info_platform() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x1), "1.5.0", Some(sample_node_info("esp8266")));

		let transport = SerialTransport::open_with_port(Box::new(port), open_config()).expect("handshake should succeed");

		assert!(transport.is_esp8266());
	}

	#[test]
	fn open_fails_when_device_never_responds() {
		let port = FakePort::new();
		let config = OpenConfig { baud: 115_200, pulse_reset: false, handshake_timeout: Duration::from_millis(30) };
		let result = SerialTransport::open_with_port(Box::new(port), config);
		assert!(matches!(result, Err(TransportError::HandshakeFailed(_))));
	}

	#[test]
	fn typed_callback_dispatches_unsolicited_frames_in_registration_order() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x42), "1.4.2", None);
		let transport = SerialTransport::open_with_port(Box::new(port.clone()), open_config()).expect("handshake should succeed");

		let seen = Arc::new(AtomicUsize::new(0));
		let seen_cb = Arc::clone(&seen);
		transport.on_type(ty::DISCOVERY_REPLY, 0, Arc::new(move |_record| {
			seen_cb.fetch_add(1, Ordering::SeqCst);
		}));

		let push = wire::encode(&Record::DiscoveryTableSizeReply { size: 3 });
		port.push_inbound(&wire::encode_frame(&push, false));

		let deadline = Instant::now() + Duration::from_millis(500);
		while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(5));
		}
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn raw_callback_receives_undecoded_payload_for_registered_type() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x42), "1.4.2", None);
		let transport = SerialTransport::open_with_port(Box::new(port.clone()), open_config()).expect("handshake should succeed");

		let seen = Arc::new(Mutex::new(None));
		let seen_cb = Arc::clone(&seen);
		transport.on_raw_type(ty::NODE_PRESENTATION_RX, Arc::new(move |payload: &[u8]| {
			*seen_cb.lock().unwrap() = Some(payload.to_vec());
		}));

		let mut body = vec![ty::NODE_PRESENTATION_RX];
		body.extend_from_slice(&[1, 2, 3, 4]);
		port.push_inbound(&wire::encode_frame(&body, false));

		let deadline = Instant::now() + Duration::from_millis(500);
		while seen.lock().unwrap().is_none() && Instant::now() < deadline {
			thread::sleep(Duration::from_millis(5));
		}
		assert_eq!(seen.lock().unwrap().as_deref(), Some(body.as_slice()));
	}

	#[test]
	fn send_recv_times_out_when_no_reply_arrives() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x7), "1.4.2", None);
		let transport = SerialTransport::open_with_port(Box::new(port), open_config()).expect("handshake should succeed");

		let frame = wire::encode_frame(&wire::encode(&Record::FirmwareRevRequest), false);
		let outcome = transport.send_recv(frame, (ty::FIRMWARE_REV_REPLY, 0), Duration::from_millis(30));
		assert!(matches!(outcome, SessionOutcome::Timeout));
	}

	#[test]
	fn next_handle_skips_zero() {
		let port = FakePort::new();
		drive_handshake_peer(port.clone(), NodeId::new(0x7), "1.4.2", None);
		let transport = SerialTransport::open_with_port(Box::new(port), open_config()).expect("handshake should succeed");

		*transport.next_handle.lock().unwrap() = u16::MAX;
		assert_eq!(transport.next_handle(), u16::MAX);
		assert_eq!(transport.next_handle(), 1);
	}
}
