use std::sync::Arc;
use std::time::Duration;

use serial::SessionOutcome;
use util::NodeId;
use wire::{resolve_selector, wrap, ProtocolSelector, Record};

use crate::error::SessionError;
use crate::routing::RoutingSource;
use crate::transport_trait::FrameTransport;

/// The Session Engine (§4.3): resolves a target to a path, wraps a record in
/// the right envelope, and drives it through the serial transport's
/// session queue. Holds no state of its own beyond its collaborators.
pub struct SessionEngine {
	transport: Arc<dyn FrameTransport>,
	routing: Arc<dyn RoutingSource>,
	default_timeout: Duration,
}

impl SessionEngine {
	pub fn new(transport: Arc<dyn FrameTransport>, routing: Arc<dyn RoutingSource>) -> Self {
		Self { transport, routing, default_timeout: serial::DEFAULT_TIMEOUT }
	}

	pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	/// Fire-and-forget send (§4.3 `send`): resolves the path and selector,
	/// enqueues the frame, and returns once queued.
	pub fn send(&self, record: Record, selector: ProtocolSelector, target: NodeId) -> Result<(), SessionError> {
		let path = self.resolve_path(target)?;
		let resolved = resolve_selector(selector, target, Some(path.len()));
		let wrapped = wrap(record, resolved, target, &path);
		self.transport.send(wire::encode_frame(&wire::encode(&wrapped), false));
		Ok(())
	}

	/// Request/reply over a path resolved from the routing graph (§4.3 `send_recv`).
	pub fn send_recv(&self, record: Record, selector: ProtocolSelector, target: NodeId, timeout: Duration) -> Result<Record, SessionError> {
		let path = self.resolve_path(target)?;
		self.send_recv_path(record, selector, target, &path, timeout)
	}

	/// Request/reply over a caller-supplied path (§4.3 `send_recv_path`),
	/// bypassing the routing graph — used when the path is already known,
	/// e.g. while opening a Connected-Path circuit.
	pub fn send_recv_path(
		&self,
		record: Record,
		selector: ProtocolSelector,
		target: NodeId,
		path: &[NodeId],
		timeout: Duration,
	) -> Result<Record, SessionError> {
		let resolved = resolve_selector(selector, target, Some(path.len()));
		let wrapped = wrap(record, resolved, target, path);
		let expected = wire::expected_reply(&wrapped);
		let frame = wire::encode_frame(&wire::encode(&wrapped), false);

		match self.transport.send_recv(frame, expected, timeout) {
			SessionOutcome::Reply(payload) => match wire::decode(&payload) {
				decoded @ (Record::Truncated { .. } | Record::UnknownType { .. }) => Err(SessionError::Malformed(decoded)),
				decoded => Ok(decoded),
			},
			SessionOutcome::Timeout => Err(SessionError::Timeout),
		}
	}

	pub fn default_timeout(&self) -> Duration {
		self.default_timeout
	}

	fn resolve_path(&self, target: NodeId) -> Result<Vec<NodeId>, SessionError> {
		self.routing.shortest_path(target).ok_or(SessionError::NoRoute)
	}
}
