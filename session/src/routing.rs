use util::NodeId;

/// Decouples the session engine from a concrete routing graph, so its tests
/// can supply a fixed path table instead of standing up a [`graph::SharedNetwork`].
pub trait RoutingSource: Send + Sync {
	/// Shortest-weight path from the local device to `target`, local device
	/// first. `None` if `target` is unknown, not in-use, or unreachable.
	fn shortest_path(&self, target: NodeId) -> Option<Vec<NodeId>>;
}

impl RoutingSource for graph::SharedNetwork {
	fn shortest_path(&self, target: NodeId) -> Option<Vec<NodeId>> {
		graph::SharedNetwork::shortest_path(self, target)
	}
}

#[cfg(test)]
pub(crate) struct FixedRouting(pub std::collections::HashMap<NodeId, Vec<NodeId>>);

#[cfg(test)]
impl RoutingSource for FixedRouting {
	fn shortest_path(&self, target: NodeId) -> Option<Vec<NodeId>> {
		self.0.get(&target).cloned()
	}
}
