//! The routing graph: a weighted directed graph of [`Device`] vertices keyed
//! by [`NodeId`], with shortest-path queries, change notification, and
//! XML persistence.

mod device;
mod presentation;
mod xml;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use util::NodeId;
use wire::NodePresentation;

pub use device::Device;
pub use presentation::apply_presentation;
pub use xml::{load, save};

/// Edge weight is a scalar cost: lower is better, always finite and
/// strictly positive. Absence of an edge is infinity, never a zero edge.
pub type Weight = f64;

/// A weighted directed graph of mesh participants, keyed by [`NodeId`].
///
/// Carries exactly one vertex per node-id. Does not itself know about
/// change observers or locking; see [`SharedNetwork`] for the guarded,
/// observable wrapper the rest of the workspace actually uses.
pub struct Network {
	graph: StableDiGraph<Device, Weight>,
	index: HashMap<NodeId, NodeIndex>,
	ids: HashMap<NodeIndex, NodeId>,
	local: NodeId,
}

impl Network {
	/// An empty graph whose local device is `local`, inserted with default
	/// attributes.
	pub fn new(local: NodeId) -> Self {
		let mut network = Self { graph: StableDiGraph::new(), index: HashMap::new(), ids: HashMap::new(), local };
		network.upsert_device(local, Device::new("local"));
		network
	}

	pub fn local_id(&self) -> NodeId {
		self.local
	}

	pub fn contains(&self, id: NodeId) -> bool {
		self.index.contains_key(&id)
	}

	pub fn device(&self, id: NodeId) -> Option<&Device> {
		self.index.get(&id).map(|&idx| &self.graph[idx])
	}

	pub fn device_mut(&mut self, id: NodeId) -> Option<&mut Device> {
		let idx = *self.index.get(&id)?;
		Some(&mut self.graph[idx])
	}

	pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
		self.index.keys().copied()
	}

	/// Inserts `id` with `device` if absent, or overwrites the existing
	/// device's attributes in place if present. Returns the previous
	/// device, if any.
	pub fn upsert_device(&mut self, id: NodeId, device: Device) -> Option<Device> {
		if let Some(&idx) = self.index.get(&id) {
			Some(std::mem::replace(&mut self.graph[idx], device))
		} else {
			let idx = self.graph.add_node(device);
			self.index.insert(id, idx);
			self.ids.insert(idx, id);
			None
		}
	}

	/// Removes `id` and every edge touching it. Returns the removed device.
	pub fn remove_device(&mut self, id: NodeId) -> Option<Device> {
		let idx = self.index.remove(&id)?;
		self.ids.remove(&idx);
		self.graph.remove_node(idx)
	}

	/// Sets (or replaces) the directed edge `from -> to` with `weight`.
	/// Both ends must already exist. `weight` must be finite and strictly
	/// positive; callers representing "no edge" simply omit the call.
	pub fn set_edge(&mut self, from: NodeId, to: NodeId, weight: Weight) -> bool {
		let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) else {
			return false;
		};
		if let Some(edge) = self.graph.find_edge(a, b) {
			self.graph[edge] = weight;
		} else {
			self.graph.add_edge(a, b, weight);
		}
		true
	}

	pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
		let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) else {
			return false;
		};
		match self.graph.find_edge(a, b) {
			Some(edge) => {
				self.graph.remove_edge(edge);
				true
			}
			None => false,
		}
	}

	pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, Weight)> + '_ {
		self.graph.edge_indices().filter_map(move |e| {
			let (a, b) = self.graph.edge_endpoints(e)?;
			Some((self.ids[&a], self.ids[&b], self.graph[e]))
		})
	}

	/// Shortest-weight path from the local device to `target`, local device
	/// included as the first element. Fails if `target` is unknown, not
	/// in-use, or unreachable.
	pub fn shortest_path(&self, target: NodeId) -> Option<Vec<NodeId>> {
		let local_idx = *self.index.get(&self.local)?;
		let target_idx = *self.index.get(&target)?;

		if !self.graph[target_idx].in_use {
			return None;
		}
		if target_idx == local_idx {
			return Some(vec![self.local]);
		}

		// dijkstra gives distances, not the path; track predecessors
		// alongside the relaxation so the path can be reconstructed.
		let mut predecessor: HashMap<NodeIndex, NodeIndex> = HashMap::new();
		let mut best: HashMap<NodeIndex, Weight> = HashMap::new();
		best.insert(local_idx, 0.0);
		let mut frontier = vec![local_idx];
		while let Some(node) = frontier.pop() {
			let node_cost = best[&node];
			for neighbor in self.graph.neighbors_directed(node, Direction::Outgoing) {
				let edge = self.graph.find_edge(node, neighbor).expect("neighbor implies edge");
				let candidate = node_cost + self.graph[edge];
				if best.get(&neighbor).map_or(true, |&existing| candidate < existing) {
					best.insert(neighbor, candidate);
					predecessor.insert(neighbor, node);
					frontier.push(neighbor);
				}
			}
		}

		if !best.contains_key(&target_idx) {
			return None;
		}

		let mut path = vec![target_idx];
		let mut cursor = target_idx;
		while cursor != local_idx {
			cursor = *predecessor.get(&cursor)?;
			path.push(cursor);
		}
		path.reverse();
		Some(path.into_iter().map(|idx| self.ids[&idx]).collect())
	}
}

/// Signature for a routing-graph change observer: invoked with the full
/// current set of in-use, non-sleeping node ids after a visible mutation.
pub type Observer = Box<dyn Fn(&Network) + Send + Sync>;

/// A [`Network`] guarded by a read/write lock, with a registry of change
/// observers invoked after each visible mutation, per the concurrency
/// model: readers take the read lock for path queries, a writer takes the
/// write lock for the mutation itself and releases it before any observer
/// runs.
pub struct SharedNetwork {
	network: RwLock<Network>,
	observers: Mutex<Vec<Observer>>,
}

impl SharedNetwork {
	pub fn new(local: NodeId) -> Self {
		Self { network: RwLock::new(Network::new(local)), observers: Mutex::new(Vec::new()) }
	}

	/// Wraps an already-built [`Network`] (e.g. one just loaded from disk,
	/// §6.3) in the guarded, observable wrapper the rest of the workspace uses.
	pub fn from_network(network: Network) -> Self {
		Self { network: RwLock::new(network), observers: Mutex::new(Vec::new()) }
	}

	pub fn register_observer(&self, observer: Observer) {
		self.observers.lock().expect("observer list poisoned").push(observer);
	}

	pub fn read<R>(&self, f: impl FnOnce(&Network) -> R) -> R {
		let guard = self.network.read().expect("network lock poisoned");
		f(&guard)
	}

	/// Takes the write lock, runs `mutate`, releases the lock, then
	/// invokes every registered observer if `visible` is true. `mutate`
	/// returns a value the caller keeps; observers see only the graph.
	pub fn mutate<R>(&self, visible: bool, mutate: impl FnOnce(&mut Network) -> R) -> R {
		let result = {
			let mut guard = self.network.write().expect("network lock poisoned");
			mutate(&mut guard)
		};
		if visible {
			let observers = self.observers.lock().expect("observer list poisoned");
			let guard = self.network.read().expect("network lock poisoned");
			for observer in observers.iter() {
				observer(&guard);
			}
		}
		result
	}

	pub fn shortest_path(&self, target: NodeId) -> Option<Vec<NodeId>> {
		self.read(|network| network.shortest_path(target))
	}

	/// Applies a received `NodePresentationRx` (§4.7), firing change
	/// observers only if it was accepted (i.e. addressed to the local
	/// device) — a dropped presentation is not a visible mutation.
	pub fn apply_presentation(&self, presentation: &NodePresentation, now: DateTime<Utc>) -> bool {
		let accepted = {
			let mut guard = self.network.write().expect("network lock poisoned");
			presentation::apply_presentation(&mut guard, presentation, now)
		};
		if accepted {
			let observers = self.observers.lock().expect("observer list poisoned");
			let guard = self.network.read().expect("network lock poisoned");
			for observer in observers.iter() {
				observer(&guard);
			}
		}
		accepted
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node(tag: &str) -> Device {
		Device::new(tag)
	}

	#[test]
	fn shortest_path_includes_local_as_first_hop() {
		let local = NodeId::new(0);
		let target = NodeId::new(1);
		let mut network = Network::new(local);
		network.upsert_device(target, node("a"));
		network.set_edge(local, target, 1.0);

		assert_eq!(network.shortest_path(target), Some(vec![local, target]));
	}

	#[test]
	fn shortest_path_picks_cheaper_route() {
		let local = NodeId::new(0);
		let hop = NodeId::new(1);
		let target = NodeId::new(2);
		let mut network = Network::new(local);
		network.upsert_device(hop, node("hop"));
		network.upsert_device(target, node("target"));
		network.set_edge(local, target, 10.0);
		network.set_edge(local, hop, 1.0);
		network.set_edge(hop, target, 1.0);

		assert_eq!(network.shortest_path(target), Some(vec![local, hop, target]));
	}

	#[test]
	fn shortest_path_fails_for_not_in_use_destination() {
		let local = NodeId::new(0);
		let target = NodeId::new(1);
		let mut network = Network::new(local);
		let mut device = node("a");
		device.in_use = false;
		network.upsert_device(target, device);
		network.set_edge(local, target, 1.0);

		assert_eq!(network.shortest_path(target), None);
	}

	#[test]
	fn shortest_path_fails_for_unknown_destination() {
		let network = Network::new(NodeId::new(0));
		assert_eq!(network.shortest_path(NodeId::new(99)), None);
	}

	#[test]
	fn remove_device_drops_its_edges() {
		let local = NodeId::new(0);
		let target = NodeId::new(1);
		let mut network = Network::new(local);
		network.upsert_device(target, node("a"));
		network.set_edge(local, target, 1.0);
		network.remove_device(target);

		assert!(!network.contains(target));
		assert_eq!(network.edges().count(), 0);
	}

	#[test]
	fn shared_network_invokes_observers_after_visible_mutation() {
		use std::sync::atomic::{AtomicUsize, Ordering};
		use std::sync::Arc;

		let shared = SharedNetwork::new(NodeId::new(0));
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_clone = Arc::clone(&calls);
		shared.register_observer(Box::new(move |_network| {
			calls_clone.fetch_add(1, Ordering::SeqCst);
		}));

		shared.mutate(true, |network| {
			network.upsert_device(NodeId::new(5), node("x"));
		});
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		shared.mutate(false, |network| {
			network.upsert_device(NodeId::new(6), node("y"));
		});
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
