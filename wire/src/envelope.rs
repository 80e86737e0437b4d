use util::NodeId;

use crate::record::{self, Record};

/// How a record should reach its target: directly, wrapped in a single-hop
/// Unicast envelope, wrapped in an explicit Multipath envelope, or chosen
/// automatically from the known path length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolSelector {
	Direct,
	Unicast,
	Multipath,
	Auto,
}

/// Resolves `Auto` against `target` and the shortest known path length
/// (hop count including the local coordinator) per §4.1: `Direct` if the
/// target is local, `Unicast` if the path has exactly two hops, `Multipath`
/// otherwise. Non-`Auto` selectors pass through unchanged.
pub fn resolve_selector(selector: ProtocolSelector, target: NodeId, path_len: Option<usize>) -> ProtocolSelector {
	match selector {
		ProtocolSelector::Auto => {
			if target.is_local() {
				ProtocolSelector::Direct
			} else if path_len == Some(2) {
				ProtocolSelector::Unicast
			} else {
				ProtocolSelector::Multipath
			}
		}
		other => other,
	}
}

/// Wraps `inner` for transmission to `target` over `path` (the full path,
/// local coordinator included) according to the already-resolved selector.
/// Pass a resolved (non-`Auto`) selector; callers resolve via
/// [`resolve_selector`] first so the path length used to resolve and the
/// path used to wrap always agree.
pub fn wrap(inner: Record, selector: ProtocolSelector, target: NodeId, path: &[NodeId]) -> Record {
	match selector {
		ProtocolSelector::Direct => inner,
		ProtocolSelector::Unicast => Record::Unicast { target, payload: record::encode(&inner) },
		ProtocolSelector::Multipath => {
			let hops = path.iter().skip(1).copied().collect();
			Record::Multipath { target, path: hops, payload: record::encode(&inner) }
		}
		ProtocolSelector::Auto => {
			let resolved = resolve_selector(selector, target, Some(path.len()));
			wrap(inner, resolved, target, path)
		}
	}
}
