use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use util::NodeId;

/// Resolved configuration the core accepts (§6.4). A stand-in for the INI +
/// CLI loader spec.md treats as an external collaborator: `main` reads a
/// handful of environment variables rather than parsing argv or an INI
/// file.
pub struct GatewayConfig {
	pub port: String,
	pub baud: u32,
	pub verbose: u8,
	pub target: Option<NodeId>,
	pub node_to_debug: Option<NodeId>,
	pub bind_override: Option<Ipv4Addr>,
	pub base_offset: u16,
	pub span: u16,
	pub main_graph_path: PathBuf,
	pub star_path_graph_path: PathBuf,
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			port: "/dev/ttyUSB0".to_string(),
			baud: 460_800,
			verbose: 0,
			target: None,
			node_to_debug: None,
			bind_override: None,
			base_offset: 6100,
			span: 400,
			main_graph_path: PathBuf::from("main-network.xml"),
			star_path_graph_path: PathBuf::from("star-path-network.xml"),
		}
	}
}

impl GatewayConfig {
	/// Layers `MESHMESH_PORT`/`MESHMESH_BAUD`/`MESHMESH_VERBOSE`/
	/// `MESHMESH_TARGET`/`MESHMESH_DBG` over the defaults.
	pub fn from_env() -> Self {
		let mut config = Self::default();

		if let Ok(port) = env::var("MESHMESH_PORT") {
			config.port = port;
		}
		if let Ok(baud) = env::var("MESHMESH_BAUD") {
			if let Ok(baud) = baud.parse() {
				config.baud = baud;
			}
		}
		if let Ok(verbose) = env::var("MESHMESH_VERBOSE") {
			if let Ok(verbose) = verbose.parse() {
				config.verbose = verbose;
			}
		}
		if let Ok(target) = env::var("MESHMESH_TARGET") {
			config.target = target.parse().ok();
		}
		if let Ok(dbg) = env::var("MESHMESH_DBG") {
			config.node_to_debug = dbg.parse().ok();
		}

		config
	}
}
