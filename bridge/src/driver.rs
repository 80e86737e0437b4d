use std::thread;
use std::time::Duration;

use circuit::{Circuit, CircuitError};
use util::NodeId;

use crate::link::LinkFacts;

/// Chunks outbound socket bytes into `SendDataRequest` frames and paces
/// them when the remote MCU is the slower 8266 variant (§4.4 "Chunking on
/// slow links"). The two remote ports the spec names select a fixed
/// `Driver` configuration rather than distinct types, since chunk size,
/// throttle factor and floor are their only differences.
#[derive(Debug, Clone, Copy)]
pub struct Driver {
	chunk_size: usize,
	throttle_factor: u32,
	floor: Duration,
}

impl Driver {
	/// Remote port 6053: ESPHome's native API.
	pub fn api() -> Self {
		Self { chunk_size: 512, throttle_factor: 25, floor: Duration::ZERO }
	}

	/// Remote port 3232: Arduino OTA. Flash writes need pacing regardless
	/// of board variant, hence the unconditional 150ms floor.
	pub fn ota() -> Self {
		Self { chunk_size: 512, throttle_factor: 2, floor: Duration::from_millis(150) }
	}

	/// Selects a driver by the bridge's configured remote port, defaulting
	/// to the API driver for anything else.
	pub fn for_remote_port(remote_port: u16) -> Self {
		match remote_port {
			3232 => Self::ota(),
			_ => Self::api(),
		}
	}

	pub fn chunk_size(&self) -> usize {
		self.chunk_size
	}

	/// Chunks `data` and forwards each chunk through `circuit`, recording
	/// sent bytes in `stats` and sleeping between chunks when required.
	pub fn socket_to_serial(
		&self,
		data: &[u8],
		circuit: &Circuit,
		link: &dyn LinkFacts,
		stats: &stats::Statistics,
		node: NodeId,
	) -> Result<(), CircuitError> {
		for chunk in data.chunks(self.chunk_size) {
			circuit.send_data(chunk)?;
			stats.add_sent(node, chunk.len() as u64);
			self.throttle(chunk.len(), link);
		}
		Ok(())
	}

	fn throttle(&self, chunk_len: usize, link: &dyn LinkFacts) {
		let mut sleep = Duration::ZERO;
		if link.is_esp8266() {
			let micros = u64::from(link.tx_one_byte_us()) * chunk_len as u64 * u64::from(self.throttle_factor);
			sleep = Duration::from_micros(micros);
		}
		sleep = sleep.max(self.floor);
		if !sleep.is_zero() {
			thread::sleep(sleep);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FixedLink {
		esp8266: bool,
		tx_one_byte_us: u32,
	}

	impl LinkFacts for FixedLink {
		fn is_esp8266(&self) -> bool {
			self.esp8266
		}

		fn tx_one_byte_us(&self) -> u32 {
			self.tx_one_byte_us
		}
	}

	#[test]
	fn api_driver_chunks_at_512() {
		assert_eq!(Driver::api().chunk_size(), 512);
	}

	#[test]
	fn ota_driver_chunks_at_512() {
		assert_eq!(Driver::ota().chunk_size(), 512);
	}

	#[test]
	fn for_remote_port_selects_ota_for_3232() {
		assert_eq!(Driver::for_remote_port(3232).chunk_size(), 512);
		assert_eq!(Driver::for_remote_port(6053).chunk_size(), 512);
	}

	#[test]
	fn throttle_is_a_noop_on_fast_links() {
		let driver = Driver::api();
		let link = FixedLink { esp8266: false, tx_one_byte_us: 100 };
		let started = std::time::Instant::now();
		driver.throttle(512, &link);
		assert!(started.elapsed() < Duration::from_millis(50));
	}
}
