/// The handshake-derived facts a driver needs to pace slow links (§4.4
/// "Chunking on slow links"). Narrowed to just these two so bridge tests
/// can supply fixed values instead of opening a real transport.
pub trait LinkFacts: Send + Sync {
	fn is_esp8266(&self) -> bool;
	fn tx_one_byte_us(&self) -> u32;
}

impl LinkFacts for serial::SerialTransport {
	fn is_esp8266(&self) -> bool {
		serial::SerialTransport::is_esp8266(self)
	}

	fn tx_one_byte_us(&self) -> u32 {
		serial::SerialTransport::tx_one_byte_us(self)
	}
}
