use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

/// A firmware revision of the form `MAJOR.MINOR.PATCH`, with any trailing
/// `-suffix` (e.g. `-dirty`, `-rc1`) ignored for comparison purposes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Revision {
	pub major: u32,
	pub minor: u32,
	pub patch: u32,
}

impl Revision {
	pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
		Self { major, minor, patch }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRevisionError;

impl fmt::Display for ParseRevisionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("not a MAJOR.MINOR.PATCH firmware revision")
	}
}

impl std::error::Error for ParseRevisionError {}

impl FromStr for Revision {
	type Err = ParseRevisionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let core = s.split('-').next().unwrap_or(s);
		let mut parts = core.trim().split('.');

		let mut next = || parts.next().and_then(|p| p.parse().ok()).ok_or(ParseRevisionError);

		let major = next()?;
		let minor = next()?;
		let patch = next()?;

		Ok(Self { major, minor, patch })
	}
}

impl fmt::Display for Revision {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

/// Whether firmware `rev` supports the `NodeInfo` handshake, i.e. `rev >= 1.4.3`.
pub fn supports_node_info(rev: Revision) -> bool {
	rev.cmp(&Revision::new(1, 4, 3)) != Ordering::Less
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_revision() {
		assert_eq!("1.5.0".parse::<Revision>().unwrap(), Revision::new(1, 5, 0));
	}

	#[test]
	fn ignores_trailing_suffix() {
		assert_eq!("1.4.3-dirty".parse::<Revision>().unwrap(), Revision::new(1, 4, 3));
	}

	#[test]
	fn node_info_threshold() {
		assert!(supports_node_info(Revision::new(1, 4, 3)));
		assert!(supports_node_info(Revision::new(1, 5, 0)));
		assert!(!supports_node_info(Revision::new(1, 4, 2)));
		assert!(!supports_node_info(Revision::new(0, 9, 9)));
	}
}
