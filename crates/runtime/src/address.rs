//! Local address lookup for announce-replies.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::warn;

/// Source of the address this host advertises to peers.
pub trait AddressLookup: Send + Sync {
	fn local_address(&self) -> String;
}

/// Finds the interface address the OS would route through to reach `target`.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick a
/// source address. Falls back to loopback when there is no route.
#[derive(Debug, Clone, Copy)]
pub struct UdpProbe {
	target: SocketAddr,
}

impl UdpProbe {
	pub fn new(target: SocketAddr) -> Self {
		Self { target }
	}

	fn probe(&self) -> std::io::Result<IpAddr> {
		let bind: SocketAddr = match self.target {
			SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
			SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
		};
		let socket = UdpSocket::bind(bind)?;
		socket.connect(self.target)?;
		Ok(socket.local_addr()?.ip())
	}
}

impl Default for UdpProbe {
	fn default() -> Self {
		Self::new(SocketAddr::from(([8, 8, 8, 8], 80)))
	}
}

impl AddressLookup for UdpProbe {
	fn local_address(&self) -> String {
		match self.probe() {
			Ok(ip) => ip.to_string(),
			Err(e) => {
				warn!(target = "beacon.rendezvous", error = %e, "address probe failed; advertising loopback");
				Ipv4Addr::LOCALHOST.to_string()
			}
		}
	}
}

/// Always advertises the same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedAddress(pub String);

impl AddressLookup for FixedAddress {
	fn local_address(&self) -> String {
		self.0.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loopback_probe_picks_loopback() {
		let probe = UdpProbe::new(SocketAddr::from(([127, 0, 0, 1], 9)));
		assert_eq!(probe.local_address(), "127.0.0.1");
	}

	#[test]
	fn fixed_address_is_returned_verbatim() {
		assert_eq!(FixedAddress("10.0.0.5".into()).local_address(), "10.0.0.5");
	}
}
