//! Local network address discovery for the startup banner.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// The host's LAN-reachable IPv4 address, if one exists.
///
/// Connects (but never writes to) a UDP socket so the OS resolves which
/// interface routes outward; no packet leaves the machine.
pub fn lan_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_loopback() && !addr.ip().is_unspecified() => {
            Some(*addr.ip())
        }
        _ => None,
    }
}
