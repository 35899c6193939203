//! LAN address discovery.
//!
//! Peers reach the daemon through the host's address on the local network.
//! That address is found by connecting a UDP socket towards a public address
//! and reading the local end; connecting a UDP socket sends no packets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::debug;

/// Address used only to pick the outgoing interface.
const PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// The host's address on the local network, or loopback when none is found.
pub fn lan_ip() -> IpAddr {
    match probe_lan_ip() {
        Ok(ip) => ip,
        Err(e) => {
            debug!(error = %e, "Could not determine LAN address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn probe_lan_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(PROBE_ADDR)?;
    Ok(socket.local_addr()?.ip())
}

/// The address to advertise for a server bound to `bound`.
///
/// Unspecified binds (`0.0.0.0`, `::`) advertise the LAN address; anything
/// else advertises the bound address itself.
pub fn advertised_ip(bound: SocketAddr) -> IpAddr {
    if bound.ip().is_unspecified() {
        lan_ip()
    } else {
        bound.ip()
    }
}

/// The URL peers open in a browser.
pub fn share_url(ip: IpAddr, port: u16) -> String {
    format!("http://{}/", SocketAddr::new(ip, port))
}
